//! Heartbeater - Multicast Heartbeat Leader Election
//!
//! Runs one cluster node: a heartbeat emitter and an election watcher
//! sharing the node's role.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use heartbeater::config::{HeartbeaterConfig, InitialRole};
use heartbeater::election::{CommandHooks, ElectionWatcher, WatcherSettings};
use heartbeater::network::HeartbeatEmitter;
use heartbeater::state::{PeerStatus, Role};

/// Heartbeater - Multicast Heartbeat Leader Election
#[derive(Parser)]
#[command(name = "heartbeater")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "heartbeater.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run this node's emitter and election watcher
    Run {
        /// Seed for the conflict backoff RNG
        #[arg(long)]
        seed: Option<u64>,

        /// Role to start in
        #[arg(long, value_enum)]
        initial_role: Option<InitialRole>,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "heartbeater.toml")]
        output: PathBuf,

        /// Software ID (a random one is generated at startup when omitted)
        #[arg(long)]
        software_id: Option<String>,
    },

    /// Validate configuration file
    Validate,

    /// Show resolved node settings
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { seed, initial_role } => {
            run_node(&cli.config, cli.log_level.as_deref(), seed, initial_role).await
        }
        Commands::Init { output, software_id } => run_init(output, software_id),
        Commands::Validate => run_validate(&cli.config),
        Commands::Info => run_info(&cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_config(config_path: &Path) -> anyhow::Result<HeartbeaterConfig> {
    HeartbeaterConfig::from_file(config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))
}

/// Run the node until Ctrl+C or until the watcher dies
async fn run_node(
    config_path: &Path,
    log_level: Option<&str>,
    seed: Option<u64>,
    initial_role: Option<InitialRole>,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    init_logging(log_level.unwrap_or(&config.logging.level), &config.logging.format);

    let software_id = config.software_id();
    let role: Role = initial_role.unwrap_or(config.election.initial_role).into();
    let status = Arc::new(PeerStatus::new(role));

    tracing::info!(
        "Starting heartbeater node {} as {} on {}",
        software_id,
        role,
        config.multicast_address()
    );

    let emitter = HeartbeatEmitter::from_config(&config, software_id.clone(), Arc::clone(&status))
        .context("failed to set up heartbeat sender")?;

    let hooks = CommandHooks::from_config(&config, software_id.clone());
    let mut watcher = ElectionWatcher::new(
        WatcherSettings::from_config(&config, software_id),
        Arc::clone(&status),
        Box::new(hooks),
    )
    .context("invalid election settings")?;
    if let Some(seed) = seed.or(config.election.seed) {
        watcher = watcher.with_seed(seed);
    }

    let watcher_handle = watcher.start().context("failed to start election watcher")?;
    let watcher_signal = watcher_handle.stop_signal();
    let mut watcher_task = tokio::task::spawn_blocking(move || watcher_handle.join());

    let emitter_handle = match emitter.start() {
        Ok(handle) => handle,
        Err(e) => {
            watcher_signal.stop();
            let _ = watcher_task.await;
            return Err(e).context("failed to start heartbeat emitter");
        }
    };

    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        result = &mut watcher_task => Some(result),
    };

    let watcher_result = match finished {
        Some(result) => result,
        None => {
            tracing::info!("Received shutdown signal");
            watcher_signal.stop();
            watcher_task.await
        }
    };

    emitter_handle.stop();
    let emitter_result = tokio::task::spawn_blocking(move || emitter_handle.join()).await;

    watcher_result
        .context("election watcher task failed")?
        .context("election watcher failed")?;
    emitter_result
        .context("heartbeat emitter task failed")?
        .context("heartbeat emitter failed")?;

    tracing::info!("Heartbeater shutdown complete (last role {})", status.role());
    Ok(())
}

/// Initialize configuration file
fn run_init(output: PathBuf, software_id: Option<String>) -> anyhow::Result<()> {
    let software_id_line = match software_id {
        Some(id) => format!("software_id = \"{}\"", id),
        None => "# software_id = \"node-a\"".to_string(),
    };

    let config_content = format!(r#"# Heartbeater Configuration
# Generated configuration file

[node]
{software_id_line}

[multicast]
group = "239.192.74.66"
port = 7699
interface = "0.0.0.0"
ttl = 1
heartbeat_interval_ms = 1000

[election]
failure_detection_timeout_ms = 5000
conflict_backoff_min_ms = 0
conflict_backoff_max_ms = 1000
initial_role = "slave"
# seed = 42

[hooks]
# on_become_master = "/usr/local/bin/promote.sh"
# on_start_electing = "logger heartbeater electing"
timeout_ms = 5000

[logging]
level = "info"
format = "pretty"
"#);

    // Make sure we never write a template we could not load back
    HeartbeaterConfig::from_str(&config_content).context("generated configuration is invalid")?;

    std::fs::write(&output, config_content)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Configuration file created: {}", output.display());
    println!("\nSet multicast.interface to this node's address on the cluster network.");
    println!("Then start with: heartbeater --config {} run", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: &Path) -> anyhow::Result<()> {
    match load_config(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!(
                "  Software ID: {}",
                config.node.software_id.as_deref().unwrap_or("(generated at startup)")
            );
            println!("  Group: {}", config.multicast_address());
            println!("  Interface: {}", config.multicast.interface);
            println!("  Poll Window: {:?}", config.poll_timeout());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {:#}", e);
            Err(e)
        }
    }
}

/// Show node information
fn run_info(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let backoff = config.backoff_range();

    println!("Heartbeater Node Information");
    println!("============================");
    println!();
    println!("Software ID:      {}", config.node.software_id.as_deref().unwrap_or("(generated at startup)"));
    println!("Initial Role:     {}", Role::from(config.election.initial_role));
    println!();
    println!("Multicast Configuration:");
    println!("  Group:          {}", config.multicast_address());
    println!("  Interface:      {}", config.multicast.interface);
    println!("  TTL:            {}", config.multicast.ttl);
    println!("  Heartbeat:      {:?}", config.heartbeat_interval());
    println!();
    println!("Election Configuration:");
    println!("  Failure Window: {:?}", config.failure_detection_timeout());
    println!("  Poll Timeout:   {:?}", config.poll_timeout());
    println!("  Backoff:        {:?} .. {:?}", backoff.start, backoff.end);
    println!("  Seed:           {}", config.election.seed.map_or("(random)".to_string(), |s| s.to_string()));
    println!();
    println!("Hooks:");
    println!("  Become Master:  {}", config.hooks.on_become_master.as_deref().unwrap_or("-"));
    println!("  Start Electing: {}", config.hooks.on_start_electing.as_deref().unwrap_or("-"));

    Ok(())
}
