//! Election Hooks
//!
//! Side effects the watcher triggers on role transitions. Hooks run on the
//! watcher thread, so a hook that never returns stalls the election; the
//! command hooks below are bounded by a timeout for that reason.

use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::HeartbeaterConfig;
use crate::error::{Error, Result};
use crate::state::Role;

const HOOK_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Role-change hooks injected into the election watcher
pub trait ElectionCallbacks: Send {
    /// This node just became MASTER
    fn on_become_master(&mut self);

    /// This node stepped down to SLAVE.
    ///
    /// The current election rules never fire it: conceding an election and
    /// stepping down on a master conflict both happen silently.
    fn on_become_slave(&mut self);

    /// This node heard silence and started an election
    fn on_start_electing(&mut self);
}

/// Hooks that log each transition and run an optional shell command
#[derive(Debug, Clone)]
pub struct CommandHooks {
    software_id: String,
    on_become_master: Option<String>,
    on_start_electing: Option<String>,
    timeout: Duration,
}

impl CommandHooks {
    /// Hooks that only log
    pub fn new(software_id: String, timeout: Duration) -> Self {
        Self {
            software_id,
            on_become_master: None,
            on_start_electing: None,
            timeout,
        }
    }

    /// Hooks running the commands from the `[hooks]` section
    pub fn from_config(config: &HeartbeaterConfig, software_id: String) -> Self {
        Self {
            software_id,
            on_become_master: config.hooks.on_become_master.clone(),
            on_start_electing: config.hooks.on_start_electing.clone(),
            timeout: config.hook_timeout(),
        }
    }

    fn fire(&self, role: Role, command: Option<&str>) {
        tracing::info!("Node {} is now {}", self.software_id, role);

        let Some(command) = command else {
            return;
        };

        match run_command(command, &self.software_id, role, self.timeout) {
            Ok(()) => tracing::debug!("Hook `{}` completed", command),
            Err(e) => tracing::warn!("{}", e),
        }
    }
}

impl ElectionCallbacks for CommandHooks {
    fn on_become_master(&mut self) {
        self.fire(Role::Master, self.on_become_master.as_deref());
    }

    fn on_become_slave(&mut self) {
        self.fire(Role::Slave, None);
    }

    fn on_start_electing(&mut self) {
        self.fire(Role::Electing, self.on_start_electing.as_deref());
    }
}

/// Run `command` through `sh -c`, killing it once `timeout` elapses
pub fn run_command(command: &str, software_id: &str, role: Role, timeout: Duration) -> Result<()> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("HEARTBEATER_SOFTWARE_ID", software_id)
        .env("HEARTBEATER_ROLE", role.to_string())
        .stdin(Stdio::null())
        .spawn()
        .map_err(|e| Error::Hook(format!("failed to spawn `{}`: {}", command, e)))?;

    let deadline = Instant::now() + timeout;

    loop {
        match child.try_wait()? {
            Some(status) if status.success() => return Ok(()),
            Some(status) => {
                return Err(Error::Hook(format!("`{}` exited with {}", command, status)));
            }
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Hook(format!(
                    "`{}` killed after {:?}",
                    command, timeout
                )));
            }
            None => thread::sleep(HOOK_POLL_INTERVAL),
        }
    }
}
