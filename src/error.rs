//! Heartbeater Error Types

use thiserror::Error;

/// Result type alias for Heartbeater operations
pub type Result<T> = std::result::Result<T, Error>;

/// Heartbeater error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Socket setup failed for {address}: {reason}")]
    SocketSetup { address: String, reason: String },

    // Heartbeat decoding errors
    #[error("Heartbeat codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Malformed heartbeat: {0}")]
    MalformedHeartbeat(String),

    // Hook errors
    #[error("Hook failed: {0}")]
    Hook(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Worker lifecycle errors
    #[error("Worker error: {0}")]
    Worker(String),
}

impl Error {
    /// Check if this error came from a datagram that should be dropped as noise
    pub fn is_noise(&self) -> bool {
        matches!(self, Error::Codec(_) | Error::MalformedHeartbeat(_))
    }

    /// Check if this error should end the worker that hit it
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SocketSetup { .. } | Error::Network(_) | Error::Io(_) | Error::Worker(_)
        )
    }
}
