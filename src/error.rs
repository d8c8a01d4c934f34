use std::process::ExitStatus;

use thiserror::Error;

/// Main error type for the relay server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failure to start a transcoder process. Nothing is left running when
/// this is returned.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("source identifier is empty")]
    EmptySource,

    #[error("failed to start transcoder {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transcoder stdout pipe unavailable")]
    MissingPipe,
}

/// Errors that end a stream before the first byte reached the client
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("{0}")]
    Launch(#[from] LaunchError),

    #[error("failed to read transcoder output: {0}")]
    Read(std::io::Error),

    #[error("transcoder exited with {status} before producing output")]
    ProcessExit { status: ExitStatus, detail: String },

    #[error("stream limit reached ({limit} active)")]
    AtCapacity { limit: usize },
}

impl StreamError {
    /// Short machine-readable label, used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::Launch(_) => "launch",
            StreamError::Read(_) => "read",
            StreamError::ProcessExit { .. } => "process_exit",
            StreamError::AtCapacity { .. } => "at_capacity",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ServerError>;
