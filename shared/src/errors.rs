/// Unified error types for the YTM native host.
use thiserror::Error;

/// Top-level error type for request handling.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("{0} not found. Please install it first.")]
    MissingTool(String),

    #[error("No {0} provided")]
    MissingField(&'static str),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Download failed (exit code {code})")]
    ChildProcess { code: i32, output: String },

    #[error("Download timed out after {secs}s")]
    Timeout { secs: u64, output: String },

    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        source: std::io::Error,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown command")]
    UnknownCommand,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HostError {
    /// Captured subprocess output, if this error carries any.
    pub fn output(&self) -> Option<&str> {
        match self {
            HostError::ChildProcess { output, .. } | HostError::Timeout { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }

    /// Exit code of a failed child process.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            HostError::ChildProcess { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type alias for host operations.
pub type HostResult<T> = Result<T, HostError>;
