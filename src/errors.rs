//! Error types for sandbox operations

use std::io;
use thiserror::Error;

/// Result type for sandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors that can occur while launching and supervising a sandboxed process
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Syscall error: {0}")]
    Syscall(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cannot start '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Process monitoring error: {0}")]
    ProcessMonitoring(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Cannot redirect standard {stream}: {source}")]
    OutputRedirect {
        stream: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl SandboxError {
    /// Wrap a spawn failure for `program`
    pub fn launch(program: impl Into<String>, source: io::Error) -> Self {
        SandboxError::Launch {
            program: program.into(),
            source,
        }
    }
}
