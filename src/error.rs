//! Error types of the supervisor library

use std::path::PathBuf;

/// Errors raised while setting up or finalizing an execution.
///
/// None of these escape `ProcessSupervisor::execute`; they are folded into
/// the outcome (launch errors) or into warnings (collector errors).
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The command could not be started (missing binary, permission denied, ...)
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The child was reaped before its pid could be read
    #[error("child exited before its process group could be recorded")]
    NoPid,

    /// A piped stream was not available after spawn
    #[error("child {stream} was not captured")]
    MissingStream { stream: &'static str },

    /// The log artifact could not be written
    #[error("failed to write log artifact {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An output reader task panicked or was aborted
    #[error("output reader for {stream} failed: {message}")]
    Reader {
        stream: &'static str,
        message: String,
    },
}

/// Errors raised by a log artifact publisher
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to read artifact {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload of {key} failed: {message}")]
    Upload { key: String, message: String },
}
