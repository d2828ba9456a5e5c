//! Typed errors for the failure classes that callers need to tell apart.
//!
//! Everything else travels as [`anyhow::Error`] with context attached.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal configuration problems, raised before any record is dispatched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("consumer '{consumer}' must map to a table of options")]
    InvalidConsumer { consumer: String },

    #[error("consumer '{consumer}' is missing required 'type'")]
    MissingType { consumer: String },

    #[error("unknown consumer type '{type_name}' for consumer '{consumer}'")]
    UnknownConsumerType { consumer: String, type_name: String },

    #[error("invalid options for consumer '{consumer}': {reason}")]
    InvalidOption { consumer: String, reason: String },

    #[error("consumer '{consumer}': data directory not found: {path}")]
    MissingDataDirectory { consumer: String, path: PathBuf },
}

/// Problems with the capture tree itself. These abort the run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("capture directory not found: {0}")]
    CaptureDirMissing(PathBuf),
}

/// A failed invocation of an external program, with its captured output.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CommandError {
    pub message: String,
    pub stdout: String,
    pub stderr: String,
}

impl CommandError {
    pub fn new(message: impl Into<String>, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}
