//! Error types for api-mender
//!
//! Per-module failures never escape a batch: the orchestrator folds them
//! into report entries. Only discovery and configuration errors travel
//! all the way up to the HTTP layer or the CLI.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MendError>;

#[derive(Error, Debug)]
pub enum MendError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Invalid module name: {0}")]
    InvalidModuleName(String),

    #[error("Cannot list modules under {path}: {source}")]
    Discovery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timed out waiting for lock on {0}")]
    Lock(PathBuf),

    #[error("Parser error: {0}")]
    Parser(String),
}

impl MendError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures that are about the whole tree rather than one module.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, MendError::Discovery { .. } | MendError::Config(_))
    }
}
