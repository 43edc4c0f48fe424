//! Error types for the simulation crate.

use fusionbus_core::AgentError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while configuring, running, or exporting a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    /// A file could not be read or written
    #[error("Failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// JSON could not be parsed or produced
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration is inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An agent failed to start or stopped on error
    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl SimError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        SimError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        SimError::InvalidConfig(reason.into())
    }
}
