//! Typed failures surfaced by [`crate::commands::CommandOptions::run`].
//!
//! Driver construction problems are reported as-is; executor problems are
//! wrapped with a message naming the metadata action that failed.

use std::path::PathBuf;

use thiserror::Error;

use crate::metadata::MetadataAction;

/// Failure to obtain a migration driver for the target engine.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("cannot read migrations directory {}", .path.display())]
    MigrationsDir {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("invalid migrations in {}: {reason}", .path.display())]
    Migrations { path: PathBuf, reason: String },

    #[error("failed to build engine HTTP client")]
    Client(#[source] reqwest::Error),

    #[error("cannot reach engine at {endpoint}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("engine at {endpoint} is incompatible: {reason}")]
    Incompatible { endpoint: String, reason: String },
}

/// Error returned by a metadata command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Connectivity or setup problem, independent of the requested action.
    #[error(transparent)]
    Setup(#[from] DriverError),

    /// The metadata action itself failed.
    #[error("Cannot {action} metadata")]
    Action {
        action: MetadataAction,
        #[source]
        source: anyhow::Error,
    },
}

impl CommandError {
    pub fn action(&self) -> Option<MetadataAction> {
        match self {
            Self::Setup(_) => None,
            Self::Action { action, .. } => Some(*action),
        }
    }
}
