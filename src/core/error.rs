//! CR-007: Engine error taxonomy.
//!
//! Configuration and lookup errors fail fast. Execution errors carry the
//! task name and the underlying failure. A corrupt dependency store is
//! reported here but degraded to an empty store by the engine.

use std::path::PathBuf;
use thiserror::Error;

/// Failure raised by a task action or cleanup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ActionError(pub String);

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Errors surfaced by the task engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed task shape, file table, or pipeline configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("dependency store {path} is unreadable: {reason}")]
    StoreCorrupt { path: PathBuf, reason: String },

    #[error("dependency store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("task '{task}' failed: {source}")]
    TaskExecution {
        task: String,
        #[source]
        source: ActionError,
    },

    #[error("cannot fingerprint {path}: {reason}")]
    Fingerprint { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    /// Wrap an action failure for `task`.
    pub fn execution(task: &str, source: impl Into<ActionError>) -> Self {
        Self::TaskExecution {
            task: task.to_string(),
            source: source.into(),
        }
    }

    /// Name of the task this error belongs to, when it has one.
    pub fn task(&self) -> Option<&str> {
        match self {
            Self::TaskExecution { task, .. } => Some(task),
            Self::TaskNotFound(name) => Some(name),
            _ => None,
        }
    }
}
