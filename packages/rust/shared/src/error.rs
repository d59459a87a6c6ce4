//! Error types for researchflow.
//!
//! Library crates use [`ResearchFlowError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::Stage;

/// Failures raised by a model provider while loading or generating.
///
/// These never abort a run: the orchestrator converts them into invalid
/// task results carrying [`FailureReason::ProviderError`](crate::FailureReason).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// No candidate model fits the configured memory budget.
    #[error("no model fits the resource budget: {0}")]
    ResourceExceeded(String),

    /// The model could not be spawned, downloaded or initialized.
    #[error("model load failed: {0}")]
    LoadFailure(String),

    /// The provider raised an error while generating.
    #[error("inference failed: {0}")]
    InferenceError(String),
}

/// Top-level error type for all researchflow operations.
#[derive(Debug, thiserror::Error)]
pub enum ResearchFlowError {
    /// Configuration file loading error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Unrecognized stage, task type or template in the configuration.
    /// Fatal at startup.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Compare-and-set stage write lost against another writer.
    #[error("concurrent modification of project {project_id}: expected stage {expected}, found {found}")]
    ConcurrentModification {
        project_id: String,
        expected: Stage,
        found: Stage,
    },

    /// Stage write kept failing after every backoff attempt.
    #[error("stage write for project {project_id} failed after {attempts} attempts: {last_error}")]
    StoreWriteExhausted {
        project_id: String,
        attempts: u32,
        last_error: String,
    },

    /// A referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Model provider error that escaped task-level handling.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ResearchFlowError>;

impl ResearchFlowError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a configuration (mapping) error from any displayable message.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a failed store write is worth retrying with backoff.
    pub fn is_retryable_write(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. } | Self::Storage(_))
    }
}
