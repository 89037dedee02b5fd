use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::search::matcher::NoMatchReason;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Could not resolve track: {0}")]
    Resolve(String),

    #[error("Already queued: {0}")]
    Duplicate(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Failure reported by a candidate source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("search failed: {0}")]
    Transient(String),

    #[error("search rejected: {0}")]
    Permanent(String),
}

/// Failure reported by the audio fetch collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("region restricted: {0}")]
    RegionRestricted(String),
}

/// Everything that can go wrong during one attempt at a task.
///
/// Caught at the worker boundary and turned into a state transition; never
/// propagated out of the orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TaskError {
    #[error("search failed: {0}")]
    SearchTransient(String),

    #[error("invalid track: {0}")]
    SearchPermanent(String),

    #[error("no match found: {0}")]
    NoMatchFound(NoMatchReason),

    #[error("network error: {0}")]
    FetchNetwork(String),

    #[error("source not found: {0}")]
    FetchNotFound(String),

    #[error("region restricted: {0}")]
    FetchRegionRestricted(String),

    #[error("post-processing failed: {0}")]
    PostProcessing(String),

    #[error("collaborator panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Permanent errors skip the remaining retries.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            TaskError::SearchPermanent(_)
                | TaskError::FetchRegionRestricted(_)
                | TaskError::Panicked(_)
        )
    }
}

impl From<SearchError> for TaskError {
    fn from(error: SearchError) -> Self {
        match error {
            SearchError::Transient(msg) => TaskError::SearchTransient(msg),
            SearchError::Permanent(msg) => TaskError::SearchPermanent(msg),
        }
    }
}

impl From<FetchError> for TaskError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Network(msg) => TaskError::FetchNetwork(msg),
            FetchError::NotFound(msg) => TaskError::FetchNotFound(msg),
            FetchError::RegionRestricted(msg) => TaskError::FetchRegionRestricted(msg),
        }
    }
}
