pub mod events;
pub mod manager;
pub mod queue;
pub mod retry;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use crate::api::Track;
use crate::errors::{FetchError, TaskError};
use crate::search::{Candidate, MatchResult};

pub use events::{EventBus, ProgressEvent};
pub use manager::DownloadManager;
pub use queue::{QueueStats, TaskQueue};
pub use retry::{NoMatchPolicy, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub id: String,
    pub track: Arc<Track>,
    pub status: DownloadStatus,
    pub match_result: Option<MatchResult>,
    pub retry_count: u32,
    pub last_error: Option<TaskError>,
    pub progress: f32,
    pub message: String,
    pub result_path: Option<PathBuf>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl DownloadTask {
    pub fn new(id: impl Into<String>, track: Arc<Track>) -> Self {
        Self {
            id: id.into(),
            track,
            status: DownloadStatus::Queued,
            match_result: None,
            retry_count: 0,
            last_error: None,
            progress: 0.0,
            message: "Queued for download".to_string(),
            result_path: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Task keyed by the track's own URL.
    pub fn for_track(track: Track) -> Self {
        let id = crate::utils::task_id_from_url(&track.url).unwrap_or_else(|| track.id.clone());
        Self::new(id, Arc::new(track))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn outcome(&self) -> TaskOutcome {
        TaskOutcome {
            status: self.status,
            path: self.result_path.clone(),
            error_message: self.last_error.as_ref().map(|e| e.to_string()),
            retries: self.retry_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Completed,
    Failed,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Failed)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DownloadStatus::Queued => "queued",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a caller gets back for each task once processing settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub status: DownloadStatus,
    pub path: Option<PathBuf>,
    pub error_message: Option<String>,
    pub retries: u32,
}

/// Handle given to a fetcher for reporting transfer progress.
///
/// Reporting never blocks; values are forwarded to the task and the event bus
/// by the worker that owns the task.
#[derive(Debug, Clone)]
pub struct FetchProgress {
    sender: Option<mpsc::UnboundedSender<f32>>,
}

impl FetchProgress {
    pub(crate) fn new(sender: mpsc::UnboundedSender<f32>) -> Self {
        Self { sender: Some(sender) }
    }

    /// A reporter that goes nowhere.
    pub fn detached() -> Self {
        Self { sender: None }
    }

    pub fn report(&self, percent: f32) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(percent.clamp(0.0, 100.0));
        }
    }
}

#[async_trait::async_trait]
pub trait AudioFetcher {
    /// Downloads the candidate's audio and returns where it landed.
    async fn fetch(
        &self,
        candidate: &Candidate,
        progress: &FetchProgress,
    ) -> std::result::Result<PathBuf, FetchError>;
    fn get_name(&self) -> &str;
}
