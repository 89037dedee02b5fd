//! Batch front end: turns a list of track URLs into queued tasks, drains the
//! queue, and reports per-task outcomes and aggregate counters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use crate::api::{Track, TrackResolver};
use crate::downloader::{
    DownloadManager, DownloadStatus, DownloadTask, ProgressEvent, QueueStats, TaskOutcome,
};
use crate::errors::AppError;
use crate::utils::task_id_from_url;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    InvalidUrl,
    /// Same id is already queued or downloading.
    Duplicate,
    Unresolvable(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InvalidUrl => f.write_str("invalid URL"),
            RejectReason::Duplicate => f.write_str("already queued"),
            RejectReason::Unresolvable(detail) => write!(f, "could not resolve: {}", detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub url: String,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueReport {
    /// Task ids, in input order.
    pub queued: Vec<String>,
    pub rejected: Vec<Rejection>,
    pub stats: QueueStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: BTreeMap<String, TaskOutcome>,
    pub stats: QueueStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatus {
    pub stats: QueueStats,
    pub tasks: Vec<DownloadTask>,
}

#[derive(Clone)]
pub struct BatchManager {
    resolver: Arc<dyn TrackResolver + Send + Sync>,
    downloads: DownloadManager,
}

impl BatchManager {
    pub fn new(resolver: Arc<dyn TrackResolver + Send + Sync>, downloads: DownloadManager) -> Self {
        Self { resolver, downloads }
    }

    pub fn downloads(&self) -> &DownloadManager {
        &self.downloads
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.downloads.subscribe()
    }

    /// Resolves and queues each URL. Nothing is downloaded until
    /// `process_queue` runs.
    pub async fn enqueue(&self, urls: &[String]) -> EnqueueReport {
        let mut queued = Vec::new();
        let mut rejected = Vec::new();

        for url in urls {
            match self.enqueue_url(url).await {
                Ok(id) => queued.push(id),
                Err(reason) => {
                    log::warn!("[BATCH] Rejected {}: {}", url, reason);
                    rejected.push(Rejection { url: url.clone(), reason });
                }
            }
        }

        log::info!("[BATCH] Added {} tracks to queue ({} rejected)", queued.len(), rejected.len());
        EnqueueReport {
            queued,
            rejected,
            stats: self.downloads.queue().stats().await,
        }
    }

    async fn enqueue_url(&self, url: &str) -> Result<String, RejectReason> {
        let id = task_id_from_url(url).ok_or(RejectReason::InvalidUrl)?;
        if self.downloads.queue().is_active(&id).await {
            return Err(RejectReason::Duplicate);
        }

        let track = self
            .resolver
            .resolve(url)
            .await
            .map_err(|e| RejectReason::Unresolvable(e.to_string()))?;

        self.submit(DownloadTask::new(id.clone(), Arc::new(track))).await?;
        Ok(id)
    }

    /// Queues tracks that were resolved elsewhere, keyed by their URL.
    pub async fn enqueue_tracks(&self, tracks: Vec<Track>) -> EnqueueReport {
        let mut queued = Vec::new();
        let mut rejected = Vec::new();

        for track in tracks {
            let url = track.url.clone();
            let task = DownloadTask::for_track(track);
            let id = task.id.clone();
            match self.submit(task).await {
                Ok(()) => queued.push(id),
                Err(reason) => rejected.push(Rejection { url, reason }),
            }
        }

        EnqueueReport {
            queued,
            rejected,
            stats: self.downloads.queue().stats().await,
        }
    }

    async fn submit(&self, task: DownloadTask) -> Result<(), RejectReason> {
        match self.downloads.submit(task).await {
            Ok(()) => Ok(()),
            Err(AppError::Duplicate(_)) => Err(RejectReason::Duplicate),
            Err(e) => Err(RejectReason::Unresolvable(e.to_string())),
        }
    }

    /// Drains the queue and reports every task that was pending when the call
    /// started.
    pub async fn process_queue(&self) -> BatchReport {
        let pending: Vec<String> = self
            .downloads
            .queue()
            .snapshot()
            .await
            .into_iter()
            .filter(|task| !task.is_terminal())
            .map(|task| task.id)
            .collect();

        log::info!("[BATCH] Processing {} tasks", pending.len());
        self.downloads.process_until_idle().await;

        let mut results = BTreeMap::new();
        for id in pending {
            if let Some(task) = self.downloads.queue().get(&id).await {
                results.insert(id, task.outcome());
            }
        }

        let stats = self.downloads.queue().stats().await;
        log::info!(
            "[BATCH] Queue processing complete - Completed: {}, Failed: {}, Retried: {}",
            stats.completed, stats.failed, stats.retried
        );
        BatchReport { results, stats }
    }

    /// Read-only view; calling it twice with no activity in between gives the
    /// same answer.
    pub async fn status(&self) -> BatchStatus {
        let tasks = self.downloads.queue().snapshot().await;
        BatchStatus {
            stats: QueueStats::from_tasks(&tasks),
            tasks,
        }
    }

    pub async fn task(&self, task_id: &str) -> Option<DownloadTask> {
        self.downloads.queue().get(task_id).await
    }

    /// Drops queued and finished tasks. Downloads in flight are left alone.
    pub async fn clear(&self) -> usize {
        let removed = self
            .downloads
            .queue()
            .remove_where(|task| task.status != DownloadStatus::Downloading)
            .await
            .len();
        log::info!("[BATCH] Queue cleared ({} tasks removed)", removed);
        removed
    }
}
