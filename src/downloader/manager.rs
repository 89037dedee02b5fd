use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::Instant;
use crate::config::AppConfig;
use crate::downloader::queue::{Claim, ClaimedTask, Enqueued};
use crate::downloader::{
    AudioFetcher, DownloadStatus, DownloadTask, EventBus, FetchProgress, ProgressEvent,
    RetryPolicy, TaskOutcome, TaskQueue,
};
use crate::errors::{Result, TaskError};
use crate::processing::{NoPostProcessing, PostProcessor};
use crate::search::{Candidate, MatchResult, Matcher, SearchManager, SearchQuery};

// Backoff deadlines past this are clamped.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Drives queued tasks through search, match, fetch and post-processing with a
/// fixed pool of workers.
///
/// Cheap to clone; clones share the queue, the event bus and the concurrency
/// limit.
#[derive(Clone)]
pub struct DownloadManager {
    queue: TaskQueue,
    search: Arc<SearchManager>,
    matcher: Arc<Matcher>,
    fetcher: Arc<dyn AudioFetcher + Send + Sync>,
    post_processor: Arc<dyn PostProcessor + Send + Sync>,
    events: EventBus,
    retry: RetryPolicy,
    max_concurrent: usize,
    permits: Arc<Semaphore>,
}

impl DownloadManager {
    pub fn new(search: SearchManager, fetcher: Arc<dyn AudioFetcher + Send + Sync>) -> Self {
        let max_concurrent = AppConfig::default().max_concurrent_downloads.max(1);
        Self {
            queue: TaskQueue::new(),
            search: Arc::new(search),
            matcher: Arc::new(Matcher::default()),
            fetcher,
            post_processor: Arc::new(NoPostProcessing),
            events: EventBus::default(),
            retry: RetryPolicy::default(),
            max_concurrent,
            permits: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    pub fn from_config(
        config: &AppConfig,
        search: SearchManager,
        fetcher: Arc<dyn AudioFetcher + Send + Sync>,
    ) -> Self {
        Self::new(search, fetcher)
            .with_max_concurrent(config.max_concurrent_downloads)
            .with_retry_policy(config.retry_policy())
            .with_matcher(Matcher::new(config.matcher.clone()))
            .with_events(EventBus::new(config.event_buffer))
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self.permits = Arc::new(Semaphore::new(self.max_concurrent));
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_matcher(mut self, matcher: Matcher) -> Self {
        self.matcher = Arc::new(matcher);
        self
    }

    pub fn with_post_processor(
        mut self,
        post_processor: Arc<dyn PostProcessor + Send + Sync>,
    ) -> Self {
        self.post_processor = post_processor;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_queue(mut self, queue: TaskQueue) -> Self {
        self.queue = queue;
        self
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Queues a task without starting any work.
    pub async fn submit(&self, task: DownloadTask) -> Result<()> {
        let event = ProgressEvent::from(&task);
        let id = task.id.clone();
        match self.queue.insert(task).await? {
            Enqueued::New => log::info!("📥 [QUEUE] Queued {}", id),
            Enqueued::Replaced => log::info!("📥 [QUEUE] Re-queued finished task {}", id),
        }
        self.events.publish(event);
        Ok(())
    }

    pub async fn remove(&self, task_id: &str) -> Option<DownloadTask> {
        let removed = self.queue.remove(task_id).await;
        if let Some(task) = &removed {
            log::info!("[QUEUE] Removed {} ({})", task.id, task.status);
        }
        removed
    }

    /// Submits `tasks`, drains the queue and reports the outcome of every task
    /// that was accepted. Duplicates of active tasks are skipped.
    pub async fn run(&self, tasks: Vec<DownloadTask>) -> HashMap<String, TaskOutcome> {
        let mut accepted = Vec::with_capacity(tasks.len());
        for task in tasks {
            let id = task.id.clone();
            match self.submit(task).await {
                Ok(()) => accepted.push(id),
                Err(e) => log::warn!("[QUEUE] Skipping {}: {}", id, e),
            }
        }

        self.process_until_idle().await;

        let mut outcomes = HashMap::with_capacity(accepted.len());
        for id in accepted {
            if let Some(task) = self.queue.get(&id).await {
                outcomes.insert(id, task.outcome());
            }
        }
        outcomes
    }

    /// Runs the worker pool until nothing is queued or downloading.
    pub async fn process_until_idle(&self) {
        log::info!("🚀 [QUEUE] Starting {} workers", self.max_concurrent);

        let workers: Vec<_> = (0..self.max_concurrent)
            .map(|worker| {
                let manager = self.clone();
                tokio::spawn(async move { manager.worker_loop(worker).await })
            })
            .collect();

        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                log::error!("[QUEUE] Worker stopped abnormally: {}", e);
            }
        }

        let stats = self.queue.stats().await;
        log::info!(
            "[QUEUE] Idle: {} completed, {} failed, {} retries",
            stats.completed, stats.failed, stats.retried
        );
    }

    async fn worker_loop(&self, worker: usize) {
        let mut changes = self.queue.subscribe();

        loop {
            changes.borrow_and_update();

            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            match self.queue.claim_next(Instant::now()).await {
                Claim::Task(claimed) => {
                    self.process_claimed(worker, claimed).await;
                    drop(permit);
                }
                Claim::WaitUntil(ready_at) => {
                    drop(permit);
                    tokio::select! {
                        _ = changes.changed() => {}
                        _ = tokio::time::sleep_until(ready_at) => {}
                    }
                }
                Claim::Busy => {
                    drop(permit);
                    if changes.changed().await.is_err() {
                        return;
                    }
                }
                Claim::Drained => {
                    log::debug!("[WORKER {}] Queue drained", worker);
                    return;
                }
            }
        }
    }

    async fn process_claimed(&self, worker: usize, claimed: ClaimedTask) {
        log::info!(
            "[WORKER {}] Downloading {} (attempt {})",
            worker,
            claimed.track.display_name(),
            claimed.retry_count + 1
        );
        self.events.publish(claimed.event.clone());

        let result = AssertUnwindSafe(self.attempt(&claimed))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(panic.as_ref()))));

        match result {
            Ok(path) => self.finish_success(&claimed, path).await,
            Err(error) => self.finish_failure(&claimed, error).await,
        }
    }

    async fn attempt(&self, claimed: &ClaimedTask) -> std::result::Result<PathBuf, TaskError> {
        let query = SearchQuery::from_track(&claimed.track)?;
        let candidates = self.search.search(&query).await?;

        let candidate = match self.matcher.match_query(&query, &candidates) {
            MatchResult::Matched { candidate, score } => {
                log::info!(
                    "✅ [MATCH] '{}' -> '{}' on {} (score {:.2})",
                    query.text, candidate.title, candidate.provider, score
                );
                let message = format!("Matched on {}: {}", candidate.provider, candidate.title);
                let result = MatchResult::Matched { candidate: candidate.clone(), score };
                self.record(claimed, |task| {
                    task.match_result = Some(result);
                    task.message = message;
                })
                .await;
                candidate
            }
            MatchResult::NoMatch { reason } => {
                log::warn!("❌ [MATCH] No match for '{}': {}", query.text, reason);
                return Err(TaskError::NoMatchFound(reason));
            }
        };

        let path = self.fetch_with_progress(claimed, &candidate).await?;

        self.post_processor
            .process(&path, &claimed.track)
            .await
            .map_err(|e| TaskError::PostProcessing(e.to_string()))?;

        Ok(path)
    }

    /// Fetches while forwarding progress reports to the task and the event bus.
    async fn fetch_with_progress(
        &self,
        claimed: &ClaimedTask,
        candidate: &Candidate,
    ) -> std::result::Result<PathBuf, TaskError> {
        let (sender, mut reports) = mpsc::unbounded_channel();
        let progress = FetchProgress::new(sender);

        let fetch = self.fetcher.fetch(candidate, &progress);
        tokio::pin!(fetch);

        let result = loop {
            tokio::select! {
                biased;
                Some(percent) = reports.recv() => self.record_progress(claimed, percent).await,
                result = &mut fetch => break result,
            }
        };

        while let Ok(percent) = reports.try_recv() {
            self.record_progress(claimed, percent).await;
        }

        result.map_err(TaskError::from)
    }

    async fn record_progress(&self, claimed: &ClaimedTask, percent: f32) {
        self.record(claimed, |task| task.progress = percent).await;
    }

    /// Applies an update to a claimed task and publishes the new state.
    /// Does nothing once the task has been removed.
    async fn record<F>(&self, claimed: &ClaimedTask, update: F) -> Option<DownloadTask>
    where
        F: FnOnce(&mut DownloadTask),
    {
        let task = self.queue.update(&claimed.id, claimed.epoch, update).await;
        match &task {
            Some(task) => self.events.publish(ProgressEvent::from(task)),
            None => log::debug!("[QUEUE] {} was removed; discarding update", claimed.id),
        }
        task
    }

    async fn finish_success(&self, claimed: &ClaimedTask, path: PathBuf) {
        let display_path = path.display().to_string();
        let updated = self
            .record(claimed, |task| {
                task.status = DownloadStatus::Completed;
                task.progress = 100.0;
                task.result_path = Some(path);
                task.last_error = None;
                task.completed_at = Some(chrono::Utc::now());
                task.message = "Downloaded successfully".to_string();
            })
            .await;

        if updated.is_some() {
            log::info!(
                "✅ [WORKER] Completed {} -> {}",
                claimed.track.display_name(),
                display_path
            );
        }
    }

    async fn finish_failure(&self, claimed: &ClaimedTask, error: TaskError) {
        if self.retry.should_retry(&error, claimed.retry_count) {
            let attempt = claimed.retry_count + 1;
            let delay = self.retry.delay_for(attempt);
            let now = Instant::now();
            let ready_at = now.checked_add(delay).unwrap_or(now + FAR_FUTURE);
            let message = format!(
                "Retry {}/{} in {}s: {}",
                attempt,
                self.retry.max_retries,
                delay.as_secs_f64(),
                error
            );

            log::warn!(
                "[WORKER] {} failed: {}; retry {}/{} in {:?}",
                claimed.track.display_name(),
                error,
                attempt,
                self.retry.max_retries,
                delay
            );

            let requeued = self
                .queue
                .requeue(&claimed.id, claimed.epoch, ready_at, |task| {
                    task.retry_count = attempt;
                    task.last_error = Some(error);
                    task.progress = 0.0;
                    task.message = message;
                })
                .await;
            match requeued {
                Some(task) => self.events.publish(ProgressEvent::from(&task)),
                None => log::debug!("[QUEUE] {} was removed; not retrying", claimed.id),
            }
            return;
        }

        let message = if error.is_permanent() || claimed.retry_count < self.retry.max_retries {
            format!("Failed: {}", error)
        } else {
            format!("Failed after {} retries: {}", claimed.retry_count, error)
        };

        log::error!("❌ [WORKER] {} {}", claimed.track.display_name(), message);

        self.record(claimed, |task| {
            task.status = DownloadStatus::Failed;
            task.last_error = Some(error);
            task.completed_at = Some(chrono::Utc::now());
            task.message = message;
        })
        .await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
