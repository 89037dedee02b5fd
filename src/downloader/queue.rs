//! The shared task table.
//!
//! Tasks are claimed by exactly one worker at a time: `claim_next` flips a
//! task to `Downloading` under the lock and hands the worker an epoch. Every
//! later write from that worker carries the epoch, so a task that was removed
//! (or removed and enqueued again) while in flight silently drops the stale
//! worker's result.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use crate::api::Track;
use crate::downloader::{DownloadStatus, DownloadTask, ProgressEvent};
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub downloading: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub retried: u32,
}

impl QueueStats {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a DownloadTask>) -> Self {
        let mut stats = Self::default();
        for task in tasks {
            match task.status {
                DownloadStatus::Queued => stats.queued += 1,
                DownloadStatus::Downloading => stats.downloading += 1,
                DownloadStatus::Completed => stats.completed += 1,
                DownloadStatus::Failed => stats.failed += 1,
            }
            stats.total += 1;
            stats.retried += task.retry_count;
        }
        stats
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    New,
    /// A finished task with the same id was reset.
    Replaced,
}

#[derive(Debug, Clone)]
pub(crate) struct ClaimedTask {
    pub id: String,
    pub epoch: u64,
    pub track: Arc<Track>,
    pub retry_count: u32,
    pub event: ProgressEvent,
}

#[derive(Debug)]
pub(crate) enum Claim {
    Task(ClaimedTask),
    /// Only backing-off tasks are queued; the earliest becomes eligible then.
    WaitUntil(Instant),
    /// Nothing queued, but other workers are still busy and may requeue.
    Busy,
    Drained,
}

#[derive(Debug)]
struct QueueEntry {
    task: DownloadTask,
    epoch: u64,
    /// Line position: when the task became (or becomes) eligible, then
    /// admission order among equal instants.
    eligible_at: Instant,
    admission: u64,
    ready_at: Option<Instant>,
}

impl QueueEntry {
    fn line_position(&self) -> (Instant, u64) {
        (self.eligible_at, self.admission)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    entries: HashMap<String, QueueEntry>,
    next_seq: u64,
}

impl QueueState {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn live_entry(&mut self, id: &str, epoch: u64) -> Option<&mut QueueEntry> {
        self.entries.get_mut(id).filter(|entry| entry.epoch == epoch)
    }

    fn ordered(&self) -> Vec<&QueueEntry> {
        let mut entries: Vec<&QueueEntry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.epoch);
        entries
    }
}

#[derive(Clone)]
pub struct TaskQueue {
    state: Arc<Mutex<QueueState>>,
    changes: Arc<watch::Sender<u64>>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            changes: Arc::new(changes),
        }
    }

    /// Bumped on every mutation; workers wait on it while idle.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    /// Adds a task in the `Queued` state.
    ///
    /// An id that is still queued or downloading is rejected. An id whose task
    /// already completed or failed is replaced by the new task.
    pub async fn insert(&self, mut task: DownloadTask) -> Result<Enqueued> {
        let mut state = self.state.lock().await;

        let outcome = match state.entries.get(&task.id) {
            Some(existing) if !existing.task.is_terminal() => {
                return Err(AppError::Duplicate(task.id));
            }
            Some(_) => Enqueued::Replaced,
            None => Enqueued::New,
        };

        task.status = DownloadStatus::Queued;
        task.progress = 0.0;
        let seq = state.next_seq();
        state.entries.insert(
            task.id.clone(),
            QueueEntry {
                task,
                epoch: seq,
                eligible_at: Instant::now(),
                admission: seq,
                ready_at: None,
            },
        );
        drop(state);

        self.notify();
        Ok(outcome)
    }

    /// True when the id is present and not yet completed or failed.
    pub async fn is_active(&self, id: &str) -> bool {
        let state = self.state.lock().await;
        state
            .entries
            .get(id)
            .map_or(false, |entry| !entry.task.is_terminal())
    }

    pub async fn get(&self, id: &str) -> Option<DownloadTask> {
        let state = self.state.lock().await;
        state.entries.get(id).map(|entry| entry.task.clone())
    }

    /// All tasks in insertion order.
    pub async fn snapshot(&self) -> Vec<DownloadTask> {
        let state = self.state.lock().await;
        state.ordered().into_iter().map(|entry| entry.task.clone()).collect()
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        QueueStats::from_tasks(state.entries.values().map(|entry| &entry.task))
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Removes a task regardless of state. A worker still processing it
    /// finishes its attempt and the result is discarded.
    pub async fn remove(&self, id: &str) -> Option<DownloadTask> {
        let removed = self
            .state
            .lock()
            .await
            .entries
            .remove(id)
            .map(|entry| entry.task);
        if removed.is_some() {
            self.notify();
        }
        removed
    }

    pub async fn remove_where<F>(&self, predicate: F) -> Vec<DownloadTask>
    where
        F: Fn(&DownloadTask) -> bool,
    {
        let mut state = self.state.lock().await;
        let ids: Vec<String> = state
            .ordered()
            .into_iter()
            .filter(|entry| predicate(&entry.task))
            .map(|entry| entry.task.id.clone())
            .collect();
        let removed: Vec<DownloadTask> = ids
            .iter()
            .filter_map(|id| state.entries.remove(id))
            .map(|entry| entry.task)
            .collect();
        drop(state);

        if !removed.is_empty() {
            self.notify();
        }
        removed
    }

    /// Hands the queued task that has been eligible the longest to the caller
    /// and marks it `Downloading`. A retried task lines up from the moment its
    /// backoff ends, behind anything that became eligible before then.
    pub(crate) async fn claim_next(&self, now: Instant) -> Claim {
        let mut state = self.state.lock().await;

        let mut eligible: Option<((Instant, u64), String)> = None;
        let mut earliest_wait: Option<Instant> = None;
        let mut busy = false;

        for (id, entry) in &state.entries {
            match entry.task.status {
                DownloadStatus::Queued => match entry.ready_at {
                    Some(ready_at) if ready_at > now => {
                        earliest_wait =
                            Some(earliest_wait.map_or(ready_at, |w| w.min(ready_at)));
                    }
                    _ => {
                        let position = entry.line_position();
                        if eligible.as_ref().map_or(true, |(best, _)| position < *best) {
                            eligible = Some((position, id.clone()));
                        }
                    }
                },
                DownloadStatus::Downloading => busy = true,
                _ => {}
            }
        }

        let Some((_, id)) = eligible else {
            return match (earliest_wait, busy) {
                (Some(at), _) => Claim::WaitUntil(at),
                (None, true) => Claim::Busy,
                (None, false) => Claim::Drained,
            };
        };

        let Some(entry) = state.entries.get_mut(&id) else {
            return Claim::Drained;
        };
        entry.ready_at = None;
        entry.task.status = DownloadStatus::Downloading;
        entry.task.progress = 0.0;
        entry.task.started_at = Some(chrono::Utc::now());
        entry.task.message = "Downloading...".to_string();

        let claimed = ClaimedTask {
            id: entry.task.id.clone(),
            epoch: entry.epoch,
            track: entry.task.track.clone(),
            retry_count: entry.task.retry_count,
            event: ProgressEvent::from(&entry.task),
        };
        drop(state);

        self.notify();
        Claim::Task(claimed)
    }

    /// Applies `update` if the claim is still current; returns the new state.
    pub(crate) async fn update<F>(&self, id: &str, epoch: u64, update: F) -> Option<DownloadTask>
    where
        F: FnOnce(&mut DownloadTask),
    {
        let mut state = self.state.lock().await;
        let entry = state.live_entry(id, epoch)?;
        update(&mut entry.task);
        let task = entry.task.clone();
        drop(state);

        self.notify();
        Some(task)
    }

    /// Puts a claimed task back in line, eligible from `ready_at`.
    pub(crate) async fn requeue<F>(
        &self,
        id: &str,
        epoch: u64,
        ready_at: Instant,
        update: F,
    ) -> Option<DownloadTask>
    where
        F: FnOnce(&mut DownloadTask),
    {
        let mut state = self.state.lock().await;
        let admission = state.next_seq();
        let entry = state.live_entry(id, epoch)?;
        update(&mut entry.task);
        entry.task.status = DownloadStatus::Queued;
        entry.eligible_at = ready_at;
        entry.admission = admission;
        entry.ready_at = Some(ready_at);
        let task = entry.task.clone();
        drop(state);

        self.notify();
        Some(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn task(id: &str) -> DownloadTask {
        DownloadTask::new(id, Arc::new(Track::new(id, "Song", vec!["Artist".into()])))
    }

    fn claimed(claim: Claim) -> ClaimedTask {
        match claim {
            Claim::Task(claimed) => claimed,
            other => panic!("expected a task, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_duplicate_of_active_task() {
        let queue = TaskQueue::new();
        assert_eq!(queue.insert(task("a")).await.unwrap(), Enqueued::New);
        assert!(matches!(
            queue.insert(task("a")).await,
            Err(AppError::Duplicate(id)) if id == "a"
        ));
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn replaces_finished_task_with_same_id() {
        let queue = TaskQueue::new();
        queue.insert(task("a")).await.unwrap();
        let claim = claimed(queue.claim_next(Instant::now()).await);
        queue
            .update(&claim.id, claim.epoch, |t| t.status = DownloadStatus::Completed)
            .await
            .unwrap();

        assert_eq!(queue.insert(task("a")).await.unwrap(), Enqueued::Replaced);
        assert_eq!(queue.get("a").await.unwrap().status, DownloadStatus::Queued);
    }

    #[tokio::test]
    async fn claims_in_fifo_order_and_only_once() {
        let queue = TaskQueue::new();
        for id in ["a", "b", "c"] {
            queue.insert(task(id)).await.unwrap();
        }

        let now = Instant::now();
        let order: Vec<String> = vec![
            claimed(queue.claim_next(now).await).id,
            claimed(queue.claim_next(now).await).id,
            claimed(queue.claim_next(now).await).id,
        ];
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(matches!(queue.claim_next(now).await, Claim::Busy));
        assert_eq!(queue.stats().await.downloading, 3);
    }

    #[tokio::test]
    async fn requeued_task_waits_for_backoff_and_goes_to_the_back() {
        let queue = TaskQueue::new();
        queue.insert(task("a")).await.unwrap();
        queue.insert(task("b")).await.unwrap();

        let now = Instant::now();
        let a = claimed(queue.claim_next(now).await);
        queue
            .requeue(&a.id, a.epoch, now + Duration::from_secs(2), |t| t.retry_count += 1)
            .await
            .unwrap();

        assert_eq!(claimed(queue.claim_next(now).await).id, "b");
        match queue.claim_next(now).await {
            Claim::WaitUntil(at) => assert_eq!(at, now + Duration::from_secs(2)),
            other => panic!("expected a wait, got {other:?}"),
        }

        let later = now + Duration::from_secs(2);
        let again = claimed(queue.claim_next(later).await);
        assert_eq!(again.id, "a");
        assert_eq!(again.retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_line_up_by_when_their_backoff_ends() {
        let queue = TaskQueue::new();
        queue.insert(task("a")).await.unwrap();
        queue.insert(task("b")).await.unwrap();

        let now = Instant::now();
        let a = claimed(queue.claim_next(now).await);
        let b = claimed(queue.claim_next(now).await);
        queue.requeue(&a.id, a.epoch, now + Duration::from_secs(4), |_| {}).await.unwrap();
        queue.requeue(&b.id, b.epoch, now + Duration::from_secs(1), |_| {}).await.unwrap();

        let later = now + Duration::from_secs(5);
        assert_eq!(claimed(queue.claim_next(later).await).id, "b");
        assert_eq!(claimed(queue.claim_next(later).await).id, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn task_added_during_a_backoff_goes_first() {
        let queue = TaskQueue::new();
        queue.insert(task("a")).await.unwrap();

        let now = Instant::now();
        let a = claimed(queue.claim_next(now).await);
        queue.requeue(&a.id, a.epoch, now + Duration::from_secs(1), |_| {}).await.unwrap();
        queue.insert(task("c")).await.unwrap();

        let later = now + Duration::from_secs(2);
        assert_eq!(claimed(queue.claim_next(later).await).id, "c");
        assert_eq!(claimed(queue.claim_next(later).await).id, "a");
    }

    #[tokio::test]
    async fn drained_when_everything_is_terminal() {
        let queue = TaskQueue::new();
        assert!(matches!(queue.claim_next(Instant::now()).await, Claim::Drained));

        queue.insert(task("a")).await.unwrap();
        let a = claimed(queue.claim_next(Instant::now()).await);
        queue.update(&a.id, a.epoch, |t| t.status = DownloadStatus::Failed).await;
        assert!(matches!(queue.claim_next(Instant::now()).await, Claim::Drained));
    }

    #[tokio::test]
    async fn stale_claim_cannot_touch_a_reinserted_task() {
        let queue = TaskQueue::new();
        queue.insert(task("a")).await.unwrap();
        let stale = claimed(queue.claim_next(Instant::now()).await);

        queue.remove("a").await.unwrap();
        queue.insert(task("a")).await.unwrap();

        let result = queue
            .update(&stale.id, stale.epoch, |t| t.status = DownloadStatus::Completed)
            .await;
        assert!(result.is_none());
        assert_eq!(queue.get("a").await.unwrap().status, DownloadStatus::Queued);
    }

    #[tokio::test]
    async fn snapshot_is_stable_and_ordered() {
        let queue = TaskQueue::new();
        for id in ["z", "m", "a"] {
            queue.insert(task(id)).await.unwrap();
        }

        let first = queue.snapshot().await;
        let second = queue.snapshot().await;
        assert_eq!(first, second);
        let ids: Vec<&str> = first.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "m", "a"]);
    }

    #[tokio::test]
    async fn remove_where_leaves_unmatched_tasks() {
        let queue = TaskQueue::new();
        for id in ["a", "b", "c"] {
            queue.insert(task(id)).await.unwrap();
        }
        claimed(queue.claim_next(Instant::now()).await);

        let removed = queue
            .remove_where(|t| t.status == DownloadStatus::Queued)
            .await;
        assert_eq!(removed.len(), 2);
        assert_eq!(
            queue.stats().await,
            QueueStats { downloading: 1, total: 1, ..QueueStats::default() }
        );
    }

    #[tokio::test]
    async fn mutations_bump_the_change_counter() {
        let queue = TaskQueue::new();
        let mut changes = queue.subscribe();
        changes.borrow_and_update();

        queue.insert(task("a")).await.unwrap();
        assert!(changes.has_changed().unwrap());
    }
}
