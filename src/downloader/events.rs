use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use crate::downloader::{DownloadStatus, DownloadTask};

/// Payload pushed to subscribers on every transition and progress tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub task_id: String,
    pub status: DownloadStatus,
    pub progress: f32,
    pub message: String,
}

impl From<&DownloadTask> for ProgressEvent {
    fn from(task: &DownloadTask) -> Self {
        Self {
            task_id: task.id.clone(),
            status: task.status,
            progress: task.progress,
            message: task.message.clone(),
        }
    }
}

/// Fan-out channel for progress events.
///
/// Publishing never waits. A subscriber that falls more than `capacity`
/// events behind skips the oldest ones and sees `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ProgressEvent) {
        log::trace!(
            "[EVENT] {} -> {} ({:.0}%) {}",
            event.task_id,
            event.status,
            event.progress,
            event.message
        );
        // no subscribers is fine
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    fn event(n: usize) -> ProgressEvent {
        ProgressEvent {
            task_id: format!("task-{n}"),
            status: DownloadStatus::Downloading,
            progress: n as f32,
            message: "Downloading...".into(),
        }
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        EventBus::new(4).publish(event(1));
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for n in 0..5 {
            bus.publish(event(n));
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        assert_eq!(rx.recv().await.unwrap(), event(3));
        assert_eq!(rx.recv().await.unwrap(), event(4));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let json = serde_json::to_value(event(7)).unwrap();
        assert_eq!(json["taskId"], "task-7");
        assert_eq!(json["status"], "downloading");
        assert_eq!(json["progress"], 7.0);
    }
}
