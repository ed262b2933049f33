//! Periodic polling of the backend's GPU queue

use crate::backend::{Backend, QueueStatus};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, warn};

/// Latest known queue state
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueSnapshot {
    /// Last successfully fetched status
    pub status: Option<QueueStatus>,
    /// Error of the most recent poll, cleared on success
    pub error: Option<String>,
    /// Unix time (secs) of the most recent poll
    pub polled_at: Option<u64>,
    pub polls: u64,
}

/// Keeps a fresh [`QueueSnapshot`] for display
pub struct QueueMonitor {
    backend: Arc<dyn Backend>,
    latest: RwLock<QueueSnapshot>,
}

impl QueueMonitor {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            latest: RwLock::new(QueueSnapshot::default()),
        }
    }

    /// Fetch the status once and update the snapshot
    pub async fn poll_once(&self) -> QueueSnapshot {
        let result = self.backend.queue_status().await;
        let mut snapshot = self.latest.write().await;

        snapshot.polls += 1;
        snapshot.polled_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs());

        match result {
            Ok(status) => {
                debug!(
                    gpu_available = status.gpu_available,
                    queue_length = status.queue_length,
                    "Queue status"
                );
                snapshot.status = Some(status);
                snapshot.error = None;
            }
            Err(e) => {
                warn!(error = %e, "Queue status poll failed");
                snapshot.error = Some(e.to_string());
            }
        }
        snapshot.clone()
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.latest.read().await.clone()
    }

    /// Start background polling task
    pub fn start(self: Arc<Self>, interval_secs: u64) {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
            loop {
                ticker.tick().await;
                self.poll_once().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::MockBackend;

    #[tokio::test]
    async fn test_poll_keeps_last_good_status_on_error() {
        let backend = Arc::new(MockBackend::default());
        *backend.queue.lock().unwrap() = Some(QueueStatus {
            gpu_available: false,
            queue_length: 2,
            ..Default::default()
        });
        let monitor = QueueMonitor::new(backend.clone());

        let first = monitor.poll_once().await;
        assert_eq!(first.status.as_ref().unwrap().queue_length, 2);
        assert!(first.error.is_none());

        *backend.queue.lock().unwrap() = None;
        let second = monitor.poll_once().await;
        assert_eq!(second.polls, 2);
        assert_eq!(second.status.unwrap().queue_length, 2);
        assert_eq!(second.error.as_deref(), Some("Backend returned error: queue unavailable"));
        assert_eq!(monitor.snapshot().await.polls, 2);
    }
}
