//! Coalescing reconciliation trigger

use std::sync::Arc;

use tokio::sync::Notify;

/// Wakes the reconciliation worker.
///
/// At most one request is stored while the worker is busy, so a burst of
/// change events results in a single extra pass.
#[derive(Debug, Clone, Default)]
pub struct ReconcileTrigger {
    notify: Arc<Notify>,
}

impl ReconcileTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a reconciliation pass.
    pub fn request(&self) {
        self.notify.notify_one();
    }

    /// Waits until a pass was requested.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_requests_coalesce() {
        let trigger = ReconcileTrigger::new();
        for _ in 0..10 {
            trigger.request();
        }

        timeout(Duration::from_millis(100), trigger.notified())
            .await
            .expect("stored request");
        assert!(timeout(Duration::from_millis(50), trigger.notified())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_clones_share_permit() {
        let trigger = ReconcileTrigger::new();
        trigger.clone().request();
        timeout(Duration::from_millis(100), trigger.notified())
            .await
            .expect("request from clone");
    }
}
