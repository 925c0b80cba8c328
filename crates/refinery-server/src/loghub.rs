//! Broadcast fanout for live log entries.
//!
//! Backed by a bounded `tokio::sync::broadcast` channel: a slow subscriber
//! lags and silently loses entries rather than blocking the publisher.

use tokio::sync::broadcast;

use refinery_types::LogEntry;

const HUB_CAPACITY: usize = 256;

pub(crate) struct LogHub {
    sender: broadcast::Sender<LogEntry>,
}

impl LogHub {
    pub(crate) fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(HUB_CAPACITY);
        Self { sender }
    }

    pub(crate) fn publish(&self, entry: LogEntry) {
        // No subscribers is fine; the send result is intentionally ignored.
        let _ = self.sender.send(entry);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> LogEntry {
        LogEntry {
            name: name.to_string(),
            version: "1.0".to_string(),
            content: "line".to_string(),
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_entries() {
        let hub = LogHub::new();
        let mut receiver = hub.subscribe();
        hub.publish(entry("pkg"));
        let received = receiver.recv().await.unwrap();
        assert_eq!(received.name, "pkg");
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let hub = LogHub::new();
        hub.publish(entry("nobody-listening"));
    }

    #[tokio::test]
    async fn lagging_subscribers_drop_rather_than_block() {
        let hub = LogHub::new();
        let mut receiver = hub.subscribe();
        for i in 0..(HUB_CAPACITY + 10) {
            hub.publish(entry(&format!("pkg-{i}")));
        }
        // The first recv reports the lag, then delivery resumes.
        match receiver.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert!(skipped >= 10),
            other => panic!("expected lag, got {other:?}"),
        }
        assert!(receiver.recv().await.is_ok());
    }
}
