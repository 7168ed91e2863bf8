//! Message bus that records traffic and can be told to fail.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bus::{BusError, Envelope, InMemoryBus, MessageBus};

/// An [`InMemoryBus`] that keeps a copy of every successful publish.
///
/// # Example
///
/// ```rust,ignore
/// let bus = Arc::new(RecordingBus::new());
/// bus.fail_queue("f2_consume");
/// // ... run the orchestrator ...
/// assert_eq!(bus.published_to("dmcs_ocs_publish").len(), 2);
/// ```
#[derive(Default)]
pub struct RecordingBus {
    inner: InMemoryBus,
    published: Mutex<Vec<(String, Envelope)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(destination, envelope)` delivered so far, in order.
    pub fn published(&self) -> Vec<(String, Envelope)> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn published_to(&self, destination: &str) -> Vec<Envelope> {
        self.published()
            .into_iter()
            .filter(|(d, _)| d == destination)
            .map(|(_, e)| e)
            .collect()
    }

    /// Envelopes of one message type sent to `destination`.
    pub fn published_of_type(&self, destination: &str, msg_type: &str) -> Vec<Envelope> {
        self.published_to(destination)
            .into_iter()
            .filter(|e| e.msg_type() == Some(msg_type))
            .collect()
    }

    /// Make publishes to `destination` fail with a non-transient error.
    pub fn fail_queue(&self, destination: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(destination.to_string());
        }
    }

    pub fn heal_queue(&self, destination: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(destination);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut published) = self.published.lock() {
            published.clear();
        }
    }

    fn is_failing(&self, destination: &str) -> bool {
        self.failing
            .lock()
            .map(|f| f.contains(destination))
            .unwrap_or(false)
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn publish(&self, destination: &str, envelope: Envelope) -> Result<(), BusError> {
        if self.is_failing(destination) {
            return Err(BusError::Closed(destination.to_string()));
        }
        self.inner.publish(destination, envelope.clone()).await?;
        if let Ok(mut published) = self.published.lock() {
            published.push((destination.to_string(), envelope));
        }
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> Result<mpsc::Receiver<Envelope>, BusError> {
        self.inner.subscribe(queue).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_delivers() {
        let bus = RecordingBus::new();
        let mut rx = bus.subscribe("q").await.unwrap();

        bus.publish("q", Envelope::new("PING")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().msg_type(), Some("PING"));
        assert_eq!(bus.published_of_type("q", "PING").len(), 1);
    }

    #[tokio::test]
    async fn test_failing_queue_rejects_until_healed() {
        let bus = RecordingBus::new();
        bus.fail_queue("q");

        let err = bus.publish("q", Envelope::new("PING")).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(bus.published().is_empty());

        bus.heal_queue("q");
        bus.publish("q", Envelope::new("PING")).await.unwrap();
        assert_eq!(bus.published().len(), 1);
    }
}
