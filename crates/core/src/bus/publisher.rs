//! Publishing with bounded retries.

use std::time::Duration;

use tracing::warn;

use super::{BusError, Envelope, MessageBus};
use crate::metrics;

/// Retry schedule for outbound publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// Publish `envelope`, retrying transient failures with exponential backoff.
///
/// Returns the last error once attempts are exhausted.
pub async fn publish_with_retry(
    bus: &dyn MessageBus,
    destination: &str,
    envelope: Envelope,
    policy: RetryPolicy,
) -> Result<(), BusError> {
    let attempts = policy.attempts.max(1);
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;

    loop {
        match bus.publish(destination, envelope.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts && e.is_transient() => {
                warn!(
                    queue = destination,
                    attempt,
                    error = %e,
                    "Publish failed, retrying in {:?}",
                    backoff
                );
                metrics::PUBLISH_RETRIES.inc();
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    struct FlakyBus {
        failures: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl MessageBus for FlakyBus {
        async fn publish(&self, destination: &str, _envelope: Envelope) -> Result<(), BusError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(BusError::QueueFull(destination.to_string()));
            }
            Ok(())
        }

        async fn subscribe(&self, queue: &str) -> Result<mpsc::Receiver<Envelope>, BusError> {
            Err(BusError::AlreadySubscribed(queue.to_string()))
        }
    }

    fn flaky(failures: u32) -> FlakyBus {
        FlakyBus {
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let bus = flaky(2);
        let start = tokio::time::Instant::now();
        publish_with_retry(&bus, "q", Envelope::new("X"), RetryPolicy::default())
            .await
            .unwrap();

        assert_eq!(bus.calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms of backoff
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempts() {
        let bus = flaky(10);
        let err = publish_with_retry(&bus, "q", Envelope::new("X"), RetryPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::QueueFull(_)));
        assert_eq!(bus.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        struct ClosedBus;

        #[async_trait]
        impl MessageBus for ClosedBus {
            async fn publish(&self, d: &str, _e: Envelope) -> Result<(), BusError> {
                Err(BusError::Closed(d.to_string()))
            }
            async fn subscribe(&self, q: &str) -> Result<mpsc::Receiver<Envelope>, BusError> {
                Err(BusError::Closed(q.to_string()))
            }
        }

        let err = publish_with_retry(&ClosedBus, "q", Envelope::new("X"), RetryPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Closed(_)));
    }
}
