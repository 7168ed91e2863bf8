//! Timed acknowledgment aggregation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::types::{AckError, AckId, AckOutcome, RecordOutcome};
use crate::bus::Envelope;
use crate::metrics;
use crate::scoreboard::Scoreboard;

const COUNTER_KEY: &str = "ACK_COUNTER";
const COUNTER_FIELD: &str = "NEXT";

/// Legacy upper bound for the ack sequence.
pub const DEFAULT_ACK_CEILING: u64 = 999_900;

struct OpenRequest {
    expected: usize,
    deadline: Instant,
    responses: BTreeMap<String, Envelope>,
    count: watch::Sender<usize>,
}

impl OpenRequest {
    fn is_resolved(&self) -> bool {
        self.responses.len() >= self.expected
    }
}

/// Issues ack ids and gathers responses until the expected count or the deadline.
pub struct AckRegistry {
    store: Arc<dyn Scoreboard>,
    ceiling: u64,
    counter: Mutex<()>,
    requests: Mutex<HashMap<AckId, OpenRequest>>,
}

impl AckRegistry {
    pub fn new(store: Arc<dyn Scoreboard>, ceiling: u64) -> Self {
        Self {
            store,
            ceiling: ceiling.max(1),
            counter: Mutex::new(()),
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Next ack id for `ack_type`. The sequence is shared across types and wraps to 1
    /// once it passes the ceiling.
    pub fn next_ack_id(&self, ack_type: &str) -> Result<AckId, AckError> {
        let _guard = self.counter.lock().map_err(|_| AckError::Poisoned)?;
        let mut next = self.store.incr(COUNTER_KEY, COUNTER_FIELD, 1)?;
        if next < 1 || next as u64 > self.ceiling {
            self.store.set(COUNTER_KEY, COUNTER_FIELD, "1")?;
            next = 1;
        }
        Ok(AckId::new(ack_type, next as u64))
    }

    /// Open a request expecting `expected` distinct participants by `deadline`.
    pub fn register(&self, id: AckId, expected: usize, deadline: Instant) -> Result<(), AckError> {
        let mut requests = self.requests.lock().map_err(|_| AckError::Poisoned)?;
        if requests.contains_key(&id) {
            return Err(AckError::AlreadyRegistered(id));
        }
        let (count, _) = watch::channel(0);
        debug!(ack_id = %id, expected, "Registered ack request");
        requests.insert(
            id,
            OpenRequest {
                expected,
                deadline,
                responses: BTreeMap::new(),
                count,
            },
        );
        metrics::OPEN_ACK_REQUESTS.set(requests.len() as i64);
        Ok(())
    }

    /// Issue a fresh id and register it with a deadline `timeout` from now.
    pub fn open(
        &self,
        ack_type: &str,
        expected: usize,
        timeout: Duration,
    ) -> Result<AckId, AckError> {
        let id = self.next_ack_id(ack_type)?;
        self.register(id.clone(), expected, Instant::now() + timeout)?;
        Ok(id)
    }

    /// Store one participant's response.
    pub fn record(&self, id: &AckId, participant: &str, payload: Envelope) -> RecordOutcome {
        let mut requests = match self.requests.lock() {
            Ok(r) => r,
            Err(_) => return RecordOutcome::Unknown,
        };
        let Some(request) = requests.get_mut(id) else {
            warn!(ack_id = %id, participant, "Discarding response for unknown or collected ack");
            return RecordOutcome::Unknown;
        };
        if request.is_resolved() {
            debug!(ack_id = %id, participant, "Ack already resolved, ignoring response");
            return RecordOutcome::Resolved;
        }
        if request.responses.contains_key(participant) {
            debug!(ack_id = %id, participant, "Duplicate ack response ignored");
            return RecordOutcome::Duplicate;
        }

        request.responses.insert(participant.to_string(), payload);
        let count = request.responses.len();
        request.count.send_replace(count);

        if request.is_resolved() {
            RecordOutcome::Completed
        } else {
            RecordOutcome::Accepted
        }
    }

    /// Wait until the request has all expected responses or its deadline passes.
    ///
    /// The request is removed on return; later responses are reported as unknown.
    pub async fn wait_for(&self, id: &AckId) -> Result<AckOutcome, AckError> {
        let (mut rx, expected, deadline) = {
            let requests = self.requests.lock().map_err(|_| AckError::Poisoned)?;
            let request = requests
                .get(id)
                .ok_or_else(|| AckError::Unknown(id.clone()))?;
            (request.count.subscribe(), request.expected, request.deadline)
        };
        let started = Instant::now();

        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);
        loop {
            if *rx.borrow_and_update() >= expected {
                break;
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = &mut sleep => break,
            }
        }

        // Final check happens under the lock so a response racing the deadline counts.
        let request = {
            let mut requests = self.requests.lock().map_err(|_| AckError::Poisoned)?;
            let request = requests
                .remove(id)
                .ok_or_else(|| AckError::Unknown(id.clone()))?;
            metrics::OPEN_ACK_REQUESTS.set(requests.len() as i64);
            request
        };

        let complete = request.responses.len() >= request.expected;
        metrics::ACK_WAIT_SECONDS.observe(started.elapsed().as_secs_f64());
        if complete {
            metrics::ACK_REQUESTS.with_label_values(&["complete"]).inc();
            debug!(ack_id = %id, "Ack request complete");
        } else {
            metrics::ACK_REQUESTS.with_label_values(&["partial"]).inc();
            info!(
                ack_id = %id,
                received = request.responses.len(),
                expected = request.expected,
                "Ack request timed out short"
            );
        }

        Ok(AckOutcome {
            ack_id: id.clone(),
            expected: request.expected,
            responses: request.responses,
            complete,
        })
    }

    /// Drop an open request nobody will wait for. Returns whether it existed.
    pub fn cancel(&self, id: &AckId) -> bool {
        let Ok(mut requests) = self.requests.lock() else {
            return false;
        };
        let removed = requests.remove(id).is_some();
        metrics::OPEN_ACK_REQUESTS.set(requests.len() as i64);
        if removed {
            debug!(ack_id = %id, "Ack request cancelled");
        }
        removed
    }

    /// Number of requests not yet collected.
    pub fn open_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::keys;
    use crate::scoreboard::MemoryScoreboard;

    fn registry(ceiling: u64) -> Arc<AckRegistry> {
        Arc::new(AckRegistry::new(Arc::new(MemoryScoreboard::new()), ceiling))
    }

    fn ack(b: bool) -> Envelope {
        Envelope::new("FWDR_HEALTH_CHECK_ACK").with(keys::ACK_BOOL, b)
    }

    #[test]
    fn test_ids_increase() {
        let reg = registry(DEFAULT_ACK_CEILING);
        let ids: Vec<AckId> = (0..5).map(|_| reg.next_ack_id("T").unwrap()).collect();
        assert_eq!(ids[0].as_str(), "T_000001");
        assert_eq!(ids[4].as_str(), "T_000005");
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_ids_wrap_at_ceiling() {
        let reg = registry(3);
        let ids: Vec<String> = (0..5)
            .map(|_| reg.next_ack_id("T").unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["T_000001", "T_000002", "T_000003", "T_000001", "T_000002"]);
    }

    #[test]
    fn test_counter_survives_registry_restart() {
        let store: Arc<dyn Scoreboard> = Arc::new(MemoryScoreboard::new());
        let first = AckRegistry::new(Arc::clone(&store), DEFAULT_ACK_CEILING);
        first.next_ack_id("T").unwrap();
        first.next_ack_id("T").unwrap();
        let second = AckRegistry::new(store, DEFAULT_ACK_CEILING);
        assert_eq!(second.next_ack_id("T").unwrap().as_str(), "T_000003");
    }

    #[tokio::test]
    async fn test_record_outcomes() {
        let reg = registry(DEFAULT_ACK_CEILING);
        let id = AckId::from("T_000001");
        reg.register(id.clone(), 2, Instant::now() + Duration::from_secs(1))
            .unwrap();

        assert_eq!(reg.record(&id, "F1", ack(true)), RecordOutcome::Accepted);
        assert_eq!(reg.record(&id, "F1", ack(false)), RecordOutcome::Duplicate);
        assert_eq!(reg.record(&id, "F2", ack(true)), RecordOutcome::Completed);
        assert_eq!(reg.record(&id, "F3", ack(true)), RecordOutcome::Resolved);
        assert_eq!(
            reg.record(&AckId::from("nope"), "F1", ack(true)),
            RecordOutcome::Unknown
        );

        let outcome = reg.wait_for(&id).await.unwrap();
        assert!(outcome.complete);
        assert_eq!(outcome.responses.len(), 2);
        assert_eq!(reg.open_count(), 0);
        assert_eq!(reg.record(&id, "F3", ack(true)), RecordOutcome::Unknown);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let reg = registry(DEFAULT_ACK_CEILING);
        let id = AckId::from("T_000001");
        let deadline = Instant::now() + Duration::from_secs(1);
        reg.register(id.clone(), 1, deadline).unwrap();
        assert!(matches!(
            reg.register(id, 1, deadline),
            Err(AckError::AlreadyRegistered(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_exit_when_all_respond() {
        let reg = registry(DEFAULT_ACK_CEILING);
        let id = reg.open("T", 3, Duration::from_secs(4)).unwrap();
        let start = Instant::now();

        for (participant, delay_ms) in [("F1", 600u64), ("F2", 900), ("F3", 1100)] {
            let reg = Arc::clone(&reg);
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                reg.record(&id, participant, ack(true));
            });
        }

        let outcome = reg.wait_for(&id).await.unwrap();
        assert!(outcome.complete);
        assert!(outcome.all_positive());
        assert_eq!(start.elapsed(), Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_partial_responses() {
        let reg = registry(DEFAULT_ACK_CEILING);
        let id = reg.open("T", 2, Duration::from_secs(2)).unwrap();
        reg.record(&id, "F1", ack(true));
        let start = Instant::now();

        let outcome = reg.wait_for(&id).await.unwrap();
        assert!(!outcome.complete);
        assert_eq!(outcome.responses.len(), 1);
        assert_eq!(outcome.missing(["F1", "F2"]), vec!["F2"]);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_zero_expected_returns_immediately() {
        let reg = registry(DEFAULT_ACK_CEILING);
        let id = reg.open("T", 0, Duration::from_secs(60)).unwrap();
        let outcome = reg.wait_for(&id).await.unwrap();
        assert!(outcome.complete);
        assert!(outcome.responses.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_unknown() {
        let reg = registry(DEFAULT_ACK_CEILING);
        assert!(matches!(
            reg.wait_for(&AckId::from("T_000009")).await,
            Err(AckError::Unknown(_))
        ));
    }

    #[test]
    fn test_cancel_discards_request() {
        let reg = registry(DEFAULT_ACK_CEILING);
        let id = reg.open("T", 1, Duration::from_secs(5)).unwrap();
        assert_eq!(reg.open_count(), 1);

        assert!(reg.cancel(&id));
        assert!(!reg.cancel(&id));
        assert_eq!(reg.open_count(), 0);
        assert_eq!(reg.record(&id, "F1", ack(true)), RecordOutcome::Unknown);
    }
}
