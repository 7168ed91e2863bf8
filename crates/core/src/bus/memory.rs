//! In-process message bus over tokio channels.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use super::envelope::Envelope;
use super::{BusError, MessageBus};

/// Default per-queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

struct Queue {
    sender: mpsc::Sender<Envelope>,
    receiver: Option<mpsc::Receiver<Envelope>>,
}

/// Named bounded queues with a single consumer each.
///
/// Queues are created on first use by either side, so messages published before the
/// consumer subscribes are buffered up to the queue capacity.
pub struct InMemoryBus {
    capacity: usize,
    queues: Mutex<HashMap<String, Queue>>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl InMemoryBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn with_queue<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Queue) -> Result<T, BusError>,
    ) -> Result<T, BusError> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|e| BusError::Transport(format!("lock poisoned: {}", e)))?;
        let queue = queues.entry(name.to_string()).or_insert_with(|| {
            let (sender, receiver) = mpsc::channel(self.capacity);
            Queue {
                sender,
                receiver: Some(receiver),
            }
        });
        f(queue)
    }

    /// Names of every queue seen so far.
    pub fn queue_names(&self) -> Vec<String> {
        self.queues
            .lock()
            .map(|q| {
                let mut names: Vec<String> = q.keys().cloned().collect();
                names.sort();
                names
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, destination: &str, envelope: Envelope) -> Result<(), BusError> {
        let sender = self.with_queue(destination, |q| Ok(q.sender.clone()))?;
        trace!(queue = destination, msg_type = ?envelope.msg_type(), "publish");
        sender.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BusError::QueueFull(destination.to_string()),
            mpsc::error::TrySendError::Closed(_) => BusError::Closed(destination.to_string()),
        })
    }

    async fn subscribe(&self, queue: &str) -> Result<mpsc::Receiver<Envelope>, BusError> {
        self.with_queue(queue, |q| {
            q.receiver
                .take()
                .ok_or_else(|| BusError::AlreadySubscribed(queue.to_string()))
        })
    }
}
