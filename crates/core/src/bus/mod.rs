//! Message bus collaborator: envelopes, typed inbound messages and transports.

mod envelope;
mod memory;
mod message;
mod publisher;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use envelope::{keys, Envelope};
pub use memory::{InMemoryBus, DEFAULT_QUEUE_CAPACITY};
pub use message::{tags, AckKind, AckMessage, InboundMessage, ProtocolError, ReplyTo, ResultList};
pub use publisher::{publish_with_retry, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("queue {0} is full")]
    QueueFull(String),

    #[error("queue {0} is closed")]
    Closed(String),

    #[error("queue {0} already has a consumer")]
    AlreadySubscribed(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl BusError {
    /// Whether retrying the same publish may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BusError::QueueFull(_) | BusError::Transport(_))
    }
}

/// Asynchronous point-to-point message transport.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Deliver an envelope to the named queue.
    async fn publish(&self, destination: &str, envelope: Envelope) -> Result<(), BusError>;

    /// Take the consuming end of a queue. Each queue has at most one consumer.
    async fn subscribe(&self, queue: &str) -> Result<mpsc::Receiver<Envelope>, BusError>;
}
