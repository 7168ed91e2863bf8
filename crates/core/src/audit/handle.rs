use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::AuditEvent;

/// An event stamped with the moment it was emitted.
#[derive(Debug, Clone)]
pub struct AuditEventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
}

impl AuditEventEnvelope {
    fn now(event: AuditEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Cloneable sender side of the audit channel.
///
/// Emitting never fails the caller: a full or closed channel is logged and the
/// event is lost. Workflow progress always wins over bookkeeping.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditEventEnvelope>,
}

impl AuditHandle {
    pub fn new(tx: mpsc::Sender<AuditEventEnvelope>) -> Self {
        Self { tx }
    }

    /// Send, waiting for channel capacity.
    pub async fn emit(&self, event: AuditEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.tx.send(AuditEventEnvelope::now(event)).await {
            tracing::error!(event_type, "Failed to emit audit event: {}", e);
        }
    }

    /// Send from a thread outside the runtime.
    pub fn emit_blocking(&self, event: AuditEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.tx.blocking_send(AuditEventEnvelope::now(event)) {
            tracing::error!(event_type, "Failed to emit audit event: {}", e);
        }
    }

    /// Send only if there is room right now. Returns whether the event was queued.
    pub fn try_emit(&self, event: AuditEvent) -> bool {
        let event_type = event.event_type();
        match self.tx.try_send(AuditEventEnvelope::now(event)) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(event_type, "Failed to emit audit event: {}", e);
                false
            }
        }
    }
}
