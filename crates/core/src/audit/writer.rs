use std::sync::Arc;

use tokio::sync::mpsc;

use super::{AuditEventEnvelope, AuditHandle, AuditRecord, AuditStore};

/// Drains the audit channel into a store. Exits once every handle is dropped.
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditEventEnvelope>,
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    pub fn new(rx: mpsc::Receiver<AuditEventEnvelope>, store: Arc<dyn AuditStore>) -> Self {
        Self { rx, store }
    }

    /// Spawn this with `tokio::spawn(writer.run())`.
    pub async fn run(mut self) {
        tracing::info!("Audit writer started");
        let mut written = 0u64;

        while let Some(envelope) = self.rx.recv().await {
            let record = AuditRecord::from_event(envelope.timestamp, envelope.event);
            match self.store.insert(&record) {
                Ok(_) => written += 1,
                Err(e) => tracing::error!(
                    event_type = %record.event_type,
                    "Failed to write audit event: {}",
                    e
                ),
            }
        }

        tracing::info!(written, "Audit writer shutting down");
    }
}

/// Wire a handle to a writer over a channel of `buffer_size` events.
pub fn create_audit_system(
    store: Arc<dyn AuditStore>,
    buffer_size: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (AuditHandle::new(tx), AuditWriter::new(rx, store))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::audit::{AuditError, AuditEvent, AuditFilter};
    use crate::device::DeviceRole;
    use crate::testing::MockAuditStore;

    fn job_created(job_num: &str) -> AuditEvent {
        AuditEvent::JobCreated {
            job_num: job_num.to_string(),
            device: DeviceRole::Ar,
            image_id: "IMG_1".to_string(),
            attempt: 0,
            units: 2,
        }
    }

    struct FailingStore;

    impl AuditStore for FailingStore {
        fn insert(&self, _record: &AuditRecord) -> Result<i64, AuditError> {
            Err(AuditError::Database("disk full".to_string()))
        }

        fn query(&self, _filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
            Ok(Vec::new())
        }

        fn count(&self, _filter: &AuditFilter) -> Result<i64, AuditError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_writer_stores_events_with_extracted_columns() {
        let store = Arc::new(MockAuditStore::new());
        let (handle, writer) = create_audit_system(store.clone(), 10);
        let writer_task = tokio::spawn(writer.run());

        handle.emit(job_created("3_1")).await;
        drop(handle);
        writer_task.await.unwrap();

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].job_num.as_deref(), Some("3_1"));
        assert_eq!(records[0].device.as_deref(), Some("AR"));
    }

    #[tokio::test]
    async fn test_writer_continues_on_insert_failure() {
        let (handle, writer) = create_audit_system(Arc::new(FailingStore), 10);
        let writer_task = tokio::spawn(writer.run());

        handle.emit(job_created("3_1")).await;
        handle.emit(job_created("3_2")).await;
        drop(handle);

        tokio::time::timeout(Duration::from_secs(1), writer_task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_writer_waits_for_all_handles() {
        let store = Arc::new(MockAuditStore::new());
        let (main_handle, writer) = create_audit_system(store.clone(), 10);
        let orchestrator_handle = main_handle.clone();
        let writer_task = tokio::spawn(writer.run());

        orchestrator_handle.emit(job_created("3_1")).await;
        main_handle
            .emit(AuditEvent::ServiceStopped {
                reason: "graceful_shutdown".to_string(),
            })
            .await;
        drop(main_handle);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer_task.is_finished());

        drop(orchestrator_handle);
        tokio::time::timeout(Duration::from_secs(1), writer_task)
            .await
            .unwrap()
            .unwrap();

        let types: Vec<String> = store.records().into_iter().map(|r| r.event_type).collect();
        assert_eq!(types, vec!["job_created", "service_stopped"]);
    }
}
