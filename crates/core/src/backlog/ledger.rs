//! Persistent record of failed units awaiting retry.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info};

use super::policy::BacklogPolicy;
use super::types::{BacklogContext, BacklogEntry, BacklogError, BacklogStats};
use crate::metrics;
use crate::scoreboard::Scoreboard;

const INDEX_KEY: &str = "BACKLOG";
const META_KEY: &str = "BACKLOG_META";
const ENTRY_FIELD: &str = "ENTRY";

fn entry_key(id: u64) -> String {
    format!("BACKLOG:{}", id)
}

pub struct BacklogLedger {
    store: Arc<dyn Scoreboard>,
    lock: Mutex<()>,
}

impl BacklogLedger {
    pub fn new(store: Arc<dyn Scoreboard>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Record the failed units of a job. Returns `None` when there is nothing to retry.
    pub fn add(
        &self,
        orig_job_num: &str,
        failed_units: Vec<String>,
        context: BacklogContext,
    ) -> Result<Option<BacklogEntry>, BacklogError> {
        if failed_units.is_empty() {
            return Ok(None);
        }
        let _guard = self.lock.lock().map_err(|_| BacklogError::Poisoned)?;

        let id = self.store.incr(META_KEY, "NEXT_ID", 1)? as u64;
        let entry = BacklogEntry {
            id,
            orig_job_num: orig_job_num.to_string(),
            units: failed_units,
            device: context.device,
            session_id: context.session_id,
            image_id: context.image_id,
            visit_id: context.visit_id,
            priority: context.priority,
            reason: context.reason,
            added_at: Utc::now(),
            retry_count: context.attempt,
        };
        self.write(&entry)?;
        self.store.list_push(INDEX_KEY, &id.to_string())?;

        info!(
            backlog_id = id,
            job_num = orig_job_num,
            units = entry.units.len(),
            reason = %entry.reason,
            "Added backlog entry"
        );
        metrics::BACKLOG_ENTRIES
            .with_label_values(&[entry.device.as_str(), "added"])
            .inc();
        self.update_depth()?;
        Ok(Some(entry))
    }

    /// Peek at the entry `policy` would retry next.
    pub fn next(&self, policy: &dyn BacklogPolicy) -> Result<Option<BacklogEntry>, BacklogError> {
        let entries = self.entries()?;
        Ok(policy.select(&entries).cloned())
    }

    /// Remove an entry that has been handed to a retry job, returning it.
    pub fn resolve(&self, id: u64) -> Result<BacklogEntry, BacklogError> {
        let entry = self.remove(id, "resolved")?;
        debug!(backlog_id = id, "Resolved backlog entry");
        Ok(entry)
    }

    /// Remove an entry that will not be retried again.
    pub fn discard(&self, id: u64) -> Result<BacklogEntry, BacklogError> {
        let entry = self.remove(id, "dropped")?;
        debug!(backlog_id = id, "Discarded backlog entry");
        Ok(entry)
    }

    fn remove(&self, id: u64, action: &str) -> Result<BacklogEntry, BacklogError> {
        let _guard = self.lock.lock().map_err(|_| BacklogError::Poisoned)?;
        let entry = self.read(id)?.ok_or(BacklogError::NotFound(id))?;
        self.store.list_remove(INDEX_KEY, &id.to_string())?;
        self.store.delete(&entry_key(id))?;
        metrics::BACKLOG_ENTRIES
            .with_label_values(&[entry.device.as_str(), action])
            .inc();
        self.update_depth()?;
        Ok(entry)
    }

    /// Bump an entry's retry count and return the updated entry.
    pub fn mark_retry(&self, id: u64) -> Result<BacklogEntry, BacklogError> {
        let _guard = self.lock.lock().map_err(|_| BacklogError::Poisoned)?;
        let mut entry = self.read(id)?.ok_or(BacklogError::NotFound(id))?;
        entry.retry_count += 1;
        self.write(&entry)?;
        Ok(entry)
    }

    pub fn get(&self, id: u64) -> Result<Option<BacklogEntry>, BacklogError> {
        self.read(id)
    }

    /// Every entry in insertion order.
    pub fn entries(&self) -> Result<Vec<BacklogEntry>, BacklogError> {
        let ids = self.store.list_range(INDEX_KEY, 0, -1)?;
        let mut entries = Vec::with_capacity(ids.len());
        for raw in ids {
            let id: u64 = raw.parse().map_err(|_| BacklogError::Corrupt {
                id: raw.clone(),
                message: "non-numeric id in index".to_string(),
            })?;
            if let Some(entry) = self.read(id)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    pub fn stats(&self) -> Result<BacklogStats, BacklogError> {
        let entries = self.entries()?;
        Ok(BacklogStats {
            entries: entries.len(),
            units: entries.iter().map(|e| e.units.len()).sum(),
            oldest: entries.iter().map(|e| e.added_at).min(),
        })
    }

    /// How long an entry has been waiting.
    pub fn waiting_time(&self, entry: &BacklogEntry) -> chrono::Duration {
        Utc::now() - entry.added_at
    }

    pub fn len(&self) -> Result<usize, BacklogError> {
        Ok(self.store.list_range(INDEX_KEY, 0, -1)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, BacklogError> {
        Ok(self.len()? == 0)
    }

    fn read(&self, id: u64) -> Result<Option<BacklogEntry>, BacklogError> {
        match self.store.get(&entry_key(id), ENTRY_FIELD)? {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| BacklogError::Corrupt {
                    id: id.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    fn write(&self, entry: &BacklogEntry) -> Result<(), BacklogError> {
        let json = serde_json::to_string(entry).map_err(|e| BacklogError::Corrupt {
            id: entry.id.to_string(),
            message: e.to_string(),
        })?;
        self.store.set(&entry_key(entry.id), ENTRY_FIELD, &json)?;
        Ok(())
    }

    fn update_depth(&self) -> Result<(), BacklogError> {
        metrics::BACKLOG_DEPTH.set(self.len()? as i64);
        Ok(())
    }
}
