//! Job records and per-session numbering.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::types::{CreateJobRequest, Job, JobError, JobState};
use crate::backlog::ResultCode;
use crate::metrics;
use crate::partition::WorkAssignment;
use crate::scoreboard::Scoreboard;

const STATE_KEY: &str = "DMCS_STATE";
const RECORD_FIELD: &str = "RECORD";

fn job_key(job_num: &str) -> String {
    format!("JOB:{}", job_num)
}

fn session_key(session_id: &str) -> String {
    format!("SESSION:{}", session_id)
}

fn session_jobs_key(session_id: &str) -> String {
    format!("SESSION_JOBS:{}", session_id)
}

fn image_jobs_key(image_id: &str) -> String {
    format!("IMAGE_JOBS:{}", image_id)
}

/// The visit most recently announced with `NEXT_VISIT`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitInfo {
    pub visit_id: String,
    pub bore_sight: Option<String>,
}

/// Records jobs in the scoreboard. State changes are recorded, not validated.
pub struct JobLedger {
    store: Arc<dyn Scoreboard>,
    lock: Mutex<()>,
}

impl JobLedger {
    pub fn new(store: Arc<dyn Scoreboard>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Make `session_id` current. Job numbering for a session continues where it
    /// left off if the session is restarted.
    pub fn start_session(&self, session_id: &str) -> Result<(), JobError> {
        self.store.set(STATE_KEY, "SESSION_ID", session_id)?;
        self.store
            .set(&session_key(session_id), "STARTED_AT", &Utc::now().to_rfc3339())?;
        info!(session_id, "Session started");
        Ok(())
    }

    pub fn current_session(&self) -> Result<Option<String>, JobError> {
        Ok(self.store.get(STATE_KEY, "SESSION_ID")?)
    }

    pub fn set_visit(&self, visit_id: &str, bore_sight: Option<&str>) -> Result<(), JobError> {
        self.store.set(STATE_KEY, "VISIT_ID", visit_id)?;
        self.store
            .set(STATE_KEY, "BORE_SIGHT", bore_sight.unwrap_or(""))?;
        debug!(visit_id, "Visit set");
        Ok(())
    }

    pub fn current_visit(&self) -> Result<Option<VisitInfo>, JobError> {
        let state = self.store.get_all(STATE_KEY)?;
        Ok(state.get("VISIT_ID").map(|visit_id| VisitInfo {
            visit_id: visit_id.clone(),
            bore_sight: state
                .get("BORE_SIGHT")
                .filter(|b| !b.is_empty())
                .cloned(),
        }))
    }

    /// Create a DISPATCHED job and return its number (`<session>_<sequence>`).
    pub fn new_job(&self, request: CreateJobRequest) -> Result<String, JobError> {
        let sequence = self
            .store
            .incr(&session_key(&request.session_id), "JOB_SEQ", 1)?;
        let job_num = format!("{}_{}", request.session_id, sequence);
        let now = Utc::now();

        let job = Job {
            job_num: job_num.clone(),
            session_id: request.session_id,
            image_id: request.image_id,
            visit_id: request.visit_id,
            device: request.device,
            units: request.units,
            assignment: request.assignment,
            state: JobState::Dispatched,
            results: BTreeMap::new(),
            attempt: request.attempt,
            created_at: now,
            updated_at: now,
        };
        self.write(&job)?;
        self.store
            .list_push(&session_jobs_key(&job.session_id), &job_num)?;
        self.store.list_push(&image_jobs_key(&job.image_id), &job_num)?;

        info!(
            job_num = %job_num,
            device = %job.device,
            image_id = %job.image_id,
            attempt = job.attempt,
            "Job created"
        );
        metrics::JOBS_CREATED
            .with_label_values(&[job.device.as_str()])
            .inc();
        Ok(job_num)
    }

    pub fn get(&self, job_num: &str) -> Result<Option<Job>, JobError> {
        match self.store.get(&job_key(job_num), RECORD_FIELD)? {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| JobError::Corrupt {
                    job_num: job_num.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    pub fn set_state(&self, job_num: &str, state: JobState) -> Result<Job, JobError> {
        let job = self.update(job_num, |job| job.state = state)?;
        debug!(job_num, state = %state, "Job state set");
        metrics::JOB_STATES.with_label_values(&[state.as_str()]).inc();
        Ok(job)
    }

    /// Merge per-unit results into the job.
    pub fn set_results(
        &self,
        job_num: &str,
        results: BTreeMap<String, ResultCode>,
    ) -> Result<Job, JobError> {
        self.update(job_num, |job| job.results.extend(results))
    }

    pub fn set_assignment(
        &self,
        job_num: &str,
        assignment: WorkAssignment,
    ) -> Result<Job, JobError> {
        self.update(job_num, |job| job.assignment = assignment)
    }

    /// Jobs created for an image, in creation order.
    pub fn jobs_for_image(&self, image_id: &str) -> Result<Vec<Job>, JobError> {
        self.load_all(&image_jobs_key(image_id))
    }

    /// Jobs created in a session, in creation order.
    pub fn jobs_for_session(&self, session_id: &str) -> Result<Vec<Job>, JobError> {
        self.load_all(&session_jobs_key(session_id))
    }

    /// Job counts by state for a session.
    pub fn state_counts(&self, session_id: &str) -> Result<BTreeMap<JobState, usize>, JobError> {
        let mut counts = BTreeMap::new();
        for job in self.jobs_for_session(session_id)? {
            *counts.entry(job.state).or_insert(0) += 1;
        }
        Ok(counts)
    }

    fn load_all(&self, index_key: &str) -> Result<Vec<Job>, JobError> {
        let mut jobs = Vec::new();
        for job_num in self.store.list_range(index_key, 0, -1)? {
            if let Some(job) = self.get(&job_num)? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    fn update(&self, job_num: &str, f: impl FnOnce(&mut Job)) -> Result<Job, JobError> {
        let _guard = self.lock.lock().map_err(|_| JobError::Poisoned)?;
        let mut job = self
            .get(job_num)?
            .ok_or_else(|| JobError::NotFound(job_num.to_string()))?;
        f(&mut job);
        job.updated_at = Utc::now();
        self.write(&job)?;
        Ok(job)
    }

    fn write(&self, job: &Job) -> Result<(), JobError> {
        let json = serde_json::to_string(job).map_err(|e| JobError::Corrupt {
            job_num: job.job_num.clone(),
            message: e.to_string(),
        })?;
        self.store.set(&job_key(&job.job_num), RECORD_FIELD, &json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceRole;
    use crate::scoreboard::MemoryScoreboard;

    fn ledger() -> JobLedger {
        JobLedger::new(Arc::new(MemoryScoreboard::new()))
    }

    #[test]
    fn test_job_numbers_increase_within_session() {
        let ledger = ledger();
        let a = ledger
            .new_job(CreateJobRequest::new("7", "IMG_1", DeviceRole::Ar))
            .unwrap();
        let b = ledger
            .new_job(CreateJobRequest::new("7", "IMG_1", DeviceRole::Pp))
            .unwrap();
        let c = ledger
            .new_job(CreateJobRequest::new("8", "IMG_2", DeviceRole::Ar))
            .unwrap();
        assert_eq!(a, "7_1");
        assert_eq!(b, "7_2");
        assert_eq!(c, "8_1");
    }

    #[test]
    fn test_new_job_is_dispatched() {
        let ledger = ledger();
        let num = ledger
            .new_job(
                CreateJobRequest::new("1", "IMG", DeviceRole::At)
                    .with_visit(Some("V9".into()))
                    .with_attempt(2),
            )
            .unwrap();
        let job = ledger.get(&num).unwrap().unwrap();
        assert_eq!(job.state, JobState::Dispatched);
        assert_eq!(job.visit_id.as_deref(), Some("V9"));
        assert_eq!(job.attempt, 2);
        assert!(job.results.is_empty());
    }

    #[test]
    fn test_state_and_results() {
        let ledger = ledger();
        let num = ledger
            .new_job(CreateJobRequest::new("1", "IMG", DeviceRole::Ar))
            .unwrap();
        ledger.set_state(&num, JobState::TakeImages).unwrap();

        let mut results = BTreeMap::new();
        results.insert("R01/S00".to_string(), ResultCode::Ok);
        results.insert("R01/S01".to_string(), ResultCode::NoFile);
        let job = ledger.set_results(&num, results).unwrap();

        assert_eq!(job.state, JobState::TakeImages);
        assert_eq!(job.failed_units(), vec!["R01/S01"]);
        assert!(job.updated_at >= job.created_at);
    }

    #[test]
    fn test_unknown_job() {
        let ledger = ledger();
        assert!(ledger.get("1_99").unwrap().is_none());
        assert!(matches!(
            ledger.set_state("1_99", JobState::Failed),
            Err(JobError::NotFound(_))
        ));
    }

    #[test]
    fn test_indexes() {
        let ledger = ledger();
        ledger
            .new_job(CreateJobRequest::new("1", "IMG_A", DeviceRole::Ar))
            .unwrap();
        ledger
            .new_job(CreateJobRequest::new("1", "IMG_B", DeviceRole::Ar))
            .unwrap();
        let num = ledger
            .new_job(CreateJobRequest::new("1", "IMG_A", DeviceRole::Pp))
            .unwrap();
        ledger.set_state(&num, JobState::Refused).unwrap();

        let image_a: Vec<String> = ledger
            .jobs_for_image("IMG_A")
            .unwrap()
            .into_iter()
            .map(|j| j.job_num)
            .collect();
        assert_eq!(image_a, vec!["1_1", "1_3"]);
        assert_eq!(ledger.jobs_for_session("1").unwrap().len(), 3);

        let counts = ledger.state_counts("1").unwrap();
        assert_eq!(counts[&JobState::Dispatched], 2);
        assert_eq!(counts[&JobState::Refused], 1);
    }

    #[test]
    fn test_session_and_visit() {
        let ledger = ledger();
        assert_eq!(ledger.current_session().unwrap(), None);
        assert_eq!(ledger.current_visit().unwrap(), None);

        ledger.start_session("12").unwrap();
        ledger.set_visit("V_1", Some("ra=1,dec=2")).unwrap();
        assert_eq!(ledger.current_session().unwrap().as_deref(), Some("12"));
        assert_eq!(
            ledger.current_visit().unwrap(),
            Some(VisitInfo {
                visit_id: "V_1".into(),
                bore_sight: Some("ra=1,dec=2".into())
            })
        );

        ledger.set_visit("V_2", None).unwrap();
        assert_eq!(ledger.current_visit().unwrap().unwrap().bore_sight, None);
    }
}
