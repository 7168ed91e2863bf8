//! The image workflow: health check, transfer dispatch, readout and backlog retry.

use std::collections::{BTreeMap, BTreeSet};

use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::ack::{AckId, AckOutcome};
use crate::audit::AuditEvent;
use crate::backlog::{BacklogContext, BacklogReason, ResultCode};
use crate::bus::{keys, tags, AckKind, Envelope, ReplyTo, ResultList};
use crate::forwarder::ForwarderState;
use crate::job::{CreateJobRequest, Job, JobState};
use crate::partition::{partition, rafts_from_unit_ids, RaftUnit, WorkAssignment};

use super::runner::{reply_envelope, Orchestrator};
use super::types::{OrchestratorError, RetryOutcome, WorkflowState};

impl Orchestrator {
    /// Ping every forwarder and record who answered. Returns the responders.
    ///
    /// Forwarders that are busy with another job still answer; only idle ones are
    /// flagged HEALTH_CHECK for the duration of the round.
    pub async fn health_check(&self) -> Result<Vec<String>, OrchestratorError> {
        let roster = self.forwarders.all()?;
        if roster.is_empty() {
            return Ok(Vec::new());
        }
        let checked: Vec<String> = roster.iter().map(|r| r.name.clone()).collect();
        let flagged = self.forwarders.swap_states(
            &checked,
            ForwarderState::Idle,
            ForwarderState::HealthCheck,
        )?;

        let ack_id = self.acks.open(
            AckKind::HealthCheck.tag(),
            checked.len(),
            self.config.health_check_timeout(),
        )?;
        for record in &roster {
            let envelope = Envelope::new(tags::FWDR_HEALTH_CHECK)
                .with(keys::ACK_ID, ack_id.as_str())
                .with(keys::REPLY_QUEUE, self.config.ack_queue.as_str());
            if let Err(e) = self.publish(&record.consume_queue, envelope).await {
                warn!(forwarder = %record.name, "Health check not delivered: {}", e);
            }
        }

        let outcome = self.acks.wait_for(&ack_id).await?;
        let responders = outcome.positive();
        self.forwarders.record_health_check(&checked, &responders)?;
        // A dispatch may have claimed a flagged forwarder during the round.
        self.forwarders
            .swap_states(&flagged, ForwarderState::HealthCheck, ForwarderState::Idle)?;
        if !outcome.complete {
            let expected: Vec<&str> = checked.iter().map(String::as_str).collect();
            self.ack_timed_out(&outcome, None, &expected).await;
        }

        info!(
            checked = checked.len(),
            healthy = responders.len(),
            "Health check finished"
        );
        Ok(responders)
    }

    /// Create one job per enabled device for `image_id` and dispatch them
    /// concurrently. Every job is answered with its own START_INTEGRATION_ACK.
    pub async fn start_integration(
        &self,
        image_id: &str,
        reply: &ReplyTo,
    ) -> Result<Vec<Job>, OrchestratorError> {
        let Some(session_id) = self.jobs.current_session()? else {
            self.reject(tags::START_INTEGRATION, reply, image_id, "no session has been started")
                .await;
            return Ok(Vec::new());
        };
        let devices = self.devices.enabled_devices();
        if devices.is_empty() {
            self.reject(tags::START_INTEGRATION, reply, image_id, "no device is enabled")
                .await;
            return Ok(Vec::new());
        }
        let visit_id = self.jobs.current_visit()?.map(|v| v.visit_id);
        self.set_workflow(image_id, WorkflowState::NewVisit);

        let units: Vec<String> = self.layout.iter().flat_map(RaftUnit::unit_ids).collect();
        let mut pending = Vec::with_capacity(devices.len());
        for device in &devices {
            let request = CreateJobRequest::new(&session_id, image_id, device.role)
                .with_visit(visit_id.clone())
                .with_units(units.clone());
            let job_num = match self.jobs.new_job(request) {
                Ok(job_num) => job_num,
                Err(e) => {
                    error!(image_id, device = %device.role, "Job not created: {}", e);
                    let envelope = reply_envelope(tags::START_INTEGRATION, reply, false)
                        .with(keys::DEVICE, device.role.as_str())
                        .with(keys::IMAGE_ID, image_id)
                        .with(keys::ACK_STATEMENT, format!("job not created: {}", e));
                    self.send_reply(reply, envelope).await;
                    continue;
                }
            };
            self.emit(AuditEvent::JobCreated {
                job_num: job_num.clone(),
                device: device.role,
                image_id: image_id.to_string(),
                attempt: 0,
                units: units.len(),
            })
            .await;
            pending.push((job_num, device.forwarders.clone()));
        }
        if pending.is_empty() {
            self.set_workflow(image_id, WorkflowState::PartialFailure);
            return Ok(Vec::new());
        }

        if let Err(e) = self.health_check().await {
            warn!("Health check failed, dispatching on last known health: {}", e);
        }
        self.set_workflow(image_id, WorkflowState::IntegrationDispatched);

        let layout = self.layout.as_ref().clone();
        let dispatched = join_all(
            pending
                .iter()
                .map(|(job_num, candidates)| self.dispatch_job(job_num, candidates, layout.clone())),
        )
        .await;

        let mut jobs = Vec::with_capacity(dispatched.len());
        for ((job_num, _), result) in pending.iter().zip(dispatched) {
            let (job, statement) = match result {
                Ok(job) => (job, None),
                Err(e) => {
                    error!(job_num = %job_num, "Dispatch failed: {}", e);
                    let Some(job) = self.jobs.get(job_num).ok().flatten() else {
                        continue;
                    };
                    let job = if job.state.is_terminal() {
                        job
                    } else {
                        self.refuse(&job).await.unwrap_or(job)
                    };
                    if let Err(e) = self.forwarders.swap_states(
                        &job.forwarders(),
                        ForwarderState::Busy,
                        ForwarderState::Idle,
                    ) {
                        warn!(job_num = %job_num, "Forwarders not released: {}", e);
                    }
                    (job, Some(format!("dispatch failed: {}", e)))
                }
            };
            let mut envelope =
                reply_envelope(tags::START_INTEGRATION, reply, job.state == JobState::TakeImages)
                    .with(keys::JOB_NUM, job.job_num.as_str())
                    .with(keys::DEVICE, job.device.as_str())
                    .with(keys::IMAGE_ID, image_id);
            if let Some(statement) = statement {
                envelope.insert(keys::ACK_STATEMENT, statement);
            }
            self.send_reply(reply, envelope).await;
            jobs.push(job);
        }

        if jobs.iter().all(|j| j.state == JobState::Refused) {
            self.set_workflow(image_id, WorkflowState::PartialFailure);
        }
        Ok(jobs)
    }

    /// Partition `rafts` over the healthy subset of `candidates`, send the transfer
    /// parameters and wait for every assigned forwarder to accept them.
    ///
    /// An empty candidate list means any forwarder in the roster. A job that cannot be
    /// placed or is not fully accepted is REFUSED and its units go to the backlog.
    pub async fn dispatch_job(
        &self,
        job_num: &str,
        candidates: &[String],
        rafts: Vec<RaftUnit>,
    ) -> Result<Job, OrchestratorError> {
        let job = self
            .jobs
            .get(job_num)?
            .ok_or_else(|| crate::job::JobError::NotFound(job_num.to_string()))?;

        let healthy = self.forwarders.healthy()?;
        let available: Vec<String> = if candidates.is_empty() {
            healthy
        } else {
            candidates
                .iter()
                .filter(|name| healthy.contains(name))
                .cloned()
                .collect()
        };
        if available.is_empty() {
            warn!(job_num, device = %job.device, "No healthy forwarder available");
            return self.refuse(&job).await;
        }

        let assignment = partition(&rafts, &available, self.config.remainder_policy)?;
        let job = self.jobs.set_assignment(job_num, assignment)?;
        let workers = job.forwarders();
        self.forwarders.set_states(&workers, ForwarderState::Busy)?;

        let ack_id = self.acks.open(
            AckKind::XferParams.tag(),
            workers.len(),
            self.config.xfer_params_timeout(),
        )?;
        let delivered = self.send_xfer_params(&job, &ack_id).await;
        if let Err(e) = delivered {
            warn!(job_num, "Transfer parameters not delivered: {}", e);
            self.acks.cancel(&ack_id);
            self.forwarders.set_states(&workers, ForwarderState::Idle)?;
            return self.refuse(&job).await;
        }

        let outcome = self.acks.wait_for(&ack_id).await?;
        if outcome.all_positive() {
            self.forwarders
                .set_states(&workers, ForwarderState::AwaitingReadout)?;
            return self.transition(&job, JobState::TakeImages).await;
        }

        if !outcome.complete {
            let expected: Vec<&str> = workers.iter().map(String::as_str).collect();
            self.ack_timed_out(&outcome, Some(job_num), &expected).await;
        }
        warn!(
            job_num,
            refused_by = ?outcome.negative(),
            "Transfer parameters not accepted"
        );
        self.forwarders.set_states(&workers, ForwarderState::Idle)?;
        self.refuse(&job).await
    }

    async fn send_xfer_params(&self, job: &Job, ack_id: &AckId) -> Result<(), OrchestratorError> {
        for share in &job.assignment.shares {
            let queue = self.forwarders.consume_queue(&share.worker)?;
            let envelope = self
                .job_envelope(tags::FWDR_XFER_PARAMS, job, ack_id)
                .with(keys::XFER_PARAMS, xfer_params(&share.units));
            self.publish(&queue, envelope).await?;
        }
        Ok(())
    }

    /// Read out every job of `image_id` that is taking images, then answer each with
    /// a READOUT_ACK carrying its per-CCD results.
    pub async fn end_readout(
        &self,
        image_id: &str,
        reply: &ReplyTo,
    ) -> Result<Vec<Job>, OrchestratorError> {
        let ready: Vec<Job> = self
            .jobs
            .jobs_for_image(image_id)?
            .into_iter()
            .filter(|j| j.state == JobState::TakeImages)
            .collect();
        if ready.is_empty() {
            self.reject(tags::READOUT_ACK, reply, image_id, "no job is awaiting readout")
                .await;
            return Ok(Vec::new());
        }

        self.set_workflow(image_id, WorkflowState::ReadoutDispatched);
        let finished = join_all(ready.iter().map(|job| self.readout_job(job.clone()))).await;
        self.set_workflow(image_id, WorkflowState::ResultsCollected);

        let mut settled = Vec::with_capacity(finished.len());
        for (job, result) in ready.iter().zip(finished) {
            match result {
                Ok(job) => settled.push((job, None)),
                Err(e) => {
                    error!(image_id, job_num = %job.job_num, "Readout failed: {}", e);
                    let job = self.abandon_readout(job).await;
                    settled.push((job, Some(format!("readout failed: {}", e))));
                }
            }
        }

        let all_complete = self
            .jobs
            .jobs_for_image(image_id)?
            .iter()
            .all(|j| j.state == JobState::Complete);
        self.set_workflow(
            image_id,
            if all_complete {
                WorkflowState::Complete
            } else {
                WorkflowState::PartialFailure
            },
        );

        let mut jobs = Vec::with_capacity(settled.len());
        for (job, statement) in settled {
            let mut envelope = Envelope::new(tags::READOUT_ACK)
                .with(keys::ACK_BOOL, job.state == JobState::Complete)
                .with(keys::COMPONENT, super::runner::COMPONENT_NAME)
                .with(keys::JOB_NUM, job.job_num.as_str())
                .with(keys::DEVICE, job.device.as_str())
                .with(keys::IMAGE_ID, image_id)
                .with(keys::RESULT_LIST, results_value(&job));
            if let Some(ref ack_id) = reply.ack_id {
                envelope.insert(keys::ACK_ID, ack_id.clone());
            }
            if let Some(statement) = statement {
                envelope.insert(keys::ACK_STATEMENT, statement);
            }
            self.send_reply(reply, envelope).await;
            jobs.push(job);
        }
        Ok(jobs)
    }

    /// Settle a job whose readout broke off: FAILED, the units without a good result
    /// on the backlog, forwarders back to IDLE. Each step is best effort.
    async fn abandon_readout(&self, job: &Job) -> Job {
        let current = self
            .jobs
            .get(&job.job_num)
            .ok()
            .flatten()
            .unwrap_or_else(|| job.clone());

        let settled = if current.state.is_terminal() {
            current
        } else {
            let unsettled: Vec<String> = current
                .units
                .iter()
                .filter(|unit| current.results.get(*unit).is_none_or(ResultCode::is_failure))
                .cloned()
                .collect();
            match self.transition(&current, JobState::Failed).await {
                Ok(failed) => {
                    if let Err(e) = self
                        .backlog_units(&failed, unsettled, BacklogReason::TransferFailed)
                        .await
                    {
                        error!(job_num = %failed.job_num, "Units not backlogged: {}", e);
                    }
                    failed
                }
                Err(e) => {
                    error!(job_num = %current.job_num, "Job not marked failed: {}", e);
                    Job {
                        state: JobState::Failed,
                        ..current
                    }
                }
            }
        };

        if let Err(e) = self
            .forwarders
            .set_states(&settled.forwarders(), ForwarderState::Idle)
        {
            warn!(job_num = %settled.job_num, "Forwarders not released: {}", e);
        }
        settled
    }

    /// Collect one job's transfer results from its forwarders, optionally confirm them
    /// with the archive, then settle the job and backlog what failed.
    pub async fn readout_job(&self, job: Job) -> Result<Job, OrchestratorError> {
        let job = self.transition(&job, JobState::Readout).await?;
        let workers = job.forwarders();

        let ack_id = self.acks.open(
            AckKind::EndReadout.tag(),
            workers.len(),
            self.config.readout_timeout(),
        )?;
        for worker in &workers {
            let envelope = self.job_envelope(tags::FWDR_END_READOUT, &job, &ack_id);
            let delivered = match self.forwarders.consume_queue(worker) {
                Ok(queue) => self.publish(&queue, envelope).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = delivered {
                warn!(job_num = %job.job_num, forwarder = %worker, "End readout not delivered: {}", e);
            }
        }

        let outcome = self.acks.wait_for(&ack_id).await?;
        if !outcome.complete {
            let expected: Vec<&str> = workers.iter().map(String::as_str).collect();
            self.ack_timed_out(&outcome, Some(&job.job_num), &expected)
                .await;
        }

        let mut results = collect_results(&job.assignment, &outcome);
        if self.archive.is_some() {
            let reported = merged_result_list(&outcome, &results);
            self.verify_with_archive(&job, reported, &mut results).await?;
        }
        let job = self.jobs.set_results(&job.job_num, results)?;

        let failed = job.failed_units();
        let job = if failed.is_empty() {
            self.transition(&job, JobState::Complete).await?
        } else {
            warn!(job_num = %job.job_num, failed = failed.len(), "Readout finished with failures");
            let job = self.transition(&job, JobState::Failed).await?;
            self.backlog_units(&job, failed, BacklogReason::TransferFailed)
                .await?;
            job
        };

        self.forwarders.set_states(&workers, ForwarderState::Idle)?;
        Ok(job)
    }

    /// Ask the archive controller to confirm the units the forwarders reported as
    /// transferred. Its codes replace the forwarders'; no answer leaves those units
    /// unacknowledged.
    async fn verify_with_archive(
        &self,
        job: &Job,
        reported: ResultList,
        results: &mut BTreeMap<String, ResultCode>,
    ) -> Result<(), OrchestratorError> {
        let Some(ref archive) = self.archive else {
            return Ok(());
        };
        if reported.ccd_list.is_empty() {
            return Ok(());
        }

        let timeout = std::time::Duration::from_millis(archive.timeout_ms);
        let ack_id = self.acks.open(AckKind::ItemsXferd.tag(), 1, timeout)?;
        let envelope = self
            .job_envelope(tags::ITEMS_XFERD, job, &ack_id)
            .with(keys::RESULT_LIST, reported.to_value());

        let response = match self.publish(&archive.consume_queue, envelope).await {
            Ok(()) => {
                let outcome = self.acks.wait_for(&ack_id).await?;
                if !outcome.complete {
                    self.ack_timed_out(&outcome, Some(&job.job_num), &[archive.name.as_str()])
                        .await;
                }
                outcome.responses.into_values().next()
            }
            Err(e) => {
                warn!(job_num = %job.job_num, "Archive verification not delivered: {}", e);
                self.acks.cancel(&ack_id);
                None
            }
        };

        let Some(response) = response else {
            for unit in &reported.ccd_list {
                results.insert(unit.clone(), ResultCode::Unacknowledged);
            }
            return Ok(());
        };
        match ResultList::from_envelope(&response) {
            Ok(Some(list)) => {
                for (unit, code) in list.codes() {
                    if results.contains_key(unit) {
                        results.insert(unit.to_string(), ResultCode::classify(code));
                    }
                }
            }
            Ok(None) => debug!(job_num = %job.job_num, "Archive returned no result list"),
            Err(e) => warn!(job_num = %job.job_num, "Ignoring archive result list: {}", e),
        }
        Ok(())
    }

    /// Pass header metadata on to the forwarders still working on `image_id`.
    pub async fn header_ready(
        &self,
        image_id: &str,
        header: Option<Value>,
    ) -> Result<(), OrchestratorError> {
        let header = header.unwrap_or(Value::Null);
        let mut sent = BTreeSet::new();
        for job in self.jobs.jobs_for_image(image_id)? {
            if job.state.is_terminal() {
                continue;
            }
            for worker in job.forwarders() {
                if !sent.insert(worker.clone()) {
                    continue;
                }
                let queue = self.forwarders.consume_queue(&worker)?;
                let envelope = Envelope::new(tags::FWDR_HEADER_READY)
                    .with(keys::IMAGE_ID, image_id)
                    .with(keys::JOB_NUM, job.job_num.as_str())
                    .with(keys::HEADER_INFO, header.clone());
                if let Err(e) = self.publish(&queue, envelope).await {
                    warn!(forwarder = %worker, "Header notice not delivered: {}", e);
                }
            }
        }
        debug!(image_id, forwarders = sent.len(), "Header ready forwarded");
        Ok(())
    }

    /// Retry the backlog entry the configured policy selects.
    ///
    /// Entries that have used up their retries are dropped instead. The retry runs as a
    /// fresh job through dispatch and readout without waiting for OCS events.
    pub async fn retry_backlog(&self) -> Result<Option<RetryOutcome>, OrchestratorError> {
        let policy = self.config.backlog_policy.policy();
        let Some(entry) = self.backlog.next(policy.as_ref())? else {
            return Ok(None);
        };

        if entry.retry_count >= self.config.max_backlog_retries {
            self.backlog.discard(entry.id)?;
            error!(
                backlog_id = entry.id,
                job_num = %entry.orig_job_num,
                units = ?entry.units,
                retry_count = entry.retry_count,
                "Backlog entry exhausted its retries, dropping"
            );
            self.emit(AuditEvent::BacklogDropped {
                entry_id: entry.id,
                job_num: entry.orig_job_num.clone(),
                device: entry.device,
                retry_count: entry.retry_count,
            })
            .await;
            return Ok(Some(RetryOutcome::Dropped {
                entry_id: entry.id,
                device: entry.device,
                retry_count: entry.retry_count,
            }));
        }

        let entry = self.backlog.mark_retry(entry.id)?;
        let request = CreateJobRequest::new(&entry.session_id, &entry.image_id, entry.device)
            .with_visit(entry.visit_id.clone())
            .with_units(entry.units.clone())
            .with_attempt(entry.retry_count);
        let job_num = self.jobs.new_job(request)?;
        self.emit(AuditEvent::JobCreated {
            job_num: job_num.clone(),
            device: entry.device,
            image_id: entry.image_id.clone(),
            attempt: entry.retry_count,
            units: entry.units.len(),
        })
        .await;

        self.backlog.resolve(entry.id)?;
        self.emit(AuditEvent::BacklogResolved {
            entry_id: entry.id,
            job_num: entry.orig_job_num.clone(),
            device: entry.device,
            retry_job_num: job_num.clone(),
        })
        .await;
        info!(
            backlog_id = entry.id,
            retry_job = %job_num,
            attempt = entry.retry_count,
            "Retrying backlog entry"
        );

        if let Err(e) = self.health_check().await {
            warn!("Health check failed, dispatching on last known health: {}", e);
        }
        let candidates = self
            .devices
            .device(entry.device)
            .map(|d| d.forwarders)
            .unwrap_or_default();
        let mut job = self
            .dispatch_job(&job_num, &candidates, rafts_from_unit_ids(&entry.units))
            .await?;
        if job.state == JobState::TakeImages {
            job = self.readout_job(job).await?;
        }

        Ok(Some(RetryOutcome::Retried {
            entry_id: entry.id,
            job,
        }))
    }

    /// Move a job to `to` and audit the change.
    async fn transition(&self, job: &Job, to: JobState) -> Result<Job, OrchestratorError> {
        let updated = self.jobs.set_state(&job.job_num, to)?;
        self.emit(AuditEvent::JobStateChanged {
            job_num: job.job_num.clone(),
            image_id: job.image_id.clone(),
            device: job.device,
            from_state: job.state,
            to_state: to,
        })
        .await;
        Ok(updated)
    }

    /// REFUSED, with every unit of the job on the backlog.
    async fn refuse(&self, job: &Job) -> Result<Job, OrchestratorError> {
        let refused = self.transition(job, JobState::Refused).await?;
        self.backlog_units(&refused, refused.units.clone(), BacklogReason::Refused)
            .await?;
        Ok(refused)
    }

    async fn backlog_units(
        &self,
        job: &Job,
        units: Vec<String>,
        reason: BacklogReason,
    ) -> Result<(), OrchestratorError> {
        let context = BacklogContext {
            device: job.device,
            session_id: job.session_id.clone(),
            image_id: job.image_id.clone(),
            visit_id: job.visit_id.clone(),
            priority: self.config.backlog_priority,
            attempt: job.attempt,
            reason,
        };
        if let Some(entry) = self.backlog.add(&job.job_num, units, context)? {
            self.emit(AuditEvent::BacklogAdded {
                entry_id: entry.id,
                job_num: job.job_num.clone(),
                image_id: job.image_id.clone(),
                device: job.device,
                units: entry.units,
                reason,
            })
            .await;
        }
        Ok(())
    }

    async fn ack_timed_out(&self, outcome: &AckOutcome, job_num: Option<&str>, expected: &[&str]) {
        let missing = outcome.missing(expected.iter().copied());
        warn!(
            ack_id = %outcome.ack_id,
            received = outcome.responses.len(),
            expected = outcome.expected,
            ?missing,
            "Ack deadline passed"
        );
        self.emit(AuditEvent::AckTimedOut {
            ack_id: outcome.ack_id.to_string(),
            job_num: job_num.map(str::to_string),
            expected: outcome.expected,
            received: outcome.responses.len(),
            missing,
        })
        .await;
    }

    async fn reject(&self, msg_type: &str, reply: &ReplyTo, image_id: &str, statement: &str) {
        warn!(image_id, "{} rejected: {}", msg_type, statement);
        let msg_type = msg_type.strip_suffix(tags::ACK_SUFFIX).unwrap_or(msg_type);
        let envelope = reply_envelope(msg_type, reply, false)
            .with(keys::IMAGE_ID, image_id)
            .with(keys::ACK_STATEMENT, statement);
        self.send_reply(reply, envelope).await;
    }

    /// Fields every forwarder and archive request about a job carries.
    fn job_envelope(&self, msg_type: &str, job: &Job, ack_id: &AckId) -> Envelope {
        Envelope::new(msg_type)
            .with(keys::JOB_NUM, job.job_num.as_str())
            .with(keys::SESSION_ID, job.session_id.as_str())
            .with(keys::IMAGE_ID, job.image_id.as_str())
            .with(keys::VISIT_ID, job.visit_id.clone())
            .with(keys::DEVICE, job.device.as_str())
            .with(keys::ACK_ID, ack_id.as_str())
            .with(keys::REPLY_QUEUE, self.config.ack_queue.as_str())
    }
}

/// `XFER_PARAMS` for one forwarder's share.
fn xfer_params(rafts: &[RaftUnit]) -> Value {
    let raft_list: Vec<&str> = rafts.iter().map(|r| r.raft.as_str()).collect();
    let raft_ccd_list: Vec<&Vec<String>> = rafts.iter().map(|r| &r.ccds).collect();
    json!({
        "RAFT_LIST": raft_list,
        "RAFT_CCD_LIST": raft_ccd_list,
    })
}

/// Per-unit results from the forwarders' END_READOUT acks.
///
/// A forwarder that never answered leaves its units UNACKNOWLEDGED. Units it answered
/// for but left out of its result list are NO_FILE. A negative ack fails every unit of
/// that forwarder: reported failure codes are kept, the rest are UNACKNOWLEDGED.
/// Reports for units it was not assigned are ignored.
pub fn collect_results(
    assignment: &WorkAssignment,
    outcome: &AckOutcome,
) -> BTreeMap<String, ResultCode> {
    let mut results = BTreeMap::new();
    for worker in assignment.workers() {
        let assigned = assignment.unit_ids_for(worker);
        let Some(response) = outcome.responses.get(worker) else {
            for unit in assigned {
                results.insert(unit, ResultCode::Unacknowledged);
            }
            continue;
        };

        let list = match ResultList::from_envelope(response) {
            Ok(list) => list.unwrap_or_default(),
            Err(e) => {
                warn!(forwarder = worker, "Ignoring malformed result list: {}", e);
                ResultList::default()
            }
        };
        let reported: BTreeMap<&str, &str> = list.codes().collect();
        let acked = response.get_bool(keys::ACK_BOOL).unwrap_or(false);
        if !acked {
            warn!(forwarder = worker, "Readout answered negatively");
        }
        for unit in assigned {
            let code = match reported.get(unit.as_str()).map(|code| ResultCode::classify(code)) {
                Some(code) if acked || code.is_failure() => code,
                Some(_) => ResultCode::Unacknowledged,
                None if acked => ResultCode::NoFile,
                None => ResultCode::Unacknowledged,
            };
            results.insert(unit, code);
        }
    }
    results
}

/// Forwarder-reported entries for the units that succeeded, merged across forwarders.
fn merged_result_list(
    outcome: &AckOutcome,
    results: &BTreeMap<String, ResultCode>,
) -> ResultList {
    let mut merged = ResultList::default();
    for response in outcome.responses.values() {
        let Ok(Some(list)) = ResultList::from_envelope(response) else {
            continue;
        };
        for (i, unit) in list.ccd_list.iter().enumerate() {
            let succeeded = results.get(unit).is_some_and(|code| !code.is_failure());
            if !succeeded || merged.ccd_list.contains(unit) {
                continue;
            }
            merged.ccd_list.push(unit.clone());
            merged
                .filename_list
                .push(list.filename_list.get(i).cloned().unwrap_or_default());
            merged
                .checksum_list
                .push(list.checksum_list.get(i).cloned().unwrap_or_default());
            merged
                .result_codes
                .push(list.result_codes.get(i).cloned().unwrap_or_default());
        }
    }
    merged
}

fn results_value(job: &Job) -> Value {
    let list = ResultList {
        ccd_list: job.results.keys().cloned().collect(),
        result_codes: job.results.values().map(ResultCode::to_string).collect(),
        ..ResultList::default()
    };
    list.to_value()
}
