//! In-process stand-ins for forwarders and the archive controller.
//!
//! Both answer the coordinator's requests on the queue named in `REPLY_QUEUE`,
//! the same way the real workers do. The server runs them when
//! `simulation.enabled` is set.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::{keys, tags, BusError, Envelope, MessageBus, ResultList};
use crate::config::Config;
use crate::partition::unit_id;

/// How a simulated forwarder responds.
#[derive(Debug, Clone)]
pub struct ForwarderBehavior {
    pub answer_health: bool,
    /// Whether FWDR_XFER_PARAMS is acked positively.
    pub accept_xfer: bool,
    pub answer_readout: bool,
    /// ACK_BOOL sent with FWDR_END_READOUT_ACK. The result list is sent either way.
    pub ack_readout: bool,
    /// Units reported with `failure_code` instead of OK.
    pub failing_units: Vec<String>,
    pub failure_code: String,
    /// Delay before every reply.
    pub delay: Duration,
}

impl Default for ForwarderBehavior {
    fn default() -> Self {
        Self {
            answer_health: true,
            accept_xfer: true,
            answer_readout: true,
            ack_readout: true,
            failing_units: Vec::new(),
            failure_code: "NO_FILE".to_string(),
            delay: Duration::ZERO,
        }
    }
}

impl ForwarderBehavior {
    /// Never answers anything.
    pub fn silent() -> Self {
        Self {
            answer_health: false,
            accept_xfer: false,
            answer_readout: false,
            ..Self::default()
        }
    }

    /// Healthy, but refuses transfer parameters.
    pub fn refusing() -> Self {
        Self {
            accept_xfer: false,
            ..Self::default()
        }
    }

    /// Healthy and accepting, but goes quiet at readout.
    pub fn mute_at_readout() -> Self {
        Self {
            answer_readout: false,
            ..Self::default()
        }
    }

    /// Answers END_READOUT with a false ACK_BOOL, while still listing its codes.
    pub fn negative_at_readout() -> Self {
        Self {
            ack_readout: false,
            ..Self::default()
        }
    }

    pub fn with_failures(mut self, units: Vec<String>, code: impl Into<String>) -> Self {
        self.failing_units = units;
        self.failure_code = code.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A forwarder that consumes its queue and answers from `behavior`.
pub struct SimulatedForwarder {
    name: String,
    queue: String,
    bus: Arc<dyn MessageBus>,
    behavior: ForwarderBehavior,
    headers: Arc<AtomicUsize>,
}

impl SimulatedForwarder {
    pub fn new(
        name: impl Into<String>,
        queue: impl Into<String>,
        bus: Arc<dyn MessageBus>,
        behavior: ForwarderBehavior,
    ) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            bus,
            behavior,
            headers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter of FWDR_HEADER_READY messages seen, readable after `spawn`.
    pub fn header_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.headers)
    }

    /// Subscribe to the queue and serve it until the queue closes.
    pub async fn spawn(self) -> Result<JoinHandle<()>, BusError> {
        let mut rx = self.bus.subscribe(&self.queue).await?;
        Ok(tokio::spawn(async move {
            // Unit ids assigned per job, from the transfer parameters.
            let mut assigned: HashMap<String, Vec<String>> = HashMap::new();
            while let Some(envelope) = rx.recv().await {
                self.handle(envelope, &mut assigned).await;
            }
            debug!(forwarder = %self.name, "Simulated forwarder stopped");
        }))
    }

    async fn handle(&self, envelope: Envelope, assigned: &mut HashMap<String, Vec<String>>) {
        let job_num = envelope.get_string(keys::JOB_NUM).unwrap_or_default();
        match envelope.msg_type() {
            Some(tags::FWDR_HEALTH_CHECK) if self.behavior.answer_health => {
                self.reply(&envelope, tags::FWDR_HEALTH_CHECK_ACK, true, None)
                    .await;
            }
            Some(tags::FWDR_XFER_PARAMS) => {
                let units = envelope
                    .get(keys::XFER_PARAMS)
                    .map(units_from_xfer_params)
                    .unwrap_or_default();
                assigned.insert(job_num, units);
                self.reply(
                    &envelope,
                    tags::FWDR_XFER_PARAMS_ACK,
                    self.behavior.accept_xfer,
                    None,
                )
                .await;
            }
            Some(tags::FWDR_END_READOUT) if self.behavior.answer_readout => {
                let units = assigned.remove(&job_num).unwrap_or_default();
                let image_id = envelope.get_string(keys::IMAGE_ID).unwrap_or_default();
                let results = self.result_list(&image_id, units);
                self.reply(
                    &envelope,
                    tags::FWDR_END_READOUT_ACK,
                    self.behavior.ack_readout,
                    Some(results),
                )
                .await;
            }
            Some(tags::FWDR_HEADER_READY) => {
                self.headers.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }

    fn result_list(&self, image_id: &str, units: Vec<String>) -> ResultList {
        let mut list = ResultList::default();
        for unit in units {
            let code = if self.behavior.failing_units.contains(&unit) {
                self.behavior.failure_code.clone()
            } else {
                "OK".to_string()
            };
            let filename = format!("{}_{}.fits", image_id, unit.replace('/', "_"));
            list.checksum_list.push(checksum(&filename));
            list.filename_list.push(filename);
            list.result_codes.push(code);
            list.ccd_list.push(unit);
        }
        list
    }

    async fn reply(
        &self,
        request: &Envelope,
        msg_type: &str,
        ack_bool: bool,
        results: Option<ResultList>,
    ) {
        if !self.behavior.delay.is_zero() {
            tokio::time::sleep(self.behavior.delay).await;
        }
        send_ack(
            self.bus.as_ref(),
            &self.name,
            request,
            msg_type,
            ack_bool,
            results,
        )
        .await;
    }
}

/// An archive controller that confirms ITEMS_XFERD, rejecting `rejected_units`.
pub struct SimulatedArchive {
    name: String,
    queue: String,
    bus: Arc<dyn MessageBus>,
    rejected_units: Vec<String>,
    rejection_code: String,
    answer: bool,
}

impl SimulatedArchive {
    pub fn new(name: impl Into<String>, queue: impl Into<String>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            bus,
            rejected_units: Vec::new(),
            rejection_code: "BAD_CHECKSUM".to_string(),
            answer: true,
        }
    }

    pub fn rejecting(mut self, units: Vec<String>, code: impl Into<String>) -> Self {
        self.rejected_units = units;
        self.rejection_code = code.into();
        self
    }

    /// Receive requests but never answer them.
    pub fn silent(mut self) -> Self {
        self.answer = false;
        self
    }

    pub async fn spawn(self) -> Result<JoinHandle<()>, BusError> {
        let mut rx = self.bus.subscribe(&self.queue).await?;
        Ok(tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                if envelope.msg_type() != Some(tags::ITEMS_XFERD) || !self.answer {
                    continue;
                }
                let reported = match ResultList::from_envelope(&envelope) {
                    Ok(list) => list.unwrap_or_default(),
                    Err(e) => {
                        warn!("Simulated archive ignoring request: {}", e);
                        continue;
                    }
                };
                let mut confirmed = reported.clone();
                confirmed.result_codes = reported
                    .ccd_list
                    .iter()
                    .map(|unit| {
                        if self.rejected_units.contains(unit) {
                            self.rejection_code.clone()
                        } else {
                            "OK".to_string()
                        }
                    })
                    .collect();
                send_ack(
                    self.bus.as_ref(),
                    &self.name,
                    &envelope,
                    tags::ITEMS_XFERD_ACK,
                    true,
                    Some(confirmed),
                )
                .await;
            }
            debug!(archive = %self.name, "Simulated archive stopped");
        }))
    }
}

/// Start a simulator for every configured forwarder, and the archive if configured.
///
/// Forwarders fail the units named in `simulation.failing_units`.
pub async fn spawn_simulators(
    config: &Config,
    bus: Arc<dyn MessageBus>,
) -> Result<Vec<JoinHandle<()>>, BusError> {
    let defaults = ForwarderBehavior::default();
    let code = config
        .simulation
        .failure_code
        .clone()
        .unwrap_or(defaults.failure_code.clone());
    let behavior = defaults.with_failures(config.simulation.failing_units.clone(), code);

    let mut handles = Vec::new();
    for forwarder in &config.forwarders {
        let sim = SimulatedForwarder::new(
            &forwarder.name,
            &forwarder.consume_queue,
            Arc::clone(&bus),
            behavior.clone(),
        );
        handles.push(sim.spawn().await?);
    }
    if let Some(ref archive) = config.archive {
        let sim = SimulatedArchive::new(&archive.name, &archive.consume_queue, Arc::clone(&bus));
        handles.push(sim.spawn().await?);
    }
    Ok(handles)
}

async fn send_ack(
    bus: &dyn MessageBus,
    component: &str,
    request: &Envelope,
    msg_type: &str,
    ack_bool: bool,
    results: Option<ResultList>,
) {
    let Some(reply_queue) = request.get_string(keys::REPLY_QUEUE) else {
        warn!(component, "Request has no REPLY_QUEUE, not answering");
        return;
    };
    let mut ack = Envelope::new(msg_type)
        .with(keys::COMPONENT, component)
        .with(keys::ACK_BOOL, ack_bool);
    for key in [keys::ACK_ID, keys::JOB_NUM, keys::IMAGE_ID] {
        if let Some(value) = request.get(key) {
            ack.insert(key, value.clone());
        }
    }
    if let Some(results) = results {
        ack.insert(keys::RESULT_LIST, results.to_value());
    }
    if let Err(e) = bus.publish(&reply_queue, ack).await {
        warn!(component, "Simulated ack not delivered: {}", e);
    }
}

/// Unit ids named by `{RAFT_LIST, RAFT_CCD_LIST}`.
fn units_from_xfer_params(params: &Value) -> Vec<String> {
    let rafts = params.get("RAFT_LIST").and_then(Value::as_array);
    let ccds = params.get("RAFT_CCD_LIST").and_then(Value::as_array);
    let (Some(rafts), Some(ccds)) = (rafts, ccds) else {
        return Vec::new();
    };

    let mut units = Vec::new();
    for (raft, raft_ccds) in rafts.iter().zip(ccds) {
        let Some(raft) = raft.as_str() else { continue };
        for ccd in raft_ccds.as_array().into_iter().flatten() {
            if let Some(ccd) = ccd.as_str() {
                units.push(unit_id(raft, ccd));
            }
        }
    }
    units
}

fn checksum(filename: &str) -> String {
    let mut hasher = DefaultHasher::new();
    filename.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
