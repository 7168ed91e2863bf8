//! Orchestrator lifecycle and message dispatch.
//!
//! One listener per inbound queue:
//! - **Commands**: each message runs on its own task so one job's ack wait never
//!   blocks another's.
//! - **Acks**: recorded inline; recording never waits.
//! - **Backlog**: optional periodic retry of one entry.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::ack::{AckRegistry, RecordOutcome};
use crate::audit::{AuditEvent, AuditHandle};
use crate::backlog::BacklogLedger;
use crate::bus::{
    keys, publish_with_retry, tags, AckMessage, Envelope, InboundMessage, MessageBus, ReplyTo,
};
use crate::config::{ArchiveConfig, Config};
use crate::device::{DeviceCommand, DeviceError, DeviceRole, DeviceStateMachine, TransitionTable};
use crate::forwarder::ForwarderRoster;
use crate::job::{JobLedger, SessionFile};
use crate::partition::RaftUnit;
use crate::scoreboard::Scoreboard;

use super::config::OrchestratorConfig;
use super::types::{OrchestratorError, OrchestratorStatus, WorkflowState};

/// Component name stamped on every reply the coordinator sends.
pub const COMPONENT_NAME: &str = "DMCS";

/// How long `stop` waits for listener tasks to wind down.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// The archive coordinator: owns the ledgers and drives the visit workflow.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Orchestrator {
    pub(super) config: Arc<OrchestratorConfig>,
    pub(super) layout: Arc<Vec<RaftUnit>>,
    pub(super) archive: Option<Arc<ArchiveConfig>>,
    pub(super) bus: Arc<dyn MessageBus>,
    pub(super) acks: Arc<AckRegistry>,
    pub(super) devices: Arc<DeviceStateMachine>,
    pub(super) jobs: Arc<JobLedger>,
    pub(super) backlog: Arc<BacklogLedger>,
    pub(super) forwarders: Arc<ForwarderRoster>,
    sessions: Arc<SessionFile>,
    pub(super) audit: Option<AuditHandle>,
    workflow: Arc<Mutex<BTreeMap<String, WorkflowState>>>,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Orchestrator {
    /// Build every component from configuration over a shared scoreboard.
    pub fn new(
        config: &Config,
        store: Arc<dyn Scoreboard>,
        bus: Arc<dyn MessageBus>,
        audit: Option<AuditHandle>,
    ) -> Result<Self, OrchestratorError> {
        let devices = DeviceStateMachine::new(
            Arc::clone(&store),
            TransitionTable::standard(),
            config.device_specs(),
        )?;
        let forwarders = ForwarderRoster::new(Arc::clone(&store), config.forwarder_rows())?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config: Arc::new(config.orchestrator.clone()),
            layout: Arc::new(config.layout.units()),
            archive: config.archive.clone().map(Arc::new),
            bus,
            acks: Arc::new(AckRegistry::new(Arc::clone(&store), config.acks.ceiling)),
            devices: Arc::new(devices),
            jobs: Arc::new(JobLedger::new(Arc::clone(&store))),
            backlog: Arc::new(BacklogLedger::new(Arc::clone(&store))),
            forwarders: Arc::new(forwarders),
            sessions: Arc::new(SessionFile::new(config.session.file.clone())),
            audit,
            workflow: Arc::new(Mutex::new(BTreeMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            tasks: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn devices(&self) -> &DeviceStateMachine {
        &self.devices
    }

    pub fn jobs(&self) -> &JobLedger {
        &self.jobs
    }

    pub fn backlog(&self) -> &BacklogLedger {
        &self.backlog
    }

    pub fn forwarders(&self) -> &ForwarderRoster {
        &self.forwarders
    }

    pub fn acks(&self) -> &AckRegistry {
        &self.acks
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Subscribe to the command and ack queues and spawn the listeners.
    ///
    /// A queue can only be consumed once, so a stopped orchestrator cannot be
    /// restarted on the same bus.
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return Ok(());
        }

        info!(
            command_queue = %self.config.command_queue,
            ack_queue = %self.config.ack_queue,
            "Starting orchestrator"
        );

        let subscribed = async {
            let commands = self.bus.subscribe(&self.config.command_queue).await?;
            let acks = self.bus.subscribe(&self.config.ack_queue).await?;
            Ok::<_, OrchestratorError>((commands, acks))
        }
        .await;
        let (command_rx, ack_rx) = match subscribed {
            Ok(receivers) => receivers,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let mut handles = vec![
            self.spawn_command_listener(command_rx),
            self.spawn_ack_listener(ack_rx),
        ];
        if self.config.backlog_retry_interval_ms > 0 {
            handles.push(self.spawn_backlog_loop());
        }
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.extend(handles);
        }

        info!("Orchestrator started");
        Ok(())
    }

    /// Signal every listener to exit and wait briefly for them.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }

        info!("Stopping orchestrator");
        let _ = self.shutdown_tx.send(());

        let handles: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        let joined = tokio::time::timeout(STOP_GRACE, futures::future::join_all(handles)).await;
        if joined.is_err() {
            warn!("Listener tasks did not stop within {:?}", STOP_GRACE);
        }

        info!("Orchestrator stopped");
    }

    pub fn status(&self) -> OrchestratorStatus {
        let session_id = self.jobs.current_session().ok().flatten();
        let job_counts = session_id
            .as_deref()
            .and_then(|s| self.jobs.state_counts(s).ok())
            .unwrap_or_default();

        OrchestratorStatus {
            running: self.is_running(),
            session_id,
            visit_id: self
                .jobs
                .current_visit()
                .ok()
                .flatten()
                .map(|v| v.visit_id),
            open_acks: self.acks.open_count(),
            job_counts,
            backlog_depth: self.backlog.len().unwrap_or(0),
            images: self.workflow.lock().map(|w| w.clone()).unwrap_or_default(),
        }
    }

    pub fn workflow_state(&self, image_id: &str) -> Option<WorkflowState> {
        self.workflow.lock().ok()?.get(image_id).copied()
    }

    /// Parse and act on one inbound envelope.
    pub async fn handle_message(&self, envelope: Envelope) -> Result<(), OrchestratorError> {
        let message = InboundMessage::parse(&envelope)?;
        debug!(msg_type = envelope.msg_type().unwrap_or_default(), "Handling message");

        match message {
            InboundMessage::NewSession { session_id, reply } => {
                self.new_session(session_id, &reply).await
            }
            InboundMessage::NextVisit {
                visit_id,
                bore_sight,
                reply,
            } => self.next_visit(&visit_id, bore_sight, &reply).await,
            InboundMessage::StartIntegration { image_id, reply } => {
                self.start_integration(&image_id, &reply).await.map(|_| ())
            }
            InboundMessage::EndReadout { image_id, reply } => {
                self.end_readout(&image_id, &reply).await.map(|_| ())
            }
            InboundMessage::HeaderReady { image_id, header } => {
                self.header_ready(&image_id, header).await
            }
            InboundMessage::DeviceCommand {
                role,
                command,
                cfg_key,
                reply,
            } => self.device_command(role, command, cfg_key, &reply).await,
            InboundMessage::Ack(ack) => {
                self.record_ack(ack);
                Ok(())
            }
        }
    }

    /// Start a session with `session_id`, or the next id from the session file.
    pub async fn new_session(
        &self,
        session_id: Option<String>,
        reply: &ReplyTo,
    ) -> Result<(), OrchestratorError> {
        let session_id = match session_id {
            Some(id) => id,
            None => self.sessions.advance()?.to_string(),
        };
        self.jobs.start_session(&session_id)?;
        self.clear_workflow();
        info!(session_id = %session_id, "Session started");
        self.emit(AuditEvent::SessionStarted {
            session_id: session_id.clone(),
        })
        .await;

        let envelope =
            reply_envelope(tags::NEW_SESSION, reply, true).with(keys::SESSION_ID, session_id);
        self.send_reply(reply, envelope).await;
        Ok(())
    }

    pub async fn next_visit(
        &self,
        visit_id: &str,
        bore_sight: Option<String>,
        reply: &ReplyTo,
    ) -> Result<(), OrchestratorError> {
        self.jobs.set_visit(visit_id, bore_sight.as_deref())?;
        self.clear_workflow();
        info!(visit_id, "Next visit");
        self.emit(AuditEvent::VisitStarted {
            visit_id: visit_id.to_string(),
            bore_sight,
        })
        .await;

        let envelope =
            reply_envelope(tags::NEXT_VISIT, reply, true).with(keys::VISIT_ID, visit_id);
        self.send_reply(reply, envelope).await;
        Ok(())
    }

    /// Apply a device command, publish its notifications and ack it.
    ///
    /// Rejections are answered with a negative ack and are not errors. Store
    /// failures are answered the same way and then returned.
    pub async fn device_command(
        &self,
        role: DeviceRole,
        command: DeviceCommand,
        cfg_key: Option<String>,
        reply: &ReplyTo,
    ) -> Result<(), OrchestratorError> {
        let msg_type = format!("{}_{}", role.as_str(), command.as_str());

        match self.devices.apply(role, command, cfg_key.as_deref()) {
            Ok(applied) => {
                for notification in &applied.notifications {
                    if let Err(e) = self
                        .publish(&self.config.notification_queue, notification.to_envelope())
                        .await
                    {
                        error!(device = %role, "Failed to publish state notification: {}", e);
                    }
                }
                let cfg_key = match command {
                    DeviceCommand::Start => self.devices.device(role).and_then(|d| d.cfg_key),
                    _ => None,
                };
                self.emit(AuditEvent::DeviceTransition {
                    device: role,
                    command,
                    from_state: applied.previous,
                    to_state: applied.current,
                    cfg_key,
                })
                .await;

                let envelope = reply_envelope(&msg_type, reply, true)
                    .with(keys::ACK_STATEMENT, format!("{} is {}", role, applied.current));
                self.send_reply(reply, envelope).await;
                Ok(())
            }
            Err(e) => {
                let statement = e.to_string();
                warn!(device = %role, command = %command, "Command rejected: {}", statement);
                let envelope = reply_envelope(&msg_type, reply, false)
                    .with(keys::ACK_STATEMENT, statement.clone());
                self.send_reply(reply, envelope).await;

                match e {
                    DeviceError::Store(_) | DeviceError::Poisoned => Err(e.into()),
                    _ => {
                        self.emit(AuditEvent::CommandRejected {
                            device: role,
                            command,
                            reason: statement,
                        })
                        .await;
                        Ok(())
                    }
                }
            }
        }
    }

    /// Feed a forwarder or archive response into the ack registry.
    pub fn record_ack(&self, ack: AckMessage) -> RecordOutcome {
        let outcome = self
            .acks
            .record(&ack.ack_id.as_str().into(), &ack.component, ack.envelope);
        match outcome {
            RecordOutcome::Accepted | RecordOutcome::Completed => debug!(
                ack_id = %ack.ack_id,
                component = %ack.component,
                ack_bool = ack.ack_bool,
                "Ack recorded"
            ),
            RecordOutcome::Duplicate | RecordOutcome::Resolved | RecordOutcome::Unknown => debug!(
                ack_id = %ack.ack_id,
                component = %ack.component,
                ?outcome,
                "Ack not recorded"
            ),
        }
        outcome
    }

    /// Publish with the configured retry policy.
    pub(super) async fn publish(
        &self,
        destination: &str,
        envelope: Envelope,
    ) -> Result<(), OrchestratorError> {
        publish_with_retry(
            self.bus.as_ref(),
            destination,
            envelope,
            self.config.retry_policy(),
        )
        .await?;
        Ok(())
    }

    /// Send a reply to the message's reply queue, or the default one.
    pub(super) async fn send_reply(&self, reply: &ReplyTo, envelope: Envelope) {
        let queue = reply
            .queue
            .as_deref()
            .unwrap_or(self.config.reply_queue.as_str());
        if let Err(e) = self.publish(queue, envelope).await {
            error!(queue, "Failed to send reply: {}", e);
        }
    }

    pub(super) async fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.emit(event).await;
        }
    }

    pub(super) fn set_workflow(&self, image_id: &str, state: WorkflowState) {
        if let Ok(mut workflow) = self.workflow.lock() {
            debug!(image_id, ?state, "Workflow state");
            workflow.insert(image_id.to_string(), state);
        }
    }

    fn clear_workflow(&self) {
        if let Ok(mut workflow) = self.workflow.lock() {
            workflow.clear();
        }
    }

    fn spawn_command_listener(&self, mut rx: mpsc::Receiver<Envelope>) -> JoinHandle<()> {
        let this = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Command listener started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Command listener received shutdown signal");
                        break;
                    }
                    message = rx.recv() => {
                        let Some(envelope) = message else {
                            warn!("Command queue closed");
                            break;
                        };
                        let worker = this.clone();
                        tokio::spawn(async move {
                            if let Err(e) = worker.handle_message(envelope).await {
                                warn!("Command handling failed: {}", e);
                            }
                        });
                    }
                }
            }
            info!("Command listener stopped");
        })
    }

    fn spawn_ack_listener(&self, mut rx: mpsc::Receiver<Envelope>) -> JoinHandle<()> {
        let this = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Ack listener started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Ack listener received shutdown signal");
                        break;
                    }
                    message = rx.recv() => {
                        let Some(envelope) = message else {
                            warn!("Ack queue closed");
                            break;
                        };
                        match InboundMessage::parse(&envelope) {
                            Ok(InboundMessage::Ack(ack)) => {
                                this.record_ack(ack);
                            }
                            Ok(_) => {
                                // Workflow messages routed to the ack queue still get served.
                                let worker = this.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = worker.handle_message(envelope).await {
                                        warn!("Command handling failed: {}", e);
                                    }
                                });
                            }
                            Err(e) => warn!("Dropping message on ack queue: {}", e),
                        }
                    }
                }
            }
            info!("Ack listener stopped");
        })
    }

    fn spawn_backlog_loop(&self) -> JoinHandle<()> {
        let this = self.clone();
        let running = Arc::clone(&self.running);
        let interval = Duration::from_millis(self.config.backlog_retry_interval_ms);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!(?interval, "Backlog retry loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Backlog retry loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = this.retry_backlog().await {
                            warn!("Backlog retry error: {}", e);
                        }
                    }
                }
            }
            info!("Backlog retry loop stopped");
        })
    }
}

/// Reply skeleton: `<msg_type>_ACK` carrying the request's ack id.
pub(super) fn reply_envelope(msg_type: &str, reply: &ReplyTo, ack_bool: bool) -> Envelope {
    let mut envelope = Envelope::new(format!("{}{}", msg_type, tags::ACK_SUFFIX))
        .with(keys::ACK_BOOL, ack_bool)
        .with(keys::COMPONENT, COMPONENT_NAME);
    if let Some(ref ack_id) = reply.ack_id {
        envelope.insert(keys::ACK_ID, ack_id.clone());
    }
    envelope
}
