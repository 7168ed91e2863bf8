//! Testing utilities: recording doubles, worker simulators and fixtures.
//!
//! Everything here runs in-process, so the whole coordinator can be exercised without
//! real forwarders or an archive controller.
//!
//! # Example
//!
//! ```rust,ignore
//! use dmcs_core::testing::{fixtures, spawn_simulators, RecordingBus};
//!
//! let config = fixtures::config();
//! let bus = Arc::new(RecordingBus::new());
//! spawn_simulators(&config, bus.clone()).await?;
//! let orchestrator = fixtures::orchestrator(&config, bus.clone())?;
//! orchestrator.start().await?;
//! ```

mod mock_audit_store;
mod recording_bus;
mod simulator;

pub use mock_audit_store::MockAuditStore;
pub use recording_bus::RecordingBus;
pub use simulator::{spawn_simulators, ForwarderBehavior, SimulatedArchive, SimulatedForwarder};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::PathBuf;
    use std::sync::Arc;

    use crate::audit::AuditHandle;
    use crate::bus::{keys, tags, Envelope, MessageBus};
    use crate::config::{
        AckConfig, ArchiveConfig, Config, DatabaseConfig, DeviceConfig, ForwarderConfig,
        LayoutConfig, RaftConfig, ServerConfig, SessionConfig, SimulationConfig,
    };
    use crate::device::{DeviceCommand, DeviceRole};
    use crate::orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError};
    use crate::scoreboard::MemoryScoreboard;

    /// Two rafts of two CCDs; AR served by F1 and F2, PP by F3.
    ///
    /// Ack deadlines are a few hundred milliseconds so timeouts stay quick.
    pub fn config() -> Config {
        Config {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            session: SessionConfig {
                file: std::env::temp_dir().join(format!("dmcs_session_{}.toml", std::process::id())),
            },
            acks: AckConfig::default(),
            orchestrator: orchestrator_config(),
            layout: LayoutConfig {
                rafts: vec![raft("R00", &["S00", "S01"]), raft("R01", &["S00", "S01"])],
            },
            archive: None,
            devices: vec![
                device(DeviceRole::Ar, "ar_foreman_consume", &["F1", "F2"]),
                device(DeviceRole::Pp, "pp_foreman_consume", &["F3"]),
            ],
            forwarders: ["F1", "F2", "F3"]
                .iter()
                .map(|name| ForwarderConfig {
                    name: name.to_string(),
                    consume_queue: format!("{}_consume", name.to_lowercase()),
                })
                .collect(),
            simulation: SimulationConfig::default(),
        }
    }

    /// [`config`] with an archive controller on `archive_consume`.
    pub fn config_with_archive() -> Config {
        let mut config = config();
        config.archive = Some(ArchiveConfig {
            consume_queue: "archive_consume".to_string(),
            name: "ARCHIVE_CTRL".to_string(),
            timeout_ms: 300,
        });
        config
    }

    /// Same as [`config`] but persisting sessions at `session_file`.
    pub fn config_with_session_file(session_file: impl Into<PathBuf>) -> Config {
        let mut config = config();
        config.session.file = session_file.into();
        config
    }

    pub fn orchestrator_config() -> OrchestratorConfig {
        OrchestratorConfig {
            health_check_timeout_ms: 200,
            xfer_params_timeout_ms: 300,
            readout_timeout_ms: 300,
            publish_backoff_ms: 1,
            ..OrchestratorConfig::default()
        }
    }

    pub fn raft(name: &str, ccds: &[&str]) -> RaftConfig {
        RaftConfig {
            raft: name.to_string(),
            ccds: ccds.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn device(role: DeviceRole, queue: &str, forwarders: &[&str]) -> DeviceConfig {
        DeviceConfig {
            role,
            consume_queue: queue.to_string(),
            forwarders: forwarders.iter().map(|f| f.to_string()).collect(),
            config_keys: vec!["normal".to_string()],
        }
    }

    /// An orchestrator over a fresh in-memory scoreboard.
    pub fn orchestrator(
        config: &Config,
        bus: Arc<dyn MessageBus>,
    ) -> Result<Orchestrator, OrchestratorError> {
        Orchestrator::new(config, Arc::new(MemoryScoreboard::new()), bus, None)
    }

    /// Same as [`orchestrator`], with audit events going to `audit`.
    pub fn audited_orchestrator(
        config: &Config,
        bus: Arc<dyn MessageBus>,
        audit: AuditHandle,
    ) -> Result<Orchestrator, OrchestratorError> {
        Orchestrator::new(config, Arc::new(MemoryScoreboard::new()), bus, Some(audit))
    }

    pub fn new_session(session_id: &str) -> Envelope {
        Envelope::new(tags::NEW_SESSION)
            .with(keys::SESSION_ID, session_id)
            .with(keys::ACK_ID, format!("NEW_SESSION_{}", session_id))
    }

    pub fn next_visit(visit_id: &str) -> Envelope {
        Envelope::new(tags::NEXT_VISIT)
            .with(keys::VISIT_ID, visit_id)
            .with(keys::BORE_SIGHT, "231,123786456342, -45.3457156906, FK5")
    }

    pub fn start_integration(image_id: &str) -> Envelope {
        Envelope::new(tags::START_INTEGRATION)
            .with(keys::IMAGE_ID, image_id)
            .with(keys::ACK_ID, format!("START_INTEGRATION_{}", image_id))
    }

    pub fn end_readout(image_id: &str) -> Envelope {
        Envelope::new(tags::END_READOUT)
            .with(keys::IMAGE_ID, image_id)
            .with(keys::ACK_ID, format!("END_READOUT_{}", image_id))
    }

    pub fn device_command(role: DeviceRole, command: DeviceCommand, cfg_key: Option<&str>) -> Envelope {
        let mut envelope = Envelope::new(format!("{}_{}", role.as_str(), command.as_str()))
            .with(keys::ACK_ID, format!("{}_{}_ACK", role.as_str(), command.as_str()));
        if let Some(cfg_key) = cfg_key {
            envelope.insert(keys::CFG_KEY, cfg_key);
        }
        envelope
    }

    /// The command sequence that takes a device from OFFLINE to ENABLE.
    pub fn enable_sequence(role: DeviceRole) -> Vec<Envelope> {
        vec![
            device_command(role, DeviceCommand::EnterControl, None),
            device_command(role, DeviceCommand::Start, Some("normal")),
            device_command(role, DeviceCommand::Enable, None),
        ]
    }
}
