pub mod ack;
pub mod audit;
pub mod backlog;
pub mod bus;
pub mod config;
pub mod device;
pub mod forwarder;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod partition;
pub mod scoreboard;
pub mod testing;

pub use ack::{AckError, AckId, AckOutcome, AckRegistry, RecordOutcome};
pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditFilter, AuditHandle, AuditRecord,
    AuditStore, AuditWriter, SqliteAuditStore,
};
pub use backlog::{BacklogEntry, BacklogError, BacklogLedger, BacklogReason, ResultCode};
pub use bus::{BusError, Envelope, InMemoryBus, MessageBus};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use device::{DeviceCommand, DeviceError, DeviceRole, DeviceState, DeviceStateMachine};
pub use forwarder::{ForwarderRecord, ForwarderRoster};
pub use job::{Job, JobError, JobLedger, JobState};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, OrchestratorError, OrchestratorStatus, RetryOutcome,
    WorkflowState,
};
pub use partition::{partition, Assignment, PartitionError, RaftUnit, RemainderPolicy};
pub use scoreboard::{MemoryScoreboard, Scoreboard, ScoreboardError, SqliteScoreboard};
