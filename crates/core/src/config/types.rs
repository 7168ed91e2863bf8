use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::device::{DeviceRole, DeviceSpec};
use crate::orchestrator::OrchestratorConfig;
use crate::partition::RaftUnit;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub acks: AckConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    pub layout: LayoutConfig,
    #[serde(default)]
    pub archive: Option<ArchiveConfig>,
    pub devices: Vec<DeviceConfig>,
    pub forwarders: Vec<ForwarderConfig>,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Config {
    /// Device descriptions for the state machine, in role order.
    pub fn device_specs(&self) -> Vec<DeviceSpec> {
        let mut specs: Vec<DeviceSpec> = self
            .devices
            .iter()
            .map(|d| DeviceSpec {
                role: d.role,
                consume_queue: d.consume_queue.clone(),
                config_keys: d.config_keys.clone(),
                forwarders: d.forwarders.clone(),
            })
            .collect();
        specs.sort_by_key(|s| s.role);
        specs
    }

    /// `(name, consume_queue)` pairs for the forwarder roster.
    pub fn forwarder_rows(&self) -> Vec<(String, String)> {
        self.forwarders
            .iter()
            .map(|f| (f.name.clone(), f.consume_queue.clone()))
            .collect()
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database holding the scoreboard and the audit trail
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("dmcs.db")
}

/// Session id persistence
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_file")]
    pub file: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            file: default_session_file(),
        }
    }
}

fn default_session_file() -> PathBuf {
    PathBuf::from("dmcs_session.toml")
}

/// Ack id issuance
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AckConfig {
    /// Largest sequence number before ids wrap to 1.
    #[serde(default = "default_ack_ceiling")]
    pub ceiling: u64,
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            ceiling: default_ack_ceiling(),
        }
    }
}

fn default_ack_ceiling() -> u64 {
    crate::ack::DEFAULT_ACK_CEILING
}

/// Focal-plane layout used to build transfer work.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LayoutConfig {
    pub rafts: Vec<RaftConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RaftConfig {
    pub raft: String,
    pub ccds: Vec<String>,
}

impl LayoutConfig {
    pub fn units(&self) -> Vec<RaftUnit> {
        self.rafts
            .iter()
            .map(|r| RaftUnit::new(r.raft.clone(), r.ccds.clone()))
            .collect()
    }
}

/// Archive controller that verifies transferred files.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchiveConfig {
    pub consume_queue: String,
    /// Component name the controller answers with.
    #[serde(default = "default_archive_name")]
    pub name: String,
    #[serde(default = "default_archive_timeout")]
    pub timeout_ms: u64,
}

fn default_archive_name() -> String {
    "ARCHIVE_CTRL".to_string()
}

fn default_archive_timeout() -> u64 {
    4000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub role: DeviceRole,
    pub consume_queue: String,
    #[serde(default)]
    pub forwarders: Vec<String>,
    #[serde(default)]
    pub config_keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForwarderConfig {
    pub name: String,
    pub consume_queue: String,
}

/// In-process forwarder and archive simulators, for running without real workers.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Units reported with this code by every simulated forwarder.
    #[serde(default)]
    pub failing_units: Vec<String>,
    #[serde(default)]
    pub failure_code: Option<String>,
}

/// Sanitized config for API responses
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub acks: AckConfig,
    pub orchestrator: OrchestratorConfig,
    pub rafts: usize,
    pub ccds: usize,
    pub archive_configured: bool,
    pub devices: Vec<DeviceConfig>,
    pub forwarders: Vec<ForwarderConfig>,
    pub simulation: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            session: config.session.clone(),
            acks: config.acks.clone(),
            orchestrator: config.orchestrator.clone(),
            rafts: config.layout.rafts.len(),
            ccds: config.layout.rafts.iter().map(|r| r.ccds.len()).sum(),
            archive_configured: config.archive.is_some(),
            devices: config.devices.clone(),
            forwarders: config.forwarders.clone(),
            simulation: config.simulation.enabled,
        }
    }
}
