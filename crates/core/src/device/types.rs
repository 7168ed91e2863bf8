use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bus::{keys, tags, Envelope};
use crate::scoreboard::ScoreboardError;

/// Commandable device roles, in dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceRole {
    /// Archiver
    Ar,
    /// Prompt processing
    Pp,
    /// Catch-up archiver
    Cu,
    /// Auxiliary telescope
    At,
}

impl DeviceRole {
    pub const ALL: [DeviceRole; 4] = [DeviceRole::Ar, DeviceRole::Pp, DeviceRole::Cu, DeviceRole::At];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceRole::Ar => "AR",
            DeviceRole::Pp => "PP",
            DeviceRole::Cu => "CU",
            DeviceRole::At => "AT",
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AR" => Ok(DeviceRole::Ar),
            "PP" => Ok(DeviceRole::Pp),
            "CU" => Ok(DeviceRole::Cu),
            "AT" => Ok(DeviceRole::At),
            other => Err(format!("unknown device role: {}", other)),
        }
    }
}

/// Device lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceState {
    Offline,
    Standby,
    Disabled,
    Enabled,
    Fault,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Offline => "OFFLINE",
            DeviceState::Standby => "STANDBY",
            DeviceState::Disabled => "DISABLED",
            DeviceState::Enabled => "ENABLED",
            DeviceState::Fault => "FAULT",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OFFLINE" => Ok(DeviceState::Offline),
            "STANDBY" => Ok(DeviceState::Standby),
            "DISABLED" => Ok(DeviceState::Disabled),
            "ENABLED" => Ok(DeviceState::Enabled),
            "FAULT" => Ok(DeviceState::Fault),
            other => Err(format!("unknown device state: {}", other)),
        }
    }
}

/// Commands accepted by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceCommand {
    EnterControl,
    Start,
    Enable,
    Disable,
    Standby,
    ExitControl,
    Abort,
    Stop,
    Fault,
}

impl DeviceCommand {
    pub const ALL: [DeviceCommand; 9] = [
        DeviceCommand::EnterControl,
        DeviceCommand::Start,
        DeviceCommand::Enable,
        DeviceCommand::Disable,
        DeviceCommand::Standby,
        DeviceCommand::ExitControl,
        DeviceCommand::Abort,
        DeviceCommand::Stop,
        DeviceCommand::Fault,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceCommand::EnterControl => "ENTER_CONTROL",
            DeviceCommand::Start => "START",
            DeviceCommand::Enable => "ENABLE",
            DeviceCommand::Disable => "DISABLE",
            DeviceCommand::Standby => "STANDBY",
            DeviceCommand::ExitControl => "EXIT_CONTROL",
            DeviceCommand::Abort => "ABORT",
            DeviceCommand::Stop => "STOP",
            DeviceCommand::Fault => "FAULT",
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceCommand::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown device command: {}", s))
    }
}

/// A commandable device and its current lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub role: DeviceRole,
    pub state: DeviceState,
    /// Configuration key applied by the last START.
    pub cfg_key: Option<String>,
    /// Queue the device consumes from.
    pub consume_queue: String,
    /// Configuration keys START may select.
    pub config_keys: Vec<String>,
    /// Forwarders that serve this device.
    pub forwarders: Vec<String>,
}

/// Outbound notification produced by a successful transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateNotification {
    SummaryState {
        role: DeviceRole,
        state: DeviceState,
    },
    SettingsApplied {
        role: DeviceRole,
        settings: Option<String>,
    },
    AppliedSettingsMatchStart {
        role: DeviceRole,
        applied: bool,
    },
    ErrorCode {
        role: DeviceRole,
        code: i64,
    },
}

impl StateNotification {
    pub fn to_envelope(&self) -> Envelope {
        match self {
            StateNotification::SummaryState { role, state } => {
                Envelope::new(tags::SUMMARY_STATE_EVENT)
                    .with(keys::DEVICE, role.as_str())
                    .with(keys::CURRENT_STATE, state.as_str())
            }
            StateNotification::SettingsApplied { role, settings } => {
                Envelope::new(tags::SETTINGS_APPLIED_EVENT)
                    .with(keys::DEVICE, role.as_str())
                    .with(keys::SETTINGS, settings.clone())
            }
            StateNotification::AppliedSettingsMatchStart { role, applied } => {
                Envelope::new(tags::APPLIED_SETTINGS_MATCH_START_EVENT)
                    .with(keys::DEVICE, role.as_str())
                    .with(keys::APPLIED, *applied)
            }
            StateNotification::ErrorCode { role, code } => Envelope::new(tags::ERROR_CODE_EVENT)
                .with(keys::DEVICE, role.as_str())
                .with(keys::ERROR_CODE, *code),
        }
    }
}

/// A successful transition and what it should announce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub role: DeviceRole,
    pub command: DeviceCommand,
    pub previous: DeviceState,
    pub current: DeviceState,
    pub notifications: Vec<StateNotification>,
}

/// Rejections from the device state machine. The `Display` text is relayed verbatim
/// as the negative ack statement.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device {0} is not configured")]
    UnknownDevice(DeviceRole),

    #[error("{role} cannot {command} from {state}")]
    IllegalTransition {
        role: DeviceRole,
        state: DeviceState,
        command: DeviceCommand,
    },

    #[error("{role} has no configuration key {key}")]
    UnknownConfigKey { role: DeviceRole, key: String },

    #[error("device store error: {0}")]
    Store(#[from] ScoreboardError),

    #[error("device table lock poisoned")]
    Poisoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_round_trip_names() {
        for command in DeviceCommand::ALL {
            assert_eq!(command.as_str().parse::<DeviceCommand>().unwrap(), command);
        }
        assert!("RESET".parse::<DeviceCommand>().is_err());
    }

    #[test]
    fn test_role_parse_is_case_insensitive() {
        assert_eq!("ar".parse::<DeviceRole>().unwrap(), DeviceRole::Ar);
        assert!("XX".parse::<DeviceRole>().is_err());
    }

    #[test]
    fn test_role_order() {
        let mut roles = vec![DeviceRole::At, DeviceRole::Pp, DeviceRole::Ar];
        roles.sort();
        assert_eq!(roles, vec![DeviceRole::Ar, DeviceRole::Pp, DeviceRole::At]);
    }

    #[test]
    fn test_notification_envelope() {
        let env = StateNotification::SummaryState {
            role: DeviceRole::Pp,
            state: DeviceState::Standby,
        }
        .to_envelope();
        assert_eq!(env.msg_type(), Some(tags::SUMMARY_STATE_EVENT));
        assert_eq!(env.get_str(keys::DEVICE), Some("PP"));
        assert_eq!(env.get_str(keys::CURRENT_STATE), Some("STANDBY"));
    }

    #[test]
    fn test_error_text() {
        let err = DeviceError::IllegalTransition {
            role: DeviceRole::Ar,
            state: DeviceState::Offline,
            command: DeviceCommand::Start,
        };
        assert_eq!(err.to_string(), "AR cannot START from OFFLINE");
    }
}
