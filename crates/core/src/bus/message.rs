//! Typed view of inbound envelopes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::envelope::{keys, Envelope};
use crate::device::{DeviceCommand, DeviceRole};

/// Message type tags exchanged with forwarders, the archive controller and OCS.
pub mod tags {
    pub const NEW_SESSION: &str = "NEW_SESSION";
    pub const NEXT_VISIT: &str = "NEXT_VISIT";
    pub const START_INTEGRATION: &str = "START_INTEGRATION";
    pub const END_READOUT: &str = "END_READOUT";
    pub const HEADER_READY: &str = "HEADER_READY";

    pub const FWDR_HEALTH_CHECK: &str = "FWDR_HEALTH_CHECK";
    pub const FWDR_XFER_PARAMS: &str = "FWDR_XFER_PARAMS";
    pub const FWDR_END_READOUT: &str = "FWDR_END_READOUT";
    pub const FWDR_HEADER_READY: &str = "FWDR_HEADER_READY";
    pub const ITEMS_XFERD: &str = "ITEMS_XFERD";

    pub const FWDR_HEALTH_CHECK_ACK: &str = "FWDR_HEALTH_CHECK_ACK";
    pub const FWDR_XFER_PARAMS_ACK: &str = "FWDR_XFER_PARAMS_ACK";
    pub const FWDR_END_READOUT_ACK: &str = "FWDR_END_READOUT_ACK";
    pub const ITEMS_XFERD_ACK: &str = "ITEMS_XFERD_ACK";

    pub const SUMMARY_STATE_EVENT: &str = "SUMMARY_STATE_EVENT";
    pub const SETTINGS_APPLIED_EVENT: &str = "SETTINGS_APPLIED_EVENT";
    pub const APPLIED_SETTINGS_MATCH_START_EVENT: &str = "APPLIED_SETTINGS_MATCH_START_EVENT";
    pub const ERROR_CODE_EVENT: &str = "ERROR_CODE_EVENT";

    /// Per-job reply to END_READOUT.
    pub const READOUT_ACK: &str = "READOUT_ACK";

    pub const ACK_SUFFIX: &str = "_ACK";
}

/// Malformed or unrecognised inbound messages. These are logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("envelope has no MSG_TYPE")]
    MissingType,

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("{msg_type} is missing required field {field}")]
    MissingField {
        msg_type: String,
        field: &'static str,
    },

    #[error("{msg_type} has invalid {field}: {reason}")]
    InvalidField {
        msg_type: String,
        field: &'static str,
        reason: String,
    },
}

/// Where and under which ack id a reply should be sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyTo {
    pub queue: Option<String>,
    pub ack_id: Option<String>,
}

impl ReplyTo {
    fn from_envelope(env: &Envelope) -> Self {
        Self {
            queue: env.get_string(keys::REPLY_QUEUE),
            ack_id: env.get_string(keys::ACK_ID),
        }
    }
}

/// Which fan-out request an ack answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckKind {
    HealthCheck,
    XferParams,
    EndReadout,
    ItemsXferd,
}

impl AckKind {
    /// Tag of the ack message itself; also the prefix of the ack ids issued for it.
    pub fn tag(&self) -> &'static str {
        match self {
            AckKind::HealthCheck => tags::FWDR_HEALTH_CHECK_ACK,
            AckKind::XferParams => tags::FWDR_XFER_PARAMS_ACK,
            AckKind::EndReadout => tags::FWDR_END_READOUT_ACK,
            AckKind::ItemsXferd => tags::ITEMS_XFERD_ACK,
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            tags::FWDR_HEALTH_CHECK_ACK => Some(AckKind::HealthCheck),
            tags::FWDR_XFER_PARAMS_ACK => Some(AckKind::XferParams),
            tags::FWDR_END_READOUT_ACK => Some(AckKind::EndReadout),
            tags::ITEMS_XFERD_ACK => Some(AckKind::ItemsXferd),
            _ => None,
        }
    }
}

/// An acknowledgment from a forwarder or the archive controller.
#[derive(Debug, Clone, PartialEq)]
pub struct AckMessage {
    pub kind: AckKind,
    pub ack_id: String,
    pub component: String,
    pub ack_bool: bool,
    pub envelope: Envelope,
}

/// Per-CCD transfer report carried as `RESULT_LIST`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultList {
    #[serde(rename = "CCD_LIST", default)]
    pub ccd_list: Vec<String>,
    #[serde(rename = "FILENAME_LIST", default)]
    pub filename_list: Vec<String>,
    #[serde(rename = "CHECKSUM_LIST", default)]
    pub checksum_list: Vec<String>,
    #[serde(rename = "RESULT_CODES", default)]
    pub result_codes: Vec<String>,
}

impl ResultList {
    /// Extract from an envelope. Absent yields `None`; present but malformed is an error.
    pub fn from_envelope(env: &Envelope) -> Result<Option<Self>, ProtocolError> {
        match env.get(keys::RESULT_LIST) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
                ProtocolError::InvalidField {
                    msg_type: env.msg_type().unwrap_or_default().to_string(),
                    field: keys::RESULT_LIST,
                    reason: e.to_string(),
                }
            }),
        }
    }

    /// Wire form, for embedding under `RESULT_LIST`.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "CCD_LIST": self.ccd_list,
            "FILENAME_LIST": self.filename_list,
            "CHECKSUM_LIST": self.checksum_list,
            "RESULT_CODES": self.result_codes,
        })
    }

    /// Pair each CCD with its code; missing codes read as an empty (successful) code.
    pub fn codes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.ccd_list.iter().enumerate().map(|(i, ccd)| {
            (
                ccd.as_str(),
                self.result_codes.get(i).map(String::as_str).unwrap_or(""),
            )
        })
    }
}

/// Every message the coordinator consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    NewSession {
        session_id: Option<String>,
        reply: ReplyTo,
    },
    NextVisit {
        visit_id: String,
        bore_sight: Option<String>,
        reply: ReplyTo,
    },
    StartIntegration {
        image_id: String,
        reply: ReplyTo,
    },
    EndReadout {
        image_id: String,
        reply: ReplyTo,
    },
    HeaderReady {
        image_id: String,
        header: Option<serde_json::Value>,
    },
    DeviceCommand {
        role: DeviceRole,
        command: DeviceCommand,
        cfg_key: Option<String>,
        reply: ReplyTo,
    },
    Ack(AckMessage),
}

fn required(env: &Envelope, msg_type: &str, field: &'static str) -> Result<String, ProtocolError> {
    env.get_string(field).ok_or_else(|| ProtocolError::MissingField {
        msg_type: msg_type.to_string(),
        field,
    })
}

impl InboundMessage {
    /// Exact-match dispatch on `MSG_TYPE`.
    pub fn parse(env: &Envelope) -> Result<Self, ProtocolError> {
        let msg_type = env.msg_type().ok_or(ProtocolError::MissingType)?;
        let reply = ReplyTo::from_envelope(env);

        match msg_type {
            tags::NEW_SESSION => Ok(Self::NewSession {
                session_id: env.get_string(keys::SESSION_ID),
                reply,
            }),
            tags::NEXT_VISIT => Ok(Self::NextVisit {
                visit_id: required(env, msg_type, keys::VISIT_ID)?,
                bore_sight: env.get_string(keys::BORE_SIGHT),
                reply,
            }),
            tags::START_INTEGRATION => Ok(Self::StartIntegration {
                image_id: required(env, msg_type, keys::IMAGE_ID)?,
                reply,
            }),
            tags::END_READOUT => Ok(Self::EndReadout {
                image_id: required(env, msg_type, keys::IMAGE_ID)?,
                reply,
            }),
            tags::HEADER_READY => Ok(Self::HeaderReady {
                image_id: required(env, msg_type, keys::IMAGE_ID)?,
                header: env.get(keys::HEADER_INFO).cloned(),
            }),
            other => {
                if let Some(kind) = AckKind::from_tag(other) {
                    return Ok(Self::Ack(AckMessage {
                        kind,
                        ack_id: required(env, msg_type, keys::ACK_ID)?,
                        component: required(env, msg_type, keys::COMPONENT)?,
                        ack_bool: env.get_bool(keys::ACK_BOOL).unwrap_or(false),
                        envelope: env.clone(),
                    }));
                }
                Self::parse_device_command(other, env, reply)
            }
        }
    }

    fn parse_device_command(
        msg_type: &str,
        env: &Envelope,
        reply: ReplyTo,
    ) -> Result<Self, ProtocolError> {
        let unknown = || ProtocolError::UnknownType(msg_type.to_string());
        let (role, command) = msg_type.split_once('_').ok_or_else(unknown)?;
        let role: DeviceRole = role.parse().map_err(|_| unknown())?;
        let command: DeviceCommand = command.parse().map_err(|_| unknown())?;
        Ok(Self::DeviceCommand {
            role,
            command,
            cfg_key: env.get_string(keys::CFG_KEY),
            reply,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_start_integration() {
        let env = Envelope::new(tags::START_INTEGRATION)
            .with(keys::IMAGE_ID, "IMG_1")
            .with(keys::REPLY_QUEUE, "ocs_publish")
            .with(keys::ACK_ID, "START_INT_ACK_000001");

        match InboundMessage::parse(&env).unwrap() {
            InboundMessage::StartIntegration { image_id, reply } => {
                assert_eq!(image_id, "IMG_1");
                assert_eq!(reply.queue.as_deref(), Some("ocs_publish"));
                assert_eq!(reply.ack_id.as_deref(), Some("START_INT_ACK_000001"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_device_command() {
        let env = Envelope::new("AR_ENTER_CONTROL");
        assert_eq!(
            InboundMessage::parse(&env).unwrap(),
            InboundMessage::DeviceCommand {
                role: DeviceRole::Ar,
                command: DeviceCommand::EnterControl,
                cfg_key: None,
                reply: ReplyTo::default(),
            }
        );
    }

    #[test]
    fn test_parse_ack() {
        let env = Envelope::new(tags::FWDR_HEALTH_CHECK_ACK)
            .with(keys::ACK_ID, "FWDR_HEALTH_CHECK_ACK_000004")
            .with(keys::COMPONENT, "F1")
            .with(keys::ACK_BOOL, "True");
        match InboundMessage::parse(&env).unwrap() {
            InboundMessage::Ack(ack) => {
                assert_eq!(ack.kind, AckKind::HealthCheck);
                assert_eq!(ack.component, "F1");
                assert!(ack.ack_bool);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type() {
        for tag in ["BOGUS", "XX_ENABLE", "AR_LAUNCH"] {
            assert_eq!(
                InboundMessage::parse(&Envelope::new(tag)),
                Err(ProtocolError::UnknownType(tag.to_string()))
            );
        }
        assert_eq!(
            InboundMessage::parse(&Envelope::default()),
            Err(ProtocolError::MissingType)
        );
    }

    #[test]
    fn test_missing_field() {
        let err = InboundMessage::parse(&Envelope::new(tags::END_READOUT)).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MissingField {
                field: keys::IMAGE_ID,
                ..
            }
        ));
    }

    #[test]
    fn test_result_list() {
        let env = Envelope::new(tags::FWDR_END_READOUT_ACK).with(
            keys::RESULT_LIST,
            json!({
                "CCD_LIST": ["R01/S00", "R01/S01"],
                "FILENAME_LIST": ["a.fits", "b.fits"],
                "CHECKSUM_LIST": ["x", "y"],
                "RESULT_CODES": ["", "bad checksum"]
            }),
        );
        let list = ResultList::from_envelope(&env).unwrap().unwrap();
        let codes: Vec<_> = list.codes().collect();
        assert_eq!(codes, vec![("R01/S00", ""), ("R01/S01", "bad checksum")]);

        let bad = Envelope::new("X").with(keys::RESULT_LIST, "nope");
        assert!(ResultList::from_envelope(&bad).is_err());
        assert_eq!(ResultList::from_envelope(&Envelope::new("X")).unwrap(), None);
    }
}
