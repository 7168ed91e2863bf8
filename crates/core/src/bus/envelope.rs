//! Flat key/value message envelope.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known envelope keys.
pub mod keys {
    pub const MSG_TYPE: &str = "MSG_TYPE";
    pub const ACK_ID: &str = "ACK_ID";
    pub const ACK_BOOL: &str = "ACK_BOOL";
    pub const ACK_STATEMENT: &str = "ACK_STATEMENT";
    pub const COMPONENT: &str = "COMPONENT";
    pub const JOB_NUM: &str = "JOB_NUM";
    pub const IMAGE_ID: &str = "IMAGE_ID";
    pub const VISIT_ID: &str = "VISIT_ID";
    pub const SESSION_ID: &str = "SESSION_ID";
    pub const REPLY_QUEUE: &str = "REPLY_QUEUE";
    pub const RESULT_LIST: &str = "RESULT_LIST";
    pub const XFER_PARAMS: &str = "XFER_PARAMS";
    pub const CFG_KEY: &str = "CFG_KEY";
    pub const BORE_SIGHT: &str = "BORE_SIGHT";
    pub const HEADER_INFO: &str = "HEADER_INFO";
    pub const DEVICE: &str = "DEVICE";
    pub const CURRENT_STATE: &str = "CURRENT_STATE";
    pub const SETTINGS: &str = "SETTINGS";
    pub const APPLIED: &str = "APPLIED";
    pub const ERROR_CODE: &str = "ERROR_CODE";
}

/// A message on the bus: a flat map from upper-case keys to JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Envelope(BTreeMap<String, Value>);

impl Envelope {
    pub fn new(msg_type: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(keys::MSG_TYPE.to_string(), Value::String(msg_type.into()));
        Self(map)
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Read a value as a string, rendering numbers and booleans.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Read a boolean, accepting the legacy string spellings.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            Value::Number(n) => n.as_i64().map(|v| v != 0),
            _ => None,
        }
    }

    pub fn msg_type(&self) -> Option<&str> {
        self.get_str(keys::MSG_TYPE)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<BTreeMap<String, Value>> for Envelope {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_and_accessors() {
        let env = Envelope::new("FWDR_HEALTH_CHECK")
            .with(keys::ACK_ID, "FWDR_HEALTH_CHECK_ACK_000001")
            .with(keys::ACK_BOOL, "True")
            .with(keys::IMAGE_ID, 42);

        assert_eq!(env.msg_type(), Some("FWDR_HEALTH_CHECK"));
        assert_eq!(env.get_bool(keys::ACK_BOOL), Some(true));
        assert_eq!(env.get_string(keys::IMAGE_ID).as_deref(), Some("42"));
        assert_eq!(env.get_str(keys::IMAGE_ID), None);
    }

    #[test]
    fn test_serializes_flat() {
        let env = Envelope::new("NEXT_VISIT").with(keys::VISIT_ID, "V1");
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value, json!({"MSG_TYPE": "NEXT_VISIT", "VISIT_ID": "V1"}));

        let back: Envelope = serde_json::from_value(value).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn test_bool_spellings() {
        let env = Envelope::new("X")
            .with("A", false)
            .with("B", "no")
            .with("C", 1)
            .with("D", "maybe");
        assert_eq!(env.get_bool("A"), Some(false));
        assert_eq!(env.get_bool("B"), Some(false));
        assert_eq!(env.get_bool("C"), Some(true));
        assert_eq!(env.get_bool("D"), None);
    }
}
