//! Roster of forwarders and their last known health and activity.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::metrics;
use crate::scoreboard::{Scoreboard, ScoreboardError};

const ROWS_KEY: &str = "FORWARDER_ROWS";

fn forwarder_key(name: &str) -> String {
    format!("FORWARDER:{}", name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Health {
    Healthy,
    Unhealthy,
    Unknown,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Healthy => "HEALTHY",
            Health::Unhealthy => "UNHEALTHY",
            Health::Unknown => "UNKNOWN",
        }
    }
}

impl FromStr for Health {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HEALTHY" => Ok(Health::Healthy),
            "UNHEALTHY" => Ok(Health::Unhealthy),
            "UNKNOWN" => Ok(Health::Unknown),
            other => Err(format!("unknown health: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForwarderState {
    Idle,
    Busy,
    AwaitingReadout,
    HealthCheck,
}

impl ForwarderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwarderState::Idle => "IDLE",
            ForwarderState::Busy => "BUSY",
            ForwarderState::AwaitingReadout => "AWAITING_READOUT",
            ForwarderState::HealthCheck => "HEALTH_CHECK",
        }
    }
}

impl fmt::Display for ForwarderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForwarderState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(ForwarderState::Idle),
            "BUSY" => Ok(ForwarderState::Busy),
            "AWAITING_READOUT" => Ok(ForwarderState::AwaitingReadout),
            "HEALTH_CHECK" => Ok(ForwarderState::HealthCheck),
            other => Err(format!("unknown forwarder state: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwarderRecord {
    pub name: String,
    pub consume_queue: String,
    pub health: Health,
    pub state: ForwarderState,
}

#[derive(Debug, Error)]
pub enum ForwarderError {
    #[error("forwarder {0} is not in the roster")]
    Unknown(String),

    #[error("corrupt forwarder record {name}: {message}")]
    Corrupt { name: String, message: String },

    #[error("forwarder store error: {0}")]
    Store(#[from] ScoreboardError),

    #[error("forwarder roster lock poisoned")]
    Poisoned,
}

/// Static forwarder roster backed by the scoreboard.
pub struct ForwarderRoster {
    store: Arc<dyn Scoreboard>,
    lock: Mutex<()>,
}

impl ForwarderRoster {
    /// Register `(name, consume_queue)` pairs as IDLE with unknown health. Existing
    /// rows are replaced.
    pub fn new(
        store: Arc<dyn Scoreboard>,
        forwarders: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ForwarderError> {
        store.delete(ROWS_KEY)?;
        for (name, queue) in forwarders {
            let key = forwarder_key(&name);
            store.delete(&key)?;
            store.set(&key, "NAME", &name)?;
            store.set(&key, "CONSUME_QUEUE", &queue)?;
            store.set(&key, "STATUS", Health::Unknown.as_str())?;
            store.set(&key, "STATE", ForwarderState::Idle.as_str())?;
            store.list_push(ROWS_KEY, &name)?;
        }
        Ok(Self {
            store,
            lock: Mutex::new(()),
        })
    }

    pub fn names(&self) -> Result<Vec<String>, ForwarderError> {
        Ok(self.store.list_range(ROWS_KEY, 0, -1)?)
    }

    pub fn get(&self, name: &str) -> Result<Option<ForwarderRecord>, ForwarderError> {
        let fields = self.store.get_all(&forwarder_key(name))?;
        if fields.is_empty() {
            return Ok(None);
        }
        let corrupt = |message: String| ForwarderError::Corrupt {
            name: name.to_string(),
            message,
        };
        Ok(Some(ForwarderRecord {
            name: name.to_string(),
            consume_queue: fields
                .get("CONSUME_QUEUE")
                .cloned()
                .ok_or_else(|| corrupt("missing CONSUME_QUEUE".into()))?,
            health: fields
                .get("STATUS")
                .map(|s| s.parse::<Health>())
                .transpose()
                .map_err(corrupt)?
                .unwrap_or(Health::Unknown),
            state: fields
                .get("STATE")
                .map(|s| s.parse::<ForwarderState>())
                .transpose()
                .map_err(corrupt)?
                .unwrap_or(ForwarderState::Idle),
        }))
    }

    /// Every forwarder in roster order.
    pub fn all(&self) -> Result<Vec<ForwarderRecord>, ForwarderError> {
        let mut records = Vec::new();
        for name in self.names()? {
            if let Some(record) = self.get(&name)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub fn consume_queue(&self, name: &str) -> Result<String, ForwarderError> {
        self.get(name)?
            .map(|r| r.consume_queue)
            .ok_or_else(|| ForwarderError::Unknown(name.to_string()))
    }

    pub fn set_state(&self, name: &str, state: ForwarderState) -> Result<(), ForwarderError> {
        self.set_field(name, "STATE", state.as_str())
    }

    pub fn set_states(&self, names: &[String], state: ForwarderState) -> Result<(), ForwarderError> {
        for name in names {
            self.set_state(name, state)?;
        }
        Ok(())
    }

    /// Move each named forwarder from `from` to `to`, leaving any forwarder in another
    /// state alone. Returns the names that moved.
    pub fn swap_states(
        &self,
        names: &[String],
        from: ForwarderState,
        to: ForwarderState,
    ) -> Result<Vec<String>, ForwarderError> {
        let _guard = self.lock.lock().map_err(|_| ForwarderError::Poisoned)?;
        let mut moved = Vec::new();
        for name in names {
            let key = forwarder_key(name);
            let Some(current) = self.store.get(&key, "STATE")? else {
                return Err(ForwarderError::Unknown(name.to_string()));
            };
            if current != from.as_str() {
                continue;
            }
            self.store.set(&key, "STATE", to.as_str())?;
            moved.push(name.clone());
        }
        debug!(?moved, from = %from, to = %to, "Forwarder states swapped");
        Ok(moved)
    }

    pub fn set_health(&self, name: &str, health: Health) -> Result<(), ForwarderError> {
        self.set_field(name, "STATUS", health.as_str())
    }

    /// Apply a health-check round: responders become HEALTHY, the rest UNHEALTHY.
    pub fn record_health_check(
        &self,
        checked: &[String],
        responders: &[String],
    ) -> Result<(), ForwarderError> {
        for name in checked {
            let health = if responders.contains(name) {
                Health::Healthy
            } else {
                Health::Unhealthy
            };
            self.set_health(name, health)?;
        }
        let healthy = self.healthy()?.len();
        metrics::HEALTHY_FORWARDERS.set(healthy as i64);
        Ok(())
    }

    /// Names of forwarders whose last health check succeeded, in roster order.
    pub fn healthy(&self) -> Result<Vec<String>, ForwarderError> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|r| r.health == Health::Healthy)
            .map(|r| r.name)
            .collect())
    }

    fn set_field(&self, name: &str, field: &str, value: &str) -> Result<(), ForwarderError> {
        let _guard = self.lock.lock().map_err(|_| ForwarderError::Poisoned)?;
        let key = forwarder_key(name);
        if self.store.get(&key, "NAME")?.is_none() {
            return Err(ForwarderError::Unknown(name.to_string()));
        }
        self.store.set(&key, field, value)?;
        debug!(forwarder = name, field, value, "Forwarder updated");
        Ok(())
    }
}
