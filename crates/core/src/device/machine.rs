//! Device lifecycle state machine.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use super::types::{
    Applied, Device, DeviceCommand, DeviceError, DeviceRole, DeviceState, StateNotification,
};
use crate::metrics;
use crate::scoreboard::Scoreboard;

/// Error code announced when a device is faulted by command.
pub const COMMANDED_FAULT_CODE: i64 = 1;

/// Allowed `(state, command) -> state` moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionTable {
    moves: HashMap<(DeviceState, DeviceCommand), DeviceState>,
}

impl TransitionTable {
    /// The standard commandable-component lifecycle.
    pub fn standard() -> Self {
        use DeviceCommand as C;
        use DeviceState as S;

        let mut moves = HashMap::new();
        moves.insert((S::Offline, C::EnterControl), S::Standby);
        moves.insert((S::Standby, C::Start), S::Disabled);
        moves.insert((S::Disabled, C::Enable), S::Enabled);
        moves.insert((S::Enabled, C::Disable), S::Disabled);
        moves.insert((S::Disabled, C::Standby), S::Standby);
        moves.insert((S::Standby, C::ExitControl), S::Offline);
        moves.insert((S::Enabled, C::Abort), S::Enabled);
        moves.insert((S::Enabled, C::Stop), S::Enabled);
        moves.insert((S::Fault, C::Standby), S::Standby);
        for state in [S::Offline, S::Standby, S::Disabled, S::Enabled, S::Fault] {
            moves.insert((state, C::Fault), S::Fault);
        }
        Self { moves }
    }

    pub fn empty() -> Self {
        Self {
            moves: HashMap::new(),
        }
    }

    /// Add or replace one move.
    pub fn allow(mut self, from: DeviceState, command: DeviceCommand, to: DeviceState) -> Self {
        self.moves.insert((from, command), to);
        self
    }

    pub fn target(&self, from: DeviceState, command: DeviceCommand) -> Option<DeviceState> {
        self.moves.get(&(from, command)).copied()
    }
}

impl Default for TransitionTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Static description of a device, taken from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    pub role: DeviceRole,
    pub consume_queue: String,
    pub config_keys: Vec<String>,
    pub forwarders: Vec<String>,
}

fn store_key(role: DeviceRole) -> String {
    format!("DEVICE:{}", role)
}

/// Owns every configured device and validates commands against a [`TransitionTable`].
pub struct DeviceStateMachine {
    store: Arc<dyn Scoreboard>,
    table: TransitionTable,
    devices: Mutex<BTreeMap<DeviceRole, Device>>,
}

impl DeviceStateMachine {
    /// Bootstrap every device in OFFLINE and persist that state.
    pub fn new(
        store: Arc<dyn Scoreboard>,
        table: TransitionTable,
        specs: Vec<DeviceSpec>,
    ) -> Result<Self, DeviceError> {
        let mut devices = BTreeMap::new();
        for spec in specs {
            let key = store_key(spec.role);
            store.set(&key, "STATE", DeviceState::Offline.as_str())?;
            store.set(&key, "CONSUME_QUEUE", &spec.consume_queue)?;
            devices.insert(
                spec.role,
                Device {
                    role: spec.role,
                    state: DeviceState::Offline,
                    cfg_key: None,
                    consume_queue: spec.consume_queue,
                    config_keys: spec.config_keys,
                    forwarders: spec.forwarders,
                },
            );
        }
        Ok(Self {
            store,
            table,
            devices: Mutex::new(devices),
        })
    }

    /// Validate `command` against the current state and, on success, persist the
    /// new state. A rejected command leaves the device untouched.
    pub fn apply(
        &self,
        role: DeviceRole,
        command: DeviceCommand,
        cfg_key: Option<&str>,
    ) -> Result<Applied, DeviceError> {
        let mut devices = self.devices.lock().map_err(|_| DeviceError::Poisoned)?;
        let device = devices
            .get_mut(&role)
            .ok_or(DeviceError::UnknownDevice(role))?;

        let result = self.transition(device, command, cfg_key);
        let label = if result.is_ok() { "accepted" } else { "rejected" };
        metrics::DEVICE_COMMANDS
            .with_label_values(&[role.as_str(), command.as_str(), label])
            .inc();

        match &result {
            Ok(applied) => info!(
                device = %role,
                command = %command,
                "{} -> {}",
                applied.previous,
                applied.current
            ),
            Err(e) => warn!(device = %role, command = %command, "Rejected: {}", e),
        }
        result
    }

    fn transition(
        &self,
        device: &mut Device,
        command: DeviceCommand,
        cfg_key: Option<&str>,
    ) -> Result<Applied, DeviceError> {
        let role = device.role;
        let previous = device.state;
        let current =
            self.table
                .target(previous, command)
                .ok_or(DeviceError::IllegalTransition {
                    role,
                    state: previous,
                    command,
                })?;

        let applied_key = if command == DeviceCommand::Start {
            match cfg_key {
                Some(key) if device.config_keys.iter().any(|k| k == key) => Some(key.to_string()),
                Some(key) => {
                    return Err(DeviceError::UnknownConfigKey {
                        role,
                        key: key.to_string(),
                    })
                }
                None => device.config_keys.first().cloned(),
            }
        } else {
            device.cfg_key.clone()
        };

        let key = store_key(role);
        self.store.set(&key, "STATE", current.as_str())?;
        if command == DeviceCommand::Start {
            self.store
                .set(&key, "CFG_KEY", applied_key.as_deref().unwrap_or(""))?;
        }
        device.state = current;
        device.cfg_key = applied_key;

        let mut notifications = Vec::new();
        if current != previous {
            notifications.push(StateNotification::SummaryState {
                role,
                state: current,
            });
        }
        if command == DeviceCommand::Start {
            notifications.push(StateNotification::SettingsApplied {
                role,
                settings: device.cfg_key.clone(),
            });
            notifications.push(StateNotification::AppliedSettingsMatchStart {
                role,
                applied: true,
            });
        }
        if command == DeviceCommand::Fault {
            notifications.push(StateNotification::ErrorCode {
                role,
                code: COMMANDED_FAULT_CODE,
            });
        }

        Ok(Applied {
            role,
            command,
            previous,
            current,
            notifications,
        })
    }

    pub fn state(&self, role: DeviceRole) -> Option<DeviceState> {
        self.devices.lock().ok()?.get(&role).map(|d| d.state)
    }

    pub fn device(&self, role: DeviceRole) -> Option<Device> {
        self.devices.lock().ok()?.get(&role).cloned()
    }

    /// Every configured device in role order.
    pub fn devices(&self) -> Vec<Device> {
        self.devices
            .lock()
            .map(|d| d.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Devices currently ENABLED, in role order.
    pub fn enabled_devices(&self) -> Vec<Device> {
        self.devices()
            .into_iter()
            .filter(|d| d.state == DeviceState::Enabled)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoreboard::MemoryScoreboard;

    use DeviceCommand as C;
    use DeviceState as S;

    fn machine() -> (Arc<MemoryScoreboard>, DeviceStateMachine) {
        let store = Arc::new(MemoryScoreboard::new());
        let specs = vec![
            DeviceSpec {
                role: DeviceRole::Ar,
                consume_queue: "ar_foreman_consume".into(),
                config_keys: vec!["normal".into(), "engineering".into()],
                forwarders: vec!["F1".into()],
            },
            DeviceSpec {
                role: DeviceRole::Pp,
                consume_queue: "pp_foreman_consume".into(),
                config_keys: vec![],
                forwarders: vec!["F2".into()],
            },
        ];
        let machine =
            DeviceStateMachine::new(store.clone(), TransitionTable::standard(), specs).unwrap();
        (store, machine)
    }

    fn drive(machine: &DeviceStateMachine, role: DeviceRole, commands: &[DeviceCommand]) {
        for command in commands {
            machine.apply(role, *command, None).unwrap();
        }
    }

    #[test]
    fn test_bootstraps_offline() {
        let (store, machine) = machine();
        assert_eq!(machine.state(DeviceRole::Ar), Some(S::Offline));
        assert_eq!(
            store.get("DEVICE:AR", "STATE").unwrap().as_deref(),
            Some("OFFLINE")
        );
        assert_eq!(machine.state(DeviceRole::At), None);
    }

    #[test]
    fn test_offline_rejects_start() {
        let (store, machine) = machine();
        let err = machine.apply(DeviceRole::Ar, C::Start, None).unwrap_err();
        assert!(matches!(err, DeviceError::IllegalTransition { .. }));
        assert_eq!(machine.state(DeviceRole::Ar), Some(S::Offline));
        assert_eq!(
            store.get("DEVICE:AR", "STATE").unwrap().as_deref(),
            Some("OFFLINE")
        );
    }

    #[test]
    fn test_enter_control_goes_to_standby() {
        let (store, machine) = machine();
        let applied = machine.apply(DeviceRole::Ar, C::EnterControl, None).unwrap();
        assert_eq!(applied.previous, S::Offline);
        assert_eq!(applied.current, S::Standby);
        assert_eq!(
            applied.notifications,
            vec![StateNotification::SummaryState {
                role: DeviceRole::Ar,
                state: S::Standby
            }]
        );
        assert_eq!(
            store.get("DEVICE:AR", "STATE").unwrap().as_deref(),
            Some("STANDBY")
        );
    }

    #[test]
    fn test_full_lifecycle() {
        let (_, machine) = machine();
        drive(
            &machine,
            DeviceRole::Ar,
            &[C::EnterControl, C::Start, C::Enable, C::Disable, C::Standby, C::ExitControl],
        );
        assert_eq!(machine.state(DeviceRole::Ar), Some(S::Offline));
    }

    #[test]
    fn test_fault_from_any_state() {
        let prefixes: [&[DeviceCommand]; 4] = [
            &[],
            &[C::EnterControl],
            &[C::EnterControl, C::Start],
            &[C::EnterControl, C::Start, C::Enable],
        ];
        for prefix in prefixes {
            let (_, machine) = machine();
            drive(&machine, DeviceRole::Ar, prefix);
            let applied = machine.apply(DeviceRole::Ar, C::Fault, None).unwrap();
            assert_eq!(applied.current, S::Fault);
            assert!(applied.notifications.contains(&StateNotification::ErrorCode {
                role: DeviceRole::Ar,
                code: COMMANDED_FAULT_CODE
            }));
        }
    }

    #[test]
    fn test_recovery_from_fault() {
        let (_, machine) = machine();
        drive(&machine, DeviceRole::Ar, &[C::Fault, C::Standby]);
        assert_eq!(machine.state(DeviceRole::Ar), Some(S::Standby));
    }

    #[test]
    fn test_start_notifications_and_default_key() {
        let (store, machine) = machine();
        drive(&machine, DeviceRole::Ar, &[C::EnterControl]);
        let applied = machine.apply(DeviceRole::Ar, C::Start, None).unwrap();
        assert_eq!(applied.notifications.len(), 3);
        assert_eq!(
            machine.device(DeviceRole::Ar).unwrap().cfg_key.as_deref(),
            Some("normal")
        );
        assert_eq!(
            store.get("DEVICE:AR", "CFG_KEY").unwrap().as_deref(),
            Some("normal")
        );
    }

    #[test]
    fn test_start_with_unknown_key_is_rejected() {
        let (_, machine) = machine();
        drive(&machine, DeviceRole::Ar, &[C::EnterControl]);
        let err = machine
            .apply(DeviceRole::Ar, C::Start, Some("bogus"))
            .unwrap_err();
        assert!(matches!(err, DeviceError::UnknownConfigKey { .. }));
        assert_eq!(machine.state(DeviceRole::Ar), Some(S::Standby));

        machine
            .apply(DeviceRole::Ar, C::Start, Some("engineering"))
            .unwrap();
        assert_eq!(
            machine.device(DeviceRole::Ar).unwrap().cfg_key.as_deref(),
            Some("engineering")
        );
    }

    #[test]
    fn test_abort_and_stop_emit_nothing() {
        let (_, machine) = machine();
        drive(&machine, DeviceRole::Ar, &[C::EnterControl, C::Start, C::Enable]);
        for command in [C::Abort, C::Stop] {
            let applied = machine.apply(DeviceRole::Ar, command, None).unwrap();
            assert_eq!(applied.current, S::Enabled);
            assert!(applied.notifications.is_empty());
        }
        assert!(machine.apply(DeviceRole::Pp, C::Abort, None).is_err());
    }

    #[test]
    fn test_unknown_device() {
        let (_, machine) = machine();
        assert!(matches!(
            machine.apply(DeviceRole::Cu, C::EnterControl, None),
            Err(DeviceError::UnknownDevice(DeviceRole::Cu))
        ));
    }

    #[test]
    fn test_enabled_devices_in_role_order() {
        let (_, machine) = machine();
        drive(&machine, DeviceRole::Pp, &[C::EnterControl, C::Start, C::Enable]);
        drive(&machine, DeviceRole::Ar, &[C::EnterControl, C::Start, C::Enable]);
        let roles: Vec<DeviceRole> = machine.enabled_devices().iter().map(|d| d.role).collect();
        assert_eq!(roles, vec![DeviceRole::Ar, DeviceRole::Pp]);
    }

    #[test]
    fn test_custom_table() {
        let store = Arc::new(MemoryScoreboard::new());
        let table = TransitionTable::empty().allow(S::Offline, C::Enable, S::Enabled);
        let machine = DeviceStateMachine::new(
            store,
            table,
            vec![DeviceSpec {
                role: DeviceRole::At,
                consume_queue: "at_consume".into(),
                config_keys: vec![],
                forwarders: vec![],
            }],
        )
        .unwrap();
        assert!(machine.apply(DeviceRole::At, C::EnterControl, None).is_err());
        assert!(machine.apply(DeviceRole::At, C::Enable, None).is_ok());
    }
}
