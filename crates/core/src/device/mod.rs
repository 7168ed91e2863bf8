//! Commandable devices and their lifecycle.

mod machine;
mod types;

pub use machine::{DeviceSpec, DeviceStateMachine, TransitionTable, COMMANDED_FAULT_CODE};
pub use types::{
    Applied, Device, DeviceCommand, DeviceError, DeviceRole, DeviceState, StateNotification,
};
