use std::collections::HashSet;

use super::{types::Config, ConfigError};

fn invalid(message: impl Into<String>) -> Result<(), ConfigError> {
    Err(ConfigError::ValidationError(message.into()))
}

/// Semantic checks that serde cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return invalid("server.port cannot be 0");
    }
    if config.acks.ceiling == 0 {
        return invalid("acks.ceiling must be at least 1");
    }
    if config.devices.is_empty() {
        return invalid("at least one device must be configured");
    }
    if config.forwarders.is_empty() {
        return invalid("at least one forwarder must be configured");
    }

    let orch = &config.orchestrator;
    for (name, value) in [
        ("health_check_timeout_ms", orch.health_check_timeout_ms),
        ("xfer_params_timeout_ms", orch.xfer_params_timeout_ms),
        ("readout_timeout_ms", orch.readout_timeout_ms),
    ] {
        if value == 0 {
            return invalid(format!("orchestrator.{} cannot be 0", name));
        }
    }
    if orch.publish_attempts == 0 {
        return invalid("orchestrator.publish_attempts must be at least 1");
    }
    if let Some(archive) = &config.archive {
        if archive.timeout_ms == 0 {
            return invalid("archive.timeout_ms cannot be 0");
        }
    }

    let mut forwarder_names = HashSet::new();
    let mut queues = HashSet::new();
    for forwarder in &config.forwarders {
        if !forwarder_names.insert(forwarder.name.as_str()) {
            return invalid(format!("duplicate forwarder name {}", forwarder.name));
        }
        if !queues.insert(forwarder.consume_queue.as_str()) {
            return invalid(format!("duplicate queue {}", forwarder.consume_queue));
        }
    }

    let mut roles = HashSet::new();
    for device in &config.devices {
        if !roles.insert(device.role) {
            return invalid(format!("device {} configured twice", device.role));
        }
        if !queues.insert(device.consume_queue.as_str()) {
            return invalid(format!("duplicate queue {}", device.consume_queue));
        }
        for name in &device.forwarders {
            if !forwarder_names.contains(name.as_str()) {
                return invalid(format!(
                    "device {} references unknown forwarder {}",
                    device.role, name
                ));
            }
        }
    }

    for queue in [&orch.command_queue, &orch.ack_queue] {
        if !queues.insert(queue.as_str()) {
            return invalid(format!("duplicate queue {}", queue));
        }
    }

    let mut units = HashSet::new();
    for raft in &config.layout.rafts {
        for ccd in &raft.ccds {
            if !units.insert((raft.raft.as_str(), ccd.as_str())) {
                return invalid(format!("duplicate CCD {}/{} in layout", raft.raft, ccd));
            }
        }
    }

    Ok(())
}
