use std::sync::Arc;

use dmcs_core::{AuditStore, Config, MessageBus, Orchestrator, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    orchestrator: Orchestrator,
    bus: Arc<dyn MessageBus>,
    audit_store: Arc<dyn AuditStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        orchestrator: Orchestrator,
        bus: Arc<dyn MessageBus>,
        audit_store: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            bus,
            audit_store,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// The bus the orchestrator listens on.
    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }
}
