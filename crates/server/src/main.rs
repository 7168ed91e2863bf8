use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dmcs_core::{
    create_audit_system, load_config, testing::spawn_simulators, validate_config, AuditEvent,
    AuditStore, InMemoryBus, MessageBus, Orchestrator, Scoreboard, SqliteAuditStore,
    SqliteScoreboard,
};

use dmcs_server::api::create_router;
use dmcs_server::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

/// How long to wait for the audit writer to drain on shutdown.
const AUDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("DMCS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    info!(
        devices = config.devices.len(),
        forwarders = config.forwarders.len(),
        rafts = config.layout.rafts.len(),
        "Configuration loaded"
    );
    info!("Database path: {:?}", config.database.path);

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    let scoreboard: Arc<dyn Scoreboard> = Arc::new(
        SqliteScoreboard::new(&config.database.path).context("Failed to open scoreboard")?,
    );
    let audit_store: Arc<dyn AuditStore> = Arc::new(
        SqliteAuditStore::new(&config.database.path).context("Failed to create audit store")?,
    );
    info!("Scoreboard and audit store initialized");

    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(audit_writer.run());

    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;

    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::default());

    if config.simulation.enabled {
        let handles = spawn_simulators(&config, Arc::clone(&bus))
            .await
            .context("Failed to start simulated forwarders")?;
        warn!(
            workers = handles.len(),
            "Simulation enabled: forwarders and archive are in-process doubles"
        );
    }

    let orchestrator = Orchestrator::new(
        &config,
        scoreboard,
        Arc::clone(&bus),
        Some(audit_handle.clone()),
    )
    .context("Failed to build orchestrator")?;
    orchestrator
        .start()
        .await
        .context("Failed to start orchestrator")?;
    info!("Orchestrator started");

    let state = Arc::new(AppState::new(
        config.clone(),
        orchestrator.clone(),
        Arc::clone(&bus),
        audit_store,
    ));
    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Stopping orchestrator...");
    orchestrator.stop().await;

    info!("Server shutting down...");
    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // The writer exits once every AuditHandle clone is gone.
    drop(orchestrator);
    drop(audit_handle);

    if tokio::time::timeout(AUDIT_DRAIN_TIMEOUT, writer_handle)
        .await
        .is_err()
    {
        warn!("Audit writer did not drain in time");
    } else {
        info!("Audit writer stopped");
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
