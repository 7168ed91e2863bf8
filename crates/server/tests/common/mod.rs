//! Common test utilities for in-process API testing.
//!
//! The fixture wires the real router to a running orchestrator over an in-memory bus,
//! with simulated forwarders answering on their queues and SQLite stores in a temp dir.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use dmcs_core::{
    create_audit_system, testing::spawn_simulators, AuditStore, Config, InMemoryBus, MessageBus,
    Orchestrator, SqliteAuditStore, SqliteScoreboard,
};
use dmcs_server::state::AppState;

pub use dmcs_core::testing::fixtures;

/// In-process server over a live orchestrator.
///
/// # Example
///
/// ```rust,ignore
/// let fixture = TestFixture::new().await;
/// let response = fixture.get("/api/v1/devices").await;
/// assert_eq!(response.status, StatusCode::OK);
/// ```
pub struct TestFixture {
    pub router: Router,
    pub orchestrator: Orchestrator,
    pub bus: Arc<InMemoryBus>,
    pub config: Config,
    /// Holds the database and session file.
    pub temp_dir: TempDir,
}

#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Build a fixture after letting the caller adjust the config.
    pub async fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = fixtures::config_with_session_file(temp_dir.path().join("session.toml"));
        config.database.path = temp_dir.path().join("dmcs.db");
        customize(&mut config);

        let scoreboard = Arc::new(
            SqliteScoreboard::new(&config.database.path).expect("Failed to open scoreboard"),
        );
        let audit_store: Arc<dyn AuditStore> = Arc::new(
            SqliteAuditStore::new(&config.database.path).expect("Failed to create audit store"),
        );
        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);
        tokio::spawn(audit_writer.run());

        let bus = Arc::new(InMemoryBus::default());
        let dyn_bus: Arc<dyn MessageBus> = bus.clone();
        spawn_simulators(&config, Arc::clone(&dyn_bus))
            .await
            .expect("Failed to spawn simulators");

        let orchestrator = Orchestrator::new(
            &config,
            scoreboard,
            Arc::clone(&dyn_bus),
            Some(audit_handle),
        )
        .expect("Failed to build orchestrator");
        orchestrator.start().await.expect("Failed to start orchestrator");

        let state = Arc::new(AppState::new(
            config.clone(),
            orchestrator.clone(),
            dyn_bus,
            audit_store,
        ));
        let router = dmcs_server::api::create_router(state);

        Self {
            router,
            orchestrator,
            bus,
            config,
            temp_dir,
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// GET returning the raw body text (for `/metrics`).
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }

    /// Poll `path` until `check` accepts the body or two seconds pass.
    pub async fn wait_for(&self, path: &str, check: impl Fn(&Value) -> bool) -> Value {
        let start = Instant::now();
        loop {
            let response = self.get(path).await;
            if check(&response.body) {
                return response.body;
            }
            if start.elapsed() > Duration::from_secs(2) {
                panic!("Timed out waiting on {}: last body {}", path, response.body);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Drive the fixture's devices to ENABLE and open session `session_id`.
    pub async fn ready(&self, session_id: &str) {
        for role in [dmcs_core::DeviceRole::Ar, dmcs_core::DeviceRole::Pp] {
            for command in fixtures::enable_sequence(role) {
                self.orchestrator
                    .handle_message(command)
                    .await
                    .expect("Failed to enable device");
            }
        }
        self.orchestrator
            .handle_message(fixtures::new_session(session_id))
            .await
            .expect("Failed to open session");
    }

    pub async fn shutdown(&self) {
        self.orchestrator.stop().await;
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
