//! HTTP surface tests against a live in-process orchestrator.

mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};

use common::TestFixture;

fn jobs_in_state(body: &Value, state: &str) -> usize {
    body["jobs"]
        .as_array()
        .map(|jobs| jobs.iter().filter(|j| j["state"] == state).count())
        .unwrap_or(0)
}

// =============================================================================
// Health, config, status
// =============================================================================

#[tokio::test]
async fn test_health() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/health").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_config_is_sanitized_summary() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/config").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["rafts"], 2);
    assert_eq!(response.body["ccds"], 4);
    assert_eq!(response.body["archive_configured"], false);
    assert_eq!(response.body["devices"].as_array().unwrap().len(), 2);
    assert_eq!(response.body["orchestrator"]["command_queue"], "dmcs_consume");
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_status_reports_running_orchestrator() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/status").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["running"], true);
    assert_eq!(response.body["backlog_depth"], 0);
    assert!(response.body["session_id"].is_null());
    fixture.shutdown().await;
}

// =============================================================================
// Devices and forwarders
// =============================================================================

#[tokio::test]
async fn test_devices_start_offline() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/devices").await;

    assert_status!(response, StatusCode::OK);
    let devices = response.body.as_array().unwrap();
    assert_eq!(devices.len(), 2);
    assert!(devices.iter().all(|d| d["state"] == "OFFLINE"));
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_get_device_by_role() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/devices/pp").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["role"], "PP");
    assert_eq!(response.body["forwarders"], json!(["F3"]));
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_unconfigured_device_is_not_found() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/devices/CU").await;

    assert_status!(response, StatusCode::NOT_FOUND);
    assert!(response.body["error"].as_str().unwrap().contains("CU"));
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_unknown_role_is_bad_request() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/devices/XX").await;

    assert_status!(response, StatusCode::BAD_REQUEST);
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_forwarders_listed_with_unknown_health() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/forwarders").await;

    assert_status!(response, StatusCode::OK);
    let forwarders = response.body.as_array().unwrap();
    assert_eq!(forwarders.len(), 3);
    assert!(forwarders.iter().all(|f| f["health"] == "UNKNOWN"));
    assert!(forwarders.iter().all(|f| f["state"] == "IDLE"));
    fixture.shutdown().await;
}

// =============================================================================
// Publishing onto the bus
// =============================================================================

#[tokio::test]
async fn test_publish_requires_msg_type() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post("/api/v1/queues/dmcs_consume", json!({ "IMAGE_ID": "IMG_1" }))
        .await;

    assert_status!(response, StatusCode::BAD_REQUEST);
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_published_device_command_is_applied() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/queues/dmcs_consume",
            json!({ "MSG_TYPE": "AR_ENTER_CONTROL", "ACK_ID": "AR_1" }),
        )
        .await;

    assert_status!(response, StatusCode::ACCEPTED);
    assert_eq!(response.body["msg_type"], "AR_ENTER_CONTROL");

    fixture
        .wait_for("/api/v1/devices/AR", |body| body["state"] == "STANDBY")
        .await;
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_publish_to_stopped_consumer_is_unavailable() {
    let fixture = TestFixture::new().await;
    fixture.shutdown().await;

    let response = fixture
        .post(
            "/api/v1/queues/dmcs_consume",
            json!({ "MSG_TYPE": "AR_ENTER_CONTROL" }),
        )
        .await;

    assert_status!(response, StatusCode::SERVICE_UNAVAILABLE);
}

// =============================================================================
// Jobs and backlog
// =============================================================================

#[tokio::test]
async fn test_jobs_empty_without_session() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/jobs").await;

    assert_status!(response, StatusCode::OK);
    assert!(response.body["session_id"].is_null());
    assert_eq!(response.body["jobs"], json!([]));
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/jobs/9_9").await;

    assert_status!(response, StatusCode::NOT_FOUND);
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_image_round_trip_over_http() {
    let fixture = TestFixture::new().await;
    fixture.ready("4").await;

    fixture
        .post(
            "/api/v1/queues/dmcs_consume",
            json!({ "MSG_TYPE": "START_INTEGRATION", "IMAGE_ID": "IMG_1", "ACK_ID": "SI_1" }),
        )
        .await;
    fixture
        .wait_for("/api/v1/jobs", |body| jobs_in_state(body, "TAKE_IMAGES") == 2)
        .await;

    fixture
        .post(
            "/api/v1/queues/dmcs_consume",
            json!({ "MSG_TYPE": "END_READOUT", "IMAGE_ID": "IMG_1", "ACK_ID": "ER_1" }),
        )
        .await;
    let body = fixture
        .wait_for("/api/v1/jobs?image=IMG_1", |body| {
            jobs_in_state(body, "COMPLETE") == 2
        })
        .await;
    assert_eq!(body["session_id"], "4");

    let job = fixture.get("/api/v1/jobs/4_1").await;
    assert_status!(job, StatusCode::OK);
    assert_eq!(job.body["device"], "AR");
    assert_eq!(job.body["results"].as_object().unwrap().len(), 4);

    let status = fixture.get("/api/v1/status").await;
    assert_eq!(status.body["images"]["IMG_1"], "COMPLETE");

    let forwarders = fixture.get("/api/v1/forwarders").await;
    assert!(forwarders
        .body
        .as_array()
        .unwrap()
        .iter()
        .all(|f| f["health"] == "HEALTHY"));

    fixture.shutdown().await;
}

#[tokio::test]
async fn test_failed_units_show_in_backlog() {
    let fixture = TestFixture::with_config(|config| {
        config.simulation.failing_units = vec!["R00/S01".to_string()];
        config.simulation.failure_code = Some("BAD_CHECKSUM".to_string());
    })
    .await;
    fixture.ready("6").await;

    fixture
        .orchestrator
        .handle_message(common::fixtures::start_integration("IMG_2"))
        .await
        .unwrap();
    fixture
        .orchestrator
        .handle_message(common::fixtures::end_readout("IMG_2"))
        .await
        .unwrap();

    let backlog = fixture.get("/api/v1/backlog").await;
    assert_status!(backlog, StatusCode::OK);
    let entries = backlog.body.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e["units"] == json!(["R00/S01"])));
    assert!(entries.iter().all(|e| e["reason"] == "transfer_failed"));

    let stats = fixture.get("/api/v1/backlog/stats").await;
    assert_eq!(stats.body["entries"], 2);
    assert_eq!(stats.body["units"], 2);

    fixture.shutdown().await;
}

#[tokio::test]
async fn test_retry_on_empty_backlog() {
    let fixture = TestFixture::new().await;

    let response = fixture.post_empty("/api/v1/backlog/retry").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["outcome"], "empty");
    fixture.shutdown().await;
}

// =============================================================================
// Audit and metrics
// =============================================================================

#[tokio::test]
async fn test_audit_query_by_device() {
    let fixture = TestFixture::new().await;
    fixture.ready("8").await;

    let body = fixture
        .wait_for("/api/v1/audit?device=ar&event_type=device_transition", |body| {
            body["total"] == 3
        })
        .await;

    let events = body["events"].as_array().unwrap();
    assert!(events.iter().all(|e| e["device"] == "AR"));
    // Newest first
    assert_eq!(events[0]["data"]["command"], "ENABLE");
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;
    fixture.get("/api/v1/health").await;

    let (status, text) = fixture.get_text("/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("dmcs_orchestrator_running 1"));
    assert!(text.contains("dmcs_http_requests_total"));
    assert!(text.contains("dmcs_backlog_depth"));
    fixture.shutdown().await;
}
