//! Backlog retry integration tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dmcs_core::{
    backlog::{BacklogReason, ResultCode},
    config::Config,
    create_audit_system,
    device::DeviceRole,
    job::JobState,
    testing::{fixtures, ForwarderBehavior, MockAuditStore, RecordingBus, SimulatedForwarder},
    Orchestrator, RetryOutcome,
};

struct TestHarness {
    bus: Arc<RecordingBus>,
    orchestrator: Orchestrator,
    audit: Arc<MockAuditStore>,
}

impl TestHarness {
    async fn start(config: Config, f3: ForwarderBehavior) -> Self {
        let bus = Arc::new(RecordingBus::new());
        for forwarder in &config.forwarders {
            let behavior = if forwarder.name == "F3" {
                f3.clone()
            } else {
                ForwarderBehavior::default()
            };
            SimulatedForwarder::new(&forwarder.name, &forwarder.consume_queue, bus.clone(), behavior)
                .spawn()
                .await
                .expect("Failed to spawn forwarder");
        }

        let audit = Arc::new(MockAuditStore::new());
        let (handle, writer) = create_audit_system(audit.clone(), 1024);
        tokio::spawn(writer.run());

        let orchestrator = fixtures::audited_orchestrator(&config, bus.clone(), handle)
            .expect("Failed to build orchestrator");
        orchestrator.start().await.expect("Failed to start");

        for role in [DeviceRole::Ar, DeviceRole::Pp] {
            for command in fixtures::enable_sequence(role) {
                orchestrator.handle_message(command).await.unwrap();
            }
        }
        orchestrator
            .handle_message(fixtures::new_session("3"))
            .await
            .unwrap();

        Self {
            bus,
            orchestrator,
            audit,
        }
    }

    async fn run_image(&self, image_id: &str) {
        self.orchestrator
            .handle_message(fixtures::start_integration(image_id))
            .await
            .unwrap();
        self.orchestrator
            .handle_message(fixtures::end_readout(image_id))
            .await
            .unwrap();
    }

    async fn wait_for_audit(&self, event_type: &str) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(2) {
            if self.audit.event_types().iter().any(|t| t == event_type) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

fn failing_f3() -> ForwarderBehavior {
    ForwarderBehavior::default().with_failures(vec!["R01/S01".to_string()], "BAD_CHECKSUM")
}

#[tokio::test]
async fn test_empty_backlog_has_nothing_to_retry() {
    let harness = TestHarness::start(fixtures::config(), ForwarderBehavior::default()).await;

    let outcome = tokio_test::assert_ok!(harness.orchestrator.retry_backlog().await);
    assert!(outcome.is_none());

    harness.orchestrator.stop().await;
}

#[tokio::test]
async fn test_refused_job_is_retried_once_forwarder_recovers() {
    let harness = TestHarness::start(fixtures::config(), ForwarderBehavior::default()).await;
    harness.bus.fail_queue("f3_consume");

    harness
        .orchestrator
        .handle_message(fixtures::start_integration("IMG_1"))
        .await
        .unwrap();

    let pp = harness.orchestrator.jobs().get("3_2").unwrap().unwrap();
    assert_eq!(pp.state, JobState::Refused);
    let entry = &harness.orchestrator.backlog().entries().unwrap()[0];
    assert_eq!(entry.reason, BacklogReason::Refused);
    assert_eq!(entry.units.len(), 4);

    harness.bus.heal_queue("f3_consume");
    let outcome = harness.orchestrator.retry_backlog().await.unwrap().unwrap();

    let job = match outcome {
        RetryOutcome::Retried { job, .. } => job,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(job.job_num, "3_3");
    assert_eq!(job.device, DeviceRole::Pp);
    assert_eq!(job.image_id, "IMG_1");
    assert_eq!(job.attempt, 1);
    assert_eq!(job.state, JobState::Complete);
    assert_eq!(job.results.len(), 4);
    assert!(harness.orchestrator.backlog().is_empty().unwrap());
    assert!(harness.wait_for_audit("backlog_resolved").await);

    harness.orchestrator.stop().await;
}

#[tokio::test]
async fn test_retry_covers_only_failed_units() {
    let harness = TestHarness::start(fixtures::config(), failing_f3()).await;
    harness.run_image("IMG_1").await;

    let outcome = harness.orchestrator.retry_backlog().await.unwrap().unwrap();

    let RetryOutcome::Retried { job, .. } = outcome else {
        panic!("expected a retry");
    };
    assert_eq!(job.units, vec!["R01/S01"]);
    assert_eq!(job.assignment.unit_ids_for("F3"), vec!["R01/S01"]);
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.results["R01/S01"], ResultCode::BadChecksum);

    // The failure went straight back on the backlog with its retry count carried.
    let entries = harness.orchestrator.backlog().entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].orig_job_num, job.job_num);
    assert_eq!(entries[0].retry_count, 1);

    harness.orchestrator.stop().await;
}

#[tokio::test]
async fn test_entry_is_dropped_after_max_retries() {
    let config = fixtures::config();
    let max = config.orchestrator.max_backlog_retries;
    let harness = TestHarness::start(config, failing_f3()).await;
    harness.run_image("IMG_1").await;

    for attempt in 1..=max {
        match harness.orchestrator.retry_backlog().await.unwrap() {
            Some(RetryOutcome::Retried { job, .. }) => {
                assert_eq!(job.attempt, attempt);
                assert_eq!(job.state, JobState::Failed);
            }
            other => panic!("attempt {}: unexpected {:?}", attempt, other),
        }
    }

    match harness.orchestrator.retry_backlog().await.unwrap() {
        Some(RetryOutcome::Dropped {
            device,
            retry_count,
            ..
        }) => {
            assert_eq!(device, DeviceRole::Pp);
            assert_eq!(retry_count, max);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(harness.orchestrator.backlog().is_empty().unwrap());
    assert!(harness.orchestrator.retry_backlog().await.unwrap().is_none());
    assert!(harness.wait_for_audit("backlog_dropped").await);

    harness.orchestrator.stop().await;
}

#[tokio::test]
async fn test_background_loop_drains_backlog() {
    let mut config = fixtures::config();
    config.orchestrator.backlog_retry_interval_ms = 50;
    config.orchestrator.max_backlog_retries = 20;
    let harness = TestHarness::start(config, ForwarderBehavior::default()).await;
    harness.bus.fail_queue("f3_consume");

    harness
        .orchestrator
        .handle_message(fixtures::start_integration("IMG_1"))
        .await
        .unwrap();
    harness.bus.heal_queue("f3_consume");

    let start = Instant::now();
    let mut drained = false;
    while start.elapsed() < Duration::from_secs(5) {
        let retried = harness
            .orchestrator
            .jobs()
            .jobs_for_image("IMG_1")
            .unwrap()
            .into_iter()
            .any(|j| j.attempt > 0 && j.state == JobState::Complete);
        if retried && harness.orchestrator.backlog().is_empty().unwrap() {
            drained = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    harness.orchestrator.stop().await;
    assert!(drained, "backlog was not drained by the retry loop");
}
