// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for deployment orchestration.
//!
//! The mock runtime answers instantly; the paused clock makes health polling
//! and crash monitoring run without real waiting.

mod common;

use std::sync::Arc;
use std::time::Duration;

use launchpad_deployer::Deployer;
use launchpad_deployer::error::Error;
use launchpad_deployer::log_relay::{LogEntry, LogSink};
use launchpad_deployer::runtime::{LogStream, MockRuntime};
use launchpad_deployer::types::ContainerStatus;

use common::{MemorySink, RecordingReporter, app_labels, request, seed_app_container};

struct Harness {
    runtime: MockRuntime,
    reporter: Arc<RecordingReporter>,
    deployer: Deployer,
}

fn harness() -> Harness {
    let runtime = MockRuntime::new();
    let reporter = RecordingReporter::new();
    let deployer = Deployer::builder()
        .runtime(Arc::new(runtime.clone()))
        .crash_reporter(reporter.clone())
        .log_sink(MemorySink::new())
        .build()
        .unwrap();
    Harness {
        runtime,
        reporter,
        deployer,
    }
}

// ============================================================================
// Zero-downtime replacement
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_deploy_replaces_previous_container() {
    let h = harness();
    let old = seed_app_container(&h.runtime, "a1", "img:v1", true).await;
    let bystander = seed_app_container(&h.runtime, "b2", "img:v1", true).await;
    h.runtime.add_image("img:v2").await;

    let result = h.deployer.deploy(request("a1", "img:v2")).await.unwrap();

    assert_eq!(result.retired, vec![old]);
    assert!(result.health_confirmed);
    assert_eq!(result.container.status, ContainerStatus::Running);
    assert_eq!(result.container_name, result.container.name);

    let current = h.deployer.lifecycle().find_by_app_id("a1").await.unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].container_id, result.container.container_id);
    assert!(h.runtime.container_ids().await.contains(&bystander));
    assert!(h.runtime.has_network("launchpad").await);

    h.deployer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_deploy_leaves_exactly_one_container() {
    for previous in 0..=3 {
        let h = harness();
        h.runtime.add_image("img:v2").await;
        for _ in 0..previous {
            seed_app_container(&h.runtime, "a1", "img:v1", true).await;
        }

        let result = h.deployer.deploy(request("a1", "img:v2")).await.unwrap();

        assert_eq!(result.retired.len(), previous);
        assert_eq!(
            h.runtime.container_ids().await,
            vec![result.container.container_id.clone()]
        );
        h.deployer.shutdown().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_deploy_applies_platform_settings() {
    let h = harness();
    h.runtime.add_image("img:v2").await;
    let mut req = request("a1", "img:v2");
    req.env.insert("PORT".to_string(), "3000".to_string());
    req.env.insert("DATABASE_URL".to_string(), "postgres://db/a1".to_string());

    let result = h.deployer.deploy(req).await.unwrap();

    let spec = h
        .runtime
        .container_spec(&result.container.container_id)
        .await
        .unwrap();
    assert_eq!(spec.env[0], "PORT=8080");
    assert!(!spec.env.contains(&"PORT=3000".to_string()));
    assert!(spec.env.contains(&"DATABASE_URL=postgres://db/a1".to_string()));
    assert_eq!(spec.memory_bytes, 256 * 1024 * 1024);
    assert_eq!(spec.memory_swap_bytes, spec.memory_bytes);
    assert_eq!(spec.nano_cpus, 500_000_000);
    assert_eq!(
        spec.labels["proxy.http.routers.app-a1.rule"],
        "Host(`a1.apps.example.com`)"
    );

    h.deployer.shutdown().await;
}

// ============================================================================
// Failure paths
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_missing_image_fails_without_touching_old_container() {
    let h = harness();
    let old = seed_app_container(&h.runtime, "a1", "img:v1", true).await;

    let err = h
        .deployer
        .deploy(request("a1", "img:missing"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ImageNotFound(_)));
    assert_eq!(h.runtime.image_inspects().await, 5);
    assert_eq!(h.runtime.container_ids().await, vec![old]);
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_keeps_old_container_serving() {
    let h = harness();
    let old = seed_app_container(&h.runtime, "a1", "img:v1", true).await;
    h.runtime.add_image("img:v2").await;
    h.runtime.fail_starts(true).await;

    let err = h
        .deployer
        .deploy(request("a1", "img:v2"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StartFailed(_)));
    assert_eq!(h.runtime.container_ids().await, vec![old.clone()]);
    let current = h.deployer.lifecycle().find_by_app_id("a1").await.unwrap();
    assert_eq!(current[0].status, ContainerStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn test_health_timeout_still_cuts_over() {
    let h = harness();
    let old = seed_app_container(&h.runtime, "a1", "img:v1", true).await;
    h.runtime.add_image("img:v2").await;
    h.runtime.set_exec_exit_code(1).await;
    let started = tokio::time::Instant::now();

    let result = h.deployer.deploy(request("a1", "img:v2")).await.unwrap();

    assert!(!result.health_confirmed);
    assert_eq!(result.retired, vec![old]);
    assert!(started.elapsed() >= Duration::from_secs(120));

    h.deployer.shutdown().await;
}

#[tokio::test]
async fn test_invalid_request_rejected_up_front() {
    let h = harness();
    let mut req = request("a1", "img:v2");
    req.app_id = "  ".to_string();

    let err = h.deployer.deploy(req).await.unwrap_err();

    assert!(matches!(err, Error::InvalidRequest(_)));
    assert_eq!(h.runtime.network_creates().await, 0);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_deploys_of_same_app_serialize() {
    let h = harness();
    h.runtime.add_image("img:v2").await;

    let (a, b) = tokio::join!(
        h.deployer.deploy(request("a1", "img:v2")),
        h.deployer.deploy(request("a1", "img:v2")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let remaining = h.runtime.container_ids().await;
    assert_eq!(remaining.len(), 1);
    let (winner, loser) = if remaining[0] == a.container.container_id {
        (a, b)
    } else {
        (b, a)
    };
    assert_eq!(winner.retired, vec![loser.container.container_id]);
    assert!(loser.retired.is_empty());

    h.deployer.shutdown().await;
}

// ============================================================================
// Background tasks
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_crash_after_deploy_is_reported_once() {
    let h = harness();
    h.runtime.add_image("img:v2").await;
    let req = request("a1", "img:v2");
    let deployment_id = req.deployment_id.clone();
    let result = h.deployer.deploy(req).await.unwrap();
    assert!(h.deployer.tasks().active_tasks("a1").await >= 1);

    h.runtime
        .set_exited(&result.container.container_id, 139, "")
        .await;
    tokio::time::sleep(Duration::from_secs(35)).await;

    let events = h.reporter.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].container_id, result.container.container_id);
    assert_eq!(events[0].deployment_id, deployment_id);
    assert_eq!(events[0].exit_code, 139);

    h.deployer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_crash_restarted_by_policy_is_reported() {
    let h = harness();
    h.runtime.add_image("img:v2").await;
    let result = h.deployer.deploy(request("a1", "img:v2")).await.unwrap();
    let id = result.container.container_id;

    h.runtime.set_restarting(&id, 1).await;
    tokio::time::sleep(Duration::from_secs(35)).await;
    h.runtime.set_running(&id).await;
    tokio::time::sleep(Duration::from_secs(35)).await;

    let events = h.reporter.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].container_id, id);
    assert_eq!(events[0].exit_code, 1);
    assert_eq!(events[0].restart_count, 1);

    h.deployer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cutover_is_not_reported_as_crash() {
    let h = harness();
    h.runtime.add_image("img:v1").await;
    h.runtime.add_image("img:v2").await;

    let first = h.deployer.deploy(request("a1", "img:v1")).await.unwrap();
    let second = h.deployer.deploy(request("a1", "img:v2")).await.unwrap();
    assert_eq!(second.retired, vec![first.container.container_id]);

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(h.reporter.events().await.is_empty());
    h.deployer.shutdown().await;
}

// ============================================================================
// Verification
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_verify_healthy_deployment() {
    let h = harness();
    h.runtime.add_image("img:v2").await;
    let result = h.deployer.deploy(request("a1", "img:v2")).await.unwrap();

    let report = h.deployer.verify_deployment("a1").await.unwrap();

    assert!(report.is_healthy(), "unexpected problems: {:?}", report.problems);
    assert_eq!(report.container_id, Some(result.container.container_id));
    assert!(report.running);
    assert!(report.routed);
    assert!(report.reachable);

    h.deployer.shutdown().await;
}

#[tokio::test]
async fn test_verify_unknown_app() {
    let h = harness();

    let report = h.deployer.verify_deployment("ghost").await.unwrap();

    assert!(!report.is_healthy());
    assert!(!report.running);
    assert!(report.container_id.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_verify_flags_unreachable_and_duplicate_containers() {
    let h = harness();
    h.runtime.add_image("img:v2").await;
    h.deployer.deploy(request("a1", "img:v2")).await.unwrap();
    seed_app_container(&h.runtime, "a1", "img:v1", true).await;
    h.runtime.set_exec_exit_code(1).await;

    let report = h.deployer.verify_deployment("a1").await.unwrap();

    assert!(report.running);
    assert!(report.routed);
    assert!(!report.reachable);
    assert!(report.problems.iter().any(|p| p.contains("2 containers running")));
    assert!(report.problems.iter().any(|p| p.contains("not reachable")));

    h.deployer.shutdown().await;
}

#[tokio::test]
async fn test_verify_unrouted_container() {
    let h = harness();
    seed_app_container(&h.runtime, "a1", "img:v1", true).await;

    let report = h.deployer.verify_deployment("a1").await.unwrap();

    assert!(report.running);
    assert!(!report.routed);
    assert!(!report.reachable);
    assert!(!report.is_healthy());
}

// ============================================================================
// Cleanup
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cleanup_removes_everything_for_app() {
    let h = harness();
    h.runtime
        .add_image_with_labels("registry/a1:v2", app_labels("a1"))
        .await;
    h.runtime
        .add_image_with_labels("registry/b2:v1", app_labels("b2"))
        .await;
    let bystander = seed_app_container(&h.runtime, "b2", "registry/b2:v1", true).await;
    h.deployer
        .deploy(request("a1", "registry/a1:v2"))
        .await
        .unwrap();

    h.deployer.cleanup_app_resources("a1").await.unwrap();

    assert_eq!(h.runtime.container_ids().await, vec![bystander]);
    assert_eq!(h.runtime.image_count().await, 1);
    assert_eq!(h.deployer.tasks().active_tasks("a1").await, 0);

    let report = h.deployer.verify_deployment("a1").await.unwrap();
    assert!(!report.running);
}

#[tokio::test]
async fn test_cleanup_unknown_app_is_noop() {
    let h = harness();
    h.deployer.cleanup_app_resources("ghost").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_releases_app_lock() {
    let h = harness();
    h.runtime.add_image("img:v2").await;
    h.deployer.deploy(request("a1", "img:v2")).await.unwrap();
    h.deployer.deploy(request("b2", "img:v2")).await.unwrap();
    assert_eq!(h.deployer.locked_apps().await, 2);

    h.deployer.cleanup_app_resources("a1").await.unwrap();
    assert_eq!(h.deployer.locked_apps().await, 1);

    // A later deploy of the same app still works.
    h.deployer.deploy(request("a1", "img:v2")).await.unwrap();
    assert_eq!(h.deployer.locked_apps().await, 2);

    h.deployer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_purges_stored_app_data() {
    let runtime = MockRuntime::new();
    let sink = MemorySink::new();
    let deployer = Deployer::builder()
        .runtime(Arc::new(runtime.clone()))
        .log_sink(sink.clone())
        .purger(sink.clone())
        .build()
        .unwrap();
    runtime.add_image("img:v2").await;
    deployer.deploy(request("a1", "img:v2")).await.unwrap();

    for app_id in ["a1", "a1", "b2"] {
        sink.write(LogEntry {
            app_id: app_id.to_string(),
            container_id: format!("{app_id}-c1"),
            deployment_id: "dep-1".to_string(),
            log_type: LogStream::Stdout,
            timestamp: chrono::Utc::now(),
            message: b"listening on :8080".to_vec(),
        })
        .await
        .unwrap();
    }

    deployer.cleanup_app_resources("a1").await.unwrap();

    let entries = sink.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].app_id, "b2");
    assert!(runtime.container_ids().await.is_empty());
}
