// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the PostgreSQL log and crash store.
//!
//! These need a database and are skipped when `TEST_LAUNCHPAD_DATABASE_URL`
//! is not set.

use chrono::{Duration, TimeZone, Utc};
use sqlx::PgPool;

use launchpad_deployer::crash_monitor::{CrashEvent, CrashReporter};
use launchpad_deployer::log_relay::{LogEntry, LogSink};
use launchpad_deployer::runtime::LogStream;
use launchpad_deployer::store::{self, MIGRATOR, PgStore};

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("TEST_LAUNCHPAD_DATABASE_URL").ok()?;
    let pool = store::connect(&url).await.ok()?;
    MIGRATOR.run(&pool).await.ok()?;
    Some(pool)
}

fn unique_app() -> String {
    format!("test-{}", uuid::Uuid::new_v4().simple())
}

fn entry(app_id: &str, container_id: &str, second: i64, message: &str) -> LogEntry {
    LogEntry {
        app_id: app_id.to_string(),
        container_id: container_id.to_string(),
        deployment_id: "dep-1".to_string(),
        log_type: LogStream::Stdout,
        timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(second),
        message: message.as_bytes().to_vec(),
    }
}

#[tokio::test]
async fn test_logs_keyed_by_container_oldest_first() {
    let Some(pool) = test_pool().await else {
        eprintln!("Skipping test: TEST_LAUNCHPAD_DATABASE_URL not set");
        return;
    };
    let store = PgStore::new(pool);
    let app_id = unique_app();
    let container = format!("{app_id}-c1");
    let other = format!("{app_id}-c2");

    // Inserted out of order on purpose.
    for (second, message) in [(2, "third"), (0, "first"), (1, "second"), (3, "fourth")] {
        store
            .write(entry(&app_id, &container, second, message))
            .await
            .unwrap();
    }
    store
        .write(entry(&app_id, &other, 9, "elsewhere"))
        .await
        .unwrap();

    let logs = store.recent_logs(&container, 3).await.unwrap();
    let messages: Vec<_> = logs.iter().map(|l| l.message.as_slice()).collect();
    assert_eq!(
        messages,
        vec![b"second".as_slice(), b"third".as_slice(), b"fourth".as_slice()]
    );
    assert!(logs.iter().all(|l| l.log_type == "stdout"));
    assert!(logs.iter().all(|l| l.container_id == container));

    assert_eq!(store.delete_app(&app_id).await.unwrap(), 5);
    assert!(store.recent_logs(&container, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_crash_reports_newest_first() {
    let Some(pool) = test_pool().await else {
        eprintln!("Skipping test: TEST_LAUNCHPAD_DATABASE_URL not set");
        return;
    };
    let store = PgStore::new(pool);
    let app_id = unique_app();
    let base = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();

    for (offset, exit_code) in [(0, 1), (60, 137)] {
        store
            .report_crash(&CrashEvent {
                app_id: app_id.clone(),
                deployment_id: "dep-1".to_string(),
                container_id: format!("{app_id}-c1"),
                exit_code,
                error: format!("exit {exit_code}"),
                restart_count: offset / 60,
                detected_at: base + Duration::seconds(offset),
            })
            .await;
    }

    let crashes = store.recent_crashes(&app_id, 10).await.unwrap();
    assert_eq!(crashes.len(), 2);
    assert_eq!(crashes[0].exit_code, 137);
    assert_eq!(crashes[0].restart_count, 1);
    assert_eq!(crashes[1].error, "exit 1");

    assert_eq!(store.delete_app(&app_id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_migrate_is_idempotent() {
    let Some(pool) = test_pool().await else {
        eprintln!("Skipping test: TEST_LAUNCHPAD_DATABASE_URL not set");
        return;
    };

    store::migrate(&pool).await.unwrap();
}

#[test]
fn test_migrations_embedded_in_version_order() {
    let versions: Vec<i64> = MIGRATOR.iter().map(|m| m.version).collect();
    assert_eq!(versions, vec![20250101000000, 20250101000001]);
}
