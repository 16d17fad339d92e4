// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL store for container logs and crash reports.
//!
//! Logs are keyed by container ID: the container ID is known both when a line
//! is written and when it is read back, unlike the deployment ID.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, error, warn};

use crate::crash_monitor::{CrashEvent, CrashReporter};
use crate::deployer::AppDataPurger;
use crate::error::Result;
use crate::log_relay::{LogEntry, LogSink};

/// Connect to the database.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Log and crash table migrations embedded at compile time.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply pending migrations.
///
/// Safe to call multiple times; already-applied migrations are skipped.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    MIGRATOR.run(pool).await?;
    Ok(())
}

/// Stored log line.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredLog {
    /// Container the line came from.
    pub container_id: String,
    /// Application ID.
    pub app_id: String,
    /// Deployment ID.
    pub deployment_id: String,
    /// `stdout` or `stderr`.
    pub log_type: String,
    /// Runtime timestamp.
    pub logged_at: DateTime<Utc>,
    /// Line content.
    pub message: Vec<u8>,
}

/// Stored crash report.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredCrash {
    /// Application ID.
    pub app_id: String,
    /// Deployment ID.
    pub deployment_id: String,
    /// Crashed container.
    pub container_id: String,
    /// Exit code.
    pub exit_code: i64,
    /// Description of the crash.
    pub error: String,
    /// Restart counter at detection.
    pub restart_count: i64,
    /// Detection time.
    pub detected_at: DateTime<Utc>,
}

/// PostgreSQL-backed log sink and crash reporter.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert one log line.
    pub async fn insert_log(&self, entry: &LogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO container_logs (
                container_id, app_id, deployment_id, log_type, logged_at, message
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&entry.container_id)
        .bind(&entry.app_id)
        .bind(&entry.deployment_id)
        .bind(entry.log_type.as_str())
        .bind(entry.timestamp)
        .bind(&entry.message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert one crash report.
    pub async fn insert_crash(&self, event: &CrashEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO container_crashes (
                app_id, deployment_id, container_id, exit_code, error,
                restart_count, detected_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&event.app_id)
        .bind(&event.deployment_id)
        .bind(&event.container_id)
        .bind(event.exit_code)
        .bind(&event.error)
        .bind(event.restart_count)
        .bind(event.detected_at)
        .execute(&self.pool)
        .await?;

        debug!(
            app_id = %event.app_id,
            container_id = %event.container_id,
            "Recorded crash"
        );
        Ok(())
    }

    /// The last `limit` lines of a container, oldest first.
    pub async fn recent_logs(&self, container_id: &str, limit: i64) -> Result<Vec<StoredLog>> {
        let logs = sqlx::query_as::<_, StoredLog>(
            r#"
            SELECT container_id, app_id, deployment_id, log_type, logged_at, message
            FROM (
                SELECT container_id, app_id, deployment_id, log_type, logged_at, message, id
                FROM container_logs
                WHERE container_id = $1
                ORDER BY logged_at DESC, id DESC
                LIMIT $2
            ) recent
            ORDER BY logged_at ASC, id ASC
            "#,
        )
        .bind(container_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }

    /// Most recent crashes of an application, newest first.
    pub async fn recent_crashes(&self, app_id: &str, limit: i64) -> Result<Vec<StoredCrash>> {
        let crashes = sqlx::query_as::<_, StoredCrash>(
            r#"
            SELECT app_id, deployment_id, container_id, exit_code, error,
                   restart_count, detected_at
            FROM container_crashes
            WHERE app_id = $1
            ORDER BY detected_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(app_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(crashes)
    }

    /// Delete everything stored for an application.
    pub async fn delete_app(&self, app_id: &str) -> Result<u64> {
        let logs = sqlx::query("DELETE FROM container_logs WHERE app_id = $1")
            .bind(app_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        let crashes = sqlx::query("DELETE FROM container_crashes WHERE app_id = $1")
            .bind(app_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(logs + crashes)
    }
}

#[async_trait]
impl AppDataPurger for PgStore {
    async fn purge_app(&self, app_id: &str) -> Result<u64> {
        self.delete_app(app_id).await
    }
}

#[async_trait]
impl LogSink for PgStore {
    async fn write(&self, entry: LogEntry) -> Result<()> {
        self.insert_log(&entry).await
    }
}

#[async_trait]
impl CrashReporter for PgStore {
    async fn report_crash(&self, event: &CrashEvent) {
        warn!(
            app_id = %event.app_id,
            container_id = %event.container_id,
            exit_code = event.exit_code,
            error = %event.error,
            "Container crashed"
        );
        if let Err(e) = self.insert_crash(event).await {
            error!(
                app_id = %event.app_id,
                container_id = %event.container_id,
                error = %e,
                "Failed to record crash"
            );
        }
    }
}
