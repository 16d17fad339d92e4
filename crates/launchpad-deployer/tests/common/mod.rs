// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for launchpad-deployer tests.
//!
//! Provides request builders, app-tagged container seeding and in-memory
//! collaborators that record what the deployer hands them.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use launchpad_deployer::crash_monitor::{CrashEvent, CrashReporter};
use launchpad_deployer::deployer::AppDataPurger;
use launchpad_deployer::log_relay::{LogEntry, LogSink};
use launchpad_deployer::runtime::MockRuntime;
use launchpad_deployer::types::{DeploymentRequest, ResourceLimits, RoutingMode};

/// A request for `app_id` running `image` on port 8080 with 256 MB / half a core.
pub fn request(app_id: &str, image: &str) -> DeploymentRequest {
    DeploymentRequest {
        app_id: app_id.to_string(),
        deployment_id: format!("dep-{}", uuid::Uuid::new_v4()),
        image: image.to_string(),
        subdomain: format!("{app_id}.apps.example.com"),
        port: 8080,
        limits: ResourceLimits {
            memory_mb: 256,
            cpu: 0.5,
        },
        env: BTreeMap::new(),
        routing_mode: RoutingMode::Single,
    }
}

/// Labels marking a container or image as owned by `app_id`.
pub fn app_labels(app_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app.id".to_string(), app_id.to_string())])
}

/// Seed a container tagged for `app_id`.
pub async fn seed_app_container(
    runtime: &MockRuntime,
    app_id: &str,
    image: &str,
    running: bool,
) -> String {
    runtime
        .seed_container(image, app_labels(app_id), running)
        .await
}

/// Crash reporter that records events.
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<CrashEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn events(&self) -> Vec<CrashEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl CrashReporter for RecordingReporter {
    async fn report_crash(&self, event: &CrashEvent) {
        self.events.lock().await.push(event.clone());
    }
}

/// Log sink that keeps every line in memory.
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn messages(&self) -> Vec<String> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|e| String::from_utf8_lossy(&e.message).into_owned())
            .collect()
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn write(&self, entry: LogEntry) -> launchpad_deployer::error::Result<()> {
        self.entries.lock().await.push(entry);
        Ok(())
    }
}

#[async_trait]
impl AppDataPurger for MemorySink {
    async fn purge_app(&self, app_id: &str) -> launchpad_deployer::error::Result<u64> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.app_id != app_id);
        Ok((before - entries.len()) as u64)
    }
}
