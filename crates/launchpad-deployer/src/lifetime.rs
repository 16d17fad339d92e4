// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Application-scoped cancellation for background tasks.
//!
//! Crash monitors and log relays outlive the deploy call that spawned them.
//! They are tied to the application instead: cancelling an application ends
//! every task spawned for it. Crash monitors additionally have a per-container
//! scope so cutover can retire them before stopping old containers.
//!
//! Cancellation is carried over `tokio::sync::watch` channels. A dropped
//! sender counts as cancelled.

use std::collections::HashMap;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Receiving side of an application (and optionally container) scope.
#[derive(Debug, Clone)]
pub struct CancelToken {
    app: watch::Receiver<bool>,
    scoped: Option<watch::Receiver<bool>>,
}

async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    // Err means the sender is gone.
    let _ = rx.wait_for(|cancelled| *cancelled).await;
}

fn is_set(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow() || rx.has_changed().is_err()
}

impl CancelToken {
    /// A token that is never cancelled while `sender` lives.
    pub fn new(sender: &watch::Sender<bool>) -> Self {
        Self {
            app: sender.subscribe(),
            scoped: None,
        }
    }

    /// Whether the scope has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        is_set(&self.app) || self.scoped.as_ref().is_some_and(is_set)
    }

    /// Resolve once the scope is cancelled.
    pub async fn cancelled(&mut self) {
        match &mut self.scoped {
            Some(scoped) => {
                tokio::select! {
                    _ = wait_cancelled(&mut self.app) => {}
                    _ = wait_cancelled(scoped) => {}
                }
            }
            None => wait_cancelled(&mut self.app).await,
        }
    }
}

struct AppTasks {
    cancel: watch::Sender<bool>,
    monitors: HashMap<String, watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl AppTasks {
    fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            cancel,
            monitors: HashMap::new(),
            handles: Vec::new(),
        }
    }
}

/// Registry of background tasks keyed by application ID.
#[derive(Default)]
pub struct TaskRegistry {
    apps: Mutex<HashMap<String, AppTasks>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token scoped to the application's lifetime.
    pub async fn app_token(&self, app_id: &str) -> CancelToken {
        let mut apps = self.apps.lock().await;
        let tasks = apps.entry(app_id.to_string()).or_insert_with(AppTasks::new);
        CancelToken::new(&tasks.cancel)
    }

    /// Token scoped to the application and to the crash monitor of one container.
    pub async fn monitor_token(&self, app_id: &str, container_id: &str) -> CancelToken {
        let mut apps = self.apps.lock().await;
        let tasks = apps.entry(app_id.to_string()).or_insert_with(AppTasks::new);
        let (sender, receiver) = watch::channel(false);
        tasks.monitors.insert(container_id.to_string(), sender);
        CancelToken {
            app: tasks.cancel.subscribe(),
            scoped: Some(receiver),
        }
    }

    /// Track a spawned task under the application.
    pub async fn track(&self, app_id: &str, handle: JoinHandle<()>) {
        let mut apps = self.apps.lock().await;
        let tasks = apps.entry(app_id.to_string()).or_insert_with(AppTasks::new);
        tasks.handles.retain(|h| !h.is_finished());
        tasks.handles.push(handle);
    }

    /// Cancel the crash monitors of every container of the application.
    /// Returns the container IDs whose monitors were retired.
    pub async fn retire_monitors(&self, app_id: &str) -> Vec<String> {
        let mut apps = self.apps.lock().await;
        let Some(tasks) = apps.get_mut(app_id) else {
            return Vec::new();
        };
        let mut retired = Vec::with_capacity(tasks.monitors.len());
        for (container_id, sender) in tasks.monitors.drain() {
            sender.send_replace(true);
            retired.push(container_id);
        }
        debug!(app_id = %app_id, count = retired.len(), "Retired crash monitors");
        retired
    }

    /// Number of unfinished tasks tracked for the application.
    pub async fn active_tasks(&self, app_id: &str) -> usize {
        let apps = self.apps.lock().await;
        apps.get(app_id)
            .map(|t| t.handles.iter().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }

    /// Cancel every task of the application and wait for them to finish.
    pub async fn cancel_app(&self, app_id: &str) {
        let tasks = self.apps.lock().await.remove(app_id);
        if let Some(tasks) = tasks {
            Self::cancel_and_join(app_id, tasks).await;
        }
    }

    /// Cancel every task of every application and wait for them to finish.
    pub async fn cancel_all(&self) {
        let apps: Vec<_> = self.apps.lock().await.drain().collect();
        for (app_id, tasks) in apps {
            Self::cancel_and_join(&app_id, tasks).await;
        }
    }

    async fn cancel_and_join(app_id: &str, tasks: AppTasks) {
        tasks.cancel.send_replace(true);
        for sender in tasks.monitors.values() {
            sender.send_replace(true);
        }
        let count = tasks.handles.len();
        for handle in tasks.handles {
            if let Err(e) = handle.await {
                debug!(app_id = %app_id, error = %e, "Background task ended abnormally");
            }
        }
        debug!(app_id = %app_id, count, "Background tasks cancelled");
    }
}
