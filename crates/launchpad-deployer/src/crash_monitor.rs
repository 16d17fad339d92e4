// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker for detecting crashed application containers.
//!
//! One monitor runs per deployed container for as long as the application
//! lives. It polls container state and reports a [`CrashEvent`] when the
//! container stops serving: it exits, or the runtime is restarting it. The
//! container staying down across many polls produces one event, not one per
//! poll. Seeing the container running again re-arms detection, so restarts
//! performed by the runtime's restart policy are handled transparently.
//!
//! The monitor does not persist anything itself; events go to an injected
//! [`CrashReporter`].
//!
//! # Crash loops
//!
//! When the runtime's restart counter reaches the configured threshold an
//! additional `error!` is logged, once per counter value. Nothing is rolled
//! back automatically.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::lifetime::CancelToken;
use crate::runtime::{ContainerRuntime, ContainerState};

/// Substrings that mark a log line as describing a failure.
const ERROR_MARKERS: &[&str] = &["error", "exception", "fatal", "panic", "failed"];

/// Configuration for the crash monitor.
#[derive(Debug, Clone)]
pub struct CrashMonitorConfig {
    /// How often to poll container state.
    pub poll_interval: Duration,
    /// Log lines captured when a crash is detected.
    pub log_tail_lines: usize,
    /// Restart count at which a crash loop is signalled.
    pub crash_loop_threshold: i64,
}

impl Default for CrashMonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            log_tail_lines: 50,
            crash_loop_threshold: 3,
        }
    }
}

/// A detected crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashEvent {
    /// Application the container belongs to.
    pub app_id: String,
    /// Deployment that created the container.
    pub deployment_id: String,
    /// Crashed container.
    pub container_id: String,
    /// Process exit code.
    pub exit_code: i64,
    /// Best-effort description of what went wrong.
    pub error: String,
    /// Runtime restart counter at detection time.
    pub restart_count: i64,
    /// When the crash was detected.
    pub detected_at: DateTime<Utc>,
}

/// Receives crash events.
#[async_trait]
pub trait CrashReporter: Send + Sync {
    /// Handle one crash event. Must not fail the monitor.
    async fn report_crash(&self, event: &CrashEvent);
}

/// Reporter that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingCrashReporter;

#[async_trait]
impl CrashReporter for LoggingCrashReporter {
    async fn report_crash(&self, event: &CrashEvent) {
        warn!(
            app_id = %event.app_id,
            deployment_id = %event.deployment_id,
            container_id = %event.container_id,
            exit_code = event.exit_code,
            restart_count = event.restart_count,
            error = %event.error,
            "Container crashed"
        );
    }
}

/// What the monitored container is.
#[derive(Debug, Clone)]
pub struct MonitorTarget {
    /// Application ID.
    pub app_id: String,
    /// Deployment ID.
    pub deployment_id: String,
    /// Container ID.
    pub container_id: String,
}

/// State carried between polls.
#[derive(Debug, Clone)]
pub struct WatchState {
    was_running: bool,
    crash_loop_signalled_at: Option<i64>,
    crash_loop_signals: usize,
}

impl Default for WatchState {
    fn default() -> Self {
        // Monitoring starts right after a successful start.
        Self {
            was_running: true,
            crash_loop_signalled_at: None,
            crash_loop_signals: 0,
        }
    }
}

impl WatchState {
    /// Restart count at which a crash loop was last signalled.
    pub fn crash_loop_signalled_at(&self) -> Option<i64> {
        self.crash_loop_signalled_at
    }

    /// How many crash-loop signals have been raised so far.
    pub fn crash_loop_signals(&self) -> usize {
        self.crash_loop_signals
    }
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Keep polling.
    Continue,
    /// A crash was detected and reported.
    Crashed(CrashEvent),
    /// The container no longer exists.
    Gone,
}

/// Background worker that watches one container for crashes.
pub struct CrashMonitor {
    runtime: Arc<dyn ContainerRuntime>,
    reporter: Arc<dyn CrashReporter>,
    config: CrashMonitorConfig,
    target: MonitorTarget,
}

impl CrashMonitor {
    /// Create a new crash monitor.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        reporter: Arc<dyn CrashReporter>,
        config: CrashMonitorConfig,
        target: MonitorTarget,
    ) -> Self {
        Self {
            runtime,
            reporter,
            config,
            target,
        }
    }

    /// Run the monitor loop until cancelled or the container is removed.
    pub async fn run(self, mut cancel: CancelToken) {
        info!(
            app_id = %self.target.app_id,
            container_id = %self.target.container_id,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Crash monitor started"
        );

        let mut state = WatchState::default();
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(container_id = %self.target.container_id, "Crash monitor cancelled");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if self.tick(&mut state).await == Tick::Gone {
                        info!(container_id = %self.target.container_id, "Container removed, crash monitor exiting");
                        break;
                    }
                }
            }
        }

        info!(container_id = %self.target.container_id, "Crash monitor stopped");
    }

    /// Poll the container once.
    pub async fn tick(&self, state: &mut WatchState) -> Tick {
        let container = match self
            .runtime
            .inspect_container(&self.target.container_id)
            .await
        {
            Ok(container) => container,
            Err(e) if e.is_not_found() => return Tick::Gone,
            Err(e) => {
                warn!(container_id = %self.target.container_id, error = %e, "Failed to inspect container");
                return Tick::Continue;
            }
        };

        let mut outcome = Tick::Continue;
        if container.is_up() {
            if !state.was_running {
                info!(
                    container_id = %self.target.container_id,
                    restart_count = container.restart_count,
                    "Container running again"
                );
            }
            state.was_running = true;
        } else if state.was_running {
            state.was_running = false;
            let event = self.crash_event(&container).await;
            self.reporter.report_crash(&event).await;
            outcome = Tick::Crashed(event);
        }

        if container.restart_count >= self.config.crash_loop_threshold
            && state.crash_loop_signalled_at != Some(container.restart_count)
        {
            state.crash_loop_signalled_at = Some(container.restart_count);
            state.crash_loop_signals += 1;
            error!(
                app_id = %self.target.app_id,
                container_id = %self.target.container_id,
                restart_count = container.restart_count,
                threshold = self.config.crash_loop_threshold,
                "Container is crash-looping"
            );
        }

        outcome
    }

    async fn crash_event(&self, container: &ContainerState) -> CrashEvent {
        let logs = match self
            .runtime
            .tail_logs(&self.target.container_id, self.config.log_tail_lines)
            .await
        {
            Ok(lines) => lines,
            Err(e) => {
                debug!(container_id = %self.target.container_id, error = %e, "Could not read crash logs");
                Vec::new()
            }
        };

        CrashEvent {
            app_id: self.target.app_id.clone(),
            deployment_id: self.target.deployment_id.clone(),
            container_id: self.target.container_id.clone(),
            exit_code: container.exit_code,
            error: describe_crash(container, &logs),
            restart_count: container.restart_count,
            detected_at: Utc::now(),
        }
    }
}

/// Best-effort description of a crash.
///
/// Prefers the runtime's error, then the last log line that looks like an
/// error, then the last non-empty line, then a synthesized summary.
pub fn describe_crash(container: &ContainerState, logs: &[String]) -> String {
    if !container.error.trim().is_empty() {
        return container.error.trim().to_string();
    }

    let lines = || logs.iter().rev().map(|l| l.trim()).filter(|l| !l.is_empty());

    if let Some(line) = lines().find(|line| {
        let lower = line.to_ascii_lowercase();
        ERROR_MARKERS.iter().any(|marker| lower.contains(marker))
    }) {
        return line.to_string();
    }

    if let Some(line) = lines().next() {
        return line.to_string();
    }

    format!(
        "exited with status {} (exit code {})",
        container.status, container.exit_code
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn exited(error: &str) -> ContainerState {
        ContainerState {
            id: "c1".to_string(),
            name: "app-a1-1234".to_string(),
            image: "img:v1".to_string(),
            running: false,
            restarting: false,
            status: "exited".to_string(),
            exit_code: 137,
            error: error.to_string(),
            restart_count: 0,
            health: None,
            labels: BTreeMap::new(),
        }
    }

    fn lines(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_describe_crash_prefers_runtime_error() {
        let logs = lines(&["Error: boom"]);
        assert_eq!(describe_crash(&exited("OOMKilled"), &logs), "OOMKilled");
    }

    #[test]
    fn test_describe_crash_scans_backwards_for_error_line() {
        let logs = lines(&[
            "listening on :8080",
            "Error: first",
            "panic: connection refused",
            "shutting down",
            "",
        ]);
        assert_eq!(
            describe_crash(&exited(""), &logs),
            "panic: connection refused"
        );
    }

    #[test]
    fn test_describe_crash_falls_back_to_last_line() {
        let logs = lines(&["starting", "bye", "   "]);
        assert_eq!(describe_crash(&exited(""), &logs), "bye");
    }

    #[test]
    fn test_describe_crash_synthesizes_summary() {
        assert_eq!(
            describe_crash(&exited(""), &[]),
            "exited with status exited (exit code 137)"
        );
    }
}
