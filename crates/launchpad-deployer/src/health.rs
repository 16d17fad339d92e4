// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Health verification for freshly started containers.
//!
//! The verifier polls on a fixed interval, sleeping before each check, and
//! gives up after a wall-clock ceiling. Each check works through:
//!
//! 1. A container that is no longer running fails immediately.
//! 2. A native `healthy` status succeeds; `unhealthy`, `starting` and `none`
//!    keep polling.
//! 3. Any other native status, or no native health check at all, falls back
//!    to a manual in-container probe. Exit code 0 means healthy.
//!
//! The orchestrator treats [`Error::HealthTimeout`] and
//! [`Error::ContainerExited`] as non-fatal.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::runtime::{ContainerRuntime, HealthStatus};

/// Configuration for the health verifier.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Ceiling on the whole wait.
    pub timeout: Duration,
    /// Delay before each check.
    pub interval: Duration,
    /// Per-request timeout inside the manual probe, in seconds.
    pub probe_timeout_secs: u64,
    /// Path requested by the manual probe.
    pub probe_path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            interval: Duration::from_secs(2),
            probe_timeout_secs: 3,
            probe_path: "/".to_string(),
        }
    }
}

/// Outcome of a single health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthCheck {
    /// The container is serving traffic.
    Healthy,
    /// Not confirmed yet; keep polling.
    Pending(String),
}

/// Polls a container until it is confirmed serving traffic.
pub struct HealthVerifier {
    runtime: Arc<dyn ContainerRuntime>,
    config: HealthCheckConfig,
}

impl HealthVerifier {
    /// Create a new verifier.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: HealthCheckConfig) -> Self {
        Self { runtime, config }
    }

    /// Verifier configuration.
    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Wait until the container is healthy, it exits, or the ceiling elapses.
    pub async fn wait_until_healthy(&self, container_id: &str, port: u16) -> Result<()> {
        let started = Instant::now();

        match tokio::time::timeout(self.config.timeout, self.poll(container_id, port)).await {
            Ok(result) => result,
            Err(_) => {
                let waited_secs = started.elapsed().as_secs();
                warn!(container_id = %container_id, waited_secs, "Health check timed out");
                Err(Error::HealthTimeout {
                    container_id: container_id.to_string(),
                    waited_secs,
                })
            }
        }
    }

    async fn poll(&self, container_id: &str, port: u16) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            tokio::time::sleep(self.config.interval).await;
            attempt += 1;

            match self.check_once(container_id, port).await? {
                HealthCheck::Healthy => {
                    info!(container_id = %container_id, attempt, "Container healthy");
                    return Ok(());
                }
                HealthCheck::Pending(reason) => {
                    debug!(container_id = %container_id, attempt, reason = %reason, "Container not healthy yet");
                }
            }
        }
    }

    /// Run one health check.
    ///
    /// Transient runtime errors are reported as pending; a container that is
    /// gone or stopped is an error.
    pub async fn check_once(&self, container_id: &str, port: u16) -> Result<HealthCheck> {
        let state = match self.runtime.inspect_container(container_id).await {
            Ok(state) => state,
            Err(e) if e.is_not_found() => {
                return Err(Error::ContainerExited {
                    container_id: container_id.to_string(),
                    status: "removed".to_string(),
                });
            }
            Err(e) => return Ok(HealthCheck::Pending(format!("inspect failed: {e}"))),
        };

        if !state.is_up() {
            warn!(
                container_id = %container_id,
                status = %state.status,
                exit_code = state.exit_code,
                "Container stopped while waiting for health"
            );
            return Err(Error::ContainerExited {
                container_id: container_id.to_string(),
                status: state.status,
            });
        }

        match state.health {
            Some(HealthStatus::Healthy) => Ok(HealthCheck::Healthy),
            Some(status @ (HealthStatus::Unhealthy | HealthStatus::Starting | HealthStatus::None)) => {
                Ok(HealthCheck::Pending(format!("native status {status:?}")))
            }
            Some(HealthStatus::Other(_)) | None => {
                if self.manual_probe(container_id, port).await {
                    Ok(HealthCheck::Healthy)
                } else {
                    Ok(HealthCheck::Pending("manual probe failed".to_string()))
                }
            }
        }
    }

    /// Probe the application from inside its container.
    pub async fn manual_probe(&self, container_id: &str, port: u16) -> bool {
        let cmd = probe_command(port, &self.config.probe_path, self.config.probe_timeout_secs);
        match self.runtime.exec(container_id, cmd).await {
            Ok(0) => true,
            Ok(code) => {
                debug!(container_id = %container_id, exit_code = code, "Manual probe failed");
                false
            }
            Err(e) => {
                debug!(container_id = %container_id, error = %e, "Manual probe could not run");
                false
            }
        }
    }
}

/// Shell command for the manual probe.
///
/// Tries an HTTP request first, then falls back to checking that something
/// listens on the port, for images without an HTTP client.
pub fn probe_command(port: u16, path: &str, timeout_secs: u64) -> Vec<String> {
    let url = format!("http://localhost:{port}{path}");
    let script = format!(
        "wget -q --spider -T {timeout_secs} {url} >/dev/null 2>&1 \
         || curl -fsS -o /dev/null -m {timeout_secs} {url} >/dev/null 2>&1 \
         || netstat -tln 2>/dev/null | grep -q ':{port} '"
    );
    vec!["sh".to_string(), "-c".to_string(), script]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_command_targets_port() {
        let cmd = probe_command(8080, "/", 3);
        assert_eq!(cmd[0], "sh");
        assert_eq!(cmd[1], "-c");
        assert!(cmd[2].contains("http://localhost:8080/"));
        assert!(cmd[2].contains("':8080 '"));
        assert!(cmd[2].contains("-T 3"));
    }

    #[test]
    fn test_default_config() {
        let config = HealthCheckConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.interval, Duration::from_secs(2));
    }
}
