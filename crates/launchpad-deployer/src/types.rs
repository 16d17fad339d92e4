// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Core data model for deployment runs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Resource budget requested by the application's plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory budget in MB. Swap is always pinned to the same value.
    pub memory_mb: u64,
    /// CPU budget as a fraction of one core (0.5 = half a core).
    pub cpu: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            cpu: 1.0,
        }
    }
}

/// How the deployable unit was produced.
///
/// Compose builds are still run as a single container; the mode is only
/// carried through to the routing labels for discovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// A single image built from the repository.
    #[default]
    Single,
    /// A compose project treated as one deployable unit.
    Compose,
}

impl RoutingMode {
    /// Label value for this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingMode::Single => "single",
            RoutingMode::Compose => "compose",
        }
    }
}

/// Input to one orchestration run. Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRequest {
    /// Application identifier.
    pub app_id: String,
    /// Deployment identifier.
    pub deployment_id: String,
    /// Image reference (`name:tag`) produced by the image builder.
    pub image: String,
    /// Hostname the reverse proxy routes to this application.
    pub subdomain: String,
    /// Port the application listens on inside the container.
    pub port: u16,
    /// Plan resource limits.
    #[serde(default)]
    pub limits: ResourceLimits,
    /// User environment variables. `PORT` is always overridden by the platform.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Single-container or compose routing.
    #[serde(default)]
    pub routing_mode: RoutingMode,
}

impl DeploymentRequest {
    /// Check the request for values the runtime would reject.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.app_id.trim().is_empty() {
            return Err(crate::error::Error::InvalidRequest(
                "app_id must not be empty".to_string(),
            ));
        }
        if self.image.trim().is_empty() {
            return Err(crate::error::Error::InvalidRequest(
                "image must not be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(crate::error::Error::InvalidRequest(
                "port must be non-zero".to_string(),
            ));
        }
        if !self.limits.cpu.is_finite() || self.limits.cpu < 0.0 {
            return Err(crate::error::Error::InvalidRequest(format!(
                "cpu limit must be a non-negative number, got {}",
                self.limits.cpu
            )));
        }
        Ok(())
    }
}

/// Lifecycle status of a container owned by the lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerStatus {
    /// Container exists but was never started.
    Created,
    /// Start has been requested.
    Starting,
    /// Started and waiting for the health verifier.
    HealthPending,
    /// Health verifier finished, healthy or timed out.
    HealthyOrTimedOut,
    /// Serving and monitored.
    Running,
    /// Terminated unexpectedly.
    Crashed,
    /// Stopped intentionally.
    Stopped,
    /// Removed from the runtime.
    Removed,
}

impl ContainerStatus {
    /// Status string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Starting => "starting",
            ContainerStatus::HealthPending => "health-pending",
            ContainerStatus::HealthyOrTimedOut => "healthy-or-timed-out",
            ContainerStatus::Running => "running",
            ContainerStatus::Crashed => "crashed",
            ContainerStatus::Stopped => "stopped",
            ContainerStatus::Removed => "removed",
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime identity of a container plus its derived lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    /// Runtime container ID.
    pub container_id: String,
    /// Generated container name.
    pub name: String,
    /// Image the container was created from.
    pub image: String,
    /// Lifecycle status.
    pub status: ContainerStatus,
}

/// Output of a successful orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResult {
    /// The container now serving the application.
    pub container: ContainerHandle,
    /// Assigned container name.
    pub container_name: String,
    /// Containers stopped and removed during cutover, in removal order.
    pub retired: Vec<String>,
    /// Whether the health verifier confirmed the container before cutover.
    pub health_confirmed: bool,
}
