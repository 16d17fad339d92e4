// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container runtime trait definitions.
//!
//! Defines the abstract interface the deployer drives. Implementations wrap a
//! real engine (Docker) or simulate one in memory.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Errors from runtime operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// The object (container, image, network, exec) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The runtime rejected the request.
    #[error("Runtime API error: {0}")]
    Api(String),

    /// The call did not finish within its bound.
    #[error("Runtime call timed out: {0}")]
    Timeout(String),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

impl RuntimeError {
    /// Whether the error means the target object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Restart policy applied to application containers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Never restart.
    No,
    /// Always restart.
    Always,
    /// Restart unless explicitly stopped.
    #[default]
    UnlessStopped,
    /// Restart only on non-zero exit.
    OnFailure,
}

impl RestartPolicy {
    /// Parse a policy name.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "no" | "none" => Some(RestartPolicy::No),
            "always" => Some(RestartPolicy::Always),
            "unless-stopped" => Some(RestartPolicy::UnlessStopped),
            "on-failure" => Some(RestartPolicy::OnFailure),
            _ => None,
        }
    }
}

/// Everything the runtime needs to create a container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Environment in `KEY=value` form, in injection order.
    pub env: Vec<String>,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Port exposed by the application.
    pub exposed_port: u16,
    /// Network to attach to.
    pub network: String,
    /// Memory limit in bytes.
    pub memory_bytes: i64,
    /// Memory + swap limit in bytes.
    pub memory_swap_bytes: i64,
    /// CPU quota in nano-CPUs.
    pub nano_cpus: i64,
    /// Restart policy.
    pub restart_policy: RestartPolicy,
}

/// Native health-check status reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Health check passing.
    Healthy,
    /// Health check failing.
    Unhealthy,
    /// Health check still in its start period.
    Starting,
    /// Health check configured but reporting nothing.
    None,
    /// Any status this crate does not recognise.
    Other(String),
}

impl HealthStatus {
    /// Parse a runtime health status string.
    pub fn parse(status: &str) -> Self {
        match status {
            "healthy" => HealthStatus::Healthy,
            "unhealthy" => HealthStatus::Unhealthy,
            "starting" => HealthStatus::Starting,
            "none" | "" => HealthStatus::None,
            other => HealthStatus::Other(other.to_string()),
        }
    }
}

/// Point-in-time view of a container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerState {
    /// Container ID.
    pub id: String,
    /// Container name without leading slash.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Whether the main process is running.
    pub running: bool,
    /// Whether the runtime is restarting the container after an exit.
    /// Runtimes keep `running` set while this is true.
    pub restarting: bool,
    /// Runtime status string (`running`, `exited`, `restarting`, ...).
    pub status: String,
    /// Exit code of the last run.
    pub exit_code: i64,
    /// Runtime-reported error, empty if none.
    pub error: String,
    /// Number of automatic restarts performed by the runtime.
    pub restart_count: i64,
    /// Native health status, `None` when the image has no health check.
    pub health: Option<HealthStatus>,
    /// Labels.
    pub labels: BTreeMap<String, String>,
}

impl ContainerState {
    /// Whether the container is serving: running and not being restarted.
    pub fn is_up(&self) -> bool {
        self.running && !self.restarting && self.status != "restarting"
    }
}

/// Entry from a container listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSummary {
    /// Container ID.
    pub id: String,
    /// Container name without leading slash.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Runtime state string.
    pub state: String,
    /// Labels.
    pub labels: BTreeMap<String, String>,
}

impl ContainerSummary {
    /// Whether the container is running.
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Entry from an image listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSummary {
    /// Image ID.
    pub id: String,
    /// Repository tags.
    pub tags: Vec<String>,
}

/// Output stream a log chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl LogStream {
    /// Stream name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

/// One chunk of container output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    /// Source stream.
    pub stream: LogStream,
    /// Raw bytes, timestamp-prefixed when requested.
    pub message: Vec<u8>,
}

/// Options for following container logs.
#[derive(Debug, Clone, Copy)]
pub struct FollowOptions {
    /// Lines of history to start from.
    pub tail: usize,
    /// Prefix each line with an RFC 3339 timestamp.
    pub timestamps: bool,
}

/// Trait for container runtimes.
///
/// Runtimes are PURE I/O adapters - they hold no deployment state.
/// Sequencing and policy live in the lifecycle manager and orchestrator.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Runtime type identifier (e.g., "docker", "mock").
    fn runtime_type(&self) -> &'static str;

    /// Whether a network with this name exists.
    async fn network_exists(&self, name: &str) -> Result<bool>;

    /// Create a bridge network with default IPAM.
    async fn create_network(&self, name: &str) -> Result<()>;

    /// Whether an image reference resolves locally.
    async fn image_exists(&self, reference: &str) -> Result<bool>;

    /// List images carrying a label (`key=value`).
    async fn list_images(&self, label: &str) -> Result<Vec<ImageSummary>>;

    /// Remove an image.
    async fn remove_image(&self, id: &str, force: bool) -> Result<()>;

    /// Create a container and return its ID.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a created container.
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Stop a container, killing it after `timeout`.
    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()>;

    /// Remove a container.
    async fn remove_container(&self, id: &str, force: bool) -> Result<()>;

    /// List running and stopped containers carrying a label (`key=value`).
    async fn list_containers(&self, label: &str) -> Result<Vec<ContainerSummary>>;

    /// Inspect a container.
    async fn inspect_container(&self, id: &str) -> Result<ContainerState>;

    /// Run a command inside a container and return its exit code.
    async fn exec(&self, id: &str, cmd: Vec<String>) -> Result<i64>;

    /// Last `lines` lines of combined stdout/stderr.
    async fn tail_logs(&self, id: &str, lines: usize) -> Result<Vec<String>>;

    /// Follow container output until the container goes away.
    fn follow_logs(&self, id: &str, options: FollowOptions) -> BoxStream<'static, Result<LogChunk>>;
}
