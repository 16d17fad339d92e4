// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment orchestration.
//!
//! [`Deployer`] sequences the network provisioner, lifecycle manager, health
//! verifier, crash monitor and log relay into a zero-downtime switchover.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use launchpad_deployer::deployer::Deployer;
//! use launchpad_deployer::runtime::DockerRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = Arc::new(DockerRuntime::connect(None)?);
//!
//!     let deployer = Deployer::builder().runtime(runtime).build()?;
//!     let result = deployer.deploy(request).await?;
//!
//!     // Crash monitor and log relay keep running in the background.
//!
//!     deployer.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Stages
//!
//! ```text
//! Pending -> NetworkReady -> ImageVerified -> Created -> Started
//!         -> HealthPending -> CutoverComplete -> Monitoring
//! ```
//!
//! `ImageMissing`, `CreateFailed` and `StartFailed` are terminal and leave no
//! new container behind. Health verification never fails a deployment: a
//! timeout or exit is logged and cutover proceeds. Old containers are only
//! touched after the new one has started.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::crash_monitor::{
    CrashMonitor, CrashMonitorConfig, CrashReporter, LoggingCrashReporter, MonitorTarget,
};
use crate::error::{Error, Result};
use crate::health::{HealthCheckConfig, HealthVerifier};
use crate::labels;
use crate::lifecycle::{ContainerManager, LifecycleConfig};
use crate::lifetime::TaskRegistry;
use crate::log_relay::{LogRelay, LogRelayConfig, LogSink, RelayTarget, TracingLogSink};
use crate::network::NetworkProvisioner;
use crate::runtime::{ContainerRuntime, HealthStatus};
use crate::types::{ContainerHandle, ContainerStatus, DeploymentRequest, DeploymentResult};

/// Stage of a deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentStage {
    /// Request accepted.
    Pending,
    /// Shared network exists.
    NetworkReady,
    /// Image resolves locally.
    ImageVerified,
    /// Container created.
    Created,
    /// Container started.
    Started,
    /// Waiting for health.
    HealthPending,
    /// Old containers retired.
    CutoverComplete,
    /// Background tasks running.
    Monitoring,
    /// Image never became visible.
    ImageMissing,
    /// Container could not be created.
    CreateFailed,
    /// Container could not be started.
    StartFailed,
}

impl DeploymentStage {
    /// Stage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStage::Pending => "pending",
            DeploymentStage::NetworkReady => "network-ready",
            DeploymentStage::ImageVerified => "image-verified",
            DeploymentStage::Created => "created",
            DeploymentStage::Started => "started",
            DeploymentStage::HealthPending => "health-pending",
            DeploymentStage::CutoverComplete => "cutover-complete",
            DeploymentStage::Monitoring => "monitoring",
            DeploymentStage::ImageMissing => "image-missing",
            DeploymentStage::CreateFailed => "create-failed",
            DeploymentStage::StartFailed => "start-failed",
        }
    }

    /// Whether this is a terminal failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DeploymentStage::ImageMissing
                | DeploymentStage::CreateFailed
                | DeploymentStage::StartFailed
        )
    }
}

impl fmt::Display for DeploymentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component configuration for the deployer.
#[derive(Debug, Clone, Default)]
pub struct DeployerConfig {
    /// Lifecycle manager settings.
    pub lifecycle: LifecycleConfig,
    /// Health verifier settings.
    pub health: HealthCheckConfig,
    /// Crash monitor settings.
    pub crash_monitor: CrashMonitorConfig,
    /// Log relay settings.
    pub log_relay: LogRelayConfig,
}

/// Read-only diagnosis of an application's deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Application checked.
    pub app_id: String,
    /// Running container that was checked, if any.
    pub container_id: Option<String>,
    /// A container is running.
    pub running: bool,
    /// The running container is tagged for proxy routing.
    pub routed: bool,
    /// The manual probe succeeded.
    pub reachable: bool,
    /// Human-readable problems, empty when everything checks out.
    pub problems: Vec<String>,
}

impl VerificationReport {
    /// Whether no problems were found.
    pub fn is_healthy(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Deletes data stored for an application once it is torn down.
#[async_trait]
pub trait AppDataPurger: Send + Sync {
    /// Delete everything stored for `app_id`, returning the rows removed.
    async fn purge_app(&self, app_id: &str) -> Result<u64>;
}

/// Builder for creating a [`Deployer`].
#[derive(Default)]
pub struct DeployerBuilder {
    runtime: Option<Arc<dyn ContainerRuntime>>,
    log_sink: Option<Arc<dyn LogSink>>,
    crash_reporter: Option<Arc<dyn CrashReporter>>,
    purger: Option<Arc<dyn AppDataPurger>>,
    config: DeployerConfig,
}

impl DeployerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the container runtime (required).
    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Set the log sink.
    ///
    /// Default: [`TracingLogSink`]
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Set the crash reporter.
    ///
    /// Default: [`LoggingCrashReporter`]
    pub fn crash_reporter(mut self, reporter: Arc<dyn CrashReporter>) -> Self {
        self.crash_reporter = Some(reporter);
        self
    }

    /// Set where stored logs and crashes are deleted on cleanup.
    ///
    /// Default: none, stored data is kept.
    pub fn purger(mut self, purger: Arc<dyn AppDataPurger>) -> Self {
        self.purger = Some(purger);
        self
    }

    /// Set the component configuration.
    pub fn config(mut self, config: DeployerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the deployer.
    pub fn build(self) -> Result<Deployer> {
        let runtime = self
            .runtime
            .ok_or_else(|| Error::Other("container runtime is required".to_string()))?;
        let config = self.config;

        Ok(Deployer {
            network: NetworkProvisioner::new(runtime.clone(), config.lifecycle.network.clone()),
            lifecycle: ContainerManager::new(runtime.clone(), config.lifecycle.clone()),
            health: HealthVerifier::new(runtime.clone(), config.health.clone()),
            log_sink: self.log_sink.unwrap_or_else(|| Arc::new(TracingLogSink)),
            crash_reporter: self
                .crash_reporter
                .unwrap_or_else(|| Arc::new(LoggingCrashReporter)),
            purger: self.purger,
            tasks: TaskRegistry::new(),
            app_locks: Mutex::new(HashMap::new()),
            runtime,
            config,
        })
    }
}

/// Deploys applications as single routed containers.
pub struct Deployer {
    runtime: Arc<dyn ContainerRuntime>,
    network: NetworkProvisioner,
    lifecycle: ContainerManager,
    health: HealthVerifier,
    log_sink: Arc<dyn LogSink>,
    crash_reporter: Arc<dyn CrashReporter>,
    purger: Option<Arc<dyn AppDataPurger>>,
    config: DeployerConfig,
    tasks: TaskRegistry,
    app_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Deployer {
    /// Create a builder.
    pub fn builder() -> DeployerBuilder {
        DeployerBuilder::new()
    }

    /// The lifecycle manager.
    pub fn lifecycle(&self) -> &ContainerManager {
        &self.lifecycle
    }

    /// The background task registry.
    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    async fn app_lock(&self, app_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.app_locks.lock().await;
        locks
            .entry(app_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry of a deleted application unless another caller
    /// is waiting on it.
    async fn release_app_lock(&self, app_id: &str, lock: &Arc<Mutex<()>>) {
        let mut locks = self.app_locks.lock().await;
        // One handle in the map, one held by the caller.
        if Arc::strong_count(lock) == 2 {
            locks.remove(app_id);
        }
    }

    /// Number of applications with a deploy lock entry.
    pub async fn locked_apps(&self) -> usize {
        self.app_locks.lock().await.len()
    }

    fn advance(request: &DeploymentRequest, stage: &mut DeploymentStage, next: DeploymentStage) {
        *stage = next;
        if next.is_failure() {
            warn!(
                app_id = %request.app_id,
                deployment_id = %request.deployment_id,
                stage = %next,
                "Deployment failed"
            );
        } else {
            info!(
                app_id = %request.app_id,
                deployment_id = %request.deployment_id,
                stage = %next,
                "Deployment stage"
            );
        }
    }

    /// Deploy an application, replacing any previous deployment.
    ///
    /// Deployments of the same application are serialized.
    pub async fn deploy(&self, request: DeploymentRequest) -> Result<DeploymentResult> {
        request.validate()?;

        let lock = self.app_lock(&request.app_id).await;
        let _guard = lock.lock_owned().await;

        let mut stage = DeploymentStage::Pending;
        info!(
            app_id = %request.app_id,
            deployment_id = %request.deployment_id,
            image = %request.image,
            stage = %stage,
            "Deployment started"
        );

        self.network.ensure_network().await?;
        Self::advance(&request, &mut stage, DeploymentStage::NetworkReady);

        if let Err(e) = self.lifecycle.wait_for_image(&request.image).await {
            Self::advance(&request, &mut stage, DeploymentStage::ImageMissing);
            return Err(e);
        }
        Self::advance(&request, &mut stage, DeploymentStage::ImageVerified);

        let mut handle = match self.lifecycle.create_container(&request).await {
            Ok(handle) => handle,
            Err(Error::ImageNotFound(image)) => {
                Self::advance(&request, &mut stage, DeploymentStage::ImageMissing);
                return Err(Error::ImageNotFound(image));
            }
            Err(e) => {
                Self::advance(&request, &mut stage, DeploymentStage::CreateFailed);
                return Err(e);
            }
        };
        Self::advance(&request, &mut stage, DeploymentStage::Created);

        if let Err(e) = self.lifecycle.start(&mut handle).await {
            Self::advance(&request, &mut stage, DeploymentStage::StartFailed);
            return Err(e);
        }
        Self::advance(&request, &mut stage, DeploymentStage::Started);

        // From here on the new container exists and nothing fails the run.
        Self::advance(&request, &mut stage, DeploymentStage::HealthPending);
        let health_confirmed = match self
            .health
            .wait_until_healthy(&handle.container_id, request.port)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    app_id = %request.app_id,
                    container_id = %handle.container_id,
                    error = %e,
                    "Health not confirmed, proceeding with cutover"
                );
                false
            }
        };
        handle.status = ContainerStatus::HealthyOrTimedOut;

        let retired = self.cutover(&request, &handle).await;
        handle.status = ContainerStatus::Running;
        Self::advance(&request, &mut stage, DeploymentStage::CutoverComplete);

        self.spawn_background(&request, &handle).await;
        Self::advance(&request, &mut stage, DeploymentStage::Monitoring);

        info!(
            app_id = %request.app_id,
            deployment_id = %request.deployment_id,
            container_id = %handle.container_id,
            retired = retired.len(),
            health_confirmed,
            "Deployment complete"
        );

        Ok(DeploymentResult {
            container_name: handle.name.clone(),
            container: handle,
            retired,
            health_confirmed,
        })
    }

    async fn cutover(&self, request: &DeploymentRequest, new: &ContainerHandle) -> Vec<String> {
        // Intentional stops must not be reported as crashes.
        self.tasks.retire_monitors(&request.app_id).await;

        match self
            .lifecycle
            .stop_and_remove(&request.app_id, &new.container_id)
            .await
        {
            Ok(retired) => retired,
            Err(e) => {
                warn!(
                    app_id = %request.app_id,
                    error = %e,
                    "Failed to retire old containers"
                );
                Vec::new()
            }
        }
    }

    async fn spawn_background(&self, request: &DeploymentRequest, handle: &ContainerHandle) {
        let monitor = CrashMonitor::new(
            self.runtime.clone(),
            self.crash_reporter.clone(),
            self.config.crash_monitor.clone(),
            MonitorTarget {
                app_id: request.app_id.clone(),
                deployment_id: request.deployment_id.clone(),
                container_id: handle.container_id.clone(),
            },
        );
        let token = self
            .tasks
            .monitor_token(&request.app_id, &handle.container_id)
            .await;
        let monitor_task = tokio::spawn(monitor.run(token));
        self.tasks.track(&request.app_id, monitor_task).await;

        let relay = LogRelay::new(
            self.runtime.clone(),
            self.log_sink.clone(),
            self.config.log_relay.clone(),
        );
        let target = RelayTarget {
            app_id: request.app_id.clone(),
            deployment_id: request.deployment_id.clone(),
            container_id: handle.container_id.clone(),
        };
        let token = self.tasks.app_token(&request.app_id).await;
        let relay_task = tokio::spawn(async move {
            relay.stream_and_persist(&target, token).await;
        });
        self.tasks.track(&request.app_id, relay_task).await;

        debug!(
            app_id = %request.app_id,
            container_id = %handle.container_id,
            "Background tasks spawned"
        );
    }

    /// Diagnose an application's deployment without changing anything.
    pub async fn verify_deployment(&self, app_id: &str) -> Result<VerificationReport> {
        let mut report = VerificationReport {
            app_id: app_id.to_string(),
            ..Default::default()
        };

        let containers = self.lifecycle.find_by_app_id(app_id).await?;
        let running: Vec<&ContainerHandle> = containers
            .iter()
            .filter(|c| c.status == ContainerStatus::Running)
            .collect();

        let Some(current) = running.first() else {
            if containers.is_empty() {
                report
                    .problems
                    .push(format!("no container found for app {app_id}"));
            } else {
                report.problems.push(format!(
                    "{} container(s) found for app {app_id} but none running",
                    containers.len()
                ));
            }
            return Ok(report);
        };

        report.running = true;
        report.container_id = Some(current.container_id.clone());
        if running.len() > 1 {
            report.problems.push(format!(
                "{} containers running for app {app_id}, expected 1",
                running.len()
            ));
        }

        let state = self.runtime.inspect_container(&current.container_id).await?;
        let router = labels::router_name(app_id);

        let proxy_enabled = state
            .labels
            .get(labels::PROXY_ENABLE_LABEL)
            .is_some_and(|v| v == "true");
        let has_rule = state
            .labels
            .contains_key(&labels::router_rule_label(&router));
        if !proxy_enabled {
            report
                .problems
                .push("container is not enabled for proxy routing".to_string());
        }
        if !has_rule {
            report
                .problems
                .push(format!("container has no routing rule for router {router}"));
        }
        match state.labels.get(labels::PROXY_NETWORK_LABEL) {
            Some(network) if network == self.network.network() => {}
            Some(network) => report.problems.push(format!(
                "container routed via network {network}, expected {}",
                self.network.network()
            )),
            None => report
                .problems
                .push("container has no proxy network label".to_string()),
        }
        report.routed = proxy_enabled && has_rule;

        if state.health == Some(HealthStatus::Unhealthy) {
            report
                .problems
                .push("runtime reports container unhealthy".to_string());
        }

        let port = state
            .labels
            .get(&labels::service_port_label(&router))
            .and_then(|p| p.parse::<u16>().ok());
        match port {
            Some(port) => {
                report.reachable = self
                    .health
                    .manual_probe(&current.container_id, port)
                    .await;
                if !report.reachable {
                    report.problems.push(format!(
                        "application not reachable on port {port} inside container"
                    ));
                }
            }
            None => report
                .problems
                .push("container has no service port label".to_string()),
        }

        Ok(report)
    }

    /// Tear down every container and image of an application and stop its
    /// background tasks.
    ///
    /// Stored logs and crash reports are deleted when a purger is configured.
    pub async fn cleanup_app_resources(&self, app_id: &str) -> Result<()> {
        let lock = self.app_lock(app_id).await;
        let guard = lock.lock().await;

        self.tasks.cancel_app(app_id).await;
        self.lifecycle.cleanup_all(app_id).await?;

        if let Some(purger) = &self.purger {
            let rows = purger.purge_app(app_id).await?;
            debug!(app_id = %app_id, rows, "Stored application data purged");
        }

        drop(guard);
        self.release_app_lock(app_id, &lock).await;

        info!(app_id = %app_id, "Application resources cleaned up");
        Ok(())
    }

    /// Stop all background tasks.
    pub async fn shutdown(&self) {
        info!("Shutting down deployer background tasks");
        self.tasks.cancel_all().await;
        info!("Deployer shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;

    #[test]
    fn test_stage_names() {
        assert_eq!(DeploymentStage::CutoverComplete.as_str(), "cutover-complete");
        assert!(DeploymentStage::StartFailed.is_failure());
        assert!(!DeploymentStage::HealthPending.is_failure());
    }

    #[test]
    fn test_builder_requires_runtime() {
        assert!(Deployer::builder().build().is_err());
        assert!(
            Deployer::builder()
                .runtime(Arc::new(MockRuntime::new()))
                .build()
                .is_ok()
        );
    }
}
