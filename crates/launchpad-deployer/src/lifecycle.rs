// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container lifecycle management.
//!
//! The [`ContainerManager`] is the only component that creates, starts, stops
//! or removes application containers. Every container it creates carries the
//! `app.id` label so later runs (and cleanup) can find it again.
//!
//! # Environment
//!
//! The platform `PORT` variable is injected first and unconditionally. A
//! user-supplied `PORT` is dropped: proxy routing and health checks assume one
//! canonical port per application.
//!
//! # Image resolution
//!
//! A freshly built image is not always visible to this runtime connection
//! immediately. [`ContainerManager::wait_for_image`] retries the lookup with
//! exponential backoff and gives up with [`Error::ImageNotFound`]. Images are
//! never pulled from a registry.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::labels::{self, RoutingConfig};
use crate::runtime::{ContainerRuntime, ContainerSpec, ContainerSummary, RestartPolicy};
use crate::types::{ContainerHandle, ContainerStatus, DeploymentRequest};

/// Configuration for the lifecycle manager.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Shared network containers attach to.
    pub network: String,
    /// Certificate resolver referenced by TLS routers.
    pub cert_resolver: String,
    /// Restart policy for application containers.
    pub restart_policy: RestartPolicy,
    /// Bound on a container start.
    pub start_timeout: Duration,
    /// Grace period before a stopped container is killed.
    pub stop_timeout: Duration,
    /// Image lookups before giving up.
    pub image_retry_attempts: u32,
    /// Delay after the first failed lookup; doubles on each retry.
    pub image_retry_base_delay: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            network: "launchpad".to_string(),
            cert_resolver: "letsencrypt".to_string(),
            restart_policy: RestartPolicy::UnlessStopped,
            start_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(10),
            image_retry_attempts: 5,
            image_retry_base_delay: Duration::from_millis(500),
        }
    }
}

/// Derive a lifecycle status from a runtime state string.
pub fn status_from_runtime(state: &str) -> ContainerStatus {
    match state {
        "created" => ContainerStatus::Created,
        "running" => ContainerStatus::Running,
        "restarting" => ContainerStatus::Crashed,
        "removing" => ContainerStatus::Removed,
        _ => ContainerStatus::Stopped,
    }
}

fn handle_from_summary(summary: ContainerSummary) -> ContainerHandle {
    ContainerHandle {
        status: status_from_runtime(&summary.state),
        container_id: summary.id,
        name: summary.name,
        image: summary.image,
    }
}

/// Creates, starts and tears down application containers.
pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
    config: LifecycleConfig,
}

impl ContainerManager {
    /// Create a new manager.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: LifecycleConfig) -> Self {
        Self { runtime, config }
    }

    /// Manager configuration.
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// All containers, running or stopped, tagged for `app_id`.
    pub async fn find_by_app_id(&self, app_id: &str) -> Result<Vec<ContainerHandle>> {
        let containers = self
            .runtime
            .list_containers(&labels::app_selector(app_id))
            .await?;
        Ok(containers.into_iter().map(handle_from_summary).collect())
    }

    /// Wait until `reference` resolves locally.
    pub async fn wait_for_image(&self, reference: &str) -> Result<()> {
        let attempts = self.config.image_retry_attempts.max(1);
        let mut delay = self.config.image_retry_base_delay;

        for attempt in 1..=attempts {
            if self.runtime.image_exists(reference).await? {
                if attempt > 1 {
                    info!(image = %reference, attempt, "Image became visible");
                }
                return Ok(());
            }

            if attempt < attempts {
                debug!(
                    image = %reference,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Image not visible yet, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        warn!(image = %reference, attempts, "Image not found after retries");
        Err(Error::ImageNotFound(reference.to_string()))
    }

    /// Environment in injection order: platform `PORT` first, then user
    /// variables sorted by key, any user `PORT` discarded.
    pub fn build_env(request: &DeploymentRequest) -> Vec<String> {
        let mut env = Vec::with_capacity(request.env.len() + 1);
        env.push(format!("PORT={}", request.port));
        for (key, value) in &request.env {
            if key == "PORT" {
                warn!(app_id = %request.app_id, "Ignoring user-supplied PORT");
                continue;
            }
            env.push(format!("{key}={value}"));
        }
        env
    }

    /// Build the runtime spec for a request.
    pub fn build_spec(&self, request: &DeploymentRequest) -> ContainerSpec {
        let limits = labels::to_runtime_limits(&request.limits);
        let routing = RoutingConfig {
            app_id: request.app_id.clone(),
            subdomain: request.subdomain.clone(),
            port: request.port,
            network: self.config.network.clone(),
            cert_resolver: self.config.cert_resolver.clone(),
            mode: request.routing_mode,
        };
        let suffix = uuid::Uuid::new_v4().simple().to_string();

        ContainerSpec {
            name: format!("app-{}-{}", request.app_id, &suffix[..8]),
            image: request.image.clone(),
            env: Self::build_env(request),
            labels: labels::to_routing_labels(&routing),
            exposed_port: request.port,
            network: self.config.network.clone(),
            memory_bytes: limits.memory_bytes,
            memory_swap_bytes: limits.memory_swap_bytes,
            nano_cpus: limits.nano_cpus,
            restart_policy: self.config.restart_policy,
        }
    }

    /// Resolve the image and create the container.
    pub async fn create(&self, request: &DeploymentRequest) -> Result<ContainerHandle> {
        self.wait_for_image(&request.image).await?;
        self.create_container(request).await
    }

    /// Create the container for an image already known to resolve.
    pub async fn create_container(&self, request: &DeploymentRequest) -> Result<ContainerHandle> {
        request.validate()?;
        let spec = self.build_spec(request);
        let container_id = match self.runtime.create_container(&spec).await {
            Ok(id) => id,
            Err(e) if e.is_not_found() => {
                return Err(Error::ImageNotFound(request.image.clone()));
            }
            Err(e) => return Err(Error::CreateFailed(e.to_string())),
        };

        info!(
            app_id = %request.app_id,
            container_id = %container_id,
            name = %spec.name,
            image = %spec.image,
            "Container created"
        );

        Ok(ContainerHandle {
            container_id,
            name: spec.name,
            image: spec.image,
            status: ContainerStatus::Created,
        })
    }

    /// Start a created container. On failure the container is removed.
    pub async fn start(&self, handle: &mut ContainerHandle) -> Result<()> {
        handle.status = ContainerStatus::Starting;

        let failure = match tokio::time::timeout(
            self.config.start_timeout,
            self.runtime.start_container(&handle.container_id),
        )
        .await
        {
            Ok(Ok(())) => {
                handle.status = ContainerStatus::HealthPending;
                info!(container_id = %handle.container_id, "Container started");
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "start did not finish within {}s",
                self.config.start_timeout.as_secs()
            ),
        };

        warn!(
            container_id = %handle.container_id,
            error = %failure,
            "Container start failed, removing"
        );
        match self
            .runtime
            .remove_container(&handle.container_id, true)
            .await
        {
            Ok(()) => handle.status = ContainerStatus::Removed,
            Err(e) => warn!(
                container_id = %handle.container_id,
                error = %e,
                "Failed to remove container after start failure"
            ),
        }

        Err(Error::StartFailed(failure))
    }

    /// Stop and remove every container tagged for `app_id` except `exclude`.
    ///
    /// Best-effort: containers that fail to stop or remove are logged and
    /// skipped. Returns the IDs actually retired.
    pub async fn stop_and_remove(&self, app_id: &str, exclude: &str) -> Result<Vec<String>> {
        let containers = self
            .runtime
            .list_containers(&labels::app_selector(app_id))
            .await?;

        let mut retired = Vec::new();
        for container in containers.into_iter().filter(|c| c.id != exclude) {
            if let Err(e) = self
                .runtime
                .stop_container(&container.id, self.config.stop_timeout)
                .await
            {
                if !e.is_not_found() {
                    warn!(
                        app_id = %app_id,
                        container_id = %container.id,
                        error = %e,
                        "Failed to stop old container, skipping"
                    );
                    continue;
                }
            }

            match self.runtime.remove_container(&container.id, true).await {
                Ok(()) => {
                    info!(app_id = %app_id, container_id = %container.id, "Retired old container");
                    retired.push(container.id);
                }
                Err(e) if e.is_not_found() => retired.push(container.id),
                Err(e) => warn!(
                    app_id = %app_id,
                    container_id = %container.id,
                    error = %e,
                    "Failed to remove old container, skipping"
                ),
            }
        }

        Ok(retired)
    }

    /// Force-remove every container and image tagged for `app_id`.
    ///
    /// Every resource is attempted even if earlier ones fail; failures are
    /// reported together.
    pub async fn cleanup_all(&self, app_id: &str) -> Result<()> {
        let selector = labels::app_selector(app_id);
        let mut failures = Vec::new();

        for container in self.runtime.list_containers(&selector).await? {
            if let Err(e) = self
                .runtime
                .stop_container(&container.id, self.config.stop_timeout)
                .await
            {
                debug!(container_id = %container.id, error = %e, "Stop before removal failed");
            }
            match self.runtime.remove_container(&container.id, true).await {
                Ok(()) => info!(app_id = %app_id, container_id = %container.id, "Removed container"),
                Err(e) if e.is_not_found() => {}
                Err(e) => failures.push(format!("container {}: {}", container.id, e)),
            }
        }

        for image in self.runtime.list_images(&selector).await? {
            match self.runtime.remove_image(&image.id, true).await {
                Ok(()) => info!(app_id = %app_id, image_id = %image.id, tags = ?image.tags, "Removed image"),
                Err(e) if e.is_not_found() => {}
                Err(e) => failures.push(format!("image {}: {}", image.id, e)),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Other(format!(
                "cleanup of app {app_id} incomplete: {}",
                failures.join("; ")
            )))
        }
    }
}
