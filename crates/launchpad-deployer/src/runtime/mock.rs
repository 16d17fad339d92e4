// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock runtime for testing.
//!
//! A simple runtime implementation that simulates a container engine in
//! memory, without talking to a daemon.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::sync::Mutex;

use super::traits::*;

/// Mock container state.
#[derive(Debug, Clone)]
struct MockContainer {
    spec: ContainerSpec,
    state: ContainerState,
    /// Native health statuses returned by successive inspects.
    health_script: VecDeque<HealthStatus>,
    logs: Vec<(LogStream, String)>,
}

#[derive(Debug, Default)]
struct MockState {
    networks: HashSet<String>,
    network_creates: usize,
    /// reference -> (image id, labels)
    images: HashMap<String, (String, BTreeMap<String, String>)>,
    /// reference -> inspects remaining before the image becomes visible
    pending_images: HashMap<String, usize>,
    image_inspects: usize,
    containers: BTreeMap<String, MockContainer>,
    next_id: u64,
    fail_start: bool,
    fail_stop: HashSet<String>,
    exec_exit_code: i64,
    exec_calls: usize,
}

/// Mock runtime for testing.
#[derive(Clone, Default)]
pub struct MockRuntime {
    state: Arc<Mutex<MockState>>,
}

impl MockRuntime {
    /// Create a new mock runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an image reference resolvable.
    pub async fn add_image(&self, reference: &str) {
        self.add_image_with_labels(reference, BTreeMap::new()).await;
    }

    /// Make an image reference resolvable, with labels.
    pub async fn add_image_with_labels(&self, reference: &str, labels: BTreeMap<String, String>) {
        let mut state = self.state.lock().await;
        let id = format!("sha256:{:016x}", state.images.len() + 1);
        state.images.insert(reference.to_string(), (id, labels));
    }

    /// Make an image visible only after `inspects` failed lookups.
    pub async fn add_image_after(&self, reference: &str, inspects: usize) {
        let mut state = self.state.lock().await;
        state.pending_images.insert(reference.to_string(), inspects);
    }

    /// Number of image lookups performed.
    pub async fn image_inspects(&self) -> usize {
        self.state.lock().await.image_inspects
    }

    /// Number of networks created.
    pub async fn network_creates(&self) -> usize {
        self.state.lock().await.network_creates
    }

    /// Whether the network exists.
    pub async fn has_network(&self, name: &str) -> bool {
        self.state.lock().await.networks.contains(name)
    }

    /// Seed an existing container with the given labels.
    pub async fn seed_container(
        &self,
        image: &str,
        labels: BTreeMap<String, String>,
        running: bool,
    ) -> String {
        let mut state = self.state.lock().await;
        let id = next_container_id(&mut state);
        let name = format!("seed-{id}");
        let spec = ContainerSpec {
            name: name.clone(),
            image: image.to_string(),
            env: Vec::new(),
            labels: labels.clone(),
            exposed_port: 0,
            network: String::new(),
            memory_bytes: 0,
            memory_swap_bytes: 0,
            nano_cpus: 0,
            restart_policy: RestartPolicy::No,
        };
        let container = MockContainer {
            state: ContainerState {
                id: id.clone(),
                name,
                image: image.to_string(),
                running,
                restarting: false,
                status: if running { "running" } else { "exited" }.to_string(),
                exit_code: 0,
                error: String::new(),
                restart_count: 0,
                health: None,
                labels,
            },
            spec,
            health_script: VecDeque::new(),
            logs: Vec::new(),
        };
        state.containers.insert(id.clone(), container);
        id
    }

    /// Script native health statuses returned by successive inspects.
    /// The last scripted status sticks.
    pub async fn set_health_script(&self, id: &str, script: Vec<HealthStatus>) {
        let mut state = self.state.lock().await;
        if let Some(container) = state.containers.get_mut(id) {
            container.health_script = script.into();
        }
    }

    /// Mark a container as exited.
    pub async fn set_exited(&self, id: &str, exit_code: i64, error: &str) {
        let mut state = self.state.lock().await;
        if let Some(container) = state.containers.get_mut(id) {
            container.state.running = false;
            container.state.restarting = false;
            container.state.status = "exited".to_string();
            container.state.exit_code = exit_code;
            container.state.error = error.to_string();
        }
    }

    /// Mark a container as running again, as a runtime restart would.
    pub async fn set_running(&self, id: &str) {
        let mut state = self.state.lock().await;
        if let Some(container) = state.containers.get_mut(id) {
            container.state.running = true;
            container.state.restarting = false;
            container.state.status = "running".to_string();
            container.state.error = String::new();
        }
    }

    /// Mark a container as crashed and being restarted by its restart
    /// policy. The process counts as running, as it does in Docker.
    pub async fn set_restarting(&self, id: &str, exit_code: i64) {
        let mut state = self.state.lock().await;
        if let Some(container) = state.containers.get_mut(id) {
            container.state.running = true;
            container.state.restarting = true;
            container.state.status = "restarting".to_string();
            container.state.exit_code = exit_code;
            container.state.restart_count += 1;
        }
    }

    /// Set the runtime restart counter.
    pub async fn set_restart_count(&self, id: &str, count: i64) {
        let mut state = self.state.lock().await;
        if let Some(container) = state.containers.get_mut(id) {
            container.state.restart_count = count;
        }
    }

    /// Append output lines to a container.
    pub async fn push_logs(&self, id: &str, stream: LogStream, lines: &[&str]) {
        let mut state = self.state.lock().await;
        if let Some(container) = state.containers.get_mut(id) {
            container
                .logs
                .extend(lines.iter().map(|l| (stream, l.to_string())));
        }
    }

    /// Make every start fail.
    pub async fn fail_starts(&self, fail: bool) {
        self.state.lock().await.fail_start = fail;
    }

    /// Make stopping a specific container fail.
    pub async fn fail_stop(&self, id: &str) {
        self.state.lock().await.fail_stop.insert(id.to_string());
    }

    /// Exit code returned by exec probes.
    pub async fn set_exec_exit_code(&self, code: i64) {
        self.state.lock().await.exec_exit_code = code;
    }

    /// Number of exec calls performed.
    pub async fn exec_calls(&self) -> usize {
        self.state.lock().await.exec_calls
    }

    /// The spec a container was created with.
    pub async fn container_spec(&self, id: &str) -> Option<ContainerSpec> {
        let state = self.state.lock().await;
        state.containers.get(id).map(|c| c.spec.clone())
    }

    /// IDs of all known containers.
    pub async fn container_ids(&self) -> Vec<String> {
        self.state.lock().await.containers.keys().cloned().collect()
    }

    /// Number of images known.
    pub async fn image_count(&self) -> usize {
        self.state.lock().await.images.len()
    }
}

fn next_container_id(state: &mut MockState) -> String {
    state.next_id += 1;
    format!("mock{:08x}", state.next_id)
}

fn label_matches(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    match selector.split_once('=') {
        Some((key, value)) => labels.get(key).is_some_and(|v| v == value),
        None => labels.contains_key(selector),
    }
}

fn not_found(kind: &str, id: &str) -> RuntimeError {
    RuntimeError::NotFound(format!("no such {kind}: {id}"))
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn runtime_type(&self) -> &'static str {
        "mock"
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().await.networks.contains(name))
    }

    async fn create_network(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.networks.insert(name.to_string());
        state.network_creates += 1;
        Ok(())
    }

    async fn image_exists(&self, reference: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.image_inspects += 1;

        if let Some(remaining) = state.pending_images.get_mut(reference) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(false);
            }
            state.pending_images.remove(reference);
            let id = format!("sha256:{:016x}", state.images.len() + 1);
            state
                .images
                .insert(reference.to_string(), (id, BTreeMap::new()));
        }

        Ok(state.images.contains_key(reference))
    }

    async fn list_images(&self, label: &str) -> Result<Vec<ImageSummary>> {
        let state = self.state.lock().await;
        Ok(state
            .images
            .iter()
            .filter(|(_, (_, labels))| label_matches(labels, label))
            .map(|(reference, (id, _))| ImageSummary {
                id: id.clone(),
                tags: vec![reference.clone()],
            })
            .collect())
    }

    async fn remove_image(&self, id: &str, _force: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let before = state.images.len();
        state.images.retain(|_, (image_id, _)| image_id != id);
        if state.images.len() == before {
            return Err(not_found("image", id));
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.state.lock().await;
        if !state.images.contains_key(&spec.image) {
            return Err(not_found("image", &spec.image));
        }
        if state.containers.values().any(|c| c.spec.name == spec.name) {
            return Err(RuntimeError::Api(format!(
                "409: container name {} already in use",
                spec.name
            )));
        }

        let id = next_container_id(&mut state);
        let container = MockContainer {
            state: ContainerState {
                id: id.clone(),
                name: spec.name.clone(),
                image: spec.image.clone(),
                running: false,
                restarting: false,
                status: "created".to_string(),
                exit_code: 0,
                error: String::new(),
                restart_count: 0,
                health: None,
                labels: spec.labels.clone(),
            },
            spec: spec.clone(),
            health_script: VecDeque::new(),
            logs: Vec::new(),
        };
        state.containers.insert(id.clone(), container);
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let fail = state.fail_start;
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| not_found("container", id))?;
        if fail {
            container.state.status = "exited".to_string();
            container.state.exit_code = 127;
            return Err(RuntimeError::Api(
                "500: OCI runtime create failed".to_string(),
            ));
        }
        container.state.running = true;
        container.state.status = "running".to_string();
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_stop.contains(id) {
            return Err(RuntimeError::Api(format!("500: cannot stop container {id}")));
        }
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| not_found("container", id))?;
        container.state.running = false;
        container.state.restarting = false;
        container.state.status = "exited".to_string();
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let running = state
            .containers
            .get(id)
            .map(|c| c.state.running)
            .ok_or_else(|| not_found("container", id))?;
        if running && !force {
            return Err(RuntimeError::Api(format!(
                "409: container {id} is running"
            )));
        }
        state.containers.remove(id);
        Ok(())
    }

    async fn list_containers(&self, label: &str) -> Result<Vec<ContainerSummary>> {
        let state = self.state.lock().await;
        Ok(state
            .containers
            .values()
            .filter(|c| label_matches(&c.state.labels, label))
            .map(|c| ContainerSummary {
                id: c.state.id.clone(),
                name: c.state.name.clone(),
                image: c.state.image.clone(),
                state: c.state.status.clone(),
                labels: c.state.labels.clone(),
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState> {
        let mut state = self.state.lock().await;
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| not_found("container", id))?;
        if container.health_script.len() > 1 {
            container.state.health = container.health_script.pop_front();
        } else if let Some(last) = container.health_script.front() {
            container.state.health = Some(last.clone());
        }
        Ok(container.state.clone())
    }

    async fn exec(&self, id: &str, _cmd: Vec<String>) -> Result<i64> {
        let mut state = self.state.lock().await;
        state.exec_calls += 1;
        let code = state.exec_exit_code;
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| not_found("container", id))?;
        if !container.state.running {
            return Err(RuntimeError::Api(format!(
                "409: container {id} is not running"
            )));
        }
        Ok(code)
    }

    async fn tail_logs(&self, id: &str, lines: usize) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| not_found("container", id))?;
        let skip = container.logs.len().saturating_sub(lines);
        Ok(container
            .logs
            .iter()
            .skip(skip)
            .map(|(_, line)| line.clone())
            .collect())
    }

    fn follow_logs(&self, id: &str, options: FollowOptions) -> BoxStream<'static, Result<LogChunk>> {
        let state = self.state.clone();
        let id = id.to_string();
        stream::once(async move {
            let state = state.lock().await;
            let Some(container) = state.containers.get(&id) else {
                return vec![Err(not_found("container", &id))];
            };
            let skip = container.logs.len().saturating_sub(options.tail);
            container
                .logs
                .iter()
                .skip(skip)
                .enumerate()
                .map(|(i, (stream, line))| {
                    let message = if options.timestamps {
                        format!("2025-01-01T00:00:{:02}.000000000Z {line}\n", i % 60)
                    } else {
                        format!("{line}\n")
                    };
                    Ok(LogChunk {
                        stream: *stream,
                        message: message.into_bytes(),
                    })
                })
                .collect()
        })
        .flat_map(stream::iter)
        .boxed()
    }
}
