// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Launchpad Deployer - Container Deployment Engine
//!
//! This crate turns a built image into a running, routed, health-verified and
//! crash-monitored container, replacing any previous deployment of the same
//! application without a window where nothing serves traffic.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                    Task queue / CLI (deploy request)                  │
//! └───────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                          Deployer (this crate)                        │
//! │  ┌──────────┐  ┌───────────┐  ┌──────────┐  ┌─────────┐  ┌─────────┐  │
//! │  │ Network  │  │ Lifecycle │  │  Health  │  │  Crash  │  │   Log   │  │
//! │  │Provision.│  │  Manager  │  │ Verifier │  │ Monitor │  │  Relay  │  │
//! │  └──────────┘  └───────────┘  └──────────┘  └─────────┘  └─────────┘  │
//! └───────────────────────────────────────────────────────────────────────┘
//!           │                 │                     │             │
//!           ▼                 ▼                     ▼             ▼
//! ┌──────────────────────────────────────┐   ┌───────────────────────────┐
//! │   Container runtime (Docker Engine)  │   │ CrashReporter / LogSink   │
//! │   + reverse proxy reading labels     │   │ (PostgreSQL or tracing)   │
//! └──────────────────────────────────────┘   └───────────────────────────┘
//! ```
//!
//! # Deployment protocol
//!
//! | Step | Failure |
//! |------|---------|
//! | Ensure shared network | fatal |
//! | Wait for image to resolve | fatal (`ImageNotFound`) |
//! | Create container with limits, labels and `PORT` | fatal |
//! | Start container (bounded) | fatal, container removed |
//! | Wait for health (bounded) | logged, continues |
//! | Stop and remove older containers | logged, continues |
//! | Spawn crash monitor and log relay | background |
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `LAUNCHPAD_DOCKER_HOST` | No | local socket | Docker daemon URL (`DOCKER_HOST` also honoured) |
//! | `LAUNCHPAD_NETWORK` | No | `launchpad` | Shared container network |
//! | `LAUNCHPAD_CERT_RESOLVER` | No | `letsencrypt` | Proxy certificate resolver |
//! | `LAUNCHPAD_RESTART_POLICY` | No | `unless-stopped` | Container restart policy |
//! | `LAUNCHPAD_HEALTH_TIMEOUT_SECS` | No | `120` | Health wait ceiling |
//! | `LAUNCHPAD_HEALTH_INTERVAL_SECS` | No | `2` | Health poll interval |
//! | `LAUNCHPAD_CRASH_POLL_SECS` | No | `10` | Crash monitor interval |
//! | `LAUNCHPAD_START_TIMEOUT_SECS` | No | `30` | Container start bound |
//! | `LAUNCHPAD_STOP_TIMEOUT_SECS` | No | `10` | Graceful stop on cutover |
//! | `LAUNCHPAD_DATABASE_URL` | No | - | PostgreSQL log and crash store |

#![deny(missing_docs)]

/// Process configuration loaded from environment variables.
pub mod config;

/// Application crash detection.
pub mod crash_monitor;

/// Deployment orchestration.
pub mod deployer;

/// Error types for deployer operations.
pub mod error;

/// Health verification of started containers.
pub mod health;

/// Resource and routing label translation.
pub mod labels;

/// Container creation, start and teardown.
pub mod lifecycle;

/// Application-scoped cancellation of background tasks.
pub mod lifetime;

/// Container log streaming.
pub mod log_relay;

/// Shared network provisioning.
pub mod network;

/// Container runtime backends (Docker, mock).
pub mod runtime;

/// PostgreSQL log and crash store.
pub mod store;

/// Deployment data model.
pub mod types;

pub use config::Config;
pub use deployer::{AppDataPurger, Deployer, DeployerBuilder, DeployerConfig, VerificationReport};
pub use error::Error;
pub use types::{ContainerHandle, ContainerStatus, DeploymentRequest, DeploymentResult};
