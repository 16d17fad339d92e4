// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for launchpad-deployer.

use std::time::Duration;

use crate::crash_monitor::CrashMonitorConfig;
use crate::deployer::DeployerConfig;
use crate::health::HealthCheckConfig;
use crate::lifecycle::LifecycleConfig;
use crate::runtime::RestartPolicy;

/// Deployer configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Docker daemon URL (`unix://`, `tcp://`). Local defaults when unset.
    pub docker_host: Option<String>,
    /// Shared network containers and the reverse proxy attach to.
    pub network: String,
    /// Certificate resolver referenced by TLS routers.
    pub cert_resolver: String,
    /// Restart policy for application containers.
    pub restart_policy: RestartPolicy,
    /// Ceiling on health verification.
    pub health_timeout: Duration,
    /// Delay between health checks.
    pub health_interval: Duration,
    /// Crash monitor poll interval.
    pub crash_poll_interval: Duration,
    /// Bound on a container start.
    pub start_timeout: Duration,
    /// Grace period before a stopped container is killed.
    pub stop_timeout: Duration,
    /// Optional Postgres URL for persisting logs and crash reports.
    pub database_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            docker_host: None,
            network: "launchpad".to_string(),
            cert_resolver: "letsencrypt".to_string(),
            restart_policy: RestartPolicy::UnlessStopped,
            health_timeout: Duration::from_secs(120),
            health_interval: Duration::from_secs(2),
            crash_poll_interval: Duration::from_secs(10),
            start_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(10),
            database_url: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let restart_policy = match non_empty("LAUNCHPAD_RESTART_POLICY") {
            Some(v) => RestartPolicy::parse(&v).ok_or(ConfigError::InvalidValue {
                key: "LAUNCHPAD_RESTART_POLICY",
                value: v,
            })?,
            None => defaults.restart_policy,
        };

        let secs = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match non_empty(key) {
                Some(v) => match v.trim().parse::<u64>() {
                    Ok(n) if n > 0 => Ok(Duration::from_secs(n)),
                    _ => Err(ConfigError::InvalidValue { key, value: v }),
                },
                None => Ok(default),
            }
        };

        Ok(Self {
            docker_host: non_empty("LAUNCHPAD_DOCKER_HOST").or_else(|| non_empty("DOCKER_HOST")),
            network: non_empty("LAUNCHPAD_NETWORK").unwrap_or(defaults.network),
            cert_resolver: non_empty("LAUNCHPAD_CERT_RESOLVER").unwrap_or(defaults.cert_resolver),
            restart_policy,
            health_timeout: secs("LAUNCHPAD_HEALTH_TIMEOUT_SECS", defaults.health_timeout)?,
            health_interval: secs("LAUNCHPAD_HEALTH_INTERVAL_SECS", defaults.health_interval)?,
            crash_poll_interval: secs("LAUNCHPAD_CRASH_POLL_SECS", defaults.crash_poll_interval)?,
            start_timeout: secs("LAUNCHPAD_START_TIMEOUT_SECS", defaults.start_timeout)?,
            stop_timeout: secs("LAUNCHPAD_STOP_TIMEOUT_SECS", defaults.stop_timeout)?,
            database_url: non_empty("LAUNCHPAD_DATABASE_URL"),
        })
    }

    /// Database URL, required by the `migrate` command.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::MissingEnvVar("LAUNCHPAD_DATABASE_URL"))
    }

    /// Component configuration for the deployer.
    pub fn deployer_config(&self) -> DeployerConfig {
        DeployerConfig {
            lifecycle: LifecycleConfig {
                network: self.network.clone(),
                cert_resolver: self.cert_resolver.clone(),
                restart_policy: self.restart_policy,
                start_timeout: self.start_timeout,
                stop_timeout: self.stop_timeout,
                ..LifecycleConfig::default()
            },
            health: HealthCheckConfig {
                timeout: self.health_timeout,
                interval: self.health_interval,
                ..HealthCheckConfig::default()
            },
            crash_monitor: CrashMonitorConfig {
                poll_interval: self.crash_poll_interval,
                ..CrashMonitorConfig::default()
            },
            ..DeployerConfig::default()
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// An environment variable has a value that cannot be used.
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Rejected value.
        value: String,
    },
}
