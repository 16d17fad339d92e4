// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for launchpad-deployer.

use thiserror::Error;

/// Deployer errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Container runtime call failed.
    #[error("Runtime error: {0}")]
    Runtime(#[from] crate::runtime::RuntimeError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Image could not be resolved locally after all retries.
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    /// Container creation failed.
    #[error("Container create failed: {0}")]
    CreateFailed(String),

    /// Container start failed. The container has been removed.
    #[error("Container start failed: {0}")]
    StartFailed(String),

    /// Container did not report healthy within the ceiling.
    #[error("Container {container_id} not healthy after {waited_secs}s")]
    HealthTimeout {
        /// Container being verified.
        container_id: String,
        /// Seconds waited.
        waited_secs: u64,
    },

    /// Container stopped running while being verified.
    #[error("Container {container_id} exited while waiting for health (status: {status})")]
    ContainerExited {
        /// Container being verified.
        container_id: String,
        /// Runtime status at the time of the check.
        status: String,
    },

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error aborts a deployment run.
    ///
    /// Health timeouts and exits observed during verification are logged by the
    /// orchestrator and the run continues to cutover.
    pub fn is_fatal_to_deployment(&self) -> bool {
        !matches!(
            self,
            Error::HealthTimeout { .. } | Error::ContainerExited { .. }
        )
    }
}

/// Result type using the deployer Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_errors_are_not_fatal() {
        let timeout = Error::HealthTimeout {
            container_id: "c1".to_string(),
            waited_secs: 120,
        };
        assert!(!timeout.is_fatal_to_deployment());
        assert!(timeout.to_string().contains("120s"));

        assert!(Error::ImageNotFound("img:v1".to_string()).is_fatal_to_deployment());
        assert!(Error::StartFailed("boom".to_string()).is_fatal_to_deployment());
    }
}
