// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared network provisioning.
//!
//! Inspect-then-create is not atomic. Two callers racing on a missing network
//! both try to create it; the runtime keeps one and the loser's error is
//! tolerated as long as the network exists afterwards.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::runtime::{ContainerRuntime, Result};

/// Ensures the shared container network exists.
pub struct NetworkProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
    network: String,
}

impl NetworkProvisioner {
    /// Create a provisioner for `network`.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, network: impl Into<String>) -> Self {
        Self {
            runtime,
            network: network.into(),
        }
    }

    /// Name of the shared network.
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Create the network if it does not exist. Idempotent.
    pub async fn ensure_network(&self) -> Result<()> {
        if self.runtime.network_exists(&self.network).await? {
            debug!(network = %self.network, "Network already exists");
            return Ok(());
        }

        match self.runtime.create_network(&self.network).await {
            Ok(()) => {
                info!(network = %self.network, "Created shared network");
                Ok(())
            }
            Err(e) => {
                // Lost a creation race?
                if self.runtime.network_exists(&self.network).await? {
                    warn!(
                        network = %self.network,
                        error = %e,
                        "Network create failed but network now exists"
                    );
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }
}
