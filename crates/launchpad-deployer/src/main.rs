// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Launchpad Deployer - command line entry point.
//!
//! - `deploy <request.json>`: deploy, print the result, keep monitoring until Ctrl-C
//! - `verify <app-id>`: print a verification report
//! - `cleanup <app-id>`: remove every container and image of an application
//! - `migrate`: create the PostgreSQL log and crash tables

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use launchpad_deployer::config::Config;
use launchpad_deployer::crash_monitor::CrashReporter;
use launchpad_deployer::deployer::{AppDataPurger, Deployer};
use launchpad_deployer::log_relay::LogSink;
use launchpad_deployer::runtime::{ContainerRuntime, DockerRuntime};
use launchpad_deployer::store::{self, PgStore};
use launchpad_deployer::types::DeploymentRequest;

#[derive(Parser)]
#[command(name = "launchpad-deployer", version, about = "Deploy applications as routed containers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deploy an application from a JSON request file.
    Deploy {
        /// Path to the deployment request.
        request: PathBuf,
    },
    /// Check that an application is running and routed.
    Verify {
        /// Application ID.
        app_id: String,
    },
    /// Remove every container and image of an application.
    Cleanup {
        /// Application ID.
        app_id: String,
    },
    /// Create the database tables.
    Migrate,
}

async fn build_deployer(config: &Config) -> anyhow::Result<Deployer> {
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(
        DockerRuntime::connect(config.docker_host.as_deref())
            .context("Failed to connect to container runtime")?,
    );
    info!(runtime_type = runtime.runtime_type(), "Runtime initialized");

    let mut builder = Deployer::builder()
        .runtime(runtime)
        .config(config.deployer_config());

    if let Some(url) = &config.database_url {
        let pool = store::connect(url).await?;
        info!("Connected to database");
        let pg = Arc::new(PgStore::new(pool));
        builder = builder
            .log_sink(pg.clone() as Arc<dyn LogSink>)
            .crash_reporter(pg.clone() as Arc<dyn CrashReporter>)
            .purger(pg as Arc<dyn AppDataPurger>);
    }

    Ok(builder.build()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "launchpad_deployer=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let cli = Cli::parse();
    let config = Config::from_env()?;

    info!(
        network = %config.network,
        docker_host = config.docker_host.as_deref().unwrap_or("local"),
        "Starting Launchpad Deployer"
    );

    match cli.command {
        Command::Deploy { request } => {
            let raw = std::fs::read_to_string(&request)
                .with_context(|| format!("Failed to read {}", request.display()))?;
            let request: DeploymentRequest =
                serde_json::from_str(&raw).context("Invalid deployment request")?;

            let deployer = build_deployer(&config).await?;
            let result = deployer.deploy(request).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);

            info!("Monitoring, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received");

            deployer.shutdown().await;
        }
        Command::Verify { app_id } => {
            let deployer = build_deployer(&config).await?;
            let report = deployer.verify_deployment(&app_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_healthy() {
                std::process::exit(1);
            }
        }
        Command::Cleanup { app_id } => {
            let deployer = build_deployer(&config).await?;
            deployer.cleanup_app_resources(&app_id).await?;
            info!(app_id = %app_id, "Cleanup complete");
        }
        Command::Migrate => {
            let pool = store::connect(config.require_database_url()?).await?;
            store::migrate(&pool).await?;
            info!("Database schema verified");
        }
    }

    Ok(())
}
