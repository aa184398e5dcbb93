pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod entities;
pub mod identity;
pub mod models;
pub mod services;
pub mod state;
pub mod store;

use std::sync::Arc;
use tokio::signal;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
pub use config::Config;
use domain::InternalId;
use metrics_exporter_prometheus::PrometheusHandle;
use state::SharedState;
use store::{RecordStore, collection};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load()?;
    init_tracing(&config);

    match cli.command() {
        Commands::InitConfig => {
            if Config::create_default_if_missing()? {
                println!("Wrote config.toml");
            } else {
                println!("config.toml already exists; left untouched");
            }
            Ok(())
        }
        Commands::Serve => {
            config.validate()?;
            run_server(config).await
        }
        Commands::Purge { target } => {
            config.validate()?;
            run_purge(config, target).await
        }
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    let fmt_layer = if config.general.log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();
}

fn install_metrics(config: &Config) -> anyhow::Result<Option<PrometheusHandle>> {
    if !config.observability.metrics_enabled {
        return Ok(None);
    }

    use metrics_exporter_prometheus::PrometheusBuilder;
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    info!("Prometheus metrics recorder initialized");
    Ok(Some(handle))
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let prometheus_handle = install_metrics(&config)?;
    let port = config.server.port;

    let shared = Arc::new(SharedState::new(config).await?);
    let app = api::router(api::create_app_state(shared, prometheus_handle));

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Web server running at http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Web server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Error listening for shutdown: {}", e),
    }
}

async fn run_purge(config: Config, target: &str) -> anyhow::Result<()> {
    let shared = SharedState::new(config).await?;
    let id = resolve_purge_target(&shared.records, target).await?;

    let report = shared.coordinator.hard_delete_account(id).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_complete() {
        anyhow::bail!(
            "{} cascade step(s) failed; run the purge again",
            report.failed.len()
        );
    }
    if report.changed_nothing() {
        warn!(internal_id = %id, "Nothing left to purge");
    }
    Ok(())
}

/// An internal id is taken as is, so a purge can finish even after the account
/// record itself is gone. A username matches soft-deleted accounts too.
async fn resolve_purge_target(records: &RecordStore, target: &str) -> anyhow::Result<InternalId> {
    if let Ok(id) = target.parse::<InternalId>() {
        return Ok(id);
    }

    let accounts = records.snapshot(&collection::users()).await?;
    accounts
        .values()
        .find(|a| a.has_username(target))
        .map(|a| a.internal_id)
        .with_context(|| format!("No account named '{target}'"))
}
