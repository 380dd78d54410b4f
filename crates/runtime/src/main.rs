//! Conflux Runtime entry point.
//!
//! Loads configuration, initializes logging, starts the shared runtime services and waits
//! for Ctrl-C.
use conflux_common::config::{AppConfig, DEFAULT_CONFIG_PATH};
use conflux_runtime::connection::NoBackendProvisioner;
use conflux_runtime::{pool_state, RuntimeServices};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_config = AppConfig::from_file(DEFAULT_CONFIG_PATH).unwrap_or_default();

    conflux_common::telemetry::init_logging(&app_config.telemetry)?;

    let mut services = RuntimeServices::start(&app_config, Arc::new(NoBackendProvisioner))?;
    pool_state::install_global(services.pool_states().clone())?;

    tracing::info!(config = DEFAULT_CONFIG_PATH, "Conflux runtime ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    services.shutdown();
    conflux_common::telemetry::shutdown_telemetry();
    Ok(())
}
