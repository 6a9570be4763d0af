//! seat_registry - seat state service
//!
//! This daemon:
//! 1. Opens the SQLite seat store and provisions configured seats
//! 2. Serves the seat API (token exchange, CRUD, reserve/release, detections)
//! 3. Runs the auto-release sweep on a fixed interval (unless disabled)

use anyhow::{anyhow, Result};
use std::sync::mpsc;
use std::sync::Arc;

use seatwatch::{
    api::{ApiConfig, ApiServer},
    auth::TokenManager,
    config::RegistryConfig,
    registry::sweeper::{SweepConfig, SweepScheduler},
    registry::SqliteSeatStore,
    SeatRegistry,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RegistryConfig::load()?;

    let store = SqliteSeatStore::open(&config.db_path)?;
    let registry = Arc::new(SeatRegistry::new(Box::new(store)));
    let created = registry.provision(&config.seats)?;
    if !created.is_empty() {
        log::info!("provisioned seats {:?}", created);
    }

    let tokens = Arc::new(TokenManager::new(&config.operators, config.token_ttl)?);
    log::info!("{} operator account(s) configured", tokens.operator_count());

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        auto_release_minutes: config.auto_release_minutes,
        ..ApiConfig::default()
    };
    let api_handle = ApiServer::new(api_config, registry.clone(), tokens).spawn()?;
    log::info!("seat api listening on {}", api_handle.addr);

    let sweep_handle = if config.sweep_interval.is_zero() {
        log::info!("background auto-release sweep disabled");
        None
    } else {
        log::info!(
            "auto-release sweep every {}s (threshold {} min)",
            config.sweep_interval.as_secs(),
            config.auto_release_minutes
        );
        Some(
            SweepScheduler::new(
                SweepConfig {
                    interval: config.sweep_interval,
                    threshold_minutes: config.auto_release_minutes,
                },
                registry.clone(),
            )
            .spawn()?,
        )
    };
    log::info!("seat_registry running. serving {}", config.db_path);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("seat_registry waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");
    if let Some(handle) = sweep_handle {
        handle.stop()?;
    }
    api_handle.stop()?;

    Ok(())
}
