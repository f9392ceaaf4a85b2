mod baseline;
mod climate;
mod clock;
mod config;
mod controller;
mod engine;
mod model;
mod mqtt;
mod noise;
mod occupancy;
mod physics;
mod scenario;
mod state;
mod store;
mod web;

use anyhow::Result;
use std::{env, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use engine::SimulationEngine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load_or_default(&config_path)?;
    info!(
        model = ?cfg.simulation.model,
        tick_ms = cfg.simulation.tick_ms,
        capacity = cfg.simulation.capacity,
        seed = ?cfg.simulation.seed,
        "config loaded"
    );

    // ── Simulation engine ───────────────────────────────────────────
    let engine = Arc::new(SimulationEngine::from_config(&cfg));
    engine.start().await;

    // ── MQTT relay (optional) ───────────────────────────────────────
    if cfg.relay.enabled {
        let shared = engine.shared();
        let relay = cfg.relay.clone();
        let plant = cfg.plant.clone();
        tokio::spawn(async move {
            if let Err(e) = mqtt::run(relay, plant, shared).await {
                error!(error = %e, "mqtt relay stopped");
            }
        });
    }

    // ── Web server ──────────────────────────────────────────────────
    let web_engine = Arc::clone(&engine);
    tokio::select! {
        res = web::serve(web_engine) => res?,
        _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
    }

    engine.stop().await;
    Ok(())
}
