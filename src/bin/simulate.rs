//! Feed live readings for every registered machine until interrupted.
//!
//! On each tick every machine gets one reading; roughly one in ten is a
//! forced anomaly. Readings go through the normal ingestion path, so a
//! running service picks them up from the change feed and pushes them to
//! WebSocket clients.
//!
//! # Environment Variables
//! Reads the same settings as the service (see
//! [`machinewatch::config::load_from_env`]), plus:
//! - `SIMULATE_INTERVAL_SECS` (optional) – seconds between ticks (default: `5`)
use std::{env, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;

use machinewatch::config::{self, mask_db_url};
use machinewatch::models::{CreateReadingRequest, Machine};
use machinewatch::schema;
use machinewatch::services::{MachineRegistry, SensorService};
use machinewatch::simulation::ReadingGenerator;
use machinewatch::store::{PgStore, Store};

const DEFAULT_INTERVAL_SECS: u64 = 5;

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn")),
        )
        .compact()
        .init();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    if cfg.uses_memory_store() {
        bail!("The simulator needs a PostgreSQL DATABASE_URL, not the in-process store");
    }
    let period = tick_interval()?;

    tracing::info!("Connecting to database: {}", mask_db_url(&cfg.db_url));
    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .with_context(|| format!("Failed to connect to database '{}'", mask_db_url(&cfg.db_url)))?;
    schema::create_schema(&pool, &cfg.realtime_channel).await?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));
    let registry = MachineRegistry::new(store.clone());
    let sensors = SensorService::new(store, registry.clone());

    let machines: Vec<Machine> = registry
        .list(false)
        .await?
        .into_iter()
        .map(|summary| summary.machine)
        .collect();
    if machines.is_empty() {
        pool.close().await;
        bail!("No machines found; run the seed tool first");
    }
    for machine in &machines {
        tracing::info!(
            product_id = %machine.product_id,
            machine_type = machine.machine_type.as_str(),
            "Simulating machine"
        );
    }
    tracing::info!(machines = machines.len(), interval = ?period, "Simulator started");

    let mut source = ReadingGenerator::new();
    let mut ticker = tokio::time::interval(period);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut tick: u64 = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for machine in &machines {
                    emit(&sensors, &mut source, machine, tick).await;
                }
                tick += 1;
            }
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                }
                break;
            }
        }
    }

    tracing::info!(ticks = tick, "Stopping simulator");
    pool.close().await;
    Ok(())
}

/// Generate and store one reading; failures are logged and the tick goes on.
async fn emit(sensors: &SensorService, source: &mut ReadingGenerator, machine: &Machine, tick: u64) {
    // ---
    let anomaly = source.roll_anomaly();
    let m = source.live(machine.machine_type, anomaly, tick);

    let recorded = sensors
        .record(CreateReadingRequest {
            machine_id: Some(machine.id.to_string()),
            product_id: None,
            measurements: m.into(),
            timestamp: None,
        })
        .await;

    match recorded {
        Ok(stored) if anomaly => tracing::warn!(
            reading_id = stored.reading.id,
            product_id = %machine.product_id,
            air_temp = %format!("{:.1}", m.air_temp),
            rotational_speed = m.rotational_speed,
            torque = %format!("{:.1}", m.torque),
            "Anomalous reading sent"
        ),
        Ok(stored) => tracing::info!(
            reading_id = stored.reading.id,
            product_id = %machine.product_id,
            air_temp = %format!("{:.1}", m.air_temp),
            rotational_speed = m.rotational_speed,
            torque = %format!("{:.1}", m.torque),
            "Normal reading sent"
        ),
        Err(e) => tracing::error!(product_id = %machine.product_id, error = %e, "Failed to store reading"),
    }
}

fn tick_interval() -> Result<Duration> {
    // ---
    let secs = match env::var("SIMULATE_INTERVAL_SECS") {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| anyhow!("Invalid SIMULATE_INTERVAL_SECS: {}", e))?,
        Err(_) => DEFAULT_INTERVAL_SECS,
    };
    if secs == 0 {
        bail!("Invalid SIMULATE_INTERVAL_SECS: must be positive");
    }
    Ok(Duration::from_secs(secs))
}
