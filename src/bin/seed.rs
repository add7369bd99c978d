//! Seed the database with demo machines and a history of normal readings.
//!
//! Everything stored is removed first: machines, readings, predictions and
//! chat conversations. Each machine then gets a fixed history of readings
//! spaced a few minutes apart and ending now.
//!
//! # Environment Variables
//! Reads the same settings as the service (see
//! [`machinewatch::config::load_from_env`]); `DATABASE_URL` must point at
//! PostgreSQL.
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::filter::EnvFilter;

use machinewatch::config::{self, mask_db_url};
use machinewatch::models::CreateReadingRequest;
use machinewatch::schema;
use machinewatch::services::{MachineRegistry, SensorService};
use machinewatch::simulation::{
    seed_machines, ReadingGenerator, HISTORY_PER_MACHINE, HISTORY_SPACING_MINUTES,
};
use machinewatch::store::{PgStore, Store};

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
        bail!("Seeding needs a PostgreSQL DATABASE_URL, not the in-process store");
    }

    tracing::info!("Connecting to database: {}", mask_db_url(&cfg.db_url));
    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .with_context(|| format!("Failed to connect to database '{}'", mask_db_url(&cfg.db_url)))?;
    schema::create_schema(&pool, &cfg.realtime_channel).await?;

    let result = seed(&pool).await;
    pool.close().await;
    result
}

async fn seed(pool: &PgPool) -> Result<()> {
    // ---
    clear(pool).await?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));
    let registry = MachineRegistry::new(store.clone());
    let sensors = SensorService::new(store, registry.clone());
    let mut source = ReadingGenerator::new();

    let now = Utc::now();
    let mut total = 0;
    for req in seed_machines() {
        let machine = registry.create(req).await?;

        for index in 0..HISTORY_PER_MACHINE {
            let steps_back = (HISTORY_PER_MACHINE - index) as i64;
            let measurements = source.historical(machine.machine_type, index);
            sensors
                .record(CreateReadingRequest {
                    machine_id: Some(machine.id.to_string()),
                    product_id: None,
                    measurements: measurements.into(),
                    timestamp: Some(now - Duration::minutes(steps_back * HISTORY_SPACING_MINUTES)),
                })
                .await
                .with_context(|| format!("Failed to store reading {} for {}", index, machine.product_id))?;
        }
        total += HISTORY_PER_MACHINE;

        tracing::info!(
            machine_id = %machine.id,
            product_id = %machine.product_id,
            machine_type = machine.machine_type.as_str(),
            readings = HISTORY_PER_MACHINE,
            "Machine seeded"
        );
    }

    tracing::info!(readings = total, "Seeding complete");
    Ok(())
}

async fn clear(pool: &PgPool) -> Result<()> {
    // ---
    tracing::warn!("Removing existing machines, readings and conversations");
    sqlx::query(
        "TRUNCATE chat_messages, chat_conversations, predictions, sensor_readings, machines",
    )
    .execute(pool)
    .await
    .context("Failed to clear existing data")?;
    Ok(())
}
