//! Machine registry: CRUD and the existence guard used by ingestion.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{CreateMachineRequest, Machine, MachineDetails, MachineSummary};
use crate::store::Store;

/// Number of readings attached by [`MachineRegistry::get_with_stats`].
pub const LATEST_READINGS: i64 = 10;

// ---

#[derive(Clone)]
pub struct MachineRegistry {
    store: Arc<dyn Store>,
}

impl MachineRegistry {
    // ---
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Register a machine. Fails with `Conflict` if the product id is taken.
    pub async fn create(&self, req: CreateMachineRequest) -> Result<Machine> {
        // ---
        let req = req.validate().map_err(AppError::Validation)?;
        let machine = self.store.insert_machine(&req).await?;
        info!(
            machine_id = %machine.id,
            product_id = %machine.product_id,
            machine_type = %machine.machine_type,
            "Machine registered"
        );
        Ok(machine)
    }

    /// All machines ordered by product id.
    pub async fn list(&self, include_stats: bool) -> Result<Vec<MachineSummary>> {
        self.store.list_machines(include_stats).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Machine> {
        self.store
            .get_machine(id)
            .await?
            .ok_or_else(|| AppError::machine_not_found(id))
    }

    /// Machine with its reading count and 10 most recent readings.
    pub async fn get_with_stats(&self, id: Uuid) -> Result<MachineDetails> {
        // ---
        let machine = self.get(id).await?;
        let reading_count = self.store.count_readings(id).await?;
        let latest_readings = self.store.recent_readings(id, LATEST_READINGS).await?;

        Ok(MachineDetails {
            machine,
            reading_count,
            latest_readings,
        })
    }

    /// Guard: succeeds only if the machine exists.
    pub async fn exists(&self, id: Uuid) -> Result<()> {
        self.get(id).await.map(|_| ())
    }

    pub async fn find_by_product_id(&self, product_id: &str) -> Result<Machine> {
        self.store
            .find_machine_by_product_id(product_id)
            .await?
            .ok_or_else(|| AppError::machine_not_found(product_id))
    }

    /// Delete a machine that has no readings; returns the deleted record.
    pub async fn remove(&self, id: Uuid) -> Result<Machine> {
        // ---
        let machine = self.get(id).await?;
        if !self.store.delete_machine(id).await? {
            return Err(AppError::machine_not_found(id));
        }
        info!(machine_id = %id, product_id = %machine.product_id, "Machine removed");
        Ok(machine)
    }
}
