//! Sensor ingestion: validate and persist readings, query history and
//! per-window statistics.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use super::MachineRegistry;
use crate::error::{AppError, Result};
use crate::models::{CreateReadingRequest, Machine, NewReading, ReadingWithMachine, SensorReading};
use crate::stats::ReadingStatistics;
use crate::store::Store;

pub const DEFAULT_LIST_LIMIT: i64 = 100;
pub const MAX_LIST_LIMIT: i64 = 1000;
pub const DEFAULT_STATS_HOURS: i64 = 24;
/// One year.
pub const MAX_STATS_HOURS: i64 = 8760;

// ---

#[derive(Clone)]
pub struct SensorService {
    store: Arc<dyn Store>,
    machines: MachineRegistry,
}

impl SensorService {
    // ---
    pub fn new(store: Arc<dyn Store>, machines: MachineRegistry) -> Self {
        Self { store, machines }
    }

    /// Validate, resolve the machine, and persist one reading.
    pub async fn record(&self, req: CreateReadingRequest) -> Result<ReadingWithMachine> {
        // ---
        let measurements = req
            .measurements
            .validate()
            .map_err(AppError::Validation)?;

        if let Some(ts) = req.timestamp {
            if ts > Utc::now() {
                return Err(AppError::validation(
                    "timestamp",
                    "must not be in the future",
                ));
            }
        }

        let machine = self
            .resolve_machine(req.machine_id.as_deref(), req.product_id.as_deref())
            .await?;

        let reading = self
            .store
            .insert_reading(&NewReading {
                machine_id: machine.id,
                timestamp: req.timestamp,
                measurements,
            })
            .await?;

        info!(
            reading_id = reading.id,
            machine_id = %machine.id,
            product_id = %machine.product_id,
            "Sensor reading recorded"
        );

        Ok(ReadingWithMachine { reading, machine })
    }

    /// Most recent readings, newest first, optionally for one machine.
    pub async fn list(
        &self,
        machine_id: Option<Uuid>,
        limit: Option<i64>,
    ) -> Result<Vec<ReadingWithMachine>> {
        // ---
        if let Some(id) = machine_id {
            self.machines.exists(id).await?;
        }
        let limit = limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);

        let readings = self.store.list_readings(machine_id, limit).await?;
        debug!(count = readings.len(), limit, "Listed sensor readings");
        Ok(readings)
    }

    /// Newest reading of a machine, if any.
    pub async fn latest(&self, machine_id: Uuid) -> Result<Option<ReadingWithMachine>> {
        // ---
        let machine = self.machines.get(machine_id).await?;
        let reading = self.store.recent_readings(machine_id, 1).await?.pop();
        Ok(reading.map(|reading| ReadingWithMachine { reading, machine }))
    }

    /// Statistics over the last `hours` hours; `None` if there are no readings.
    pub async fn statistics(
        &self,
        machine_id: Uuid,
        hours: Option<i64>,
    ) -> Result<Option<ReadingStatistics>> {
        // ---
        let hours = hours.unwrap_or(DEFAULT_STATS_HOURS);
        if !(1..=MAX_STATS_HOURS).contains(&hours) {
            return Err(AppError::validation(
                "hours",
                format!("must be between 1 and {}", MAX_STATS_HOURS),
            ));
        }

        self.machines.exists(machine_id).await?;

        let since = Utc::now() - Duration::hours(hours);
        let readings: Vec<SensorReading> = self.store.readings_since(machine_id, since).await?;
        debug!(%machine_id, hours, count = readings.len(), "Computing reading statistics");

        Ok(ReadingStatistics::from_readings(&readings))
    }

    /// Resolve by internal id first, then by product id.
    async fn resolve_machine(
        &self,
        machine_id: Option<&str>,
        product_id: Option<&str>,
    ) -> Result<Machine> {
        // ---
        match (machine_id, product_id) {
            (Some(raw), _) => {
                let id = parse_machine_id(raw)?;
                self.machines.get(id).await
            }
            (None, Some(product_id)) => self.machines.find_by_product_id(product_id.trim()).await,
            (None, None) => Err(AppError::validation(
                "machineId",
                "either machineId or productId is required",
            )),
        }
    }
}

/// Parse a machine id supplied by a client.
pub fn parse_machine_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::validation("machineId", "must be a valid UUID"))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{CreateMachineRequest, MachineType, RawMeasurements};
    use crate::store::MemoryStore;
    use chrono::DateTime;
    use tokio_test::{assert_err, assert_ok};

    struct Fixture {
        sensors: SensorService,
        machine: Machine,
    }

    async fn fixture() -> Fixture {
        // ---
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let machines = MachineRegistry::new(store.clone());
        let machine = machines
            .create(CreateMachineRequest {
                product_id: "M14860".to_string(),
                machine_type: MachineType::M,
            })
            .await
            .unwrap();
        Fixture {
            sensors: SensorService::new(store, machines),
            machine,
        }
    }

    fn request(
        machine_id: Option<String>,
        product_id: Option<&str>,
        air_temp: f64,
        timestamp: Option<DateTime<Utc>>,
    ) -> CreateReadingRequest {
        CreateReadingRequest {
            machine_id,
            product_id: product_id.map(str::to_string),
            measurements: RawMeasurements {
                air_temp,
                process_temp: 308.6,
                rotational_speed: 1551.0,
                torque: 42.8,
                tool_wear: 0.0,
            },
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_record_by_product_id() {
        // ---
        let f = fixture().await;
        let saved = f
            .sensors
            .record(request(None, Some("M14860"), 298.1, None))
            .await
            .unwrap();
        assert_eq!(saved.machine.id, f.machine.id);
        assert_eq!(saved.reading.rotational_speed, 1551);
    }

    #[tokio::test]
    async fn test_record_by_machine_id_with_past_timestamp() {
        // ---
        let f = fixture().await;
        let past = Utc::now() - Duration::days(3);
        let saved = f
            .sensors
            .record(request(Some(f.machine.id.to_string()), None, 298.1, Some(past)))
            .await
            .unwrap();
        assert_eq!(saved.reading.timestamp, past);
    }

    #[tokio::test]
    async fn test_record_out_of_range_is_validation_error() {
        // ---
        let f = fixture().await;
        let err = assert_err!(
            f.sensors
                .record(request(None, Some("M14860"), 600.0, None))
                .await
        );
        match err {
            AppError::Validation(fields) => assert_eq!(fields[0].field, "airTemp"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_record_unknown_product_is_not_found() {
        // ---
        let f = fixture().await;
        let err = assert_err!(
            f.sensors
                .record(request(None, Some("ZZZ999"), 300.0, None))
                .await
        );
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_record_requires_a_machine_reference() {
        // ---
        let f = fixture().await;
        let err = assert_err!(f.sensors.record(request(None, None, 300.0, None)).await);
        assert!(matches!(err, AppError::Validation(_)));

        let err = assert_err!(
            f.sensors
                .record(request(Some("not-a-uuid".into()), None, 300.0, None))
                .await
        );
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_record_rejects_future_timestamp() {
        // ---
        let f = fixture().await;
        let future = Utc::now() + Duration::hours(1);
        let err = assert_err!(
            f.sensors
                .record(request(None, Some("M14860"), 300.0, Some(future)))
                .await
        );
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_list_guards_machine_and_limits() {
        // ---
        let f = fixture().await;
        for _ in 0..3 {
            assert_ok!(
                f.sensors
                    .record(request(None, Some("M14860"), 300.0, None))
                    .await
            );
        }

        let all = f.sensors.list(None, None).await.unwrap();
        assert_eq!(all.len(), 3);
        let limited = f.sensors.list(Some(f.machine.id), Some(2)).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert!(limited[0].reading.id > limited[1].reading.id);

        let err = assert_err!(f.sensors.list(Some(Uuid::new_v4()), None).await);
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_latest_none_then_some() {
        // ---
        let f = fixture().await;
        assert!(f.sensors.latest(f.machine.id).await.unwrap().is_none());

        let old = Utc::now() - Duration::hours(2);
        f.sensors
            .record(request(None, Some("M14860"), 301.0, Some(old)))
            .await
            .unwrap();
        f.sensors
            .record(request(None, Some("M14860"), 302.0, None))
            .await
            .unwrap();

        let latest = f.sensors.latest(f.machine.id).await.unwrap().unwrap();
        assert_eq!(latest.reading.air_temp, 302.0);
    }

    #[tokio::test]
    async fn test_statistics_window() {
        // ---
        let f = fixture().await;
        let two_hours_ago = Utc::now() - Duration::hours(2);
        f.sensors
            .record(request(None, Some("M14860"), 300.0, Some(two_hours_ago)))
            .await
            .unwrap();

        assert_eq!(
            f.sensors.statistics(f.machine.id, Some(1)).await.unwrap(),
            None
        );

        f.sensors
            .record(request(None, Some("M14860"), 302.0, None))
            .await
            .unwrap();
        let stats = f
            .sensors
            .statistics(f.machine.id, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.air_temp.min, 300.0);
        assert_eq!(stats.air_temp.max, 302.0);
        assert_eq!(stats.air_temp.avg, 301.0);
    }

    #[tokio::test]
    async fn test_statistics_rejects_bad_window_and_unknown_machine() {
        // ---
        let f = fixture().await;
        let err = assert_err!(f.sensors.statistics(f.machine.id, Some(0)).await);
        assert!(matches!(err, AppError::Validation(_)));

        let err = assert_err!(f.sensors.statistics(Uuid::new_v4(), Some(1)).await);
        assert!(matches!(err, AppError::NotFound { .. }));
    }
}
