use crate::errors::{Error, Result};
use crate::metrics::{INVALID_READINGS_TOTAL, READINGS_TOTAL};
use crate::model::{NewReading, Period, Reading, Summary, WindowAggregate};
use crate::store::TelemetryStore;
use crate::validate::{validate_reading, validate_simulator_config};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use plug_simulator::{generate, generate_series, BulkConfig, SimulatorConfig, SyntheticReading};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a bulk synthetic generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkReport {
    pub device_id: i64,
    pub readings_created: usize,
    pub count: i64,
    pub interval_sec: i64,
    pub base_power: f64,
    pub variation: f64,
    pub base_voltage: f64,
}

pub struct TelemetryService {
    store: Arc<dyn TelemetryStore>,
    rng: Mutex<StdRng>,
}

impl TelemetryService {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self::with_rng(store, StdRng::from_entropy())
    }

    pub fn with_rng(store: Arc<dyn TelemetryStore>, rng: StdRng) -> Self {
        Self {
            store,
            rng: Mutex::new(rng),
        }
    }

    async fn ensure_owned(&self, user_id: i64, device_id: i64) -> Result<()> {
        if self.store.user_owns_device(user_id, device_id).await? {
            Ok(())
        } else {
            Err(Error::device_not_found())
        }
    }

    /// Stores a reading for one of the caller's devices and marks the device as seen.
    pub async fn ingest(&self, user_id: i64, reading: NewReading) -> Result<Reading> {
        if let Err(e) = validate_reading(&reading) {
            INVALID_READINGS_TOTAL.inc();
            return Err(e);
        }
        self.ensure_owned(user_id, reading.device_id).await?;

        let device_id = reading.device_id;
        let id = self.store.create(&reading).await?;
        READINGS_TOTAL.inc();
        self.mark_seen(device_id).await;
        debug!("Stored reading {} for device {}", id, device_id);

        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(Error::reading_not_found)
    }

    /// Readings of one owned device, or of all the caller's devices, newest first.
    pub async fn list(&self, user_id: i64, device_id: Option<i64>, limit: i64) -> Result<Vec<Reading>> {
        match device_id {
            Some(device_id) => self.list_for_device(user_id, device_id, limit).await,
            None => self.store.list_by_user(user_id, limit).await,
        }
    }

    pub async fn list_for_device(&self, user_id: i64, device_id: i64, limit: i64) -> Result<Vec<Reading>> {
        self.ensure_owned(user_id, device_id).await?;
        self.store.list_by_device_for_user(user_id, device_id, limit).await
    }

    pub async fn latest_for_device(&self, user_id: i64, device_id: i64) -> Result<Reading> {
        self.ensure_owned(user_id, device_id).await?;
        self.store
            .latest_by_device(device_id)
            .await?
            .ok_or_else(Error::reading_not_found)
    }

    pub async fn latest_all(&self, user_id: i64) -> Result<Vec<Reading>> {
        self.store.latest_by_user_devices(user_id).await
    }

    pub async fn delete(&self, user_id: i64, id: i64) -> Result<()> {
        let reading = self
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(Error::reading_not_found)?;
        if !self.store.user_owns_device(user_id, reading.device_id).await? {
            return Err(Error::reading_not_found());
        }

        if !self.store.delete(id).await? {
            return Err(Error::reading_not_found());
        }
        info!("Reading {} of device {} deleted by user {}", id, reading.device_id, user_id);

        Ok(())
    }

    pub async fn summary(&self, user_id: i64, device_id: i64, period_tag: &str) -> Result<Summary> {
        self.ensure_owned(user_id, device_id).await?;

        let period = Period::from_tag(period_tag);
        let end = Utc::now();
        let start = end - period.lookback();
        let aggregate = self
            .store
            .aggregate_window(user_id, device_id, start, end)
            .await?;

        Ok(summarize(device_id, period, start, end, &aggregate))
    }

    /// Generates and stores a single synthetic reading stamped now.
    pub async fn simulate_one(&self, user_id: i64, device_id: i64, config: SimulatorConfig) -> Result<Reading> {
        self.ensure_owned(user_id, device_id).await?;
        validate_simulator_config(&config)?;

        let synthetic = {
            let mut rng = self.rng.lock();
            generate(&mut *rng, device_id, &config, Utc::now())
        };
        let reading = synthetic_reading(synthetic);
        validate_reading(&reading)?;

        let id = self.store.create(&reading).await?;
        READINGS_TOTAL.inc();
        self.mark_seen(device_id).await;

        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(Error::reading_not_found)
    }

    /// Generates and stores a historical series ending now.
    pub async fn simulate_bulk(&self, user_id: i64, device_id: i64, config: BulkConfig) -> Result<BulkReport> {
        self.ensure_owned(user_id, device_id).await?;

        let config = config.normalized();
        validate_simulator_config(&config.reading)?;

        let series = {
            let mut rng = self.rng.lock();
            generate_series(&mut *rng, device_id, &config, Utc::now())
        };
        // Nothing is stored unless the whole series is valid
        let readings: Vec<NewReading> = series.into_iter().map(synthetic_reading).collect();
        for reading in &readings {
            validate_reading(reading)?;
        }

        let mut created = 0;
        for reading in &readings {
            self.store.create(reading).await?;
            READINGS_TOTAL.inc();
            created += 1;
        }
        self.mark_seen(device_id).await;
        info!("Generated {} synthetic readings for device {}", created, device_id);

        Ok(BulkReport {
            device_id,
            readings_created: created,
            count: config.count,
            interval_sec: config.interval_sec,
            base_power: config.reading.base_power,
            variation: config.reading.variation,
            base_voltage: config.reading.base_voltage,
        })
    }

    async fn mark_seen(&self, device_id: i64) {
        if let Err(e) = self.store.touch_device(device_id).await {
            warn!("Failed to update status for device {}: {}", device_id, e);
        }
    }
}

fn synthetic_reading(synthetic: SyntheticReading) -> NewReading {
    NewReading {
        device_id: synthetic.device_id,
        power: synthetic.power,
        voltage: Some(synthetic.voltage),
        current: Some(synthetic.current),
        timestamp: Some(synthetic.timestamp),
    }
}

/// Turns a raw window aggregate into a summary.
///
/// Energy is the average power held over the observed sample span
/// (latest minus earliest reading), not over the nominal period.
pub fn summarize(
    device_id: i64,
    period: Period,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    aggregate: &WindowAggregate,
) -> Summary {
    let mut summary = Summary {
        device_id,
        period,
        start,
        end,
        total_records: aggregate.total_records,
        avg_power: 0.0,
        max_power: 0.0,
        min_power: 0.0,
        total_energy_kwh: 0.0,
        avg_voltage: None,
        avg_current: None,
    };
    if aggregate.total_records == 0 {
        return summary;
    }

    summary.avg_power = aggregate.avg_power;
    summary.max_power = aggregate.max_power;
    summary.min_power = aggregate.min_power;

    if let (Some(earliest), Some(latest)) = (aggregate.earliest, aggregate.latest) {
        let hours = (latest - earliest).num_milliseconds() as f64 / 3_600_000.0;
        summary.total_energy_kwh = aggregate.avg_power * hours / 1000.0;
    }

    summary.avg_voltage = Some(aggregate.avg_voltage).filter(|v| *v > 0.0);
    summary.avg_current = Some(aggregate.avg_current).filter(|c| *c > 0.0);

    summary
}
