use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_POWER: f64 = 150.0;
pub const DEFAULT_VARIATION: f64 = 0.15;
pub const DEFAULT_BASE_VOLTAGE: f64 = 220.0;
pub const DEFAULT_COUNT: i64 = 24;
pub const MAX_COUNT: i64 = 100;
pub const DEFAULT_INTERVAL_SECS: i64 = 300;
pub const MAX_INTERVAL_SECS: i64 = 86_400;

/// Voltage jitter applied regardless of the configured power variation.
pub const VOLTAGE_JITTER: f64 = 0.05;

/// Shape of a synthetic smart-plug load.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Base power in Watts
    pub base_power: f64,
    /// Fraction of `base_power` the power may drift by, e.g. 0.2 = ±20%
    pub variation: f64,
    /// Base voltage in Volts
    pub base_voltage: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            base_power: DEFAULT_BASE_POWER,
            variation: DEFAULT_VARIATION,
            base_voltage: DEFAULT_BASE_VOLTAGE,
        }
    }
}

/// Settings for a historical series of readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    #[serde(flatten)]
    pub reading: SimulatorConfig,
    pub count: i64,
    pub interval_sec: i64,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            reading: SimulatorConfig::default(),
            count: DEFAULT_COUNT,
            interval_sec: DEFAULT_INTERVAL_SECS,
        }
    }
}

impl BulkConfig {
    /// Applies the defaults for non-positive values and caps the series length
    /// and spacing.
    pub fn normalized(mut self) -> Self {
        if self.count <= 0 {
            self.count = DEFAULT_COUNT;
        }
        self.count = self.count.min(MAX_COUNT);
        if self.interval_sec <= 0 {
            self.interval_sec = DEFAULT_INTERVAL_SECS;
        }
        self.interval_sec = self.interval_sec.min(MAX_INTERVAL_SECS);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticReading {
    pub device_id: i64,
    pub power: f64,
    pub voltage: f64,
    pub current: f64,
    pub timestamp: DateTime<Utc>,
}

pub fn generate(
    rng: &mut impl Rng,
    device_id: i64,
    config: &SimulatorConfig,
    timestamp: DateTime<Utc>,
) -> SyntheticReading {
    let power = config.base_power + rng.gen_range(-1.0..=1.0) * config.variation * config.base_power;
    let voltage =
        config.base_voltage + rng.gen_range(-VOLTAGE_JITTER..=VOLTAGE_JITTER) * config.base_voltage;

    let power = round2(power);
    let voltage = round2(voltage);
    // Derived from the rounded values so the reported triple stays consistent
    let current = if voltage == 0.0 { 0.0 } else { round2(power / voltage) };

    SyntheticReading {
        device_id,
        power,
        voltage,
        current,
        timestamp,
    }
}

/// Generates a series ending at `now`, oldest first.
pub fn generate_series(
    rng: &mut impl Rng,
    device_id: i64,
    config: &BulkConfig,
    now: DateTime<Utc>,
) -> Vec<SyntheticReading> {
    let config = config.normalized();

    (0..config.count)
        .rev()
        .filter_map(|step| {
            let offset = step
                .checked_mul(config.interval_sec)
                .and_then(Duration::try_seconds)?;
            let timestamp = now.checked_sub_signed(offset)?;
            Some(generate(rng, device_id, &config.reading, timestamp))
        })
        .collect()
}

/// Rounds to two decimals, halves away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
