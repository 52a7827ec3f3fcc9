use crate::errors::{Error, Result};
use crate::model::{DeviceUpdate, NewDevice, NewReading};
use plug_simulator::telemetry::VOLTAGE_JITTER;
use plug_simulator::SimulatorConfig;

const NAME_MAX_LEN: usize = 255;
const POWER_MIN: f64 = 0.0;
const POWER_MAX: f64 = 100_000.0;
const VOLTAGE_MIN: f64 = 0.0;
const VOLTAGE_MAX: f64 = 1_000.0;
const CURRENT_MIN: f64 = 0.0;
const CURRENT_MAX: f64 = 500.0;

/// Validates a device creation payload
pub fn validate_new_device(device: &NewDevice) -> Result<()> {
    validate_name(&device.name)
}

/// Validates a partial device update
pub fn validate_update(update: &DeviceUpdate) -> Result<()> {
    if let Some(name) = &update.name {
        validate_name(name)?;
    }

    Ok(())
}

/// Validates an incoming telemetry reading
pub fn validate_reading(reading: &NewReading) -> Result<()> {
    if reading.device_id <= 0 {
        return Err(Error::Validation(format!(
            "Device ID {} must be positive",
            reading.device_id
        )));
    }

    check_range("Power", reading.power, POWER_MIN, POWER_MAX)?;

    if let Some(voltage) = reading.voltage {
        check_range("Voltage", voltage, VOLTAGE_MIN, VOLTAGE_MAX)?;
    }

    if let Some(current) = reading.current {
        check_range("Current", current, CURRENT_MIN, CURRENT_MAX)?;
    }

    Ok(())
}

/// Rejects a synthetic load whose extremes would produce out-of-range readings
pub fn validate_simulator_config(config: &SimulatorConfig) -> Result<()> {
    check_range("Variation", config.variation, 0.0, 1.0)?;

    let peak_power = POWER_MAX / (1.0 + config.variation);
    check_range("Base power", config.base_power, POWER_MIN, peak_power)?;

    let peak_voltage = VOLTAGE_MAX / (1.0 + VOLTAGE_JITTER);
    check_range("Base voltage", config.base_voltage, VOLTAGE_MIN, peak_voltage)?;

    if config.base_voltage > 0.0 {
        let peak_current = config.base_power * (1.0 + config.variation)
            / (config.base_voltage * (1.0 - VOLTAGE_JITTER));
        check_range("Peak current", peak_current, CURRENT_MIN, CURRENT_MAX)?;
    }

    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Validation("Name cannot be empty".to_string()));
    }

    if name.chars().count() > NAME_MAX_LEN {
        return Err(Error::Validation(format!(
            "Name longer than {} characters",
            NAME_MAX_LEN
        )));
    }

    Ok(())
}

fn check_range(field: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if !value.is_finite() || value < min || value > max {
        return Err(Error::Validation(format!(
            "{} {} out of range [{}, {}]",
            field, value, min, max
        )));
    }

    Ok(())
}
