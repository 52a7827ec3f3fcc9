use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Coarse reachability label of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "online" => Some(DeviceStatus::Online),
            "offline" => Some(DeviceStatus::Offline),
            _ => None,
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            DeviceStatus::Online => DeviceStatus::Offline,
            DeviceStatus::Offline => DeviceStatus::Online,
        }
    }
}

/// User-owned smart plug
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DeviceStatus>,
    /// Last known relay state; `None` until something confirms it.
    pub power_state: Option<bool>,
    /// Opaque JSON configuration, may carry remote-control credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDevice {
    pub name: String,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default, rename = "type")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub metadata: Option<String>,
}

/// Partial update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub room: Option<String>,
    #[serde(rename = "type")]
    pub device_type: Option<String>,
    pub status: Option<DeviceStatus>,
    /// Written as-is without contacting the device, even when it has a control
    /// channel. Only the toggle path confirms against the hardware.
    pub power_state: Option<bool>,
    pub metadata: Option<String>,
}

impl DeviceUpdate {
    pub fn apply_to(&self, device: &mut Device) {
        if let Some(name) = &self.name {
            device.name = name.clone();
        }
        if let Some(room) = &self.room {
            device.room = Some(room.clone());
        }
        if let Some(device_type) = &self.device_type {
            device.device_type = Some(device_type.clone());
        }
        if let Some(status) = self.status {
            device.status = Some(status);
        }
        if let Some(power_state) = self.power_state {
            device.power_state = Some(power_state);
        }
        if let Some(metadata) = &self.metadata {
            device.metadata = Some(metadata.clone());
        }
    }
}

/// Power telemetry sample. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reading {
    pub id: i64,
    pub device_id: i64,
    /// Watts
    pub power: f64,
    /// Volts
    pub voltage: Option<f64>,
    /// Amps
    pub current: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReading {
    pub device_id: i64,
    pub power: f64,
    #[serde(default)]
    pub voltage: Option<f64>,
    #[serde(default)]
    pub current: Option<f64>,
    /// Ingestion time is used when absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewReading {
    pub fn into_reading(self, id: i64, now: DateTime<Utc>) -> Reading {
        Reading {
            id,
            device_id: self.device_id,
            power: self.power,
            voltage: self.voltage,
            current: self.current,
            timestamp: self.timestamp.unwrap_or(now),
        }
    }
}

/// Lookback window of a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    Month,
}

impl Period {
    /// Unknown tags fall back to a day.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "week" => Period::Week,
            "month" => Period::Month,
            _ => Period::Day,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
        }
    }

    pub fn lookback(self) -> Duration {
        match self {
            Period::Day => Duration::days(1),
            Period::Week => Duration::days(7),
            Period::Month => Duration::days(30),
        }
    }
}

/// Raw aggregate of the readings inside a window, as the store computes it.
#[derive(Debug, Clone, Default, PartialEq, sqlx::FromRow)]
pub struct WindowAggregate {
    pub total_records: i64,
    pub avg_power: f64,
    pub max_power: f64,
    pub min_power: f64,
    pub avg_voltage: f64,
    pub avg_current: f64,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

/// Derived usage summary; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub device_id: i64,
    /// The period the window was resolved to; unknown tags come back as `day`.
    pub period: Period,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total_records: i64,
    pub avg_power: f64,
    pub max_power: f64,
    pub min_power: f64,
    pub total_energy_kwh: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_voltage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_current: Option<f64>,
}

/// Result of a live power read through the device's control channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LivePower {
    pub device_id: i64,
    pub power: f64,
    pub timestamp: DateTime<Utc>,
}
