use super::{clamp_limit, DeviceStore, TelemetryStore};
use crate::errors::Result;
use crate::model::{Device, DeviceStatus, DeviceUpdate, NewDevice, NewReading, Reading, WindowAggregate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct Tables {
    devices: BTreeMap<i64, Device>,
    readings: BTreeMap<i64, Reading>,
    next_device_id: i64,
    next_reading_id: i64,
}

impl Tables {
    fn owns(&self, user_id: i64, device_id: i64) -> bool {
        self.devices
            .get(&device_id)
            .is_some_and(|device| device.user_id == user_id)
    }
}

/// Non-persistent store for prototypes and tests. Every access goes through
/// a single reader/writer lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Newest first, ties broken by id so results are stable.
fn newest_first(mut readings: Vec<Reading>, limit: i64) -> Vec<Reading> {
    readings.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
    readings.truncate(clamp_limit(limit) as usize);
    readings
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn create(&self, user_id: i64, device: &NewDevice) -> Result<i64> {
        let mut tables = self.tables.write();
        tables.next_device_id += 1;
        let id = tables.next_device_id;

        tables.devices.insert(
            id,
            Device {
                id,
                user_id,
                name: device.name.clone(),
                room: device.room.clone(),
                device_type: device.device_type.clone(),
                status: None,
                power_state: None,
                metadata: device.metadata.clone(),
                created_at: Utc::now(),
                last_seen: None,
            },
        );

        Ok(id)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Device>> {
        Ok(self.tables.read().devices.get(&id).cloned())
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Device>> {
        let tables = self.tables.read();
        let mut devices: Vec<Device> = tables
            .devices
            .values()
            .filter(|device| device.user_id == user_id)
            .cloned()
            .collect();
        devices.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(devices)
    }

    async fn update(&self, user_id: i64, id: i64, update: &DeviceUpdate) -> Result<bool> {
        let mut tables = self.tables.write();
        match tables.devices.get_mut(&id) {
            Some(device) if device.user_id == user_id => {
                update.apply_to(device);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_status(&self, id: i64, status: DeviceStatus) -> Result<()> {
        if let Some(device) = self.tables.write().devices.get_mut(&id) {
            device.status = Some(status);
        }
        Ok(())
    }

    async fn update_power_state(&self, id: i64, on: bool) -> Result<()> {
        if let Some(device) = self.tables.write().devices.get_mut(&id) {
            device.power_state = Some(on);
        }
        Ok(())
    }

    async fn set_confirmed_power(&self, id: i64, on: bool) -> Result<()> {
        if let Some(device) = self.tables.write().devices.get_mut(&id) {
            device.power_state = Some(on);
            device.status = Some(DeviceStatus::Online);
        }
        Ok(())
    }

    async fn delete(&self, user_id: i64, id: i64) -> Result<bool> {
        let mut tables = self.tables.write();
        if !tables.owns(user_id, id) {
            return Ok(false);
        }

        tables.devices.remove(&id);
        tables.readings.retain(|_, reading| reading.device_id != id);
        Ok(true)
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn create(&self, reading: &NewReading) -> Result<i64> {
        let mut tables = self.tables.write();
        tables.next_reading_id += 1;
        let id = tables.next_reading_id;

        tables
            .readings
            .insert(id, reading.clone().into_reading(id, Utc::now()));

        Ok(id)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Reading>> {
        Ok(self.tables.read().readings.get(&id).cloned())
    }

    async fn list_by_device(&self, device_id: i64, limit: i64) -> Result<Vec<Reading>> {
        let tables = self.tables.read();
        let readings = tables
            .readings
            .values()
            .filter(|reading| reading.device_id == device_id)
            .cloned()
            .collect();

        Ok(newest_first(readings, limit))
    }

    async fn list_by_user(&self, user_id: i64, limit: i64) -> Result<Vec<Reading>> {
        let tables = self.tables.read();
        let readings = tables
            .readings
            .values()
            .filter(|reading| tables.owns(user_id, reading.device_id))
            .cloned()
            .collect();

        Ok(newest_first(readings, limit))
    }

    async fn list_by_device_for_user(
        &self,
        user_id: i64,
        device_id: i64,
        limit: i64,
    ) -> Result<Vec<Reading>> {
        let tables = self.tables.read();
        if !tables.owns(user_id, device_id) {
            return Ok(Vec::new());
        }

        let readings = tables
            .readings
            .values()
            .filter(|reading| reading.device_id == device_id)
            .cloned()
            .collect();

        Ok(newest_first(readings, limit))
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        Ok(self.tables.write().readings.remove(&id).is_some())
    }

    async fn user_owns_device(&self, user_id: i64, device_id: i64) -> Result<bool> {
        Ok(self.tables.read().owns(user_id, device_id))
    }

    async fn latest_by_device(&self, device_id: i64) -> Result<Option<Reading>> {
        let tables = self.tables.read();
        let readings = tables
            .readings
            .values()
            .filter(|reading| reading.device_id == device_id)
            .cloned()
            .collect();

        Ok(newest_first(readings, 1).into_iter().next())
    }

    async fn latest_by_user_devices(&self, user_id: i64) -> Result<Vec<Reading>> {
        let tables = self.tables.read();
        let mut latest: HashMap<i64, Reading> = HashMap::new();

        for reading in tables
            .readings
            .values()
            .filter(|reading| tables.owns(user_id, reading.device_id))
        {
            let newer = latest.get(&reading.device_id).map_or(true, |current| {
                (reading.timestamp, reading.id) > (current.timestamp, current.id)
            });
            if newer {
                latest.insert(reading.device_id, reading.clone());
            }
        }

        let mut readings: Vec<Reading> = latest.into_values().collect();
        readings.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(readings)
    }

    async fn touch_device(&self, device_id: i64) -> Result<()> {
        if let Some(device) = self.tables.write().devices.get_mut(&device_id) {
            device.status = Some(DeviceStatus::Online);
            device.last_seen = Some(Utc::now());
        }
        Ok(())
    }

    async fn aggregate_window(
        &self,
        user_id: i64,
        device_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WindowAggregate> {
        let tables = self.tables.read();
        if !tables.owns(user_id, device_id) {
            return Ok(WindowAggregate::default());
        }

        let window: Vec<&Reading> = tables
            .readings
            .values()
            .filter(|r| r.device_id == device_id && r.timestamp >= start && r.timestamp <= end)
            .collect();

        if window.is_empty() {
            return Ok(WindowAggregate::default());
        }

        // Missing voltage/current samples are skipped, like SQL AVG skips NULLs
        let mean = |values: Vec<f64>| {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        };
        let powers: Vec<f64> = window.iter().map(|r| r.power).collect();

        Ok(WindowAggregate {
            total_records: window.len() as i64,
            avg_power: mean(powers.clone()),
            max_power: powers.iter().copied().fold(f64::MIN, f64::max),
            min_power: powers.iter().copied().fold(f64::MAX, f64::min),
            avg_voltage: mean(window.iter().filter_map(|r| r.voltage).collect()),
            avg_current: mean(window.iter().filter_map(|r| r.current).collect()),
            earliest: window.iter().map(|r| r.timestamp).min(),
            latest: window.iter().map(|r| r.timestamp).max(),
        })
    }
}
