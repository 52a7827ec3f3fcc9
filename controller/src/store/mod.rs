//! Persistence seams. Services only ever see these traits; each backend is
//! one adapter implementing both.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{make_pool, PgStore};

use crate::errors::Result;
use crate::model::{Device, DeviceStatus, DeviceUpdate, NewDevice, NewReading, Reading, WindowAggregate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub const DEFAULT_LIMIT: i64 = 100;
pub const MAX_LIMIT: i64 = 1000;

/// Bounds a caller-supplied page size.
pub fn clamp_limit(limit: i64) -> i64 {
    if limit <= 0 {
        DEFAULT_LIMIT
    } else {
        limit.min(MAX_LIMIT)
    }
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn create(&self, user_id: i64, device: &NewDevice) -> Result<i64>;

    /// Does not check ownership.
    async fn get_by_id(&self, id: i64) -> Result<Option<Device>>;

    /// Newest-created first.
    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Device>>;

    /// Returns `false` when no device with that id belongs to `user_id`.
    async fn update(&self, user_id: i64, id: i64, update: &DeviceUpdate) -> Result<bool>;

    async fn update_status(&self, id: i64, status: DeviceStatus) -> Result<()>;

    async fn update_power_state(&self, id: i64, on: bool) -> Result<()>;

    /// Records a power state the device itself confirmed: sets `power_state`
    /// and marks the device online in one write.
    async fn set_confirmed_power(&self, id: i64, on: bool) -> Result<()>;

    /// Removes the device and its telemetry. Returns `false` when nothing
    /// owned by `user_id` matched.
    async fn delete(&self, user_id: i64, id: i64) -> Result<bool>;
}

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn create(&self, reading: &NewReading) -> Result<i64>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Reading>>;

    async fn list_by_device(&self, device_id: i64, limit: i64) -> Result<Vec<Reading>>;

    async fn list_by_user(&self, user_id: i64, limit: i64) -> Result<Vec<Reading>>;

    async fn list_by_device_for_user(
        &self,
        user_id: i64,
        device_id: i64,
        limit: i64,
    ) -> Result<Vec<Reading>>;

    async fn delete(&self, id: i64) -> Result<bool>;

    async fn user_owns_device(&self, user_id: i64, device_id: i64) -> Result<bool>;

    async fn latest_by_device(&self, device_id: i64) -> Result<Option<Reading>>;

    /// Newest reading of each device the user owns, newest first.
    async fn latest_by_user_devices(&self, user_id: i64) -> Result<Vec<Reading>>;

    /// Marks the device online and refreshes its last-seen time.
    async fn touch_device(&self, device_id: i64) -> Result<()>;

    /// Aggregates the user's readings of `device_id` within `[start, end]`.
    async fn aggregate_window(
        &self,
        user_id: i64,
        device_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WindowAggregate>;
}
