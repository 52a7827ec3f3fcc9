use crate::errors::{Error, Result};
use crate::model::{Device, DeviceUpdate, NewDevice};
use crate::store::DeviceStore;
use crate::validate::{validate_new_device, validate_update};
use std::sync::Arc;
use tracing::{debug, info};

/// Owner-facing device operations.
#[derive(Clone)]
pub struct DeviceService {
    store: Arc<dyn DeviceStore>,
}

impl DeviceService {
    pub fn new(store: Arc<dyn DeviceStore>) -> Self {
        Self { store }
    }

    /// Loads a device only if `user_id` owns it. Someone else's device is
    /// reported exactly like a missing one.
    pub async fn get_owned(&self, user_id: i64, id: i64) -> Result<Device> {
        match self.store.get_by_id(id).await? {
            Some(device) if device.user_id == user_id => Ok(device),
            _ => Err(Error::device_not_found()),
        }
    }

    pub async fn list(&self, user_id: i64) -> Result<Vec<Device>> {
        self.store.list_by_user(user_id).await
    }

    pub async fn create(&self, user_id: i64, device: NewDevice) -> Result<Device> {
        validate_new_device(&device)?;

        let id = self.store.create(user_id, &device).await?;
        info!("Device {} ({}) created for user {}", id, device.name, user_id);

        self.get_owned(user_id, id).await
    }

    pub async fn update(&self, user_id: i64, id: i64, update: DeviceUpdate) -> Result<Device> {
        validate_update(&update)?;

        if !self.store.update(user_id, id, &update).await? {
            return Err(Error::device_not_found());
        }
        debug!("Device {} updated by user {}", id, user_id);

        self.get_owned(user_id, id).await
    }

    pub async fn delete(&self, user_id: i64, id: i64) -> Result<()> {
        if !self.store.delete(user_id, id).await? {
            return Err(Error::device_not_found());
        }
        info!("Device {} deleted by user {}", id, user_id);

        Ok(())
    }
}
