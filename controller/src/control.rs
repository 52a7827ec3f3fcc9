//! Hybrid power toggle.
//!
//! A device with a control channel in its metadata is the source of truth for
//! its relay: the stored `power_state` only changes after the device confirms.
//! A device without one has no ground truth, so a toggle only flips its
//! coarse `status` label and leaves `power_state` alone.

use crate::devices::DeviceService;
use crate::errors::{Error, Result};
use crate::gateway::{Credentials, DeviceGateway, GatewayError, RemoteControl};
use crate::metrics::{
    GATEWAY_FAILURES_TOTAL, GATEWAY_LATENCY_SECONDS, GATEWAY_TOGGLES_TOTAL, READINGS_TOTAL,
    STATUS_TOGGLES_TOTAL,
};
use crate::model::{Device, DeviceStatus, LivePower, NewReading};
use crate::store::{DeviceStore, TelemetryStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct DeviceControl {
    devices: DeviceService,
    device_store: Arc<dyn DeviceStore>,
    telemetry: Arc<dyn TelemetryStore>,
    gateway: Arc<dyn DeviceGateway>,
}

impl DeviceControl {
    pub fn new(
        device_store: Arc<dyn DeviceStore>,
        telemetry: Arc<dyn TelemetryStore>,
        gateway: Arc<dyn DeviceGateway>,
    ) -> Self {
        Self {
            devices: DeviceService::new(device_store.clone()),
            device_store,
            telemetry,
            gateway,
        }
    }

    pub async fn toggle(&self, user_id: i64, device_id: i64) -> Result<Device> {
        let device = self.devices.get_owned(user_id, device_id).await?;
        // Unknown counts as off, so the first toggle switches on
        let desired = !device.power_state.unwrap_or(false);

        match RemoteControl::from_metadata(device.metadata.as_deref()) {
            Some(control) => {
                let credentials = control.into_credentials().map_err(|e| {
                    GATEWAY_FAILURES_TOTAL.inc();
                    e
                })?;
                self.switch_relay(device_id, &credentials, desired).await?;
                self.device_store
                    .set_confirmed_power(device_id, desired)
                    .await?;
                GATEWAY_TOGGLES_TOTAL.inc();
                info!(
                    "Device {} switched {} by user {}",
                    device_id,
                    if desired { "on" } else { "off" },
                    user_id
                );
            }
            None => {
                let next = device
                    .status
                    .unwrap_or(DeviceStatus::Offline)
                    .flipped();
                self.device_store.update_status(device_id, next).await?;
                STATUS_TOGGLES_TOTAL.inc();
                info!(
                    "Device {} has no control channel, status set to {}",
                    device_id,
                    next.as_str()
                );
            }
        }

        self.devices.get_owned(user_id, device_id).await
    }

    /// Reads the current draw from the device and records it as a reading.
    pub async fn read_live(&self, user_id: i64, device_id: i64) -> Result<LivePower> {
        let device = self.devices.get_owned(user_id, device_id).await?;
        let credentials = RemoteControl::from_metadata(device.metadata.as_deref())
            .ok_or_else(|| Error::Validation("device not configured for live reads".to_string()))?
            .into_credentials()?;

        let timer = GATEWAY_LATENCY_SECONDS.start_timer();
        let power = self.gateway.read_power(&credentials).await;
        timer.observe_duration();
        let power = power.map_err(|e| {
            GATEWAY_FAILURES_TOTAL.inc();
            warn!("Live read of device {} failed: {}", device_id, e);
            e
        })?;

        let timestamp = Utc::now();
        self.telemetry
            .create(&NewReading {
                device_id,
                power,
                voltage: None,
                current: None,
                timestamp: Some(timestamp),
            })
            .await?;
        READINGS_TOTAL.inc();

        if let Err(e) = self.telemetry.touch_device(device_id).await {
            warn!("Failed to update status for device {}: {}", device_id, e);
        }

        Ok(LivePower {
            device_id,
            power,
            timestamp,
        })
    }

    async fn switch_relay(
        &self,
        device_id: i64,
        credentials: &Credentials,
        on: bool,
    ) -> std::result::Result<(), GatewayError> {
        let timer = GATEWAY_LATENCY_SECONDS.start_timer();
        let result = self.gateway.set_power(credentials, on).await;
        timer.observe_duration();

        if let Err(e) = &result {
            GATEWAY_FAILURES_TOTAL.inc();
            warn!(
                "Device {} did not confirm power {}: {}",
                device_id,
                if on { "on" } else { "off" },
                e
            );
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewDevice;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeGateway {
        fail: bool,
        power: f64,
        calls: Mutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl DeviceGateway for FakeGateway {
        async fn set_power(&self, credentials: &Credentials, on: bool) -> std::result::Result<(), GatewayError> {
            self.calls.lock().push((credentials.host.clone(), on));
            if self.fail {
                return Err(GatewayError::Status(503));
            }
            Ok(())
        }

        async fn read_power(&self, _credentials: &Credentials) -> std::result::Result<f64, GatewayError> {
            if self.fail {
                return Err(GatewayError::AuthenticationFailed);
            }
            Ok(self.power)
        }
    }

    const CONTROL: &str = r#"{"control": {"host": "10.0.0.9", "username": "admin", "password": "pw"}}"#;

    async fn setup(gateway: FakeGateway, metadata: Option<&str>) -> (DeviceControl, Arc<MemoryStore>, Arc<FakeGateway>, i64) {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(gateway);
        let id = DeviceStore::create(
            store.as_ref(),
            1,
            &NewDevice {
                name: "Heater".to_string(),
                metadata: metadata.map(str::to_string),
                ..NewDevice::default()
            },
        )
        .await
        .unwrap();

        let control = DeviceControl::new(store.clone(), store.clone(), gateway.clone());
        (control, store, gateway, id)
    }

    #[tokio::test]
    async fn test_toggle_without_channel_flips_status_only() {
        let (control, _, gateway, id) = setup(FakeGateway::default(), None).await;

        let first = control.toggle(1, id).await.unwrap();
        assert_eq!(first.status, Some(DeviceStatus::Online));
        assert_eq!(first.power_state, None);

        let second = control.toggle(1, id).await.unwrap();
        assert_eq!(second.status, Some(DeviceStatus::Offline));
        assert_eq!(second.power_state, None);

        assert!(gateway.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_metadata_falls_back_to_status_flip() {
        let (control, _, gateway, id) =
            setup(FakeGateway::default(), Some("{not json")).await;

        let device = control.toggle(1, id).await.unwrap();

        assert_eq!(device.status, Some(DeviceStatus::Online));
        assert!(gateway.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_with_channel_confirms_power() {
        let (control, _, gateway, id) = setup(FakeGateway::default(), Some(CONTROL)).await;

        let on = control.toggle(1, id).await.unwrap();
        assert_eq!(on.power_state, Some(true));
        assert_eq!(on.status, Some(DeviceStatus::Online));

        let off = control.toggle(1, id).await.unwrap();
        assert_eq!(off.power_state, Some(false));
        assert_eq!(off.status, Some(DeviceStatus::Online));

        assert_eq!(
            *gateway.calls.lock(),
            vec![("10.0.0.9".to_string(), true), ("10.0.0.9".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_gateway_failure_leaves_device_untouched() {
        let gateway = FakeGateway {
            fail: true,
            ..FakeGateway::default()
        };
        let (control, store, _, id) = setup(gateway, Some(CONTROL)).await;
        store.update_status(id, DeviceStatus::Offline).await.unwrap();
        let before = DeviceStore::get_by_id(store.as_ref(), id).await.unwrap().unwrap();

        let err = control.toggle(1, id).await.unwrap_err();
        assert!(matches!(err, Error::Gateway(_)));

        let after = DeviceStore::get_by_id(store.as_ref(), id).await.unwrap().unwrap();
        assert_eq!(after.power_state, before.power_state);
        assert_eq!(after.status, before.status);
    }

    #[tokio::test]
    async fn test_partial_credentials_are_not_attempted() {
        let (control, store, gateway, id) = setup(
            FakeGateway::default(),
            Some(r#"{"control": {"host": "10.0.0.9"}}"#),
        )
        .await;

        let err = control.toggle(1, id).await.unwrap_err();

        assert!(matches!(err, Error::Gateway(GatewayError::Config(_))));
        assert!(gateway.calls.lock().is_empty());
        let device = DeviceStore::get_by_id(store.as_ref(), id).await.unwrap().unwrap();
        assert_eq!(device.status, None);
    }

    #[tokio::test]
    async fn test_toggle_foreign_device_is_not_found() {
        let (control, _, gateway, id) = setup(FakeGateway::default(), Some(CONTROL)).await;

        let err = control.toggle(2, id).await.unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
        assert!(gateway.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_live_read_records_reading() {
        let gateway = FakeGateway {
            power: 42.5,
            ..FakeGateway::default()
        };
        let (control, store, _, id) = setup(gateway, Some(CONTROL)).await;

        let live = control.read_live(1, id).await.unwrap();
        assert_eq!(live.power, 42.5);

        let latest = store.latest_by_device(id).await.unwrap().unwrap();
        assert_eq!(latest.power, 42.5);
        let device = DeviceStore::get_by_id(store.as_ref(), id).await.unwrap().unwrap();
        assert_eq!(device.status, Some(DeviceStatus::Online));
        assert!(device.last_seen.is_some());
    }

    #[tokio::test]
    async fn test_live_read_without_channel_is_validation_error() {
        let (control, _, _, id) = setup(FakeGateway::default(), None).await;

        let err = control.read_live(1, id).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = control.read_live(2, id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
