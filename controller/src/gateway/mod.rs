//! Physical control channel of a smart plug.
//!
//! A device opts into remote control by embedding a credential set in its
//! metadata blob:
//!
//! ```json
//! {"control": {"host": "192.168.1.40", "username": "admin", "password": "secret"}}
//! ```
//!
//! `ip` is accepted for `host` and `secret` for `password`.

mod tasmota;

pub use tasmota::TasmotaGateway;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

const CONTROL_KEY: &str = "control";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid control configuration: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("device rejected the credentials")]
    AuthenticationFailed,

    #[error("device answered HTTP {0}")]
    Status(u16),

    #[error("unexpected device response: {0}")]
    UnexpectedResponse(String),
}

/// Connection credentials for one device.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Credential fields found in a metadata blob, possibly incomplete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteControl {
    pub host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl RemoteControl {
    /// Extracts the control section of a metadata blob.
    ///
    /// Returns `None` when the blob is missing, is not JSON, has an unexpected
    /// shape, or carries none of the three fields.
    pub fn from_metadata(metadata: Option<&str>) -> Option<Self> {
        let root: Value = serde_json::from_str(metadata?.trim()).ok()?;
        let section = root.get(CONTROL_KEY)?.as_object()?;

        let field = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| section.get(*name).and_then(Value::as_str))
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let control = RemoteControl {
            host: field(&["host", "ip"]),
            username: field(&["username"]),
            password: field(&["password", "secret"]),
        };

        if control.host.is_none() && control.username.is_none() && control.password.is_none() {
            return None;
        }

        Some(control)
    }

    /// Fails without contacting anything when a field is missing.
    pub fn into_credentials(self) -> Result<Credentials, GatewayError> {
        let missing = |field: &str| GatewayError::Config(format!("{field} is required"));

        Ok(Credentials {
            host: self.host.ok_or_else(|| missing("host"))?,
            username: self.username.ok_or_else(|| missing("username"))?,
            password: self.password.ok_or_else(|| missing("password"))?,
        })
    }
}

/// Remote power control for a single physical device.
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    /// Switches the relay and waits for the device to confirm.
    async fn set_power(&self, credentials: &Credentials, on: bool) -> Result<(), GatewayError>;

    /// Reads instantaneous power draw in Watts.
    async fn read_power(&self, credentials: &Credentials) -> Result<f64, GatewayError>;
}
