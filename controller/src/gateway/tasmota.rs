use super::{Credentials, DeviceGateway, GatewayError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Gateway speaking the Tasmota web command API (`/cm?cmnd=...`).
#[derive(Debug, Clone)]
pub struct TasmotaGateway {
    client: Client,
}

impl TasmotaGateway {
    pub fn new(timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn send(&self, credentials: &Credentials, command: &str) -> Result<Value, GatewayError> {
        let url = command_url(credentials, command);
        debug!(host = %credentials.host, command, "Sending device command");

        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(GatewayError::AuthenticationFailed);
        }
        if !response.status().is_success() {
            return Err(GatewayError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        debug!(body = %body, "Received device response");

        let value: Value = serde_json::from_str(&body)
            .map_err(|_| GatewayError::UnexpectedResponse(body.clone()))?;

        // Tasmota answers 200 with {"WARNING": "Need user=<username>&password=<password>"}
        if value.get("WARNING").is_some() {
            return Err(GatewayError::AuthenticationFailed);
        }

        Ok(value)
    }
}

#[async_trait]
impl DeviceGateway for TasmotaGateway {
    async fn set_power(&self, credentials: &Credentials, on: bool) -> Result<(), GatewayError> {
        let command = if on { "Power On" } else { "Power Off" };
        let response = self.send(credentials, command).await?;

        match parse_power_state(&response) {
            Some(state) if state == on => Ok(()),
            Some(state) => Err(GatewayError::UnexpectedResponse(format!(
                "requested {} but relay reports {}",
                on_off(on),
                on_off(state)
            ))),
            None => Err(GatewayError::UnexpectedResponse(response.to_string())),
        }
    }

    async fn read_power(&self, credentials: &Credentials) -> Result<f64, GatewayError> {
        let response = self.send(credentials, "Status 8").await?;

        parse_energy_power(&response)
            .ok_or_else(|| GatewayError::UnexpectedResponse(response.to_string()))
    }
}

fn command_url(credentials: &Credentials, command: &str) -> String {
    let host = credentials.host.trim_end_matches('/');
    let base = if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    };

    format!(
        "{}/cm?user={}&password={}&cmnd={}",
        base,
        urlencoding::encode(&credentials.username),
        urlencoding::encode(&credentials.password),
        urlencoding::encode(command)
    )
}

/// Reads `POWER` (or `POWER1` on multi-relay firmware) from a command reply.
fn parse_power_state(response: &Value) -> Option<bool> {
    let state = response
        .get("POWER")
        .or_else(|| response.get("POWER1"))?
        .as_str()?;

    match state.to_ascii_uppercase().as_str() {
        "ON" | "1" => Some(true),
        "OFF" | "0" => Some(false),
        _ => None,
    }
}

fn parse_energy_power(response: &Value) -> Option<f64> {
    let power = response.get("StatusSNS")?.get("ENERGY")?.get("Power")?;

    match power {
        Value::Number(n) => n.as_f64(),
        // Multi-channel meters report one value per channel
        Value::Array(values) => values.iter().map(Value::as_f64).sum(),
        _ => None,
    }
}

fn on_off(state: bool) -> &'static str {
    if state {
        "ON"
    } else {
        "OFF"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn credentials(host: &str) -> Credentials {
        Credentials {
            host: host.to_string(),
            username: "admin".to_string(),
            password: "p&ss word".to_string(),
        }
    }

    #[test]
    fn test_command_url_encodes_everything() {
        let url = command_url(&credentials("192.168.1.100"), "Power On");
        assert_eq!(
            url,
            "http://192.168.1.100/cm?user=admin&password=p%26ss%20word&cmnd=Power%20On"
        );
    }

    #[test]
    fn test_command_url_keeps_scheme() {
        let url = command_url(&credentials("https://plug.local/"), "Status 8");
        assert!(url.starts_with("https://plug.local/cm?"));
    }

    #[test]
    fn test_parse_power_state() {
        assert_eq!(parse_power_state(&json!({"POWER": "ON"})), Some(true));
        assert_eq!(parse_power_state(&json!({"POWER1": "OFF"})), Some(false));
        assert_eq!(parse_power_state(&json!({"POWER": "TOGGLE"})), None);
        assert_eq!(parse_power_state(&json!({"Dimmer": 40})), None);
    }

    #[test]
    fn test_parse_energy_power() {
        let single = json!({"StatusSNS": {"ENERGY": {"Power": 45, "Voltage": 230}}});
        assert_eq!(parse_energy_power(&single), Some(45.0));

        let multi = json!({"StatusSNS": {"ENERGY": {"Power": [10.5, 20]}}});
        assert_eq!(parse_energy_power(&multi), Some(30.5));

        assert_eq!(parse_energy_power(&json!({"StatusSNS": {}})), None);
    }
}
