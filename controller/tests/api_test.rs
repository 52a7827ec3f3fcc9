use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use plug_controller::gateway::{Credentials, DeviceGateway, GatewayError};
use plug_controller::rest::{create_router, AppState, USER_HEADER};
use plug_controller::store::MemoryStore;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_test::assert_ok;
use tower::ServiceExt;

#[derive(Default)]
struct StubGateway {
    fail: AtomicBool,
}

#[async_trait]
impl DeviceGateway for StubGateway {
    async fn set_power(&self, _credentials: &Credentials, _on: bool) -> Result<(), GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Status(502));
        }
        Ok(())
    }

    async fn read_power(&self, _credentials: &Credentials) -> Result<f64, GatewayError> {
        Ok(87.25)
    }
}

fn app() -> (Router, Arc<StubGateway>) {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(StubGateway::default());
    let state = AppState::new(store.clone(), store, gateway.clone());
    (create_router(state), gateway)
}

async fn send(app: &Router, method: &str, uri: &str, user: Option<i64>, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        request = request.header(USER_HEADER, user.to_string());
    }
    let body = match body {
        Some(body) => {
            request = request.header("content-type", "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    (status, value)
}

async fn create_device(app: &Router, user: i64, body: Value) -> i64 {
    let (status, device) = send(app, "POST", "/api/devices", Some(user), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    device["id"].as_i64().unwrap()
}

#[tokio::test]
async fn test_health() {
    let (app, _) = app();

    let (status, body) = send(&app, "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_identity_is_unauthorized() {
    let (app, _) = app();

    let (status, _) = send(&app, "GET", "/api/devices", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/devices")
                .header(USER_HEADER, "alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_device_crud_is_owner_scoped() {
    let (app, _) = app();
    let id = create_device(
        &app,
        1,
        json!({ "name": "Desk lamp", "room": "Office", "type": "smart_plug" }),
    )
    .await;

    let (status, device) = send(&app, "GET", &format!("/api/devices/{}", id), Some(1), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(device["name"], "Desk lamp");
    assert_eq!(device["room"], "Office");
    assert_eq!(device["type"], "smart_plug");

    let (status, body) = send(&app, "GET", &format!("/api/devices/{}", id), Some(2), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.to_string().find("Desk lamp").is_none());

    let (_, others) = send(&app, "GET", "/api/devices", Some(2), None).await;
    assert_eq!(others, json!([]));

    let (status, updated) = send(
        &app,
        "PATCH",
        &format!("/api/devices/{}", id),
        Some(1),
        Some(json!({ "room": "Bedroom" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["room"], "Bedroom");
    assert_eq!(updated["name"], "Desk lamp");

    let (status, _) = send(&app, "DELETE", &format!("/api/devices/{}", id), Some(2), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "DELETE", &format!("/api/devices/{}", id), Some(1), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "GET", &format!("/api/devices/{}", id), Some(1), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_device_validation() {
    let (app, _) = app();

    let (status, body) = send(&app, "POST", "/api/devices", Some(1), Some(json!({ "name": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], 400);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/devices")
                .header(USER_HEADER, "1")
                .body(Body::from("{broken"))
                .unwrap(),
        )
        .await;
    assert_eq!(assert_ok!(response).status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_toggle_paths() {
    let (app, gateway) = app();
    let plain = create_device(&app, 1, json!({ "name": "Fan" })).await;
    let wired = create_device(
        &app,
        1,
        json!({
            "name": "Heater",
            "metadata": r#"{"control":{"ip":"192.168.1.20","username":"admin","secret":"pw"}}"#
        }),
    )
    .await;

    let (status, device) = send(&app, "POST", &format!("/api/devices/{}/toggle", plain), Some(1), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(device["status"], "online");
    assert_eq!(device["power_state"], Value::Null);

    let (_, device) = send(&app, "POST", &format!("/api/devices/{}/toggle", wired), Some(1), None).await;
    assert_eq!(device["power_state"], true);
    assert_eq!(device["status"], "online");

    gateway.fail.store(true, Ordering::SeqCst);
    let (status, body) = send(&app, "POST", &format!("/api/devices/{}/toggle", wired), Some(1), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"]["error_id"].is_string());

    let (_, device) = send(&app, "GET", &format!("/api/devices/{}", wired), Some(1), None).await;
    assert_eq!(device["power_state"], true);

    let (status, _) = send(&app, "POST", &format!("/api/devices/{}/toggle", wired), Some(2), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_live_read() {
    let (app, _) = app();
    let plain = create_device(&app, 1, json!({ "name": "Fan" })).await;
    let wired = create_device(
        &app,
        1,
        json!({
            "name": "Washer",
            "metadata": r#"{"control":{"host":"10.0.0.5","username":"admin","password":"pw"}}"#
        }),
    )
    .await;

    let (status, body) = send(&app, "GET", &format!("/api/devices/{}/read", wired), Some(1), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["power"], 87.25);

    let (_, latest) = send(&app, "GET", &format!("/api/devices/{}/telemetry/latest", wired), Some(1), None).await;
    assert_eq!(latest["power"], 87.25);

    let (status, body) = send(&app, "GET", &format!("/api/devices/{}/read", plain), Some(1), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "device not configured for live reads");
}

#[tokio::test]
async fn test_telemetry_flow() {
    let (app, _) = app();
    let device = create_device(&app, 1, json!({ "name": "Oven" })).await;
    let t0 = chrono::Utc::now() - chrono::Duration::hours(2);
    let t1 = t0 + chrono::Duration::seconds(3600);

    for (power, ts) in [(100.0, t0), (200.0, t1)] {
        let (status, reading) = send(
            &app,
            "POST",
            "/api/telemetry",
            Some(1),
            Some(json!({ "device_id": device, "power": power, "timestamp": ts })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(reading["power"], power);
    }

    let (status, summary) = send(
        &app,
        "GET",
        &format!("/api/devices/{}/telemetry/summary?period=day", device),
        Some(1),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["total_records"], 2);
    assert_eq!(summary["max_power"], 200.0);
    assert_eq!(summary["min_power"], 100.0);
    assert!((summary["total_energy_kwh"].as_f64().unwrap() - 0.15).abs() < 1e-9);
    assert!(summary.get("avg_voltage").is_none());

    let (_, readings) = send(&app, "GET", &format!("/api/telemetry?device_id={}&limit=1", device), Some(1), None).await;
    let readings = readings.as_array().unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0]["power"], 200.0);

    let (_, latest) = send(&app, "GET", "/api/telemetry/latest", Some(1), None).await;
    assert_eq!(latest.as_array().unwrap().len(), 1);

    let (status, _) = send(&app, "GET", &format!("/api/devices/{}/telemetry", device), Some(2), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let reading_id = readings[0]["id"].as_i64().unwrap();
    let (status, _) = send(&app, "DELETE", &format!("/api/telemetry/{}", reading_id), Some(2), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "DELETE", &format!("/api/telemetry/{}", reading_id), Some(1), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, remaining) = send(&app, "GET", &format!("/api/devices/{}/telemetry", device), Some(1), None).await;
    assert_eq!(remaining.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_rejected_reading() {
    let (app, _) = app();
    let device = create_device(&app, 1, json!({ "name": "Oven" })).await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/telemetry",
        Some(1),
        Some(json!({ "device_id": device, "power": 250000.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/api/telemetry",
        Some(2),
        Some(json!({ "device_id": device, "power": 25.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_simulator_endpoints() {
    let (app, _) = app();
    let device = create_device(&app, 1, json!({ "name": "Dryer" })).await;

    let (status, reading) = send(&app, "POST", &format!("/api/simulator/generate/{}", device), Some(1), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reading["device_id"], device);
    assert!(reading["voltage"].is_number());

    let (status, report) = send(
        &app,
        "POST",
        &format!("/api/simulator/bulk/{}", device),
        Some(1),
        Some(json!({ "count": 10, "base_power": 60.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(report["readings_created"], 10);
    assert_eq!(report["interval_sec"], 300);
    assert_eq!(report["base_power"], 60.0);

    let (_, device_state) = send(&app, "GET", &format!("/api/devices/{}", device), Some(1), None).await;
    assert_eq!(device_state["status"], "online");

    let (status, _) = send(&app, "POST", &format!("/api/simulator/bulk/{}", device), Some(2), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = app();

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await;
    let response = assert_ok!(response);
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_bulk_simulation_edge_bodies() {
    let (app, _) = app();
    let device = create_device(&app, 1, json!({ "name": "Boiler" })).await;

    let (status, report) = send(
        &app,
        "POST",
        &format!("/api/simulator/bulk/{}", device),
        Some(1),
        Some(json!({ "interval_sec": 1_000_000_000_000i64 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(report["interval_sec"], 86_400);
    assert_eq!(report["readings_created"], 24);

    let other = create_device(&app, 1, json!({ "name": "Kiln" })).await;
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/simulator/bulk/{}", other),
        Some(1),
        Some(json!({ "base_power": 99000, "variation": 0.05, "count": 50 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, readings) = send(&app, "GET", &format!("/api/devices/{}/telemetry", other), Some(1), None).await;
    assert_eq!(readings, json!([]));
}
