use crate::control::DeviceControl;
use crate::devices::DeviceService;
use crate::errors::Error;
use crate::gateway::DeviceGateway;
use crate::metrics;
use crate::model::{Device, DeviceUpdate, LivePower, NewDevice, NewReading, Reading, Summary};
use crate::store::{DeviceStore, TelemetryStore};
use crate::telemetry::{BulkReport, TelemetryService};
use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use plug_simulator::{BulkConfig, SimulatorConfig};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Header carrying the authenticated caller, set by the upstream auth proxy.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    devices: DeviceService,
    control: DeviceControl,
    telemetry: Arc<TelemetryService>,
}

impl AppState {
    pub fn new(
        device_store: Arc<dyn DeviceStore>,
        telemetry_store: Arc<dyn TelemetryStore>,
        gateway: Arc<dyn DeviceGateway>,
    ) -> Self {
        Self {
            devices: DeviceService::new(device_store.clone()),
            control: DeviceControl::new(device_store, telemetry_store.clone(), gateway),
            telemetry: Arc::new(TelemetryService::new(telemetry_store)),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/api/devices", get(list_devices).post(create_device))
        .route(
            "/api/devices/:id",
            get(get_device).patch(update_device).delete(delete_device),
        )
        .route("/api/devices/:id/toggle", post(toggle_device))
        .route("/api/devices/:id/read", get(read_device))
        .route("/api/devices/:id/telemetry", get(device_telemetry))
        .route("/api/devices/:id/telemetry/summary", get(device_summary))
        .route("/api/devices/:id/telemetry/latest", get(device_latest))
        .route("/api/telemetry", get(list_telemetry).post(ingest_telemetry))
        .route("/api/telemetry/latest", get(latest_telemetry))
        .route("/api/telemetry/:id", delete(delete_telemetry))
        .route("/api/simulator/generate/:device_id", post(simulate_one))
        .route("/api/simulator/bulk/:device_id", post(simulate_bulk))
        .with_state(state)
}

/// Authenticated caller id.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i64>().ok())
            .map(CurrentUser)
            .ok_or_else(|| {
                error_response(StatusCode::UNAUTHORIZED, "missing or invalid caller identity", None)
            })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TelemetryQuery {
    device_id: Option<i64>,
    limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    period: Option<String>,
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}

async fn list_devices(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<Device>>, AppError> {
    Ok(Json(state.devices.list(user_id).await?))
}

async fn create_device(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    body: Bytes,
) -> Result<(StatusCode, Json<Device>), AppError> {
    let device: NewDevice = parse_body(&body)?;
    let created = state.devices.create(user_id, device).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_device(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Device>, AppError> {
    Ok(Json(state.devices.get_owned(user_id, id).await?))
}

async fn update_device(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<Json<Device>, AppError> {
    let update: DeviceUpdate = parse_body(&body)?;
    Ok(Json(state.devices.update(user_id, id, update).await?))
}

async fn delete_device(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.devices.delete(user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_device(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Device>, AppError> {
    Ok(Json(state.control.toggle(user_id, id).await?))
}

async fn read_device(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<LivePower>, AppError> {
    Ok(Json(state.control.read_live(user_id, id).await?))
}

async fn device_telemetry(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<Reading>>, AppError> {
    let readings = state
        .telemetry
        .list_for_device(user_id, id, params.limit.unwrap_or(0))
        .await?;
    Ok(Json(readings))
}

async fn device_summary(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
    Query(params): Query<SummaryQuery>,
) -> Result<Json<Summary>, AppError> {
    let period = params.period.as_deref().unwrap_or("day");
    Ok(Json(state.telemetry.summary(user_id, id, period).await?))
}

async fn device_latest(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Reading>, AppError> {
    Ok(Json(state.telemetry.latest_for_device(user_id, id).await?))
}

async fn list_telemetry(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(params): Query<TelemetryQuery>,
) -> Result<Json<Vec<Reading>>, AppError> {
    let readings = state
        .telemetry
        .list(user_id, params.device_id, params.limit.unwrap_or(0))
        .await?;
    Ok(Json(readings))
}

async fn latest_telemetry(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<Reading>>, AppError> {
    Ok(Json(state.telemetry.latest_all(user_id).await?))
}

async fn ingest_telemetry(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    body: Bytes,
) -> Result<(StatusCode, Json<Reading>), AppError> {
    let reading: NewReading = parse_body(&body)?;
    let stored = state.telemetry.ingest(user_id, reading).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn delete_telemetry(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.telemetry.delete(user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn simulate_one(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(device_id): Path<i64>,
    body: Bytes,
) -> Result<(StatusCode, Json<Reading>), AppError> {
    let config: SimulatorConfig = parse_optional_body(&body)?;
    let reading = state
        .telemetry
        .simulate_one(user_id, device_id, config)
        .await?;
    Ok((StatusCode::CREATED, Json(reading)))
}

async fn simulate_bulk(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(device_id): Path<i64>,
    body: Bytes,
) -> Result<(StatusCode, Json<BulkReport>), AppError> {
    let config: BulkConfig = parse_optional_body(&body)?;
    let report = state
        .telemetry
        .simulate_bulk(user_id, device_id, config)
        .await?;
    Ok((StatusCode::CREATED, Json(report)))
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, Error> {
    serde_json::from_slice(body).map_err(|e| {
        debug!("Rejected request body: {}", e);
        Error::Validation(format!("invalid request body: {}", e))
    })
}

/// An empty body means "all defaults".
fn parse_optional_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_body(body)
}

fn error_response(status: StatusCode, message: &str, error_id: Option<Uuid>) -> Response {
    let mut error = json!({
        "code": status.as_u16(),
        "message": message,
    });
    if let Some(error_id) = error_id {
        error["error_id"] = json!(error_id.to_string());
    }

    (status, Json(json!({ "error": error }))).into_response()
}

pub struct AppError(Error);

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.0 {
            Error::Validation(message) => error_response(StatusCode::BAD_REQUEST, &message, None),
            err @ Error::NotFound(_) => {
                error_response(StatusCode::NOT_FOUND, &err.to_string(), None)
            }
            Error::Gateway(e) => {
                let error_id = Uuid::new_v4();
                error!(error_id = ?error_id, "Device control error: {}", e);
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "device control failed",
                    Some(error_id),
                )
            }
            err => {
                let error_id = Uuid::new_v4();
                error!(error_id = ?error_id, "Internal error: {}", err);
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error",
                    Some(error_id),
                )
            }
        }
    }
}
