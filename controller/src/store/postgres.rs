use super::{clamp_limit, DeviceStore, TelemetryStore};
use crate::errors::{Error, Result};
use crate::metrics::DB_FAILURES_TOTAL;
use crate::model::{Device, DeviceStatus, DeviceUpdate, NewDevice, NewReading, Reading, WindowAggregate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

const DEVICE_COLUMNS: &str =
    "id, user_id, name, room, device_type, status, power_state, metadata, created_at, last_seen";

const READING_COLUMNS: &str =
    "t.id, t.device_id, t.power, t.voltage, t.current, t.ts AS \"timestamp\"";

pub async fn make_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

#[derive(Debug, sqlx::FromRow)]
struct DeviceRow {
    id: i64,
    user_id: i64,
    name: String,
    room: Option<String>,
    device_type: Option<String>,
    status: Option<String>,
    power_state: Option<bool>,
    metadata: Option<String>,
    created_at: DateTime<Utc>,
    last_seen: Option<DateTime<Utc>>,
}

impl From<DeviceRow> for Device {
    fn from(row: DeviceRow) -> Self {
        Device {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            room: row.room,
            device_type: row.device_type,
            status: row.status.as_deref().and_then(DeviceStatus::from_label),
            power_state: row.power_state,
            metadata: row.metadata,
            created_at: row.created_at,
            last_seen: row.last_seen,
        }
    }
}

/// PostgreSQL adapter for both stores.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Counts store failures on their way out.
fn observed<T>(result: std::result::Result<T, sqlx::Error>) -> Result<T> {
    result.map_err(|e| {
        DB_FAILURES_TOTAL.inc();
        Error::Database(e)
    })
}

#[async_trait]
impl DeviceStore for PgStore {
    async fn create(&self, user_id: i64, device: &NewDevice) -> Result<i64> {
        let id: i64 = observed(
            sqlx::query_scalar(
                "INSERT INTO device (user_id, name, room, device_type, metadata)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING id",
            )
            .bind(user_id)
            .bind(&device.name)
            .bind(&device.room)
            .bind(&device.device_type)
            .bind(&device.metadata)
            .fetch_one(&self.pool)
            .await,
        )?;

        debug!("Created device {} for user {}", id, user_id);
        Ok(id)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Device>> {
        let query = format!("SELECT {} FROM device WHERE id = $1", DEVICE_COLUMNS);
        let row: Option<DeviceRow> = observed(
            sqlx::query_as(&query)
                .bind(id)
                .fetch_optional(&self.pool)
                .await,
        )?;

        Ok(row.map(Device::from))
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Device>> {
        let query = format!(
            "SELECT {} FROM device WHERE user_id = $1 ORDER BY created_at DESC, id DESC",
            DEVICE_COLUMNS
        );
        let rows: Vec<DeviceRow> = observed(
            sqlx::query_as(&query)
                .bind(user_id)
                .fetch_all(&self.pool)
                .await,
        )?;

        Ok(rows.into_iter().map(Device::from).collect())
    }

    async fn update(&self, user_id: i64, id: i64, update: &DeviceUpdate) -> Result<bool> {
        let result = observed(
            sqlx::query(
                "UPDATE device SET
                    name = COALESCE($3, name),
                    room = COALESCE($4, room),
                    device_type = COALESCE($5, device_type),
                    status = COALESCE($6, status),
                    power_state = COALESCE($7, power_state),
                    metadata = COALESCE($8, metadata)
                 WHERE id = $1 AND user_id = $2",
            )
            .bind(id)
            .bind(user_id)
            .bind(&update.name)
            .bind(&update.room)
            .bind(&update.device_type)
            .bind(update.status.map(DeviceStatus::as_str))
            .bind(update.power_state)
            .bind(&update.metadata)
            .execute(&self.pool)
            .await,
        )?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_status(&self, id: i64, status: DeviceStatus) -> Result<()> {
        observed(
            sqlx::query("UPDATE device SET status = $2 WHERE id = $1")
                .bind(id)
                .bind(status.as_str())
                .execute(&self.pool)
                .await,
        )?;

        Ok(())
    }

    async fn update_power_state(&self, id: i64, on: bool) -> Result<()> {
        observed(
            sqlx::query("UPDATE device SET power_state = $2 WHERE id = $1")
                .bind(id)
                .bind(on)
                .execute(&self.pool)
                .await,
        )?;

        Ok(())
    }

    async fn set_confirmed_power(&self, id: i64, on: bool) -> Result<()> {
        // Single statement: both columns land or neither does
        observed(
            sqlx::query("UPDATE device SET power_state = $2, status = $3 WHERE id = $1")
                .bind(id)
                .bind(on)
                .bind(DeviceStatus::Online.as_str())
                .execute(&self.pool)
                .await,
        )?;

        Ok(())
    }

    async fn delete(&self, user_id: i64, id: i64) -> Result<bool> {
        // Telemetry goes with it through ON DELETE CASCADE
        let result = observed(
            sqlx::query("DELETE FROM device WHERE id = $1 AND user_id = $2")
                .bind(id)
                .bind(user_id)
                .execute(&self.pool)
                .await,
        )?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TelemetryStore for PgStore {
    async fn create(&self, reading: &NewReading) -> Result<i64> {
        let ts = reading.timestamp.unwrap_or_else(Utc::now);
        let id: i64 = observed(
            sqlx::query_scalar(
                "INSERT INTO telemetry (device_id, power, voltage, current, ts)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING id",
            )
            .bind(reading.device_id)
            .bind(reading.power)
            .bind(reading.voltage)
            .bind(reading.current)
            .bind(ts)
            .fetch_one(&self.pool)
            .await,
        )?;

        Ok(id)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Reading>> {
        let query = format!("SELECT {} FROM telemetry t WHERE t.id = $1", READING_COLUMNS);
        observed(
            sqlx::query_as(&query)
                .bind(id)
                .fetch_optional(&self.pool)
                .await,
        )
    }

    async fn list_by_device(&self, device_id: i64, limit: i64) -> Result<Vec<Reading>> {
        let query = format!(
            "SELECT {} FROM telemetry t
             WHERE t.device_id = $1
             ORDER BY t.ts DESC, t.id DESC
             LIMIT $2",
            READING_COLUMNS
        );
        observed(
            sqlx::query_as(&query)
                .bind(device_id)
                .bind(clamp_limit(limit))
                .fetch_all(&self.pool)
                .await,
        )
    }

    async fn list_by_user(&self, user_id: i64, limit: i64) -> Result<Vec<Reading>> {
        let query = format!(
            "SELECT {} FROM telemetry t
             JOIN device d ON t.device_id = d.id
             WHERE d.user_id = $1
             ORDER BY t.ts DESC, t.id DESC
             LIMIT $2",
            READING_COLUMNS
        );
        observed(
            sqlx::query_as(&query)
                .bind(user_id)
                .bind(clamp_limit(limit))
                .fetch_all(&self.pool)
                .await,
        )
    }

    async fn list_by_device_for_user(
        &self,
        user_id: i64,
        device_id: i64,
        limit: i64,
    ) -> Result<Vec<Reading>> {
        let query = format!(
            "SELECT {} FROM telemetry t
             JOIN device d ON t.device_id = d.id
             WHERE t.device_id = $1 AND d.user_id = $2
             ORDER BY t.ts DESC, t.id DESC
             LIMIT $3",
            READING_COLUMNS
        );
        observed(
            sqlx::query_as(&query)
                .bind(device_id)
                .bind(user_id)
                .bind(clamp_limit(limit))
                .fetch_all(&self.pool)
                .await,
        )
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = observed(
            sqlx::query("DELETE FROM telemetry WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await,
        )?;

        Ok(result.rows_affected() > 0)
    }

    async fn user_owns_device(&self, user_id: i64, device_id: i64) -> Result<bool> {
        observed(
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM device WHERE id = $1 AND user_id = $2)")
                .bind(device_id)
                .bind(user_id)
                .fetch_one(&self.pool)
                .await,
        )
    }

    async fn latest_by_device(&self, device_id: i64) -> Result<Option<Reading>> {
        let query = format!(
            "SELECT {} FROM telemetry t
             WHERE t.device_id = $1
             ORDER BY t.ts DESC, t.id DESC
             LIMIT 1",
            READING_COLUMNS
        );
        observed(
            sqlx::query_as(&query)
                .bind(device_id)
                .fetch_optional(&self.pool)
                .await,
        )
    }

    async fn latest_by_user_devices(&self, user_id: i64) -> Result<Vec<Reading>> {
        let query = format!(
            "SELECT * FROM (
                SELECT DISTINCT ON (t.device_id) {}
                FROM telemetry t
                JOIN device d ON t.device_id = d.id
                WHERE d.user_id = $1
                ORDER BY t.device_id, t.ts DESC, t.id DESC
             ) latest
             ORDER BY latest.\"timestamp\" DESC, latest.id DESC",
            READING_COLUMNS
        );
        observed(
            sqlx::query_as(&query)
                .bind(user_id)
                .fetch_all(&self.pool)
                .await,
        )
    }

    async fn touch_device(&self, device_id: i64) -> Result<()> {
        observed(
            sqlx::query("UPDATE device SET status = $2, last_seen = NOW() WHERE id = $1")
                .bind(device_id)
                .bind(DeviceStatus::Online.as_str())
                .execute(&self.pool)
                .await,
        )?;

        Ok(())
    }

    async fn aggregate_window(
        &self,
        user_id: i64,
        device_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WindowAggregate> {
        observed(
            sqlx::query_as(
                "SELECT
                    COUNT(t.id) AS total_records,
                    COALESCE(AVG(t.power), 0)::float8 AS avg_power,
                    COALESCE(MAX(t.power), 0)::float8 AS max_power,
                    COALESCE(MIN(t.power), 0)::float8 AS min_power,
                    COALESCE(AVG(t.voltage), 0)::float8 AS avg_voltage,
                    COALESCE(AVG(t.current), 0)::float8 AS avg_current,
                    MIN(t.ts) AS earliest,
                    MAX(t.ts) AS latest
                 FROM telemetry t
                 JOIN device d ON t.device_id = d.id
                 WHERE t.device_id = $1
                   AND d.user_id = $2
                   AND t.ts >= $3
                   AND t.ts <= $4",
            )
            .bind(device_id)
            .bind(user_id)
            .bind(start)
            .bind(end)
            .fetch_one(&self.pool)
            .await,
        )
    }
}
