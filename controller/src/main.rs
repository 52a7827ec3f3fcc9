use anyhow::Context;
use plug_controller::config::{Config, StoreKind};
use plug_controller::gateway::{DeviceGateway, TasmotaGateway};
use plug_controller::metrics;
use plug_controller::rest::{self, AppState};
use plug_controller::store::{make_pool, DeviceStore, MemoryStore, PgStore, TelemetryStore};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();

    info!("Starting smart plug controller");
    info!("HTTP server: {}", config.http_addr);

    metrics::init_metrics().context("failed to register metrics")?;

    let (device_store, telemetry_store): (Arc<dyn DeviceStore>, Arc<dyn TelemetryStore>) =
        match config.store {
            StoreKind::Postgres => {
                info!("Database: {}", config.database_host());
                let pool = make_pool(
                    &config.database_url,
                    config.db_max_connections,
                    config.db_acquire_timeout,
                )
                .await
                .context("failed to connect to database")?;
                let store = Arc::new(PgStore::new(pool));
                let devices: Arc<dyn DeviceStore> = store.clone();
                let telemetry: Arc<dyn TelemetryStore> = store;
                (devices, telemetry)
            }
            StoreKind::Memory => {
                warn!("Using in-memory store, data is lost on restart");
                let store = Arc::new(MemoryStore::new());
                let devices: Arc<dyn DeviceStore> = store.clone();
                let telemetry: Arc<dyn TelemetryStore> = store;
                (devices, telemetry)
            }
        };

    let gateway: Arc<dyn DeviceGateway> = Arc::new(
        TasmotaGateway::new(config.gateway_timeout).context("failed to build gateway client")?,
    );

    let app = rest::create_router(AppState::new(device_store, telemetry_store, gateway));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.http_addr))?;

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
    Ok(())
}
