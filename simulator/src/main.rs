use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use plug_simulator::{generate, generate_series, BulkConfig, SimulatorConfig, SyntheticReading};
use rand::rngs::StdRng;
use rand::SeedableRng;
use reqwest::Client;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "plug-simulator", about = "Feeds synthetic smart-plug telemetry to a controller")]
struct Cli {
    /// Base URL of the controller API
    #[arg(long, env = "API_URL", default_value = "http://localhost:8080")]
    api_url: String,

    /// Identity forwarded in the x-user-id header
    #[arg(long, env = "USER_ID")]
    user_id: i64,

    /// Device that receives the readings
    #[arg(long, env = "DEVICE_ID")]
    device_id: i64,

    /// Fixed seed for reproducible series
    #[arg(long, env = "SEED")]
    seed: Option<u64>,

    #[command(flatten)]
    load: LoadArgs,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Args)]
struct LoadArgs {
    #[arg(long, env = "BASE_POWER", default_value_t = 150.0)]
    base_power: f64,

    #[arg(long, env = "VARIATION", default_value_t = 0.15)]
    variation: f64,

    #[arg(long, env = "BASE_VOLTAGE", default_value_t = 220.0)]
    base_voltage: f64,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Post a historical series ending now
    Bulk {
        #[arg(long, default_value_t = 24)]
        count: i64,
        #[arg(long, default_value_t = 300)]
        interval_sec: i64,
    },
    /// Post one reading every interval until interrupted
    Stream {
        #[arg(long, default_value_t = 5)]
        interval_sec: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = SimulatorConfig {
        base_power: cli.load.base_power,
        variation: cli.load.variation,
        base_voltage: cli.load.base_voltage,
    };
    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")?;
    let endpoint = format!("{}/api/telemetry", cli.api_url.trim_end_matches('/'));

    info!("Starting plug simulator");
    info!(
        "Target: {}, device {}, base {} W ±{}",
        endpoint, cli.device_id, config.base_power, config.variation
    );

    match cli.mode {
        Mode::Bulk {
            count,
            interval_sec,
        } => {
            let bulk = BulkConfig {
                reading: config,
                count,
                interval_sec,
            };
            let series = generate_series(&mut rng, cli.device_id, &bulk, Utc::now());
            let total = series.len();
            let mut created = 0;

            for reading in &series {
                match publish(&client, &endpoint, cli.user_id, reading).await {
                    Ok(()) => created += 1,
                    Err(e) => warn!("Failed to publish reading: {:#}", e),
                }
            }

            info!("Published {}/{} readings", created, total);
            if created == 0 && total > 0 {
                bail!("no readings were accepted by {}", endpoint);
            }
        }
        Mode::Stream { interval_sec } => {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_sec.max(1)));
            let mut counter = 0u64;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let reading = generate(&mut rng, cli.device_id, &config, Utc::now());
                        match publish(&client, &endpoint, cli.user_id, &reading).await {
                            Ok(()) => {
                                counter += 1;
                                if counter % 100 == 0 {
                                    info!("Published {} readings", counter);
                                }
                            }
                            Err(e) => error!("Failed to publish reading: {:#}", e),
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received shutdown signal after {} readings", counter);
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

async fn publish(
    client: &Client,
    endpoint: &str,
    user_id: i64,
    reading: &SyntheticReading,
) -> anyhow::Result<()> {
    let response = client
        .post(endpoint)
        .header("x-user-id", user_id.to_string())
        .json(reading)
        .send()
        .await
        .context("request failed")?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("controller answered {}: {}", status, body);
    }

    Ok(())
}
