use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref READINGS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "plug_readings_total",
        "Total telemetry readings stored"
    ))
    .unwrap();
    pub static ref INVALID_READINGS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "plug_invalid_readings_total",
        "Total telemetry readings rejected by validation"
    ))
    .unwrap();
    pub static ref GATEWAY_TOGGLES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "plug_gateway_toggles_total",
        "Toggles confirmed by the physical device"
    ))
    .unwrap();
    pub static ref STATUS_TOGGLES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "plug_status_toggles_total",
        "Toggles handled as a status flip on devices without a control channel"
    ))
    .unwrap();
    pub static ref GATEWAY_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "plug_gateway_failures_total",
        "Device control calls that failed"
    ))
    .unwrap();
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "plug_db_failures_total",
        "Total database statement failures"
    ))
    .unwrap();
    pub static ref GATEWAY_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "plug_gateway_latency_seconds",
            "Round trip time of device control calls"
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0])
    )
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(READINGS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INVALID_READINGS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(GATEWAY_TOGGLES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STATUS_TOGGLES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(GATEWAY_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DB_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(GATEWAY_LATENCY_SECONDS.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_after_init() {
        // Registration is process-wide; a second init in the same binary must not matter
        let _ = init_metrics();
        READINGS_TOTAL.inc();

        let text = gather_metrics();
        assert!(text.contains("plug_readings_total"));
        assert!(text.contains("plug_gateway_latency_seconds"));
    }
}
