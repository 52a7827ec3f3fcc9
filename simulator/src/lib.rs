//! Synthetic smart-plug telemetry for seeding and demos.

pub mod telemetry;

pub use telemetry::{generate, generate_series, BulkConfig, SimulatorConfig, SyntheticReading};
