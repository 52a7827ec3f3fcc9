pub mod config;
pub mod control;
pub mod devices;
pub mod errors;
pub mod gateway;
pub mod metrics;
pub mod model;
pub mod rest;
pub mod store;
pub mod telemetry;
pub mod validate;
