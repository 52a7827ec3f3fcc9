use crate::gateway::GatewayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    /// Absent or owned by someone else; the two are never distinguished.
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Device control failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl Error {
    pub fn device_not_found() -> Self {
        Error::NotFound("device")
    }

    pub fn reading_not_found() -> Self {
        Error::NotFound("telemetry")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
