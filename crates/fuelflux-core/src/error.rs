use sqlx::migrate::MigrateError;
use thiserror::Error;

use crate::types::FuelType;

/// Failure talking to the destination store. Aborts the current stage.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] MigrateError),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stored row could not be decoded: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Row-level rejection. Counted against the stage, never returned as `Err`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid applicable date '{0}'")]
    InvalidDate(String),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("{fuel} entry is not an object")]
    MalformedFuel { fuel: FuelType },

    #[error("{fuel} has no retail price")]
    MissingPrice { fuel: FuelType },

    #[error("{fuel} retail price '{value}' is not numeric")]
    InvalidPrice { fuel: FuelType, value: String },

    #[error("{fuel} {field} '{value}' is outside the storable price range")]
    PriceOutOfRange {
        fuel: FuelType,
        field: &'static str,
        value: String,
    },

    #[error("field '{field}' is longer than {max} characters")]
    FieldTooLong { field: &'static str, max: usize },
}

/// Error surfaced by a stage to its caller; the ledger entry is already
/// closed as `failed` by the time this is returned.
#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("a {days}-day trend window ending {end} is not representable")]
    InvalidWindow { end: chrono::NaiveDate, days: u32 },
}

pub type Result<T> = std::result::Result<T, StageError>;
