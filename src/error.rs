use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Application-wide error type.
///
/// Capacity conflicts (`NoCapacity`, `BedTaken`) are expected under
/// contention and retryable by choosing another slot. Integrity errors
/// (`BadSignature`, `AmountMismatch`) are always rejected and never
/// partially applied. Transition errors are precondition failures and are
/// not retried. Data errors (`NegativeUsage`, `MissingReading`,
/// `NoActiveRate`) require manual correction.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("room has no remaining capacity")]
    NoCapacity,

    #[error("bed is already occupied")]
    BedTaken,

    #[error("{0} not found")]
    NotFound(String),

    #[error("illegal {entity} transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("callback signature verification failed")]
    BadSignature,

    #[error("amount mismatch: expected {expected}, received {received}")]
    AmountMismatch {
        expected: Decimal,
        received: Decimal,
    },

    #[error("payment in status {0} is not refundable")]
    NotRefundable(String),

    #[error("refund amount {requested} exceeds original amount {original}")]
    AmountExceedsOriginal {
        requested: Decimal,
        original: Decimal,
    },

    #[error("negative {meter} usage: previous {previous}, current {current}")]
    NegativeUsage {
        meter: &'static str,
        previous: Decimal,
        current: Decimal,
    },

    #[error("missing meter reading for period {month}/{year}")]
    MissingReading { month: u32, year: i32 },

    #[error("no utility rate effective at {0}")]
    NoActiveRate(DateTime<Utc>),

    #[error("a meter reading for this room and period already exists")]
    DuplicateReading,

    #[error("student already holds an active registration for this semester")]
    AlreadyRegistered,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("configuration error")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// True for the capacity conflicts that a caller may retry with a
    /// different slot.
    pub fn is_capacity_conflict(&self) -> bool {
        matches!(self, AppError::NoCapacity | AppError::BedTaken)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
