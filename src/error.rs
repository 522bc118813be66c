use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::Chain;

/// Domain and infrastructure errors.
///
/// The first five variants carry the semantics the rest of the engine keys
/// on: UnknownChain aborts plan creation, InsufficientBalance is a soft skip
/// at the tick boundary, ExternalChain marks an attempt Failed for later
/// recovery, InsufficientData collapses to a neutral analysis, and
/// PlanNotFound is terminal during recovery.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no plugin registered for chain {0}")]
    UnknownChain(Chain),

    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    #[error("chain call failed: {0}")]
    ExternalChain(String),

    #[error("insufficient price history: got {got} samples, need {need}")]
    InsufficientData { got: usize, need: usize },

    #[error("plan {0} not found")]
    PlanNotFound(Uuid),

    #[error("user {0} not found")]
    UserNotFound(Uuid),

    #[error("price feed error: {0}")]
    PriceFeed(String),

    #[error("invalid {field}: {value:?}")]
    InvalidField {
        field: &'static str,
        value: String,
    },

    #[error("cache connection timed out")]
    CacheTimeout,

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Cache(#[from] redis::RedisError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
