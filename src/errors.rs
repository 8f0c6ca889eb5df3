//! Error types for the crash round engine
//!
//! Request-path failures (bets, cashouts, price lookups) are reported to the
//! caller and never stop the round loop. Storage failures raised during
//! settlement are logged by the lifecycle manager and swallowed.

use crate::games::types::Currency;

/// Failures surfaced by the bet/cashout coordinator and the price cache
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("Game round has not started yet")]
    RoundNotStarted,

    #[error("Unsupported cryptocurrency: {0}")]
    UnsupportedCurrency(String),

    #[error("Price not yet available for {0}")]
    PriceUnavailable(Currency),

    #[error("Insufficient funds: need {required} {currency}, have {available}")]
    InsufficientFunds {
        currency: Currency,
        required: f64,
        available: f64,
    },

    #[error("Player {0} already has a bet in this round")]
    DuplicateBet(String),

    #[error("Player did not bet this round or already cashed out")]
    NoActiveBet,

    #[error("Cannot cash out after crash")]
    AlreadyCrashed,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[from] StorageError),
}

impl GameError {
    /// Stable machine-readable code used in API error bodies and metrics labels
    pub fn code(&self) -> &'static str {
        match self {
            GameError::RoundNotStarted => "ROUND_NOT_STARTED",
            GameError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            GameError::PriceUnavailable(_) => "PRICE_UNAVAILABLE",
            GameError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            GameError::DuplicateBet(_) => "DUPLICATE_BET",
            GameError::NoActiveBet => "NO_ACTIVE_BET",
            GameError::AlreadyCrashed => "ALREADY_CRASHED",
            GameError::InvalidRequest(_) => "INVALID_REQUEST",
            GameError::PersistenceFailure(_) => "PERSISTENCE_FAILURE",
        }
    }

    /// True for failures caused by the request itself rather than the server
    pub fn is_client_error(&self) -> bool {
        !matches!(self, GameError::PersistenceFailure(_))
    }
}

/// Storage system errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database open failed: {0}")]
    DatabaseOpenFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    #[error("Round {0} has no durable record")]
    RoundNotFound(u64),
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::WriteFailed(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::CorruptedData(e.to_string())
    }
}

/// Configuration and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),
}

pub type GameResult<T> = Result<T, GameError>;
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GameError::InsufficientFunds {
            currency: Currency::Btc,
            required: 0.5,
            available: 0.25,
        };

        assert!(err.to_string().contains("need 0.5 BTC"));
        assert!(err.to_string().contains("have 0.25"));
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: GameError = StorageError::WriteFailed("disk full".to_string()).into();

        assert_eq!(err.code(), "PERSISTENCE_FAILURE");
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_validation_errors_are_client_errors() {
        assert!(GameError::RoundNotStarted.is_client_error());
        assert!(GameError::AlreadyCrashed.is_client_error());
        assert!(GameError::UnsupportedCurrency("DOGE".to_string()).is_client_error());
    }
}
