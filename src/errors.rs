//! Error types for the dicepay reconciliation pipeline.
//!
//! Nothing here is process-fatal: every failure is returned as a structured
//! value and the caller (the chat-transport layer) decides what the user
//! sees. No call into the payment processor is retried; the withdrawal
//! compensation path is the only recovery mechanism.

use crate::games::types::{BetChoice, GameType};
use crate::intent::MissingField;
use crate::transactions::TransactionStatus;
use rust_decimal::Decimal;
use thiserror::Error;

/// Root error type for all dicepay operations
#[derive(Debug, Error)]
pub enum DicepayError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("payment processor error: {0}")]
    ExternalApi(#[from] ExternalApiError),
}

/// Missing or malformed credentials and settings. Fatal to the specific
/// operation, never to the process.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("missing required field: {0}")]
    MissingRequired(String),

    #[error("invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("failed to save configuration: {0}")]
    SaveFailed(String),
}

/// Rejected input. No state is mutated when one of these is returned.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("payment intent incomplete, missing: {}", format_missing(.missing))]
    MalformedIntent { missing: Vec<MissingField> },

    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },

    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("requested amount {amount} does not cover the {fee} transfer fee")]
    AmountBelowFee { amount: Decimal, fee: Decimal },

    #[error("invalid destination wallet address: {0}")]
    InvalidDestination(String),

    #[error("bet choice '{choice}' is not valid for game '{game}'")]
    ChoiceMismatch { game: GameType, choice: BetChoice },

    #[error("unknown transaction: {0}")]
    UnknownTransaction(String),

    #[error("transaction {id} is {status:?}, expected pending")]
    TransactionNotPending {
        id: String,
        status: TransactionStatus,
    },
}

fn format_missing(missing: &[MissingField]) -> String {
    missing
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Network-level failure talking to the payment processor. Where funds were
/// pre-debited this triggers compensation; otherwise it is just reported.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to payment processor failed: {0}")]
    Request(String),

    #[error("request to payment processor timed out")]
    Timeout,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Structured rejection returned by the processor itself
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ExternalApiError {
    pub code: Option<i64>,
    pub message: String,
}

/// Convenience alias used throughout the crate
pub type DicepayResult<T> = Result<T, DicepayError>;
