//! Error types for the faucet service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use num_bigint::BigUint;
use serde_json::json;
use thiserror::Error;

/// Who is responsible for a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is unacceptable; retrying it unchanged will fail again.
    Caller,
    /// The faucet or the ledger failed; the request may or may not succeed later.
    System,
}

/// Faucet service errors
#[derive(Error, Debug)]
pub enum FaucetError {
    #[error("no coins requested")]
    NoCoins,

    #[error("no destination address provided")]
    NoAddress,

    #[error("address {0} is not whitelisted")]
    NotWhitelisted(String),

    #[error("denomination {0} is not supported by this faucet")]
    DenomNotSupported(String),

    #[error("requested {requested}{denom} exceeds the per-request limit of {limit}{denom}")]
    ExceedsPerRequestLimit {
        denom: String,
        requested: BigUint,
        limit: BigUint,
    },

    #[error(
        "requested {requested}{denom} on top of {transferred}{denom} already sent exceeds the per-account limit of {limit}{denom}"
    )]
    ExceedsAccountLifetimeLimit {
        denom: String,
        transferred: BigUint,
        requested: BigUint,
        limit: BigUint,
    },

    #[error("invalid coin: {0}")]
    InvalidCoin(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("ledger query failed: {0}")]
    LedgerQuery(String),

    #[error("ledger returned undecodable data: {0}")]
    LedgerDecode(String),

    #[error("transaction submission failed: {0}")]
    LedgerSubmit(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FaucetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FaucetError::NoCoins
            | FaucetError::NoAddress
            | FaucetError::NotWhitelisted(_)
            | FaucetError::DenomNotSupported(_)
            | FaucetError::ExceedsPerRequestLimit { .. }
            | FaucetError::ExceedsAccountLifetimeLimit { .. }
            | FaucetError::InvalidCoin(_)
            | FaucetError::InvalidRequest(_) => ErrorKind::Caller,
            FaucetError::LedgerQuery(_)
            | FaucetError::LedgerDecode(_)
            | FaucetError::LedgerSubmit(_)
            | FaucetError::Config(_)
            | FaucetError::Internal(_) => ErrorKind::System,
        }
    }

    pub fn is_caller_error(&self) -> bool {
        self.kind() == ErrorKind::Caller
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            FaucetError::NotWhitelisted(_) => StatusCode::FORBIDDEN,
            FaucetError::LedgerQuery(_) | FaucetError::LedgerDecode(_) => StatusCode::BAD_GATEWAY,
            err if err.is_caller_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for FaucetError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}

pub type FaucetResult<T> = Result<T, FaucetError>;
