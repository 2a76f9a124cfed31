use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

/// Why a redemption was denied. Logged, never shown to the client.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RedeemError {
    #[error("Token missing from query")]
    TokenMissing,

    #[error("Token not found")]
    TokenNotFound,

    #[error("Token already consumed")]
    TokenAlreadyConsumed,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Consume refused for a pending token")]
    ConsumeRefused,

    #[error("Entry store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Entry store configuration unavailable: {0}")]
    ConfigUnavailable(String),
}

impl RedeemError {
    /// Every cause maps to the same status so callers cannot probe token state
    pub fn to_err_code(&self) -> StatusCode {
        match self {
            RedeemError::TokenMissing
            | RedeemError::TokenNotFound
            | RedeemError::TokenAlreadyConsumed
            | RedeemError::TokenExpired
            | RedeemError::ConsumeRefused
            | RedeemError::StoreUnavailable(_)
            | RedeemError::ConfigUnavailable(_) => StatusCode::FORBIDDEN,
        }
    }

    /// Short label for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            RedeemError::TokenMissing => "token_missing",
            RedeemError::TokenNotFound => "token_not_found",
            RedeemError::TokenAlreadyConsumed => "token_already_consumed",
            RedeemError::TokenExpired => "token_expired",
            RedeemError::ConsumeRefused => "consume_refused",
            RedeemError::StoreUnavailable(_) => "store_unavailable",
            RedeemError::ConfigUnavailable(_) => "config_unavailable",
        }
    }
}

/// The one denial response every failed redemption gets
pub fn deny_response() -> Response {
    let status = StatusCode::FORBIDDEN;
    let body = json!({
        "error": "Forbidden",
        "status": status.as_u16()
    });

    (status, [(header::CACHE_CONTROL, "no-store")], Json(body)).into_response()
}
