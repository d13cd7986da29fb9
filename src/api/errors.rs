//! API Error Handling
//!
//! Structured error responses with HTTP status codes and request tracking.

use crate::errors::{InfraError, SettleError, UserError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level API error response with request tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code (INSUFFICIENT_BALANCE, INTERNAL_ERROR, ...)
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// A core error tagged with the request it failed
#[derive(Debug)]
pub struct ApiError {
    pub error: SettleError,
    pub request_id: String,
}

impl ApiError {
    pub fn new(request_id: impl Into<String>, error: impl Into<SettleError>) -> Self {
        Self {
            error: error.into(),
            request_id: request_id.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match &self.error {
            SettleError::User(UserError::InvalidProof(_)) => StatusCode::UNAUTHORIZED,
            SettleError::User(UserError::PayoutUnavailable { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            SettleError::User(UserError::WithdrawThresholdUnmet { .. })
            | SettleError::User(UserError::NothingToWithdraw)
            | SettleError::User(UserError::InsufficientBalance { .. }) => StatusCode::CONFLICT,
            SettleError::User(_) => StatusCode::BAD_REQUEST,
            SettleError::Infra(InfraError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
            SettleError::Infra(InfraError::Timeout { .. })
            | SettleError::Infra(InfraError::Unconfirmed { .. }) => StatusCode::GATEWAY_TIMEOUT,
            SettleError::Infra(_) => StatusCode::BAD_GATEWAY,
            SettleError::Consistency(_) | SettleError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match &self.error {
            SettleError::User(e) => match e {
                UserError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
                UserError::WagerBelowMinimum { .. } => "WAGER_BELOW_MINIMUM",
                UserError::NothingToWithdraw => "NOTHING_TO_WITHDRAW",
                UserError::WithdrawThresholdUnmet { .. } => "WITHDRAW_THRESHOLD_UNMET",
                UserError::PayoutUnavailable { .. } => "PAYOUT_UNAVAILABLE",
                UserError::InvalidProof(_) => "INVALID_PROOF",
                UserError::InvalidHex { .. } => "INVALID_HEX",
                UserError::InvalidOutcome(_) => "INVALID_OUTCOME",
                UserError::UnsupportedChain(_) => "UNSUPPORTED_CHAIN",
            },
            SettleError::Infra(InfraError::ShuttingDown) => "SERVICE_UNAVAILABLE",
            SettleError::Infra(InfraError::Unconfirmed { .. }) => "OUTCOME_UNCONFIRMED",
            _ => "INTERNAL_ERROR",
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match &self.error {
            SettleError::User(UserError::WithdrawThresholdUnmet { required, current }) => {
                Some(serde_json::json!({ "required_plays": required, "current_plays": current }))
            }
            SettleError::User(UserError::InsufficientBalance { requested, available }) => Some(
                serde_json::json!({ "requested": requested.to_string(), "available": available.to_string() }),
            ),
            _ => None,
        }
    }

    pub fn to_body(&self) -> ErrorResponse {
        ErrorResponse {
            request_id: self.request_id.clone(),
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.error.public_message(),
                details: self.details(),
            },
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.request_id, self.error)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_body())).into_response()
    }
}
