use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Standard API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorResponse>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: ErrorResponse) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Error response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

/// Signed gateway redirect URL for a payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectResponse {
    pub redirect_url: String,
}

/// Result of the overdue sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverdueSweepResponse {
    pub updated: u64,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::NoCapacity => (StatusCode::CONFLICT, "NO_CAPACITY"),
            AppError::BedTaken => (StatusCode::CONFLICT, "BED_TAKEN"),
            AppError::AlreadyRegistered => (StatusCode::CONFLICT, "ALREADY_REGISTERED"),
            AppError::DuplicateReading => (StatusCode::CONFLICT, "DUPLICATE_READING"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::InvalidTransition { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_TRANSITION")
            }
            AppError::BadSignature => (StatusCode::BAD_REQUEST, "BAD_SIGNATURE"),
            AppError::AmountMismatch { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "AMOUNT_MISMATCH")
            }
            AppError::NotRefundable(_) => (StatusCode::UNPROCESSABLE_ENTITY, "NOT_REFUNDABLE"),
            AppError::AmountExceedsOriginal { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "AMOUNT_EXCEEDS_ORIGINAL")
            }
            AppError::NegativeUsage { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "NEGATIVE_USAGE")
            }
            AppError::MissingReading { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "MISSING_READING")
            }
            AppError::NoActiveRate(_) => (StatusCode::UNPROCESSABLE_ENTITY, "NO_ACTIVE_RATE"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (
            status,
            Json(ApiResponse::<()>::error(ErrorResponse::new(code, message))),
        )
            .into_response()
    }
}
