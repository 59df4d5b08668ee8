//! Error handling module for the account eraser.
//!
//! Provides centralized error types with mapping to HTTP status codes and
//! response envelopes. Every error response tells the client which step of
//! the flow to show next.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::backend::IdentityErrorCode;
use crate::flow::FlowError;
use crate::session::FlowStep;

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const IDENTITY_ERROR: &str = "IDENTITY_ERROR";
    pub const REAUTH_REQUIRED: &str = "REAUTH_REQUIRED";
    pub const STEP_OUT_OF_ORDER: &str = "STEP_OUT_OF_ORDER";
    pub const DELETION_FAILED: &str = "DELETION_FAILED";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    /// Missing, unknown or expired session
    Unauthorized(String),
    /// Input rejected before any platform call
    Validation { field: &'static str, message: String },
    /// Identity platform rejected the call
    Identity(IdentityErrorCode),
    /// Re-authentication is missing, expired or reported stale
    ReauthRequired(String),
    /// Request does not match the current step
    OutOfOrder(String),
    /// The cascade aborted; the account is intact and the attempt can be
    /// retried
    DeletionFailed(String),
    /// Database error
    Database(String),
    /// Internal server error
    Internal(String),
    /// Bad request
    BadRequest(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Identity(code) => identity_status(code),
            AppError::ReauthRequired(_) => StatusCode::FORBIDDEN,
            AppError::OutOfOrder(_) => StatusCode::CONFLICT,
            AppError::DeletionFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => codes::UNAUTHORIZED,
            AppError::Validation { .. } => codes::VALIDATION_ERROR,
            AppError::Identity(IdentityErrorCode::RequiresRecentLogin) => codes::REAUTH_REQUIRED,
            AppError::Identity(_) => codes::IDENTITY_ERROR,
            AppError::ReauthRequired(_) => codes::REAUTH_REQUIRED,
            AppError::OutOfOrder(_) => codes::STEP_OUT_OF_ORDER,
            AppError::DeletionFailed(_) => codes::DELETION_FAILED,
            AppError::Database(_) => codes::DATABASE_ERROR,
            AppError::Internal(_) => codes::INTERNAL_ERROR,
            AppError::BadRequest(_) => codes::BAD_REQUEST,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            AppError::Unauthorized(msg) => msg.clone(),
            AppError::Validation { message, .. } => message.clone(),
            AppError::Identity(code) => code.user_message().to_string(),
            AppError::ReauthRequired(msg) => msg.clone(),
            AppError::OutOfOrder(msg) => msg.clone(),
            AppError::DeletionFailed(msg) => msg.clone(),
            AppError::Database(msg) => msg.clone(),
            AppError::Internal(msg) => msg.clone(),
            AppError::BadRequest(msg) => msg.clone(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Validation { field, .. } => Some(serde_json::json!({ "field": field })),
            AppError::Identity(code) => Some(serde_json::json!({ "identityCode": code.as_str() })),
            _ => None,
        }
    }
}

fn identity_status(code: &IdentityErrorCode) -> StatusCode {
    match code {
        IdentityErrorCode::InvalidEmail => StatusCode::BAD_REQUEST,
        IdentityErrorCode::UserDisabled => StatusCode::FORBIDDEN,
        IdentityErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
        IdentityErrorCode::NetworkRequestFailed => StatusCode::BAD_GATEWAY,
        IdentityErrorCode::RequiresRecentLogin => StatusCode::FORBIDDEN,
        IdentityErrorCode::Unknown(_) => StatusCode::BAD_GATEWAY,
        IdentityErrorCode::UserNotFound
        | IdentityErrorCode::WrongPassword
        | IdentityErrorCode::UserMismatch => StatusCode::UNAUTHORIZED,
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        AppError::Database(format!("Database error: {}", err))
    }
}

impl From<FlowError> for AppError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::InvalidEmail(e) => AppError::Validation {
                field: "email",
                message: e.to_string(),
            },
            FlowError::InvalidPassword(e) => AppError::Validation {
                field: "password",
                message: e.to_string(),
            },
            FlowError::Confirmation(e) => AppError::Validation {
                field: e.field(),
                message: e.to_string(),
            },
            FlowError::Identity(code) => AppError::Identity(code),
            FlowError::ReauthRequired(_) => AppError::ReauthRequired(
                "Please confirm your password again to continue.".to_string(),
            ),
            FlowError::OutOfOrder { current } => AppError::OutOfOrder(format!(
                "This action is not available at the {} step.",
                current.as_str()
            )),
            FlowError::FinalConfirmationMissing => AppError::Validation {
                field: "finalConfirmation",
                message: "Please confirm the deletion in the final dialog.".to_string(),
            },
            FlowError::Cascade(e) => {
                tracing::error!(error = %e, "Account deletion aborted");
                AppError::DeletionFailed(
                    "Your account could not be deleted. Your login is still active; please try again."
                        .to_string(),
                )
            }
        }
    }
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
    pub step: FlowStep,
}

impl ErrorResponse {
    pub fn new(error: &AppError, step: FlowStep) -> Self {
        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.message(),
                details: error.details(),
            },
            step,
        }
    }
}

/// Wrapper type for errors that carry the step the client should show.
#[derive(Debug)]
pub struct AppErrorWithStep {
    pub error: AppError,
    pub step: FlowStep,
}

impl IntoResponse for AppErrorWithStep {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let body = ErrorResponse::new(&self.error, self.step);
        (status, Json(body)).into_response()
    }
}
