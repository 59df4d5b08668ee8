//! Errors reported by the platform facades.

use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Identity error codes, normalised across platform clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityErrorCode {
    UserNotFound,
    WrongPassword,
    InvalidEmail,
    UserDisabled,
    TooManyRequests,
    NetworkRequestFailed,
    RequiresRecentLogin,
    UserMismatch,
    /// Any code the client does not know, kept verbatim for logs.
    Unknown(String),
}

impl IdentityErrorCode {
    /// Stable wire code.
    pub fn as_str(&self) -> &str {
        match self {
            IdentityErrorCode::UserNotFound => "user-not-found",
            IdentityErrorCode::WrongPassword => "wrong-password",
            IdentityErrorCode::InvalidEmail => "invalid-email",
            IdentityErrorCode::UserDisabled => "user-disabled",
            IdentityErrorCode::TooManyRequests => "too-many-requests",
            IdentityErrorCode::NetworkRequestFailed => "network-request-failed",
            IdentityErrorCode::RequiresRecentLogin => "requires-recent-login",
            IdentityErrorCode::UserMismatch => "user-mismatch",
            IdentityErrorCode::Unknown(_) => "unknown",
        }
    }

    /// Parse a wire code produced by `as_str`.
    pub fn from_wire(code: &str) -> Self {
        match code {
            "user-not-found" => IdentityErrorCode::UserNotFound,
            "wrong-password" => IdentityErrorCode::WrongPassword,
            "invalid-email" => IdentityErrorCode::InvalidEmail,
            "user-disabled" => IdentityErrorCode::UserDisabled,
            "too-many-requests" => IdentityErrorCode::TooManyRequests,
            "network-request-failed" => IdentityErrorCode::NetworkRequestFailed,
            "requires-recent-login" => IdentityErrorCode::RequiresRecentLogin,
            "user-mismatch" => IdentityErrorCode::UserMismatch,
            other => IdentityErrorCode::Unknown(other.to_string()),
        }
    }

    /// Message shown to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            IdentityErrorCode::UserNotFound => "No account was found for this email address.",
            IdentityErrorCode::WrongPassword => "The password is incorrect. Please try again.",
            IdentityErrorCode::InvalidEmail => "The email address is not valid.",
            IdentityErrorCode::UserDisabled => "This account has been disabled.",
            IdentityErrorCode::TooManyRequests => {
                "Too many attempts. Please wait a moment and try again."
            }
            IdentityErrorCode::NetworkRequestFailed => {
                "Network error. Please check your connection and try again."
            }
            IdentityErrorCode::RequiresRecentLogin => {
                "For your security, please confirm your password again."
            }
            IdentityErrorCode::UserMismatch => {
                "These credentials belong to a different account."
            }
            IdentityErrorCode::Unknown(_) => "Something went wrong. Please try again.",
        }
    }
}

impl std::fmt::Display for IdentityErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityErrorCode::Unknown(raw) => write!(f, "unknown ({})", raw),
            other => f.write_str(other.as_str()),
        }
    }
}

impl<'de> Deserialize<'de> for IdentityErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(IdentityErrorCode::from_wire(&code))
    }
}

/// Failure of a facade call.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The identity service rejected the call.
    #[error("identity error: {0}")]
    Identity(IdentityErrorCode),

    /// The caller is not allowed to access the resource.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The platform could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The platform answered with something the client did not expect.
    #[error("unexpected response ({status}): {message}")]
    Unexpected { status: u16, message: String },
}

impl BackendError {
    /// Identity code carried by the error, treating transport failures as
    /// network failures.
    pub fn identity_code(&self) -> IdentityErrorCode {
        match self {
            BackendError::Identity(code) => code.clone(),
            BackendError::Transport(_) => IdentityErrorCode::NetworkRequestFailed,
            BackendError::NotFound(_) => IdentityErrorCode::UserNotFound,
            BackendError::PermissionDenied(message)
            | BackendError::Unexpected { message, .. } => {
                IdentityErrorCode::Unknown(message.clone())
            }
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Transport(err.to_string())
    }
}
