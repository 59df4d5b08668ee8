//! Session token extraction.
//!
//! Clients send the token issued at login either as a bearer token or in the
//! `x-session-token` header.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};

use crate::errors::{AppError, AppErrorWithStep};
use crate::session::FlowStep;

/// Header name for the session token.
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

/// Session token presented by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken(pub String);

impl<S> FromRequestParts<S> for SessionToken
where
    S: Send + Sync,
{
    type Rejection = AppErrorWithStep;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        token_from_headers(&parts.headers)
            .map(SessionToken)
            .ok_or_else(|| AppErrorWithStep {
                error: AppError::Unauthorized("Please sign in first.".to_string()),
                step: FlowStep::Login,
            })
    }
}

/// Read the session token from the request headers.
fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let explicit = headers
        .get(SESSION_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let bearer = || {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    explicit.or_else(bearer).map(str::to_string)
}
