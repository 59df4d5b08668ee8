//! REST API module.
//!
//! Contains all API routes and handlers of the deletion flow. Every response
//! names the step the client should render next.

mod account;
mod session;

pub use account::*;
pub use session::*;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::{AppError, AppErrorWithStep};
use crate::flow::FlowError;
use crate::session::{FlowStep, SessionContext};
use crate::AppState;

/// Success response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    pub step: FlowStep,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T, step: FlowStep) -> Self {
        Self {
            success: true,
            data,
            step,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, AppErrorWithStep>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T, step: FlowStep) -> ApiResult<T> {
    Ok(ApiResponse::new(data, step))
}

/// Create an error API response.
pub fn error<T: Serialize>(err: AppError, step: FlowStep) -> ApiResult<T> {
    Err(AppErrorWithStep { error: err, step })
}

/// Unwrap a JSON body, reporting malformed input in the usual envelope.
fn parse_body<T>(
    payload: Result<Json<T>, JsonRejection>,
    step: FlowStep,
) -> Result<T, AppErrorWithStep> {
    payload.map(|Json(body)| body).map_err(|rejection| AppErrorWithStep {
        error: AppError::BadRequest(rejection.body_text()),
        step,
    })
}

/// Load the live session for `token`.
async fn load_session(
    state: &AppState,
    token: &str,
    now: DateTime<Utc>,
) -> Result<SessionContext, AppErrorWithStep> {
    match state.sessions.get(token, now).await {
        Ok(Some(session)) => Ok(session),
        Ok(None) => Err(AppErrorWithStep {
            error: AppError::Unauthorized(
                "Your session has ended. Please sign in again.".to_string(),
            ),
            step: FlowStep::Login,
        }),
        Err(e) => Err(AppErrorWithStep {
            error: e,
            step: FlowStep::Login,
        }),
    }
}

/// Store the session left behind by a failed flow operation and build the
/// error response for it.
async fn flow_failure(state: &AppState, session: &SessionContext, err: FlowError) -> AppErrorWithStep {
    let recovered = err.recover(session);
    if recovered != *session {
        if let Err(e) = state.sessions.save(&recovered).await {
            tracing::error!(uid = %session.user.uid, error = %e, "Failed to store recovered session");
        }
    }

    AppErrorWithStep {
        step: recovered.step,
        error: err.into(),
    }
}
