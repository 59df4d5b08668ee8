//! Session API endpoints: login, re-authentication, state and logout.

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use chrono::Utc;

use super::{error, flow_failure, load_session, parse_body, success, ApiResult};
use crate::auth::SessionToken;
use crate::models::{LoginRequest, LoginResponse, ReauthRequest, SessionView};
use crate::session::FlowStep;
use crate::AppState;

/// POST /api/session/login - Sign in with email and password.
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<LoginResponse> {
    let request = parse_body(payload, FlowStep::Login)?;
    let now = Utc::now();

    let session = match state.flow.login(&request.email, &request.password, now).await {
        Ok(session) => session,
        Err(e) => return error(e.into(), FlowStep::Login),
    };

    match state.sessions.purge_expired(now).await {
        Ok(0) => {}
        Ok(purged) => tracing::debug!(purged, "Purged expired sessions"),
        Err(e) => tracing::warn!(error = %e, "Failed to purge expired sessions"),
    }

    if let Err(e) = state.sessions.save(&session).await {
        return error(e, FlowStep::Login);
    }

    let window = state.flow.settings().reauth_window;
    success(
        LoginResponse {
            token: session.token.clone(),
            session: SessionView::at(&session, now, window),
        },
        session.step,
    )
}

/// POST /api/session/reauth - Re-enter the password before deleting.
pub async fn reauth(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    payload: Result<Json<ReauthRequest>, JsonRejection>,
) -> ApiResult<SessionView> {
    let now = Utc::now();
    let session = load_session(&state, &token, now).await?;
    let window = state.flow.settings().reauth_window;
    let request = parse_body(payload, session.effective(now, window).step)?;

    let session = match state.flow.reauthenticate(&session, &request.password, now).await {
        Ok(next) => next,
        Err(e) => return Err(flow_failure(&state, &session, e).await),
    };

    if let Err(e) = state.sessions.save(&session).await {
        return error(e, FlowStep::Reauth);
    }

    success(SessionView::at(&session, now, window), session.step)
}

/// GET /api/session - Current state of the flow.
pub async fn get_session(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> ApiResult<SessionView> {
    let now = Utc::now();
    let session = load_session(&state, &token, now).await?;
    let view = SessionView::at(&session, now, state.flow.settings().reauth_window);
    let step = view.step;
    success(view, step)
}

/// POST /api/session/logout - Sign out and drop the session.
pub async fn logout(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> ApiResult<()> {
    let now = Utc::now();
    let session = load_session(&state, &token, now).await?;

    state.flow.logout(&session).await;
    if let Err(e) = state.sessions.delete(&session.token).await {
        return error(e, FlowStep::Login);
    }

    tracing::info!(uid = %session.user.uid, "User signed out");
    success((), FlowStep::Login)
}
