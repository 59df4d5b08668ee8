//! Account API endpoints: confirmation and deletion.

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use chrono::Utc;

use super::{error, flow_failure, load_session, parse_body, success, ApiResult};
use crate::auth::SessionToken;
use crate::errors::{AppError, AppErrorWithStep};
use crate::models::{ArmedResponse, ConfirmRequest, DeleteRequest, DeletedResponse, SessionView};
use crate::session::{FlowStep, SessionContext};
use crate::validation::deletion_armed;
use crate::AppState;

/// POST /api/account/armed - Whether the typed input enables the delete
/// control. Changes nothing.
pub async fn armed(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    payload: Result<Json<ConfirmRequest>, JsonRejection>,
) -> ApiResult<ArmedResponse> {
    let now = Utc::now();
    let session = load_session(&state, &token, now).await?;
    let step = session.effective(now, state.flow.settings().reauth_window).step;
    let request = parse_body(payload, step)?;

    let delete_enabled = matches!(step, FlowStep::Confirm | FlowStep::FinalConfirm)
        && deletion_armed(&request.confirm_text, request.acknowledged);
    success(ArmedResponse { delete_enabled }, step)
}

/// POST /api/account/confirm - Typed keyword and acknowledgment.
pub async fn confirm(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    payload: Result<Json<ConfirmRequest>, JsonRejection>,
) -> ApiResult<SessionView> {
    let now = Utc::now();
    let session = load_session(&state, &token, now).await?;
    let window = state.flow.settings().reauth_window;
    let request = parse_body(payload, session.effective(now, window).step)?;

    let session =
        match state
            .flow
            .confirm(&session, &request.confirm_text, request.acknowledged, now)
        {
            Ok(next) => next,
            Err(e) => return Err(flow_failure(&state, &session, e).await),
        };

    if let Err(e) = state.sessions.save(&session).await {
        return error(e, FlowStep::Confirm);
    }

    success(SessionView::at(&session, now, window), session.step)
}

/// POST /api/account/delete - Erase the account.
///
/// The deletion runs on its own task so that a client disconnecting midway
/// does not abandon a partial cascade.
pub async fn delete_account(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    payload: Result<Json<DeleteRequest>, JsonRejection>,
) -> ApiResult<DeletedResponse> {
    let now = Utc::now();
    let session = load_session(&state, &token, now).await?;
    let window = state.flow.settings().reauth_window;
    let request = parse_body(payload, session.effective(now, window).step)?;
    let step = session.step;

    let task = tokio::spawn(run_deletion(state, session, request.final_confirmation));
    match task.await {
        Ok(Ok(response)) => success(response, FlowStep::Deleted),
        Ok(Err(e)) => Err(e),
        Err(e) => {
            tracing::error!(error = %e, "Deletion task failed");
            error(
                AppError::Internal("Account deletion was interrupted.".to_string()),
                step,
            )
        }
    }
}

/// Attempts at removing the sessions of a deleted account.
const SESSION_REMOVAL_ATTEMPTS: usize = 3;

/// Drop every session of a deleted account. If that keeps failing, mark
/// this session deleted so that replaying the request cannot reach the
/// cascade again.
async fn forget_account(state: &AppState, session: &SessionContext) {
    let uid = &session.user.uid;
    for attempt in 1..=SESSION_REMOVAL_ATTEMPTS {
        match state.sessions.delete_for_uid(uid).await {
            Ok(removed) => {
                tracing::debug!(uid = %uid, removed, "Removed sessions of deleted account");
                return;
            }
            Err(e) => tracing::warn!(
                uid = %uid,
                attempt,
                error = %e,
                "Failed to remove sessions of deleted account"
            ),
        }
    }

    if let Err(e) = state.sessions.save(&session.deleted()).await {
        tracing::error!(uid = %uid, error = %e, "Failed to mark session of deleted account");
    }
}

async fn run_deletion(
    state: AppState,
    session: SessionContext,
    final_confirmation: bool,
) -> Result<DeletedResponse, AppErrorWithStep> {
    let now = Utc::now();
    let report = match state
        .flow
        .delete_account(&session, final_confirmation, now)
        .await
    {
        Ok(report) => report,
        Err(e) => return Err(flow_failure(&state, &session, e).await),
    };

    forget_account(&state, &session).await;

    tracing::info!(
        uid = %report.uid,
        records = report.cascade.records_deleted,
        blobs = report.cascade.blobs_deleted,
        "Account deleted"
    );

    Ok(DeletedResponse {
        message: "Your account and all of its data have been deleted.".to_string(),
        report,
    })
}
