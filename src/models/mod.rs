//! Request and response bodies of the HTTP API.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::flow::DeletionReport;
use crate::session::{FlowStep, ReauthState, SessionContext};

/// Request body for signing in.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Request body for re-entering the password.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReauthRequest {
    #[serde(default)]
    pub password: String,
}

/// Request body for the typed confirmation and the acknowledgment checkbox.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    #[serde(default)]
    pub confirm_text: String,
    #[serde(default)]
    pub acknowledged: bool,
}

/// Request body for the final confirmation dialog.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    #[serde(default)]
    pub final_confirmation: bool,
}

/// What the client needs to render the current step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub uid: String,
    pub email: String,
    pub step: FlowStep,
    pub reauthenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reauth_expires_at: Option<DateTime<Utc>>,
    pub delete_enabled: bool,
    pub expires_at: DateTime<Utc>,
}

impl SessionView {
    /// View of `session` as it stands at `now`.
    pub fn at(session: &SessionContext, now: DateTime<Utc>, window: Duration) -> Self {
        let session = session.effective(now, window);
        let reauth_expires_at = match session.reauth {
            ReauthState::Verified { at } => Some(at + window),
            ReauthState::Unverified => None,
        };

        Self {
            uid: session.user.uid.clone(),
            email: session.user.email.clone(),
            step: session.step,
            reauthenticated: reauth_expires_at.is_some(),
            reauth_expires_at,
            delete_enabled: session.step == FlowStep::FinalConfirm,
            expires_at: session.expires_at,
        }
    }
}

/// Whether the confirmation input enables the delete control.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmedResponse {
    pub delete_enabled: bool,
}

/// Response to a successful login.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub session: SessionView,
}

/// Response to a successful deletion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedResponse {
    pub message: String,
    pub report: DeletionReport,
}
