//! Session guard.
//!
//! A `SessionContext` is an immutable value describing where a browser
//! session stands in the deletion flow. Transitions consume nothing and
//! return a new value; persisting it is the caller's job.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::AuthUser;

/// Screen the client should render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlowStep {
    Login,
    Reauth,
    Confirm,
    FinalConfirm,
    Deleted,
}

impl FlowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStep::Login => "login",
            FlowStep::Reauth => "reauth",
            FlowStep::Confirm => "confirm",
            FlowStep::FinalConfirm => "finalConfirm",
            FlowStep::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "login" => Some(FlowStep::Login),
            "reauth" => Some(FlowStep::Reauth),
            "confirm" => Some(FlowStep::Confirm),
            "finalConfirm" => Some(FlowStep::FinalConfirm),
            "deleted" => Some(FlowStep::Deleted),
            _ => None,
        }
    }
}

/// Re-authentication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReauthState {
    Unverified,
    Verified { at: DateTime<Utc> },
}

impl ReauthState {
    /// Whether the verification is still inside the window at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self {
            ReauthState::Unverified => false,
            ReauthState::Verified { at } => now.signed_duration_since(*at) <= window,
        }
    }
}

/// Why the destructive operation is not authorised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("re-authentication required")]
    NotVerified,
    #[error("re-authentication expired {elapsed_secs}s ago")]
    Expired { elapsed_secs: i64 },
}

/// State of one browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub token: String,
    pub user: AuthUser,
    pub step: FlowStep,
    pub reauth: ReauthState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionContext {
    /// A freshly signed-in session, waiting for re-authentication.
    pub fn signed_in(user: AuthUser, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            token: uuid::Uuid::new_v4().simple().to_string(),
            user,
            step: FlowStep::Reauth,
            reauth: ReauthState::Unverified,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Session after a successful re-authentication.
    pub fn reauthenticated(&self, user: AuthUser, now: DateTime<Utc>) -> Self {
        Self {
            user,
            step: FlowStep::Confirm,
            reauth: ReauthState::Verified { at: now },
            ..self.clone()
        }
    }

    /// Session after the platform reported a stale credential.
    pub fn reauth_revoked(&self) -> Self {
        Self {
            step: FlowStep::Reauth,
            reauth: ReauthState::Unverified,
            ..self.clone()
        }
    }

    /// Session waiting for the final confirmation.
    pub fn awaiting_final_confirmation(&self) -> Self {
        Self {
            step: FlowStep::FinalConfirm,
            ..self.clone()
        }
    }

    /// Session after a confirmation attempt was rejected. The delete control
    /// is disabled again until a valid confirmation arrives; the
    /// re-authentication stays.
    pub fn disarmed(&self) -> Self {
        let step = match self.step {
            FlowStep::FinalConfirm => FlowStep::Confirm,
            other => other,
        };
        Self {
            step,
            ..self.clone()
        }
    }

    /// Session of an account that no longer exists.
    pub fn deleted(&self) -> Self {
        Self {
            step: FlowStep::Deleted,
            reauth: ReauthState::Unverified,
            ..self.clone()
        }
    }

    /// The session as it stands at `now`: an expired verification drops
    /// the session back to re-authentication.
    pub fn effective(&self, now: DateTime<Utc>, window: Duration) -> Self {
        let past_reauth = matches!(self.step, FlowStep::Confirm | FlowStep::FinalConfirm);
        if past_reauth && !self.reauth.is_fresh(now, window) {
            return self.reauth_revoked();
        }
        self.clone()
    }

    /// Whether the destructive operation may run at `now`.
    pub fn guard(&self, now: DateTime<Utc>, window: Duration) -> Result<(), GuardError> {
        match self.reauth {
            ReauthState::Unverified => Err(GuardError::NotVerified),
            ReauthState::Verified { at } => {
                let elapsed = now.signed_duration_since(at);
                if elapsed > window {
                    Err(GuardError::Expired {
                        elapsed_secs: (elapsed - window).num_seconds(),
                    })
                } else {
                    Ok(())
                }
            }
        }
    }
}
