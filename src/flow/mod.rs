//! Orchestrates the deletion flow: login, re-authenticate, confirm, delete.
//!
//! Every operation takes the current `SessionContext` and returns the next
//! one; nothing here holds session state.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::backend::{BackendError, IdentityErrorCode, IdentityProvider};
use crate::cascade::{CascadeDeleter, CascadeError, CascadeLayout, CascadeReport};
use crate::session::{FlowStep, GuardError, SessionContext};
use crate::validation::{
    validate_confirmation, validate_email, validate_password, ConfirmationError, EmailError,
    PasswordError,
};

/// Timing parameters of the flow.
#[derive(Debug, Clone, Copy)]
pub struct FlowSettings {
    /// How long a re-authentication authorises the destructive action.
    pub reauth_window: Duration,
    /// Lifetime of a session.
    pub session_ttl: Duration,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            reauth_window: Duration::seconds(300),
            session_ttl: Duration::minutes(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    InvalidEmail(#[from] EmailError),

    #[error(transparent)]
    InvalidPassword(#[from] PasswordError),

    #[error(transparent)]
    Confirmation(#[from] ConfirmationError),

    #[error("identity error: {0}")]
    Identity(IdentityErrorCode),

    #[error(transparent)]
    ReauthRequired(#[from] GuardError),

    #[error("not allowed at step {}", .current.as_str())]
    OutOfOrder { current: FlowStep },

    #[error("final confirmation missing")]
    FinalConfirmationMissing,

    #[error(transparent)]
    Cascade(#[from] CascadeError),
}

impl FlowError {
    /// Whether the client has to go back to the re-authentication step.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            FlowError::ReauthRequired(_) | FlowError::Identity(IdentityErrorCode::RequiresRecentLogin)
        )
    }

    /// The session to keep after this failure.
    pub fn recover(&self, session: &SessionContext) -> SessionContext {
        match self {
            _ if session.step == FlowStep::Deleted => session.clone(),
            _ if self.requires_reauth() => session.reauth_revoked(),
            FlowError::Confirmation(_) => session.disarmed(),
            _ => session.clone(),
        }
    }
}

fn identity_error(operation: &'static str, err: BackendError) -> FlowError {
    let code = err.identity_code();
    tracing::warn!(operation, code = %code, "Identity call failed");
    FlowError::Identity(code)
}

/// Result of a completed account deletion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionReport {
    pub uid: String,
    pub deleted_at: DateTime<Utc>,
    pub cascade: CascadeReport,
}

pub struct AccountDeletionFlow {
    identity: Arc<dyn IdentityProvider>,
    cascade: CascadeDeleter,
    settings: FlowSettings,
}

impl AccountDeletionFlow {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        cascade: CascadeDeleter,
        settings: FlowSettings,
    ) -> Self {
        Self {
            identity,
            cascade,
            settings,
        }
    }

    pub fn settings(&self) -> FlowSettings {
        self.settings
    }

    pub fn layout(&self) -> &CascadeLayout {
        self.cascade.layout()
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionContext, FlowError> {
        validate_email(email)?;
        validate_password(password)?;

        let user = self
            .identity
            .sign_in(email.trim(), password)
            .await
            .map_err(|e| identity_error("sign_in", e))?;

        tracing::info!(uid = %user.uid, "User signed in");
        Ok(SessionContext::signed_in(user, now, self.settings.session_ttl))
    }

    pub async fn reauthenticate(
        &self,
        session: &SessionContext,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionContext, FlowError> {
        expect_step(session, &[FlowStep::Reauth, FlowStep::Confirm, FlowStep::FinalConfirm])?;
        validate_password(password)?;

        let fresh = self
            .identity
            .reauthenticate(&session.user, &session.user.email, password)
            .await
            .map_err(|e| identity_error("reauthenticate", e))?;

        tracing::info!(uid = %fresh.uid, "User re-authenticated");
        Ok(session.reauthenticated(fresh, now))
    }

    /// Check the typed keyword and the acknowledgment, arming the final
    /// confirmation.
    pub fn confirm(
        &self,
        session: &SessionContext,
        confirm_text: &str,
        acknowledged: bool,
        now: DateTime<Utc>,
    ) -> Result<SessionContext, FlowError> {
        session.guard(now, self.settings.reauth_window)?;
        expect_step(session, &[FlowStep::Confirm, FlowStep::FinalConfirm])?;
        validate_confirmation(confirm_text, acknowledged)?;

        Ok(session.awaiting_final_confirmation())
    }

    /// Erase the account: data and files first, the identity last.
    pub async fn delete_account(
        &self,
        session: &SessionContext,
        final_confirmation: bool,
        now: DateTime<Utc>,
    ) -> Result<DeletionReport, FlowError> {
        if session.step == FlowStep::Deleted {
            return Err(FlowError::OutOfOrder {
                current: session.step,
            });
        }
        if let Err(e) = session.guard(now, self.settings.reauth_window) {
            tracing::info!(uid = %session.user.uid, reason = %e, "Deletion refused by session guard");
            return Err(e.into());
        }
        expect_step(session, &[FlowStep::FinalConfirm])?;
        if !final_confirmation {
            return Err(FlowError::FinalConfirmationMissing);
        }

        let user = &session.user;
        let cascade = self.cascade.run(user).await?;

        self.identity
            .delete_user(user)
            .await
            .map_err(|e| identity_error("delete_user", e))?;
        tracing::info!(uid = %user.uid, "Account identity deleted");

        if let Err(e) = self.identity.sign_out(user).await {
            tracing::warn!(uid = %user.uid, error = %e, "Sign-out after deletion failed");
        }

        Ok(DeletionReport {
            uid: user.uid.clone(),
            deleted_at: Utc::now(),
            cascade,
        })
    }

    /// End the session. Sign-out failures are logged only.
    pub async fn logout(&self, session: &SessionContext) {
        if let Err(e) = self.identity.sign_out(&session.user).await {
            tracing::warn!(uid = %session.user.uid, error = %e, "Sign-out failed");
        }
    }
}

fn expect_step(session: &SessionContext, allowed: &[FlowStep]) -> Result<(), FlowError> {
    if allowed.contains(&session.step) {
        Ok(())
    } else {
        Err(FlowError::OutOfOrder {
            current: session.step,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use crate::backend::memory::MemoryBackend;
    use crate::backend::AuthUser;
    use crate::session::ReauthState;

    /// Counts identity calls while delegating to the in-memory platform.
    struct CountingIdentity {
        inner: Arc<MemoryBackend>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IdentityProvider for CountingIdentity {
        async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.sign_in(email, password).await
        }

        async fn reauthenticate(
            &self,
            current: &AuthUser,
            email: &str,
            password: &str,
        ) -> Result<AuthUser, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.reauthenticate(current, email, password).await
        }

        async fn delete_user(&self, user: &AuthUser) -> Result<(), BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.delete_user(user).await
        }

        async fn sign_out(&self, user: &AuthUser) -> Result<(), BackendError> {
            self.inner.sign_out(user).await
        }
    }

    struct Harness {
        backend: Arc<MemoryBackend>,
        identity: Arc<CountingIdentity>,
        flow: AccountDeletionFlow,
    }

    async fn harness() -> Harness {
        let backend = Arc::new(MemoryBackend::default());
        backend.add_account("u1", "user@example.com", "correcthorse").await;
        let identity = Arc::new(CountingIdentity {
            inner: backend.clone(),
            calls: AtomicUsize::new(0),
        });
        let cascade = CascadeDeleter::new(backend.clone(), backend.clone(), CascadeLayout::default());
        let flow = AccountDeletionFlow::new(identity.clone(), cascade, FlowSettings::default());
        Harness {
            backend,
            identity,
            flow,
        }
    }

    async fn armed_session(h: &Harness, now: DateTime<Utc>) -> SessionContext {
        let session = h.flow.login("user@example.com", "correcthorse", now).await.unwrap();
        let session = h.flow.reauthenticate(&session, "correcthorse", now).await.unwrap();
        h.flow.confirm(&session, "DELETE", true, now).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_identity() {
        let h = harness().await;
        let now = Utc::now();

        let err = h.flow.login("not-an-email", "correcthorse", now).await.unwrap_err();
        assert!(matches!(err, FlowError::InvalidEmail(_)));
        let err = h.flow.login("user@example.com", "short", now).await.unwrap_err();
        assert!(matches!(err, FlowError::InvalidPassword(PasswordError::TooShort)));

        assert_eq!(h.identity.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_login_maps_identity_errors() {
        let h = harness().await;
        let err = h
            .flow
            .login("user@example.com", "wrongpassword", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Identity(IdentityErrorCode::WrongPassword)));
    }

    #[tokio::test]
    async fn test_happy_path_deletes_everything() {
        let h = harness().await;
        h.backend.put_document("users/u1", json!({})).await;
        h.backend.put_document("users/u1/classes/c1/students/s1", json!({})).await;
        h.backend.put_blob("users/u1/photo.jpg").await;

        let now = Utc::now();
        let session = armed_session(&h, now).await;
        assert_eq!(session.step, FlowStep::FinalConfirm);

        let report = h.flow.delete_account(&session, true, now).await.unwrap();
        assert_eq!(report.uid, "u1");
        assert_eq!(report.cascade.records_deleted, 3);
        assert_eq!(report.cascade.blobs_deleted, 1);
        assert!(!h.backend.account_exists("u1").await);
        assert!(h.backend.document_paths().await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_reauth_blocks_before_any_destructive_call() {
        let h = harness().await;
        h.backend.put_document("users/u1", json!({})).await;

        let then = Utc::now() - Duration::seconds(301);
        let session = armed_session(&h, then).await;
        let calls_before = h.identity.calls.load(Ordering::SeqCst);

        let err = h.flow.delete_account(&session, true, Utc::now()).await.unwrap_err();
        assert!(err.requires_reauth());
        assert_eq!(err.recover(&session).step, FlowStep::Reauth);

        assert_eq!(h.identity.calls.load(Ordering::SeqCst), calls_before);
        assert!(h.backend.account_exists("u1").await);
        assert_eq!(h.backend.document_paths().await, vec!["users/u1".to_string()]);
    }

    #[tokio::test]
    async fn test_requires_recent_login_revokes_reauth() {
        let h = harness().await;
        h.backend
            .with_faults(|f| f.delete_user_error = Some(IdentityErrorCode::RequiresRecentLogin))
            .await;

        let now = Utc::now();
        let session = armed_session(&h, now).await;
        let err = h.flow.delete_account(&session, true, now).await.unwrap_err();

        assert!(matches!(err, FlowError::Identity(IdentityErrorCode::RequiresRecentLogin)));
        let recovered = err.recover(&session);
        assert_eq!(recovered.step, FlowStep::Reauth);
        assert_eq!(recovered.reauth, ReauthState::Unverified);
        assert!(h.backend.account_exists("u1").await);

        // Retrying after a fresh re-authentication completes the deletion.
        let session = h.flow.reauthenticate(&recovered, "correcthorse", now).await.unwrap();
        let session = h.flow.confirm(&session, "DELETE", true, now).unwrap();
        h.flow.delete_account(&session, true, now).await.unwrap();
        assert!(!h.backend.account_exists("u1").await);
    }

    #[tokio::test]
    async fn test_steps_cannot_be_skipped() {
        let h = harness().await;
        let now = Utc::now();
        let session = h.flow.login("user@example.com", "correcthorse", now).await.unwrap();

        // Confirm before re-authenticating.
        let err = h.flow.confirm(&session, "DELETE", true, now).unwrap_err();
        assert!(matches!(err, FlowError::ReauthRequired(GuardError::NotVerified)));

        // Delete without passing the final confirmation.
        let session = h.flow.reauthenticate(&session, "correcthorse", now).await.unwrap();
        let err = h.flow.delete_account(&session, true, now).await.unwrap_err();
        assert!(matches!(err, FlowError::OutOfOrder { current: FlowStep::Confirm }));

        let session = h.flow.confirm(&session, "DELETE", true, now).unwrap();
        let err = h.flow.delete_account(&session, false, now).await.unwrap_err();
        assert!(matches!(err, FlowError::FinalConfirmationMissing));
        assert!(h.backend.account_exists("u1").await);
    }

    #[tokio::test]
    async fn test_rejected_reconfirmation_disarms_delete() {
        let h = harness().await;
        let now = Utc::now();
        let armed = armed_session(&h, now).await;

        let err = h.flow.confirm(&armed, "delete", true, now).unwrap_err();
        assert!(matches!(err, FlowError::Confirmation(ConfirmationError::KeywordMismatch)));
        let session = err.recover(&armed);
        assert_eq!(session.step, FlowStep::Confirm);
        assert_eq!(session.reauth, armed.reauth);

        let err = h.flow.delete_account(&session, true, now).await.unwrap_err();
        assert!(matches!(err, FlowError::OutOfOrder { current: FlowStep::Confirm }));
        assert!(h.backend.account_exists("u1").await);

        // A valid confirmation arms it again without another password prompt.
        let session = h.flow.confirm(&session, "DELETE", true, now).unwrap();
        assert_eq!(session.step, FlowStep::FinalConfirm);
    }

    #[tokio::test]
    async fn test_deleted_session_is_refused() {
        let h = harness().await;
        let now = Utc::now();
        let deleted = armed_session(&h, now).await.deleted();
        let calls_before = h.identity.calls.load(Ordering::SeqCst);

        let err = h.flow.delete_account(&deleted, true, now).await.unwrap_err();
        assert!(matches!(err, FlowError::OutOfOrder { current: FlowStep::Deleted }));
        assert_eq!(err.recover(&deleted).step, FlowStep::Deleted);
        let err = h.flow.reauthenticate(&deleted, "correcthorse", now).await.unwrap_err();
        assert!(matches!(err, FlowError::OutOfOrder { current: FlowStep::Deleted }));

        assert_eq!(h.identity.calls.load(Ordering::SeqCst), calls_before);
        assert!(h.backend.account_exists("u1").await);
    }

    #[tokio::test]
    async fn test_confirm_is_case_sensitive() {
        let h = harness().await;
        let now = Utc::now();
        let session = h.flow.login("user@example.com", "correcthorse", now).await.unwrap();
        let session = h.flow.reauthenticate(&session, "correcthorse", now).await.unwrap();

        let err = h.flow.confirm(&session, "delete", true, now).unwrap_err();
        assert!(matches!(err, FlowError::Confirmation(ConfirmationError::KeywordMismatch)));
        let err = h.flow.confirm(&session, "DELETE", false, now).unwrap_err();
        assert!(matches!(err, FlowError::Confirmation(ConfirmationError::NotAcknowledged)));
    }

    #[tokio::test]
    async fn test_cascade_failure_keeps_identity() {
        let h = harness().await;
        h.backend.put_document("users/u1/classes/c1", json!({})).await;
        h.backend
            .with_faults(|f| {
                f.failing_lists.insert("users/u1/classes".to_string());
            })
            .await;

        let now = Utc::now();
        let session = armed_session(&h, now).await;
        let err = h.flow.delete_account(&session, true, now).await.unwrap_err();

        assert!(matches!(err, FlowError::Cascade(_)));
        assert_eq!(err.recover(&session).step, FlowStep::FinalConfirm);
        assert!(h.backend.account_exists("u1").await);
    }
}
