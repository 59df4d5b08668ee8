//! Integration tests for the account eraser backend.

use std::sync::Arc;

use chrono::{Duration, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::backend::memory::MemoryBackend;
use crate::backend::{IdentityErrorCode, IdentityProvider};
use crate::cascade::CascadeLayout;
use crate::db::{init_database, SessionRepository};
use crate::flow::FlowSettings;
use crate::session::SessionContext;
use crate::{create_router, AppState, Platform};

const EMAIL: &str = "ada@example.com";
const PASSWORD: &str = "correcthorse";

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    backend: Arc<MemoryBackend>,
    sessions: Arc<SessionRepository>,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");

        // Initialize database
        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let sessions = Arc::new(SessionRepository::new(pool));

        // Seed the in-memory platform
        let backend = Arc::new(MemoryBackend::default());
        backend.add_account("u1", EMAIL, PASSWORD).await;
        backend.put_document("users/u1", json!({ "name": "Ada" })).await;
        backend.put_document("users/u1/classes/c1", json!({ "title": "Maths" })).await;
        backend
            .put_document("users/u1/classes/c1/students/s1", json!({ "name": "Bo" }))
            .await;
        backend
            .put_document("users/u1/classes/c1/attendance/2024-01-01", json!({ "s1": true }))
            .await;
        backend
            .put_document("feedback/f1", json!({ "userId": "u1", "text": "Great" }))
            .await;
        backend
            .put_document("feedback/f2", json!({ "userId": "u2", "text": "Other" }))
            .await;
        backend.put_blob("users/u1/avatar.png").await;
        backend.put_blob("users/u1/classes/c1/sheet.pdf").await;
        backend.put_blob("users/u2/avatar.png").await;

        let flow = Platform::in_memory(backend.clone())
            .into_flow(CascadeLayout::default(), FlowSettings::default());

        let state = AppState {
            sessions: sessions.clone(),
            flow: Arc::new(flow),
        };

        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        TestFixture {
            client: Client::new(),
            base_url,
            backend,
            sessions,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, path: &str, token: Option<&str>, body: Value) -> (u16, Value) {
        let mut request = self.client.post(self.url(path)).json(&body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let resp = request.send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn login(&self) -> String {
        let (status, body) = self
            .post(
                "/api/session/login",
                None,
                json!({ "email": EMAIL, "password": PASSWORD }),
            )
            .await;
        assert_eq!(status, 200, "login failed: {}", body);
        body["data"]["token"].as_str().unwrap().to_string()
    }

    /// Sign in, re-authenticate and pass the typed confirmation.
    async fn armed_token(&self) -> String {
        let token = self.login().await;
        let (status, _) = self
            .post("/api/session/reauth", Some(&token), json!({ "password": PASSWORD }))
            .await;
        assert_eq!(status, 200);
        let (status, body) = self
            .post(
                "/api/account/confirm",
                Some(&token),
                json!({ "confirmText": "DELETE", "acknowledged": true }),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["step"], "finalConfirm");
        token
    }
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_login_starts_at_reauth_step() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture
        .post(
            "/api/session/login",
            None,
            json!({ "email": EMAIL, "password": PASSWORD }),
        )
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["step"], "reauth");
    assert_eq!(body["data"]["session"]["uid"], "u1");
    assert_eq!(body["data"]["session"]["reauthenticated"], false);
    assert_eq!(body["data"]["session"]["deleteEnabled"], false);
    assert!(body["data"]["session"].get("idToken").is_none());
}

#[tokio::test]
async fn test_login_validation_errors() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture
        .post(
            "/api/session/login",
            None,
            json!({ "email": "user@@example.com", "password": PASSWORD }),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["details"]["field"], "email");
    assert_eq!(body["step"], "login");

    let (status, body) = fixture
        .post(
            "/api/session/login",
            None,
            json!({ "email": EMAIL, "password": "password" }),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["details"]["field"], "password");
}

#[tokio::test]
async fn test_login_wrong_password() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture
        .post(
            "/api/session/login",
            None,
            json!({ "email": EMAIL, "password": "not-the-password" }),
        )
        .await;
    assert_eq!(status, 401);
    assert_eq!(body["error"]["code"], "IDENTITY_ERROR");
    assert_eq!(body["error"]["details"]["identityCode"], "wrong-password");
    assert_eq!(body["step"], "login");
}

#[tokio::test]
async fn test_malformed_body_uses_envelope() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/session/login"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert_eq!(body["step"], "login");
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/api/session"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    assert_eq!(body["step"], "login");

    let (status, _) = fixture
        .post(
            "/api/account/delete",
            Some("unknown-token"),
            json!({ "finalConfirmation": true }),
        )
        .await;
    assert_eq!(status, 401);
    assert!(fixture.backend.account_exists("u1").await);
}

#[tokio::test]
async fn test_confirmation_is_exact() {
    let fixture = TestFixture::new().await;
    let token = fixture.login().await;
    fixture
        .post("/api/session/reauth", Some(&token), json!({ "password": PASSWORD }))
        .await;

    let (status, body) = fixture
        .post(
            "/api/account/confirm",
            Some(&token),
            json!({ "confirmText": "delete", "acknowledged": true }),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["details"]["field"], "confirmText");
    assert_eq!(body["step"], "confirm");

    let (status, body) = fixture
        .post(
            "/api/account/confirm",
            Some(&token),
            json!({ "confirmText": "DELETE", "acknowledged": false }),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["details"]["field"], "acknowledged");

    // Neither attempt armed the deletion.
    let (status, body) = fixture
        .post(
            "/api/account/delete",
            Some(&token),
            json!({ "finalConfirmation": true }),
        )
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "STEP_OUT_OF_ORDER");
    assert!(fixture.backend.account_exists("u1").await);
}

#[tokio::test]
async fn test_armed_check_changes_nothing() {
    let fixture = TestFixture::new().await;
    let token = fixture.login().await;

    // Not re-authenticated yet.
    let (status, body) = fixture
        .post(
            "/api/account/armed",
            Some(&token),
            json!({ "confirmText": "DELETE", "acknowledged": true }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["deleteEnabled"], false);
    assert_eq!(body["step"], "reauth");

    fixture
        .post("/api/session/reauth", Some(&token), json!({ "password": PASSWORD }))
        .await;
    for (text, ack, enabled) in [("DELETE", true, true), ("delete", true, false), ("DELETE", false, false)] {
        let (_, body) = fixture
            .post(
                "/api/account/armed",
                Some(&token),
                json!({ "confirmText": text, "acknowledged": ack }),
            )
            .await;
        assert_eq!(body["data"]["deleteEnabled"], enabled, "{} {}", text, ack);
        assert_eq!(body["step"], "confirm");
    }
}

#[tokio::test]
async fn test_confirm_before_reauth_is_refused() {
    let fixture = TestFixture::new().await;
    let token = fixture.login().await;

    let (status, body) = fixture
        .post(
            "/api/account/confirm",
            Some(&token),
            json!({ "confirmText": "DELETE", "acknowledged": true }),
        )
        .await;
    assert_eq!(status, 403);
    assert_eq!(body["error"]["code"], "REAUTH_REQUIRED");
    assert_eq!(body["step"], "reauth");
}

#[tokio::test]
async fn test_full_deletion() {
    let fixture = TestFixture::new().await;
    let token = fixture.armed_token().await;

    let (status, body) = fixture
        .post(
            "/api/account/delete",
            Some(&token),
            json!({ "finalConfirmation": true }),
        )
        .await;
    assert_eq!(status, 200, "delete failed: {}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["step"], "deleted");

    let cascade = &body["data"]["report"]["cascade"];
    assert_eq!(cascade["rootDeleted"], true);
    assert_eq!(cascade["groupsDeleted"], 1);
    assert_eq!(cascade["auxiliaryDeleted"], 1);
    assert_eq!(cascade["blobsDeleted"], 2);

    // Identity, records and files of the account are gone; others remain.
    assert!(!fixture.backend.account_exists("u1").await);
    assert_eq!(fixture.backend.document_paths().await, vec!["feedback/f2".to_string()]);
    assert_eq!(fixture.backend.blob_names().await, vec!["users/u2/avatar.png".to_string()]);

    // The session was dropped with the account.
    let resp = fixture
        .client
        .get(fixture.url("/api/session"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_final_confirmation_required() {
    let fixture = TestFixture::new().await;
    let token = fixture.armed_token().await;

    let (status, body) = fixture
        .post(
            "/api/account/delete",
            Some(&token),
            json!({ "finalConfirmation": false }),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["details"]["field"], "finalConfirmation");
    assert_eq!(body["step"], "finalConfirm");
    assert!(fixture.backend.account_exists("u1").await);
}

#[tokio::test]
async fn test_stale_credential_sends_user_back_to_reauth() {
    let fixture = TestFixture::new().await;
    let token = fixture.armed_token().await;
    fixture
        .backend
        .with_faults(|f| f.delete_user_error = Some(IdentityErrorCode::RequiresRecentLogin))
        .await;

    let (status, body) = fixture
        .post(
            "/api/account/delete",
            Some(&token),
            json!({ "finalConfirmation": true }),
        )
        .await;
    assert_eq!(status, 403);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "REAUTH_REQUIRED");
    assert_eq!(body["step"], "reauth");
    assert!(fixture.backend.account_exists("u1").await);

    // The re-authentication flag was cleared.
    let resp = fixture
        .client
        .get(fixture.url("/api/session"))
        .header("x-session-token", &token)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["step"], "reauth");
    assert_eq!(body["data"]["reauthenticated"], false);

    // Skipping straight back to delete is refused.
    let (status, _) = fixture
        .post(
            "/api/account/delete",
            Some(&token),
            json!({ "finalConfirmation": true }),
        )
        .await;
    assert_eq!(status, 403);
    assert!(fixture.backend.account_exists("u1").await);
}

#[tokio::test]
async fn test_expired_reauth_blocks_deletion() {
    let fixture = TestFixture::new().await;

    // An armed session whose re-authentication is 301 seconds old.
    let then = Utc::now() - Duration::seconds(301);
    let user = fixture.backend.sign_in(EMAIL, PASSWORD).await.unwrap();
    let session = SessionContext::signed_in(user.clone(), then, Duration::minutes(30))
        .reauthenticated(user, then)
        .awaiting_final_confirmation();
    fixture.sessions.save(&session).await.unwrap();

    let resp = fixture
        .client
        .get(fixture.url("/api/session"))
        .bearer_auth(&session.token)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["step"], "reauth");
    assert_eq!(body["data"]["deleteEnabled"], false);

    let (status, body) = fixture
        .post(
            "/api/account/delete",
            Some(&session.token),
            json!({ "finalConfirmation": true }),
        )
        .await;
    assert_eq!(status, 403);
    assert_eq!(body["error"]["code"], "REAUTH_REQUIRED");
    assert_eq!(body["step"], "reauth");
    assert!(fixture.backend.account_exists("u1").await);
    assert_eq!(fixture.backend.document_paths().await.len(), 6);
}

#[tokio::test]
async fn test_failed_cascade_keeps_account_and_session() {
    let fixture = TestFixture::new().await;
    let token = fixture.armed_token().await;
    fixture
        .backend
        .with_faults(|f| {
            f.failing_lists.insert("users/u1/classes".to_string());
        })
        .await;

    let (status, body) = fixture
        .post(
            "/api/account/delete",
            Some(&token),
            json!({ "finalConfirmation": true }),
        )
        .await;
    assert_eq!(status, 502);
    assert_eq!(body["error"]["code"], "DELETION_FAILED");
    assert_eq!(body["step"], "finalConfirm");
    assert!(fixture.backend.account_exists("u1").await);
    assert_eq!(fixture.backend.document_paths().await.len(), 6);

    // Once the platform recovers the same session can retry.
    fixture
        .backend
        .with_faults(|f| f.failing_lists.clear())
        .await;
    let (status, body) = fixture
        .post(
            "/api/account/delete",
            Some(&token),
            json!({ "finalConfirmation": true }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["step"], "deleted");
    assert!(!fixture.backend.account_exists("u1").await);
}

#[tokio::test]
async fn test_failed_reconfirmation_disarms_delete() {
    let fixture = TestFixture::new().await;
    let token = fixture.armed_token().await;

    let (status, body) = fixture
        .post(
            "/api/account/confirm",
            Some(&token),
            json!({ "confirmText": "delete", "acknowledged": true }),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["step"], "confirm");

    let resp = fixture
        .client
        .get(fixture.url("/api/session"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["step"], "confirm");
    assert_eq!(body["data"]["deleteEnabled"], false);

    let (status, body) = fixture
        .post(
            "/api/account/delete",
            Some(&token),
            json!({ "finalConfirmation": true }),
        )
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "STEP_OUT_OF_ORDER");
    assert!(fixture.backend.account_exists("u1").await);
    assert_eq!(fixture.backend.document_paths().await.len(), 6);
}

#[tokio::test]
async fn test_deleted_session_cannot_replay_deletion() {
    let fixture = TestFixture::new().await;

    // A session left behind after its account was erased.
    let now = Utc::now();
    let user = fixture.backend.sign_in(EMAIL, PASSWORD).await.unwrap();
    let session = SessionContext::signed_in(user.clone(), now, Duration::minutes(30))
        .reauthenticated(user, now)
        .awaiting_final_confirmation()
        .deleted();
    fixture.sessions.save(&session).await.unwrap();

    let (status, body) = fixture
        .post(
            "/api/account/delete",
            Some(&session.token),
            json!({ "finalConfirmation": true }),
        )
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "STEP_OUT_OF_ORDER");
    assert_eq!(body["step"], "deleted");
    assert!(fixture.backend.account_exists("u1").await);
    assert_eq!(fixture.backend.document_paths().await.len(), 6);
    assert_eq!(fixture.backend.blob_names().await.len(), 3);
}

#[tokio::test]
async fn test_logout_ends_session() {
    let fixture = TestFixture::new().await;
    let token = fixture.login().await;

    let (status, body) = fixture.post("/api/session/logout", Some(&token), json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["step"], "login");

    let (status, body) = fixture
        .post("/api/session/reauth", Some(&token), json!({ "password": PASSWORD }))
        .await;
    assert_eq!(status, 401);
    assert_eq!(body["step"], "login");
    assert!(fixture.backend.account_exists("u1").await);
}
