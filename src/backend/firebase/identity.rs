//! Identity Toolkit client (email/password accounts).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{error_message, trim_base};
use crate::backend::{AuthUser, BackendError, IdentityErrorCode, IdentityProvider};

pub struct FirebaseIdentity {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    id_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRequest<'a> {
    id_token: &'a str,
}

impl FirebaseIdentity {
    pub fn new(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: trim_base(base_url).to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/v1/accounts:{}", self.base_url, method)
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        method: &str,
        body: &T,
    ) -> Result<reqwest::Response, BackendError> {
        let response = self
            .client
            .post(self.endpoint(method))
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(method, error = %e, "Identity request failed");
                BackendError::Identity(IdentityErrorCode::NetworkRequestFailed)
            })?;

        if response.status().is_success() {
            return Ok(response);
        }

        let (status, message) = error_message(response).await;
        let code = map_error_code(&message);
        tracing::debug!(method, status = status.as_u16(), code = %code, "Identity request rejected");
        Err(BackendError::Identity(code))
    }
}

/// Map an Identity Toolkit error message to a normalised code.
///
/// Messages look like `INVALID_PASSWORD` or
/// `TOO_MANY_ATTEMPTS_TRY_LATER : Access to this account ...`.
fn map_error_code(message: &str) -> IdentityErrorCode {
    let code = message
        .split(|c: char| c == ' ' || c == ':')
        .next()
        .unwrap_or_default();

    match code {
        "EMAIL_NOT_FOUND" | "USER_NOT_FOUND" => IdentityErrorCode::UserNotFound,
        "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "MISSING_PASSWORD" => {
            IdentityErrorCode::WrongPassword
        }
        "INVALID_EMAIL" | "MISSING_EMAIL" => IdentityErrorCode::InvalidEmail,
        "USER_DISABLED" => IdentityErrorCode::UserDisabled,
        "TOO_MANY_ATTEMPTS_TRY_LATER" => IdentityErrorCode::TooManyRequests,
        "CREDENTIAL_TOO_OLD_LOGIN_AGAIN" | "TOKEN_EXPIRED" | "INVALID_ID_TOKEN" => {
            IdentityErrorCode::RequiresRecentLogin
        }
        other => IdentityErrorCode::Unknown(other.to_string()),
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentity {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, BackendError> {
        let request = SignInRequest {
            email,
            password,
            return_secure_token: true,
        };
        let response: SignInResponse = self
            .post("signInWithPassword", &request)
            .await?
            .json()
            .await?;

        Ok(AuthUser {
            uid: response.local_id,
            email: response.email.unwrap_or_else(|| email.to_string()),
            id_token: response.id_token,
        })
    }

    async fn reauthenticate(
        &self,
        current: &AuthUser,
        email: &str,
        password: &str,
    ) -> Result<AuthUser, BackendError> {
        let fresh = self.sign_in(email, password).await?;
        if fresh.uid != current.uid {
            tracing::warn!(uid = %current.uid, "Re-authentication credential belongs to another account");
            return Err(BackendError::Identity(IdentityErrorCode::UserMismatch));
        }
        Ok(fresh)
    }

    async fn delete_user(&self, user: &AuthUser) -> Result<(), BackendError> {
        let request = DeleteRequest {
            id_token: &user.id_token,
        };
        self.post("delete", &request).await?;
        Ok(())
    }

    async fn sign_out(&self, user: &AuthUser) -> Result<(), BackendError> {
        // ID tokens are stateless; dropping the session is all a client can do.
        tracing::debug!(uid = %user.uid, "Signed out");
        Ok(())
    }
}
