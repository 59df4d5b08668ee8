//! Firebase REST clients.
//!
//! Talks to the Identity Toolkit, Firestore and Firebase Storage REST APIs with
//! the signed-in user's ID token, so every call runs under the platform's
//! security rules for that user.

mod firestore;
mod identity;
mod storage;

pub use firestore::Firestore;
pub use identity::FirebaseIdentity;
pub use storage::FirebaseStorage;

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::BackendError;
use crate::config::FirebaseSettings;

/// Request timeout for every platform call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The three Firebase facades sharing one HTTP connection pool.
pub struct FirebaseClients {
    pub identity: FirebaseIdentity,
    pub firestore: Firestore,
    pub storage: FirebaseStorage,
}

impl FirebaseClients {
    pub fn new(settings: &FirebaseSettings) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            identity: FirebaseIdentity::new(client.clone(), &settings.identity_url, &settings.api_key),
            firestore: Firestore::new(client.clone(), &settings.firestore_url, &settings.project_id),
            storage: FirebaseStorage::new(client, &settings.storage_url, &settings.storage_bucket),
        })
    }
}

/// Google API error envelope.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Extract the error message of a failed response.
async fn error_message(response: Response) -> (StatusCode, String) {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => envelope.error.message,
        Err(_) => body,
    };
    (status, message)
}

/// Convert a failed data-plane response into a `BackendError`.
async fn response_error(response: Response) -> BackendError {
    let (status, message) = error_message(response).await;
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::PermissionDenied(message),
        StatusCode::NOT_FOUND => BackendError::NotFound(message),
        _ => BackendError::Unexpected {
            status: status.as_u16(),
            message,
        },
    }
}

fn trim_base(url: &str) -> &str {
    url.trim_end_matches('/')
}
