//! Facades over the hosted platform.
//!
//! The identity, document and blob services are external collaborators. The
//! rest of the crate only sees these traits; concrete clients are wired in at
//! startup.

mod error;
pub mod firebase;
pub mod memory;

pub use error::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A signed-in platform user together with the credential used for calls
/// made on their behalf.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub uid: String,
    pub email: String,
    pub id_token: String,
}

impl std::fmt::Debug for AuthUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthUser")
            .field("uid", &self.uid)
            .field("email", &self.email)
            .field("id_token", &"<redacted>")
            .finish()
    }
}

/// Reference to a document, addressed by its slash-separated path relative
/// to the database root (e.g. `users/abc/classes/c1`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentRef {
    pub path: String,
}

impl DocumentRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Last path segment.
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Path of a sub-collection below this document.
    pub fn child_collection(&self, name: &str) -> String {
        format!("{}/{}", self.path, name)
    }
}

/// Objects and sub-prefixes found directly below a blob prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobListing {
    /// Full object names.
    pub items: Vec<String>,
    /// Sub-prefixes, each ending with `/`.
    pub prefixes: Vec<String>,
}

/// Authentication facade.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Sign in with email and password.
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, BackendError>;

    /// Re-verify the credential of an already signed-in user.
    ///
    /// Returns the refreshed user. Fails with `UserMismatch` when the
    /// credential belongs to a different account.
    async fn reauthenticate(
        &self,
        current: &AuthUser,
        email: &str,
        password: &str,
    ) -> Result<AuthUser, BackendError>;

    /// Delete the identity of the signed-in user.
    async fn delete_user(&self, user: &AuthUser) -> Result<(), BackendError>;

    /// End the platform session of the user.
    async fn sign_out(&self, user: &AuthUser) -> Result<(), BackendError>;
}

/// Document store facade.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a single document. `Ok(None)` when it does not exist.
    async fn get(
        &self,
        user: &AuthUser,
        path: &str,
    ) -> Result<Option<serde_json::Value>, BackendError>;

    /// Delete a single document. Deleting a missing document succeeds.
    async fn delete(&self, user: &AuthUser, path: &str) -> Result<(), BackendError>;

    /// List the documents of a collection, including documents that only
    /// exist as parents of sub-collections.
    async fn list(
        &self,
        user: &AuthUser,
        collection_path: &str,
    ) -> Result<Vec<DocumentRef>, BackendError>;

    /// Documents of a top-level collection whose `field` equals `value`.
    async fn query_by_field(
        &self,
        user: &AuthUser,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<DocumentRef>, BackendError>;
}

/// Blob store facade.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// List objects and sub-prefixes directly below `prefix`.
    ///
    /// A prefix that was never written lists as empty.
    async fn list(&self, user: &AuthUser, prefix: &str) -> Result<BlobListing, BackendError>;

    /// Delete a single object.
    async fn delete(&self, user: &AuthUser, name: &str) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_ref_helpers() {
        let doc = DocumentRef::new("users/u1/classes/c1");
        assert_eq!(doc.id(), "c1");
        assert_eq!(doc.child_collection("students"), "users/u1/classes/c1/students");
    }

    #[test]
    fn test_auth_user_debug_hides_token() {
        let user = AuthUser {
            uid: "u1".to_string(),
            email: "user@example.com".to_string(),
            id_token: "secret-token".to_string(),
        };
        let rendered = format!("{:?}", user);
        assert!(rendered.contains("u1"));
        assert!(!rendered.contains("secret-token"));
    }
}
