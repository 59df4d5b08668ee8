//! In-memory platform for local development.
//!
//! Implements all three facades over plain maps with the same observable
//! behaviour as the hosted platform: deletes of missing items succeed,
//! listing a collection also reports documents that only exist as parents of
//! sub-collections, and data calls require a token issued by `sign_in`.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use super::{
    AuthUser, BackendError, BlobListing, BlobStore, DocumentRef, DocumentStore, IdentityErrorCode,
    IdentityProvider,
};

/// Initial contents, loadable from a JSON file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySeed {
    #[serde(default)]
    pub accounts: Vec<SeedAccount>,
    #[serde(default)]
    pub documents: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub blobs: Vec<String>,
    /// Failures to rehearse in development.
    #[serde(default)]
    pub faults: FaultPlan,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedAccount {
    pub uid: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub disabled: bool,
}

/// Failures to inject, for rehearsing the error paths of the flow.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FaultPlan {
    /// Returned once by the next `delete_user` call.
    pub delete_user_error: Option<IdentityErrorCode>,
    /// Collection paths and blob prefixes whose listing fails.
    pub failing_lists: HashSet<String>,
    /// Document paths and object names whose deletion fails.
    pub failing_deletes: HashSet<String>,
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, SeedAccount>,
    tokens: HashMap<String, String>,
    documents: BTreeMap<String, serde_json::Value>,
    blobs: BTreeSet<String>,
    issued: u64,
}

pub struct MemoryBackend {
    state: RwLock<MemoryState>,
    faults: RwLock<FaultPlan>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::from_seed(MemorySeed::default())
    }
}

impl MemoryBackend {
    pub fn from_seed(seed: MemorySeed) -> Self {
        let state = MemoryState {
            accounts: seed
                .accounts
                .into_iter()
                .map(|account| (account.uid.clone(), account))
                .collect(),
            documents: seed.documents,
            blobs: seed.blobs.into_iter().collect(),
            ..MemoryState::default()
        };

        Self {
            state: RwLock::new(state),
            faults: RwLock::new(seed.faults),
        }
    }

    /// Load a seed file.
    pub fn load(path: &Path) -> Result<Self, BackendError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BackendError::Transport(format!("failed to read {}: {}", path.display(), e)))?;
        let seed: MemorySeed = serde_json::from_str(&raw).map_err(|e| BackendError::Unexpected {
            status: 0,
            message: format!("invalid seed file {}: {}", path.display(), e),
        })?;

        tracing::info!(
            accounts = seed.accounts.len(),
            documents = seed.documents.len(),
            blobs = seed.blobs.len(),
            failing_lists = seed.faults.failing_lists.len(),
            failing_deletes = seed.faults.failing_deletes.len(),
            delete_user_fault = seed.faults.delete_user_error.is_some(),
            "Loaded in-memory platform seed"
        );
        Ok(Self::from_seed(seed))
    }
}

#[cfg(test)]
impl MemoryBackend {
    pub async fn add_account(&self, uid: &str, email: &str, password: &str) {
        let account = SeedAccount {
            uid: uid.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            disabled: false,
        };
        self.state.write().await.accounts.insert(uid.to_string(), account);
    }

    pub async fn put_document(&self, path: &str, value: serde_json::Value) {
        self.state.write().await.documents.insert(path.to_string(), value);
    }

    pub async fn put_blob(&self, name: &str) {
        self.state.write().await.blobs.insert(name.to_string());
    }

    /// Adjust the injected failures.
    pub async fn with_faults<F: FnOnce(&mut FaultPlan)>(&self, apply: F) {
        apply(&mut *self.faults.write().await);
    }

    pub async fn account_exists(&self, uid: &str) -> bool {
        self.state.read().await.accounts.contains_key(uid)
    }

    pub async fn document_paths(&self) -> Vec<String> {
        self.state.read().await.documents.keys().cloned().collect()
    }

    pub async fn blob_names(&self) -> Vec<String> {
        self.state.read().await.blobs.iter().cloned().collect()
    }
}

impl MemoryBackend {
    /// Issue a session for the account matching the credential.
    async fn issue(&self, email: &str, password: &str) -> Result<AuthUser, BackendError> {
        let mut state = self.state.write().await;

        let account = state
            .accounts
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or(BackendError::Identity(IdentityErrorCode::UserNotFound))?;

        if account.disabled {
            return Err(BackendError::Identity(IdentityErrorCode::UserDisabled));
        }
        if account.password != password {
            return Err(BackendError::Identity(IdentityErrorCode::WrongPassword));
        }

        state.issued += 1;
        let id_token = format!("memory-{}-{}", account.uid, state.issued);
        state.tokens.insert(id_token.clone(), account.uid.clone());

        Ok(AuthUser {
            uid: account.uid,
            email: account.email,
            id_token,
        })
    }

    async fn authorize(&self, user: &AuthUser) -> Result<(), BackendError> {
        let state = self.state.read().await;
        match state.tokens.get(&user.id_token) {
            Some(uid) if *uid == user.uid => Ok(()),
            _ => Err(BackendError::PermissionDenied("invalid token".to_string())),
        }
    }

    async fn check_list(&self, target: &str) -> Result<(), BackendError> {
        if self.faults.read().await.failing_lists.contains(target) {
            return Err(BackendError::Transport(format!("listing {} failed", target)));
        }
        Ok(())
    }

    async fn check_delete(&self, target: &str) -> Result<(), BackendError> {
        if self.faults.read().await.failing_deletes.contains(target) {
            return Err(BackendError::Transport(format!("deleting {} failed", target)));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for MemoryBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, BackendError> {
        self.issue(email, password).await
    }

    async fn reauthenticate(
        &self,
        current: &AuthUser,
        email: &str,
        password: &str,
    ) -> Result<AuthUser, BackendError> {
        let fresh = self.issue(email, password).await?;
        if fresh.uid != current.uid {
            return Err(BackendError::Identity(IdentityErrorCode::UserMismatch));
        }
        Ok(fresh)
    }

    async fn delete_user(&self, user: &AuthUser) -> Result<(), BackendError> {
        if let Some(code) = self.faults.write().await.delete_user_error.take() {
            return Err(BackendError::Identity(code));
        }
        self.authorize(user)
            .await
            .map_err(|_| BackendError::Identity(IdentityErrorCode::RequiresRecentLogin))?;

        let mut state = self.state.write().await;
        state.accounts.remove(&user.uid);
        state.tokens.retain(|_, uid| *uid != user.uid);
        Ok(())
    }

    async fn sign_out(&self, user: &AuthUser) -> Result<(), BackendError> {
        self.state.write().await.tokens.remove(&user.id_token);
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryBackend {
    async fn get(
        &self,
        user: &AuthUser,
        path: &str,
    ) -> Result<Option<serde_json::Value>, BackendError> {
        self.authorize(user).await?;
        Ok(self.state.read().await.documents.get(path).cloned())
    }

    async fn delete(&self, user: &AuthUser, path: &str) -> Result<(), BackendError> {
        self.authorize(user).await?;
        self.check_delete(path).await?;
        self.state.write().await.documents.remove(path);
        Ok(())
    }

    async fn list(
        &self,
        user: &AuthUser,
        collection_path: &str,
    ) -> Result<Vec<DocumentRef>, BackendError> {
        self.authorize(user).await?;
        self.check_list(collection_path).await?;

        let prefix = format!("{}/", collection_path);
        let state = self.state.read().await;
        let ids: BTreeSet<&str> = state
            .documents
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|id| !id.is_empty())
            .collect();

        Ok(ids
            .into_iter()
            .map(|id| DocumentRef::new(format!("{}{}", prefix, id)))
            .collect())
    }

    async fn query_by_field(
        &self,
        user: &AuthUser,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<DocumentRef>, BackendError> {
        self.authorize(user).await?;
        self.check_list(collection).await?;

        let prefix = format!("{}/", collection);
        let state = self.state.read().await;
        Ok(state
            .documents
            .iter()
            .filter(|(path, _)| {
                path.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .filter(|(_, doc)| doc.get(field).and_then(|v| v.as_str()) == Some(value))
            .map(|(path, _)| DocumentRef::new(path.clone()))
            .collect())
    }
}

#[async_trait]
impl BlobStore for MemoryBackend {
    async fn list(&self, user: &AuthUser, prefix: &str) -> Result<BlobListing, BackendError> {
        self.authorize(user).await?;
        self.check_list(prefix).await?;

        let state = self.state.read().await;
        let mut items = Vec::new();
        let mut prefixes = BTreeSet::new();
        for name in state.blobs.iter() {
            let Some(rest) = name.strip_prefix(prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((folder, _)) => {
                    prefixes.insert(format!("{}{}/", prefix, folder));
                }
                None => items.push(name.clone()),
            }
        }

        Ok(BlobListing {
            items,
            prefixes: prefixes.into_iter().collect(),
        })
    }

    async fn delete(&self, user: &AuthUser, name: &str) -> Result<(), BackendError> {
        self.authorize(user).await?;
        self.check_delete(name).await?;
        self.state.write().await.blobs.remove(name);
        Ok(())
    }
}
