//! Configuration module for the account eraser.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::Duration;

use crate::cascade::CascadeLayout;
use crate::errors::AppError;
use crate::flow::FlowSettings;

const DEFAULT_IDENTITY_URL: &str = "https://identitytoolkit.googleapis.com";
const DEFAULT_FIRESTORE_URL: &str = "https://firestore.googleapis.com";
const DEFAULT_STORAGE_URL: &str = "https://firebasestorage.googleapis.com";

/// Which platform implementation serves the facades.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    Firebase(FirebaseSettings),
    /// In-memory platform, optionally seeded from a JSON file
    Memory { seed: Option<PathBuf> },
}

/// Firebase project settings.
#[derive(Clone, PartialEq, Eq)]
pub struct FirebaseSettings {
    pub api_key: String,
    pub project_id: String,
    pub storage_bucket: String,
    pub identity_url: String,
    pub firestore_url: String,
    pub storage_url: String,
}

impl std::fmt::Debug for FirebaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirebaseSettings")
            .field("project_id", &self.project_id)
            .field("storage_bucket", &self.storage_bucket)
            .field("identity_url", &self.identity_url)
            .field("firestore_url", &self.firestore_url)
            .field("storage_url", &self.storage_url)
            .finish_non_exhaustive()
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite session database
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Platform serving identity, documents and blobs
    pub backend: BackendKind,
    /// Re-authentication window and session lifetime
    pub flow: FlowSettings,
    /// Location of the account's data on the platform
    pub layout: CascadeLayout,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let db_path = env_or("ERASER_DB_PATH", "./data/sessions.sqlite").into();

        let bind_addr = env_or("ERASER_BIND_ADDR", "127.0.0.1:8080")
            .parse()
            .map_err(|e| AppError::Internal(format!("Invalid ERASER_BIND_ADDR: {}", e)))?;

        let log_level = env_or("ERASER_LOG_LEVEL", "info");

        let backend = match env_or("ERASER_BACKEND", "firebase").as_str() {
            "firebase" => BackendKind::Firebase(firebase_from_env()?),
            "memory" => BackendKind::Memory {
                seed: env::var("ERASER_MEMORY_SEED").ok().map(PathBuf::from),
            },
            other => {
                return Err(AppError::Internal(format!(
                    "Unknown ERASER_BACKEND '{}' (expected firebase or memory)",
                    other
                )))
            }
        };

        let flow = FlowSettings {
            reauth_window: Duration::seconds(secs_from_env("ERASER_REAUTH_WINDOW_SECS", 300)?),
            session_ttl: Duration::seconds(secs_from_env("ERASER_SESSION_TTL_SECS", 1800)?),
        };

        let defaults = CascadeLayout::default();
        let layout = CascadeLayout {
            root_collection: env_or("ERASER_ROOT_COLLECTION", &defaults.root_collection),
            group_collection: env_or("ERASER_GROUP_COLLECTION", &defaults.group_collection),
            member_collection: env_or("ERASER_MEMBER_COLLECTION", &defaults.member_collection),
            entry_collection: env_or("ERASER_ENTRY_COLLECTION", &defaults.entry_collection),
            auxiliary_collection: env_or("ERASER_AUX_COLLECTION", &defaults.auxiliary_collection),
            auxiliary_owner_field: env_or("ERASER_AUX_OWNER_FIELD", &defaults.auxiliary_owner_field),
            blob_root: env_or("ERASER_BLOB_ROOT", &defaults.blob_root),
        };

        Ok(Self {
            db_path,
            bind_addr,
            log_level,
            backend,
            flow,
            layout,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn required(key: &str) -> Result<String, AppError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AppError::Internal(format!("{} must be set", key))),
    }
}

fn secs_from_env(key: &str, default: i64) -> Result<i64, AppError> {
    match env::var(key) {
        Ok(raw) => match raw.parse::<i64>() {
            Ok(secs) if secs > 0 => Ok(secs),
            _ => Err(AppError::Internal(format!(
                "{} must be a positive number of seconds, got '{}'",
                key, raw
            ))),
        },
        Err(_) => Ok(default),
    }
}

fn firebase_from_env() -> Result<FirebaseSettings, AppError> {
    let api_key = required("ERASER_FIREBASE_API_KEY")?;
    let project_id = required("ERASER_FIREBASE_PROJECT_ID")?;
    let storage_bucket = env::var("ERASER_FIREBASE_STORAGE_BUCKET")
        .unwrap_or_else(|_| format!("{}.appspot.com", project_id));

    Ok(FirebaseSettings {
        api_key,
        project_id,
        storage_bucket,
        identity_url: env_or("ERASER_IDENTITY_URL", DEFAULT_IDENTITY_URL),
        firestore_url: env_or("ERASER_FIRESTORE_URL", DEFAULT_FIRESTORE_URL),
        storage_url: env_or("ERASER_STORAGE_URL", DEFAULT_STORAGE_URL),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: &[&str] = &[
        "ERASER_DB_PATH",
        "ERASER_BIND_ADDR",
        "ERASER_LOG_LEVEL",
        "ERASER_BACKEND",
        "ERASER_MEMORY_SEED",
        "ERASER_FIREBASE_API_KEY",
        "ERASER_FIREBASE_PROJECT_ID",
        "ERASER_FIREBASE_STORAGE_BUCKET",
        "ERASER_REAUTH_WINDOW_SECS",
        "ERASER_SESSION_TTL_SECS",
        "ERASER_GROUP_COLLECTION",
    ];

    // Environment variables are process-global, so every case runs in one test.
    #[test]
    fn test_config_from_env() {
        for key in KEYS {
            env::remove_var(key);
        }

        // Firebase is the default and needs credentials.
        assert!(Config::from_env().is_err());

        env::set_var("ERASER_FIREBASE_API_KEY", "key");
        env::set_var("ERASER_FIREBASE_PROJECT_ID", "demo");
        let config = Config::from_env().unwrap();
        assert_eq!(config.db_path, PathBuf::from("./data/sessions.sqlite"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.flow.reauth_window, Duration::seconds(300));
        assert_eq!(config.flow.session_ttl, Duration::seconds(1800));
        assert_eq!(config.layout, CascadeLayout::default());
        match config.backend {
            BackendKind::Firebase(settings) => {
                assert_eq!(settings.storage_bucket, "demo.appspot.com");
                assert_eq!(settings.identity_url, DEFAULT_IDENTITY_URL);
            }
            other => panic!("unexpected backend {:?}", other),
        }

        env::set_var("ERASER_BACKEND", "memory");
        env::set_var("ERASER_REAUTH_WINDOW_SECS", "60");
        env::set_var("ERASER_GROUP_COLLECTION", "groups");
        let config = Config::from_env().unwrap();
        assert_eq!(config.backend, BackendKind::Memory { seed: None });
        assert_eq!(config.flow.reauth_window, Duration::seconds(60));
        assert_eq!(config.layout.group_collection, "groups");

        env::set_var("ERASER_REAUTH_WINDOW_SECS", "-5");
        assert!(Config::from_env().is_err());

        env::set_var("ERASER_REAUTH_WINDOW_SECS", "60");
        env::set_var("ERASER_BACKEND", "carrier-pigeon");
        assert!(Config::from_env().is_err());

        for key in KEYS {
            env::remove_var(key);
        }
    }
}
