//! Account Eraser Backend
//!
//! Walks a signed-in user through re-authentication and confirmation, then
//! erases their account data, files and identity from the hosted platform.

mod api;
mod auth;
mod backend;
mod cascade;
mod config;
mod db;
mod errors;
mod flow;
mod models;
mod session;
mod validation;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use backend::firebase::FirebaseClients;
use backend::memory::MemoryBackend;
use backend::{BlobStore, DocumentStore, IdentityProvider};
use cascade::{CascadeDeleter, CascadeLayout};
use config::{BackendKind, Config};
use db::SessionRepository;
use flow::{AccountDeletionFlow, FlowSettings};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRepository>,
    pub flow: Arc<AccountDeletionFlow>,
}

/// The three platform facades the flow runs against.
struct Platform {
    identity: Arc<dyn IdentityProvider>,
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
}

impl Platform {
    fn connect(kind: &BackendKind) -> Result<Self, Box<dyn std::error::Error>> {
        match kind {
            BackendKind::Firebase(settings) => {
                tracing::info!(
                    project = %settings.project_id,
                    bucket = %settings.storage_bucket,
                    "Using Firebase platform"
                );
                let clients = FirebaseClients::new(settings)?;
                Ok(Self {
                    identity: Arc::new(clients.identity),
                    documents: Arc::new(clients.firestore),
                    blobs: Arc::new(clients.storage),
                })
            }
            BackendKind::Memory { seed } => {
                tracing::warn!("Using in-memory platform. Data is not persisted!");
                let memory = match seed {
                    Some(path) => MemoryBackend::load(path)?,
                    None => MemoryBackend::default(),
                };
                Ok(Self::in_memory(Arc::new(memory)))
            }
        }
    }

    fn in_memory(memory: Arc<MemoryBackend>) -> Self {
        Self {
            identity: memory.clone(),
            documents: memory.clone(),
            blobs: memory,
        }
    }

    fn into_flow(self, layout: CascadeLayout, settings: FlowSettings) -> AccountDeletionFlow {
        let cascade = CascadeDeleter::new(self.documents, self.blobs, layout);
        AccountDeletionFlow::new(self.identity, cascade, settings)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Account Eraser Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);
    tracing::info!(
        reauth_window_secs = config.flow.reauth_window.num_seconds(),
        session_ttl_secs = config.flow.session_ttl.num_seconds(),
        "Flow settings"
    );

    // Initialize session database
    let pool = db::init_database(&config.db_path).await?;
    let sessions = Arc::new(SessionRepository::new(pool));

    // Connect the platform
    let flow = Platform::connect(&config.backend)?.into_flow(config.layout.clone(), config.flow);
    tracing::info!(root = %flow.layout().root_collection, "Cascade layout ready");

    // Create application state
    let state = AppState {
        sessions,
        flow: Arc::new(flow),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // API routes
    let api_routes = Router::new()
        // Session
        .route("/session", get(api::get_session))
        .route("/session/login", post(api::login))
        .route("/session/reauth", post(api::reauth))
        .route("/session/logout", post(api::logout))
        // Account
        .route("/account/armed", post(api::armed))
        .route("/account/confirm", post(api::confirm))
        .route("/account/delete", post(api::delete_account));

    // Health check
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
