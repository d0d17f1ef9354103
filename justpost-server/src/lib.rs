//! JustPost HTTP surface
//!
//! A thin axum layer over `libjustpost`: every handler builds a per-request
//! [`ConnectionOrchestrator`](libjustpost::ConnectionOrchestrator) for the
//! calling user, runs one operation and renders the result as camelCase JSON.
//! User identity is taken from a header set by the fronting auth layer.

use axum::http::HeaderName;
use axum::routing::{get, post};
use axum::Router;
use libjustpost::config::ServerConfig;
use libjustpost::error::{ConfigError, Result};
use libjustpost::{Connectors, Dispatcher, SecretStore};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod extract;
pub mod routes;

pub use error::ApiError;
pub use extract::{AuthenticatedUser, PlatformParam};

pub const DEFAULT_USER_HEADER: &str = "x-user-id";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub connectors: Connectors,
    pub store: SecretStore,
    pub dispatcher: Dispatcher,
    /// Browser destination after an OAuth callback.
    pub app_base_url: String,
    pub user_header: HeaderName,
}

impl AppState {
    pub fn new(connectors: Connectors, store: SecretStore, app_base_url: impl Into<String>) -> Self {
        Self {
            dispatcher: Dispatcher::new(connectors.clone()),
            connectors,
            store,
            app_base_url: app_base_url.into(),
            user_header: HeaderName::from_static(DEFAULT_USER_HEADER),
        }
    }

    /// Build state from the `[server]` section.
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidValue` when `user_header` is not a valid header name.
    pub fn from_config(server: &ServerConfig, connectors: Connectors, store: SecretStore) -> Result<Self> {
        let user_header = HeaderName::from_bytes(server.user_header.trim().as_bytes())
            .map_err(|_| ConfigError::InvalidValue("server.user_header".to_string()))?;

        Ok(Self {
            user_header,
            ..Self::new(connectors, store, server.app_base_url.clone())
        })
    }
}

/// All API routes with request tracing and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/platforms", get(routes::list_platforms))
        .route("/api/platforms/:platform/add", post(routes::add_platform))
        .route("/api/platforms/:platform/select", post(routes::toggle_select))
        .route("/api/callback", get(routes::oauth_callback))
        .route("/api/publish", post(routes::publish_selected))
        .route("/api/:platform/login", post(routes::begin_login))
        .route("/api/:platform/credentials", post(routes::submit_credentials))
        .route("/api/:platform/status", get(routes::connection_status))
        .route("/api/:platform/post", post(routes::publish_single))
        .route("/api/:platform/logout", post(routes::logout))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
