//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::Config;
use crate::db::Store;
use crate::engine::Engine;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<Store>,
    pub engine: Arc<Engine>,
}

/// API server for PulseWatch.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: Config, store: Arc<Store>, engine: Arc<Engine>) -> Self {
        Self {
            state: AppState {
                config,
                store,
                engine,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/", get(handlers::handle_overview))
            // Targets
            .route("/api/targets", get(handlers::handle_get_targets))
            .route("/api/targets", post(handlers::handle_create_target))
            .route("/api/targets/{id}", put(handlers::handle_update_target))
            .route("/api/targets/{id}", delete(handlers::handle_delete_target))
            // Probe result ingestion
            .route("/api/results", post(handlers::handle_post_result))
            // Queries
            .route("/api/overview", get(handlers::handle_overview))
            .route("/api/targets/{id}/status", get(handlers::handle_get_status))
            .route("/api/targets/{id}/incidents", get(handlers::handle_get_target_incidents))
            .route("/api/targets/{id}/uptime", get(handlers::handle_get_uptime))
            .route("/api/incidents", get(handlers::handle_get_incidents))
            .route("/api/incidents/{id}", get(handlers::handle_get_incident))
            // Notifications
            .route("/api/notifications/test", post(handlers::handle_test_notification))
            .layer(cors)
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
