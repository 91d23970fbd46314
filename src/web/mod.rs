//! Admin HTTP server.

mod handlers;

pub use handlers::*;

use crate::config::AuthConfig;
use crate::db::Store;
use crate::hub::Hub;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub hub: Hub,
    pub auth: AuthConfig,
}

/// Admin HTTP server for Watchpost.
pub struct Server {
    address: String,
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(address: String, auth: AuthConfig, store: Store, hub: Hub) -> Self {
        Self {
            address,
            state: AppState { store, hub, auth },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        let protected = Router::new()
            .route(
                "/health-app/externalServices/register",
                post(handlers::handle_register),
            )
            .route(
                "/health-app/externalServices/list",
                get(handlers::handle_list),
            )
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                handlers::basic_auth,
            ));

        Router::new()
            // Health check
            .route("/ping", get(handlers::handle_ping))
            .merge(protected)
            .route(
                "/health-app/healthLogs/{serviceId}",
                get(handlers::handle_logs),
            )
            // WebSocket endpoint for live state-change events
            .route("/ws", get(handlers::handle_ws))
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Start the server on the configured address.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let router = self.routes();

        tracing::info!("Admin server listening on {}", self.address);

        let listener = tokio::net::TcpListener::bind(&self.address).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
