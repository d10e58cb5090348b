//! Web server module.

mod handlers;

pub use handlers::*;

use crate::engine::EngineHandle;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
}

/// HTTP front end for a running engine.
pub struct Server {
    port: u16,
    state: AppState,
}

impl Server {
    pub fn new(port: u16, engine: EngineHandle) -> Self {
        Self {
            port,
            state: AppState { engine },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/health", get(handlers::handle_health))
            // Devices
            .route(
                "/api/devices",
                get(handlers::handle_get_devices).post(handlers::handle_create_device),
            )
            .route(
                "/api/devices/{name}",
                get(handlers::handle_get_device)
                    .put(handlers::handle_update_device)
                    .delete(handlers::handle_delete_device),
            )
            .route("/api/devices/{name}/{verb}", post(handlers::handle_device_command))
            // Wake by hardware address
            .route("/api/wake", post(handlers::handle_wake_mac))
            // Probe an address outside the registry
            .route("/api/probe", post(handlers::handle_probe_once))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(self.state.clone())
    }

    /// Serve on the configured port until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
