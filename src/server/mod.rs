//! # Plan store service
//!
//! JSON-over-HTTP storage of shared study plans.
//!
//! | route | result |
//! |---|---|
//! | `GET /plans/:code` | 200 document, 400 bad code, 404, 500 |
//! | `POST /plans` | 200 `{ok, data}`, 400, 409 `{ok:false, error, code}`, 500 |
//! | `GET /health` | 200 `{ok, version}` |
//!
//! Plans are insert-once: there is no update or delete route.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod error;
pub mod routes;
pub mod state;
pub mod store;

use crate::config::ServerConfig;
use routes::{create_plan_handler, get_plan_handler, health_handler};
use state::ServerState;

pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring invalid allowed origin: {o}");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60))
}

pub fn app(state: Arc<ServerState>) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);

    Router::new()
        .route("/health", get(health_handler))
        .route("/plans", post(create_plan_handler))
        .route("/plans/:code", get(get_plan_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server() -> anyhow::Result<()> {
    let config = ServerConfig::load()?;

    info!("Opening plan table at {}", config.db_path.display());
    let state = ServerState::new(config)?;

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("bind {address}"))?;
    info!("Server running on {address}");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                warn!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
