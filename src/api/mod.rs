//! REST API and WebSocket server of the hub
//!
//! Thin HTTP layer over the in-process handles: every route calls into the
//! registry, the metric store or one of the actor handles and serializes the
//! result. Nothing here holds state of its own.
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - backend health and connected stream clients
//! - `GET /api/v1/stats` - storage statistics and schedule
//! - `POST /api/v1/storage/cleanup` - apply the retention policy now
//! - `GET /api/v1/collectors` - registrations with health
//! - `GET /api/v1/collectors/:id` - one registration with health
//! - `POST /api/v1/collectors/:id/enable`, `POST /api/v1/collectors/:id/disable`
//! - `PUT /api/v1/collectors/:id/config`, `PUT /api/v1/collectors/:id/interval`
//! - `POST /api/v1/collectors/:id/run` - run now, returns the execution record
//! - `GET /api/v1/collectors/:id/probe` - collector health check
//! - `GET /api/v1/collectors/:id/executions` - newest executions first
//! - `GET /api/v1/collectors/:id/metrics` - points in a time range
//! - `GET /api/v1/collectors/:id/metrics/latest` - newest point per metric
//! - `GET /api/v1/collectors/:id/metrics/:name/summary` - count/min/max/avg
//! - `GET /api/v1/alerts` - alert instances, filtered
//! - `POST /api/v1/alerts/evaluate` - run a rule sweep now
//! - `POST /api/v1/alerts/:id/acknowledge`, `/resolve`, `/snooze`
//! - `GET /api/v1/alerts/:id/notifications` - delivery attempts
//! - `GET /api/v1/rules`, `POST /api/v1/rules`, `PUT /api/v1/rules/:id`
//! - `WS /api/v1/stream` - live events

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod websocket;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ApiConfig;

/// Build the router with all routes and the configured layers
pub fn router(config: &ApiConfig, state: ApiState) -> Router {
    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/stats", get(routes::stats::get_stats))
        .route("/api/v1/storage/cleanup", post(routes::stats::run_cleanup))
        .route("/api/v1/collectors", get(routes::collectors::list_collectors))
        .route("/api/v1/collectors/:id", get(routes::collectors::get_collector))
        .route(
            "/api/v1/collectors/:id/enable",
            post(routes::collectors::enable_collector),
        )
        .route(
            "/api/v1/collectors/:id/disable",
            post(routes::collectors::disable_collector),
        )
        .route(
            "/api/v1/collectors/:id/config",
            put(routes::collectors::update_config),
        )
        .route(
            "/api/v1/collectors/:id/interval",
            put(routes::collectors::update_interval),
        )
        .route("/api/v1/collectors/:id/run", post(routes::collectors::run_now))
        .route("/api/v1/collectors/:id/probe", get(routes::collectors::probe))
        .route(
            "/api/v1/collectors/:id/executions",
            get(routes::collectors::list_executions),
        )
        .route(
            "/api/v1/collectors/:id/metrics",
            get(routes::metrics::get_metrics),
        )
        .route(
            "/api/v1/collectors/:id/metrics/latest",
            get(routes::metrics::get_latest),
        )
        .route(
            "/api/v1/collectors/:id/metrics/:name/summary",
            get(routes::metrics::get_summary),
        )
        .route("/api/v1/alerts", get(routes::alerts::list_alerts))
        .route("/api/v1/alerts/evaluate", post(routes::alerts::evaluate_now))
        .route(
            "/api/v1/alerts/:id/acknowledge",
            post(routes::alerts::acknowledge),
        )
        .route("/api/v1/alerts/:id/resolve", post(routes::alerts::resolve))
        .route("/api/v1/alerts/:id/snooze", post(routes::alerts::snooze))
        .route(
            "/api/v1/alerts/:id/notifications",
            get(routes::alerts::list_notifications),
        )
        .route(
            "/api/v1/rules",
            get(routes::rules::list_rules).post(routes::rules::create_rule),
        )
        .route("/api/v1/rules/:id", put(routes::rules::update_rule))
        .route("/api/v1/stream", get(websocket::websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    if let Some(token) = config.auth_token.clone() {
        app = app.layer(axum::middleware::from_fn_with_state(
            token,
            middleware::auth::auth_middleware,
        ));
    }

    app
}

/// Spawn the API server
///
/// Binds the listener before returning so the caller learns the real address
/// (useful with port 0), then serves in a background task.
pub async fn spawn_api_server(config: &ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(config, state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
