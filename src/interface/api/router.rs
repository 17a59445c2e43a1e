//! API Router configuration

use super::metrics_handler::metrics_handler;
use super::signaling::{health_check, not_found, signaling_handler, RelayState};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the relay router
pub fn build_router(state: RelayState, prometheus_handle: PrometheusHandle) -> Router {
    let relay_routes = Router::new()
        .route("/", get(signaling_handler))
        .route("/health", get(health_check))
        .with_state(state);

    // Metrics route (separate state)
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(prometheus_handle);

    Router::new()
        .merge(relay_routes)
        .merge(metrics_routes)
        .fallback(not_found)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
