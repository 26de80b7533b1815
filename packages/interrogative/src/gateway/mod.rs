//! Transport Gateway
//!
//! HTTP and WebSocket surface of a session: the main event socket, the
//! terminal socket, and health/metrics endpoints.

pub mod envelope;
pub mod main_socket;
pub mod shell_socket;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
};
use event_bus::EventBus;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use uuid::Uuid;

use crate::metrics::SessionMetrics;
use crate::terminal::TerminalMultiplexer;

pub const VERSION_HEADER: &str = "interrogative-version";

#[derive(Clone)]
pub struct GatewayState {
    pub bus: EventBus,
    pub terminals: Arc<TerminalMultiplexer>,
    pub metrics: Arc<SessionMetrics>,
    pub default_cols: u16,
    pub default_rows: u16,
}

/// Adds a unique request ID to each request span
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws/attach/main", get(main_socket::main_socket_handler))
        .route("/ws/attach/shell", get(shell_socket::shell_socket_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(axum::middleware::map_response(add_version_header))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn add_version_header(mut response: Response) -> Response {
    response.headers_mut().insert(
        HeaderName::from_static(VERSION_HEADER),
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}
