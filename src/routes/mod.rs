//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the classroom websocket endpoint and the small HTTP
//! surface (health, session presence) under a single Axum router.

pub mod sessions;
pub mod ws;

use axum::Router;
use axum::http::HeaderValue;
use axum::response::Json;
use axum::routing::get;
use serde_json::{Value, json};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

fn cors(frontend_url: Option<&str>) -> CorsLayer {
    let origin = match frontend_url.map(HeaderValue::from_str) {
        Some(Ok(origin)) => AllowOrigin::exact(origin),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "FRONTEND_URL is not a valid origin; allowing any origin");
            AllowOrigin::from(Any)
        }
        None => AllowOrigin::from(Any),
    };
    CorsLayer::new().allow_origin(origin).allow_methods(Any).allow_headers(Any)
}

/// Full application router.
pub fn app(state: AppState, frontend_url: Option<&str>) -> Router {
    Router::new()
        .route("/api/ws", get(ws::handle_ws))
        .route("/api/sessions/{id}/presence", get(sessions::presence))
        .route("/health", get(health))
        .layer(cors(frontend_url))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}
