//! Health check

use crate::api::ReqId;
use crate::error::ok_json;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde_json::json;

pub fn routes<S: Clone + Send + Sync + 'static>() -> Router<S> {
    Router::new().route("/api/health", get(health))
}

/// GET /api/health
async fn health(ReqId(request_id): ReqId) -> Response {
    ok_json(
        &request_id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "status": "ok",
        }),
    )
}
