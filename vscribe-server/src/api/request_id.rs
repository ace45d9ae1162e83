//! Per-request correlation ids
//!
//! A middleware assigns each request a fresh id, threads it through a tracing
//! span, and echoes it in the `x-request-id` response header. Handlers pick
//! it up with the `ReqId` extractor and stamp it into the response envelope.

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use std::convert::Infallible;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct RequestIdExt(String);

/// Request-id extractor for handlers
#[derive(Debug, Clone)]
pub struct ReqId(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for ReqId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .extensions
            .get::<RequestIdExt>()
            .map(|ext| ext.0.clone())
            // Direct handler invocation in tests bypasses the middleware.
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        Ok(ReqId(id))
    }
}

/// Middleware: assign the id, span the request, echo the header.
pub async fn assign(mut request: Request, next: Next) -> Response {
    let id = Uuid::new_v4().simple().to_string();
    request.extensions_mut().insert(RequestIdExt(id.clone()));

    let span = tracing::info_span!(
        "request",
        request_id = %id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}
