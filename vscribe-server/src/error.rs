//! HTTP envelope and error mapping
//!
//! Every response from the API carries the same envelope:
//! `{success, data|error, meta:{request_id}}`. Error kinds map onto HTTP
//! status codes here; messages are human-readable and never carry secret
//! material (components redact before constructing errors).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use vscribe_common::{Error, ErrorKind};

/// HTTP status for each error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BadRequest | ErrorKind::UrlRejected | ErrorKind::PathEscape => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::ConflictBusy => StatusCode::CONFLICT,
        ErrorKind::VendorRateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Cancelled | ErrorKind::StaleOnRestart => StatusCode::CONFLICT,
        ErrorKind::ToolMissing
        | ErrorKind::Network
        | ErrorKind::VendorError
        | ErrorKind::SttConsecutiveFailures
        | ErrorKind::DiskFull
        | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Success envelope.
pub fn ok_json<T: Serialize>(request_id: &str, data: T) -> Response {
    Json(json!({
        "success": true,
        "data": data,
        "meta": {"request_id": request_id},
    }))
    .into_response()
}

/// Error envelope.
pub fn err_json(request_id: &str, err: &Error) -> Response {
    let kind = err.kind();
    tracing::debug!(request_id, kind = kind.as_str(), error = %err, "Request failed");
    let body = Json(json!({
        "success": false,
        "error": {"kind": kind.as_str(), "message": err.to_string()},
        "meta": {"request_id": request_id},
    }));
    (status_for(kind), body).into_response()
}

/// Fold a handler result into the envelope.
pub fn respond<T: Serialize>(request_id: &str, result: vscribe_common::Result<T>) -> Response {
    match result {
        Ok(data) => ok_json(request_id, data),
        Err(err) => err_json(request_id, &err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_covers_client_and_server_kinds() {
        assert_eq!(status_for(ErrorKind::UrlRejected), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::PathEscape), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::ConflictBusy), StatusCode::CONFLICT);
        assert_eq!(
            status_for(ErrorKind::VendorRateLimited),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(ErrorKind::Internal),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
