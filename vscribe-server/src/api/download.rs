//! Artifact downloads
//!
//! `GET /api/download/:task_id/:kind` streams one artifact of a finished
//! task. The download filename derives from the sanitized media title; the
//! on-disk path is produced by the file manager behind containment checks.

use crate::api::ReqId;
use crate::error::err_json;
use crate::models::ArtifactKind;
use crate::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio_util::io::ReaderStream;
use vscribe_common::{Error, Result};

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/download/:task_id/:kind", get(download))
}

async fn download(
    State(state): State<AppState>,
    ReqId(request_id): ReqId,
    Path((task_id, kind)): Path<(String, String)>,
) -> Response {
    match download_inner(&state, &task_id, &kind).await {
        Ok(response) => response,
        Err(e) => err_json(&request_id, &e),
    }
}

async fn download_inner(state: &AppState, task_id: &str, kind_raw: &str) -> Result<Response> {
    let kind = ArtifactKind::from_wire(kind_raw)
        .ok_or_else(|| Error::BadRequest(format!("unknown artifact kind: {}", kind_raw)))?;

    let task = state
        .registry
        .get(task_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;

    // Artifacts are only readable once the worker has released the directory.
    if !task.status.is_terminal() {
        return Err(Error::ConflictBusy(
            "task is still processing".to_string(),
        ));
    }
    // Failed/cancelled tasks may still carry artifacts from an earlier
    // completion; only what the record actually lists is served.
    let relative = task
        .artifacts
        .get(&kind)
        .ok_or_else(|| Error::NotFound(format!("artifact {} not available", kind.wire_name())))?;

    let title = task.media.as_ref().map(|m| m.title.as_str());
    let (path, download_name) =
        state
            .files
            .artifact_download(task_id, relative, title, kind)?;

    serve_file(&path, &download_name).await
}

/// Stream a file with a Content-Disposition attachment header.
pub async fn serve_file(path: &std::path::Path, download_name: &str) -> Result<Response> {
    let file = tokio::fs::File::open(path).await?;
    let stream = ReaderStream::new(file);

    let content_type = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => "application/json; charset=utf-8",
        Some("md") => "text/markdown; charset=utf-8",
        _ => "application/octet-stream",
    };

    let disposition = content_disposition(download_name);
    let mut response = (StatusCode::OK, Body::from_stream(stream)).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type),
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// Build an attachment header that survives non-ASCII titles: an ASCII
/// fallback plus the RFC 5987 `filename*` form.
fn content_disposition(name: &str) -> String {
    let ascii_fallback: String = name
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .collect();

    if name.is_ascii() {
        format!("attachment; filename=\"{}\"", ascii_fallback)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            ascii_fallback,
            percent_encode(name)
        )
    }
}

fn percent_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() * 3);
    for byte in raw.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(*byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}
