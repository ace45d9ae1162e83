//! File manager surface
//!
//! Listing is open; destructive operations are admin-guarded in production.
//! Clients address files exclusively by server-issued path tokens.

use crate::api::{auth::require_admin, download::serve_file, ReqId};
use crate::error::{err_json, respond};
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::info;
use vscribe_common::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct DeleteFilesRequest {
    pub tokens: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteTaskRequest {
    pub task_id: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteTaskResponse {
    pub task_id: String,
    pub deleted: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/files", get(list))
        .route("/api/files/download/:token", get(download))
        .route("/api/files/delete", post(delete_many))
        .route("/api/files/delete-task", post(delete_task))
}

/// GET /api/files
async fn list(State(state): State<AppState>, ReqId(request_id): ReqId) -> Response {
    respond(&request_id, state.files.list_all())
}

/// GET /api/files/download/:token
async fn download(
    State(state): State<AppState>,
    ReqId(request_id): ReqId,
    Path(token): Path<String>,
) -> Response {
    let result = async {
        let (path, name) = state.files.resolve_download(&token)?;
        serve_file(&path, &name).await
    }
    .await;

    match result {
        Ok(response) => response,
        Err(e) => err_json(&request_id, &e),
    }
}

/// POST /api/files/delete (admin)
async fn delete_many(
    State(state): State<AppState>,
    ReqId(request_id): ReqId,
    headers: HeaderMap,
    axum::Json(body): axum::Json<DeleteFilesRequest>,
) -> Response {
    let result = (|| -> Result<_> {
        require_admin(&state.config, &headers)?;
        Ok(state.files.delete_many(&body.tokens))
    })();
    respond(&request_id, result)
}

/// POST /api/files/delete-task (admin)
///
/// Removes the task record and both of its directories. A running task is
/// cancelled first.
async fn delete_task(
    State(state): State<AppState>,
    ReqId(request_id): ReqId,
    headers: HeaderMap,
    axum::Json(body): axum::Json<DeleteTaskRequest>,
) -> Response {
    let result = delete_task_inner(&state, &headers, body).await;
    respond(&request_id, result)
}

async fn delete_task_inner(
    state: &AppState,
    headers: &HeaderMap,
    body: DeleteTaskRequest,
) -> Result<DeleteTaskResponse> {
    require_admin(&state.config, headers)?;

    if state.pipeline.cancel(&body.task_id).await {
        info!(task_id = %body.task_id, "Cancelled running task before deletion");
    }

    match state.registry.delete(&body.task_id).await {
        Ok(_) => {}
        Err(Error::NotFound(_)) => {
            // Orphaned directories (record already gone) are still removable.
        }
        Err(e) => return Err(e),
    }
    state.files.delete_task(&body.task_id)?;

    Ok(DeleteTaskResponse {
        task_id: body.task_id,
        deleted: true,
    })
}
