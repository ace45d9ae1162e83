//! Task queries: progress polling, results, listing, stop-all

use crate::api::{auth::require_admin, ReqId};
use crate::error::respond;
use crate::models::{Stage, TaskError, TaskStatus, TaskSummary, TranslationStatus};
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use std::collections::BTreeMap;
use vscribe_common::fsguard::safe_join;
use vscribe_common::{Error, Result};

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub stage: Stage,
    pub stage_detail: String,
    pub ai_timings: BTreeMap<String, f64>,
    pub segments_total: u32,
    pub segments_done: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation_status: Option<TranslationStatus>,
}

#[derive(Debug, Serialize)]
pub struct StopAllResponse {
    pub cancelled: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/progress/:task_id", get(progress))
        .route("/api/result/:task_id", get(result))
        .route("/api/tasks", get(list))
        .route("/api/stop-all-tasks", post(stop_all))
}

/// GET /api/progress/:task_id
async fn progress(
    State(state): State<AppState>,
    ReqId(request_id): ReqId,
    Path(task_id): Path<String>,
) -> Response {
    let result = progress_inner(&state, &task_id).await;
    respond(&request_id, result)
}

async fn progress_inner(state: &AppState, task_id: &str) -> Result<ProgressResponse> {
    let task = state
        .registry
        .get(task_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;

    Ok(ProgressResponse {
        task_id: task.id,
        status: task.status,
        progress: task.progress,
        stage: task.stage,
        stage_detail: task.stage_detail,
        ai_timings: task.ai_timings,
        segments_total: task.segments_total,
        segments_done: task.segments_done,
        error: task.error,
        translation_status: task.translation_status,
    })
}

/// GET /api/result/:task_id — the full `data.json` record
async fn result(
    State(state): State<AppState>,
    ReqId(request_id): ReqId,
    Path(task_id): Path<String>,
) -> Response {
    let result = result_inner(&state, &task_id).await;
    respond(&request_id, result)
}

async fn result_inner(state: &AppState, task_id: &str) -> Result<serde_json::Value> {
    let task = state
        .registry
        .get(task_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;

    if task.status != TaskStatus::Completed {
        return Err(Error::BadRequest(format!(
            "task is not completed (status: {:?})",
            task.status
        )));
    }

    let data_path = safe_join(
        &state.config.system.output_dir,
        [task_id, crate::models::ArtifactKind::Data.file_name()],
    )?;
    let raw = tokio::fs::read_to_string(&data_path)
        .await
        .map_err(|_| Error::NotFound("result record is missing on disk".to_string()))?;
    serde_json::from_str(&raw)
        .map_err(|e| Error::Internal(format!("corrupt result record: {}", e)))
}

/// GET /api/tasks — summaries, newest first
async fn list(State(state): State<AppState>, ReqId(request_id): ReqId) -> Response {
    let result: Result<Vec<TaskSummary>> = state.registry.list().await;
    respond(&request_id, result)
}

/// POST /api/stop-all-tasks (admin)
async fn stop_all(
    State(state): State<AppState>,
    ReqId(request_id): ReqId,
    headers: HeaderMap,
) -> Response {
    let result = stop_all_inner(&state, &headers).await;
    respond(&request_id, result)
}

async fn stop_all_inner(state: &AppState, headers: &HeaderMap) -> Result<StopAllResponse> {
    require_admin(&state.config, headers)?;
    let cancelled = state.pipeline.cancel_all().await?;
    Ok(StopAllResponse { cancelled })
}
