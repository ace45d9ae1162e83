//! Bilingual translation endpoint

use crate::api::ReqId;
use crate::error::respond;
use crate::models::{TaskStatus, TranslationStatus};
use crate::services::llm::{ApiOverride, ProviderKind};
use crate::AppState;
use axum::extract::State;
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use serde::{Deserialize, Serialize};
use vscribe_common::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub task_id: String,
    pub llm_provider: String,
    #[serde(default)]
    pub api_config: Option<ApiOverride>,
    /// Target language of the bilingual rendering; defaults to English.
    #[serde(default)]
    pub target_language: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TranslateResponse {
    pub task_id: String,
    pub translation_status: TranslationStatus,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/translate", post(translate))
}

/// POST /api/translate
///
/// Only `completed` tasks are eligible; the pass runs in the background and
/// is observed through the task's `translation_status`.
async fn translate(
    State(state): State<AppState>,
    ReqId(request_id): ReqId,
    axum::Json(body): axum::Json<TranslateRequest>,
) -> Response {
    let result = translate_inner(&state, body).await;
    respond(&request_id, result)
}

async fn translate_inner(state: &AppState, body: TranslateRequest) -> Result<TranslateResponse> {
    let provider = ProviderKind::from_wire(&body.llm_provider)
        .ok_or_else(|| Error::BadRequest(format!("unknown llm_provider: {}", body.llm_provider)))?;

    let task = state
        .registry
        .get(&body.task_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("task {}", body.task_id)))?;

    if task.status != TaskStatus::Completed {
        return Err(Error::BadRequest(format!(
            "bilingual translation requires a completed task (status: {:?})",
            task.status
        )));
    }
    if task.translation_status == Some(TranslationStatus::Processing) {
        return Err(Error::ConflictBusy(
            "a translation pass is already running for this task".to_string(),
        ));
    }

    let target = body
        .target_language
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| "英文".to_string());

    let task_id = task.id.clone();
    state
        .pipeline
        .start_translation(task, provider, body.api_config, target);

    Ok(TranslateResponse {
        task_id,
        translation_status: TranslationStatus::Processing,
    })
}
