//! Submission endpoints: URL processing, uploads, upload processing

use crate::api::ReqId;
use crate::error::respond;
use crate::models::{TaskSource, TaskStatus};
use crate::pipeline::RunOptions;
use crate::services::llm::{ApiOverride, ProviderKind};
use crate::AppState;
use axum::extract::{Multipart, State};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;
use vscribe_common::filename::sanitize_filename;
use vscribe_common::fsguard::safe_join;
use vscribe_common::urlguard::{is_safe_base_url, UrlPolicy};
use vscribe_common::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub video_url: String,
    pub llm_provider: String,
    #[serde(default)]
    pub api_config: Option<ApiOverride>,
    #[serde(default)]
    pub youtube_cookies: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub task_id: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub task_id: String,
    pub file_name: String,
    pub size: u64,
}

#[derive(Debug, Deserialize)]
pub struct ProcessUploadRequest {
    pub task_id: String,
    pub llm_provider: String,
    #[serde(default)]
    pub api_config: Option<ApiOverride>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/process", post(process))
        .route("/api/upload", post(upload))
        .route("/api/process-upload", post(process_upload))
}

fn parse_provider(raw: &str) -> Result<ProviderKind> {
    ProviderKind::from_wire(raw)
        .ok_or_else(|| Error::BadRequest(format!("unknown llm_provider: {}", raw)))
}

/// Reject new submissions once the backlog limit is reached.
async fn check_backpressure(state: &AppState) -> Result<()> {
    let active = state.registry.count_active().await?;
    if active >= state.config.server.max_queued_tasks {
        return Err(Error::ConflictBusy(format!(
            "{} tasks already queued or processing",
            active
        )));
    }
    Ok(())
}

/// POST /api/process
///
/// Validates the URL (no task is created for a rejected URL), creates the
/// task, and queues it for the pipeline.
async fn process(
    State(state): State<AppState>,
    ReqId(request_id): ReqId,
    axum::Json(body): axum::Json<ProcessRequest>,
) -> Response {
    let result = process_inner(&state, &request_id, body).await;
    respond(&request_id, result)
}

async fn process_inner(
    state: &AppState,
    request_id: &str,
    body: ProcessRequest,
) -> Result<ProcessResponse> {
    let provider = parse_provider(&body.llm_provider)?;

    // The submitted URL must pass the safety policy before anything else.
    let policy = UrlPolicy {
        // The whitelist constrains vendor endpoints, not video sources.
        enforce_whitelist: false,
        ..UrlPolicy::from_security(&state.config.security)
    };
    is_safe_base_url(&body.video_url, &policy).await?;

    check_backpressure(state).await?;

    let task = state
        .registry
        .create(
            TaskSource::Url {
                value: body.video_url.clone(),
            },
            request_id.to_string(),
        )
        .await?;

    info!(task_id = %task.id, provider = provider.as_str(), "Task submitted");

    state.pipeline.submit(
        task.id.clone(),
        RunOptions {
            provider,
            api_override: body.api_config,
            cookies: body.youtube_cookies,
        },
    )?;

    Ok(ProcessResponse { task_id: task.id })
}

/// POST /api/upload (multipart)
///
/// Stages the file under the task's working directory; the task sits in the
/// `uploaded` state until `/api/process-upload` starts the pipeline.
async fn upload(
    State(state): State<AppState>,
    ReqId(request_id): ReqId,
    multipart: Multipart,
) -> Response {
    let result = upload_inner(&state, &request_id, multipart).await;
    respond(&request_id, result)
}

async fn upload_inner(
    state: &AppState,
    request_id: &str,
    mut multipart: Multipart,
) -> Result<UploadResponse> {
    let max_bytes = state.config.system.max_file_size_mb * 1024 * 1024;

    loop {
        let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|e| Error::BadRequest(format!("malformed multipart body: {}", e)))?
        else {
            return Err(Error::BadRequest("missing file field".to_string()));
        };
        if field.name() != Some("file") {
            continue;
        }

        let original_name = field
            .file_name()
            .map(sanitize_filename)
            .unwrap_or_else(|| "upload".to_string());

        let task = state
            .registry
            .create(
                TaskSource::Upload {
                    path: PathBuf::new(),
                },
                request_id.to_string(),
            )
            .await?;

        let staged = stage_upload(state, &task.id, &original_name, &mut field, max_bytes).await;
        return match staged {
            Ok((path, size)) => {
                let stored = path.clone();
                let title = std::path::Path::new(&original_name)
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| original_name.clone());
                state
                    .registry
                    .update(&task.id, move |t| {
                        t.source = TaskSource::Upload { path: stored };
                        t.stage_detail = "文件已上传, 等待处理".to_string();
                        t.media = Some(crate::models::VideoInfo {
                            title,
                            uploader: "上传文件".to_string(),
                            duration_seconds: 0.0,
                            source_url: None,
                        });
                    })
                    .await?;

                info!(task_id = %task.id, size, "Upload staged");
                Ok(UploadResponse {
                    task_id: task.id,
                    file_name: original_name,
                    size,
                })
            }
            Err(e) => {
                // No half-staged tasks: drop the record and its directory.
                let _ = state.registry.delete(&task.id).await;
                let _ = state.files.delete_task(&task.id);
                Err(e)
            }
        };
    }
}

async fn stage_upload(
    state: &AppState,
    task_id: &str,
    original_name: &str,
    field: &mut axum::extract::multipart::Field<'_>,
    max_bytes: u64,
) -> Result<(PathBuf, u64)> {
    use tokio::io::AsyncWriteExt;

    let extension = std::path::Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    let file_name = format!("upload.{}", extension);

    let dir = safe_join(&state.config.system.temp_dir, [task_id])?;
    tokio::fs::create_dir_all(&dir).await?;
    let path = safe_join(&state.config.system.temp_dir, [task_id, file_name.as_str()])?;

    let mut file = tokio::fs::File::create(&path).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| Error::BadRequest(format!("upload interrupted: {}", e)))?
    {
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(Error::BadRequest(format!(
                "file exceeds the {} MB limit",
                state.config.system.max_file_size_mb
            )));
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    if written == 0 {
        return Err(Error::BadRequest("uploaded file is empty".to_string()));
    }
    Ok((path, written))
}

/// POST /api/process-upload
async fn process_upload(
    State(state): State<AppState>,
    ReqId(request_id): ReqId,
    axum::Json(body): axum::Json<ProcessUploadRequest>,
) -> Response {
    let result = process_upload_inner(&state, body).await;
    respond(&request_id, result)
}

async fn process_upload_inner(
    state: &AppState,
    body: ProcessUploadRequest,
) -> Result<ProcessResponse> {
    let provider = parse_provider(&body.llm_provider)?;

    let task = state
        .registry
        .get(&body.task_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("task {}", body.task_id)))?;

    if task.status != TaskStatus::Uploaded {
        return Err(Error::BadRequest(format!(
            "task is not awaiting processing (status: {:?})",
            task.status
        )));
    }

    check_backpressure(state).await?;

    state
        .registry
        .update(&body.task_id, |t| {
            t.status = TaskStatus::Pending;
        })
        .await?;

    state.pipeline.submit(
        body.task_id.clone(),
        RunOptions {
            provider,
            api_override: body.api_config,
            cookies: None,
        },
    )?;

    Ok(ProcessResponse {
        task_id: body.task_id,
    })
}
