//! Staged pipeline engine
//!
//! One dispatcher loop admits queued tasks FIFO under a global semaphore;
//! each admitted task runs on its own worker through the fixed stage
//! sequence, reporting progress through the registry and checking its
//! cancellation token at every stage boundary (and between STT segments).
//! Sub-operations are sequential by design.

use crate::models::{
    DataRecord, SectionOutcome, Stage, Task, TaskSource, TaskStatus, Timings, TranslationStatus,
    VideoInfo,
};
use crate::pipeline::artifacts::write_artifacts;
use crate::pipeline::progress::ProgressReporter;
use crate::registry::RegistryHandle;
use crate::services::audio_processor;
use crate::services::llm::{effective_endpoint, ApiOverride, LlmClient, ProviderKind};
use crate::services::media_fetcher::{CookieFile, MediaFetcher};
use crate::services::stt_client::{self, HttpSttClient, SttSettings};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vscribe_common::config::{ApiEndpoint, AppConfig};
use vscribe_common::fsguard::{is_within, safe_join};
use vscribe_common::urlguard::UrlPolicy;
use vscribe_common::{Error, Result};

/// Per-run options captured at submission time
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub provider: ProviderKind,
    pub api_override: Option<ApiOverride>,
    /// Raw cookie file contents for the downloader
    pub cookies: Option<String>,
}

struct Inner {
    config: Arc<AppConfig>,
    registry: RegistryHandle,
    semaphore: Arc<Semaphore>,
    tokens: RwLock<HashMap<String, CancellationToken>>,
}

/// Handle to the running engine
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
    queue_tx: mpsc::UnboundedSender<(String, RunOptions)>,
}

impl Pipeline {
    /// Spawn the dispatcher and return the handle.
    pub fn start(config: Arc<AppConfig>, registry: RegistryHandle) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            semaphore: Arc::new(Semaphore::new(config.server.max_active_tasks.max(1))),
            config,
            registry,
            tokens: RwLock::new(HashMap::new()),
        });

        tokio::spawn(dispatch_loop(inner.clone(), queue_rx));
        Self { inner, queue_tx }
    }

    /// Queue a pending task for execution (FIFO admission).
    pub fn submit(&self, task_id: String, options: RunOptions) -> Result<()> {
        self.queue_tx
            .send((task_id, options))
            .map_err(|_| Error::Internal("pipeline dispatcher is not running".to_string()))
    }

    /// Cancel one task's run, if it is currently executing.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let tokens = self.inner.tokens.read().await;
        match tokens.get(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every active task: running workers observe their token at the
    /// next checkpoint; queued tasks that have not started are flipped to
    /// `cancelled` directly so the dispatcher skips them.
    pub async fn cancel_all(&self) -> Result<usize> {
        let mut cancelled = 0;

        {
            let tokens = self.inner.tokens.read().await;
            for token in tokens.values() {
                token.cancel();
                cancelled += 1;
            }
        }

        for summary in self.inner.registry.list().await? {
            if summary.status == TaskStatus::Pending {
                let running = {
                    let tokens = self.inner.tokens.read().await;
                    tokens.contains_key(&summary.id)
                };
                if !running {
                    self.inner
                        .registry
                        .update(&summary.id, |task| {
                            task.status = TaskStatus::Cancelled;
                            task.stage_detail = "任务已取消".to_string();
                        })
                        .await?;
                    cancelled += 1;
                }
            }
        }

        info!(count = cancelled, "Stop-all: active tasks cancelled");
        Ok(cancelled)
    }

    /// Start the bilingual follow-up pass for a completed task.
    ///
    /// Runs as a subordinate operation: it flips `translation_status`, never
    /// `status`.
    pub fn start_translation(
        &self,
        task: Task,
        provider: ProviderKind,
        api_override: Option<ApiOverride>,
        target_language: String,
    ) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let task_id = task.id.clone();
            if let Err(e) =
                run_translation(&inner, task, provider, api_override, target_language).await
            {
                error!(task_id = %task_id, error = %e, "Bilingual translation failed");
                let _ = inner
                    .registry
                    .update(&task_id, |t| {
                        t.translation_status = Some(TranslationStatus::Failed);
                    })
                    .await;
            }
        });
    }
}

/// FIFO admission under the global semaphore.
async fn dispatch_loop(
    inner: Arc<Inner>,
    mut queue_rx: mpsc::UnboundedReceiver<(String, RunOptions)>,
) {
    while let Some((task_id, options)) = queue_rx.recv().await {
        let permit = match inner.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break, // semaphore closed, engine shutting down
        };

        // Skip tasks that left `pending` while queued (stop-all, delete).
        match inner.registry.get(&task_id).await {
            Ok(Some(task)) if task.status == TaskStatus::Pending => {}
            Ok(_) => {
                info!(task_id = %task_id, "Skipping queued task no longer pending");
                continue;
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Registry lookup failed at dispatch");
                continue;
            }
        }

        let token = CancellationToken::new();
        inner
            .tokens
            .write()
            .await
            .insert(task_id.clone(), token.clone());

        let inner_for_task = inner.clone();
        tokio::spawn(async move {
            let _permit = permit;
            run_task(inner_for_task, task_id, options, token).await;
        });
    }
}

/// Drive one task to a terminal state, whatever happens inside.
async fn run_task(inner: Arc<Inner>, task_id: String, options: RunOptions, token: CancellationToken) {
    info!(task_id = %task_id, provider = options.provider.as_str(), "Task worker started");

    let budget = Duration::from_secs(inner.config.system.processing_timeout_seconds.max(1));
    let outcome = tokio::time::timeout(
        budget,
        run_stages(&inner, &task_id, &options, &token),
    )
    .await;

    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e),
        // Dropping the staged future kills any in-flight subprocess.
        Err(_) => Some(Error::Timeout(format!(
            "task exceeded the {}s processing budget",
            budget.as_secs()
        ))),
    };

    match &failure {
        None => {
            info!(task_id = %task_id, "Task completed");
        }
        Some(Error::Cancelled) => {
            info!(task_id = %task_id, "Task cancelled");
            let _ = inner
                .registry
                .update(&task_id, |task| {
                    task.status = TaskStatus::Cancelled;
                    task.stage_detail = "任务已取消".to_string();
                })
                .await;
        }
        Some(e) => {
            warn!(task_id = %task_id, kind = e.kind().as_str(), error = %e, "Task failed");
            let kind = e.kind();
            let message = e.to_string();
            let _ = inner
                .registry
                .update(&task_id, move |task| {
                    task.status = TaskStatus::Failed;
                    task.error = Some(crate::models::TaskError { kind, message });
                })
                .await;
        }
    }

    inner.tokens.write().await.remove(&task_id);

    // Successful runs clean their working directory; failures and
    // cancellations keep partial outputs for post-mortem.
    if failure.is_none() && !inner.config.system.keep_temp_files {
        if let Ok(dir) = safe_join(&inner.config.system.temp_dir, [task_id.as_str()]) {
            if dir.exists() {
                if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                    warn!(task_id = %task_id, error = %e, "Failed to clean task temp directory");
                }
            }
        }
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Treat a sub-operation result as non-fatal, except for cancellation, which
/// always aborts the run.
fn non_fatal<T>(result: Result<T>) -> Result<std::result::Result<T, Error>> {
    match result {
        Ok(v) => Ok(Ok(v)),
        Err(Error::Cancelled) => Err(Error::Cancelled),
        Err(e) => Ok(Err(e)),
    }
}

fn endpoint_for(config: &AppConfig, provider: ProviderKind) -> &ApiEndpoint {
    match provider {
        ProviderKind::SiliconFlow => &config.apis.siliconflow,
        ProviderKind::OpenAiCompat => &config.apis.openai,
        ProviderKind::Gemini => &config.apis.gemini,
    }
}

/// The staged state machine for one task.
async fn run_stages(
    inner: &Arc<Inner>,
    task_id: &str,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    let config = &inner.config;
    let registry = &inner.registry;
    let reporter = ProgressReporter::new(registry.clone(), task_id.to_string());
    let policy = UrlPolicy::from_security(&config.security);
    let http_timeout = Duration::from_secs(config.system.http_timeout_seconds.max(1));

    let task = registry
        .get(task_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;

    let task_dir = safe_join(&config.system.temp_dir, [task_id])?;
    tokio::fs::create_dir_all(&task_dir).await?;

    reporter.begin().await?;

    // --- fetching: 0 → 15 -------------------------------------------------
    reporter.enter_stage(Stage::FetchingInfo, "获取视频信息").await?;

    let (audio_path, mut media) = match &task.source {
        TaskSource::Url { value } => {
            let fetcher = MediaFetcher::new(policy.clone(), config.system.max_file_size_mb);

            let cookie_file = match options.cookies.as_deref() {
                Some(contents) => Some(CookieFile::write(&task_dir, contents)?),
                None => None,
            };
            let cookie_path = cookie_file.as_ref().map(|c| c.path().to_path_buf());

            let info = fetcher
                .probe(value, cookie_path.as_deref(), cancel)
                .await?;
            reporter.media(info.clone()).await?;
            checkpoint(cancel)?;

            reporter.enter_stage(Stage::Downloading, "下载音频").await?;
            let audio = fetcher
                .download(value, &task_dir, cookie_path.as_deref(), cancel)
                .await?;
            // Cookie file is removed here on success; the Drop guard covers
            // every other exit path.
            drop(cookie_file);
            (audio, info)
        }
        TaskSource::Upload { path } => {
            if !is_within(&config.system.temp_dir, path) {
                return Err(Error::PathEscape(format!(
                    "uploaded file {} is outside the working root",
                    path.display()
                )));
            }
            // The upload handler recorded the original filename as the title.
            let info = task.media.clone().unwrap_or_else(|| VideoInfo {
                title: path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "upload".to_string()),
                uploader: "上传文件".to_string(),
                duration_seconds: 0.0,
                source_url: None,
            });
            reporter.media(info.clone()).await?;
            (path.clone(), info)
        }
    };
    checkpoint(cancel)?;

    // --- extracting: 15 → 25 ----------------------------------------------
    reporter.enter_stage(Stage::Extracting, "处理音频").await?;
    let duration = audio_processor::probe_duration(&audio_path).await?;
    if media.duration_seconds <= 0.0 {
        media.duration_seconds = duration;
        reporter.media(media.clone()).await?;
    }

    let plans = audio_processor::split_segments(
        &audio_path,
        &task_dir,
        duration,
        config.processing.long_audio_threshold_seconds,
        config.processing.segment_duration_seconds,
        cancel,
    )
    .await?;
    reporter.segments_total(plans.len() as u32).await?;
    checkpoint(cancel)?;

    // --- transcribing: 25 → 70 --------------------------------------------
    reporter.enter_stage(Stage::Transcribing, "语音转文字").await?;

    // Speech always goes through the SiliconFlow-compatible endpoint;
    // request-level overrides apply when that provider was selected.
    let stt_override = match options.provider {
        ProviderKind::SiliconFlow => options.api_override.as_ref(),
        _ => None,
    };
    let stt_endpoint = effective_endpoint(&config.apis.siliconflow, stt_override);
    vscribe_common::urlguard::is_safe_base_url(&stt_endpoint.base_url, &policy).await?;
    let stt = HttpSttClient::new(&stt_endpoint, http_timeout)?;
    let settings = SttSettings::from_processing(&config.processing);

    let transcription = stt_client::transcribe_all(&stt, &plans, &settings, cancel, |done, total| {
        reporter.segments(done, total)
    })
    .await?;
    checkpoint(cancel)?;

    // --- LLM post-processing ----------------------------------------------
    let llm_endpoint = effective_endpoint(
        endpoint_for(config, options.provider),
        options.api_override.as_ref(),
    );
    // Endpoint problems make every AI section fail soft; the task still
    // completes with the raw transcript.
    let llm = match LlmClient::connect(options.provider, llm_endpoint, &policy, http_timeout).await
    {
        Ok(client) => Ok(client),
        Err(e) => {
            warn!(task_id, error = %e, "LLM endpoint unavailable, AI sections will be skipped");
            Err(e.to_string())
        }
    };
    let llm_unavailable = |msg: &String| Error::Vendor(format!("LLM unavailable: {}", msg));

    // polishing: 70 → 80 (non-fatal, raw transcript fallback)
    reporter.enter_stage(Stage::Polishing, "生成逐字稿").await?;
    let started = Instant::now();
    let polish_outcome = match &llm {
        Ok(client) => non_fatal(client.polish(&transcription.full_text).await)?,
        Err(msg) => Err(llm_unavailable(msg)),
    };
    reporter
        .timing("transcript", started.elapsed().as_secs_f64())
        .await?;
    let transcript_text = match polish_outcome {
        Ok(polished) => polished,
        Err(e) => {
            warn!(task_id, error = %e, "Transcript polish failed, falling back to raw text");
            transcription.full_text.clone()
        }
    };
    checkpoint(cancel)?;

    // summarizing: 80 → 90 (non-fatal)
    reporter.enter_stage(Stage::Summarizing, "生成总结报告").await?;
    let started = Instant::now();
    let summary_outcome = match &llm {
        Ok(client) => non_fatal(client.summarize(&transcription.full_text).await)?,
        Err(msg) => Err(llm_unavailable(msg)),
    };
    reporter
        .timing("summary", started.elapsed().as_secs_f64())
        .await?;
    if let Err(e) = &summary_outcome {
        warn!(task_id, error = %e, "Summary generation failed (non-fatal)");
    }
    checkpoint(cancel)?;

    // analyzing: 90 → 97 (non-fatal)
    reporter.enter_stage(Stage::Analyzing, "内容分析").await?;
    let started = Instant::now();
    let analysis_outcome = match &llm {
        Ok(client) => non_fatal(client.analyze(&transcription.full_text).await)?,
        Err(msg) => Err(llm_unavailable(msg)),
    };
    reporter
        .timing("analysis", started.elapsed().as_secs_f64())
        .await?;
    if let Err(e) = &analysis_outcome {
        warn!(task_id, error = %e, "Content analysis failed (non-fatal)");
    }
    checkpoint(cancel)?;

    // --- writing: 97 → 100 -------------------------------------------------
    reporter.enter_stage(Stage::Writing, "保存结果").await?;

    let current = registry
        .get(task_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;
    let record = DataRecord {
        task_id: task_id.to_string(),
        media: media.clone(),
        transcript: transcription.clone(),
        summary: Some(SectionOutcome::from(summary_outcome)),
        analysis: Some(SectionOutcome::from(analysis_outcome)),
        timings: Timings {
            transcript: current.ai_timings.get("transcript").copied(),
            summary: current.ai_timings.get("summary").copied(),
            analysis: current.ai_timings.get("analysis").copied(),
        },
        created_at: current.created_at,
        completed_at: chrono::Utc::now(),
    };

    let artifacts =
        write_artifacts(&config.system.output_dir, task_id, &transcript_text, &record).await?;

    registry
        .update(task_id, move |task| {
            task.artifacts = artifacts;
            task.status = TaskStatus::Completed;
            task.stage = Stage::Done;
            task.stage_detail = "完成".to_string();
            task.set_progress(100);
        })
        .await?;

    Ok(())
}

/// The bilingual follow-up pass.
async fn run_translation(
    inner: &Arc<Inner>,
    task: Task,
    provider: ProviderKind,
    api_override: Option<ApiOverride>,
    target_language: String,
) -> Result<()> {
    let config = &inner.config;
    let task_id = task.id.clone();

    inner
        .registry
        .update(&task_id, |t| {
            t.translation_status = Some(TranslationStatus::Processing);
        })
        .await?;

    let transcript_path = safe_join(
        &config.system.output_dir,
        [task_id.as_str(), crate::models::ArtifactKind::Transcript.file_name()],
    )?;
    let transcript = tokio::fs::read_to_string(&transcript_path).await?;

    let policy = UrlPolicy::from_security(&config.security);
    let endpoint = effective_endpoint(endpoint_for(config, provider), api_override.as_ref());
    let llm = LlmClient::connect(
        provider,
        endpoint,
        &policy,
        Duration::from_secs(config.system.http_timeout_seconds.max(1)),
    )
    .await?;

    let bilingual = llm.translate(&transcript, &target_language).await?;

    let bilingual_path = safe_join(
        &config.system.output_dir,
        [task_id.as_str(), crate::models::ArtifactKind::Bilingual.file_name()],
    )?;
    tokio::fs::write(&bilingual_path, bilingual.as_bytes()).await?;

    inner
        .registry
        .update(&task_id, |t| {
            t.translation_status = Some(TranslationStatus::Completed);
            t.artifacts.insert(
                crate::models::ArtifactKind::Bilingual,
                crate::models::ArtifactKind::Bilingual.file_name().to_string(),
            );
        })
        .await?;

    info!(task_id = %task_id, "Bilingual translation completed");
    Ok(())
}
