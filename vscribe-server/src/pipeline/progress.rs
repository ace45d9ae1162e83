//! Progress projection and the reporter capability
//!
//! Progress is a monotonic projection from pipeline stage (plus intra-stage
//! fraction during transcription) onto 0-100. Stages write progress only
//! through a `ProgressReporter`, which routes every mutation through the
//! registry actor; nothing in the pipeline touches shared state directly.

use crate::models::{Stage, TaskStatus, VideoInfo};
use crate::registry::RegistryHandle;
use vscribe_common::Result;

/// Progress value at the entry of each stage.
///
/// Spans: fetching 0→15, extracting 15→25, transcribing 25→70,
/// polishing 70→80, summarizing 80→90, analyzing 90→97, writing 97→100.
pub fn stage_entry_progress(stage: Stage) -> u8 {
    match stage {
        Stage::FetchingInfo => 0,
        Stage::Downloading => 5,
        Stage::Extracting => 15,
        Stage::Transcribing => 25,
        Stage::Polishing => 70,
        Stage::Summarizing => 80,
        Stage::Analyzing => 90,
        Stage::Writing => 97,
        Stage::Done => 100,
    }
}

/// Intra-transcription projection: 25 + (done / total) × 45.
pub fn transcribing_progress(done: u32, total: u32) -> u8 {
    if total == 0 {
        return stage_entry_progress(Stage::Transcribing);
    }
    let fraction = f64::from(done.min(total)) / f64::from(total);
    (25.0 + fraction * 45.0).round() as u8
}

/// Capability handed to each pipeline stage for publishing progress.
///
/// All writes flow through the registry actor, which also enforces that
/// progress never decreases.
#[derive(Clone)]
pub struct ProgressReporter {
    registry: RegistryHandle,
    task_id: String,
}

impl ProgressReporter {
    pub fn new(registry: RegistryHandle, task_id: String) -> Self {
        Self { registry, task_id }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Mark the task as actively processing.
    pub async fn begin(&self) -> Result<()> {
        self.registry
            .update(&self.task_id, |task| {
                task.status = TaskStatus::Processing;
            })
            .await
            .map(|_| ())
    }

    /// Enter a stage: sets the stage label, its entry progress, and the
    /// current-operation detail.
    pub async fn enter_stage(&self, stage: Stage, detail: impl Into<String>) -> Result<()> {
        let detail = detail.into();
        tracing::info!(task_id = %self.task_id, stage = stage.label(), "Stage transition");
        self.registry
            .update(&self.task_id, move |task| {
                task.stage = stage;
                task.stage_detail = detail;
                task.set_progress(stage_entry_progress(stage));
            })
            .await
            .map(|_| ())
    }

    /// Update the free-form operation description without moving progress.
    pub async fn detail(&self, detail: impl Into<String>) -> Result<()> {
        let detail = detail.into();
        self.registry
            .update(&self.task_id, move |task| {
                task.stage_detail = detail;
            })
            .await
            .map(|_| ())
    }

    /// Record fetched media metadata.
    pub async fn media(&self, info: VideoInfo) -> Result<()> {
        self.registry
            .update(&self.task_id, move |task| {
                task.media = Some(info);
            })
            .await
            .map(|_| ())
    }

    /// Record the planned segment count.
    pub async fn segments_total(&self, total: u32) -> Result<()> {
        self.registry
            .update(&self.task_id, move |task| {
                task.segments_total = total;
            })
            .await
            .map(|_| ())
    }

    /// Record segment completion and project transcription progress.
    pub async fn segments(&self, done: u32, total: u32) -> Result<()> {
        self.registry
            .update(&self.task_id, move |task| {
                task.segments_done = done.min(total);
                task.segments_total = total;
                task.set_progress(transcribing_progress(done, total));
                task.stage_detail = format!("语音转文字 {}/{}", done.min(total), total);
            })
            .await
            .map(|_| ())
    }

    /// Record elapsed wall time for an AI sub-stage.
    pub async fn timing(&self, name: &str, elapsed_seconds: f64) -> Result<()> {
        let name = name.to_string();
        self.registry
            .update(&self.task_id, move |task| {
                task.ai_timings.insert(name, elapsed_seconds);
            })
            .await
            .map(|_| ())
    }
}
