//! Task record: the central entity of the service
//!
//! A task is created by the submission endpoint, advanced by the pipeline
//! engine through the task registry, and read by HTTP pollers as immutable
//! snapshots. The registry is the only writer; everything here is plain data
//! plus small invariant-preserving mutators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;
use vscribe_common::error::ErrorKind;

use super::records::VideoInfo;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// File received via upload, pipeline not started yet
    Uploaded,
    /// Queued, waiting for a worker slot
    Pending,
    /// A worker is driving the pipeline
    Processing,
    /// Terminal: all artifacts written
    Completed,
    /// Terminal: pipeline gave up
    Failed,
    /// Terminal: cancelled cooperatively
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Tasks counted against the backlog limit.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Processing)
    }
}

/// Coarse pipeline stage exposed to clients.
///
/// The label set is closed; the wire form is the localized label itself so
/// front-ends render it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "获取视频信息")]
    FetchingInfo,
    #[serde(rename = "下载音频")]
    Downloading,
    #[serde(rename = "处理音频")]
    Extracting,
    #[serde(rename = "语音转文字")]
    Transcribing,
    #[serde(rename = "生成逐字稿")]
    Polishing,
    #[serde(rename = "生成总结报告")]
    Summarizing,
    #[serde(rename = "内容分析")]
    Analyzing,
    #[serde(rename = "保存结果")]
    Writing,
    #[serde(rename = "完成")]
    Done,
}

impl Stage {
    /// Client-facing label (the serialized form).
    pub fn label(&self) -> &'static str {
        match self {
            Stage::FetchingInfo => "获取视频信息",
            Stage::Downloading => "下载音频",
            Stage::Extracting => "处理音频",
            Stage::Transcribing => "语音转文字",
            Stage::Polishing => "生成逐字稿",
            Stage::Summarizing => "生成总结报告",
            Stage::Analyzing => "内容分析",
            Stage::Writing => "保存结果",
            Stage::Done => "完成",
        }
    }
}

/// Where the media came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TaskSource {
    /// Submitted as a URL for the media fetcher
    Url { value: String },
    /// Uploaded file staged in the task's temp directory
    Upload { path: PathBuf },
}

/// Error captured on a failed task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&vscribe_common::Error> for TaskError {
    fn from(err: &vscribe_common::Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Status of the optional bilingual follow-up pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationStatus {
    Processing,
    Completed,
    Failed,
}

/// Kinds of downloadable artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Transcript,
    Timestamps,
    Summary,
    Data,
    Bilingual,
}

impl ArtifactKind {
    /// Wire name used in `/api/download/<id>/<kind>`.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "transcript" => Some(ArtifactKind::Transcript),
            "timestamps" => Some(ArtifactKind::Timestamps),
            "summary" => Some(ArtifactKind::Summary),
            "data" => Some(ArtifactKind::Data),
            "bilingual" => Some(ArtifactKind::Bilingual),
            _ => None,
        }
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            ArtifactKind::Transcript => "transcript",
            ArtifactKind::Timestamps => "timestamps",
            ArtifactKind::Summary => "summary",
            ArtifactKind::Data => "data",
            ArtifactKind::Bilingual => "bilingual",
        }
    }

    /// On-disk filename inside `output/<task_id>/`.
    pub fn file_name(&self) -> &'static str {
        match self {
            ArtifactKind::Transcript => "transcript.md",
            ArtifactKind::Timestamps => "transcript_timestamps.md",
            ArtifactKind::Summary => "summary.md",
            ArtifactKind::Data => "data.json",
            ArtifactKind::Bilingual => "bilingual.md",
        }
    }

    /// Suffix appended to the sanitized title for download filenames.
    pub fn download_suffix(&self) -> &'static str {
        match self {
            ArtifactKind::Transcript => "_transcript.md",
            ArtifactKind::Timestamps => "_timestamps.md",
            ArtifactKind::Summary => "_summary.md",
            ArtifactKind::Data => "_data.json",
            ArtifactKind::Bilingual => "_bilingual.md",
        }
    }
}

/// The durable record of one submission through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Opaque, URL-safe identifier
    pub id: String,
    pub status: TaskStatus,
    /// 0-100, monotonic non-decreasing within a run
    pub progress: u8,
    pub stage: Stage,
    /// Free-form current-operation description
    pub stage_detail: String,
    pub source: TaskSource,
    /// Populated after the media fetcher runs
    pub media: Option<VideoInfo>,
    /// Artifact kind → path relative to `output/<id>/`
    #[serde(default)]
    pub artifacts: BTreeMap<ArtifactKind, String>,
    /// Sub-stage name → elapsed seconds
    #[serde(default)]
    pub ai_timings: BTreeMap<String, f64>,
    pub segments_total: u32,
    pub segments_done: u32,
    pub error: Option<TaskError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub translation_status: Option<TranslationStatus>,
    /// Correlation id of the submitting request
    pub request_id: String,
}

impl Task {
    /// Create a new task. Upload sources begin in `uploaded` (awaiting a
    /// process-upload call); URL sources begin in `pending`.
    pub fn new(source: TaskSource, request_id: String) -> Self {
        let status = match source {
            TaskSource::Upload { .. } => TaskStatus::Uploaded,
            TaskSource::Url { .. } => TaskStatus::Pending,
        };
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().simple().to_string(),
            status,
            progress: 0,
            stage: Stage::FetchingInfo,
            stage_detail: String::new(),
            source,
            media: None,
            artifacts: BTreeMap::new(),
            ai_timings: BTreeMap::new(),
            segments_total: 0,
            segments_done: 0,
            error: None,
            created_at: now,
            updated_at: now,
            translation_status: None,
            request_id,
        }
    }

    /// Raise progress; never lowers it.
    pub fn set_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark failed with the given error, keeping progress where it was.
    pub fn fail(&mut self, error: &vscribe_common::Error) {
        self.status = TaskStatus::Failed;
        self.error = Some(TaskError::from(error));
    }

    /// One-line summary for the task list.
    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id.clone(),
            status: self.status,
            stage: self.stage,
            progress: self.progress,
            title: self.media.as_ref().map(|m| m.title.clone()),
            error_kind: self.error.as_ref().map(|e| e.kind),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Compact task view returned by the list endpoint, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: String,
    pub status: TaskStatus,
    pub stage: Stage,
    pub progress: u8,
    pub title: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
