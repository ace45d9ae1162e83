//! Data model for tasks and pipeline results

mod records;
mod task;

pub use records::{
    AnalysisResult, DataRecord, SectionOutcome, SummaryResult, Timings, TranscriptionResult,
    TranscriptionSegment, VideoInfo,
};
pub use task::{
    ArtifactKind, Stage, Task, TaskError, TaskSource, TaskStatus, TaskSummary, TranslationStatus,
};
