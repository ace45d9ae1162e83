//! Artifact rendering and writing (pipeline stage `writing`)
//!
//! Everything lands under `output/<task_id>/` and every path is produced by
//! `safe_join` against the output root. The timestamped transcript always
//! derives from the raw STT segments; the polished text only affects
//! `transcript.md`.

use crate::models::{ArtifactKind, DataRecord, SummaryResult, TranscriptionSegment};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;
use vscribe_common::fsguard::safe_join;
use vscribe_common::time::format_range;
use vscribe_common::Result;

/// Render `transcript_timestamps.md`: one block per segment,
/// `[HH:MM:SS - HH:MM:SS] text`.
pub fn render_timestamps(segments: &[TranscriptionSegment]) -> String {
    let mut out = String::new();
    for segment in segments {
        out.push_str(&format_range(segment.start_seconds, segment.end_seconds));
        out.push(' ');
        out.push_str(&segment.text);
        out.push_str("\n\n");
    }
    out
}

/// Render `summary.md` from the summary record.
pub fn render_summary_markdown(title: &str, summary: &SummaryResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {} — 内容总结\n\n", title));
    out.push_str(&format!("**摘要**: {}\n\n", summary.brief_summary));
    if !summary.keywords.is_empty() {
        out.push_str(&format!("**关键词**: {}\n\n", summary.keywords.join("、")));
    }
    out.push_str(&summary.detailed_summary_markdown);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Write the artifact set for a completed run. Returns the artifact map
/// (kind → path relative to the task's output directory).
pub async fn write_artifacts(
    output_root: &Path,
    task_id: &str,
    transcript_text: &str,
    record: &DataRecord,
) -> Result<BTreeMap<ArtifactKind, String>> {
    let task_dir = safe_join(output_root, [task_id])?;
    tokio::fs::create_dir_all(&task_dir).await?;

    let mut artifacts = BTreeMap::new();

    let transcript_path = safe_join(output_root, [task_id, ArtifactKind::Transcript.file_name()])?;
    tokio::fs::write(&transcript_path, transcript_text.as_bytes()).await?;
    artifacts.insert(
        ArtifactKind::Transcript,
        ArtifactKind::Transcript.file_name().to_string(),
    );

    let timestamps_path =
        safe_join(output_root, [task_id, ArtifactKind::Timestamps.file_name()])?;
    tokio::fs::write(
        &timestamps_path,
        render_timestamps(&record.transcript.segments).as_bytes(),
    )
    .await?;
    artifacts.insert(
        ArtifactKind::Timestamps,
        ArtifactKind::Timestamps.file_name().to_string(),
    );

    if let Some(outcome) = &record.summary {
        if let Some(summary) = outcome.as_ok() {
            let summary_path =
                safe_join(output_root, [task_id, ArtifactKind::Summary.file_name()])?;
            tokio::fs::write(
                &summary_path,
                render_summary_markdown(&record.media.title, summary).as_bytes(),
            )
            .await?;
            artifacts.insert(
                ArtifactKind::Summary,
                ArtifactKind::Summary.file_name().to_string(),
            );
        }
    }

    let data_path = safe_join(output_root, [task_id, ArtifactKind::Data.file_name()])?;
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| vscribe_common::Error::Internal(format!("serialize data.json: {}", e)))?;
    tokio::fs::write(&data_path, json.as_bytes()).await?;
    artifacts.insert(ArtifactKind::Data, ArtifactKind::Data.file_name().to_string());

    info!(
        task_id,
        artifacts = artifacts.len(),
        dir = %task_dir.display(),
        "Artifacts written"
    );
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        SectionOutcome, Timings, TranscriptionResult, VideoInfo,
    };
    use chrono::Utc;

    fn segment(start: f64, end: f64, text: &str) -> TranscriptionSegment {
        TranscriptionSegment {
            index: 0,
            start_seconds: start,
            end_seconds: end,
            text: text.to_string(),
            confidence: None,
        }
    }

    #[test]
    fn timestamps_render_as_ranged_blocks() {
        let rendered = render_timestamps(&[
            segment(0.0, 300.0, "第一段内容"),
            segment(300.0, 512.0, "第二段内容"),
        ]);
        assert!(rendered.contains("[00:00:00 - 00:05:00] 第一段内容"));
        assert!(rendered.contains("[00:05:00 - 00:08:32] 第二段内容"));
    }

    #[test]
    fn summary_markdown_includes_keywords_line_only_when_present() {
        let summary = SummaryResult {
            brief_summary: "简短摘要".to_string(),
            keywords: vec!["一".to_string(), "二".to_string()],
            detailed_summary_markdown: "## 详情\n内容".to_string(),
        };
        let with = render_summary_markdown("标题", &summary);
        assert!(with.contains("**关键词**: 一、二"));

        let without = render_summary_markdown(
            "标题",
            &SummaryResult {
                keywords: Vec::new(),
                ..summary
            },
        );
        assert!(!without.contains("关键词"));
    }

    fn record(with_summary: bool) -> DataRecord {
        DataRecord {
            task_id: "t1".to_string(),
            media: VideoInfo {
                title: "标题".to_string(),
                uploader: "up".to_string(),
                duration_seconds: 512.0,
                source_url: None,
            },
            transcript: TranscriptionResult::from_segments(vec![
                segment(0.0, 300.0, "一"),
                segment(300.0, 512.0, "二"),
            ]),
            summary: Some(if with_summary {
                SectionOutcome::Ok(SummaryResult {
                    brief_summary: "b".to_string(),
                    keywords: Vec::new(),
                    detailed_summary_markdown: "d".to_string(),
                })
            } else {
                SectionOutcome::Err {
                    error: "vendor returned 500".to_string(),
                }
            }),
            analysis: None,
            timings: Timings::default(),
            created_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn writes_full_artifact_set() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = write_artifacts(dir.path(), "t1", "润色后的文本", &record(true))
            .await
            .unwrap();

        assert!(artifacts.contains_key(&ArtifactKind::Transcript));
        assert!(artifacts.contains_key(&ArtifactKind::Timestamps));
        assert!(artifacts.contains_key(&ArtifactKind::Summary));
        assert!(artifacts.contains_key(&ArtifactKind::Data));

        let transcript =
            std::fs::read_to_string(dir.path().join("t1/transcript.md")).unwrap();
        assert_eq!(transcript, "润色后的文本");

        // data.json round-trips to the same segment list
        let json = std::fs::read_to_string(dir.path().join("t1/data.json")).unwrap();
        let back: DataRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.transcript.segments.len(), 2);
    }

    #[tokio::test]
    async fn failed_summary_is_recorded_but_not_rendered() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = write_artifacts(dir.path(), "t2", "raw", &record(false))
            .await
            .unwrap();

        assert!(!artifacts.contains_key(&ArtifactKind::Summary));
        assert!(!dir.path().join("t2/summary.md").exists());

        let json = std::fs::read_to_string(dir.path().join("t2/data.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["summary"]["error"], "vendor returned 500");
    }
}
