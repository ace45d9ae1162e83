//! Result records serialized into `data.json`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Media metadata emitted by the fetcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub title: String,
    pub uploader: String,
    pub duration_seconds: f64,
    /// Original submission URL; None for uploads
    pub source_url: Option<String>,
}

/// One transcribed span in absolute task-audio coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    pub index: u32,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Full speech-to-text output for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub segments: Vec<TranscriptionSegment>,
    pub full_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_confidence: Option<f64>,
}

impl TranscriptionResult {
    /// Assemble from ordered segments; `full_text` joins segment texts with
    /// blank lines, `mean_confidence` averages whatever confidences exist.
    pub fn from_segments(segments: Vec<TranscriptionSegment>) -> Self {
        let full_text = segments
            .iter()
            .map(|s| s.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        let confidences: Vec<f64> = segments.iter().filter_map(|s| s.confidence).collect();
        let mean_confidence = if confidences.is_empty() {
            None
        } else {
            Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
        };

        Self {
            segments,
            full_text,
            mean_confidence,
        }
    }
}

/// LLM summary output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub brief_summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub detailed_summary_markdown: String,
}

/// LLM content-analysis output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub content_type: String,
    pub sentiment: String,
    pub language_style: String,
    pub estimated_difficulty: String,
    pub target_audience: String,
    #[serde(default)]
    pub main_topics: Vec<String>,
}

/// A section of `data.json` that may have failed without failing the task.
///
/// Serialized untagged: a successful section is the record itself, a failed
/// one is `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SectionOutcome<T> {
    Ok(T),
    Err { error: String },
}

impl<T> SectionOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, SectionOutcome::Ok(_))
    }

    pub fn as_ok(&self) -> Option<&T> {
        match self {
            SectionOutcome::Ok(v) => Some(v),
            SectionOutcome::Err { .. } => None,
        }
    }
}

impl<T> From<Result<T, vscribe_common::Error>> for SectionOutcome<T> {
    fn from(result: Result<T, vscribe_common::Error>) -> Self {
        match result {
            Ok(v) => SectionOutcome::Ok(v),
            Err(e) => SectionOutcome::Err {
                error: e.to_string(),
            },
        }
    }
}

/// Per-sub-stage elapsed seconds recorded in `data.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<f64>,
}

/// The complete JSON record written as `data.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRecord {
    pub task_id: String,
    pub media: VideoInfo,
    pub transcript: TranscriptionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SectionOutcome<SummaryResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<SectionOutcome<AnalysisResult>>,
    pub timings: Timings,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(index: u32, start: f64, end: f64, text: &str) -> TranscriptionSegment {
        TranscriptionSegment {
            index,
            start_seconds: start,
            end_seconds: end,
            text: text.to_string(),
            confidence: None,
        }
    }

    #[test]
    fn full_text_joins_segments() {
        let result = TranscriptionResult::from_segments(vec![
            segment(0, 0.0, 300.0, "first block"),
            segment(1, 300.0, 540.0, "second block"),
        ]);
        assert_eq!(result.full_text, "first block\n\nsecond block");
        assert!(result.mean_confidence.is_none());
    }

    #[test]
    fn mean_confidence_averages_known_values() {
        let mut a = segment(0, 0.0, 10.0, "a");
        a.confidence = Some(0.9);
        let b = segment(1, 10.0, 20.0, "b");
        let mut c = segment(2, 20.0, 30.0, "c");
        c.confidence = Some(0.7);

        let result = TranscriptionResult::from_segments(vec![a, b, c]);
        let mean = result.mean_confidence.unwrap();
        assert!((mean - 0.8).abs() < 1e-9);
    }

    #[test]
    fn section_outcome_serializes_error_shape() {
        let failed: SectionOutcome<SummaryResult> = SectionOutcome::Err {
            error: "vendor returned 500".to_string(),
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["error"], "vendor returned 500");

        let ok = SectionOutcome::Ok(SummaryResult {
            brief_summary: "b".to_string(),
            keywords: vec!["k".to_string()],
            detailed_summary_markdown: "## d".to_string(),
        });
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["brief_summary"], "b");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn data_record_segment_list_round_trips_bit_identical() {
        let record = DataRecord {
            task_id: "t1".to_string(),
            media: VideoInfo {
                title: "题目".to_string(),
                uploader: "up".to_string(),
                duration_seconds: 540.0,
                source_url: Some("https://example.com/v".to_string()),
            },
            transcript: TranscriptionResult::from_segments(vec![
                segment(0, 0.0, 300.0, "第一段"),
                segment(1, 300.0, 540.0, "第二段"),
            ]),
            summary: None,
            analysis: None,
            timings: Timings::default(),
            created_at: Utc::now(),
            completed_at: Utc::now(),
        };

        let json = serde_json::to_string_pretty(&record).unwrap();
        let back: DataRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.transcript.segments, record.transcript.segments);
        assert_eq!(back.transcript.full_text, record.transcript.full_text);
    }
}
