//! STT client: per-segment uploads with retry and timestamp alignment
//!
//! Each audio segment is posted to the speech vendor as multipart form data.
//! Vendor text is cleaned (event markers stripped, whitespace normalized) and
//! vendor-relative timings are shifted into absolute task-audio coordinates.
//! The segment loop carries a consecutive-failure counter: a run of failures
//! aborts the whole transcription rather than grinding through a dead vendor.

use crate::models::{TranscriptionResult, TranscriptionSegment};
use crate::services::audio_processor::SegmentPlan;
use reqwest::multipart;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use vscribe_common::config::ApiEndpoint;
use vscribe_common::{Error, Result};

/// Vendor-relative timing span
#[derive(Debug, Clone, PartialEq)]
pub struct VendorSpan {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Raw vendor response for one audio segment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VendorTranscript {
    pub text: String,
    pub spans: Vec<VendorSpan>,
    pub confidence: Option<f64>,
}

/// Capability implemented by the HTTP client (and by scripted fakes in
/// tests): transcribe one planned segment.
pub trait SegmentTranscriber {
    fn transcribe(
        &self,
        plan: &SegmentPlan,
    ) -> impl Future<Output = Result<VendorTranscript>> + Send;
}

/// Knobs for the segment loop, from the `processing` config section
#[derive(Debug, Clone)]
pub struct SttSettings {
    pub max_consecutive_failures: u32,
    pub short_audio_max_retries: u32,
    pub sleep_short: Duration,
    pub sleep_long: Duration,
}

impl SttSettings {
    pub fn from_processing(p: &vscribe_common::config::ProcessingConfig) -> Self {
        Self {
            max_consecutive_failures: p.max_consecutive_failures.max(1),
            short_audio_max_retries: p.short_audio_max_retries.max(1),
            sleep_short: Duration::from_secs_f64(p.retry_sleep_short_seconds.max(0.0)),
            sleep_long: Duration::from_secs_f64(p.retry_sleep_long_seconds.max(0.0)),
        }
    }
}

/// Transcribe all planned segments in order.
///
/// `on_progress(done, total)` fires after every completed segment; the
/// cancellation token is checked before every upload.
pub async fn transcribe_all<T, F, Fut>(
    transcriber: &T,
    plans: &[SegmentPlan],
    settings: &SttSettings,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<TranscriptionResult>
where
    T: SegmentTranscriber,
    F: FnMut(u32, u32) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let total = plans.len() as u32;

    if plans.len() == 1 {
        let plan = &plans[0];
        let policy = crate::utils::retry::RetryPolicy::attempts(
            settings.short_audio_max_retries,
            settings.sleep_long,
        );
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let vendor =
            crate::utils::retry::retry("stt_segment", &policy, || transcriber.transcribe(plan))
                .await?;
        let segments = finalize_segments(align_segment(plan, &vendor));
        on_progress(1, total).await?;
        return Ok(TranscriptionResult::from_segments(segments));
    }

    let mut aligned: Vec<TranscriptionSegment> = Vec::new();
    let mut consecutive_failures = 0u32;
    let mut done = 0u32;
    let mut idx = 0usize;

    while idx < plans.len() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let plan = &plans[idx];
        debug!(segment = plan.index, total, "Uploading segment for transcription");

        match transcriber.transcribe(plan).await {
            Ok(vendor) => {
                consecutive_failures = 0;
                aligned.extend(align_segment(plan, &vendor));
                done += 1;
                on_progress(done, total).await?;
                idx += 1;
                if idx < plans.len() && !settings.sleep_short.is_zero() {
                    tokio::time::sleep(settings.sleep_short).await;
                }
            }
            Err(err) if err.is_retryable() => {
                consecutive_failures += 1;
                warn!(
                    segment = plan.index,
                    consecutive_failures,
                    limit = settings.max_consecutive_failures,
                    error = %err,
                    "Segment transcription failed"
                );
                if consecutive_failures >= settings.max_consecutive_failures {
                    return Err(Error::SttConsecutiveFailures(format!(
                        "{} consecutive segment failures, last: {}",
                        consecutive_failures, err
                    )));
                }
                if !settings.sleep_long.is_zero() {
                    tokio::time::sleep(settings.sleep_long).await;
                }
                // Same segment is attempted again.
            }
            Err(err) => return Err(err),
        }
    }

    info!(segments = done, "Transcription complete");
    Ok(TranscriptionResult::from_segments(finalize_segments(
        aligned,
    )))
}

/// Shift a vendor transcript into absolute coordinates for its segment.
///
/// Vendor spans are clamped into the segment's window; a vendor response
/// without timing attributes the whole window to the text as a single range.
pub fn align_segment(plan: &SegmentPlan, vendor: &VendorTranscript) -> Vec<TranscriptionSegment> {
    let cleaned_spans: Vec<(f64, f64, String)> = vendor
        .spans
        .iter()
        .filter_map(|span| {
            let text = normalize_text(&strip_event_markers(&span.text));
            if text.is_empty() {
                return None;
            }
            let start = (plan.start_seconds + span.start.max(0.0)).min(plan.end_seconds);
            let end = (plan.start_seconds + span.end.max(0.0)).min(plan.end_seconds);
            Some((start, end, text))
        })
        .collect();

    if cleaned_spans.is_empty() {
        let text = normalize_text(&strip_event_markers(&vendor.text));
        if text.is_empty() {
            return Vec::new();
        }
        return vec![TranscriptionSegment {
            index: 0,
            start_seconds: plan.start_seconds,
            end_seconds: plan.end_seconds,
            text,
            confidence: vendor.confidence,
        }];
    }

    cleaned_spans
        .into_iter()
        .map(|(start, end, text)| TranscriptionSegment {
            index: 0,
            start_seconds: start,
            end_seconds: end,
            text,
            confidence: vendor.confidence,
        })
        .collect()
}

/// Re-index and enforce ordering across the concatenated segment list:
/// starts never precede the previous end, and spans that collapse to nothing
/// are folded into their predecessor instead of producing an inverted range.
pub fn finalize_segments(mut segments: Vec<TranscriptionSegment>) -> Vec<TranscriptionSegment> {
    segments.sort_by(|a, b| {
        a.start_seconds
            .partial_cmp(&b.start_seconds)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut out: Vec<TranscriptionSegment> = Vec::with_capacity(segments.len());
    for mut segment in segments {
        if let Some(prev) = out.last_mut() {
            if segment.start_seconds < prev.end_seconds {
                segment.start_seconds = prev.end_seconds;
            }
            if segment.end_seconds <= segment.start_seconds {
                // Collapsed by clamping: keep the words, merge into predecessor.
                if !segment.text.is_empty() {
                    prev.text.push('\n');
                    prev.text.push_str(&segment.text);
                }
                continue;
            }
        } else if segment.end_seconds <= segment.start_seconds {
            continue;
        }
        out.push(segment);
    }

    for (index, segment) in out.iter_mut().enumerate() {
        segment.index = index as u32;
    }
    out
}

/// Remove vendor event markers (`<|...|>` control tokens).
pub fn strip_event_markers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '<' && chars.peek() == Some(&'|') {
            // Skip to the matching "|>"; an unterminated marker eats the rest.
            let mut prev = '\0';
            for inner in chars.by_ref() {
                if prev == '|' && inner == '>' {
                    break;
                }
                prev = inner;
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Collapse runs of spaces/tabs while preserving newlines as sentence
/// boundaries; blank lines disappear.
pub fn normalize_text(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<WireSpan>,
}

#[derive(Debug, Deserialize)]
struct WireSpan {
    #[serde(default)]
    start: f64,
    #[serde(default)]
    end: f64,
    #[serde(default)]
    text: String,
}

/// Speech vendor client speaking the OpenAI-compatible
/// `audio/transcriptions` multipart shape.
pub struct HttpSttClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    model: String,
}

impl HttpSttClient {
    /// Build from a (pre-vetted) endpoint. The base URL must already have
    /// passed the SSRF guard.
    pub fn new(endpoint: &ApiEndpoint, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(endpoint.base_url.trim_end_matches('/'))
            .map_err(|_| Error::UrlRejected("STT base URL is not valid".to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("build http client: {}", e)))?;
        Ok(Self {
            http,
            base_url,
            api_key: endpoint.api_key.clone(),
            model: endpoint.model.clone(),
        })
    }

    fn endpoint_url(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url.as_str().trim_end_matches('/'))
    }
}

impl SegmentTranscriber for HttpSttClient {
    async fn transcribe(&self, plan: &SegmentPlan) -> Result<VendorTranscript> {
        let bytes = tokio::fs::read(&plan.path).await?;
        let file_name = plan
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("segment.mp3")
            .to_string();

        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/mpeg")
            .map_err(|e| Error::Internal(format!("build multipart: {}", e)))?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");

        let response = self
            .http
            .post(self.endpoint_url())
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    Error::Network(format!("STT request failed: {}", e))
                } else {
                    Error::Vendor(format!("STT request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::VendorRateLimited(
                "STT vendor rate limit exceeded".to_string(),
            ));
        }
        if !status.is_success() {
            let body: String = response.text().await.unwrap_or_default();
            return Err(Error::Vendor(format!(
                "STT vendor returned {}: {}",
                status,
                body.chars().take(300).collect::<String>()
            )));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| Error::Vendor(format!("unparseable STT response: {}", e)))?;

        Ok(VendorTranscript {
            text: wire.text,
            spans: wire
                .segments
                .into_iter()
                .map(|s| VendorSpan {
                    start: s.start,
                    end: s.end,
                    text: s.text,
                })
                .collect(),
            confidence: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn strips_event_markers() {
        assert_eq!(strip_event_markers("hello <|beep|>world"), "hello world");
        assert_eq!(strip_event_markers("<|s|><|e|>text"), "text");
        assert_eq!(strip_event_markers("no markers"), "no markers");
        // Unterminated marker eats the rest rather than leaking control text
        assert_eq!(strip_event_markers("ok <|oops"), "ok ");
        // A bare '<' is not a marker
        assert_eq!(strip_event_markers("a < b"), "a < b");
    }

    #[test]
    fn normalizes_whitespace_preserving_newlines() {
        assert_eq!(normalize_text("a   b\t c"), "a b c");
        assert_eq!(normalize_text("line one\n\n\nline two"), "line one\nline two");
        assert_eq!(normalize_text("  padded  \n next "), "padded\nnext");
    }

    fn plan(index: u32, start: f64, end: f64) -> SegmentPlan {
        SegmentPlan {
            index,
            path: std::path::PathBuf::from(format!("segment_{:04}.mp3", index)),
            start_seconds: start,
            end_seconds: end,
        }
    }

    #[test]
    fn aligns_vendor_spans_to_absolute_time() {
        let vendor = VendorTranscript {
            text: String::new(),
            spans: vec![
                VendorSpan {
                    start: 0.0,
                    end: 4.5,
                    text: "第一句".to_string(),
                },
                VendorSpan {
                    start: 4.5,
                    end: 9.0,
                    text: "第二句".to_string(),
                },
            ],
            confidence: None,
        };
        let segments = align_segment(&plan(1, 300.0, 600.0), &vendor);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].start_seconds, 300.0);
        assert_eq!(segments[0].end_seconds, 304.5);
        assert_eq!(segments[1].start_seconds, 304.5);
        assert_eq!(segments[1].end_seconds, 309.0);
    }

    #[test]
    fn vendor_without_timing_gets_whole_span() {
        let vendor = VendorTranscript {
            text: "all the words".to_string(),
            spans: Vec::new(),
            confidence: Some(0.93),
        };
        let segments = align_segment(&plan(0, 0.0, 120.0), &vendor);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start_seconds, 0.0);
        assert_eq!(segments[0].end_seconds, 120.0);
        assert_eq!(segments[0].confidence, Some(0.93));
    }

    #[test]
    fn vendor_spans_are_clamped_into_the_segment_window() {
        let vendor = VendorTranscript {
            text: String::new(),
            spans: vec![VendorSpan {
                start: 295.0,
                end: 320.0, // overruns the window
                text: "tail".to_string(),
            }],
            confidence: None,
        };
        let segments = align_segment(&plan(0, 0.0, 300.0), &vendor);
        assert_eq!(segments[0].end_seconds, 300.0);
    }

    #[test]
    fn finalize_enforces_ordering_invariant() {
        let raw = vec![
            TranscriptionSegment {
                index: 0,
                start_seconds: 0.0,
                end_seconds: 10.0,
                text: "a".to_string(),
                confidence: None,
            },
            TranscriptionSegment {
                index: 0,
                start_seconds: 8.0, // overlaps previous
                end_seconds: 15.0,
                text: "b".to_string(),
                confidence: None,
            },
            TranscriptionSegment {
                index: 0,
                start_seconds: 14.0,
                end_seconds: 14.5, // collapses after clamping
                text: "c".to_string(),
                confidence: None,
            },
        ];
        let out = finalize_segments(raw);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].index, 0);
        assert_eq!(out[1].index, 1);
        assert_eq!(out[1].start_seconds, 10.0);
        for window in out.windows(2) {
            assert!(window[0].end_seconds <= window[1].start_seconds);
        }
        // Collapsed words were not dropped
        assert!(out[1].text.contains('c'));
    }

    /// Scripted transcriber: per segment index, a queue of outcomes.
    struct Scripted {
        outcomes: Mutex<HashMap<u32, Vec<Result<VendorTranscript>>>>,
    }

    impl Scripted {
        fn new(entries: Vec<(u32, Vec<Result<VendorTranscript>>)>) -> Self {
            Self {
                outcomes: Mutex::new(entries.into_iter().collect()),
            }
        }
    }

    impl SegmentTranscriber for Scripted {
        async fn transcribe(&self, plan: &SegmentPlan) -> Result<VendorTranscript> {
            let mut map = self.outcomes.lock().unwrap();
            let queue = map.get_mut(&plan.index).expect("scripted segment");
            if queue.is_empty() {
                panic!("no scripted outcome left for segment {}", plan.index);
            }
            queue.remove(0)
        }
    }

    fn ok_text(text: &str) -> Result<VendorTranscript> {
        Ok(VendorTranscript {
            text: text.to_string(),
            spans: Vec::new(),
            confidence: None,
        })
    }

    fn fast_settings() -> SttSettings {
        SttSettings {
            max_consecutive_failures: 3,
            short_audio_max_retries: 3,
            sleep_short: Duration::ZERO,
            sleep_long: Duration::ZERO,
        }
    }

    fn three_plans() -> Vec<SegmentPlan> {
        vec![plan(0, 0.0, 300.0), plan(1, 300.0, 600.0), plan(2, 600.0, 900.0)]
    }

    #[tokio::test]
    async fn multi_segment_run_succeeds_and_reports_progress() {
        let scripted = Scripted::new(vec![
            (0, vec![ok_text("one")]),
            (1, vec![ok_text("two")]),
            (2, vec![ok_text("three")]),
        ]);
        let cancel = CancellationToken::new();
        let mut reported = Vec::new();

        let result = transcribe_all(&scripted, &three_plans(), &fast_settings(), &cancel, |d, t| {
            reported.push((d, t));
            async { Ok(()) }
        })
        .await
        .unwrap();

        assert_eq!(result.segments.len(), 3);
        assert_eq!(reported, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(result.full_text, "one\n\ntwo\n\nthree");
        // Absolute, non-overlapping coordinates across segments
        assert_eq!(result.segments[1].start_seconds, 300.0);
        assert_eq!(result.segments[2].end_seconds, 900.0);
    }

    #[tokio::test]
    async fn consecutive_failures_abort_the_run() {
        // Segment 1 (the second) fails three times in a row.
        let scripted = Scripted::new(vec![
            (0, vec![ok_text("one")]),
            (
                1,
                vec![
                    Err(Error::Vendor("500".into())),
                    Err(Error::Vendor("500".into())),
                    Err(Error::Vendor("500".into())),
                ],
            ),
            (2, vec![ok_text("three")]),
        ]);
        let cancel = CancellationToken::new();
        let mut last_done = 0;

        let err = transcribe_all(&scripted, &three_plans(), &fast_settings(), &cancel, |d, _| {
            last_done = d;
            async { Ok(()) }
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), vscribe_common::ErrorKind::SttConsecutiveFailures);
        assert_eq!(last_done, 1);
    }

    #[tokio::test]
    async fn failure_counter_resets_after_success() {
        // Two failures on segment 0, success, then two failures on segment 1,
        // success: never reaches the abort threshold of 3.
        let scripted = Scripted::new(vec![
            (
                0,
                vec![
                    Err(Error::Network("reset".into())),
                    Err(Error::Network("reset".into())),
                    ok_text("one"),
                ],
            ),
            (
                1,
                vec![
                    Err(Error::Network("reset".into())),
                    Err(Error::Network("reset".into())),
                    ok_text("two"),
                ],
            ),
            (2, vec![ok_text("three")]),
        ]);
        let cancel = CancellationToken::new();

        let result = transcribe_all(&scripted, &three_plans(), &fast_settings(), &cancel, |_, _| {
            async { Ok(()) }
        })
        .await
        .unwrap();
        assert_eq!(result.segments.len(), 3);
    }

    #[tokio::test]
    async fn cancellation_is_observed_between_segments() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let scripted = Scripted::new(vec![(0, vec![ok_text("never")])]);

        // Multi-segment path checks the token before any upload.
        let err = transcribe_all(
            &scripted,
            &three_plans(),
            &fast_settings(),
            &cancel,
            |_, _| async { Ok(()) },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), vscribe_common::ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn single_segment_path_retries_then_succeeds() {
        let scripted = Scripted::new(vec![(
            0,
            vec![
                Err(Error::Network("flaky".into())),
                Err(Error::Network("flaky".into())),
                ok_text("short talk"),
            ],
        )]);
        let cancel = CancellationToken::new();
        let plans = vec![plan(0, 0.0, 120.0)];

        let result = transcribe_all(&scripted, &plans, &fast_settings(), &cancel, |_, _| async {
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.segments[0].end_seconds, 120.0);
    }

    #[tokio::test]
    async fn single_segment_path_exhausts_retries() {
        let scripted = Scripted::new(vec![(
            0,
            vec![
                Err(Error::Vendor("500".into())),
                Err(Error::Vendor("500".into())),
                Err(Error::Vendor("500".into())),
            ],
        )]);
        let cancel = CancellationToken::new();
        let plans = vec![plan(0, 0.0, 120.0)];

        let err = transcribe_all(&scripted, &plans, &fast_settings(), &cancel, |_, _| async {
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), vscribe_common::ErrorKind::VendorError);
    }
}
