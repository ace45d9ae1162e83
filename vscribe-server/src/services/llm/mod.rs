//! LLM client: transcript polish, summary, analysis, bilingual translation
//!
//! One `LlmClient` per task, built from the selected provider variant and the
//! effective endpoint (configured values overlaid with any per-request
//! overrides). Providers differ only in wire shape; the four text operations
//! are implemented once on top of a `complete` primitive.
//!
//! Long transcripts are processed in overlapping character windows so no
//! content is dropped at vendor context limits.

mod providers;
mod windows;

pub use providers::ProviderKind;
pub use windows::{split_windows, stitch_pieces, OVERLAP_CHARS, WINDOW_CHARS};

use crate::models::{AnalysisResult, SummaryResult};
use providers::WireClient;
use std::time::Duration;
use vscribe_common::config::ApiEndpoint;
use vscribe_common::urlguard::{is_safe_base_url, UrlPolicy};
use vscribe_common::{Error, Result};

/// Per-request endpoint override accepted by the submission API
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ApiOverride {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

/// Merge the configured endpoint with request-level overrides.
pub fn effective_endpoint(configured: &ApiEndpoint, overrides: Option<&ApiOverride>) -> ApiEndpoint {
    let mut endpoint = configured.clone();
    if let Some(o) = overrides {
        if let Some(key) = o.api_key.as_ref().filter(|s| !s.trim().is_empty()) {
            endpoint.api_key = key.clone();
        }
        if let Some(base) = o.base_url.as_ref().filter(|s| !s.trim().is_empty()) {
            endpoint.base_url = base.clone();
        }
        if let Some(model) = o.model.as_ref().filter(|s| !s.trim().is_empty()) {
            endpoint.model = model.clone();
        }
    }
    endpoint
}

/// Text-generation client bound to one provider and endpoint
#[derive(Debug)]
pub struct LlmClient {
    wire: WireClient,
}

impl LlmClient {
    /// Build a client, vetting the effective base URL through the SSRF guard
    /// first.
    pub async fn connect(
        kind: ProviderKind,
        endpoint: ApiEndpoint,
        policy: &UrlPolicy,
        timeout: Duration,
    ) -> Result<Self> {
        if endpoint.base_url.trim().is_empty() {
            return Err(Error::BadRequest(format!(
                "no base URL configured for provider {}",
                kind.as_str()
            )));
        }
        is_safe_base_url(&endpoint.base_url, policy).await?;

        let wire = WireClient::new(kind, endpoint, timeout)?;
        Ok(Self { wire })
    }

    /// Rewrite the raw transcript for punctuation and paragraphing without
    /// changing its content. Long inputs are processed window by window and
    /// stitched back together.
    pub async fn polish(&self, transcript: &str) -> Result<String> {
        let system = "你是一名专业的文字编辑。请为下面的语音转写文本添加标点并合理分段,\
                      不要增删内容,不要翻译,直接输出整理后的文本。";

        let pieces = split_windows(transcript, WINDOW_CHARS, OVERLAP_CHARS);
        let mut outputs = Vec::with_capacity(pieces.len());
        for piece in &pieces {
            outputs.push(self.wire.complete(system, piece).await?);
        }
        Ok(stitch_pieces(&outputs))
    }

    /// Produce the summary record.
    pub async fn summarize(&self, transcript: &str) -> Result<SummaryResult> {
        let system = "你是一名内容分析助手。阅读给定的转写文本, 输出 JSON 对象, 字段为: \
                      brief_summary (一句话摘要), keywords (字符串数组, 最多10个), \
                      detailed_summary_markdown (Markdown 格式的详细总结)。只输出 JSON。";
        let raw = self.wire.complete(system, transcript).await?;
        parse_json_reply(&raw)
    }

    /// Produce the content-analysis record.
    pub async fn analyze(&self, transcript: &str) -> Result<AnalysisResult> {
        let system = "你是一名内容分析助手。阅读给定的转写文本, 输出 JSON 对象, 字段为: \
                      content_type, sentiment, language_style, estimated_difficulty, \
                      target_audience, main_topics (字符串数组)。只输出 JSON。";
        let raw = self.wire.complete(system, transcript).await?;
        parse_json_reply(&raw)
    }

    /// Bilingual rendering: source paragraphs interleaved with translations.
    pub async fn translate(&self, transcript: &str, target_language: &str) -> Result<String> {
        let system = format!(
            "你是一名专业译者。将给定文本逐段翻译为{}。输出双语对照: 每个原文段落后紧跟其译文段落, \
             保留原有分段, 不要省略任何内容。",
            target_language
        );

        let pieces = split_windows(transcript, WINDOW_CHARS, OVERLAP_CHARS);
        let mut outputs = Vec::with_capacity(pieces.len());
        for piece in &pieces {
            outputs.push(self.wire.complete(&system, piece).await?);
        }
        Ok(stitch_pieces(&outputs))
    }
}

/// Parse a JSON object out of an LLM reply, tolerating Markdown code fences
/// around it.
fn parse_json_reply<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    let trimmed = strip_code_fence(raw);
    serde_json::from_str(trimmed)
        .map_err(|e| Error::Vendor(format!("LLM reply was not the expected JSON: {}", e)))
}

/// Strip a surrounding ``` or ```json fence if present.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map(str::trim).unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_endpoint_applies_overrides() {
        let configured = ApiEndpoint {
            api_key: "configured-key".to_string(),
            base_url: "https://api.example.com/v1".to_string(),
            model: "model-a".to_string(),
        };
        let overrides = ApiOverride {
            api_key: Some("request-key".to_string()),
            base_url: None,
            model: Some("  ".to_string()), // blank override is ignored
        };

        let endpoint = effective_endpoint(&configured, Some(&overrides));
        assert_eq!(endpoint.api_key, "request-key");
        assert_eq!(endpoint.base_url, "https://api.example.com/v1");
        assert_eq!(endpoint.model, "model-a");
    }

    #[test]
    fn parses_plain_and_fenced_json() {
        let plain = r#"{"brief_summary":"b","keywords":["k"],"detailed_summary_markdown":"d"}"#;
        let parsed: SummaryResult = parse_json_reply(plain).unwrap();
        assert_eq!(parsed.brief_summary, "b");

        let fenced = "```json\n{\"brief_summary\":\"b\",\"keywords\":[],\"detailed_summary_markdown\":\"d\"}\n```";
        let parsed: SummaryResult = parse_json_reply(fenced).unwrap();
        assert_eq!(parsed.detailed_summary_markdown, "d");

        let bare_fence = "```\n{\"content_type\":\"讲座\",\"sentiment\":\"中性\",\"language_style\":\"正式\",\"estimated_difficulty\":\"中等\",\"target_audience\":\"学生\",\"main_topics\":[\"历史\"]}\n```";
        let parsed: AnalysisResult = parse_json_reply(bare_fence).unwrap();
        assert_eq!(parsed.content_type, "讲座");
    }

    #[test]
    fn unparseable_reply_is_a_vendor_error() {
        let err = parse_json_reply::<SummaryResult>("sorry, I cannot").unwrap_err();
        assert_eq!(err.kind(), vscribe_common::ErrorKind::VendorError);
    }

    #[tokio::test]
    async fn connect_rejects_unsafe_base_url() {
        let endpoint = ApiEndpoint {
            api_key: "k".to_string(),
            base_url: "http://169.254.169.254/v1".to_string(),
            model: "m".to_string(),
        };
        let policy = UrlPolicy {
            allow_insecure_http: true,
            ..UrlPolicy::default()
        };
        let err = LlmClient::connect(
            ProviderKind::OpenAiCompat,
            endpoint,
            &policy,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), vscribe_common::ErrorKind::UrlRejected);
    }

    #[tokio::test]
    async fn connect_rejects_missing_base_url() {
        let err = LlmClient::connect(
            ProviderKind::SiliconFlow,
            ApiEndpoint::default(),
            &UrlPolicy::default(),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), vscribe_common::ErrorKind::BadRequest);
    }
}
