//! Provider wire shapes
//!
//! SiliconFlow and any OpenAI-compatible endpoint share the chat-completions
//! shape; Gemini speaks `generateContent`. Everything above this module works
//! in terms of `complete(system, user) -> text`.

use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use url::Url;
use vscribe_common::config::ApiEndpoint;
use vscribe_common::{Error, Result};

/// Supported text-generation providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    SiliconFlow,
    OpenAiCompat,
    Gemini,
}

impl ProviderKind {
    /// Parse the `llm_provider` request field.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "siliconflow" => Some(ProviderKind::SiliconFlow),
            "openai" => Some(ProviderKind::OpenAiCompat),
            "gemini" => Some(ProviderKind::Gemini),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::SiliconFlow => "siliconflow",
            ProviderKind::OpenAiCompat => "openai",
            ProviderKind::Gemini => "gemini",
        }
    }
}

/// HTTP client bound to one provider endpoint
#[derive(Debug)]
pub struct WireClient {
    kind: ProviderKind,
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    model: String,
}

impl WireClient {
    pub fn new(kind: ProviderKind, endpoint: ApiEndpoint, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(endpoint.base_url.trim_end_matches('/'))
            .map_err(|_| Error::UrlRejected("LLM base URL is not valid".to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("build http client: {}", e)))?;
        Ok(Self {
            kind,
            http,
            base_url,
            api_key: endpoint.api_key,
            model: endpoint.model,
        })
    }

    /// One completion round trip: system instruction + user text → reply text.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String> {
        match self.kind {
            ProviderKind::SiliconFlow | ProviderKind::OpenAiCompat => {
                self.complete_chat(system, user).await
            }
            ProviderKind::Gemini => self.complete_gemini(system, user).await,
        }
    }

    async fn complete_chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!(
            "{}/chat/completions",
            self.base_url.as_str().trim_end_matches('/')
        );
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0.3,
        });

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::VendorRateLimited(
                "LLM vendor rate limit exceeded".to_string(),
            ));
        }
        if !status.is_success() {
            let body: String = response.text().await.unwrap_or_default();
            return Err(Error::Vendor(format!(
                "LLM vendor returned {}: {}",
                status,
                body.chars().take(300).collect::<String>()
            )));
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<ChatChoice>,
        }
        #[derive(Deserialize)]
        struct ChatChoice {
            message: ChatMessage,
        }
        #[derive(Deserialize)]
        struct ChatMessage {
            content: String,
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Vendor(format!("unparseable LLM response: {}", e)))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Vendor("LLM response carried no choices".to_string()))
    }

    async fn complete_gemini(&self, system: &str, user: &str) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.as_str().trim_end_matches('/'),
            self.model
        );
        let body = json!({
            "systemInstruction": {"parts": [{"text": system}]},
            "contents": [{"role": "user", "parts": [{"text": user}]}],
            "generationConfig": {"temperature": 0.3},
        });

        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::VendorRateLimited(
                "LLM vendor rate limit exceeded".to_string(),
            ));
        }
        if !status.is_success() {
            let body: String = response.text().await.unwrap_or_default();
            return Err(Error::Vendor(format!(
                "LLM vendor returned {}: {}",
                status,
                body.chars().take(300).collect::<String>()
            )));
        }

        #[derive(Deserialize)]
        struct GeminiResponse {
            candidates: Vec<GeminiCandidate>,
        }
        #[derive(Deserialize)]
        struct GeminiCandidate {
            content: GeminiContent,
        }
        #[derive(Deserialize)]
        struct GeminiContent {
            parts: Vec<GeminiPart>,
        }
        #[derive(Deserialize)]
        struct GeminiPart {
            #[serde(default)]
            text: String,
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| Error::Vendor(format!("unparseable LLM response: {}", e)))?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            Err(Error::Vendor("LLM response carried no candidates".to_string()))
        } else {
            Ok(text)
        }
    }
}

fn map_transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() {
        Error::Network(format!("LLM request failed: {}", e))
    } else {
        Error::Vendor(format!("LLM request failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parses_wire_names() {
        assert_eq!(ProviderKind::from_wire("siliconflow"), Some(ProviderKind::SiliconFlow));
        assert_eq!(ProviderKind::from_wire("OpenAI"), Some(ProviderKind::OpenAiCompat));
        assert_eq!(ProviderKind::from_wire(" gemini "), Some(ProviderKind::Gemini));
        assert_eq!(ProviderKind::from_wire("claude"), None);
        assert_eq!(ProviderKind::from_wire(""), None);
    }
}
