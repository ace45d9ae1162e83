//! Configuration loading for vscribe
//!
//! A single YAML file at the repo root (default `config.yaml`) holds every
//! tunable. Environment variables override the file: `VSCRIBE_<SECTION>_<KEY>`
//! wins over the corresponding YAML key. All values have serde defaults so a
//! missing file yields a runnable development configuration.
//!
//! Secrets in the configuration never reach a log line directly; callers log
//! `config.redacted()` instead.

use crate::error::{Error, Result};
use crate::redact::redacted_value;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Per-provider API endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiEndpoint {
    /// Vendor API key (redacted in logs)
    pub api_key: String,
    /// Base URL of the vendor API
    pub base_url: String,
    /// Model identifier sent with each request
    pub model: String,
}

impl Default for ApiEndpoint {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            model: String::new(),
        }
    }
}

/// `apis` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApisConfig {
    pub siliconflow: ApiEndpoint,
    pub openai: ApiEndpoint,
    pub gemini: ApiEndpoint,
}

/// `system` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Working directory for in-flight tasks (also holds the registry snapshot)
    pub temp_dir: PathBuf,
    /// Final artifact directory
    pub output_dir: PathBuf,
    /// Upload size cap
    pub max_file_size_mb: u64,
    /// Per-task wall-clock budget
    pub processing_timeout_seconds: u64,
    /// Keep per-task temp directories after completion
    pub keep_temp_files: bool,
    /// Timeout applied to every outbound HTTP call
    pub http_timeout_seconds: u64,
    /// Log directory
    pub log_dir: PathBuf,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            temp_dir: PathBuf::from("temp"),
            output_dir: PathBuf::from("output"),
            max_file_size_mb: 500,
            processing_timeout_seconds: 3600,
            keep_temp_files: false,
            http_timeout_seconds: 120,
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// `processing` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Audio at or below this duration is transcribed as a single segment
    pub long_audio_threshold_seconds: f64,
    /// Segment length for long audio
    pub segment_duration_seconds: f64,
    /// Run-level abort threshold for the multi-segment STT loop
    pub max_consecutive_failures: u32,
    /// Attempts for the single-segment STT path
    pub short_audio_max_retries: u32,
    /// Sleep after a successful segment upload
    pub retry_sleep_short_seconds: f64,
    /// Sleep after a failed attempt
    pub retry_sleep_long_seconds: f64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            long_audio_threshold_seconds: 300.0,
            segment_duration_seconds: 300.0,
            max_consecutive_failures: 3,
            short_audio_max_retries: 3,
            retry_sleep_short_seconds: 1.0,
            retry_sleep_long_seconds: 2.0,
        }
    }
}

/// `security` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Allow plain-http outbound URLs
    pub allow_insecure_http: bool,
    /// Allow URLs resolving to private/loopback/link-local ranges
    pub allow_private_addresses: bool,
    /// Host whitelist applied to vendor endpoints when enforced
    pub allowed_api_hosts: Vec<String>,
    /// Enforce the whitelist above
    pub enforce_api_hosts_whitelist: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allow_insecure_http: false,
            allow_private_addresses: false,
            allowed_api_hosts: Vec::new(),
            enforce_api_hosts_whitelist: false,
        }
    }
}

/// `server` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind_addr: String,
    /// Bearer token for the admin surface
    pub admin_token: Option<String>,
    /// Production mode: admin endpoints require the token
    pub production: bool,
    /// Concurrently executing tasks (semaphore width)
    pub max_active_tasks: usize,
    /// Reject submissions once pending + processing exceeds this
    pub max_queued_tasks: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            admin_token: None,
            production: false,
            max_active_tasks: 4,
            max_queued_tasks: 32,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub apis: ApisConfig,
    pub system: SystemConfig,
    pub processing: ProcessingConfig,
    pub security: SecurityConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load configuration: YAML file, then environment overrides.
    ///
    /// A missing file is not an error (defaults are used); a file that exists
    /// but fails to parse is.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("Read config failed: {}", e)))?;
            let parsed: AppConfig = serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("Parse config failed: {}", e)))?;
            info!(path = %path.display(), "Configuration loaded");
            parsed
        } else {
            warn!(path = %path.display(), "Configuration file not found, using defaults");
            AppConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `VSCRIBE_*` environment overrides. Environment wins over YAML.
    pub fn apply_env_overrides(&mut self) {
        // apis.*
        for (name, endpoint) in [
            ("SILICONFLOW", &mut self.apis.siliconflow),
            ("OPENAI", &mut self.apis.openai),
            ("GEMINI", &mut self.apis.gemini),
        ] {
            if let Some(v) = env_string(&format!("VSCRIBE_APIS_{}_API_KEY", name)) {
                endpoint.api_key = v;
            }
            if let Some(v) = env_string(&format!("VSCRIBE_APIS_{}_BASE_URL", name)) {
                endpoint.base_url = v;
            }
            if let Some(v) = env_string(&format!("VSCRIBE_APIS_{}_MODEL", name)) {
                endpoint.model = v;
            }
        }

        // system.*
        if let Some(v) = env_string("VSCRIBE_SYSTEM_TEMP_DIR") {
            self.system.temp_dir = PathBuf::from(v);
        }
        if let Some(v) = env_string("VSCRIBE_SYSTEM_OUTPUT_DIR") {
            self.system.output_dir = PathBuf::from(v);
        }
        if let Some(v) = env_string("VSCRIBE_SYSTEM_LOG_DIR") {
            self.system.log_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parse::<u64>("VSCRIBE_SYSTEM_MAX_FILE_SIZE_MB") {
            self.system.max_file_size_mb = v;
        }
        if let Some(v) = env_parse::<u64>("VSCRIBE_SYSTEM_PROCESSING_TIMEOUT_SECONDS") {
            self.system.processing_timeout_seconds = v;
        }
        if let Some(v) = env_parse::<bool>("VSCRIBE_SYSTEM_KEEP_TEMP_FILES") {
            self.system.keep_temp_files = v;
        }
        if let Some(v) = env_parse::<u64>("VSCRIBE_SYSTEM_HTTP_TIMEOUT_SECONDS") {
            self.system.http_timeout_seconds = v;
        }

        // processing.*
        if let Some(v) = env_parse::<f64>("VSCRIBE_PROCESSING_LONG_AUDIO_THRESHOLD_SECONDS") {
            self.processing.long_audio_threshold_seconds = v;
        }
        if let Some(v) = env_parse::<f64>("VSCRIBE_PROCESSING_SEGMENT_DURATION_SECONDS") {
            self.processing.segment_duration_seconds = v;
        }
        if let Some(v) = env_parse::<u32>("VSCRIBE_PROCESSING_MAX_CONSECUTIVE_FAILURES") {
            self.processing.max_consecutive_failures = v;
        }
        if let Some(v) = env_parse::<u32>("VSCRIBE_PROCESSING_SHORT_AUDIO_MAX_RETRIES") {
            self.processing.short_audio_max_retries = v;
        }
        if let Some(v) = env_parse::<f64>("VSCRIBE_PROCESSING_RETRY_SLEEP_SHORT_SECONDS") {
            self.processing.retry_sleep_short_seconds = v;
        }
        if let Some(v) = env_parse::<f64>("VSCRIBE_PROCESSING_RETRY_SLEEP_LONG_SECONDS") {
            self.processing.retry_sleep_long_seconds = v;
        }

        // security.*
        if let Some(v) = env_parse::<bool>("VSCRIBE_SECURITY_ALLOW_INSECURE_HTTP") {
            self.security.allow_insecure_http = v;
        }
        if let Some(v) = env_parse::<bool>("VSCRIBE_SECURITY_ALLOW_PRIVATE_ADDRESSES") {
            self.security.allow_private_addresses = v;
        }
        if let Some(v) = env_string("VSCRIBE_SECURITY_ALLOWED_API_HOSTS") {
            self.security.allowed_api_hosts = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = env_parse::<bool>("VSCRIBE_SECURITY_ENFORCE_API_HOSTS_WHITELIST") {
            self.security.enforce_api_hosts_whitelist = v;
        }

        // server.*
        if let Some(v) = env_string("VSCRIBE_SERVER_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = env_string("VSCRIBE_SERVER_ADMIN_TOKEN") {
            self.server.admin_token = Some(v);
        }
        if let Some(v) = env_parse::<bool>("VSCRIBE_SERVER_PRODUCTION") {
            self.server.production = v;
        }
        if let Some(v) = env_parse::<usize>("VSCRIBE_SERVER_MAX_ACTIVE_TASKS") {
            self.server.max_active_tasks = v;
        }
        if let Some(v) = env_parse::<usize>("VSCRIBE_SERVER_MAX_QUEUED_TASKS") {
            self.server.max_queued_tasks = v;
        }
    }

    /// Redacted JSON rendering, safe to log.
    pub fn redacted(&self) -> serde_json::Value {
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        redacted_value(&value)
    }

    /// The configured filesystem roots every write must stay within.
    pub fn roots(&self) -> [&Path; 2] {
        [self.system.temp_dir.as_path(), self.system.output_dir.as_path()]
    }
}

fn env_string(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}
