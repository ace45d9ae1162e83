//! Error types shared across the vscribe workspace
//!
//! Every component returns a typed error; the pipeline maps terminal errors
//! into the task record and the HTTP layer maps them into response envelopes.
//! The set of kinds is closed: new failure modes must pick an existing kind.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of error kinds exposed on the wire (snake_case labels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    UrlRejected,
    PathEscape,
    Unauthorized,
    NotFound,
    ConflictBusy,
    ToolMissing,
    Network,
    VendorError,
    VendorRateLimited,
    SttConsecutiveFailures,
    Timeout,
    Cancelled,
    StaleOnRestart,
    DiskFull,
    Internal,
}

impl ErrorKind {
    /// Wire label for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::UrlRejected => "url_rejected",
            ErrorKind::PathEscape => "path_escape",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ConflictBusy => "conflict_busy",
            ErrorKind::ToolMissing => "tool_missing",
            ErrorKind::Network => "network",
            ErrorKind::VendorError => "vendor_error",
            ErrorKind::VendorRateLimited => "vendor_rate_limited",
            ErrorKind::SttConsecutiveFailures => "stt_consecutive_failures",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::StaleOnRestart => "stale_on_restart",
            ErrorKind::DiskFull => "disk_full",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service error type
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or unacceptable client input
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// URL failed the safety policy (scheme, private address, whitelist)
    #[error("URL rejected: {0}")]
    UrlRejected(String),

    /// A path resolved outside the configured roots
    #[error("Path escapes configured root: {0}")]
    PathEscape(String),

    /// Missing or invalid admin credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Too many tasks in flight
    #[error("Busy: {0}")]
    ConflictBusy(String),

    /// A required external executable is not installed
    #[error("Required tool missing: {0}")]
    ToolMissing(String),

    /// Transport-level failure talking to a vendor or downloading media
    #[error("Network error: {0}")]
    Network(String),

    /// Vendor returned an error response
    #[error("Vendor error: {0}")]
    Vendor(String),

    /// Vendor rate limit hit
    #[error("Vendor rate limited: {0}")]
    VendorRateLimited(String),

    /// Too many STT segments failed in a row
    #[error("Transcription aborted: {0}")]
    SttConsecutiveFailures(String),

    /// Per-task wall-clock budget exceeded
    #[error("Processing timed out: {0}")]
    Timeout(String),

    /// Task cancelled cooperatively
    #[error("Task cancelled")]
    Cancelled,

    /// Task was in flight when the process died and was swept on boot
    #[error("Task was in flight during a restart")]
    StaleOnRestart,

    /// Out of disk space
    #[error("Disk full: {0}")]
    DiskFull(String),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error (classified into disk_full/internal by kind())
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error (startup only)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Map this error onto the closed wire kind set.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadRequest(_) => ErrorKind::BadRequest,
            Error::UrlRejected(_) => ErrorKind::UrlRejected,
            Error::PathEscape(_) => ErrorKind::PathEscape,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::ConflictBusy(_) => ErrorKind::ConflictBusy,
            Error::ToolMissing(_) => ErrorKind::ToolMissing,
            Error::Network(_) => ErrorKind::Network,
            Error::Vendor(_) => ErrorKind::VendorError,
            Error::VendorRateLimited(_) => ErrorKind::VendorRateLimited,
            Error::SttConsecutiveFailures(_) => ErrorKind::SttConsecutiveFailures,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::StaleOnRestart => ErrorKind::StaleOnRestart,
            Error::DiskFull(_) => ErrorKind::DiskFull,
            Error::Internal(_) | Error::Config(_) => ErrorKind::Internal,
            Error::Io(err) => {
                if err.raw_os_error() == Some(28) {
                    // ENOSPC
                    ErrorKind::DiskFull
                } else {
                    ErrorKind::Internal
                }
            }
        }
    }

    /// Whether a retry loop may absorb this error and try again.
    ///
    /// Only transport and vendor failures are retryable; everything else
    /// (cancellation, policy rejections, tool problems) propagates.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Network | ErrorKind::VendorError | ErrorKind::VendorRateLimited
        )
    }
}

/// Result type alias using the shared error
pub type Result<T> = std::result::Result<T, Error>;
