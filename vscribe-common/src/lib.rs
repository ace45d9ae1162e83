//! # vscribe Common Library
//!
//! Shared code for the vscribe transcription service:
//! - Error type carrying the service-wide error kinds
//! - Configuration loading (YAML file + environment overrides)
//! - Path containment and path tokens
//! - Filename sanitization
//! - Outbound URL vetting (SSRF guard)
//! - Secret redaction for logging
//! - Time display formatting

pub mod config;
pub mod error;
pub mod filename;
pub mod fsguard;
pub mod redact;
pub mod time;
pub mod urlguard;

pub use error::{Error, ErrorKind, Result};
