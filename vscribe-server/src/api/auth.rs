//! Admin bearer-token guard
//!
//! The admin surface (bulk file deletion, stop-all) checks a configured
//! bearer token in production. In development mode the check is disabled so
//! local use needs no credentials.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use vscribe_common::config::AppConfig;
use vscribe_common::{Error, Result};

/// Require the admin bearer token when running in production.
pub fn require_admin(config: &AppConfig, headers: &HeaderMap) -> Result<()> {
    if !config.server.production {
        return Ok(());
    }

    let expected = config
        .server
        .admin_token
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| {
            Error::Unauthorized("admin token is not configured".to_string())
        })?;

    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| Error::Unauthorized("missing bearer token".to_string()))?;

    if provided == expected {
        Ok(())
    } else {
        Err(Error::Unauthorized("invalid admin token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn config(production: bool, token: Option<&str>) -> AppConfig {
        let mut config = AppConfig::default();
        config.server.production = production;
        config.server.admin_token = token.map(str::to_string);
        config
    }

    fn headers_with(token: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(t) = token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", t)).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn development_mode_is_open() {
        assert!(require_admin(&config(false, None), &headers_with(None)).is_ok());
    }

    #[test]
    fn production_requires_matching_token() {
        let config = config(true, Some("s3cret"));
        assert!(require_admin(&config, &headers_with(Some("s3cret"))).is_ok());

        let err = require_admin(&config, &headers_with(Some("wrong"))).unwrap_err();
        assert_eq!(err.kind(), vscribe_common::ErrorKind::Unauthorized);

        let err = require_admin(&config, &headers_with(None)).unwrap_err();
        assert_eq!(err.kind(), vscribe_common::ErrorKind::Unauthorized);
    }

    #[test]
    fn production_without_configured_token_locks_the_surface() {
        let err = require_admin(&config(true, None), &headers_with(Some("any"))).unwrap_err();
        assert_eq!(err.kind(), vscribe_common::ErrorKind::Unauthorized);
    }
}
