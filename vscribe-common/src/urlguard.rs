//! Outbound URL vetting (SSRF guard)
//!
//! One function, `is_safe_base_url`, vets every outbound URL the service will
//! ever touch: configured vendor base URLs at startup, submitted video URLs,
//! and the effective LLM endpoint at call time. The host is resolved and
//! every resolved address is checked, so a DNS name pointing at a private
//! range is rejected the same as a literal.

use crate::error::{Error, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::Url;

/// Policy inputs for URL vetting, derived from the security configuration.
#[derive(Debug, Clone, Default)]
pub struct UrlPolicy {
    /// Accept plain-http URLs
    pub allow_insecure_http: bool,
    /// Accept hosts resolving to private/loopback/link-local ranges
    pub allow_private_addresses: bool,
    /// Host whitelist (exact, case-insensitive) applied when `enforce_whitelist`
    pub allowed_hosts: Vec<String>,
    /// Enforce the whitelist above
    pub enforce_whitelist: bool,
}

impl UrlPolicy {
    /// Build from the security configuration section.
    pub fn from_security(security: &crate::config::SecurityConfig) -> Self {
        Self {
            allow_insecure_http: security.allow_insecure_http,
            allow_private_addresses: security.allow_private_addresses,
            allowed_hosts: security.allowed_api_hosts.clone(),
            enforce_whitelist: security.enforce_api_hosts_whitelist,
        }
    }
}

/// Vet a URL against the policy. Returns the parsed URL on success so the
/// caller proceeds with exactly what was checked.
///
/// Rejections carry kind `url_rejected` with a human-readable reason that
/// never echoes credentials embedded in the URL.
pub async fn is_safe_base_url(raw: &str, policy: &UrlPolicy) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|_| Error::UrlRejected("not a valid absolute URL".to_string()))?;

    match url.scheme() {
        "https" => {}
        "http" => {
            if !policy.allow_insecure_http {
                return Err(Error::UrlRejected(
                    "plain http is not allowed by policy".to_string(),
                ));
            }
        }
        other => {
            return Err(Error::UrlRejected(format!(
                "unsupported scheme: {}",
                other
            )));
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| Error::UrlRejected("URL has no host".to_string()))?;

    if policy.enforce_whitelist {
        let listed = policy
            .allowed_hosts
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(host));
        if !listed {
            return Err(Error::UrlRejected(format!(
                "host {} is not on the allowed list",
                host
            )));
        }
    }

    if !policy.allow_private_addresses {
        let addrs = resolve_host(&url, host).await?;
        for addr in addrs {
            if is_disallowed_address(&addr) {
                return Err(Error::UrlRejected(format!(
                    "host {} resolves to a disallowed address ({})",
                    host, addr
                )));
            }
        }
    }

    Ok(url)
}

/// Resolve the URL host to socket addresses. A literal IP needs no lookup.
async fn resolve_host(url: &Url, host: &str) -> Result<Vec<IpAddr>> {
    if let Ok(ip) = host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        return Ok(vec![ip]);
    }

    let port = url.port_or_known_default().unwrap_or(443);
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::UrlRejected(format!("host {} did not resolve: {}", host, e)))?
        .map(|sa| sa.ip())
        .collect::<Vec<_>>();

    if addrs.is_empty() {
        return Err(Error::UrlRejected(format!(
            "host {} resolved to no addresses",
            host
        )));
    }
    Ok(addrs)
}

/// Private, loopback, link-local, multicast, unspecified and otherwise
/// reserved ranges are all rejected.
fn is_disallowed_address(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_disallowed_v4(v4),
        IpAddr::V6(v6) => is_disallowed_v6(v6),
    }
}

fn is_disallowed_v4(addr: &Ipv4Addr) -> bool {
    addr.is_private()            // 10/8, 172.16/12, 192.168/16
        || addr.is_loopback()    // 127/8
        || addr.is_link_local()  // 169.254/16
        || addr.is_multicast()
        || addr.is_broadcast()
        || addr.is_unspecified()
        || addr.is_documentation()
        // 100.64/10 carrier-grade NAT
        || (addr.octets()[0] == 100 && (addr.octets()[1] & 0xc0) == 64)
        // 192.0.0/24 IETF protocol assignments
        || (addr.octets()[0] == 192 && addr.octets()[1] == 0 && addr.octets()[2] == 0)
        // 240/4 reserved
        || addr.octets()[0] >= 240
}

fn is_disallowed_v6(addr: &Ipv6Addr) -> bool {
    if let Some(v4) = addr.to_ipv4_mapped() {
        return is_disallowed_v4(&v4);
    }
    let segments = addr.segments();
    addr.is_loopback()
        || addr.is_multicast()
        || addr.is_unspecified()
        // fe80::/10 link-local
        || (segments[0] & 0xffc0) == 0xfe80
        // fc00::/7 unique local
        || (segments[0] & 0xfe00) == 0xfc00
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_policy() -> UrlPolicy {
        UrlPolicy {
            allow_insecure_http: true,
            allow_private_addresses: false,
            allowed_hosts: Vec::new(),
            enforce_whitelist: false,
        }
    }

    #[tokio::test]
    async fn rejects_unsupported_schemes() {
        let policy = open_policy();
        for url in ["ftp://example.com/x", "file:///etc/passwd", "gopher://x"] {
            let err = is_safe_base_url(url, &policy).await.unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::UrlRejected, "{}", url);
        }
    }

    #[tokio::test]
    async fn rejects_http_unless_allowed() {
        let strict = UrlPolicy::default();
        assert!(is_safe_base_url("http://example.com/", &strict).await.is_err());
    }

    #[tokio::test]
    async fn rejects_loopback_and_private_literals() {
        let policy = open_policy();
        for url in [
            "http://127.0.0.1/steal",
            "http://10.0.0.8/x",
            "http://172.16.4.4/x",
            "http://192.168.1.1/x",
            "http://169.254.169.254/meta",
            "http://[::1]/x",
            "http://[fe80::1]/x",
            "http://[fd00::1]/x",
            "http://0.0.0.0/x",
        ] {
            let err = is_safe_base_url(url, &policy).await.unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::UrlRejected, "{}", url);
        }
    }

    #[tokio::test]
    async fn allows_private_when_policy_permits() {
        let mut policy = open_policy();
        policy.allow_private_addresses = true;
        assert!(is_safe_base_url("http://127.0.0.1:9000/v1", &policy).await.is_ok());
        assert!(is_safe_base_url("http://192.168.0.10/v1", &policy).await.is_ok());
    }

    #[tokio::test]
    async fn whitelist_is_enforced_when_enabled() {
        let mut policy = open_policy();
        policy.allow_private_addresses = true;
        policy.enforce_whitelist = true;
        policy.allowed_hosts = vec!["api.allowed.example".to_string()];

        // Literal IP host, not listed
        let err = is_safe_base_url("http://127.0.0.1/v1", &policy).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::UrlRejected);

        // Case-insensitive match on a listed host never reaches resolution
        // for private ranges because the address check still applies; use a
        // private-allowed policy so only the whitelist is under test.
        policy.allowed_hosts = vec!["127.0.0.1".to_string()];
        assert!(is_safe_base_url("http://127.0.0.1/v1", &policy).await.is_ok());
    }

    #[test]
    fn v4_range_table() {
        assert!(is_disallowed_v4(&"10.1.2.3".parse().unwrap()));
        assert!(is_disallowed_v4(&"172.31.255.1".parse().unwrap()));
        assert!(is_disallowed_v4(&"192.168.0.1".parse().unwrap()));
        assert!(is_disallowed_v4(&"127.0.0.53".parse().unwrap()));
        assert!(is_disallowed_v4(&"169.254.0.9".parse().unwrap()));
        assert!(is_disallowed_v4(&"100.64.0.1".parse().unwrap()));
        assert!(is_disallowed_v4(&"240.0.0.1".parse().unwrap()));
        assert!(!is_disallowed_v4(&"1.1.1.1".parse().unwrap()));
        assert!(!is_disallowed_v4(&"93.184.216.34".parse().unwrap()));
    }

    #[test]
    fn v6_mapped_v4_is_checked_as_v4() {
        let mapped: Ipv6Addr = "::ffff:127.0.0.1".parse().unwrap();
        assert!(is_disallowed_v6(&mapped));
        let public: Ipv6Addr = "2606:4700::1111".parse().unwrap();
        assert!(!is_disallowed_v6(&public));
    }
}
