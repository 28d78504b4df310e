//! HTTP page fetcher with SSRF protection.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::redirect::Policy;
use tracing::{debug, instrument};
use url::{Host, Url};

use ragline_shared::{RaglineError, Result};

use crate::{PageSource, USER_AGENT};

/// Largest page body read before the fetch is abandoned.
const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Transport-level ceiling. The pipeline applies its own, shorter deadline.
const TRANSPORT_TIMEOUT_SECS: u64 = 10;

const MAX_REDIRECTS: usize = 5;

/// Fetches raw page payloads over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: Client,
    /// Allow localhost/private IPs (mock servers, intranet deployments).
    allow_private_hosts: bool,
}

impl HttpPageSource {
    /// A page source that only reaches public hosts.
    pub fn new() -> Result<Self> {
        Self::with_private_hosts(false)
    }

    /// A page source that may also reach loopback and private-range hosts
    /// when `allow` is set.
    pub fn with_private_hosts(allow: bool) -> Result<Self> {
        // Every redirect hop goes through the same guard as the first URL.
        let policy = Policy::custom(move |attempt| {
            match redirect_verdict(attempt.url(), attempt.previous().len(), allow) {
                Ok(()) => attempt.follow(),
                Err(reason) => attempt.error(reason),
            }
        });

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(policy)
            .timeout(Duration::from_secs(TRANSPORT_TIMEOUT_SECS))
            .build()
            .map_err(|e| RaglineError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            allow_private_hosts: allow,
        })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    #[instrument(skip(self), fields(%url))]
    async fn fetch(&self, url: &Url) -> Result<String> {
        if !self.allow_private_hosts && is_ssrf_target(url) {
            return Err(RaglineError::validation(format!(
                "refusing to fetch non-public URL: {url}"
            )));
        }

        let mut response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| RaglineError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RaglineError::Network(format!("{url}: HTTP {status}")));
        }

        if let Some(len) = response.content_length() {
            if len as usize > MAX_BODY_BYTES {
                return Err(RaglineError::Network(format!(
                    "{url}: body of {len} bytes exceeds limit"
                )));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| RaglineError::Network(format!("{url}: body read failed: {e}")))?
        {
            if body.len() + chunk.len() > MAX_BODY_BYTES {
                return Err(RaglineError::Network(format!(
                    "{url}: body exceeds {MAX_BODY_BYTES} bytes"
                )));
            }
            body.extend_from_slice(&chunk);
        }

        debug!(bytes = body.len(), "page fetched");
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Decide whether to follow a redirect to `next`. `previous` counts the URLs
/// already requested, the original one included.
fn redirect_verdict(
    next: &Url,
    previous: usize,
    allow_private: bool,
) -> std::result::Result<(), String> {
    if previous > MAX_REDIRECTS {
        return Err(format!("too many redirects (limit {MAX_REDIRECTS})"));
    }
    if !allow_private && is_ssrf_target(next) {
        return Err(format!("redirect to non-public URL refused: {next}"));
    }
    Ok(())
}

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(Host::Domain(host)) => {
            host == "localhost"
                || host.ends_with(".localhost")
                || host.ends_with(".local")
                || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (v6.segments()[0] & 0xffc0) == 0xfe80
                || v6.to_ipv4_mapped().is_some_and(|v4| is_private_ip(&IpAddr::V4(v4)))
        }
    }
}
