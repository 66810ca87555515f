//! HTTP fetch helpers
//!
//! This module contains the low-level fetch machinery shared by the item
//! and seller pipelines:
//! - byte-capped GET with early abort once enough of the page is seen
//! - escalating timeout/byte-budget tiers with multi-host fallback
//! - network error classification

use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;

/// Bodies at or below this size are treated as block pages, not content
pub const MIN_BODY_BYTES: usize = 500;

/// Errors produced by fetch operations
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Body too small for {url}: {size} bytes")]
    BodyTooSmall { url: String, size: usize },

    #[error("All fetch tiers failed for {path}")]
    AllTiersFailed { path: String },
}

impl FetchError {
    /// Whether a retry could plausibly succeed
    ///
    /// 5xx and network-level failures are retryable; 4xx responses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Network { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::BodyTooSmall { .. } => true,
            Self::AllTiersFailed { .. } => false,
        }
    }
}

/// One timeout/byte-budget tier of an escalating fetch
///
/// `hosts` is ordered: the first entry is the primary fetch path, the rest
/// are alternates raced in parallel when the primary fails.
#[derive(Debug, Clone)]
pub struct AttemptSpec {
    pub timeout: Duration,
    /// Byte budget with early abort; None reads the whole body
    pub max_bytes: Option<usize>,
    pub hosts: Vec<String>,
}

/// Fetches a URL, reading at most `max_bytes` of the body
///
/// With a byte budget, reading stops as soon as the budget is reached and
/// the truncated body is returned; pages here carry their useful content
/// near the top. With `max_bytes = None` the whole body is read.
pub async fn fetch_capped(
    client: &Client,
    url: &str,
    timeout: Duration,
    max_bytes: Option<usize>,
) -> Result<String, FetchError> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| classify_reqwest_error(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let mut response = response;
    let mut body: Vec<u8> = Vec::new();
    loop {
        let chunk = response
            .chunk()
            .await
            .map_err(|e| classify_reqwest_error(url, e))?;
        match chunk {
            Some(bytes) => {
                body.extend_from_slice(&bytes);
                if let Some(cap) = max_bytes {
                    if body.len() >= cap {
                        body.truncate(cap);
                        break;
                    }
                }
            }
            None => break,
        }
    }

    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Fetches `path` through escalating tiers with multi-host fallback
///
/// Per tier: the primary host is tried first; on failure the alternate
/// hosts are raced in parallel and the first body larger than
/// [`MIN_BODY_BYTES`] wins. A tier that fully fails escalates to the next.
/// Each tier is attempted at most once.
pub async fn fetch_with_escalation(
    client: &Client,
    path: &str,
    specs: &[AttemptSpec],
) -> Result<String, FetchError> {
    for (tier, spec) in specs.iter().enumerate() {
        let Some(primary) = spec.hosts.first() else {
            continue;
        };

        let url = format!("{primary}{path}");
        match fetch_accepted(client, &url, spec.timeout, spec.max_bytes).await {
            Ok(body) => return Ok(body),
            Err(e) => {
                tracing::debug!("tier {} primary fetch failed for {}: {}", tier + 1, path, e);
            }
        }

        if spec.hosts.len() > 1 {
            if let Some(body) = race_alternates(client, path, spec).await {
                return Ok(body);
            }
        }

        tracing::debug!("tier {} exhausted for {}", tier + 1, path);
    }

    Err(FetchError::AllTiersFailed {
        path: path.to_string(),
    })
}

/// Races the alternate hosts of a tier, returning the first accepted body
async fn race_alternates(client: &Client, path: &str, spec: &AttemptSpec) -> Option<String> {
    let mut set = JoinSet::new();
    for host in spec.hosts.iter().skip(1) {
        let client = client.clone();
        let url = format!("{host}{path}");
        let timeout = spec.timeout;
        let max_bytes = spec.max_bytes;
        set.spawn(async move { fetch_accepted(&client, &url, timeout, max_bytes).await });
    }

    while let Some(joined) = set.join_next().await {
        if let Ok(Ok(body)) = joined {
            set.abort_all();
            return Some(body);
        }
    }
    None
}

/// Fetch plus the minimum-size acceptance check
async fn fetch_accepted(
    client: &Client,
    url: &str,
    timeout: Duration,
    max_bytes: Option<usize>,
) -> Result<String, FetchError> {
    let body = fetch_capped(client, url, timeout, max_bytes).await?;
    if body.len() <= MIN_BODY_BYTES {
        return Err(FetchError::BodyTooSmall {
            url: url.to_string(),
            size: body.len(),
        });
    }
    Ok(body)
}

/// Classifies a reqwest error into the fetch taxonomy
pub fn classify_reqwest_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn big_body(len: usize) -> String {
        "x".repeat(len)
    }

    #[test]
    fn test_retryable_classification() {
        let timeout = FetchError::Timeout {
            url: "u".to_string(),
        };
        assert!(timeout.is_retryable());

        let server_error = FetchError::Status {
            url: "u".to_string(),
            status: 503,
        };
        assert!(server_error.is_retryable());

        let not_found = FetchError::Status {
            url: "u".to_string(),
            status: 404,
        };
        assert!(!not_found.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_capped_truncates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string(big_body(10_000)))
            .mount(&server)
            .await;

        let client = Client::new();
        let url = format!("{}/page", server.uri());
        let body = fetch_capped(&client, &url, Duration::from_secs(5), Some(1_000))
            .await
            .unwrap();
        assert_eq!(body.len(), 1_000);
    }

    #[tokio::test]
    async fn test_fetch_capped_uncapped_reads_all() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string(big_body(10_000)))
            .mount(&server)
            .await;

        let client = Client::new();
        let url = format!("{}/page", server.uri());
        let body = fetch_capped(&client, &url, Duration::from_secs(5), None)
            .await
            .unwrap();
        assert_eq!(body.len(), 10_000);
    }

    #[tokio::test]
    async fn test_escalation_falls_back_to_alternate_host() {
        let primary = MockServer::start().await;
        let alternate = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/seller/s1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&primary)
            .await;
        Mock::given(method("GET"))
            .and(path("/seller/s1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(big_body(2_000)))
            .mount(&alternate)
            .await;

        let client = Client::new();
        let specs = vec![AttemptSpec {
            timeout: Duration::from_secs(5),
            max_bytes: Some(64 * 1024),
            hosts: vec![primary.uri(), alternate.uri()],
        }];

        let body = fetch_with_escalation(&client, "/seller/s1", &specs)
            .await
            .unwrap();
        assert_eq!(body.len(), 2_000);
    }

    #[tokio::test]
    async fn test_escalation_rejects_small_bodies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/seller/s1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("blocked"))
            .mount(&server)
            .await;

        let client = Client::new();
        let specs = vec![AttemptSpec {
            timeout: Duration::from_secs(5),
            max_bytes: None,
            hosts: vec![server.uri()],
        }];

        let result = fetch_with_escalation(&client, "/seller/s1", &specs).await;
        assert!(matches!(result, Err(FetchError::AllTiersFailed { .. })));
    }
}
