//! Session manager
//!
//! Authenticates against the target site, persists the resulting cookies
//! for later runs, and falls back to an anonymous cookie-enabled session
//! when credentials are missing or login keeps failing.

use crate::config::SessionConfig;
use crate::records::SESSION_COOKIES_KEY;
use crate::store::{KvStore, KvStoreExt};
use crate::MirrorError;
use chrono::Utc;
use reqwest::cookie::Jar;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const LOGIN_PATH: &str = "/login";
const LOGIN_TIMEOUT: Duration = Duration::from_secs(20);
const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_JITTER_MS: u64 = 500;

/// Cookies captured from a successful login, persisted between runs
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedCookies {
    cookies: Vec<String>,
    host: String,
    saved_at: String,
}

/// An HTTP session against the target site
///
/// Holds one cookie-jar-enabled client reused for every item, description,
/// and review fetch of a run. Shipping fetches use their own isolated
/// clients (see the multi-market fetcher).
pub struct SessionManager {
    client: Client,
    authenticated: bool,
}

impl SessionManager {
    /// Establishes a session against `hosts` (ordered base URLs)
    ///
    /// Tries to log in when credentials are configured; otherwise, or when
    /// every attempt fails, returns an anonymous session. An HTTP 401/403
    /// aborts the login attempts immediately; retrying rejected
    /// credentials only burns the account.
    pub async fn establish(
        config: &SessionConfig,
        hosts: &[String],
        store: &Arc<dyn KvStore>,
    ) -> Result<Self, MirrorError> {
        let jar = Arc::new(Jar::default());
        restore_cookies(store, &jar, hosts);

        let client = build_session_client(Arc::clone(&jar))?;

        if !config.has_credentials() {
            tracing::info!("no credentials configured, using anonymous session");
            return Ok(Self {
                client,
                authenticated: false,
            });
        }

        match try_login(&client, config, hosts).await {
            Ok(cookies) => {
                persist_cookies(store, hosts, cookies);
                tracing::info!("login succeeded, session cookies persisted");
                Ok(Self {
                    client,
                    authenticated: true,
                })
            }
            Err(e) => {
                tracing::warn!("login failed ({}), falling back to anonymous session", e);
                Ok(Self {
                    client,
                    authenticated: false,
                })
            }
        }
    }

    /// Builds an anonymous session without touching the network (for tests
    /// and externally triggered single-item invocations)
    pub fn anonymous() -> Result<Self, MirrorError> {
        let jar = Arc::new(Jar::default());
        Ok(Self {
            client: build_session_client(jar)?,
            authenticated: false,
        })
    }

    /// The cookie-enabled client backing this session
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Whether a login succeeded for this session
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }
}

fn build_session_client(jar: Arc<Jar>) -> Result<Client, MirrorError> {
    let client = Client::builder()
        .cookie_provider(jar)
        .user_agent(concat!("market-mirror/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()?;
    Ok(client)
}

/// Attempts login with up to `max_attempts` rounds across all hosts
///
/// A round tries every host once. Success requires the configured auth
/// cookie in the response; a 2xx without it is still a failure. Rounds are
/// separated by an increasing jittered backoff.
pub async fn try_login(
    client: &Client,
    config: &SessionConfig,
    hosts: &[String],
) -> Result<Vec<String>, MirrorError> {
    let (Some(username), Some(password)) = (&config.username, &config.password) else {
        return Err(MirrorError::Auth {
            reason: "no credentials configured".to_string(),
        });
    };

    let mut last_failure = "no hosts configured".to_string();

    for round in 1..=config.max_attempts {
        for host in hosts {
            let url = format!("{host}{LOGIN_PATH}");
            let result = client
                .post(&url)
                .timeout(LOGIN_TIMEOUT)
                .form(&[("username", username.as_str()), ("password", password.as_str())])
                .send()
                .await;

            let response = match result {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("login request to {} failed: {}", url, e);
                    last_failure = e.to_string();
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(MirrorError::Auth {
                    reason: format!("credentials rejected with HTTP {}", status.as_u16()),
                });
            }

            if !status.is_success() {
                tracing::warn!("login to {} returned HTTP {}", url, status.as_u16());
                last_failure = format!("HTTP {}", status.as_u16());
                continue;
            }

            let cookies = set_cookie_values(&response);
            if has_auth_cookie(&cookies, &config.auth_cookie) {
                return Ok(cookies);
            }

            // 2xx without the auth cookie is a soft rejection (e.g. a
            // captcha interstitial), not a session.
            tracing::warn!(
                "login to {} returned 2xx without the '{}' cookie",
                url,
                config.auth_cookie
            );
            last_failure = format!("missing '{}' cookie", config.auth_cookie);
        }

        if round < config.max_attempts {
            let backoff = Duration::from_millis(
                BACKOFF_BASE_MS * u64::from(round) + fastrand::u64(0..BACKOFF_JITTER_MS),
            );
            tracing::debug!("login round {} failed, backing off {:?}", round, backoff);
            tokio::time::sleep(backoff).await;
        }
    }

    Err(MirrorError::Auth {
        reason: format!(
            "login failed after {} rounds: {}",
            config.max_attempts, last_failure
        ),
    })
}

fn set_cookie_values(response: &reqwest::Response) -> Vec<String> {
    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .collect()
}

fn has_auth_cookie(cookies: &[String], name: &str) -> bool {
    let prefix = format!("{name}=");
    cookies.iter().any(|c| c.trim_start().starts_with(&prefix))
}

fn restore_cookies(store: &Arc<dyn KvStore>, jar: &Arc<Jar>, hosts: &[String]) {
    let persisted: Option<PersistedCookies> = match store.get_json(SESSION_COOKIES_KEY) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("failed to read persisted session cookies: {}", e);
            None
        }
    };

    let Some(persisted) = persisted else {
        return;
    };

    let mut restored = 0;
    for host in hosts {
        if let Ok(url) = Url::parse(host) {
            for cookie in &persisted.cookies {
                jar.add_cookie_str(cookie, &url);
                restored += 1;
            }
        }
    }
    tracing::debug!("restored {} persisted session cookies", restored);
}

fn persist_cookies(store: &Arc<dyn KvStore>, hosts: &[String], cookies: Vec<String>) {
    let record = PersistedCookies {
        cookies,
        host: hosts.first().cloned().unwrap_or_default(),
        saved_at: Utc::now().to_rfc3339(),
    };
    if let Err(e) = store.put_json(SESSION_COOKIES_KEY, &record) {
        tracing::warn!("failed to persist session cookies: {}", e);
    }
}
