//! HTTP client for the scanner with XSRF token lifecycle.
//!
//! # Token Lifecycle
//!
//! 1. Read the held token (shared lock). If there is none, refresh first.
//! 2. POST the scan with the token in `X-XSRF-TOKEN`.
//! 3. On a transport failure or HTTP 419, refresh under the exclusive lock
//!    and retry exactly once.
//! 4. A homepage response without the cookie fails the call with
//!    [`ScannerError::TokenNotFound`].
//!
//! Two callers may both decide a refresh is needed; the second refresh is
//! redundant but harmless.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, REFERER, SET_COOKIE, USER_AGENT};
use reqwest::Response;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use zone_common::config::ScannerConfig;

use super::{ScanSource, ScannerError};
use crate::data::{ScanCandidate, ScanResponse};

/// Cookie holding the anti-forgery token
pub const XSRF_COOKIE: &str = "XSRF-TOKEN";

/// Header the scanner expects the token in
const XSRF_HEADER: &str = "X-XSRF-TOKEN";

/// Token-mismatch status used by the scanner
const TOKEN_MISMATCH: u16 = 419;

/// Scanner client.
///
/// The token is scoped to this instance; separate clients never share it.
pub struct ScannerClient {
    client: reqwest::Client,
    homepage_url: String,
    scan_url: String,
    referer: String,
    user_agent: String,
    token: RwLock<Option<String>>,
}

impl ScannerClient {
    /// Create from config
    pub fn from_config(config: &ScannerConfig) -> Self {
        let base = config.base_url.trim_end_matches('/');
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .cookie_store(true)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            homepage_url: format!("{}/", base),
            scan_url: format!("{}{}", base, config.scan_path),
            referer: format!("{}/screener/", base),
            user_agent: config.user_agent.clone(),
            token: RwLock::new(None),
        }
    }

    /// Start with a token obtained elsewhere instead of fetching one lazily.
    pub fn with_token(self, token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
            ..self
        }
    }

    /// Currently held token, if any.
    pub async fn current_token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    /// Fetch the homepage and replace the held token with its XSRF cookie.
    ///
    /// Holds the exclusive lock for the whole refresh so refreshes never
    /// interleave.
    pub async fn refresh_token(&self) -> Result<String, ScannerError> {
        let mut guard = self.token.write().await;

        debug!(url = %self.homepage_url, "Refreshing scanner token");

        let response = self
            .client
            .get(&self.homepage_url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(network_error)?;

        let token = extract_xsrf_token(response.headers()).ok_or(ScannerError::TokenNotFound)?;
        *guard = Some(token.clone());

        info!("Scanner token refreshed");
        Ok(token)
    }

    async fn post_scan(&self, clause: &str, token: &str) -> Result<Response, ScannerError> {
        self.client
            .post(&self.scan_url)
            .header(XSRF_HEADER, token)
            .header(USER_AGENT, &self.user_agent)
            .header(REFERER, &self.referer)
            .header(ACCEPT, "application/json")
            .form(&[("scan_clause", clause)])
            .send()
            .await
            .map_err(network_error)
    }
}

#[async_trait]
impl ScanSource for ScannerClient {
    async fn fetch_candidates(&self, clause: &str) -> Result<Vec<ScanCandidate>, ScannerError> {
        // Read guard is dropped at the end of this statement
        let held = self.current_token().await;
        let token = match held {
            Some(token) => token,
            None => self.refresh_token().await?,
        };

        let response = match self.post_scan(clause, &token).await {
            Ok(response) if response.status().as_u16() != TOKEN_MISMATCH => response,
            Ok(_) => {
                warn!("Scanner rejected token (HTTP 419), refreshing and retrying");
                let fresh = self.refresh_token().await?;
                self.post_scan(clause, &fresh).await?
            }
            Err(e) => {
                warn!(error = %e, "Scanner request failed, refreshing token and retrying");
                let fresh = self.refresh_token().await?;
                self.post_scan(clause, &fresh).await?
            }
        };

        let status = response.status();
        if !status.is_success() {
            let err = ScannerError::Status {
                code: status.as_u16(),
            };
            if err.is_token_mismatch() {
                warn!("Scanner rejected the refreshed token");
            }
            return Err(err);
        }

        let body = response.text().await.map_err(network_error)?;
        let parsed: ScanResponse =
            serde_json::from_str(&body).map_err(|e| ScannerError::Decode(e.to_string()))?;

        debug!(candidates = parsed.data.len(), "Scanner returned candidates");
        Ok(parsed.data)
    }
}

fn network_error(e: reqwest::Error) -> ScannerError {
    if e.is_timeout() {
        ScannerError::Network("Request timeout".into())
    } else if e.is_connect() {
        ScannerError::Network("Connection failed".into())
    } else {
        ScannerError::Network(e.to_string())
    }
}

/// Find the XSRF cookie among `Set-Cookie` headers and URL-decode its value.
fn extract_xsrf_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .find_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            if name.trim() != XSRF_COOKIE {
                return None;
            }
            urlencoding::decode(value.trim())
                .ok()
                .map(|decoded| decoded.into_owned())
        })
        .filter(|token| !token.is_empty())
}

// ============================================================================
// Tests
// ============================================================================
