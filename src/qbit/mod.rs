// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! qBittorrent integration
//!
//! Talks to the download client's Web API (v2) through the shared
//! [`SessionManager`]. Every call follows the same policy: acquire a session,
//! send, and if the backend rejects the session, invalidate it, re-acquire and
//! send exactly once more. A second rejection is reported as
//! [`BackendError::ReauthExhausted`].
//!
//! # Example
//!
//! ```no_run
//! use stagehand::qbit::QbitClient;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = QbitClient::new("http://qbittorrent:8080", "admin", "secret")?;
//! for item in client.list_completed().await? {
//!     println!("{} -> {}", item.name, item.save_path);
//! }
//! # Ok(())
//! # }
//! ```

pub mod types;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::header::{COOKIE, REFERER, SET_COOKIE};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::placement::TorrentBackend;
use crate::session::{Authenticator, Session, SessionConfig, SessionManager};
use crate::types::CompletedItem;

pub use types::{BackendError, FailureKind, TorrentFilter, TorrentInfo};

/// Timeout for login requests (in seconds).
const LOGIN_TIMEOUT_SECS: u64 = 10;

/// Timeout for light calls: list-all, pause, resume, delete, files.
const QUICK_TIMEOUT_SECS: u64 = 10;

/// Timeout for the placement loop's list and relocate calls.
const PLACEMENT_TIMEOUT_SECS: u64 = 30;

/// Timeout for adding a torrent (magnet resolution can be slow).
const ADD_TIMEOUT_SECS: u64 = 60;

/// Performs `auth/login` and extracts the `SID` cookie.
struct QbitLogin {
    base_url: String,
    username: String,
    password: String,
    http: reqwest::Client,
}

#[async_trait]
impl Authenticator for QbitLogin {
    async fn login(&self) -> anyhow::Result<String> {
        let url = format!("{}/api/v2/auth/login", self.base_url);

        tracing::debug!(url = %url, user = %self.username, "attempting login");

        let response = self
            .http
            .post(&url)
            .header(REFERER, &self.base_url)
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .timeout(Duration::from_secs(LOGIN_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| anyhow!(BackendError::from_reqwest("auth/login", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!(BackendError::Status {
                operation: "auth/login",
                status: status.as_u16(),
                body: String::new(),
            }));
        }

        let sid = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(parse_sid_cookie);

        match sid {
            Some(sid) => Ok(sid),
            None => {
                // qBittorrent answers 200 "Fails." for bad credentials
                let body = response.text().await.unwrap_or_default();
                Err(anyhow!("login response carried no SID cookie ({})", body.trim()))
            }
        }
    }
}

/// Extract the value of an `SID=...` cookie from one `Set-Cookie` header.
fn parse_sid_cookie(header: &str) -> Option<String> {
    let pair = header.split(';').next()?.trim();
    let value = pair.strip_prefix("SID=")?;
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Client for the qBittorrent Web API.
#[derive(Debug)]
pub struct QbitClient {
    /// Base URL, without trailing slash.
    base_url: String,
    /// HTTP client shared with the login flow.
    http: reqwest::Client,
    /// The one session shared by every caller of this client.
    sessions: SessionManager,
}

impl QbitClient {
    /// Create a client with the default login cooldown.
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> anyhow::Result<Self> {
        Self::with_session_config(url, username, password, SessionConfig::default())
    }

    /// Create a client with an explicit session configuration.
    pub fn with_session_config(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        session_config: SessionConfig,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(LOGIN_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client for qBittorrent")?;

        let base_url = url.into().trim_end_matches('/').to_string();
        let login = QbitLogin {
            base_url: base_url.clone(),
            username: username.into(),
            password: password.into(),
            http: http.clone(),
        };

        Ok(Self {
            base_url,
            http,
            sessions: SessionManager::new(Arc::new(login), session_config),
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The session manager guarding this client's credential.
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v2/{}", self.base_url, path)
    }

    /// Send one request with the given session and classify the outcome.
    async fn execute(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
        session: &Session,
    ) -> Result<reqwest::Response, BackendError> {
        let mut request = request.header(REFERER, &self.base_url);
        if let Some(cookie) = session.cookie_header() {
            request = request.header(COOKIE, cookie);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(operation, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(BackendError::Unauthorized { operation });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                operation,
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    /// Send a request, re-authenticating and retrying once on rejection.
    ///
    /// `build` is called once per attempt so the request can be rebuilt.
    async fn send_with_reauth<F>(
        &self,
        operation: &'static str,
        build: F,
    ) -> Result<reqwest::Response, BackendError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let session = self.sessions.acquire().await;
        match self.execute(operation, build(&self.http), &session).await {
            Err(BackendError::Unauthorized { .. }) => {
                tracing::info!(operation, "session rejected, re-authenticating and retrying once");
                self.sessions.invalidate_stale(&session).await;
                let session = self.sessions.acquire().await;
                self.execute(operation, build(&self.http), &session)
                    .await
                    .map_err(|e| match e {
                        BackendError::Unauthorized { operation } => {
                            BackendError::ReauthExhausted { operation }
                        }
                        other => other,
                    })
            }
            other => other,
        }
    }

    async fn list(
        &self,
        filter: TorrentFilter,
        timeout: Duration,
    ) -> Result<reqwest::Response, BackendError> {
        let url = self.endpoint("torrents/info");
        self.send_with_reauth("torrents/info", |http| {
            http.get(&url)
                .query(&[("filter", filter.as_str())])
                .timeout(timeout)
        })
        .await
    }

    /// Items in the completed state, as the placement loop sees them.
    pub async fn list_completed(&self) -> Result<Vec<CompletedItem>, BackendError> {
        let response = self
            .list(TorrentFilter::Completed, Duration::from_secs(PLACEMENT_TIMEOUT_SECS))
            .await?;
        response
            .json()
            .await
            .map_err(|e| BackendError::Decode {
                operation: "torrents/info",
                message: e.to_string(),
            })
    }

    /// Every torrent the client knows about.
    pub async fn list_all(&self) -> Result<Vec<TorrentInfo>, BackendError> {
        let response = self
            .list(TorrentFilter::All, Duration::from_secs(QUICK_TIMEOUT_SECS))
            .await?;
        response
            .json()
            .await
            .map_err(|e| BackendError::Decode {
                operation: "torrents/info",
                message: e.to_string(),
            })
    }

    /// Ask the client to move a torrent's files to `location`.
    pub async fn set_location(&self, hash: &str, location: &Path) -> Result<(), BackendError> {
        let url = self.endpoint("torrents/setLocation");
        let location = location.to_string_lossy().into_owned();
        self.send_with_reauth("torrents/setLocation", |http| {
            http.post(&url)
                .form(&[("hashes", hash), ("location", location.as_str())])
                .timeout(Duration::from_secs(PLACEMENT_TIMEOUT_SECS))
        })
        .await?;
        Ok(())
    }

    /// Add a torrent by magnet link or URL.
    pub async fn add(&self, urls: &str) -> Result<(), BackendError> {
        let url = self.endpoint("torrents/add");
        self.send_with_reauth("torrents/add", |http| {
            http.post(&url)
                .form(&[("urls", urls)])
                .timeout(Duration::from_secs(ADD_TIMEOUT_SECS))
        })
        .await?;
        Ok(())
    }

    pub async fn pause(&self, hash: &str) -> Result<(), BackendError> {
        self.post_hashes("torrents/pause", hash).await
    }

    pub async fn resume(&self, hash: &str) -> Result<(), BackendError> {
        self.post_hashes("torrents/resume", hash).await
    }

    /// Remove a torrent, optionally with its downloaded data.
    pub async fn delete(&self, hash: &str, delete_files: bool) -> Result<(), BackendError> {
        let url = self.endpoint("torrents/delete");
        let delete_files = if delete_files { "true" } else { "false" };
        self.send_with_reauth("torrents/delete", |http| {
            http.post(&url)
                .form(&[("hashes", hash), ("deleteFiles", delete_files)])
                .timeout(Duration::from_secs(QUICK_TIMEOUT_SECS))
        })
        .await?;
        Ok(())
    }

    /// Raw file listing of one torrent.
    pub async fn files(&self, hash: &str) -> Result<serde_json::Value, BackendError> {
        let url = self.endpoint("torrents/files");
        let response = self
            .send_with_reauth("torrents/files", |http| {
                http.get(&url)
                    .query(&[("hash", hash)])
                    .timeout(Duration::from_secs(QUICK_TIMEOUT_SECS))
            })
            .await?;
        response.json().await.map_err(|e| BackendError::Decode {
            operation: "torrents/files",
            message: e.to_string(),
        })
    }

    async fn post_hashes(&self, operation: &'static str, hash: &str) -> Result<(), BackendError> {
        let url = self.endpoint(operation);
        self.send_with_reauth(operation, |http| {
            http.post(&url)
                .form(&[("hashes", hash)])
                .timeout(Duration::from_secs(QUICK_TIMEOUT_SECS))
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TorrentBackend for QbitClient {
    async fn list_completed(&self) -> Result<Vec<CompletedItem>, BackendError> {
        QbitClient::list_completed(self).await
    }

    async fn relocate(&self, hash: &str, location: &Path) -> Result<(), BackendError> {
        self.set_location(hash, location).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sid_cookie() {
        assert_eq!(
            parse_sid_cookie("SID=abc123; HttpOnly; SameSite=Strict; path=/"),
            Some("abc123".to_string())
        );
        assert_eq!(parse_sid_cookie("SID=xyz"), Some("xyz".to_string()));
        assert_eq!(parse_sid_cookie("SID=; path=/"), None);
        assert_eq!(parse_sid_cookie("OTHER=1; path=/"), None);
    }

    #[test]
    fn test_client_configuration() {
        let client = QbitClient::new("http://qbittorrent:8080/", "admin", "secret").unwrap();
        assert_eq!(client.base_url(), "http://qbittorrent:8080");
        assert_eq!(
            client.endpoint("torrents/info"),
            "http://qbittorrent:8080/api/v2/torrents/info"
        );
    }
}
