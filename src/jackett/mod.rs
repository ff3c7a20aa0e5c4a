// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Jackett search proxy.
//!
//! Forwards a query to Jackett's aggregated indexer endpoint and projects the
//! results down to the handful of fields the web UI renders.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Timeout for a search across all indexers (in seconds).
const SEARCH_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search timed out")]
    Timeout,

    #[error("cannot reach search aggregator: {0}")]
    Connect(String),

    #[error("search aggregator returned HTTP {status}")]
    Status { status: u16 },

    #[error("search request failed: {0}")]
    Request(String),

    #[error("unexpected search response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for SearchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Torznab category id for a UI category name.
///
/// Unknown names search every category.
pub fn category_id(name: &str) -> Option<u32> {
    match name.to_ascii_lowercase().as_str() {
        "movies" => Some(2000),
        "tv" => Some(5000),
        "software" => Some(4000),
        "games" => Some(1000),
        "audio" => Some(3000),
        _ => None,
    }
}

/// One raw result as Jackett reports it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawResult {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    seeders: Option<u64>,
    #[serde(default)]
    peers: Option<u64>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    magnet_uri: Option<String>,
    #[serde(default)]
    indexer: Option<String>,
    #[serde(default)]
    tracker: Option<String>,
    #[serde(default)]
    publish_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawResponse {
    #[serde(default)]
    results: Vec<RawResult>,
}

/// A search hit as served to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SearchResult {
    pub title: String,
    pub size: u64,
    pub seeders: u64,
    pub peers: u64,
    /// Download link, falling back to the magnet URI.
    pub link: Option<String>,
    pub indexer: Option<String>,
    pub publish_date: Option<String>,
}

impl From<RawResult> for SearchResult {
    fn from(raw: RawResult) -> Self {
        Self {
            title: raw.title.unwrap_or_default(),
            size: raw.size.unwrap_or(0),
            seeders: raw.seeders.unwrap_or(0),
            peers: raw.peers.unwrap_or(0),
            link: raw.link.filter(|l| !l.is_empty()).or(raw.magnet_uri),
            indexer: raw.indexer.or(raw.tracker),
            publish_date: raw.publish_date,
        }
    }
}

/// Client for Jackett's v2.0 API.
#[derive(Debug, Clone)]
pub struct JackettClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl JackettClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Search all indexers. `category` is a UI name such as `movies` or `tv`.
    pub async fn search(
        &self,
        query: &str,
        category: Option<&str>,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let url = format!("{}/api/v2.0/indexers/all/results", self.base_url);

        let mut params: Vec<(&str, String)> = vec![
            ("apikey", self.api_key.clone()),
            ("Query", query.to_string()),
        ];
        if let Some(id) = category.and_then(category_id) {
            params.push(("Category[]", id.to_string()));
        }

        tracing::debug!(query, category = ?category, "searching indexers");

        let response = self
            .http
            .get(&url)
            .query(&params)
            .timeout(Duration::from_secs(SEARCH_TIMEOUT_SECS))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status {
                status: status.as_u16(),
            });
        }

        let body: RawResponse = response.json().await?;
        Ok(body.results.into_iter().map(SearchResult::from).collect())
    }
}
