// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wire types for the qBittorrent Web API (v2).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse failure classes used to decide what a caller does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeouts, refused connections, 5xx, garbage bodies: retry next cycle.
    Transient,
    /// The backend rejected our session: invalidate and retry once.
    Authorization,
}

/// Errors from a single call to the download client.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("cannot reach download client during {operation}: {message}")]
    Connect { operation: &'static str, message: String },

    #[error("{operation} failed: {message}")]
    Request { operation: &'static str, message: String },

    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("download client rejected the session during {operation}")]
    Unauthorized { operation: &'static str },

    #[error("download client rejected {operation} again after re-authenticating")]
    ReauthExhausted { operation: &'static str },

    #[error("unexpected response from {operation}: {message}")]
    Decode { operation: &'static str, message: String },
}

impl BackendError {
    /// Failure class of this error.
    ///
    /// A rejection that survived one re-authentication is transient for the
    /// rest of the attempt: there is nothing more to do until the next cycle.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Unauthorized { .. } => FailureKind::Authorization,
            _ => FailureKind::Transient,
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Self::Timeout { operation }
            | Self::Connect { operation, .. }
            | Self::Request { operation, .. }
            | Self::Status { operation, .. }
            | Self::Unauthorized { operation }
            | Self::ReauthExhausted { operation }
            | Self::Decode { operation, .. } => operation,
        }
    }

    pub(crate) fn from_reqwest(operation: &'static str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout { operation }
        } else if e.is_connect() {
            Self::Connect {
                operation,
                message: e.to_string(),
            }
        } else if e.is_decode() {
            Self::Decode {
                operation,
                message: e.to_string(),
            }
        } else {
            Self::Request {
                operation,
                message: e.to_string(),
            }
        }
    }
}

/// A torrent as listed by `torrents/info`.
///
/// Only the fields this service uses; the backend sends many more.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TorrentInfo {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub name: String,
    /// Completion ratio in `0.0..=1.0`.
    #[serde(default)]
    pub progress: f64,
    /// Seconds remaining; qBittorrent reports 8640000 for "infinite".
    #[serde(default)]
    pub eta: i64,
    /// Download speed in bytes per second.
    #[serde(default)]
    pub dlspeed: i64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub save_path: String,
}

/// Which torrents `torrents/info` should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentFilter {
    All,
    Completed,
}

impl TorrentFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Completed => "completed",
        }
    }
}
