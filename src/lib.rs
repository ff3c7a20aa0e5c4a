// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! stagehand - download-completion placement agent
//!
//! Watches a qBittorrent queue and moves every finished download out of the
//! staging directory onto the managed volume with the most free space, into a
//! `<label>-Movies` or `<label>-Shows` folder.
//!
//! # Core Modules
//!
//! - [`session`] - Shared backend session with login cooldown
//! - [`placement`] - The background placement loop
//! - [`categorize`] - Release-name classifier
//! - [`capacity`] - Free-space based volume selection
//! - [`qbit`] - qBittorrent Web API client
//! - [`jackett`] - Jackett search client
//! - [`server`] - HTTP pass-through endpoints
//! - [`config`] - Configuration loading and validation
//! - [`errors`] - User-facing error responses

pub mod capacity;
pub mod categorize;
pub mod config;
pub mod errors;
pub mod jackett;
pub mod locks;
pub mod placement;
pub mod qbit;
pub mod server;
pub mod session;
pub mod types;
pub mod utils;

pub use capacity::CapacityProber;
pub use categorize::classify;
pub use config::{AgentConfig, ConfigError};
pub use placement::{PlacementError, PlacementLoop, TorrentBackend};
pub use qbit::{BackendError, QbitClient};
pub use session::{Session, SessionManager};
pub use types::{Category, CompletedItem, PlacementDecision, Volume};
