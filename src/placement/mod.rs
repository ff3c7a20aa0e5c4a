// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Placement Loop
//!
//! Background task that moves finished downloads out of the staging
//! directory onto the managed volume with the most free space.
//!
//! Each cycle:
//!
//! 1. List completed items. On failure the rest of the cycle is skipped.
//! 2. Skip items outside staging and items this process already relocated.
//! 3. Classify the name and pick the roomiest reachable volume.
//! 4. Ask the backend to relocate the item to `<volume>/<label>-<category>`.
//!
//! A failed relocate is logged and not remembered, so the next cycle tries
//! again. The loop sleeps a fixed interval between cycles no matter how the
//! cycle ended, and a panic inside a cycle is contained to that cycle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capacity::{CapacityProber, FsSpaceProbe, SpaceProbe};
use crate::categorize::classify;
use crate::locks::{resilient_read, resilient_write};
use crate::qbit::{BackendError, FailureKind};
use crate::types::{Category, CompletedItem, PlacementDecision, Volume};
use crate::utils::{format_bytes, panic_message};

/// Default pause between two cycles.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// How many recent moves the status report keeps.
const RECENT_MOVES_CAPACITY: usize = 20;

/// The two download-client operations the loop depends on.
#[async_trait]
pub trait TorrentBackend: Send + Sync {
    /// Items currently in the completed state.
    async fn list_completed(&self) -> Result<Vec<CompletedItem>, BackendError>;

    /// Move the item's files to `location`.
    async fn relocate(&self, hash: &str, location: &Path) -> Result<(), BackendError>;
}

/// Failure class of a placement error, used by callers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    TransientBackend,
    Authorization,
    NoVolumeAvailable,
}

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("listing completed items failed: {0}")]
    List(#[source] BackendError),

    #[error("relocating {name} ({hash}) failed: {source}")]
    Relocate {
        hash: String,
        name: String,
        #[source]
        source: BackendError,
    },

    #[error("no managed volume is reachable for {name} ({hash})")]
    NoVolumeAvailable { hash: String, name: String },
}

impl PlacementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::List(source) | Self::Relocate { source, .. } => match source.kind() {
                FailureKind::Transient => ErrorKind::TransientBackend,
                FailureKind::Authorization => ErrorKind::Authorization,
            },
            Self::NoVolumeAvailable { .. } => ErrorKind::NoVolumeAvailable,
        }
    }
}

/// One item that could not be placed this cycle.
#[derive(Debug)]
pub struct ItemFailure {
    pub hash: String,
    pub name: String,
    pub error: PlacementError,
}

/// What a single cycle did.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Items the backend reported as completed.
    pub listed: usize,
    /// Items skipped because they are already outside staging or were
    /// relocated by an earlier cycle.
    pub already_placed: usize,
    pub moved: Vec<PlacementDecision>,
    pub failures: Vec<ItemFailure>,
}

/// A relocation the loop issued successfully.
#[derive(Debug, Clone, Serialize)]
pub struct MoveRecord {
    pub hash: String,
    pub name: String,
    pub category: Category,
    pub volume: String,
    pub destination: String,
    pub at: DateTime<Utc>,
}

/// Snapshot of the loop, served over HTTP.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlacementStatus {
    pub running: bool,
    pub cycles: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// Error that aborted the last cycle, if any.
    pub last_error: Option<String>,
    /// Items that could not be placed in the last cycle.
    pub pending_failures: usize,
    pub total_moved: u64,
    pub recent_moves: VecDeque<MoveRecord>,
}

pub type SharedStatus = Arc<RwLock<PlacementStatus>>;

/// The placement loop and its per-process memory.
pub struct PlacementLoop<P = FsSpaceProbe> {
    backend: Arc<dyn TorrentBackend>,
    prober: CapacityProber<P>,
    volumes: Vec<Volume>,
    staging: PathBuf,
    interval: Duration,
    /// hash -> destination of relocations confirmed by the backend.
    confirmed: HashMap<String, PathBuf>,
    status: SharedStatus,
}

impl PlacementLoop<FsSpaceProbe> {
    pub fn new(backend: Arc<dyn TorrentBackend>, volumes: Vec<Volume>, staging: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            prober: CapacityProber::new(),
            volumes,
            staging: staging.into(),
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            confirmed: HashMap::new(),
            status: Arc::new(RwLock::new(PlacementStatus::default())),
        }
    }
}

impl<P: SpaceProbe + 'static> PlacementLoop<P> {
    /// Set the pause between cycles.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Replace the capacity prober.
    pub fn with_prober<Q: SpaceProbe>(self, prober: CapacityProber<Q>) -> PlacementLoop<Q> {
        PlacementLoop {
            backend: self.backend,
            prober,
            volumes: self.volumes,
            staging: self.staging,
            interval: self.interval,
            confirmed: self.confirmed,
            status: self.status,
        }
    }

    /// Shared handle to the status report.
    pub fn status(&self) -> SharedStatus {
        Arc::clone(&self.status)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one scan over the completed items.
    ///
    /// Returns `Err` only when the initial listing failed; per-item failures
    /// are collected in the report.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, PlacementError> {
        let items = match self.backend.list_completed().await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(
                    operation = e.operation(),
                    error = %e,
                    "listing completed items failed, skipping cycle"
                );
                let error = PlacementError::List(e);
                self.record_aborted(&error.to_string());
                return Err(error);
            }
        };

        self.forget_departed(&items);

        let mut report = CycleReport {
            listed: items.len(),
            ..Default::default()
        };

        for item in &items {
            if !item.is_staged(&self.staging) {
                report.already_placed += 1;
                continue;
            }
            if let Some(destination) = self.confirmed.get(&item.hash) {
                tracing::debug!(
                    name = %item.name,
                    hash = %item.hash,
                    destination = %destination.display(),
                    "relocation already issued, waiting for backend to report new path"
                );
                report.already_placed += 1;
                continue;
            }

            match self.place(item).await {
                Ok(decision) => {
                    self.confirmed
                        .insert(decision.hash.clone(), decision.destination.clone());
                    report.moved.push(decision);
                }
                Err(error) => report.failures.push(ItemFailure {
                    hash: item.hash.clone(),
                    name: item.name.clone(),
                    error,
                }),
            }
        }

        if !report.moved.is_empty() || !report.failures.is_empty() {
            tracing::info!(
                listed = report.listed,
                moved = report.moved.len(),
                failed = report.failures.len(),
                "placement cycle finished"
            );
        }

        self.record_cycle(&report);
        Ok(report)
    }

    /// Decide a target for one staged item and issue the relocate.
    async fn place(&self, item: &CompletedItem) -> Result<PlacementDecision, PlacementError> {
        let category = classify(&item.name);

        let Some((volume, free)) = self.prober.best_volume(&self.volumes).await else {
            tracing::warn!(
                name = %item.name,
                hash = %item.hash,
                "no managed volume reachable, leaving item in staging"
            );
            return Err(PlacementError::NoVolumeAvailable {
                hash: item.hash.clone(),
                name: item.name.clone(),
            });
        };

        let decision = PlacementDecision::new(item, category, volume.clone());
        tracing::info!(
            name = %item.name,
            hash = %item.hash,
            category = %category,
            volume = %volume.name,
            free = %format_bytes(free),
            destination = %decision.destination.display(),
            "relocating completed item"
        );

        if let Err(source) = self.backend.relocate(&item.hash, &decision.destination).await {
            tracing::warn!(
                name = %item.name,
                hash = %item.hash,
                operation = source.operation(),
                error = %source,
                "relocate failed, will retry next cycle"
            );
            return Err(PlacementError::Relocate {
                hash: item.hash.clone(),
                name: item.name.clone(),
                source,
            });
        }

        Ok(decision)
    }

    /// Drop remembered relocations for items that left staging or vanished.
    fn forget_departed(&mut self, items: &[CompletedItem]) {
        if self.confirmed.is_empty() {
            return;
        }
        let still_staged: HashSet<&str> = items
            .iter()
            .filter(|item| item.is_staged(&self.staging))
            .map(|item| item.hash.as_str())
            .collect();
        self.confirmed
            .retain(|hash, _| still_staged.contains(hash.as_str()));
    }

    fn record_cycle(&self, report: &CycleReport) {
        let now = Utc::now();
        let mut status = resilient_write(&self.status);
        status.cycles += 1;
        status.last_cycle_at = Some(now);
        status.last_error = None;
        status.pending_failures = report.failures.len();
        status.total_moved += report.moved.len() as u64;
        for decision in &report.moved {
            if status.recent_moves.len() == RECENT_MOVES_CAPACITY {
                status.recent_moves.pop_front();
            }
            status.recent_moves.push_back(MoveRecord {
                hash: decision.hash.clone(),
                name: decision.name.clone(),
                category: decision.category,
                volume: decision.volume.name.clone(),
                destination: decision.destination.display().to_string(),
                at: now,
            });
        }
    }

    fn record_aborted(&self, error: &str) {
        let mut status = resilient_write(&self.status);
        status.cycles += 1;
        status.last_cycle_at = Some(Utc::now());
        status.last_error = Some(error.to_string());
        status.pending_failures = 0;
    }

    fn set_running(&self, running: bool) {
        resilient_write(&self.status).running = running;
    }

    /// Run cycles until `cancel` fires.
    ///
    /// The first cycle starts immediately. Cancellation is only observed
    /// between cycles.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            staging = %self.staging.display(),
            volumes = self.volumes.len(),
            interval_secs = self.interval.as_secs(),
            "placement loop started"
        );
        self.set_running(true);

        loop {
            match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
                Ok(_) => {}
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(panic = %message, "placement cycle panicked, continuing next cycle");
                    self.record_aborted(&format!("cycle panicked: {}", message));
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.set_running(false);
        tracing::info!("placement loop stopped");
    }

    /// Spawn the loop onto the runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

/// Clone of the current status, tolerant of a poisoned lock.
pub fn snapshot(status: &SharedStatus) -> PlacementStatus {
    resilient_read(status).clone()
}

impl<P> std::fmt::Debug for PlacementLoop<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacementLoop")
            .field("volumes", &self.volumes)
            .field("staging", &self.staging)
            .field("interval", &self.interval)
            .field("confirmed", &self.confirmed.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================
