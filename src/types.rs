// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Canonical types used across stagehand.
//!
//! This module provides the shared vocabulary of the placement agent:
//! volumes, content categories, completed items and placement decisions.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A managed storage mount that completed items may be relocated onto.
///
/// Volumes are static configuration and are never mutated at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Mount point of the volume (e.g. `/media/A`).
    pub path: PathBuf,
    /// Human-readable name (e.g. `A-Drive`).
    pub name: String,
    /// Short label used to build destination folder names (e.g. `A`).
    pub label: String,
}

impl Volume {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            label: label.into(),
        }
    }

    /// Folder name for a category on this volume: `<label>-<category>`.
    pub fn folder_name(&self, category: Category) -> String {
        format!("{}-{}", self.label, category)
    }

    /// Absolute destination for a category on this volume.
    pub fn destination(&self, category: Category) -> PathBuf {
        self.path.join(self.folder_name(category))
    }
}

/// Coarse content classification used to choose a destination subfolder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Movies,
    Shows,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movies => "Movies",
            Self::Shows => "Shows",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of a finished item as reported by the download client.
///
/// Sourced fresh every poll cycle; never cached across cycles.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CompletedItem {
    pub hash: String,
    pub name: String,
    #[serde(rename = "save_path", default)]
    pub save_path: String,
    /// Completion ratio in `0.0..=1.0`.
    #[serde(default)]
    pub progress: f64,
}

impl CompletedItem {
    /// True while the item still sits in the staging location.
    ///
    /// Matching is a component-wise prefix test: the staging root itself
    /// and any directory below it count, a sibling such as
    /// `/media/A/downloads-old` does not.
    pub fn is_staged(&self, staging: &Path) -> bool {
        Path::new(&self.save_path).starts_with(staging)
    }
}

/// Where one item should go, computed per cycle and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementDecision {
    pub hash: String,
    pub name: String,
    pub category: Category,
    pub volume: Volume,
    pub destination: PathBuf,
}

impl PlacementDecision {
    pub fn new(item: &CompletedItem, category: Category, volume: Volume) -> Self {
        let destination = volume.destination(category);
        Self {
            hash: item.hash.clone(),
            name: item.name.clone(),
            category,
            volume,
            destination,
        }
    }
}
