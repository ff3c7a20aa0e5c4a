// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Release-name categorizer.
//!
//! Guesses whether a finished download is a show or a movie from its display
//! name alone. Episode markers (`S01E02`), `Season 3`, `Complete Series` and
//! `Collection` mean Shows; everything else, including names that match
//! nothing at all, falls through to Movies.

use regex::Regex;
use std::sync::LazyLock;

use crate::types::Category;

/// Markers that identify episodic content. Case-insensitive.
static SHOW_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(s\d{1,2}e\d{1,2}|season\s?\d+|complete\s?series|collection)")
        .expect("show marker regex is valid")
});

/// Classify a release name. Movies is the fallback for anything ambiguous.
pub fn classify(name: &str) -> Category {
    if SHOW_MARKERS.is_match(name) {
        Category::Shows
    } else {
        Category::Movies
    }
}
