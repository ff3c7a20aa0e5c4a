// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Poison-tolerant lock helpers.
//!
//! The placement status is written by the background loop and read by the
//! HTTP surface. A panic inside a placement cycle must not take the status
//! endpoint down with it, so these helpers log the poisoning and hand out the
//! guard anyway. A slightly stale status report is always preferable to a
//! failing endpoint.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::error!(
            target: "stagehand::locks",
            event = "LOCK_POISONED_READ",
            "RwLock was poisoned during read acquisition, recovering data"
        );
        poisoned.into_inner()
    })
}

/// Acquire a write lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::error!(
            target: "stagehand::locks",
            event = "LOCK_POISONED_WRITE",
            "RwLock was poisoned during write acquisition, recovering data"
        );
        poisoned.into_inner()
    })
}
