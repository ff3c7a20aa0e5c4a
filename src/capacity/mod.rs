// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Capacity prober.
//!
//! Picks the managed volume with the most free space right now. Nothing is
//! cached: every call stats each candidate so a decision always reflects the
//! live filesystem.
//!
//! Stat calls block, and a hung mount can block indefinitely, so each probe
//! runs on the blocking pool under [`PROBE_TIMEOUT_SECS`]. A probe that times
//! out marks only that volume unreachable for the current decision.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::types::Volume;

/// Upper bound for probing a single volume.
pub const PROBE_TIMEOUT_SECS: u64 = 10;

/// Source of free-space readings for a mount point.
pub trait SpaceProbe: Send + Sync + 'static {
    /// Whether the mount point currently exists and is statable.
    fn is_reachable(&self, path: &Path) -> bool;

    /// Bytes available to this process on the filesystem holding `path`.
    fn available_space(&self, path: &Path) -> io::Result<u64>;
}

/// Probe backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSpaceProbe;

impl SpaceProbe for FsSpaceProbe {
    fn is_reachable(&self, path: &Path) -> bool {
        path.metadata().is_ok()
    }

    fn available_space(&self, path: &Path) -> io::Result<u64> {
        fs2::available_space(path)
    }
}

/// Free-space reading for one configured volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeReading {
    pub volume: Volume,
    /// `None` when the volume is unmounted, could not be statted, or did
    /// not answer in time.
    pub free_bytes: Option<u64>,
}

/// Selects target volumes by free space.
#[derive(Debug)]
pub struct CapacityProber<P = FsSpaceProbe> {
    probe: Arc<P>,
    timeout: Duration,
}

impl CapacityProber<FsSpaceProbe> {
    pub fn new() -> Self {
        Self::with_probe(FsSpaceProbe)
    }
}

impl Default for CapacityProber<FsSpaceProbe> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: SpaceProbe> CapacityProber<P> {
    /// Create a prober with a custom space source.
    pub fn with_probe(probe: P) -> Self {
        Self {
            probe: Arc::new(probe),
            timeout: Duration::from_secs(PROBE_TIMEOUT_SECS),
        }
    }

    /// Set the per-volume probe timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Free space of one volume, or `None` if it is unreachable.
    pub async fn free_space(&self, volume: &Volume) -> Option<u64> {
        let probe = Arc::clone(&self.probe);
        let path = volume.path.clone();
        let task = tokio::task::spawn_blocking(move || {
            if !probe.is_reachable(&path) {
                return Ok(None);
            }
            probe.available_space(&path).map(Some)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(Some(free)))) => Some(free),
            Ok(Ok(Ok(None))) => {
                tracing::debug!(volume = %volume.name, path = %volume.path.display(), "volume not mounted, skipping");
                None
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(
                    volume = %volume.name,
                    path = %volume.path.display(),
                    error = %e,
                    "failed to read free space"
                );
                None
            }
            Ok(Err(e)) => {
                tracing::error!(
                    volume = %volume.name,
                    path = %volume.path.display(),
                    error = %e,
                    "free space probe task failed"
                );
                None
            }
            Err(_) => {
                tracing::warn!(
                    volume = %volume.name,
                    path = %volume.path.display(),
                    timeout_secs = self.timeout.as_secs_f64(),
                    "free space probe timed out, skipping volume"
                );
                None
            }
        }
    }

    /// Readings for every configured volume, in configured order.
    pub async fn readings(&self, volumes: &[Volume]) -> Vec<VolumeReading> {
        let mut readings = Vec::with_capacity(volumes.len());
        for volume in volumes {
            readings.push(VolumeReading {
                volume: volume.clone(),
                free_bytes: self.free_space(volume).await,
            });
        }
        readings
    }

    /// The reachable volume with the strictly largest free space.
    ///
    /// Ties go to the earlier volume in configured order. Returns `None`
    /// when no volume is reachable.
    pub async fn best_volume<'a>(&self, volumes: &'a [Volume]) -> Option<(&'a Volume, u64)> {
        let mut best: Option<(&'a Volume, u64)> = None;

        for volume in volumes {
            let Some(free) = self.free_space(volume).await else {
                continue;
            };
            match best {
                Some((_, max_free)) if free <= max_free => {}
                _ => best = Some((volume, free)),
            }
        }

        best
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    const GB: u64 = 1024 * 1024 * 1024;

    /// In-memory probe: paths absent from the map are unmounted.
    #[derive(Debug, Default, Clone)]
    pub(crate) struct FakeProbe {
        pub free: HashMap<PathBuf, u64>,
    }

    impl FakeProbe {
        pub(crate) fn with(entries: &[(&str, u64)]) -> Self {
            Self {
                free: entries
                    .iter()
                    .map(|(path, free)| (PathBuf::from(path), *free))
                    .collect(),
            }
        }
    }

    impl SpaceProbe for FakeProbe {
        fn is_reachable(&self, path: &Path) -> bool {
            self.free.contains_key(path)
        }

        fn available_space(&self, path: &Path) -> io::Result<u64> {
            self.free
                .get(path)
                .copied()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "not mounted"))
        }
    }

    fn volumes() -> Vec<Volume> {
        vec![
            Volume::new("/media/A", "A-Drive", "A"),
            Volume::new("/media/B", "B-Drive", "B"),
            Volume::new("/media/C", "C-Drive", "C"),
        ]
    }

    #[tokio::test]
    async fn test_greedy_selection_skips_unreachable() {
        // A would have 100GB but is not mounted
        let prober = CapacityProber::with_probe(FakeProbe::with(&[
            ("/media/B", 50 * GB),
            ("/media/C", 80 * GB),
        ]));
        let volumes = volumes();
        let (best, free) = prober.best_volume(&volumes).await.unwrap();
        assert_eq!(best.label, "C");
        assert_eq!(free, 80 * GB);
    }

    #[tokio::test]
    async fn test_tie_goes_to_first_configured() {
        let prober = CapacityProber::with_probe(FakeProbe::with(&[
            ("/media/B", 50 * GB),
            ("/media/C", 50 * GB),
        ]));
        let volumes = volumes();
        let (best, _) = prober.best_volume(&volumes).await.unwrap();
        assert_eq!(best.label, "B");
    }

    #[tokio::test]
    async fn test_zero_free_space_still_selectable() {
        let prober = CapacityProber::with_probe(FakeProbe::with(&[("/media/C", 0)]));
        let volumes = volumes();
        let (best, free) = prober.best_volume(&volumes).await.unwrap();
        assert_eq!(best.label, "C");
        assert_eq!(free, 0);
    }

    #[tokio::test]
    async fn test_no_reachable_volume() {
        let prober = CapacityProber::with_probe(FakeProbe::default());
        assert!(prober.best_volume(&volumes()).await.is_none());
        assert!(prober.best_volume(&[]).await.is_none());
    }

    #[tokio::test]
    async fn test_readings_preserve_order() {
        let prober = CapacityProber::with_probe(FakeProbe::with(&[("/media/B", 7)]));
        let readings = prober.readings(&volumes()).await;
        let free: Vec<Option<u64>> = readings.iter().map(|r| r.free_bytes).collect();
        assert_eq!(free, vec![None, Some(7), None]);
    }

    #[tokio::test]
    async fn test_real_filesystem_probe() {
        let dir = tempfile::tempdir().unwrap();
        let mounted = Volume::new(dir.path(), "Temp", "T");
        let missing = Volume::new(dir.path().join("not-mounted"), "Gone", "G");

        let prober = CapacityProber::new();
        assert!(prober.free_space(&missing).await.is_none());
        assert!(prober.free_space(&mounted).await.is_some());

        let candidates = vec![missing, mounted];
        let (best, _) = prober.best_volume(&candidates).await.unwrap();
        assert_eq!(best.label, "T");
    }

    /// Probe whose `hung` mount point stalls every stat for `stall`.
    pub(crate) struct HangingProbe {
        pub hung: PathBuf,
        pub inner: FakeProbe,
        pub stall: Duration,
    }

    impl SpaceProbe for HangingProbe {
        fn is_reachable(&self, path: &Path) -> bool {
            if path == self.hung.as_path() {
                std::thread::sleep(self.stall);
            }
            self.inner.is_reachable(path)
        }

        fn available_space(&self, path: &Path) -> io::Result<u64> {
            self.inner.available_space(path)
        }
    }

    #[tokio::test]
    async fn test_hung_mount_times_out_and_is_skipped() {
        let probe = HangingProbe {
            hung: PathBuf::from("/media/A"),
            inner: FakeProbe::with(&[("/media/A", 900 * GB), ("/media/B", 50 * GB)]),
            stall: Duration::from_secs(2),
        };
        let prober = CapacityProber::with_probe(probe).with_timeout(Duration::from_millis(100));
        let volumes = volumes();

        let started = std::time::Instant::now();
        let (best, free) = prober.best_volume(&volumes).await.unwrap();

        assert_eq!(best.label, "B");
        assert_eq!(free, 50 * GB);
        assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
    }

    #[test]
    fn test_default_timeout() {
        assert_eq!(CapacityProber::new().timeout(), Duration::from_secs(PROBE_TIMEOUT_SECS));
    }
}
