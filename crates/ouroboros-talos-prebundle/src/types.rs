use crate::PrebundleError;
use ouroboros_talos_transform::TransformOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Prebundle configuration options
#[derive(Debug, Clone)]
pub struct PrebundleOptions {
    /// Output directory for artifacts
    pub deps_dir: PathBuf,

    /// Options passed to the engine for every package
    pub transform: TransformOptions,

    /// Packages built at once by `prebundle_all`
    pub parallelism: usize,
}

impl Default for PrebundleOptions {
    fn default() -> Self {
        Self {
            deps_dir: PathBuf::from(".talos/deps"),
            transform: TransformOptions::default(),
            parallelism: 4,
        }
    }
}

/// A complete prebundled package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrebundleEntry {
    /// Dependency name (e.g. "react", "@scope/pkg")
    pub name: String,

    /// Package source directory the artifact was built from
    pub source_dir: PathBuf,

    /// Single-file ES module
    pub output_path: PathBuf,

    /// Most recent source modification time seen when building
    pub fingerprint: Option<SystemTime>,

    /// When the build started
    pub built_at: SystemTime,
}

/// Counters for cache behavior
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrebundleStats {
    pub hits: u64,
    pub rebuilds: u64,
    pub failures: u64,
}

/// Outcome of `prebundle_all`
#[derive(Debug, Default)]
pub struct PrebundleReport {
    pub entries: BTreeMap<String, Arc<PrebundleEntry>>,
    pub failures: BTreeMap<String, PrebundleError>,
}

impl PrebundleReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Serialized form of a [`PrebundleEntry`] (`_talos.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub name: String,
    pub source_dir: PathBuf,
    pub fingerprint_ms: Option<u64>,
    pub built_at_ms: u64,
}

pub(crate) fn to_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub(crate) fn from_millis(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

impl ArtifactMetadata {
    pub fn from_entry(entry: &PrebundleEntry) -> Self {
        Self {
            name: entry.name.clone(),
            source_dir: entry.source_dir.clone(),
            fingerprint_ms: entry.fingerprint.map(to_millis),
            built_at_ms: to_millis(entry.built_at),
        }
    }

    pub fn into_entry(self, output_path: PathBuf) -> PrebundleEntry {
        PrebundleEntry {
            name: self.name,
            source_dir: self.source_dir,
            output_path,
            fingerprint: self.fingerprint_ms.map(from_millis),
            built_at: from_millis(self.built_at_ms),
        }
    }
}
