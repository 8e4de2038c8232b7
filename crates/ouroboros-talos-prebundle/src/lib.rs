use ouroboros_talos_resolver::ResolveError;
use ouroboros_talos_transform::{format_diagnostics, Diagnostic};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod cache;
pub mod keyed;
pub mod layout;
pub mod staleness;
pub mod types;

pub use cache::PrebundleCache;
pub use keyed::{KeyGuard, KeyedLocks};
pub use layout::{artifact_dir, artifact_path, scan_artifacts, ENTRY_FILE, METADATA_FILE};
pub use staleness::{is_stale, latest_mtime};
pub use types::{ArtifactMetadata, PrebundleEntry, PrebundleOptions, PrebundleReport, PrebundleStats};

/// Prebundling failures; a failed build never replaces the previous entry
#[derive(Error, Debug)]
pub enum PrebundleError {
    #[error("Unknown package '{0}': not in the alias table")]
    UnknownPackage(String),

    #[error("Invalid package name '{0}'")]
    InvalidName(String),

    #[error("No entry point for '{name}' in {dir:?}")]
    NoEntryPoint { name: String, dir: PathBuf },

    #[error("'{specifier}' is not exported by or found in {dir:?}")]
    UnresolvedSubpath { specifier: String, dir: PathBuf },

    #[error("Failed to prebundle '{name}':\n{}", format_diagnostics(.diagnostics))]
    Build {
        name: String,
        diagnostics: Vec<Diagnostic>,
    },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Prebundle task for '{name}' failed: {message}")]
    Task { name: String, message: String },
}

impl PrebundleError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        PrebundleError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Engine diagnostics, when the failure came from the bundle step
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            PrebundleError::Build { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }
}
