//! Import map merging.
//!
//! Combines several browser import maps into one and fills in entries for
//! prebundled packages that none of the inputs mention.

use std::path::PathBuf;
use thiserror::Error;

pub mod map;
pub mod merge;

pub use map::{ImportMap, SpecifierMap};
pub use merge::{merge, Conflict, ConflictPolicy, MergeOptions, MergeOutcome};

#[derive(Error, Debug)]
pub enum ImportMapError {
    #[error("Import map conflict for {0}")]
    Conflict(Conflict),

    #[error("Invalid import map {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
