//! "Has anything under this directory changed since T" checks.
//!
//! The signal is file modification time, not a content hash: a touched but
//! unchanged file counts as a change, and the walk never reads file
//! contents. That keeps repeated checks on unchanged trees I/O-bound and
//! cheap.

use std::path::Path;
use std::time::SystemTime;
use walkdir::{DirEntry, WalkDir};

/// Directory names never descended into
pub const SKIP_DIRS: &[&str] = &[
    "node_modules",
    "bower_components",
    "jspm_packages",
    "dist",
    "build",
    "out",
    "coverage",
    "target",
    ".git",
    ".hg",
    ".svn",
    ".talos",
];

/// Extensions whose files count as package content
pub const CONTENT_EXTENSIONS: &[&str] = &[
    "js", "mjs", "cjs", "jsx", "ts", "mts", "cts", "tsx", "json", "css", "scss", "sass", "less",
    "vue", "svelte",
];

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIP_DIRS.contains(&name.as_ref())
}

fn is_content_file(entry: &DirEntry) -> bool {
    entry.file_type().is_file()
        && entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| CONTENT_EXTENSIONS.contains(&ext))
            .unwrap_or(false)
}

/// Modification times of every tracked file under `root`
fn content_mtimes(root: &Path) -> impl Iterator<Item = SystemTime> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| !is_skipped_dir(entry))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!("Skipping unreadable entry during staleness walk: {}", e);
                None
            }
        })
        .filter(is_content_file)
        .filter_map(|entry| entry.metadata().ok()?.modified().ok())
}

/// Whether any tracked file under `root` was modified after `since`.
///
/// `since == None` (never built) and a missing root are always stale.
pub fn is_stale(root: &Path, since: Option<SystemTime>) -> bool {
    let Some(since) = since else {
        return true;
    };
    if !root.is_dir() {
        return true;
    }

    content_mtimes(root).any(|mtime| mtime > since)
}

/// Most recent modification time across the tracked files under `root`
pub fn latest_mtime(root: &Path) -> Option<SystemTime> {
    content_mtimes(root).max()
}
