//! On-disk layout of a deps directory.
//!
//! ```text
//! <deps_dir>/react/index.js
//! <deps_dir>/react/_talos.json
//! <deps_dir>/@scope/pkg/index.js
//! ```

use crate::PrebundleError;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Entry module written for every prebundled package
pub const ENTRY_FILE: &str = "index.js";

/// Build metadata stored beside each artifact
pub const METADATA_FILE: &str = "_talos.json";

/// Directory holding the artifact for `name`
pub fn artifact_dir(deps_dir: &Path, name: &str) -> Result<PathBuf, PrebundleError> {
    let relative = Path::new(name);
    let plain = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if name.is_empty() || !plain {
        return Err(PrebundleError::InvalidName(name.to_string()));
    }
    Ok(deps_dir.join(relative))
}

/// Entry module path for `name`
pub fn artifact_path(deps_dir: &Path, name: &str) -> Result<PathBuf, PrebundleError> {
    Ok(artifact_dir(deps_dir, name)?.join(ENTRY_FILE))
}

/// Package names with an entry module in `deps_dir`, sorted.
///
/// Looks one level deep, or two for `@scope/` directories. A missing
/// directory yields no names.
pub fn scan_artifacts(deps_dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();

    for dir in read_subdirs(deps_dir)? {
        let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };

        if name.starts_with('@') {
            for scoped in read_subdirs(&dir)? {
                let Some(pkg) = scoped.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if scoped.join(ENTRY_FILE).is_file() {
                    names.push(format!("{}/{}", name, pkg));
                }
            }
        } else if !name.starts_with('.') && dir.join(ENTRY_FILE).is_file() {
            names.push(name);
        }
    }

    names.sort();
    Ok(names)
}

fn read_subdirs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn artifact(deps: &Path, name: &str) {
        let path = artifact_path(deps, name).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "export {};").unwrap();
    }

    #[test]
    fn test_artifact_paths() {
        let deps = Path::new("/out/deps");
        assert_eq!(
            artifact_path(deps, "react").unwrap(),
            PathBuf::from("/out/deps/react/index.js")
        );
        assert_eq!(
            artifact_path(deps, "@scope/pkg").unwrap(),
            PathBuf::from("/out/deps/@scope/pkg/index.js")
        );
    }

    #[test]
    fn test_traversal_names_rejected() {
        let deps = Path::new("/out/deps");
        assert!(artifact_dir(deps, "../etc").is_err());
        assert!(artifact_dir(deps, "a/../../b").is_err());
        assert!(artifact_dir(deps, "/abs").is_err());
        assert!(artifact_dir(deps, "").is_err());
    }

    #[test]
    fn test_scan_artifacts() {
        let temp = TempDir::new().unwrap();
        artifact(temp.path(), "react");
        artifact(temp.path(), "lodash");
        artifact(temp.path(), "@scope/pkg");
        // Directory without an entry module is not an artifact
        fs::create_dir_all(temp.path().join("half-built")).unwrap();

        let names = scan_artifacts(temp.path()).unwrap();
        assert_eq!(names, vec!["@scope/pkg", "lodash", "react"]);
    }

    #[test]
    fn test_scan_missing_dir() {
        let temp = TempDir::new().unwrap();
        assert!(scan_artifacts(&temp.path().join("nope")).unwrap().is_empty());
    }
}
