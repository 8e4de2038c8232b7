use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub mod alias;
pub mod package;

pub use alias::{is_valid_alias_name, AliasEntry, AliasTable};
pub use package::{ExportsLookup, PackageJson};

/// Errors that escape resolution.
///
/// A missing file or an unexported subpath is a miss, not an error; only
/// filesystem failures other than "not found" surface here.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid package.json at {path:?}: {source}")]
    PackageJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result of resolving one import string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSpecifier {
    /// Absolute path of the file the specifier refers to
    Path(PathBuf),

    /// Not handled here; the caller falls back to default resolution
    NoMatch,
}

impl ResolvedSpecifier {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ResolvedSpecifier::Path(path) => Some(path),
            ResolvedSpecifier::NoMatch => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, ResolvedSpecifier::Path(_))
    }
}

/// Module resolution options
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Directory that relative alias directories are joined onto
    pub root: PathBuf,

    /// Extensions to try when resolving
    pub extensions: Vec<String>,

    /// Whether to resolve index files
    pub resolve_index: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            extensions: vec![
                "js".to_string(),
                "mjs".to_string(),
                "jsx".to_string(),
                "ts".to_string(),
                "tsx".to_string(),
                "json".to_string(),
            ],
            resolve_index: true,
        }
    }
}

/// Maps bare specifiers onto aliased package directories
pub struct AliasResolver {
    table: Arc<AliasTable>,
    options: ResolveOptions,
}

/// Whether a specifier is relative or absolute (never aliased)
pub fn is_path_specifier(specifier: &str) -> bool {
    specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier == "."
        || specifier == ".."
        || specifier.starts_with('/')
        || Path::new(specifier).is_absolute()
}

impl AliasResolver {
    pub fn new(table: Arc<AliasTable>, options: ResolveOptions) -> Self {
        Self { table, options }
    }

    pub fn table(&self) -> &Arc<AliasTable> {
        &self.table
    }

    /// Absolute source directory for a registered alias
    pub fn package_dir(&self, name: &str) -> Option<PathBuf> {
        self.table.get(name).map(|dir| self.absolute(dir))
    }

    /// Resolve a module specifier against the alias table
    pub fn resolve(&self, specifier: &str, from_dir: &Path) -> Result<ResolvedSpecifier, ResolveError> {
        if is_path_specifier(specifier) {
            return Ok(ResolvedSpecifier::NoMatch);
        }

        let Some((entry, remainder)) = self.table.longest_match(specifier) else {
            tracing::debug!("No alias for '{}' (from {:?})", specifier, from_dir);
            return Ok(ResolvedSpecifier::NoMatch);
        };

        let package_dir = self.absolute(&entry.dir);
        tracing::debug!(
            "Alias '{}' matched '{}' -> {:?} (remainder '{}')",
            entry.name,
            specifier,
            package_dir,
            remainder
        );

        let resolved = if remainder.is_empty() {
            self.resolve_package_entry(&package_dir)?
        } else {
            self.resolve_package_subpath(&package_dir, remainder)?
        };

        match resolved {
            Some(path) => Ok(ResolvedSpecifier::Path(path)),
            None => {
                tracing::debug!("Alias '{}' could not resolve '{}', falling back", entry.name, specifier);
                Ok(ResolvedSpecifier::NoMatch)
            }
        }
    }

    /// Entry file of a registered package, if it resolves
    pub fn resolve_entry(&self, name: &str) -> Result<Option<PathBuf>, ResolveError> {
        match self.package_dir(name) {
            Some(dir) => self.resolve_package_entry(&dir),
            None => Ok(None),
        }
    }

    /// Entry file of an arbitrary package directory
    pub fn resolve_dir_entry(&self, package_dir: &Path) -> Result<Option<PathBuf>, ResolveError> {
        self.resolve_package_entry(&self.absolute(package_dir))
    }

    fn absolute(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.options.root.join(dir)
        }
    }

    /// Resolve the package's own entry point
    fn resolve_package_entry(&self, package_dir: &Path) -> Result<Option<PathBuf>, ResolveError> {
        let Some(package) = self.read_package(package_dir)? else {
            return self.try_index(package_dir);
        };

        match package.lookup_export(".") {
            ExportsLookup::Target(target) => return self.resolve_export_target(package_dir, &target),
            ExportsLookup::NotExported => return Ok(None),
            ExportsLookup::Unrestricted => {}
        }

        for entry in package.entry_fields() {
            if let Some(resolved) = self.try_extensions(&package_dir.join(entry))? {
                return Ok(Some(resolved));
            }
        }

        self.try_index(package_dir)
    }

    /// Resolve "name/remainder" inside the package, honoring its export map
    fn resolve_package_subpath(
        &self,
        package_dir: &Path,
        remainder: &str,
    ) -> Result<Option<PathBuf>, ResolveError> {
        let subpath = format!("./{}", remainder);

        if let Some(package) = self.read_package(package_dir)? {
            match package.lookup_export(&subpath) {
                ExportsLookup::Target(target) => {
                    return self.resolve_export_target(package_dir, &target)
                }
                ExportsLookup::NotExported => return Ok(None),
                ExportsLookup::Unrestricted => {}
            }
        }

        self.try_extensions(&package_dir.join(remainder))
    }

    /// exports targets are relative to the package directory
    fn resolve_export_target(
        &self,
        package_dir: &Path,
        target: &str,
    ) -> Result<Option<PathBuf>, ResolveError> {
        let relative = target.trim_start_matches("./");
        if relative.starts_with("../") || Path::new(relative).is_absolute() {
            tracing::warn!("Ignoring export target {:?} outside {:?}", target, package_dir);
            return Ok(None);
        }
        self.try_extensions(&package_dir.join(relative))
    }

    /// package.json of a directory; missing or invalid metadata counts as absent
    fn read_package(&self, package_dir: &Path) -> Result<Option<PackageJson>, ResolveError> {
        let manifest = package_dir.join("package.json");
        if !is_file(&manifest)? {
            return Ok(None);
        }

        match package::read_package_json(&manifest) {
            Ok(package) => Ok(Some(package)),
            Err(ResolveError::PackageJson { path, source }) => {
                tracing::warn!("Ignoring invalid {:?}: {}", path, source);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Try exact path, then appended extensions, then directory index
    fn try_extensions(&self, base: &Path) -> Result<Option<PathBuf>, ResolveError> {
        if is_file(base)? {
            return Ok(Some(base.to_path_buf()));
        }

        for ext in &self.options.extensions {
            let with_ext = append_extension(base, ext);
            if is_file(&with_ext)? {
                return Ok(Some(with_ext));
            }
        }

        if is_dir(base)? {
            return self.try_index(base);
        }

        Ok(None)
    }

    fn try_index(&self, dir: &Path) -> Result<Option<PathBuf>, ResolveError> {
        if !self.options.resolve_index {
            return Ok(None);
        }

        for ext in &self.options.extensions {
            let index = dir.join(format!("index.{}", ext.trim_start_matches('.')));
            if is_file(&index)? {
                return Ok(Some(index));
            }
        }

        Ok(None)
    }
}

fn append_extension(base: &Path, ext: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(".");
    name.push(ext.trim_start_matches('.'));
    PathBuf::from(name)
}

fn is_missing(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

fn metadata(path: &Path) -> Result<Option<std::fs::Metadata>, ResolveError> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if is_missing(&e) => Ok(None),
        Err(source) => Err(ResolveError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn is_file(path: &Path) -> Result<bool, ResolveError> {
    Ok(metadata(path)?.map(|m| m.is_file()).unwrap_or(false))
}

fn is_dir(path: &Path) -> Result<bool, ResolveError> {
    Ok(metadata(path)?.map(|m| m.is_dir()).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_specifiers_are_never_aliased() {
        assert!(is_path_specifier("./foo"));
        assert!(is_path_specifier("../bar"));
        assert!(is_path_specifier("/abs/path"));
        assert!(!is_path_specifier("react"));
        assert!(!is_path_specifier("@babel/core"));
    }

    #[test]
    fn test_relative_specifier_is_no_match() {
        let table = AliasTable::from_entries([(".", "/anything")]);
        let resolver = AliasResolver::new(Arc::new(table), ResolveOptions::default());

        let resolved = resolver.resolve("./local", Path::new("/project")).unwrap();
        assert_eq!(resolved, ResolvedSpecifier::NoMatch);
    }

    #[test]
    fn test_append_extension_keeps_dots() {
        assert_eq!(
            append_extension(Path::new("/p/button.styles"), "js"),
            PathBuf::from("/p/button.styles.js")
        );
    }
}
