use crate::ResolveError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A single `name=path` registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasEntry {
    /// Module name as written in import specifiers (e.g. "react", "@org/ui")
    pub name: String,

    /// Source directory of the package
    pub dir: PathBuf,
}

/// Ordered, immutable alias table loaded once per process
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    entries: Vec<AliasEntry>,
}

/// Check whether a string is acceptable as a module name
pub fn is_valid_alias_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.starts_with('/')
}

impl AliasTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `(name, dir)` pairs in registration order.
    ///
    /// Invalid names and duplicates are skipped; the first registration wins.
    pub fn from_entries<I, N, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = (N, P)>,
        N: Into<String>,
        P: Into<PathBuf>,
    {
        let mut table = Self::new();
        for (name, dir) in entries {
            table.push(name.into(), dir.into());
        }
        table
    }

    /// Load an alias file.
    ///
    /// A missing file is a valid empty table. Relative directories are
    /// joined onto the directory containing the alias file.
    pub fn load(path: &Path) -> Result<Self, ResolveError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("Alias file {:?} not found, using empty table", path);
                return Ok(Self::new());
            }
            Err(source) => {
                return Err(ResolveError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let base_dir = path.parent().unwrap_or(Path::new("."));
        let table = Self::parse(&content, base_dir);
        tracing::info!("Loaded {} aliases from {:?}", table.len(), path);
        Ok(table)
    }

    /// Parse alias file contents. Unparsable lines are skipped, never fatal.
    pub fn parse(content: &str, base_dir: &Path) -> Self {
        let mut table = Self::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((name, dir)) = line.split_once('=') else {
                tracing::warn!("Skipping alias line {}: missing '=' in {:?}", idx + 1, line);
                continue;
            };

            let (name, dir) = (name.trim(), dir.trim());
            if !is_valid_alias_name(name) || dir.is_empty() {
                tracing::warn!("Skipping alias line {}: invalid entry {:?}", idx + 1, line);
                continue;
            }

            let dir = Path::new(dir);
            let dir = if dir.is_absolute() {
                dir.to_path_buf()
            } else {
                base_dir.join(dir)
            };

            table.push(name.to_string(), dir);
        }

        table
    }

    fn push(&mut self, name: String, dir: PathBuf) {
        if !is_valid_alias_name(&name) {
            tracing::warn!("Ignoring invalid alias name {:?}", name);
            return;
        }
        if self.contains(&name) {
            tracing::warn!("Duplicate alias {:?}, keeping first registration", name);
            return;
        }
        self.entries.push(AliasEntry { name, dir });
    }

    /// Source directory registered for `name`
    pub fn get(&self, name: &str) -> Option<&Path> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.dir.as_path())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    /// Entries in registration order
    pub fn iter(&self) -> impl Iterator<Item = &AliasEntry> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the most specific alias for a bare specifier.
    ///
    /// A name `n` matches when `specifier == n` or `specifier` starts with
    /// `n/`. The longest name wins; equal lengths keep registration order.
    /// Returns the entry and the remainder after `n/` (empty for an exact match).
    pub fn longest_match<'s>(&self, specifier: &'s str) -> Option<(&AliasEntry, &'s str)> {
        let mut best: Option<(&AliasEntry, &'s str)> = None;

        for entry in &self.entries {
            let remainder = if specifier == entry.name {
                ""
            } else if let Some(rest) = specifier
                .strip_prefix(entry.name.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            {
                rest
            } else {
                continue;
            };

            let longer = best
                .map(|(current, _)| entry.name.len() > current.name.len())
                .unwrap_or(true);
            if longer {
                best = Some((entry, remainder));
            }
        }

        best
    }
}
