use crate::ImportMapError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Specifier -> URL table
pub type SpecifierMap = BTreeMap<String, String>;

/// A browser import map.
///
/// Keys stay sorted so serialized maps are stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMap {
    pub imports: SpecifierMap,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scopes: BTreeMap<String, SpecifierMap>,
}

impl ImportMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one import map document
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load an import map file
    pub fn load(path: &Path) -> Result<Self, ImportMapError> {
        let content = fs::read_to_string(path).map_err(|source| ImportMapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content).map_err(|source| ImportMapError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_json_pretty(&self) -> String {
        // BTreeMap<String, String> always serializes
        serde_json::to_string_pretty(self).unwrap_or_else(|_| String::from("{\"imports\":{}}"))
    }

    /// Write the map as one JSON document, creating parent directories
    pub fn write(&self, path: &Path) -> Result<(), ImportMapError> {
        let io_err = |source| ImportMapError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut json = self.to_json_pretty();
        json.push('\n');
        fs::write(path, json).map_err(io_err)
    }

    /// Add or replace a top-level mapping, returning the previous URL
    pub fn insert(&mut self, specifier: impl Into<String>, url: impl Into<String>) -> Option<String> {
        self.imports.insert(specifier.into(), url.into())
    }

    pub fn get(&self, specifier: &str) -> Option<&str> {
        self.imports.get(specifier).map(String::as_str)
    }

    pub fn contains(&self, specifier: &str) -> bool {
        self.imports.contains_key(specifier)
    }

    /// Number of top-level mappings
    pub fn len(&self) -> usize {
        self.imports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty() && self.scopes.is_empty()
    }
}
