use crate::map::{ImportMap, SpecifierMap};
use crate::ImportMapError;
use ouroboros_talos_prebundle::{scan_artifacts, ENTRY_FILE};
use ouroboros_talos_resolver::AliasTable;
use std::fmt;
use std::path::Path;

/// What to do when two inputs map one specifier to different URLs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Later input wins; the conflict is reported and logged
    #[default]
    LastWins,

    /// Any conflict fails the merge
    Strict,
}

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub policy: ConflictPolicy,

    /// URL prefix under which the deps directory is served
    pub url_prefix: String,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            policy: ConflictPolicy::LastWins,
            url_prefix: "/@deps/".to_string(),
        }
    }
}

/// One specifier mapped to two different URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Scope URL, or `None` for top-level imports
    pub scope: Option<String>,
    pub specifier: String,
    pub previous: String,
    pub replacement: String,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(
                f,
                "'{}' in scope '{}': '{}' replaced by '{}'",
                self.specifier, scope, self.previous, self.replacement
            ),
            None => write!(
                f,
                "'{}': '{}' replaced by '{}'",
                self.specifier, self.previous, self.replacement
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub map: ImportMap,
    pub conflicts: Vec<Conflict>,

    /// Names added from the deps directory, sorted
    pub discovered: Vec<String>,
}

/// Merge import maps in order, then add entries for prebundled packages
/// that no input mentions.
pub fn merge(
    inputs: &[ImportMap],
    deps_dir: Option<&Path>,
    aliases: Option<&AliasTable>,
    options: &MergeOptions,
) -> Result<MergeOutcome, ImportMapError> {
    let mut outcome = MergeOutcome::default();

    for input in inputs {
        merge_specifiers(&mut outcome.map.imports, &input.imports, None, options, &mut outcome.conflicts)?;

        for (scope, specifiers) in &input.scopes {
            let target = outcome.map.scopes.entry(scope.clone()).or_default();
            merge_specifiers(target, specifiers, Some(scope), options, &mut outcome.conflicts)?;
        }
    }

    if let Some(deps_dir) = deps_dir {
        let names = scan_artifacts(deps_dir).map_err(|source| ImportMapError::Io {
            path: deps_dir.to_path_buf(),
            source,
        })?;

        let prefix = with_trailing_slash(&options.url_prefix);
        for name in &names {
            if outcome.map.contains(name) {
                continue;
            }
            outcome
                .map
                .insert(name.clone(), format!("{}{}/{}", prefix, name, ENTRY_FILE));
            outcome.discovered.push(name.clone());
        }

        if let Some(aliases) = aliases {
            for name in names.iter().filter(|name| aliases.contains(name)) {
                let key = format!("{}/", name);
                if !outcome.map.contains(&key) {
                    outcome.map.insert(key, format!("{}{}/", prefix, name));
                }
            }
        }

        if !outcome.discovered.is_empty() {
            tracing::info!(
                "Discovered {} packages in {:?} missing from import maps",
                outcome.discovered.len(),
                deps_dir
            );
        }
    }

    Ok(outcome)
}

fn merge_specifiers(
    target: &mut SpecifierMap,
    source: &SpecifierMap,
    scope: Option<&String>,
    options: &MergeOptions,
    conflicts: &mut Vec<Conflict>,
) -> Result<(), ImportMapError> {
    for (specifier, url) in source {
        let Some(previous) = target.insert(specifier.clone(), url.clone()) else {
            continue;
        };
        if previous == *url {
            continue;
        }

        let conflict = Conflict {
            scope: scope.cloned(),
            specifier: specifier.clone(),
            previous,
            replacement: url.clone(),
        };

        match options.policy {
            ConflictPolicy::Strict => return Err(ImportMapError::Conflict(conflict)),
            ConflictPolicy::LastWins => {
                tracing::warn!("Import map conflict for {}", conflict);
                conflicts.push(conflict);
            }
        }
    }
    Ok(())
}

fn with_trailing_slash(prefix: &str) -> String {
    if prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{}/", prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> ImportMap {
        let mut map = ImportMap::new();
        for (k, v) in pairs {
            map.insert(*k, *v);
        }
        map
    }

    #[test]
    fn test_identical_entries_are_not_conflicts() {
        let inputs = [map(&[("a", "/x")]), map(&[("a", "/x"), ("b", "/b")])];
        let outcome = merge(&inputs, None, None, &MergeOptions::default()).unwrap();

        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.map.len(), 2);
    }

    #[test]
    fn test_scopes_merge_per_scope() {
        let mut first = ImportMap::new();
        first
            .scopes
            .entry("/admin/".to_string())
            .or_default()
            .insert("react".to_string(), "/r16.js".to_string());
        let mut second = ImportMap::new();
        second
            .scopes
            .entry("/admin/".to_string())
            .or_default()
            .insert("react".to_string(), "/r18.js".to_string());

        let outcome = merge(&[first, second], None, None, &MergeOptions::default()).unwrap();

        assert_eq!(outcome.map.scopes["/admin/"]["react"], "/r18.js");
        assert_eq!(outcome.conflicts[0].scope.as_deref(), Some("/admin/"));
    }

    #[test]
    fn test_prefix_without_slash() {
        assert_eq!(with_trailing_slash("/deps"), "/deps/");
        assert_eq!(with_trailing_slash("/deps/"), "/deps/");
    }
}
