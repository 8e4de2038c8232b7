use crate::ResolveError;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Conditions tried when an export target is a condition object, in priority order
pub const EXPORT_CONDITIONS: &[&str] = &["import", "module", "browser", "default", "require"];

/// The parts of package.json that influence resolution
#[derive(Debug, Default, Deserialize)]
pub struct PackageJson {
    pub name: Option<String>,
    pub version: Option<String>,
    pub main: Option<String>,
    pub module: Option<String>,
    pub exports: Option<Value>,
}

/// Outcome of looking a subpath up in an `exports` map
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportsLookup {
    /// Package has no `exports` field; legacy resolution applies
    Unrestricted,

    /// Subpath maps to this package-relative target
    Target(String),

    /// `exports` exists but does not expose the subpath
    NotExported,
}

/// Read package.json from path
pub fn read_package_json(path: &Path) -> Result<PackageJson, ResolveError> {
    let content = fs::read_to_string(path).map_err(|source| ResolveError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ResolveError::PackageJson {
        path: path.to_path_buf(),
        source,
    })
}

impl PackageJson {
    /// All legacy entry fields in the order they are tried
    pub fn entry_fields(&self) -> impl Iterator<Item = &str> {
        [self.module.as_deref(), self.main.as_deref()].into_iter().flatten()
    }

    /// Resolve `subpath` ("." or "./x") through the `exports` field
    pub fn lookup_export(&self, subpath: &str) -> ExportsLookup {
        let Some(exports) = &self.exports else {
            return ExportsLookup::Unrestricted;
        };

        let target = match exports {
            // "exports": "./index.js" or ["./a.js", ...]
            Value::String(_) | Value::Array(_) if subpath == "." => resolve_export_value(exports),

            // Sugar: a condition object applies to "." only
            Value::Object(map) if !map.keys().any(|k| k.starts_with('.')) => {
                if subpath == "." {
                    resolve_export_value(exports)
                } else {
                    None
                }
            }

            Value::Object(map) => match map.get(subpath) {
                Some(value) => resolve_export_value(value),
                None => resolve_export_pattern(map, subpath),
            },

            _ => None,
        };

        match target {
            Some(target) => ExportsLookup::Target(target),
            None => ExportsLookup::NotExported,
        }
    }
}

/// Resolve an export value (string, condition object, or fallback array)
fn resolve_export_value(value: &Value) -> Option<String> {
    match value {
        Value::String(path) => Some(path.clone()),

        // Conditional exports: { "import": "./esm.js", "require": "./cjs.js" }
        Value::Object(map) => EXPORT_CONDITIONS
            .iter()
            .filter_map(|condition| map.get(*condition))
            .find_map(resolve_export_value),

        // Fallback list: first entry that resolves
        Value::Array(items) => items.iter().find_map(resolve_export_value),

        // null explicitly hides a subpath
        _ => None,
    }
}

/// Match "./features/*" style keys; the longest matching prefix wins
fn resolve_export_pattern(map: &serde_json::Map<String, Value>, subpath: &str) -> Option<String> {
    let mut best: Option<(&str, String)> = None;

    for (pattern, value) in map.iter() {
        let Some(matched) = match_export_pattern(pattern, subpath) else {
            continue;
        };
        let prefix_len = pattern.find('*').unwrap_or(pattern.len());
        let better = best
            .as_ref()
            .map(|(current, _)| prefix_len > current.find('*').unwrap_or(current.len()))
            .unwrap_or(true);
        if better {
            best = Some((pattern.as_str(), matched));
        }
    }

    let (pattern, matched) = best?;
    let target = resolve_export_value(&map[pattern])?;
    Some(target.replace('*', &matched))
}

/// Match export pattern (e.g., "./features/*" matches "./features/foo")
fn match_export_pattern(pattern: &str, subpath: &str) -> Option<String> {
    let (prefix, suffix) = pattern.split_once('*')?;
    if suffix.contains('*') {
        return None; // Only support single wildcard
    }

    if subpath.starts_with(prefix) && subpath.ends_with(suffix) {
        let start = prefix.len();
        let end = subpath.len() - suffix.len();
        if start <= end {
            return Some(subpath[start..end].to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn package(json: &str) -> PackageJson {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_read_package_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"name": "test-package", "version": "1.0.0", "main": "dist/index.js"}}"#
        )
        .unwrap();

        let package = read_package_json(file.path()).unwrap();
        assert_eq!(package.name.as_deref(), Some("test-package"));
        assert_eq!(package.version.as_deref(), Some("1.0.0"));
        assert_eq!(package.entry_fields().next(), Some("dist/index.js"));
    }

    #[test]
    fn test_invalid_package_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{ not json").unwrap();

        let err = read_package_json(file.path()).unwrap_err();
        assert!(matches!(err, ResolveError::PackageJson { .. }));
    }

    #[test]
    fn test_entry_field_prefers_module() {
        let pkg = package(r#"{"main": "cjs.js", "module": "esm.js"}"#);
        assert_eq!(pkg.entry_fields().next(), Some("esm.js"));
    }

    #[test]
    fn test_no_exports_is_unrestricted() {
        let pkg = package(r#"{"main": "index.js"}"#);
        assert_eq!(pkg.lookup_export("./anything"), ExportsLookup::Unrestricted);
    }

    #[test]
    fn test_exports_string() {
        let pkg = package(r#"{"exports": "./dist/index.js"}"#);
        assert_eq!(
            pkg.lookup_export("."),
            ExportsLookup::Target("./dist/index.js".to_string())
        );
        assert_eq!(pkg.lookup_export("./other"), ExportsLookup::NotExported);
    }

    #[test]
    fn test_exports_conditional_prefers_import() {
        let pkg = package(
            r#"{"exports": {".": {"require": "./cjs/index.js", "import": "./esm/index.js"}}}"#,
        );
        assert_eq!(
            pkg.lookup_export("."),
            ExportsLookup::Target("./esm/index.js".to_string())
        );
    }

    #[test]
    fn test_exports_condition_sugar() {
        let pkg = package(r#"{"exports": {"default": "./main.js"}}"#);
        assert_eq!(
            pkg.lookup_export("."),
            ExportsLookup::Target("./main.js".to_string())
        );
    }

    #[test]
    fn test_exports_nested_conditions() {
        let pkg = package(
            r#"{"exports": {".": {"browser": {"import": "./browser.mjs"}, "default": "./node.js"}}}"#,
        );
        assert_eq!(
            pkg.lookup_export("."),
            ExportsLookup::Target("./browser.mjs".to_string())
        );
    }

    #[test]
    fn test_exports_renamed_subpath() {
        let pkg = package(r#"{"exports": {"./button": "./src/components/Button.js"}}"#);
        assert_eq!(
            pkg.lookup_export("./button"),
            ExportsLookup::Target("./src/components/Button.js".to_string())
        );
        assert_eq!(pkg.lookup_export("./src/internal"), ExportsLookup::NotExported);
    }

    #[test]
    fn test_exports_null_hides_subpath() {
        let pkg = package(r#"{"exports": {"./*": "./lib/*.js", "./private/*": null}}"#);
        assert_eq!(pkg.lookup_export("./private/x"), ExportsLookup::NotExported);
        assert_eq!(
            pkg.lookup_export("./public"),
            ExportsLookup::Target("./lib/public.js".to_string())
        );
    }

    #[test]
    fn test_match_export_pattern() {
        assert_eq!(
            match_export_pattern("./features/*", "./features/auth"),
            Some("auth".to_string())
        );
        assert_eq!(
            match_export_pattern("./lib/*.js", "./lib/utils.js"),
            Some("utils".to_string())
        );
        assert_eq!(match_export_pattern("./foo/*", "./bar/baz"), None);
    }
}
