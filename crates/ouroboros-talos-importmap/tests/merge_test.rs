use ouroboros_talos_importmap::{merge, ConflictPolicy, ImportMap, ImportMapError, MergeOptions};
use ouroboros_talos_resolver::AliasTable;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn map(pairs: &[(&str, &str)]) -> ImportMap {
    let mut map = ImportMap::new();
    for (specifier, url) in pairs {
        map.insert(*specifier, *url);
    }
    map
}

fn artifact(deps_dir: &Path, name: &str) {
    let dir = deps_dir.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("index.js"), "export default {};").unwrap();
}

#[test]
fn test_later_input_wins_and_conflict_is_reported() {
    let inputs = [map(&[("a", "/x")]), map(&[("a", "/y")])];

    let outcome = merge(&inputs, None, None, &MergeOptions::default()).unwrap();

    assert_eq!(outcome.map.get("a"), Some("/y"));
    assert_eq!(outcome.map.len(), 1);
    assert_eq!(outcome.conflicts.len(), 1);
    let conflict = &outcome.conflicts[0];
    assert_eq!(conflict.specifier, "a");
    assert_eq!(conflict.previous, "/x");
    assert_eq!(conflict.replacement, "/y");
    assert!(conflict.scope.is_none());
}

#[test]
fn test_strict_policy_fails_on_conflict() {
    let inputs = [map(&[("a", "/x")]), map(&[("a", "/y")])];
    let options = MergeOptions {
        policy: ConflictPolicy::Strict,
        ..Default::default()
    };

    let err = merge(&inputs, None, None, &options).unwrap_err();
    match err {
        ImportMapError::Conflict(conflict) => assert_eq!(conflict.specifier, "a"),
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[test]
fn test_prebundled_package_missing_from_inputs_is_discovered() {
    let temp = TempDir::new().unwrap();
    let deps_dir = temp.path().join("deps");
    artifact(&deps_dir, "lodash");
    artifact(&deps_dir, "react");

    let inputs = [map(&[("react", "https://cdn.example.com/react.js")])];
    let outcome = merge(&inputs, Some(&deps_dir), None, &MergeOptions::default()).unwrap();

    assert_eq!(outcome.map.get("lodash"), Some("/@deps/lodash/index.js"));
    // Explicit input entries are never overridden by discovery
    assert_eq!(outcome.map.get("react"), Some("https://cdn.example.com/react.js"));
    assert_eq!(outcome.discovered, vec!["lodash"]);
}

#[test]
fn test_discovery_adds_subpath_keys_for_aliases() {
    let temp = TempDir::new().unwrap();
    let deps_dir = temp.path().join("deps");
    artifact(&deps_dir, "@scope/ui");
    artifact(&deps_dir, "lodash");

    let aliases = AliasTable::from_entries([("@scope/ui", temp.path().join("pkgs/ui"))]);
    let options = MergeOptions {
        url_prefix: "/deps".to_string(),
        ..Default::default()
    };
    let outcome = merge(&[], Some(&deps_dir), Some(&aliases), &options).unwrap();

    assert_eq!(outcome.map.get("@scope/ui"), Some("/deps/@scope/ui/index.js"));
    assert_eq!(outcome.map.get("@scope/ui/"), Some("/deps/@scope/ui/"));
    assert_eq!(outcome.map.get("lodash"), Some("/deps/lodash/index.js"));
    assert_eq!(outcome.map.get("lodash/"), None);
}

#[test]
fn test_missing_deps_dir_discovers_nothing() {
    let temp = TempDir::new().unwrap();
    let outcome = merge(
        &[map(&[("a", "/a.js")])],
        Some(&temp.path().join("absent")),
        None,
        &MergeOptions::default(),
    )
    .unwrap();

    assert!(outcome.discovered.is_empty());
    assert_eq!(outcome.map.len(), 1);
}

#[test]
fn test_merged_map_round_trips_through_a_file() {
    let temp = TempDir::new().unwrap();
    let first = temp.path().join("app.json");
    let second = temp.path().join("vendor.json");
    fs::write(&first, r#"{"imports": {"app/": "/src/"}}"#).unwrap();
    fs::write(&second, r#"{"imports": {"zod": "/vendor/zod.js"}, "scopes": {"/src/": {"zod": "/vendor/zod3.js"}}}"#).unwrap();

    let inputs = vec![ImportMap::load(&first).unwrap(), ImportMap::load(&second).unwrap()];
    let outcome = merge(&inputs, None, None, &MergeOptions::default()).unwrap();

    let out = temp.path().join("dist/importmap.json");
    outcome.map.write(&out).unwrap();
    let written = ImportMap::load(&out).unwrap();

    assert_eq!(written.get("app/"), Some("/src/"));
    assert_eq!(written.scopes["/src/"]["zod"], "/vendor/zod3.js");
}
