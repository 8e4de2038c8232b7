//! `.env` loading and environment defines.
//!
//! Files are parsed with `dotenvy` in order `.env`, `.env.local`, `.env.<mode>`,
//! `.env.<mode>.local`, later files overriding earlier ones. Variables whose
//! name starts with the configured prefix become `import.meta.env.<KEY>` and
//! `process.env.<KEY>` defines; explicit overrides win over every file.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

pub const DEFAULT_PREFIX: &str = "TALOS_";

/// Collect variables from one `.env` source; malformed lines are skipped
fn collect<R: Read>(iter: dotenvy::Iter<R>, source: &str, env: &mut BTreeMap<String, String>) {
    for item in iter {
        match item {
            Ok((key, value)) => {
                env.insert(key, value);
            }
            Err(dotenvy::Error::Io(e)) => {
                tracing::warn!("Stopped reading {}: {}", source, e);
                break;
            }
            Err(e) => tracing::warn!("Skipping line in {}: {}", source, e),
        }
    }
}

/// Parse a `.env` document without touching the process environment
pub fn parse_env_file(content: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    collect(dotenvy::from_read_iter(content.as_bytes()), "env input", &mut env);
    env
}

/// Load the `.env` files for `mode` from `root`; missing files are skipped
pub fn load_env_files(root: &Path, mode: &str) -> BTreeMap<String, String> {
    let files = [
        root.join(".env"),
        root.join(".env.local"),
        root.join(format!(".env.{mode}")),
        root.join(format!(".env.{mode}.local")),
    ];

    let mut env = BTreeMap::new();
    for file in &files {
        match dotenvy::from_path_iter(file) {
            Ok(iter) => {
                tracing::debug!("Loaded env file {:?}", file);
                collect(iter, &file.display().to_string(), &mut env);
            }
            Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Skipping env file {:?}: {}", file, e),
        }
    }
    env
}

/// Parse a `KEY=VALUE` override
pub fn parse_override(pair: &str) -> Option<(String, String)> {
    let (key, value) = pair.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

fn json_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Build the define set handed to the transform engine.
///
/// File variables are filtered by `prefix`; `overrides` are always exposed
/// and replace file values of the same key.
pub fn build_defines(
    file_vars: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
    mode: &str,
    prefix: &str,
) -> BTreeMap<String, String> {
    let mut exposed: BTreeMap<&str, &str> = file_vars
        .iter()
        .filter(|(key, _)| key.starts_with(prefix))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    for (key, value) in overrides {
        exposed.insert(key, value);
    }

    let is_prod = mode == "production";
    let mut defines = BTreeMap::new();
    defines.insert("import.meta.env.MODE".to_string(), json_string(mode));
    defines.insert("import.meta.env.DEV".to_string(), (!is_prod).to_string());
    defines.insert("import.meta.env.PROD".to_string(), is_prod.to_string());
    defines.insert(
        "process.env.NODE_ENV".to_string(),
        json_string(if is_prod { "production" } else { "development" }),
    );

    for (key, value) in exposed {
        let value = json_string(value);
        defines.insert(format!("import.meta.env.{key}"), value.clone());
        defines.insert(format!("process.env.{key}"), value);
    }

    defines
}

/// Load `.env` files for `mode` and build their defines
pub fn load_defines(
    root: &Path,
    mode: &str,
    prefix: &str,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    build_defines(&load_env_files(root, mode), overrides, mode, prefix)
}
