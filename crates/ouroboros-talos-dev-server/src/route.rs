//! Request classification.
//!
//! Order: entry document, proxy rule (longest prefix), prebundled
//! dependency, static file, transformable source, not found.

use crate::config::{DevServerConfig, ProxyRule, ProxyTable};
use crate::transform_cache::ModuleKind;
use ouroboros_talos_prebundle::ENTRY_FILE;
use ouroboros_talos_resolver::AliasTable;
use ouroboros_talos_transform::is_source_path;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Entry,
    Proxy(ProxyRule),
    Prebundled {
        name: String,
        /// `jsx-runtime` for `/@deps/react/jsx-runtime`; `None` for the package entry
        subpath: Option<String>,
        /// Registered alias (may be rebuilt) rather than a found artifact
        aliased: bool,
    },
    Static(PathBuf),
    Transform { path: PathBuf, kind: ModuleKind },
    NotFound,
}

/// Turn a URL path into a relative filesystem path, rejecting traversal
pub fn safe_relative(url_path: &str) -> Option<PathBuf> {
    let trimmed = url_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let relative = PathBuf::from(trimmed);
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then_some(relative)
}

fn is_css_import(path: &Path, query: Option<&str>) -> bool {
    let is_css = path.extension().and_then(|e| e.to_str()) == Some("css");
    let import = query
        .map(|q| q.split('&').any(|pair| pair == "import" || pair.starts_with("import=")))
        .unwrap_or(false);
    is_css && import
}

/// Split `@scope/pkg/rest` or `pkg/rest` into package name and remainder
fn split_package(rest: &str) -> Option<(&str, &str)> {
    let segments = if rest.starts_with('@') { 2 } else { 1 };
    let mut end = 0;
    for _ in 0..segments {
        let from = if end == 0 { 0 } else { end + 1 };
        if from > rest.len() {
            return None;
        }
        end = match rest[from..].find('/') {
            Some(i) => from + i,
            None => rest.len(),
        };
    }
    let name = &rest[..end];
    let remainder = rest.get(end + 1..).unwrap_or("");
    (!name.is_empty() && !name.ends_with('/')).then_some((name, remainder))
}

/// Subpath named by the part of a deps URL after the package.
///
/// `index.js` is the artifact's entry file, so `react/index.js` is the
/// package itself and `react/jsx-runtime/index.js` is `jsx-runtime`.
/// Outer `None` rejects traversal.
fn dep_subpath(remainder: &str) -> Option<Option<String>> {
    let remainder = remainder.trim_end_matches('/');
    let subpath = if remainder == ENTRY_FILE {
        ""
    } else {
        remainder
            .strip_suffix(ENTRY_FILE)
            .and_then(|rest| rest.strip_suffix('/'))
            .unwrap_or(remainder)
    };

    if subpath.is_empty() {
        return Some(None);
    }
    safe_relative(subpath)?;
    Some(Some(subpath.to_string()))
}

pub struct Classifier {
    root: PathBuf,
    proxy: ProxyTable,
    deps_prefix: String,
    deps_dir: PathBuf,
    aliases: Arc<AliasTable>,
    static_root: PathBuf,
    source_dirs: Vec<PathBuf>,
}

impl Classifier {
    /// `deps_dir` is the directory artifacts are served from
    pub fn new(config: &DevServerConfig, deps_dir: PathBuf) -> Self {
        Self {
            root: config.root.clone(),
            proxy: ProxyTable::new(config.proxy.clone()),
            deps_prefix: config.deps_prefix(),
            deps_dir,
            aliases: config.aliases.clone(),
            static_root: config.absolute(&config.static_root),
            source_dirs: config.source_dirs.iter().map(|d| config.absolute(d)).collect(),
        }
    }

    pub fn classify(&self, path: &str, query: Option<&str>) -> Route {
        if path == "/" || path == "/index.html" {
            return Route::Entry;
        }

        if let Some(rule) = self.proxy.find(path) {
            return Route::Proxy(rule.clone());
        }

        if let Some(route) = self.classify_dep(path) {
            return route;
        }

        let Some(relative) = safe_relative(path) else {
            return Route::NotFound;
        };

        let css_import = is_css_import(&relative, query);
        // `?import` asks for the style module, never the raw stylesheet
        if !css_import {
            let file = self.static_root.join(&relative);
            if file.is_file() {
                return Route::Static(file);
            }
        }

        let file = self.root.join(&relative);
        let in_source_dir = self.source_dirs.iter().any(|dir| file.starts_with(dir));
        if in_source_dir && file.is_file() {
            if css_import {
                return Route::Transform {
                    path: file,
                    kind: ModuleKind::CssImport,
                };
            }
            if is_source_path(&file) {
                return Route::Transform {
                    path: file,
                    kind: ModuleKind::Script,
                };
            }
        }

        Route::NotFound
    }

    fn classify_dep(&self, path: &str) -> Option<Route> {
        let rest = path.strip_prefix(&self.deps_prefix)?;

        let (name, remainder, aliased) = match self.aliases.longest_match(rest) {
            Some((alias, remainder)) => (alias.name.clone(), remainder, true),
            None => {
                let (name, remainder) = split_package(rest)?;
                if !self.deps_dir.join(name).join(ENTRY_FILE).is_file() {
                    return None;
                }
                (name.to_string(), remainder, false)
            }
        };

        let subpath = dep_subpath(remainder)?;
        Some(Route::Prebundled { name, subpath, aliased })
    }
}
