//! Narrow interface to the transform/bundle engine.
//!
//! Talos never parses JavaScript itself. Single-file transforms and
//! dependency bundles go through [`TransformEngine`]; [`EsbuildEngine`]
//! is the production implementation.

pub mod css;
pub mod engine;
pub mod esbuild;

pub use css::css_module;
pub use engine::{
    format_diagnostics, BundleOutput, BundleRequest, Diagnostic, EsTarget, JsxMode, Severity,
    TransformEngine, TransformOptions, TransformOutput,
};
pub use esbuild::EsbuildEngine;

/// Extensions handled by single-file transforms
pub const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "mts", "jsx", "js", "mjs"];

/// Whether a path has a transformable source extension
pub fn is_source_path(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| SOURCE_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_is_source_path() {
        assert!(is_source_path(Path::new("src/App.tsx")));
        assert!(is_source_path(Path::new("src/main.mjs")));
        assert!(!is_source_path(Path::new("public/logo.svg")));
        assert!(!is_source_path(Path::new("src/app.css")));
        assert!(!is_source_path(Path::new("Makefile")));
    }
}
