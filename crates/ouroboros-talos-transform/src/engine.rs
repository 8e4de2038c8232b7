use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A message reported by the engine, optionally pointing into a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub severity: Severity,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file: None,
            line: None,
            column: None,
            severity: Severity::Error,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(message)
        }
    }

    /// Attach a source location
    pub fn at(mut self, file: impl Into<String>, line: u32, column: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match (&self.file, self.line, self.column) {
            (Some(file), Some(line), Some(column)) => {
                write!(f, "{}:{}:{}: {}: {}", file, line, column, label, self.message)
            }
            (Some(file), _, _) => write!(f, "{}: {}: {}", file, label, self.message),
            _ => write!(f, "{}: {}", label, self.message),
        }
    }
}

/// Render diagnostics one per line
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// ECMAScript output target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EsTarget {
    ES2015,
    ES2017,
    ES2018,
    ES2019,
    ES2020,
    ES2021,
    ES2022,
    ESNext,
}

impl EsTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            EsTarget::ES2015 => "es2015",
            EsTarget::ES2017 => "es2017",
            EsTarget::ES2018 => "es2018",
            EsTarget::ES2019 => "es2019",
            EsTarget::ES2020 => "es2020",
            EsTarget::ES2021 => "es2021",
            EsTarget::ES2022 => "es2022",
            EsTarget::ESNext => "esnext",
        }
    }
}

/// How JSX is lowered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsxMode {
    /// React 17+ automatic runtime
    Automatic,

    /// Classic pragma calls (e.g. React.createElement / React.Fragment)
    Classic { factory: String, fragment: String },
}

/// Options shared by single-file transforms and dependency bundles
#[derive(Debug, Clone)]
pub struct TransformOptions {
    /// Identifier -> replacement expression (already JSON-encoded where needed)
    pub defines: BTreeMap<String, String>,

    /// Emit inline source maps
    pub source_maps: bool,

    pub jsx: JsxMode,

    pub target: EsTarget,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            defines: BTreeMap::new(),
            source_maps: true,
            jsx: JsxMode::Automatic, // Use React 17+ automatic runtime
            target: EsTarget::ES2020,
        }
    }
}

/// Result of transforming one file
#[derive(Debug, Clone, Default)]
pub struct TransformOutput {
    /// Transformed ES module source
    pub code: String,

    /// Source map reference (inline data URL when inline maps are on)
    pub source_map: Option<String>,

    pub diagnostics: Vec<Diagnostic>,
}

impl TransformOutput {
    pub fn failed(diagnostic: Diagnostic) -> Self {
        Self {
            diagnostics: vec![diagnostic],
            ..Default::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// A multi-entry bundle request
#[derive(Debug, Clone)]
pub struct BundleRequest {
    pub entry_points: Vec<PathBuf>,

    /// Single output file (used when there is one entry and no splitting)
    pub outfile: Option<PathBuf>,

    /// Output directory (used for splitting or several entries)
    pub outdir: Option<PathBuf>,

    /// Bare names left as imports; `name/*` subpaths are external too
    pub externals: BTreeSet<String>,

    /// Emit shared chunks for code-splitting
    pub splitting: bool,

    pub minify: bool,

    /// Directory the engine runs in (relative paths in diagnostics are relative to it)
    pub working_dir: Option<PathBuf>,

    pub options: TransformOptions,
}

impl BundleRequest {
    /// Bundle one entry into one ES module file
    pub fn single(entry: impl Into<PathBuf>, outfile: impl Into<PathBuf>) -> Self {
        Self {
            entry_points: vec![entry.into()],
            outfile: Some(outfile.into()),
            outdir: None,
            externals: BTreeSet::new(),
            splitting: false,
            minify: false,
            working_dir: None,
            options: TransformOptions::default(),
        }
    }
}

/// Result of a bundle run
#[derive(Debug, Clone, Default)]
pub struct BundleOutput {
    /// Files written by the engine
    pub artifacts: Vec<PathBuf>,

    pub diagnostics: Vec<Diagnostic>,

    /// Input file -> imported paths, as reported by the engine
    pub dependency_graph: BTreeMap<String, Vec<String>>,
}

impl BundleOutput {
    pub fn failed(diagnostic: Diagnostic) -> Self {
        Self {
            diagnostics: vec![diagnostic],
            ..Default::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// The black-box transform/bundle engine.
///
/// Implementations report every failure as error diagnostics instead of
/// returning `Err` or panicking.
#[async_trait]
pub trait TransformEngine: Send + Sync {
    /// Transform a single TS/JSX/JS file into an ES module
    async fn transform_file(&self, path: &Path, options: &TransformOptions) -> TransformOutput;

    /// Bundle one or more entries
    async fn bundle(&self, request: &BundleRequest) -> BundleOutput;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display() {
        let diag = Diagnostic::error("Unexpected token").at("src/App.tsx", 3, 14);
        assert_eq!(diag.to_string(), "src/App.tsx:3:14: error: Unexpected token");

        let diag = Diagnostic::warning("Unused import");
        assert_eq!(diag.to_string(), "warning: Unused import");
    }

    #[test]
    fn test_output_error_detection() {
        let mut output = TransformOutput::default();
        output.diagnostics.push(Diagnostic::warning("meh"));
        assert!(!output.has_errors());

        output.diagnostics.push(Diagnostic::error("bad"));
        assert!(output.has_errors());
    }

    #[test]
    fn test_default_options() {
        let options = TransformOptions::default();
        assert_eq!(options.jsx, JsxMode::Automatic);
        assert_eq!(options.target.as_str(), "es2020");
    }
}
