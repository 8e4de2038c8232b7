//! Transform engine backed by the `esbuild` executable.
//!
//! Each call spawns one esbuild process. Log output is parsed into
//! [`Diagnostic`]s; a missing binary or crash becomes an error diagnostic.

use crate::engine::{
    BundleOutput, BundleRequest, Diagnostic, JsxMode, Severity, TransformEngine, TransformOptions,
    TransformOutput,
};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::process::Command;

/// Environment variable overriding the esbuild binary
pub const ESBUILD_ENV: &str = "TALOS_ESBUILD";

const SOURCE_MAP_MARKER: &str = "//# sourceMappingURL=";

/// Engine that shells out to esbuild
#[derive(Debug, Clone)]
pub struct EsbuildEngine {
    binary: PathBuf,
}

impl EsbuildEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Locate esbuild: `$TALOS_ESBUILD`, then the project's
    /// `node_modules/.bin/esbuild`, then `esbuild` on PATH
    pub fn discover(project_root: &Path) -> Self {
        if let Ok(binary) = std::env::var(ESBUILD_ENV) {
            return Self::new(binary);
        }

        let local = project_root.join("node_modules").join(".bin").join("esbuild");
        if local.is_file() {
            return Self::new(local);
        }

        Self::new("esbuild")
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    async fn run(&self, args: &[String], cwd: Option<&Path>) -> Result<std::process::Output, Diagnostic> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        tracing::debug!("Running {:?} {}", self.binary, args.join(" "));

        command.output().await.map_err(|e| {
            Diagnostic::error(format!("Failed to run {}: {}", self.binary.display(), e))
        })
    }
}

#[async_trait]
impl TransformEngine for EsbuildEngine {
    async fn transform_file(&self, path: &Path, options: &TransformOptions) -> TransformOutput {
        let args = transform_args(path, options);
        let output = match self.run(&args, None).await {
            Ok(output) => output,
            Err(diagnostic) => return TransformOutput::failed(diagnostic),
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut diagnostics = parse_diagnostics(&stderr);

        if !output.status.success() {
            ensure_error(&mut diagnostics, &stderr, output.status.code());
            return TransformOutput {
                diagnostics,
                ..Default::default()
            };
        }

        let code = String::from_utf8_lossy(&output.stdout).into_owned();
        let source_map = extract_source_map(&code);

        TransformOutput {
            code,
            source_map,
            diagnostics,
        }
    }

    async fn bundle(&self, request: &BundleRequest) -> BundleOutput {
        let Some(metafile) = metafile_path(request) else {
            return BundleOutput::failed(Diagnostic::error(
                "Bundle request needs an outfile or an outdir",
            ));
        };

        let args = bundle_args(request, &metafile);
        let output = match self.run(&args, request.working_dir.as_deref()).await {
            Ok(output) => output,
            Err(diagnostic) => return BundleOutput::failed(diagnostic),
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut diagnostics = parse_diagnostics(&stderr);

        if !output.status.success() {
            ensure_error(&mut diagnostics, &stderr, output.status.code());
            let _ = tokio::fs::remove_file(&metafile).await;
            return BundleOutput {
                diagnostics,
                ..Default::default()
            };
        }

        let base = request
            .working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default();

        let (artifacts, dependency_graph) = match tokio::fs::read_to_string(&metafile).await {
            Ok(content) => match read_metafile(&content, &base) {
                Ok(parsed) => parsed,
                Err(e) => {
                    diagnostics.push(Diagnostic::warning(format!("Unreadable metafile: {}", e)));
                    (request.outfile.iter().cloned().collect(), BTreeMap::new())
                }
            },
            Err(e) => {
                diagnostics.push(Diagnostic::warning(format!("Missing metafile: {}", e)));
                (request.outfile.iter().cloned().collect(), BTreeMap::new())
            }
        };
        let _ = tokio::fs::remove_file(&metafile).await;

        BundleOutput {
            artifacts,
            diagnostics,
            dependency_graph,
        }
    }
}

fn common_args(args: &mut Vec<String>, options: &TransformOptions) {
    args.push("--format=esm".to_string());
    args.push(format!("--target={}", options.target.as_str()));
    args.push("--log-level=warning".to_string());
    args.push("--color=false".to_string());

    if options.source_maps {
        args.push("--sourcemap=inline".to_string());
    }

    match &options.jsx {
        JsxMode::Automatic => args.push("--jsx=automatic".to_string()),
        JsxMode::Classic { factory, fragment } => {
            args.push(format!("--jsx-factory={}", factory));
            args.push(format!("--jsx-fragment={}", fragment));
        }
    }

    for (key, value) in &options.defines {
        args.push(format!("--define:{}={}", key, value));
    }
}

/// Command line for a single-file transform (output on stdout)
pub fn transform_args(path: &Path, options: &TransformOptions) -> Vec<String> {
    let mut args = vec![path.display().to_string()];
    common_args(&mut args, options);
    args
}

/// Command line for a bundle run
pub fn bundle_args(request: &BundleRequest, metafile: &Path) -> Vec<String> {
    let mut args: Vec<String> = request
        .entry_points
        .iter()
        .map(|entry| entry.display().to_string())
        .collect();

    args.push("--bundle".to_string());
    args.push("--platform=browser".to_string());
    common_args(&mut args, &request.options);

    match (&request.outfile, &request.outdir) {
        (Some(outfile), _) if !request.splitting && request.entry_points.len() == 1 => {
            args.push(format!("--outfile={}", outfile.display()));
        }
        (_, Some(outdir)) => args.push(format!("--outdir={}", outdir.display())),
        (Some(outfile), None) => args.push(format!("--outfile={}", outfile.display())),
        (None, None) => {}
    }

    if request.splitting {
        args.push("--splitting".to_string());
    }
    if request.minify {
        args.push("--minify".to_string());
    }

    for external in &request.externals {
        args.push(format!("--external:{}", external));
        args.push(format!("--external:{}/*", external));
    }

    args.push(format!("--metafile={}", metafile.display()));
    args
}

fn metafile_path(request: &BundleRequest) -> Option<PathBuf> {
    if let Some(outfile) = &request.outfile {
        let mut name = outfile.as_os_str().to_os_string();
        name.push(".meta.json");
        return Some(PathBuf::from(name));
    }
    request.outdir.as_ref().map(|dir| dir.join("metafile.json"))
}

#[derive(Debug, Deserialize)]
struct Metafile {
    #[serde(default)]
    inputs: BTreeMap<String, MetaInput>,
    #[serde(default)]
    outputs: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MetaInput {
    #[serde(default)]
    imports: Vec<MetaImport>,
}

#[derive(Debug, Deserialize)]
struct MetaImport {
    path: String,
}

type MetafileSummary = (Vec<PathBuf>, BTreeMap<String, Vec<String>>);

fn read_metafile(content: &str, base: &Path) -> Result<MetafileSummary, serde_json::Error> {
    let meta: Metafile = serde_json::from_str(content)?;

    let artifacts = meta
        .outputs
        .keys()
        .map(|output| {
            let path = Path::new(output);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                base.join(path)
            }
        })
        .collect();

    let graph = meta
        .inputs
        .into_iter()
        .map(|(input, meta)| {
            let imports = meta.imports.into_iter().map(|import| import.path).collect();
            (input, imports)
        })
        .collect();

    Ok((artifacts, graph))
}

fn header_re() -> &'static Regex {
    static HEADER_RE: OnceLock<Regex> = OnceLock::new();
    HEADER_RE.get_or_init(|| {
        Regex::new(r"^\s*(?:\S+\s+)?\[(ERROR|WARNING)\]\s+(.+?)\s*$").expect("valid regex")
    })
}

fn location_re() -> &'static Regex {
    static LOCATION_RE: OnceLock<Regex> = OnceLock::new();
    LOCATION_RE.get_or_init(|| Regex::new(r"^\s+(\S.*?):(\d+):(\d+):\s*$").expect("valid regex"))
}

/// Parse esbuild's human-readable log output
pub fn parse_diagnostics(stderr: &str) -> Vec<Diagnostic> {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    // Only the first location after a header belongs to it; later ones are notes
    let mut awaiting_location = false;

    for line in stderr.lines() {
        if let Some(caps) = header_re().captures(line) {
            let severity = if &caps[1] == "ERROR" {
                Severity::Error
            } else {
                Severity::Warning
            };
            diagnostics.push(Diagnostic {
                message: caps[2].to_string(),
                file: None,
                line: None,
                column: None,
                severity,
            });
            awaiting_location = true;
            continue;
        }

        if !awaiting_location {
            continue;
        }

        if let Some(caps) = location_re().captures(line) {
            if let Some(last) = diagnostics.last_mut() {
                last.file = Some(caps[1].to_string());
                last.line = caps[2].parse().ok();
                last.column = caps[3].parse().ok();
            }
            awaiting_location = false;
        }
    }

    diagnostics
}

fn ensure_error(diagnostics: &mut Vec<Diagnostic>, stderr: &str, code: Option<i32>) {
    if diagnostics.iter().any(Diagnostic::is_error) {
        return;
    }
    let detail = stderr.trim();
    let message = if detail.is_empty() {
        format!("esbuild exited with status {:?}", code)
    } else {
        detail.to_string()
    };
    diagnostics.push(Diagnostic::error(message));
}

fn extract_source_map(code: &str) -> Option<String> {
    let start = code.rfind(SOURCE_MAP_MARKER)? + SOURCE_MAP_MARKER.len();
    let map = code[start..].lines().next()?.trim();
    (!map.is_empty()).then(|| map.to_string())
}
