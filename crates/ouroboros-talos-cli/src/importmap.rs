//! `talos importmap` command implementation

use crate::config::Project;
use anyhow::{Context, Result};
use clap::Args;
use ouroboros_talos::importmap::{merge, ConflictPolicy, MergeOptions};
use std::path::PathBuf;

/// Arguments for `talos importmap`
#[derive(Debug, Args)]
pub struct ImportMapArgs {
    /// Import maps to merge, in order (default: import_maps from talos.toml)
    pub inputs: Vec<PathBuf>,

    /// Deps dir scanned for prebundled packages
    #[arg(long, value_name = "DIR")]
    pub deps_dir: Option<PathBuf>,

    /// URL prefix the deps dir is served under
    #[arg(long, default_value = "/@deps/")]
    pub prefix: String,

    /// Write the merged map here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Fail on conflicting entries
    #[arg(long)]
    pub strict: bool,
}

/// Execute the importmap command
pub async fn execute(project: Project, args: ImportMapArgs) -> Result<()> {
    let config = &project.config;

    let files = if args.inputs.is_empty() {
        config.import_maps.clone()
    } else {
        args.inputs.clone()
    };
    let inputs = project.import_maps(&files)?;

    let deps_dir = args
        .deps_dir
        .as_ref()
        .or(config.prebuilt_deps_dir.as_ref())
        .unwrap_or(&config.deps_dir);
    let deps_dir = project.path(deps_dir);
    let aliases = project.aliases()?;

    let options = MergeOptions {
        policy: if args.strict {
            ConflictPolicy::Strict
        } else {
            config.conflict_policy()
        },
        url_prefix: args.prefix.clone(),
    };
    let outcome = merge(&inputs, Some(&deps_dir), Some(&aliases), &options)
        .context("Failed to merge import maps")?;

    tracing::info!(
        "Merged {} import maps: {} entries, {} discovered, {} conflicts",
        inputs.len(),
        outcome.map.len(),
        outcome.discovered.len(),
        outcome.conflicts.len()
    );

    match &args.out {
        Some(out) => {
            let path = project.path(out);
            outcome
                .map
                .write(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✓ Wrote {}", path.display());
        }
        None => println!("{}", outcome.map.to_json_pretty()),
    }

    Ok(())
}
