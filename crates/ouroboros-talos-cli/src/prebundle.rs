//! `talos prebundle` command implementation
//!
//! Builds aliased dependencies ahead of time into the deps dir that
//! `talos dev --prebuilt` and `talos importmap` later read. Artifacts whose
//! sources have not changed since the last run are kept.

use crate::config::{parse_pairs, Project};
use anyhow::{bail, Result};
use clap::Args;
use ouroboros_talos::dev_server::env;
use ouroboros_talos::prebundle::{PrebundleCache, PrebundleOptions, PrebundleReport};
use ouroboros_talos::resolver::{AliasResolver, ResolveOptions};
use ouroboros_talos::transform::{EsbuildEngine, TransformOptions};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Arguments for `talos prebundle`
#[derive(Debug, Args)]
pub struct PrebundleArgs {
    /// Only these packages or package subpaths, e.g. react/jsx-runtime (default: every alias)
    pub packages: Vec<String>,

    /// Output directory (default: deps_dir from talos.toml)
    #[arg(short, long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Packages built at once
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Mode used for .env files and defines
    #[arg(long)]
    pub mode: Option<String>,

    /// Environment override baked into the artifacts (can be used multiple times)
    #[arg(short = 'D', long = "define", value_name = "KEY=VALUE")]
    pub defines: Vec<String>,
}

fn print_report(report: &PrebundleReport) {
    for (name, entry) in &report.entries {
        println!("✓ {} -> {}", name, entry.output_path.display());
    }
    for (name, err) in &report.failures {
        eprintln!("✗ {}: {}", name, err);
    }
}

/// Execute the prebundle command
pub async fn execute(project: Project, args: PrebundleArgs) -> Result<()> {
    let config = &project.config;
    let aliases = Arc::new(project.aliases()?);
    if aliases.is_empty() {
        tracing::warn!("No aliases registered, nothing to prebundle");
        return Ok(());
    }

    let mode = args.mode.clone().unwrap_or_else(|| config.mode.clone());
    let overrides: BTreeMap<String, String> = parse_pairs(&args.defines, "define")?.into_iter().collect();

    let mut options = PrebundleOptions {
        deps_dir: project.path(args.out.as_deref().unwrap_or(&config.deps_dir)),
        transform: TransformOptions {
            defines: env::load_defines(&project.root, &mode, &config.env_prefix, &overrides),
            ..Default::default()
        },
        ..Default::default()
    };
    if let Some(jobs) = args.jobs {
        options.parallelism = jobs.max(1);
    }

    let resolver = Arc::new(AliasResolver::new(
        aliases,
        ResolveOptions {
            root: project.root.clone(),
            ..Default::default()
        },
    ));
    let engine = Arc::new(EsbuildEngine::discover(&project.root));
    let cache = PrebundleCache::new(resolver, engine, options);

    let started = Instant::now();
    let adopted = cache.adopt_existing().await;
    tracing::debug!("Adopted {} existing artifacts", adopted);

    let report = if args.packages.is_empty() {
        cache.prebundle_all().await
    } else {
        let mut report = PrebundleReport::default();
        for name in &args.packages {
            match cache.ensure_specifier(name).await {
                Ok(entry) => {
                    report.entries.insert(name.clone(), entry);
                }
                Err(e) => {
                    report.failures.insert(name.clone(), e);
                }
            }
        }
        report
    };

    print_report(&report);
    let stats = cache.stats();
    tracing::info!(
        "Prebundled {} packages into {} in {:.2?} ({} built, {} reused)",
        report.entries.len(),
        cache.deps_dir().display(),
        started.elapsed(),
        stats.rebuilds,
        stats.hits
    );

    if !report.is_success() {
        bail!(
            "{} of {} packages failed to prebundle",
            report.failures.len(),
            report.entries.len() + report.failures.len()
        );
    }
    Ok(())
}
