//! `talos dev` command implementation

use crate::config::{parse_pairs, Project};
use anyhow::{Context, Result};
use clap::Args;
use ouroboros_talos::dev_server::{env, DevServer, DevServerConfig, ProxyRule};
use ouroboros_talos::importmap::ConflictPolicy;
use ouroboros_talos::transform::EsbuildEngine;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Arguments for `talos dev`
#[derive(Debug, Args)]
pub struct DevArgs {
    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Entry module, relative to the root
    #[arg(long)]
    pub entry: Option<String>,

    /// Mode used to pick .env files and MODE/DEV/PROD defines
    #[arg(long)]
    pub mode: Option<String>,

    /// Serve dependencies from a prebuilt deps dir instead of prebundling
    #[arg(long, value_name = "DIR")]
    pub prebuilt: Option<PathBuf>,

    /// Environment override exposed to sources (can be used multiple times)
    #[arg(short = 'D', long = "define", value_name = "KEY=VALUE")]
    pub defines: Vec<String>,

    /// Proxy rule (can be used multiple times)
    #[arg(long = "proxy", value_name = "PREFIX=TARGET")]
    pub proxies: Vec<String>,

    /// Upstream timeout in seconds
    #[arg(long)]
    pub proxy_timeout: Option<u64>,

    /// Fail on conflicting import map entries
    #[arg(long)]
    pub strict: bool,
}

/// Combine file and flag proxy rules; a flag replaces a file rule with the same prefix
fn proxy_rules(project: &Project, flags: &[String]) -> Result<Vec<ProxyRule>> {
    let from_flags: Vec<ProxyRule> = parse_pairs(flags, "proxy rule")?
        .into_iter()
        .map(|(prefix, target)| ProxyRule::new(prefix, target))
        .collect();

    let mut rules: Vec<ProxyRule> = project
        .config
        .proxy_rules()
        .into_iter()
        .filter(|rule| !from_flags.iter().any(|f| f.prefix == rule.prefix))
        .collect();
    rules.extend(from_flags);
    Ok(rules)
}

/// Build the server configuration from talos.toml and flags
pub fn server_config(project: &Project, args: &DevArgs) -> Result<DevServerConfig> {
    let config = &project.config;
    let mode = args.mode.clone().unwrap_or_else(|| config.mode.clone());

    let overrides: BTreeMap<String, String> = parse_pairs(&args.defines, "define")?.into_iter().collect();
    let defines = env::load_defines(&project.root, &mode, &config.env_prefix, &overrides);
    tracing::debug!("{} defines for mode {}", defines.len(), mode);

    let conflict_policy = if args.strict {
        ConflictPolicy::Strict
    } else {
        config.conflict_policy()
    };

    Ok(DevServerConfig {
        root: project.root.clone(),
        entry: args.entry.clone().unwrap_or_else(|| config.entry.clone()),
        aliases: Arc::new(project.aliases()?),
        import_maps: project.import_maps(&config.import_maps)?,
        conflict_policy,
        static_root: config.static_root.clone(),
        source_dirs: config.source_dirs.clone(),
        host: args.host.clone().unwrap_or_else(|| config.server.host.clone()),
        port: args.port.unwrap_or(config.server.port),
        proxy: proxy_rules(project, &args.proxies)?,
        proxy_timeout: Duration::from_secs(args.proxy_timeout.unwrap_or(config.server.proxy_timeout_secs)),
        proxy_max_body: config.server.proxy_max_body_mb.saturating_mul(1024 * 1024),
        defines,
        deps_dir: config.deps_dir.clone(),
        prebuilt_deps_dir: args.prebuilt.clone().or_else(|| config.prebuilt_deps_dir.clone()),
        ..Default::default()
    })
}

/// Execute the dev command
pub async fn execute(project: Project, args: DevArgs) -> Result<()> {
    let config = server_config(&project, &args)?;

    let engine = EsbuildEngine::discover(&project.root);
    tracing::info!("Using esbuild at {}", engine.binary().display());

    let server = DevServer::new(config, Arc::new(engine))
        .await
        .context("Failed to start dev server")?;

    server.start().await.context("Dev server failed")
}
