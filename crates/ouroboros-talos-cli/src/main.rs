//! Talos CLI
//!
//! Usage:
//!   talos dev                         Start the dev server
//!   talos dev --prebuilt build/deps   Serve ahead-of-time prebundles
//!   talos prebundle                   Prebundle every aliased dependency
//!   talos prebundle react react-dom   Prebundle selected packages
//!   talos prebundle react/jsx-runtime Prebundle an exported subpath
//!   talos importmap -o importmap.json Merge import maps with the deps dir

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod config;
mod dev;
mod importmap;
mod prebundle;

use config::Project;

#[derive(Parser)]
#[command(name = "talos")]
#[command(about = "ESM-native dev server and dependency prebundler", long_about = None)]
#[command(version)]
struct Cli {
    /// Project root
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Config file (default: <root>/talos.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the application from its sources
    Dev(dev::DevArgs),
    /// Build aliased dependencies into the deps dir
    Prebundle(prebundle::PrebundleArgs),
    /// Merge import maps and discover prebundled packages
    Importmap(importmap::ImportMapArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let project = Project::open(&cli.root, cli.config.as_deref())?;
    tracing::debug!("Project root {}", project.root.display());

    match cli.command {
        Commands::Dev(args) => dev::execute(project, args).await,
        Commands::Prebundle(args) => prebundle::execute(project, args).await,
        Commands::Importmap(args) => importmap::execute(project, args).await,
    }
}

/// Initialize logging based on log level
fn init_logging(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .ok(); // Ignore error if already initialized

    Ok(())
}
