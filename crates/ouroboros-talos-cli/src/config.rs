//! talos.toml configuration handling
//!
//! The file is optional; every field has a default and CLI flags override
//! whatever the file sets.

use anyhow::{Context, Result};
use ouroboros_talos::dev_server::{env, ProxyRule};
use ouroboros_talos::importmap::{ConflictPolicy, ImportMap};
use ouroboros_talos::resolver::AliasTable;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "talos.toml";

/// `[server]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub proxy_timeout_secs: u64,
    pub proxy_max_body_mb: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            proxy_timeout_secs: 30,
            proxy_max_body_mb: 32,
        }
    }
}

/// One `[[proxy]]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySection {
    pub prefix: String,
    pub target: String,
}

/// Contents of talos.toml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TalosConfig {
    pub entry: String,
    pub aliases: PathBuf,
    pub import_maps: Vec<PathBuf>,
    pub deps_dir: PathBuf,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prebuilt_deps_dir: Option<PathBuf>,

    pub static_root: PathBuf,
    pub source_dirs: Vec<PathBuf>,
    pub env_prefix: String,
    pub mode: String,
    pub strict_import_maps: bool,
    pub server: ServerSection,
    pub proxy: Vec<ProxySection>,
}

impl Default for TalosConfig {
    fn default() -> Self {
        Self {
            entry: "src/main.tsx".to_string(),
            aliases: PathBuf::from("talos.aliases"),
            import_maps: Vec::new(),
            deps_dir: PathBuf::from(".talos/deps"),
            prebuilt_deps_dir: None,
            static_root: PathBuf::from("public"),
            source_dirs: vec![PathBuf::from("src")],
            env_prefix: env::DEFAULT_PREFIX.to_string(),
            mode: "development".to_string(),
            strict_import_maps: false,
            server: ServerSection::default(),
            proxy: Vec::new(),
        }
    }
}

impl TalosConfig {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse talos.toml")
    }

    /// Load a config file. A missing file yields the defaults; anything else
    /// that goes wrong is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config file at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        if self.strict_import_maps {
            ConflictPolicy::Strict
        } else {
            ConflictPolicy::LastWins
        }
    }

    pub fn proxy_rules(&self) -> Vec<ProxyRule> {
        self.proxy
            .iter()
            .map(|p| ProxyRule::new(p.prefix.clone(), p.target.clone()))
            .collect()
    }
}

/// A project root together with its configuration
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config: TalosConfig,
}

impl Project {
    /// Open the project at `root`, reading `config` or `<root>/talos.toml`
    pub fn open(root: &Path, config: Option<&Path>) -> Result<Self> {
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()
                .context("Failed to get current directory")?
                .join(root)
        };

        let config_path = config
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.join(CONFIG_FILE));
        let config = TalosConfig::load(&config_path)?;

        Ok(Self { root, config })
    }

    /// Resolve a configured path against the project root
    pub fn path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn aliases(&self) -> Result<AliasTable> {
        let path = self.path(&self.config.aliases);
        let table = AliasTable::load(&path)
            .with_context(|| format!("Failed to load alias file {}", path.display()))?;
        tracing::info!("Loaded {} aliases from {}", table.len(), path.display());
        Ok(table)
    }

    /// Read import map files in order
    pub fn import_maps(&self, files: &[PathBuf]) -> Result<Vec<ImportMap>> {
        files
            .iter()
            .map(|file| {
                let path = self.path(file);
                ImportMap::load(&path).with_context(|| format!("Failed to load import map {}", path.display()))
            })
            .collect()
    }
}

/// Parse repeated `KEY=VALUE` flags
pub fn parse_pairs(pairs: &[String], what: &str) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| {
            env::parse_override(pair)
                .with_context(|| format!("Invalid {} '{}', expected KEY=VALUE", what, pair))
        })
        .collect()
}
