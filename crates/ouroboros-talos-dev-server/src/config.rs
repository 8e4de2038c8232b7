use ouroboros_talos_importmap::{ConflictPolicy, ImportMap};
use ouroboros_talos_resolver::AliasTable;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Dev server configuration, built once at startup
#[derive(Debug, Clone)]
pub struct DevServerConfig {
    /// Project root; relative paths below are joined onto it
    pub root: PathBuf,

    /// Entry module, relative to the root (e.g. "src/main.tsx")
    pub entry: String,

    pub aliases: Arc<AliasTable>,

    /// Import maps merged, in order, into the served map
    pub import_maps: Vec<ImportMap>,

    /// How conflicting import map entries are handled
    pub conflict_policy: ConflictPolicy,

    /// Directory served as-is for non-source files
    pub static_root: PathBuf,

    /// Directories whose sources are transformed on request
    pub source_dirs: Vec<PathBuf>,

    /// Host to bind to
    pub host: String,

    /// Port to bind to
    pub port: u16,

    pub proxy: Vec<ProxyRule>,

    /// Upper bound on one upstream exchange
    pub proxy_timeout: Duration,

    /// Largest request body forwarded upstream, in bytes
    pub proxy_max_body: usize,

    /// Identifier -> replacement expression for transforms and prebundles
    pub defines: BTreeMap<String, String>,

    /// Where runtime prebundles are written
    pub deps_dir: PathBuf,

    /// Ahead-of-time prebundle output; disables runtime prebundling
    pub prebuilt_deps_dir: Option<PathBuf>,

    /// URL prefix dependencies are served under
    pub deps_url_prefix: String,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            entry: "src/main.tsx".to_string(),
            aliases: Arc::new(AliasTable::new()),
            import_maps: Vec::new(),
            conflict_policy: ConflictPolicy::LastWins,
            static_root: PathBuf::from("public"),
            source_dirs: vec![PathBuf::from("src")],
            host: "127.0.0.1".to_string(),
            port: 3000,
            proxy: Vec::new(),
            proxy_timeout: Duration::from_secs(30),
            proxy_max_body: 32 * 1024 * 1024,
            defines: BTreeMap::new(),
            deps_dir: PathBuf::from(".talos/deps"),
            prebuilt_deps_dir: None,
            deps_url_prefix: "/@deps/".to_string(),
        }
    }
}

impl DevServerConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Resolve a configured path against the project root
    pub fn absolute(&self, path: &std::path::Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Deps URL prefix with exactly one leading and one trailing slash
    pub fn deps_prefix(&self) -> String {
        let trimmed = self.deps_url_prefix.trim_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("/{}/", trimmed)
        }
    }
}

/// Forward requests under `prefix` to `target`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRule {
    pub prefix: String,
    pub target: String,
}

impl ProxyRule {
    pub fn new(prefix: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            target: target.into(),
        }
    }

    /// Whether `path` falls under this rule's prefix on a segment boundary
    pub fn matches(&self, path: &str) -> bool {
        let prefix = self.prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return true;
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Upstream URL for `path` (and optional query)
    pub fn upstream_url(&self, path: &str, query: Option<&str>) -> String {
        let prefix = self.prefix.trim_end_matches('/');
        let rest = path.strip_prefix(prefix).unwrap_or(path);
        let rest = if rest.starts_with('/') || rest.is_empty() {
            rest.to_string()
        } else {
            format!("/{}", rest)
        };

        let mut url = format!("{}{}", self.target.trim_end_matches('/'), rest);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }
}

/// Proxy rules; the longest matching prefix wins
#[derive(Debug, Clone, Default)]
pub struct ProxyTable {
    rules: Vec<ProxyRule>,
}

impl ProxyTable {
    pub fn new(mut rules: Vec<ProxyRule>) -> Self {
        // Longest prefix first; stable sort keeps configuration order for ties
        rules.sort_by_key(|rule| std::cmp::Reverse(rule.prefix.trim_end_matches('/').len()));
        Self { rules }
    }

    pub fn find(&self, path: &str) -> Option<&ProxyRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
