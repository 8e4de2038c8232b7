use crate::error::DevServerError;
use dashmap::DashMap;
use ouroboros_talos_prebundle::KeyedLocks;
use ouroboros_talos_transform::{css_module, TransformEngine, TransformOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// How a source file becomes a browser module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// TS/JSX/JS through the engine
    Script,

    /// Stylesheet wrapped in a style-injecting module
    CssImport,
}

/// A served module and the source mtime it was produced from
#[derive(Debug)]
pub struct TransformedModule {
    pub path: PathBuf,
    pub mtime: SystemTime,
    pub code: String,
}

/// On-demand transform results keyed by `(path, mtime)`.
///
/// Only the newest version of each path is kept. Requests for the same path
/// share one engine call.
pub struct TransformCache {
    engine: Arc<dyn TransformEngine>,
    options: TransformOptions,
    root: PathBuf,
    modules: DashMap<PathBuf, Arc<TransformedModule>>,
    locks: KeyedLocks<PathBuf>,
}

impl TransformCache {
    pub fn new(engine: Arc<dyn TransformEngine>, options: TransformOptions, root: PathBuf) -> Self {
        Self {
            engine,
            options,
            root,
            modules: DashMap::new(),
            locks: KeyedLocks::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    fn cached(&self, path: &Path, mtime: SystemTime) -> Option<Arc<TransformedModule>> {
        self.modules
            .get(path)
            .filter(|module| module.mtime == mtime)
            .map(|module| module.clone())
    }

    /// Transformed module for `path`, reusing the cached one while the file's
    /// mtime is unchanged. Failures are returned and never cached.
    pub async fn get_or_transform(
        self: &Arc<Self>,
        path: &Path,
        kind: ModuleKind,
    ) -> Result<Arc<TransformedModule>, DevServerError> {
        let mtime = modified(path).await?;
        if let Some(module) = self.cached(path, mtime) {
            tracing::debug!("Transform cache hit for {:?}", path);
            return Ok(module);
        }

        let cache = self.clone();
        let path = path.to_path_buf();
        tokio::spawn(async move {
            let _guard = cache.locks.lock(&path).await;

            // The mtime may have moved while we waited for the lock
            let mtime = modified(&path).await?;
            if let Some(module) = cache.cached(&path, mtime) {
                return Ok(module);
            }

            let code = match kind {
                ModuleKind::Script => cache.transform_script(&path).await?,
                ModuleKind::CssImport => cache.css_import(&path).await?,
            };

            let module = Arc::new(TransformedModule {
                path: path.clone(),
                mtime,
                code,
            });
            cache.modules.insert(path, module.clone());
            Ok(module)
        })
        .await
        .map_err(|e| DevServerError::Task(e.to_string()))?
    }

    async fn transform_script(&self, path: &Path) -> Result<String, DevServerError> {
        let started = std::time::Instant::now();
        let output = self.engine.transform_file(path, &self.options).await;

        if output.has_errors() {
            return Err(DevServerError::Transform {
                path: path.to_path_buf(),
                diagnostics: output.diagnostics,
            });
        }
        for warning in &output.diagnostics {
            tracing::warn!("{}", warning);
        }

        tracing::debug!("Transformed {:?} in {:?}", path, started.elapsed());
        Ok(output.code)
    }

    async fn css_import(&self, path: &Path) -> Result<String, DevServerError> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| DevServerError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let id = path
            .strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        Ok(css_module(&format!("/{}", id), &source))
    }
}

async fn modified(path: &Path) -> Result<SystemTime, DevServerError> {
    let io_err = |source| DevServerError::Io {
        path: path.to_path_buf(),
        source,
    };
    tokio::fs::metadata(path)
        .await
        .map_err(io_err)?
        .modified()
        .map_err(io_err)
}
