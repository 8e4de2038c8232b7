use crate::keyed::KeyedLocks;
use crate::layout::{self, METADATA_FILE};
use crate::staleness;
use crate::types::{ArtifactMetadata, PrebundleEntry, PrebundleOptions, PrebundleReport, PrebundleStats};
use crate::PrebundleError;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use ouroboros_talos_resolver::{AliasResolver, ResolvedSpecifier};
use ouroboros_talos_transform::{BundleRequest, TransformEngine};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Per-package prebundle cache.
///
/// Each aliased package is bundled on its own into one ES module, with every
/// other alias left external. Entries are replaced whole, so a lookup sees
/// either the previous complete artifact or the new one.
#[derive(Clone)]
pub struct PrebundleCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    resolver: Arc<AliasResolver>,
    engine: Arc<dyn TransformEngine>,
    options: PrebundleOptions,
    entries: DashMap<String, Arc<PrebundleEntry>>,
    locks: KeyedLocks<String>,
    hits: AtomicU64,
    rebuilds: AtomicU64,
    failures: AtomicU64,
    tmp_counter: AtomicU64,
}

/// One buildable artifact: a package entry, or a subpath of it
struct BuildTarget {
    /// Cache key and artifact directory (`react`, `react/jsx-runtime`)
    key: String,
    package: String,
    source_dir: PathBuf,
    subpath: Option<String>,
}

/// Run blocking filesystem work off the async workers
async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => value,
        Err(e) => std::panic::resume_unwind(e.into_panic()),
    }
}

impl PrebundleCache {
    pub fn new(
        resolver: Arc<AliasResolver>,
        engine: Arc<dyn TransformEngine>,
        options: PrebundleOptions,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                resolver,
                engine,
                options,
                entries: DashMap::new(),
                locks: KeyedLocks::new(),
                hits: AtomicU64::new(0),
                rebuilds: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                tmp_counter: AtomicU64::new(0),
            }),
        }
    }

    pub fn deps_dir(&self) -> &Path {
        &self.inner.options.deps_dir
    }

    pub fn resolver(&self) -> &Arc<AliasResolver> {
        &self.inner.resolver
    }

    /// Current entry for `name` without checking staleness or building
    pub fn get(&self, name: &str) -> Option<Arc<PrebundleEntry>> {
        self.inner.entries.get(name).map(|entry| entry.clone())
    }

    pub fn stats(&self) -> PrebundleStats {
        PrebundleStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            rebuilds: self.inner.rebuilds.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
        }
    }

    /// Adopt artifacts a previous run left in the deps dir.
    ///
    /// Only aliased packages whose metadata names the same source directory
    /// are adopted; staleness is still checked on the next lookup.
    pub async fn adopt_existing(&self) -> usize {
        let mut adopted = 0;

        for alias in self.inner.resolver.table().iter() {
            let Some(source_dir) = self.inner.resolver.package_dir(&alias.name) else {
                continue;
            };
            let Ok(dir) = layout::artifact_dir(self.deps_dir(), &alias.name) else {
                continue;
            };

            let metadata = match tokio::fs::read_to_string(dir.join(METADATA_FILE)).await {
                Ok(content) => content,
                Err(_) => continue,
            };
            let metadata: ArtifactMetadata = match serde_json::from_str(&metadata) {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!("Ignoring unreadable metadata for '{}': {}", alias.name, e);
                    continue;
                }
            };

            let output_path = dir.join(layout::ENTRY_FILE);
            if metadata.name != alias.name
                || metadata.source_dir != source_dir
                || !output_path.is_file()
            {
                continue;
            }

            self.inner
                .entries
                .insert(alias.name.clone(), Arc::new(metadata.into_entry(output_path)));
            adopted += 1;
        }

        if adopted > 0 {
            tracing::info!("Adopted {} prebundled packages from {:?}", adopted, self.deps_dir());
        }
        adopted
    }

    /// Return the cached artifact for `name`, rebuilding it first if its
    /// source tree changed since the last build.
    ///
    /// Concurrent calls for one name share a single rebuild. The build runs
    /// in its own task, so a caller going away does not abort it.
    pub async fn ensure_prebundled(&self, name: &str) -> Result<Arc<PrebundleEntry>, PrebundleError> {
        let target = self.target(name, None)?;
        self.ensure(target).await
    }

    /// Like [`ensure_prebundled`](Self::ensure_prebundled) for a subpath of
    /// an aliased package (`react` + `jsx-runtime`).
    ///
    /// The subpath is resolved through the package's `exports` (or its
    /// files) and bundled on its own under `<deps>/react/jsx-runtime/`.
    /// Staleness follows the whole package directory.
    pub async fn ensure_subpath(
        &self,
        name: &str,
        subpath: &str,
    ) -> Result<Arc<PrebundleEntry>, PrebundleError> {
        let subpath = subpath.trim_matches('/');
        let target = if subpath.is_empty() {
            self.target(name, None)?
        } else {
            self.target(name, Some(subpath))?
        };
        self.ensure(target).await
    }

    /// Prebundle whatever a bare specifier names: a package or one of its subpaths
    pub async fn ensure_specifier(&self, specifier: &str) -> Result<Arc<PrebundleEntry>, PrebundleError> {
        let (name, subpath) = match self.inner.resolver.table().longest_match(specifier) {
            Some((alias, remainder)) => (alias.name.clone(), remainder.to_string()),
            None => return Err(PrebundleError::UnknownPackage(specifier.to_string())),
        };
        self.ensure_subpath(&name, &subpath).await
    }

    fn target(&self, name: &str, subpath: Option<&str>) -> Result<BuildTarget, PrebundleError> {
        let source_dir = self
            .inner
            .resolver
            .package_dir(name)
            .ok_or_else(|| PrebundleError::UnknownPackage(name.to_string()))?;

        let key = match subpath {
            Some(subpath) => format!("{}/{}", name, subpath),
            None => name.to_string(),
        };
        // Rejects `..` and friends before anything touches the deps dir
        layout::artifact_dir(self.deps_dir(), &key)?;

        Ok(BuildTarget {
            key,
            package: name.to_string(),
            source_dir,
            subpath: subpath.map(str::to_string),
        })
    }

    async fn ensure(&self, target: BuildTarget) -> Result<Arc<PrebundleEntry>, PrebundleError> {
        if let Some(entry) = self.fresh_entry(&target.key, &target.source_dir).await {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Prebundle cache hit for '{}'", target.key);
            return Ok(entry);
        }

        let cache = self.clone();
        let key = target.key.clone();
        tokio::spawn(async move {
            let _guard = cache.inner.locks.lock(&target.key).await;

            // Someone else may have finished the rebuild while we waited
            if let Some(entry) = cache.fresh_entry(&target.key, &target.source_dir).await {
                cache.inner.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry);
            }

            cache.build(&target).await
        })
        .await
        .map_err(|e| PrebundleError::Task {
            name: key,
            message: e.to_string(),
        })?
    }

    /// Build `name` from `source_dir` unconditionally (under its key lock)
    pub async fn prebundle_one(
        &self,
        name: &str,
        source_dir: &Path,
    ) -> Result<Arc<PrebundleEntry>, PrebundleError> {
        let target = BuildTarget {
            key: name.to_string(),
            package: name.to_string(),
            source_dir: source_dir.to_path_buf(),
            subpath: None,
        };
        let _guard = self.inner.locks.lock(&target.key).await;
        self.build(&target).await
    }

    /// Make sure every aliased package has a fresh artifact
    pub async fn prebundle_all(&self) -> PrebundleReport {
        let names: Vec<String> = self
            .inner
            .resolver
            .table()
            .names()
            .map(str::to_string)
            .collect();

        tracing::info!("Prebundling {} packages into {:?}", names.len(), self.deps_dir());

        let results: Vec<(String, Result<Arc<PrebundleEntry>, PrebundleError>)> = stream::iter(names)
            .map(|name| async move {
                let result = self.ensure_prebundled(&name).await;
                (name, result)
            })
            .buffer_unordered(self.inner.options.parallelism.max(1))
            .collect()
            .await;

        let mut report = PrebundleReport::default();
        for (name, result) in results {
            match result {
                Ok(entry) => {
                    report.entries.insert(name, entry);
                }
                Err(e) => {
                    report.failures.insert(name, e);
                }
            }
        }
        report
    }

    async fn fresh_entry(&self, name: &str, source_dir: &Path) -> Option<Arc<PrebundleEntry>> {
        let entry = self.get(name)?;
        if entry.source_dir != source_dir {
            return None;
        }

        let check = entry.clone();
        let fresh = blocking(move || {
            check.output_path.is_file() && !staleness::is_stale(&check.source_dir, Some(check.built_at))
        })
        .await;

        fresh.then_some(entry)
    }

    /// Bundle one target. Callers hold the key lock.
    async fn build(&self, target: &BuildTarget) -> Result<Arc<PrebundleEntry>, PrebundleError> {
        let result = self.build_inner(target).await;
        match &result {
            Ok(entry) => {
                self.inner.rebuilds.fetch_add(1, Ordering::Relaxed);
                tracing::info!("Prebundled '{}' -> {:?}", target.key, entry.output_path);
            }
            Err(e) => {
                self.inner.failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!("{}", e);
            }
        }
        result
    }

    async fn entry_file(&self, target: &BuildTarget) -> Result<PathBuf, PrebundleError> {
        let resolver = self.inner.resolver.clone();
        let dir = target.source_dir.clone();

        match &target.subpath {
            None => blocking(move || resolver.resolve_dir_entry(&dir))
                .await?
                .ok_or_else(|| PrebundleError::NoEntryPoint {
                    name: target.key.clone(),
                    dir: target.source_dir.clone(),
                }),
            Some(_) => {
                let specifier = target.key.clone();
                match blocking(move || resolver.resolve(&specifier, &dir)).await? {
                    ResolvedSpecifier::Path(path) => Ok(path),
                    ResolvedSpecifier::NoMatch => Err(PrebundleError::UnresolvedSubpath {
                        specifier: target.key.clone(),
                        dir: target.source_dir.clone(),
                    }),
                }
            }
        }
    }

    async fn build_inner(&self, target: &BuildTarget) -> Result<Arc<PrebundleEntry>, PrebundleError> {
        let name = target.key.as_str();
        let source_dir = target.source_dir.as_path();

        // Taken before reading sources so edits racing the build count as stale
        let built_at = SystemTime::now();

        let dir = source_dir.to_path_buf();
        let fingerprint = blocking(move || staleness::latest_mtime(&dir)).await;

        let entry_file = self.entry_file(target).await?;

        let out_dir = layout::artifact_dir(self.deps_dir(), name)?;
        tokio::fs::create_dir_all(&out_dir)
            .await
            .map_err(|source| PrebundleError::io(&out_dir, source))?;

        let output_path = out_dir.join(layout::ENTRY_FILE);
        let tmp_path = self.tmp_path(&out_dir, layout::ENTRY_FILE);

        // A subpath imports its own package rather than inlining a second copy
        let mut request = BundleRequest::single(entry_file, tmp_path.clone());
        request.externals = self
            .inner
            .resolver
            .table()
            .names()
            .filter(|other| target.subpath.is_some() || *other != target.package)
            .map(str::to_string)
            .collect();
        request.working_dir = Some(source_dir.to_path_buf());
        request.options = self.inner.options.transform.clone();

        tracing::debug!(
            "Bundling '{}' with {} externals",
            name,
            request.externals.len()
        );

        let output = self.inner.engine.bundle(&request).await;
        if output.has_errors() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(PrebundleError::Build {
                name: name.to_string(),
                diagnostics: output.diagnostics,
            });
        }
        for warning in &output.diagnostics {
            tracing::warn!("{}: {}", name, warning);
        }

        // Rename is atomic within a directory: readers see old or new, never partial
        tokio::fs::rename(&tmp_path, &output_path)
            .await
            .map_err(|source| PrebundleError::io(&tmp_path, source))?;

        let entry = PrebundleEntry {
            name: name.to_string(),
            source_dir: source_dir.to_path_buf(),
            output_path,
            fingerprint,
            built_at,
        };
        self.write_metadata(&out_dir, &entry).await?;

        let entry = Arc::new(entry);
        self.inner.entries.insert(name.to_string(), entry.clone());
        Ok(entry)
    }

    async fn write_metadata(&self, out_dir: &Path, entry: &PrebundleEntry) -> Result<(), PrebundleError> {
        let json = serde_json::to_string_pretty(&ArtifactMetadata::from_entry(entry))?;
        let path = out_dir.join(METADATA_FILE);
        let tmp_path = self.tmp_path(out_dir, METADATA_FILE);

        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|source| PrebundleError::io(&tmp_path, source))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|source| PrebundleError::io(&path, source))
    }

    fn tmp_path(&self, dir: &Path, file: &str) -> PathBuf {
        let n = self.inner.tmp_counter.fetch_add(1, Ordering::Relaxed);
        dir.join(format!(".{}.{}-{}.tmp", file, std::process::id(), n))
    }
}
