//! Talos development server.
//!
//! Serves an application straight from its sources: the entry document
//! carries the merged import map, sources are transformed per request, and
//! aliased dependencies are prebundled on first use. Unmatched paths under a
//! proxy prefix are forwarded to the configured upstream.

use axum::{
    extract::{Request, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use ouroboros_talos_importmap::{merge, ImportMap, ImportMapError, MergeOptions};
use ouroboros_talos_prebundle::{artifact_dir, artifact_path, PrebundleCache, PrebundleOptions, ENTRY_FILE};
use ouroboros_talos_resolver::{AliasResolver, ResolveOptions};
use ouroboros_talos_transform::{TransformEngine, TransformOptions};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod env;
pub mod error;
pub mod html;
pub mod proxy;
pub mod route;
pub mod static_files;
pub mod transform_cache;

pub use config::{DevServerConfig, ProxyRule, ProxyTable};
pub use error::DevServerError;
pub use route::{Classifier, Route};
pub use transform_cache::{ModuleKind, TransformCache, TransformedModule};

use proxy::Proxy;
use static_files::{serve_file, JAVASCRIPT};

/// Development server for ESM-native serving
pub struct DevServer {
    state: Arc<AppState>,
}

/// Server state shared across handlers
struct AppState {
    config: Arc<DevServerConfig>,
    classifier: Classifier,

    /// Runtime prebundler; `None` when serving a prebuilt deps dir
    prebundle: Option<PrebundleCache>,

    /// Directory dependency artifacts are served from
    deps_dir: PathBuf,

    transforms: Arc<TransformCache>,
    proxy: Proxy,

    import_map: Arc<ImportMap>,
}

/// Merge configured maps with the deps dir.
///
/// With runtime prebundling every alias is mapped before its first build,
/// `name` to the package entry and `name/` to its directory so subpath
/// imports are prebundled on request too.
fn build_import_map(
    config: &DevServerConfig,
    deps_dir: &Path,
    runtime_prebundle: bool,
) -> Result<ImportMap, ImportMapError> {
    let options = MergeOptions {
        policy: config.conflict_policy,
        url_prefix: config.deps_prefix(),
    };
    let mut map = merge(&config.import_maps, Some(deps_dir), Some(&config.aliases), &options)?.map;

    if runtime_prebundle {
        for name in config.aliases.names() {
            if !map.contains(name) {
                map.insert(name, format!("{}{}/{}", options.url_prefix, name, ENTRY_FILE));
            }
            let subpaths = format!("{}/", name);
            if !map.contains(&subpaths) {
                map.insert(subpaths, format!("{}{}/", options.url_prefix, name));
            }
        }
    }

    Ok(map)
}

impl DevServer {
    /// Create a new development server
    pub async fn new(
        config: DevServerConfig,
        engine: Arc<dyn TransformEngine>,
    ) -> Result<Self, DevServerError> {
        let config = Arc::new(config);
        let transform = TransformOptions {
            defines: config.defines.clone(),
            ..Default::default()
        };

        let (deps_dir, prebundle) = match &config.prebuilt_deps_dir {
            Some(prebuilt) => {
                let deps_dir = config.absolute(prebuilt);
                tracing::info!("Serving prebuilt dependencies from {:?}", deps_dir);
                (deps_dir, None)
            }
            None => {
                let deps_dir = config.absolute(&config.deps_dir);
                let resolver = Arc::new(AliasResolver::new(
                    config.aliases.clone(),
                    ResolveOptions {
                        root: config.root.clone(),
                        ..Default::default()
                    },
                ));
                let cache = PrebundleCache::new(
                    resolver,
                    engine.clone(),
                    PrebundleOptions {
                        deps_dir: deps_dir.clone(),
                        transform: transform.clone(),
                        ..Default::default()
                    },
                );
                cache.adopt_existing().await;
                (deps_dir, Some(cache))
            }
        };

        let import_map = build_import_map(&config, &deps_dir, prebundle.is_some())?;
        tracing::info!("Import map ready with {} entries", import_map.len());

        let state = AppState {
            classifier: Classifier::new(&config, deps_dir.clone()),
            transforms: Arc::new(TransformCache::new(engine, transform, config.root.clone())),
            proxy: Proxy::new(config.proxy_timeout, config.proxy_max_body)?,
            import_map: Arc::new(import_map),
            prebundle,
            deps_dir,
            config,
        };

        Ok(Self {
            state: Arc::new(state),
        })
    }

    pub fn config(&self) -> &DevServerConfig {
        &self.state.config
    }

    /// The import map embedded in the entry document
    pub fn import_map(&self) -> Arc<ImportMap> {
        self.state.import_map.clone()
    }

    pub fn prebundle_cache(&self) -> Option<&PrebundleCache> {
        self.state.prebundle.as_ref()
    }

    /// Create Axum router
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(handle)
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until ctrl-c
    pub async fn start(self) -> Result<(), DevServerError> {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until ctrl-c
    pub async fn serve(self, listener: TcpListener) -> Result<(), DevServerError> {
        self.serve_with_shutdown(listener, shutdown_signal()).await
    }

    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, signal: F) -> Result<(), DevServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!("✓ Dev server running on http://{}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(signal)
            .await?;

        tracing::info!("Dev server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}

impl AppState {
    fn entry_document(&self) -> Response {
        (
            [
                (header::CONTENT_TYPE, "text/html; charset=utf-8"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            html::entry_document(&self.import_map, &self.config.entry),
        )
            .into_response()
    }

    async fn serve_dependency(
        &self,
        name: &str,
        subpath: Option<&str>,
        aliased: bool,
    ) -> Result<Response, DevServerError> {
        if let (Some(cache), true) = (&self.prebundle, aliased) {
            let entry = cache.ensure_subpath(name, subpath.unwrap_or("")).await?;
            return serve_file(&entry.output_path).await;
        }

        // Prebuilt dirs may carry plain files beside the entry module
        let path = match subpath {
            Some(subpath) => {
                let file = artifact_dir(&self.deps_dir, name)?.join(subpath);
                if file.is_file() {
                    file
                } else {
                    artifact_path(&self.deps_dir, &format!("{}/{}", name, subpath))?
                }
            }
            None => artifact_path(&self.deps_dir, name)?,
        };
        if !path.is_file() {
            return Ok(not_found(&path.to_string_lossy()));
        }
        serve_file(&path).await
    }

    async fn serve_transformed(&self, path: &Path, kind: ModuleKind) -> Result<Response, DevServerError> {
        let module = self.transforms.get_or_transform(path, kind).await?;
        Ok((
            [
                (header::CONTENT_TYPE, JAVASCRIPT),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            module.code.clone(),
        )
            .into_response())
    }
}

fn not_found(what: &str) -> Response {
    (StatusCode::NOT_FOUND, format!("Not found: {}", what)).into_response()
}

/// Single entry point for every request
async fn handle(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    let route = state.classifier.classify(&path, request.uri().query());
    tracing::debug!("{} {} -> {:?}", request.method(), path, route);

    if let Route::Proxy(rule) = &route {
        return state
            .proxy
            .forward(rule, request)
            .await
            .unwrap_or_else(IntoResponse::into_response);
    }

    if *request.method() != Method::GET && *request.method() != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let result = match route {
        Route::Entry => Ok(state.entry_document()),
        Route::Prebundled { name, subpath, aliased } => {
            state.serve_dependency(&name, subpath.as_deref(), aliased).await
        }
        Route::Static(file) => serve_file(&file).await,
        Route::Transform { path, kind } => state.serve_transformed(&path, kind).await,
        Route::Proxy(_) | Route::NotFound => Ok(not_found(&path)),
    };

    result.unwrap_or_else(IntoResponse::into_response)
}
