use async_trait::async_trait;
use ouroboros_talos_prebundle::{PrebundleCache, PrebundleError, PrebundleOptions, METADATA_FILE};
use ouroboros_talos_resolver::{AliasResolver, AliasTable, ResolveOptions};
use ouroboros_talos_transform::{
    BundleOutput, BundleRequest, Diagnostic, TransformEngine, TransformOptions, TransformOutput,
};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Engine double: writes a tiny module per bundle and counts calls
#[derive(Default)]
struct FakeEngine {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail: AtomicBool,
    delay_ms: u64,
    requests: Mutex<Vec<BundleRequest>>,
}

impl FakeEngine {
    fn with_delay(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransformEngine for FakeEngine {
    async fn transform_file(&self, _path: &Path, _options: &TransformOptions) -> TransformOutput {
        TransformOutput::default()
    }

    async fn bundle(&self, request: &BundleRequest) -> BundleOutput {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return BundleOutput::failed(Diagnostic::error("Unexpected end of file").at("index.js", 3, 1));
        }

        let outfile = request.outfile.clone().unwrap();
        let code = format!(
            "// build {} of {}\nexport default 1;\n",
            call,
            request.entry_points[0].display()
        );
        fs::write(&outfile, code).unwrap();

        BundleOutput {
            artifacts: vec![outfile],
            ..Default::default()
        }
    }
}

fn past() -> SystemTime {
    SystemTime::now() - Duration::from_secs(3600)
}

fn write_file(path: &Path, content: &str, mtime: SystemTime) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(mtime)
        .unwrap();
}

fn package(root: &Path, name: &str) -> PathBuf {
    let dir = root.join("packages").join(name);
    write_file(
        &dir.join("package.json"),
        &format!(r#"{{"name": "{}", "main": "index.js"}}"#, name),
        past(),
    );
    write_file(&dir.join("index.js"), "export default 1;", past());
    dir
}

struct Fixture {
    _temp: TempDir,
    root: PathBuf,
    deps_dir: PathBuf,
    engine: Arc<FakeEngine>,
    cache: PrebundleCache,
}

impl Fixture {
    fn new(names: &[&str], engine: FakeEngine) -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let entries: Vec<(String, PathBuf)> = names
            .iter()
            .map(|name| (name.to_string(), package(&root, name)))
            .collect();

        let deps_dir = root.join(".talos/deps");
        let engine = Arc::new(engine);
        let cache = cache_for(&root, &deps_dir, entries, engine.clone());

        Self {
            _temp: temp,
            root,
            deps_dir,
            engine,
            cache,
        }
    }

    fn touch_source(&self, name: &str, mtime: SystemTime) {
        let file = self.root.join("packages").join(name).join("index.js");
        write_file(&file, "export default 2;", mtime);
    }
}

fn cache_for(
    root: &Path,
    deps_dir: &Path,
    entries: Vec<(String, PathBuf)>,
    engine: Arc<FakeEngine>,
) -> PrebundleCache {
    let table = Arc::new(AliasTable::from_entries(entries));
    let resolver = Arc::new(AliasResolver::new(
        table,
        ResolveOptions {
            root: root.to_path_buf(),
            ..Default::default()
        },
    ));
    PrebundleCache::new(
        resolver,
        engine,
        PrebundleOptions {
            deps_dir: deps_dir.to_path_buf(),
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_second_call_is_a_hit() {
    let fx = Fixture::new(&["react"], FakeEngine::default());

    let first = fx.cache.ensure_prebundled("react").await.unwrap();
    let second = fx.cache.ensure_prebundled("react").await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(fx.engine.calls(), 1);
    assert_eq!(first.output_path, fx.deps_dir.join("react/index.js"));
    assert!(first.output_path.is_file());
    assert!(fx.deps_dir.join("react").join(METADATA_FILE).is_file());

    let stats = fx.cache.stats();
    assert_eq!(stats.rebuilds, 1);
    assert_eq!(stats.hits, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_build() {
    let fx = Fixture::new(&["react"], FakeEngine::with_delay(100));

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let cache = fx.cache.clone();
            tokio::spawn(async move { cache.ensure_prebundled("react").await })
        })
        .collect();

    let mut entries = Vec::new();
    for task in tasks {
        entries.push(task.await.unwrap().unwrap());
    }

    assert_eq!(fx.engine.calls(), 1);
    assert!(entries.iter().all(|entry| Arc::ptr_eq(entry, &entries[0])));
}

#[tokio::test]
async fn test_source_change_triggers_rebuild() {
    let fx = Fixture::new(&["react"], FakeEngine::default());

    let first = fx.cache.ensure_prebundled("react").await.unwrap();
    fx.touch_source("react", first.built_at + Duration::from_millis(1));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = fx.cache.ensure_prebundled("react").await.unwrap();
    assert_eq!(fx.engine.calls(), 2);
    assert!(second.built_at > first.built_at);
    assert!(fs::read_to_string(&second.output_path).unwrap().contains("build 2"));

    // The rebuild started after the edit, so it is fresh again
    fx.cache.ensure_prebundled("react").await.unwrap();
    assert_eq!(fx.engine.calls(), 2);
}

#[tokio::test]
async fn test_nested_node_modules_changes_are_ignored() {
    let fx = Fixture::new(&["react"], FakeEngine::default());
    fx.cache.ensure_prebundled("react").await.unwrap();

    let nested = fx.root.join("packages/react/node_modules/scheduler/index.js");
    write_file(&nested, "export {};", SystemTime::now() + Duration::from_secs(3600));

    fx.cache.ensure_prebundled("react").await.unwrap();
    assert_eq!(fx.engine.calls(), 1);
}

#[tokio::test]
async fn test_failed_rebuild_keeps_previous_artifact() {
    let fx = Fixture::new(&["react"], FakeEngine::default());

    let good = fx.cache.ensure_prebundled("react").await.unwrap();
    let good_code = fs::read_to_string(&good.output_path).unwrap();

    fx.engine.fail.store(true, Ordering::SeqCst);
    fx.touch_source("react", good.built_at + Duration::from_millis(1));

    let err = fx.cache.ensure_prebundled("react").await.unwrap_err();
    match &err {
        PrebundleError::Build { name, diagnostics } => {
            assert_eq!(name, "react");
            assert_eq!(diagnostics.len(), 1);
        }
        other => panic!("expected build error, got {other:?}"),
    }
    assert!(err.to_string().contains("Unexpected end of file"));

    let kept = fx.cache.get("react").unwrap();
    assert!(Arc::ptr_eq(&kept, &good));
    assert_eq!(fs::read_to_string(&kept.output_path).unwrap(), good_code);
    assert_eq!(fx.cache.stats().failures, 1);

    // No temp files left beside the artifact
    let leftovers: Vec<_> = fs::read_dir(fx.deps_dir.join("react"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_failed_first_build_stores_nothing() {
    let fx = Fixture::new(&["react"], FakeEngine::default());
    fx.engine.fail.store(true, Ordering::SeqCst);

    assert!(fx.cache.ensure_prebundled("react").await.is_err());
    assert!(fx.cache.get("react").is_none());
    assert!(!fx.deps_dir.join("react/index.js").exists());
}

#[tokio::test]
async fn test_different_packages_build_in_parallel() {
    let fx = Fixture::new(&["react", "lodash"], FakeEngine::with_delay(150));

    let (react, lodash) = tokio::join!(
        fx.cache.ensure_prebundled("react"),
        fx.cache.ensure_prebundled("lodash"),
    );

    assert!(react.is_ok());
    assert!(lodash.is_ok());
    assert_eq!(fx.engine.calls(), 2);
    assert_eq!(fx.engine.max_in_flight.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_sibling_aliases_are_external() {
    let fx = Fixture::new(&["react", "react-dom", "@scope/ui"], FakeEngine::default());

    fx.cache.ensure_prebundled("react-dom").await.unwrap();

    let requests = fx.engine.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let externals: Vec<&str> = requests[0].externals.iter().map(String::as_str).collect();
    assert_eq!(externals, vec!["@scope/ui", "react"]);
    assert!(requests[0].entry_points[0].ends_with("packages/react-dom/index.js"));
}

#[tokio::test]
async fn test_scoped_package_layout() {
    let fx = Fixture::new(&["@scope/ui"], FakeEngine::default());

    let entry = fx.cache.ensure_prebundled("@scope/ui").await.unwrap();
    assert_eq!(entry.output_path, fx.deps_dir.join("@scope/ui/index.js"));
}

#[tokio::test]
async fn test_prebundle_all_reports_each_package() {
    let fx = Fixture::new(&["react", "lodash"], FakeEngine::default());
    // Registered alias whose directory has nothing to bundle
    let empty = fx.root.join("packages/empty");
    fs::create_dir_all(&empty).unwrap();
    fs::write(empty.join("README.md"), "nothing here").unwrap();

    let mut entries: Vec<(String, PathBuf)> = ["react", "lodash"]
        .iter()
        .map(|n| (n.to_string(), fx.root.join("packages").join(n)))
        .collect();
    entries.push(("empty".to_string(), empty));
    let cache = cache_for(&fx.root, &fx.deps_dir, entries, fx.engine.clone());

    let report = cache.prebundle_all().await;

    assert!(!report.is_success());
    assert_eq!(report.entries.keys().collect::<Vec<_>>(), vec!["lodash", "react"]);
    assert!(matches!(
        report.failures.get("empty"),
        Some(PrebundleError::NoEntryPoint { .. })
    ));
}

#[tokio::test]
async fn test_unknown_package() {
    let fx = Fixture::new(&["react"], FakeEngine::default());

    let err = fx.cache.ensure_prebundled("vue").await.unwrap_err();
    assert!(matches!(err, PrebundleError::UnknownPackage(name) if name == "vue"));
    assert_eq!(fx.engine.calls(), 0);
}

#[tokio::test]
async fn test_prebundle_one_always_builds() {
    let fx = Fixture::new(&["react"], FakeEngine::default());
    let dir = fx.root.join("packages/react");

    fx.cache.prebundle_one("react", &dir).await.unwrap();
    fx.cache.prebundle_one("react", &dir).await.unwrap();

    assert_eq!(fx.engine.calls(), 2);
}

#[tokio::test]
async fn test_persisted_artifacts_are_adopted() {
    let fx = Fixture::new(&["react"], FakeEngine::default());
    fx.cache.ensure_prebundled("react").await.unwrap();

    let engine = Arc::new(FakeEngine::default());
    let entries = vec![("react".to_string(), fx.root.join("packages/react"))];
    let restarted = cache_for(&fx.root, &fx.deps_dir, entries, engine.clone());

    assert_eq!(restarted.adopt_existing().await, 1);
    let entry = restarted.ensure_prebundled("react").await.unwrap();

    assert_eq!(engine.calls(), 0);
    assert_eq!(entry.output_path, fx.deps_dir.join("react/index.js"));
}

/// React-like package exposing `jsx-runtime` through its export map
fn package_with_subpath(fx: &Fixture) {
    let dir = fx.root.join("packages/react");
    write_file(
        &dir.join("package.json"),
        r#"{"name": "react", "exports": {".": "./index.js", "./jsx-runtime": "./jsx-runtime.js"}}"#,
        past(),
    );
    write_file(&dir.join("jsx-runtime.js"), "export const jsx = 1;", past());
    write_file(&dir.join("internal.js"), "export {};", past());
}

#[tokio::test]
async fn test_exported_subpath_is_bundled_on_its_own() {
    let fx = Fixture::new(&["react", "react-dom"], FakeEngine::default());
    package_with_subpath(&fx);

    let entry = fx.cache.ensure_specifier("react/jsx-runtime").await.unwrap();

    assert_eq!(entry.name, "react/jsx-runtime");
    assert_eq!(entry.output_path, fx.deps_dir.join("react/jsx-runtime/index.js"));
    assert!(entry.output_path.is_file());

    let requests = fx.engine.requests.lock().unwrap().clone();
    assert!(requests[0].entry_points[0].ends_with("packages/react/jsx-runtime.js"));
    // The package itself stays external so the page shares one copy of it
    let externals: Vec<&str> = requests[0].externals.iter().map(String::as_str).collect();
    assert_eq!(externals, vec!["react", "react-dom"]);
}

#[tokio::test]
async fn test_subpath_shares_lock_and_staleness() {
    let fx = Fixture::new(&["react"], FakeEngine::with_delay(50));
    package_with_subpath(&fx);

    let (a, b) = tokio::join!(
        fx.cache.ensure_subpath("react", "jsx-runtime"),
        fx.cache.ensure_specifier("react/jsx-runtime"),
    );
    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    assert_eq!(fx.engine.calls(), 1);

    // Its own package entry is a separate artifact
    let package = fx.cache.ensure_specifier("react").await.unwrap();
    assert_eq!(package.output_path, fx.deps_dir.join("react/index.js"));
    assert_eq!(fx.engine.calls(), 2);

    let built = fx.cache.get("react/jsx-runtime").unwrap();
    fx.touch_source("react", built.built_at + Duration::from_millis(1));
    tokio::time::sleep(Duration::from_millis(20)).await;

    fx.cache.ensure_subpath("react", "jsx-runtime").await.unwrap();
    assert_eq!(fx.engine.calls(), 3);
}

#[tokio::test]
async fn test_unexported_subpath_is_rejected() {
    let fx = Fixture::new(&["react"], FakeEngine::default());
    package_with_subpath(&fx);

    let err = fx.cache.ensure_specifier("react/internal").await.unwrap_err();
    assert!(matches!(
        &err,
        PrebundleError::UnresolvedSubpath { specifier, .. } if specifier == "react/internal"
    ));
    assert!(fx.cache.get("react/internal").is_none());
    assert_eq!(fx.engine.calls(), 0);

    let err = fx.cache.ensure_subpath("react", "../lodash").await.unwrap_err();
    assert!(matches!(err, PrebundleError::InvalidName(_)));

    let err = fx.cache.ensure_specifier("vue/jsx-runtime").await.unwrap_err();
    assert!(matches!(err, PrebundleError::UnknownPackage(_)));
}
