//! Chart-tree apply and delete against the in-memory executor

use async_trait::async_trait;
use charter_core::archive::unpack_archive;
use charter_core::{LoadedChart, Settings};
use charter_engine::TemplateRenderer;
use charter_kube::{
    Chart, ChartContext, ChartOptions, ChartRepository, ExecOptions, FnProgress, InMemoryExecutor,
    KubeError, NoPrompter, OperationContext, Operation, PackagedChart, ProgressNode, Result,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const POSTGRES_URL: &str = "https://charts.example.com/postgres/1.2.0";

const WORKLOAD: &str = r#"apiVersion: apps/v1
kind: StatefulSet
metadata:
  name: {{ chart.name }}
spec:
  replicas: {{ values.replicas }}
---
apiVersion: v1
kind: Secret
metadata:
  name: {{ chart.name }}-config
stringData:
  replicas: "{{ values.replicas }}"
"#;

// ============================================================================
// Fixtures
// ============================================================================

fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn workload_chart(dir: &Path, name: &str, version: &str) {
    write(
        &dir.join("Chart.yaml"),
        &format!("apiVersion: charter/v1\nname: {name}\nversion: {version}\n"),
    );
    write(&dir.join("values.yaml"), "replicas: 1\n");
    write(&dir.join("templates/workload.yaml"), WORKLOAD);
}

/// `shop` with the sub-charts `db` and `cache`
fn tree_chart(root: &Path) -> PathBuf {
    let dir = root.join("shop");
    write(
        &dir.join("Chart.yaml"),
        r#"apiVersion: charter/v1
name: shop
version: 1.0.0
charts:
  - name: db
    path: charts/db
  - name: cache
    path: charts/cache
"#,
    );
    workload_chart(&dir.join("charts/db"), "db", "1.0.0");
    workload_chart(&dir.join("charts/cache"), "cache", "1.0.0");
    dir
}

/// A chart depending on the shared postgres chart
fn dependent_chart(root: &Path, name: &str, constraint: &str) -> PathBuf {
    dependent_chart_with(root, name, constraint, "    values:\n      replicas: 3\n")
}

/// Like [`dependent_chart`] with `extra` appended to the dependency entry
fn dependent_chart_with(root: &Path, name: &str, constraint: &str, extra: &str) -> PathBuf {
    let dir = root.join(name);
    write(
        &dir.join("Chart.yaml"),
        &format!(
            r#"apiVersion: charter/v1
name: {name}
version: 0.3.0
dependencies:
  - name: database
    url: {POSTGRES_URL}
    constraint: "{constraint}"
    namespace: infra
{extra}"#
        ),
    );
    write(
        &dir.join("templates/app.yaml"),
        r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: {{ chart.name }}-app
data:
  db-replicas: "{{ values.database.replicas }}"
"#,
    );
    dir
}

/// Resolves URLs to fixture directories and unpacks packaged records
struct DirRepository {
    charts: BTreeMap<String, PathBuf>,
    unpack: TempDir,
    unpacked: AtomicUsize,
}

impl DirRepository {
    fn new(charts: BTreeMap<String, PathBuf>) -> Self {
        Self {
            charts,
            unpack: TempDir::new().unwrap(),
            unpacked: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ChartRepository for DirRepository {
    async fn load(&self, url: &str, options: ChartOptions, context: &ChartContext) -> Result<Chart> {
        let dir = self
            .charts
            .get(url)
            .ok_or_else(|| KubeError::Source(format!("unknown url {url}")))?;
        Chart::load(LoadedChart::load(dir)?, options, context).await
    }

    async fn load_packaged(
        &self,
        record: &PackagedChart,
        options: ChartOptions,
        context: &ChartContext,
    ) -> Result<Chart> {
        let n = self.unpacked.fetch_add(1, Ordering::SeqCst);
        let dir = self.unpack.path().join(format!("{}-{n}", record.name));
        unpack_archive(record.archive.as_slice(), &dir)?;
        Chart::load(LoadedChart::load(&dir)?, options, context).await
    }
}

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    settings: Arc<Settings>,
    context: ChartContext,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let postgres = root.join("postgres");
        workload_chart(&postgres, "postgres", "1.2.0");

        let mut charts = BTreeMap::new();
        charts.insert(POSTGRES_URL.to_string(), postgres);

        let settings = Arc::new(Settings::default());
        let context = ChartContext {
            settings: settings.clone(),
            renderer: Arc::new(TemplateRenderer::default()),
            prompter: Arc::new(NoPrompter),
            repository: Arc::new(DirRepository::new(charts)),
        };
        Self {
            _dir: dir,
            root,
            settings,
            context,
        }
    }

    fn executor(&self) -> InMemoryExecutor {
        InMemoryExecutor::new(self.settings.clone(), "default")
    }

    async fn load(&self, dir: &Path, options: ChartOptions) -> Chart {
        Chart::load(LoadedChart::load(dir).unwrap(), options, &self.context)
            .await
            .unwrap()
    }
}

fn applied(kind: &str, name: &str) -> Operation {
    Operation::Applied {
        kind: kind.into(),
        name: name.into(),
    }
}

fn deleted(kind: &str, name: &str) -> Operation {
    Operation::Deleted {
        kind: kind.into(),
        name: name.into(),
    }
}

// ============================================================================
// Tree apply / delete
// ============================================================================

#[tokio::test]
async fn test_template_is_sorted_across_sub_charts() {
    let fx = Fixture::new();
    let dir = tree_chart(&fx.root);
    let chart = fx
        .load(&dir, ChartOptions::default().with_namespace("shop").skip_packaging())
        .await;

    let objects = chart
        .template(&ExecOptions::default())
        .await
        .unwrap()
        .collect_objects()
        .unwrap();
    let kinds: Vec<_> = objects.iter().map(|o| o.kind.as_str()).collect();

    let first_statefulset = kinds.iter().position(|k| *k == "StatefulSet").unwrap();
    assert!(kinds[..first_statefulset].iter().all(|k| *k == "Secret"));
    assert_eq!(&kinds[first_statefulset..], &["StatefulSet", "StatefulSet"]);
    assert!(objects.iter().all(|o| o.namespace() == "shop"));
}

#[tokio::test]
async fn test_values_file_survives_default_options() {
    let fx = Fixture::new();
    let dir = fx.root.join("solo");
    workload_chart(&dir, "solo", "1.0.0");
    let exec = fx.executor();

    let mut chart = fx.load(&dir, ChartOptions::default()).await;
    assert_eq!(chart.values()["replicas"], 1);
    chart.apply(&exec, &ExecOptions::default()).await.unwrap();

    let solo = exec.object("default", "StatefulSet", "solo").unwrap();
    assert_eq!(solo.additional["spec"]["replicas"], 1);
}

#[tokio::test]
async fn test_apply_then_delete_reverses_kind_order() {
    let fx = Fixture::new();
    let dir = tree_chart(&fx.root);
    let exec = fx.executor();
    let options = ChartOptions::default().with_namespace("shop").skip_packaging();

    let mut chart = fx.load(&dir, options.clone()).await;
    chart.apply(&exec, &ExecOptions::default()).await.unwrap();

    assert_eq!(
        exec.operations(),
        vec![
            applied("Secret", "charter.chart.db"),
            applied("Secret", "db-config"),
            applied("StatefulSet", "db"),
            applied("Secret", "cache-config"),
            applied("Secret", "charter.chart.cache"),
            applied("StatefulSet", "cache"),
        ]
    );
    let db = exec.object("shop", "StatefulSet", "db").unwrap();
    assert_eq!(db.metadata.labels["charter.io/app"], "db");
    assert_eq!(db.metadata.labels["charter.io/version"], "1.0.0");

    exec.reset_counts();
    let mut chart = fx.load(&dir, options).await;
    chart.delete(&exec, &ExecOptions::default(), false).await.unwrap();

    assert_eq!(
        exec.operations(),
        vec![
            deleted("StatefulSet", "db"),
            deleted("Secret", "db-config"),
            deleted("Secret", "charter.chart.db"),
            deleted("StatefulSet", "cache"),
            deleted("Secret", "charter.chart.cache"),
            deleted("Secret", "cache-config"),
        ]
    );
    assert_eq!(exec.object_count(), 0);
}

#[tokio::test]
async fn test_packaged_record_describes_chart() {
    let fx = Fixture::new();
    let dir = tree_chart(&fx.root);
    let exec = fx.executor();

    let mut values = charter_core::Values::new();
    values.set("db.replicas", serde_json::json!(4)).unwrap();
    let mut chart = fx
        .load(&dir, ChartOptions::default().with_namespace("shop").with_values(values))
        .await;
    chart.apply(&exec, &ExecOptions::default()).await.unwrap();

    let object = exec.object("shop", "Secret", "charter.chart.shop").unwrap();
    let record = PackagedChart::from_object(&fx.settings, &object).unwrap();
    assert_eq!(record.name, "shop");
    assert_eq!(record.version.to_string(), "1.0.0");
    assert_eq!(record.values["db"]["replicas"], 4);
    assert!(!record.archive.is_empty());

    let db = exec.object("shop", "StatefulSet", "db").unwrap();
    assert_eq!(db.additional["spec"]["replicas"], 4);
}

#[tokio::test]
async fn test_progress_reaches_100() {
    let fx = Fixture::new();
    let dir = tree_chart(&fx.root);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let progress = ProgressNode::root(Arc::new(FnProgress(move |p: u8| {
        sink.lock().unwrap().push(p);
    })));
    let exec = InMemoryExecutor::with_progress(fx.settings.clone(), "default", progress);

    let mut chart = fx.load(&dir, ChartOptions::default()).await;
    chart.apply(&exec, &ExecOptions::default()).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.last(), Some(&100));
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert!(seen.iter().all(|p| p % 5 == 0));
}

#[tokio::test]
async fn test_failure_names_the_chart_path() {
    let fx = Fixture::new();
    let dir = tree_chart(&fx.root);
    let exec = fx.executor();
    exec.fail_on_apply("StatefulSet", "quota exceeded");

    let mut chart = fx.load(&dir, ChartOptions::default()).await;
    let err = chart.apply(&exec, &ExecOptions::default()).await.unwrap_err();

    assert_eq!(err.chart_path(), vec!["shop", "db"]);
    assert!(matches!(err.root_cause(), KubeError::Executor { .. }));
    assert!(exec.object("default", "StatefulSet", "cache").is_none());
}

#[tokio::test]
async fn test_cancelled_context_stops_before_any_change() {
    let fx = Fixture::new();
    let dir = tree_chart(&fx.root);
    let exec = fx.executor();
    let ctx = OperationContext::new();
    ctx.cancel();

    let mut chart = fx.load(&dir, ChartOptions::default()).await;
    let err = chart.apply(&exec, &ExecOptions::new(ctx)).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(exec.operation_counts().mutations(), 0);
}

#[tokio::test]
async fn test_read_only_chart_does_not_mutate() {
    let fx = Fixture::new();
    let dir = tree_chart(&fx.root);
    let exec = fx.executor();

    let mut chart = fx.load(&dir, ChartOptions::default().read_only()).await;
    chart.apply(&exec, &ExecOptions::default()).await.unwrap();
    chart.delete(&exec, &ExecOptions::default(), true).await.unwrap();

    assert_eq!(exec.operation_counts().mutations(), 0);
    assert_eq!(exec.object_count(), 0);
}

// ============================================================================
// Vaults
// ============================================================================

#[tokio::test]
async fn test_vault_values_survive_reapply() {
    let fx = Fixture::new();
    let dir = fx.root.join("api");
    write(
        &dir.join("Chart.yaml"),
        r#"apiVersion: charter/v1
name: api
version: 2.0.0
vaults:
  - name: admin
    credential:
      username: admin
"#,
    );
    write(
        &dir.join("templates/config.yaml"),
        r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: api-config
data:
  user: "{{ values.admin.username }}"
  password: "{{ values.admin.password }}"
"#,
    );
    let exec = fx.executor();

    let mut first = fx.load(&dir, ChartOptions::default()).await;
    first.apply(&exec, &ExecOptions::default()).await.unwrap();
    let config = exec.object("default", "ConfigMap", "api-config").unwrap();
    let password = config.additional["data"]["password"].clone();
    assert_eq!(config.additional["data"]["user"], "admin");
    assert_eq!(password.as_str().unwrap().len(), 24);
    assert!(exec.object("default", "Secret", "admin").is_some());

    let mut second = fx.load(&dir, ChartOptions::default()).await;
    second.apply(&exec, &ExecOptions::default()).await.unwrap();
    let config = exec.object("default", "ConfigMap", "api-config").unwrap();
    assert_eq!(config.additional["data"]["password"], password);

    let mut third = fx.load(&dir, ChartOptions::default()).await;
    third.delete(&exec, &ExecOptions::default(), false).await.unwrap();
    assert_eq!(exec.object_count(), 0);
}

// ============================================================================
// Shared dependencies
// ============================================================================

fn postgres_statefulsets(exec: &InMemoryExecutor) -> usize {
    exec.objects()
        .iter()
        .filter(|o| o.kind == "StatefulSet" && o.name() == "postgres")
        .count()
}

#[tokio::test]
async fn test_shared_dependency_is_installed_once() {
    let fx = Fixture::new();
    let shop = dependent_chart(&fx.root, "shop", ">=1.0.0");
    let blog = dependent_chart(&fx.root, "blog", "^1.2");
    let exec = fx.executor();
    let opts = ExecOptions::default();

    let mut chart = fx.load(&shop, ChartOptions::default().with_namespace("shop")).await;
    chart.apply(&exec, &opts).await.unwrap();
    let mut chart = fx.load(&blog, ChartOptions::default().with_namespace("blog")).await;
    chart.apply(&exec, &opts).await.unwrap();

    assert_eq!(postgres_statefulsets(&exec), 1);
    let installs = exec
        .operations()
        .iter()
        .filter(|op| **op == applied("StatefulSet", "postgres"))
        .count();
    assert_eq!(installs, 1);

    let postgres = exec.object("infra", "StatefulSet", "postgres").unwrap();
    assert_eq!(postgres.additional["spec"]["replicas"], 3);
    let blog_config = exec.object("blog", "ConfigMap", "blog-app").unwrap();
    assert_eq!(blog_config.additional["data"]["db-replicas"], "3");

    let record = exec.object("infra", "Secret", "charter.chart.postgres").unwrap();
    let record = PackagedChart::from_object(&fx.settings, &record).unwrap();
    assert_eq!(record.genus, "charts.example.com_postgres");
    let users: Vec<_> = record.used_by.iter().map(String::as_str).collect();
    assert_eq!(users, vec!["blog-blog", "shop-shop"]);
}

#[tokio::test]
async fn test_shared_dependency_deleted_with_last_user() {
    let fx = Fixture::new();
    let shop = dependent_chart(&fx.root, "shop", ">=1.0.0");
    let blog = dependent_chart(&fx.root, "blog", ">=1.0.0");
    let exec = fx.executor();
    let opts = ExecOptions::default();

    for (dir, ns) in [(&shop, "shop"), (&blog, "blog")] {
        let mut chart = fx.load(dir, ChartOptions::default().with_namespace(ns)).await;
        chart.apply(&exec, &opts).await.unwrap();
    }

    let mut chart = fx.load(&shop, ChartOptions::default().with_namespace("shop")).await;
    chart.delete(&exec, &opts, true).await.unwrap();
    assert_eq!(postgres_statefulsets(&exec), 1);
    assert!(exec.object("shop", "ConfigMap", "shop-app").is_none());

    let mut chart = fx.load(&blog, ChartOptions::default().with_namespace("blog")).await;
    chart.delete(&exec, &opts, true).await.unwrap();
    assert_eq!(postgres_statefulsets(&exec), 0);
    assert_eq!(exec.object_count(), 0);
}

#[tokio::test]
async fn test_non_recursive_delete_keeps_unused_dependency() {
    let fx = Fixture::new();
    let shop = dependent_chart(&fx.root, "shop", ">=1.0.0");
    let exec = fx.executor();
    let opts = ExecOptions::default();

    let mut chart = fx.load(&shop, ChartOptions::default().with_namespace("shop")).await;
    chart.apply(&exec, &opts).await.unwrap();
    let mut chart = fx.load(&shop, ChartOptions::default().with_namespace("shop")).await;
    chart.delete(&exec, &opts, false).await.unwrap();

    assert_eq!(postgres_statefulsets(&exec), 1);
    let record = exec.object("infra", "Secret", "charter.chart.postgres").unwrap();
    let record = PackagedChart::from_object(&fx.settings, &record).unwrap();
    assert!(record.used_by.is_empty());
}

#[tokio::test]
async fn test_installed_version_must_satisfy_constraint() {
    let fx = Fixture::new();
    let shop = dependent_chart(&fx.root, "shop", ">=1.0.0");
    let strict = dependent_chart(&fx.root, "strict", "^2");
    let exec = fx.executor();
    let opts = ExecOptions::default();

    let mut chart = fx.load(&shop, ChartOptions::default().with_namespace("shop")).await;
    chart.apply(&exec, &opts).await.unwrap();

    let mut chart = fx.load(&strict, ChartOptions::default().with_namespace("strict")).await;
    let err = chart.apply(&exec, &opts).await.unwrap_err();
    assert!(matches!(
        err.root_cause(),
        KubeError::VersionConstraintViolation { version, .. } if version == "1.2.0"
    ));
}

#[tokio::test]
async fn test_two_installed_charts_of_a_genus_are_ambiguous() {
    let fx = Fixture::new();
    let shop = dependent_chart(&fx.root, "shop", ">=1.0.0");
    let exec = fx.executor();

    for name in ["postgres", "postgres-legacy"] {
        let record = PackagedChart {
            name: name.to_string(),
            namespace: "infra".to_string(),
            genus: "charts.example.com_postgres".to_string(),
            version: semver::Version::new(1, 2, 0),
            values: serde_json::json!({}),
            archive: Vec::new(),
            used_by: Default::default(),
        };
        exec.insert(record.to_object(&fx.settings).unwrap());
    }

    let mut chart = fx.load(&shop, ChartOptions::default().with_namespace("shop")).await;
    let err = chart.apply(&exec, &ExecOptions::default()).await.unwrap_err();
    assert!(matches!(
        err.root_cause(),
        KubeError::AmbiguousDependency { count: 2, .. }
    ));
    assert_eq!(exec.operation_counts().applies, 0);
}

#[tokio::test]
async fn test_dependency_without_values_uses_chart_defaults() {
    let fx = Fixture::new();
    let shop = dependent_chart_with(&fx.root, "shop", ">=1.0.0", "");
    let exec = fx.executor();

    let mut chart = fx.load(&shop, ChartOptions::default().with_namespace("shop")).await;
    chart.apply(&exec, &ExecOptions::default()).await.unwrap();

    let postgres = exec.object("infra", "StatefulSet", "postgres").unwrap();
    assert_eq!(postgres.additional["spec"]["replicas"], 1);
    let config = exec.object("shop", "ConfigMap", "shop-app").unwrap();
    assert_eq!(config.additional["data"]["db-replicas"], "1");
}

#[tokio::test]
async fn test_delete_renders_with_installed_dependency_values() {
    let fx = Fixture::new();
    let shop = dependent_chart_with(&fx.root, "shop", ">=1.0.0", "");
    let blog = dependent_chart_with(&fx.root, "blog", ">=1.0.0", "");
    let exec = fx.executor();
    let opts = ExecOptions::default();

    for (dir, ns) in [(&shop, "shop"), (&blog, "blog")] {
        let mut chart = fx.load(dir, ChartOptions::default().with_namespace(ns)).await;
        chart.apply(&exec, &opts).await.unwrap();
    }

    // postgres stays installed for blog
    let mut chart = fx.load(&shop, ChartOptions::default().with_namespace("shop")).await;
    chart.delete(&exec, &opts, true).await.unwrap();
    assert!(exec.object("shop", "ConfigMap", "shop-app").is_none());
    assert_eq!(postgres_statefulsets(&exec), 1);

    let mut chart = fx.load(&blog, ChartOptions::default().with_namespace("blog")).await;
    chart.delete(&exec, &opts, true).await.unwrap();
    assert!(exec.object("blog", "ConfigMap", "blog-app").is_none());
    assert_eq!(exec.object_count(), 0);
}
