//! Dependencies fetched over HTTP and re-loaded from their packaged records

use charter_core::archive::pack_directory;
use charter_core::{LoadedChart, Settings};
use charter_engine::TemplateRenderer;
use charter_kube::{
    Chart, ChartContext, ChartOptions, ExecOptions, InMemoryExecutor, NoPrompter, PackagedChart,
};
use charter_repo::{Repository, RepositoryConfig};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn postgres_archive() -> Vec<u8> {
    let tmp = TempDir::new().unwrap();
    write(
        &tmp.path().join("Chart.yaml"),
        "apiVersion: charter/v1\nname: postgres\nversion: 1.2.0\n",
    );
    write(&tmp.path().join("values.yaml"), "replicas: 1\n");
    write(
        &tmp.path().join("templates/statefulset.yaml"),
        r#"apiVersion: apps/v1
kind: StatefulSet
metadata:
  name: {{ chart.name }}
spec:
  replicas: {{ values.replicas }}
"#,
    );
    pack_directory(tmp.path()).unwrap()
}

fn shop_chart(root: &Path, url: &str) -> std::path::PathBuf {
    let dir = root.join("shop");
    write(
        &dir.join("Chart.yaml"),
        &format!(
            r#"apiVersion: charter/v1
name: shop
version: 1.0.0
dependencies:
  - name: database
    url: {url}
    constraint: ">=1.0.0"
    namespace: infra
    values:
      replicas: 2
"#
        ),
    );
    dir
}

fn context(settings: Arc<Settings>) -> ChartContext {
    let repository = Repository::new(&settings, RepositoryConfig::default()).unwrap();
    ChartContext {
        settings,
        renderer: Arc::new(TemplateRenderer::default()),
        prompter: Arc::new(NoPrompter),
        repository: Arc::new(repository),
    }
}

#[tokio::test]
async fn test_dependency_round_trip_through_repository() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/postgres/1.2.0"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"pg-1.2.0\"")
                .set_body_bytes(postgres_archive()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let settings = Arc::new(Settings::default().with_cache_dir(tmp.path().join("cache")));
    let url = format!("{}/postgres/1.2.0", server.uri());
    let shop = shop_chart(tmp.path(), &url);
    let exec = InMemoryExecutor::new(settings.clone(), "default");
    let opts = ExecOptions::default();

    let ctx = context(settings.clone());
    let mut chart = Chart::load(
        LoadedChart::load(&shop).unwrap(),
        ChartOptions::default().with_namespace("shop"),
        &ctx,
    )
    .await
    .unwrap();
    chart.apply(&exec, &opts).await.unwrap();

    let postgres = exec.object("infra", "StatefulSet", "postgres").unwrap();
    assert_eq!(postgres.additional["spec"]["replicas"], 2);

    let record = exec.object("infra", "Secret", "charter.chart.postgres").unwrap();
    let record = PackagedChart::from_object(&settings, &record).unwrap();
    assert_eq!(record.version.to_string(), "1.2.0");
    assert!(record.genus.ends_with("_postgres"));
    assert!(record.used_by.contains("shop-shop"));

    // a fresh context re-creates the shared chart from its record only
    let ctx = context(settings.clone());
    let mut chart = Chart::load(
        LoadedChart::load(&shop).unwrap(),
        ChartOptions::default().with_namespace("shop"),
        &ctx,
    )
    .await
    .unwrap();
    chart.delete(&exec, &opts, true).await.unwrap();
    assert_eq!(exec.object_count(), 0);
}

#[tokio::test]
async fn test_unpacked_records_are_shared() {
    let tmp = TempDir::new().unwrap();
    let settings = Settings::default().with_cache_dir(tmp.path());
    let repository = Repository::new(&settings, RepositoryConfig::default()).unwrap();
    let record = PackagedChart {
        name: "postgres".into(),
        namespace: "infra".into(),
        genus: "postgres".into(),
        version: semver::Version::new(1, 2, 0),
        values: serde_json::json!({}),
        archive: postgres_archive(),
        used_by: Default::default(),
    };

    let first = repository.unpack_record(&record).await.unwrap();
    let second = repository.unpack_record(&record).await.unwrap();
    assert_eq!(first, second);
    assert!(first.join("templates/statefulset.yaml").exists());
}
