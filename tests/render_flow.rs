//! End-to-end behaviour of the front-end router: snapshot interception in front
//! of the upstream proxy.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
    routing::get,
};
use tempfile::TempDir;
use tower::ServiceExt;
use url::Url;

use pdfsnap::infra::http::{ProxyState, build_router};
use pdfsnap::snapshot::{
    CacheStore, HeaderClientClassifier, InMemoryJobRegistry, LaunchError, LaunchSpec,
    PathConditions, ProcessLauncher, RenderOrchestrator, SnapshotConfig, SnapshotState,
    SystemClock,
};

/// Writes the artifact immediately, as a worker that finished instantly would.
#[derive(Default)]
struct InstantWorker {
    launched: Mutex<Vec<LaunchSpec>>,
    body: &'static [u8],
}

#[async_trait]
impl ProcessLauncher for InstantWorker {
    async fn launch(&self, spec: LaunchSpec) -> Result<(), LaunchError> {
        tokio::fs::write(&spec.output_path, self.body)
            .await
            .map_err(LaunchError::Spawn)?;
        self.launched.lock().expect("launch log").push(spec);
        Ok(())
    }
}

async fn spawn_upstream() -> Url {
    let app = Router::new()
        .route("/about", get(|| async { "about page" }))
        .route("/reports/q3", get(|| async { "<h1>Q3</h1>" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("upstream server");
    });
    Url::parse(&format!("http://{addr}")).expect("upstream url")
}

fn front_end(
    dir: &TempDir,
    upstream: Url,
    launcher: Arc<dyn ProcessLauncher>,
    configure: impl FnOnce(&mut SnapshotConfig),
) -> Router {
    let mut config = SnapshotConfig::new(dir.path());
    configure(&mut config);
    let clock = Arc::new(SystemClock);
    let orchestrator = RenderOrchestrator::new(
        config,
        CacheStore::new(dir.path(), clock.clone()),
        Arc::new(InMemoryJobRegistry::new()),
        launcher,
        clock,
    );
    let snapshot = SnapshotState {
        orchestrator: Arc::new(orchestrator),
        rules: Arc::new(PathConditions::allow_all()),
        classifier: Arc::new(HeaderClientClassifier),
        public_base_url: None,
    };
    build_router(ProxyState::new(reqwest::Client::new(), upstream), snapshot)
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, "front.test")
        .body(Body::empty())
        .expect("request")
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body")
        .to_vec()
}

#[tokio::test]
async fn non_pdf_requests_reach_upstream() {
    let dir = TempDir::new().expect("temp dir");
    let upstream = spawn_upstream().await;
    let worker = Arc::new(InstantWorker::default());
    let router = front_end(&dir, upstream, worker.clone(), |_| {});

    let response = router.oneshot(get_request("/about")).await.expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"about page");
    assert!(worker.launched.lock().expect("launch log").is_empty());
}

#[tokio::test]
async fn pdf_is_rendered_then_served() {
    let dir = TempDir::new().expect("temp dir");
    let upstream = spawn_upstream().await;
    let worker = Arc::new(InstantWorker {
        body: b"%PDF-1.7 q3",
        ..Default::default()
    });
    let router = front_end(&dir, upstream, worker.clone(), |config| {
        config.cache_ttl = Duration::from_secs(60);
        config.polling_offset = Duration::from_secs(2);
    });

    let first = router
        .clone()
        .oneshot(get_request("/reports/q3.pdf"))
        .await
        .expect("response");
    assert_eq!(first.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        first.headers().get(header::RETRY_AFTER).and_then(|v| v.to_str().ok()),
        Some("2")
    );
    assert!(body_bytes(first).await.is_empty());

    let second = router
        .oneshot(get_request("/reports/q3.pdf"))
        .await
        .expect("response");
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(
        second.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("application/pdf")
    );
    assert_eq!(body_bytes(second).await, b"%PDF-1.7 q3");

    let launched = worker.launched.lock().expect("launch log");
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0].url, "http://front.test/reports/q3");
}

#[tokio::test]
async fn async_client_is_told_where_to_fetch() {
    let dir = TempDir::new().expect("temp dir");
    let upstream = spawn_upstream().await;
    let worker = Arc::new(InstantWorker {
        body: b"%PDF",
        ..Default::default()
    });
    let router = front_end(&dir, upstream, worker, |config| {
        config.cache_ttl = Duration::from_secs(60);
    });

    let xhr = |uri: &str| {
        Request::builder()
            .uri(uri)
            .header(header::HOST, "front.test")
            .header("x-requested-with", "XMLHttpRequest")
            .body(Body::empty())
            .expect("request")
    };

    router
        .clone()
        .oneshot(xhr("/reports/q3.pdf"))
        .await
        .expect("response");
    let ready = router
        .oneshot(xhr("/reports/q3.pdf"))
        .await
        .expect("response");

    assert_eq!(ready.status(), StatusCode::OK);
    let body = String::from_utf8(body_bytes(ready).await).expect("utf8 body");
    assert!(body.contains(r#"href="/reports/q3.pdf""#));
}

#[tokio::test]
async fn empty_render_reports_invalid_pdf() {
    let dir = TempDir::new().expect("temp dir");
    let upstream = spawn_upstream().await;
    let worker = Arc::new(InstantWorker::default());
    let router = front_end(&dir, upstream, worker, |_| {});

    router
        .clone()
        .oneshot(get_request("/reports/q3.pdf"))
        .await
        .expect("response");
    let failed = router
        .oneshot(get_request("/reports/q3.pdf"))
        .await
        .expect("response");

    assert_eq!(failed.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = String::from_utf8(body_bytes(failed).await).expect("utf8 body");
    assert!(body.contains("PDF file invalid"));
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() {
    let dir = TempDir::new().expect("temp dir");
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let upstream = Url::parse(&format!("http://{addr}")).expect("url");
    let router = front_end(&dir, upstream, Arc::new(InstantWorker::default()), |_| {});

    let response = router.oneshot(get_request("/about")).await.expect("response");

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[cfg(unix)]
mod command_worker {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    use pdfsnap::snapshot::{CommandLauncher, WorkerOptions};

    use super::*;

    fn write_worker(dir: &Path) -> PathBuf {
        let path = dir.join("worker.sh");
        let script = r##"#!/bin/sh
out=""
while [ "$#" -gt 0 ]; do
  if [ "$1" = "--output" ]; then
    out="$2"
    shift
  fi
  shift
done
printf '%%PDF-1.4 rendered' > "$out"
"##;
        std::fs::write(&path, script).expect("write worker");
        let mut perms = std::fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    #[tokio::test]
    async fn external_worker_output_is_published_and_served() {
        let scripts = TempDir::new().expect("scripts dir");
        let cache = TempDir::new().expect("cache dir");
        let upstream = spawn_upstream().await;
        let launcher = Arc::new(CommandLauncher::new(WorkerOptions {
            program: write_worker(scripts.path()),
            args: Vec::new(),
            format: "A4".to_string(),
            orientation: "portrait".to_string(),
            zoom: 1.0,
            margin: "1cm".to_string(),
            render_timeout: Duration::from_secs(5),
        }));
        let router = front_end(&cache, upstream, launcher, |config| {
            config.cache_ttl = Duration::from_secs(60);
            config.request_timeout = Duration::from_secs(30);
        });

        let first = router
            .clone()
            .oneshot(get_request("/reports/q3.pdf"))
            .await
            .expect("response");
        assert_eq!(first.status(), StatusCode::SERVICE_UNAVAILABLE);

        let mut served = None;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let response = router
                .clone()
                .oneshot(get_request("/reports/q3.pdf"))
                .await
                .expect("response");
            if response.status() == StatusCode::OK {
                served = Some(body_bytes(response).await);
                break;
            }
        }

        assert_eq!(served.as_deref(), Some(&b"%PDF-1.4 rendered"[..]));
    }
}
