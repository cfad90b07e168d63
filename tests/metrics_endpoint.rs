use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use axum_test::TestServer;
use fs_audio_exporter::config::MetricsConfig;
use fs_audio_exporter::errors::{MetricsError, MetricsResult};
use fs_audio_exporter::exporter::Collector;
use fs_audio_exporter::web::{MetricsServer, build_router};
use tokio_util::sync::CancellationToken;

/// Counts scrapes and returns a canned exposition
#[derive(Default)]
struct StubCollector {
    scrapes: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl Collector for StubCollector {
    async fn scrape(&self) -> MetricsResult<String> {
        self.scrapes.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MetricsError::Prometheus(prometheus::Error::Msg(
                "registry exploded".to_string(),
            )));
        }
        Ok("bbb_fs_scrape_status 1\n".to_string())
    }
}

fn server(collector: Arc<StubCollector>) -> TestServer {
    TestServer::new(build_router("/metrics", collector)).unwrap()
}

#[tokio::test]
async fn test_get_metrics_path_scrapes() {
    let collector = Arc::new(StubCollector::default());
    let server = server(Arc::clone(&collector));

    let response = server.get("/metrics").await;
    response.assert_status_ok();
    response.assert_text("bbb_fs_scrape_status 1\n");
    assert!(
        response
            .header("content-type")
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    assert_eq!(collector.scrapes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let collector = Arc::new(StubCollector::default());
    let server = server(Arc::clone(&collector));

    server.get("/").await.assert_status(StatusCode::NOT_FOUND);
    server.get("/metrics/extra").await.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(collector.scrapes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_other_methods_not_implemented() {
    let collector = Arc::new(StubCollector::default());
    let server = server(Arc::clone(&collector));

    server.post("/metrics").await.assert_status(StatusCode::NOT_IMPLEMENTED);
    server.delete("/metrics").await.assert_status(StatusCode::NOT_IMPLEMENTED);
    server
        .method(Method::PUT, "/elsewhere")
        .await
        .assert_status(StatusCode::NOT_IMPLEMENTED);
    assert_eq!(collector.scrapes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_render_failure_is_server_error() {
    let collector = Arc::new(StubCollector {
        fail: true,
        ..StubCollector::default()
    });
    let server = server(collector);

    let response = server.get("/metrics").await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.text().contains("registry exploded"));
}

#[tokio::test]
async fn test_address_in_use_stops_only_the_server() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let config = MetricsConfig {
        host: "127.0.0.1".to_string(),
        port: taken.local_addr().unwrap().port(),
        ..MetricsConfig::default()
    };

    let server = MetricsServer::new(&config, Arc::new(StubCollector::default())).unwrap();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        server.serve(CancellationToken::new()),
    )
    .await
    .expect("serve returns immediately");
    assert!(result.is_ok());
}

#[test]
fn test_relative_path_is_rejected() {
    let config = MetricsConfig {
        path: "metrics".to_string(),
        ..MetricsConfig::default()
    };
    assert!(MetricsServer::new(&config, Arc::new(StubCollector::default())).is_err());
}
