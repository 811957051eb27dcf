//! Daemon startup, gateway reachability and the one-shot subcommands.

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use specforge_core::{AppConfig, BrowserMode, ConfigError};
use specforge_server::App;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

fn local_config(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.path = Some(dir.path().join("data").join("specforge.db"));
    config.database.snapshot_dir = Some(dir.path().join("snapshots"));
    config.browser.mode = BrowserMode::Local;
    config.browser.headless = true;
    config.gateway.bind_addr = "127.0.0.1:0".to_string();
    config.workers.count = 1;
    config
}

#[tokio::test]
async fn test_open_rejects_missing_remote_credentials() {
    let dir = TempDir::new().expect("create temp dir");
    let mut config = local_config(&dir);
    config.browser.mode = BrowserMode::Remote;
    config.browser.endpoint = None;

    let err = App::open(config).await.err().expect("should fail");
    let config_err = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<ConfigError>())
        .expect("config error in chain");
    assert!(matches!(config_err, ConfigError::Missing { field, .. } if field == "browser.endpoint"));
    assert!(!dir.path().join("data").exists());
}

#[tokio::test]
async fn test_serve_answers_health_and_shuts_down() {
    let dir = TempDir::new().expect("create temp dir");
    let app = App::open(local_config(&dir)).await.expect("open app");

    let shutdown = CancellationToken::new();
    let running = app.start(shutdown.clone()).await.expect("start");

    let stream = TcpStream::connect(running.gateway_addr())
        .await
        .expect("connect");
    let mut framed = Framed::new(stream, LinesCodec::new());
    framed
        .send(r#"{"id":"1","method":"health"}"#.to_string())
        .await
        .expect("send");
    let line = tokio::time::timeout(Duration::from_secs(5), framed.next())
        .await
        .expect("response within timeout")
        .expect("connection open")
        .expect("valid line");
    let response: Value = serde_json::from_str(&line).expect("json");
    assert_eq!(response["id"], "1");
    assert_eq!(response["result"]["status"], "ok");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(10), running.wait())
        .await
        .expect("shutdown within timeout")
        .expect("clean shutdown");
}

#[tokio::test]
async fn test_normalize_on_empty_store_changes_nothing() {
    let dir = TempDir::new().expect("create temp dir");
    let app = App::open(local_config(&dir)).await.expect("open app");

    let reports = app.normalize(None).await.expect("normalize");
    assert_eq!(reports.len(), 4);
    assert!(reports.iter().all(|r| r.rows_changed == 0));
    assert!(reports.iter().all(|r| r.snapshot_path.is_none()));

    let single = app
        .normalize(Some("pipe-delimited-arrays"))
        .await
        .expect("normalize one pass");
    assert_eq!(single.len(), 1);
    assert_eq!(single[0].pass, "pipe-delimited-arrays");

    assert!(app.normalize(Some("no-such-pass")).await.is_err());
}

#[tokio::test]
async fn test_reap_on_empty_queue() {
    let dir = TempDir::new().expect("create temp dir");
    let app = App::open(local_config(&dir)).await.expect("open app");

    let report = app.reap().await.expect("reap");
    assert!(report.is_empty());
}
