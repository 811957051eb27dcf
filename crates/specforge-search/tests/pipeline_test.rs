//! Search pipeline against a mock HTTP catalog.

use specforge_core::{AppConfig, OracleKind};
use specforge_search::{RetryNotice, SearchError, SearchOutcome, SearchPipeline};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

fn config_for(server: &mockito::Server) -> AppConfig {
    let mut config = AppConfig::default();
    config.source.search_url = format!("{}/api/search", server.url());
    config.source.enumeration_url = format!("{}/api/devices", server.url());
    config.search.retry_delay_ms = 10;
    config.oracle.kind = OracleKind::Heuristic;
    config
}

#[tokio::test]
async fn test_two_transient_failures_then_success() {
    let mut server = mockito::Server::new_async().await;
    let failing = server
        .mock("GET", "/api/search")
        .match_query(mockito::Matcher::Any)
        .with_status(503)
        .with_body("try later")
        .expect(2)
        .create_async()
        .await;
    let ok = server
        .mock("GET", "/api/search")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(r#"[{"name":"Apple iPhone 15","slug":"apple_iphone_15-12559"}]"#)
        .expect(1)
        .create_async()
        .await;

    let pipeline = SearchPipeline::from_config(&config_for(&server)).expect("pipeline");
    let notices = Mutex::new(Vec::new());
    let observer = |n: &RetryNotice| notices.lock().expect("lock").push(n.clone());

    let report = pipeline
        .run("iPhone 15", Some("Apple"), &observer, &CancellationToken::new())
        .await
        .expect("search should succeed on the third attempt");

    failing.assert_async().await;
    ok.assert_async().await;
    assert_eq!(report.attempts, 3);
    assert!(matches!(report.outcome, SearchOutcome::Resolved { .. }));

    let notices = notices.lock().expect("lock");
    assert_eq!(notices.len(), 2);
    assert_eq!(notices[0].attempt, 1);
    assert_eq!(notices[1].attempt, 2);
    assert!(notices.iter().all(|n| n.max_attempts == 3));
}

#[tokio::test]
async fn test_every_attempt_fails() {
    let mut server = mockito::Server::new_async().await;
    let failing = server
        .mock("GET", "/api/search")
        .match_query(mockito::Matcher::Any)
        .with_status(502)
        .expect(3)
        .create_async()
        .await;

    let pipeline = SearchPipeline::from_config(&config_for(&server)).expect("pipeline");
    let observer = |_: &RetryNotice| {};

    let err = pipeline
        .run("iPhone 15", None, &observer, &CancellationToken::new())
        .await
        .expect_err("search should exhaust retries");

    failing.assert_async().await;
    assert!(matches!(err, SearchError::Exhausted { attempts: 3, .. }));
}

#[tokio::test]
async fn test_malformed_response_fails_without_retry() {
    let mut server = mockito::Server::new_async().await;
    let bad = server
        .mock("GET", "/api/search")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body("<html>not json</html>")
        .expect(1)
        .create_async()
        .await;

    let pipeline = SearchPipeline::from_config(&config_for(&server)).expect("pipeline");
    let retries = Mutex::new(0u32);
    let observer = |_: &RetryNotice| *retries.lock().expect("lock") += 1;

    let err = pipeline
        .run("iPhone 15", None, &observer, &CancellationToken::new())
        .await
        .expect_err("malformed body");

    bad.assert_async().await;
    assert!(matches!(err, SearchError::Parse(_)));
    assert_eq!(*retries.lock().expect("lock"), 0);
}
