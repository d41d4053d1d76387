//! Unit tests for the artifact cache helpers.
//!
//! A local axum server stands in for the artifact host so freshness-marker
//! handling can be checked against real `Last-Modified` headers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use craftplane::driver::artifact::{
    fetch_if_stale, http_client, read_marker, remove_if_exists, write_marker,
};
use craftplane::AppError;

#[derive(Clone, Default)]
struct Host {
    hits: Arc<AtomicUsize>,
    stamp: Arc<Mutex<String>>,
    body: Arc<Mutex<Vec<u8>>>,
}

async fn artifact(State(host): State<Host>) -> impl IntoResponse {
    host.hits.fetch_add(1, Ordering::SeqCst);
    let stamp = host.stamp.lock().unwrap().clone();
    let body = host.body.lock().unwrap().clone();
    ([(header::LAST_MODIFIED, stamp)], body)
}

async fn missing() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn start_host(stamp: &str, body: &[u8]) -> (Host, String) {
    let host = Host::default();
    *host.stamp.lock().unwrap() = stamp.to_owned();
    *host.body.lock().unwrap() = body.to_vec();

    let router = Router::new()
        .route("/server.jar", get(artifact))
        .route("/missing.jar", get(missing))
        .with_state(host.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (host, format!("http://{addr}"))
}

const STAMP_A: &str = "Wed, 01 May 2024 12:00:00 GMT";
const STAMP_B: &str = "Thu, 02 May 2024 08:30:00 GMT";

#[tokio::test]
async fn first_fetch_downloads_and_leaves_no_part_file() {
    let (_host, base) = start_host(STAMP_A, b"jar-bytes-v1").await;
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("jars").join("paper_1.20.jar");
    let marker = dir.path().join("jars").join("paper_1.20.log");

    let stamp = fetch_if_stale(&http_client().unwrap(), &format!("{base}/server.jar"), &target, &marker)
        .await
        .unwrap();

    assert_eq!(stamp.as_deref(), Some(STAMP_A));
    assert_eq!(std::fs::read(&target).unwrap(), b"jar-bytes-v1");
    let leftovers: Vec<_> = std::fs::read_dir(target.parent().unwrap())
        .unwrap()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".part"))
        .collect();
    assert!(leftovers.is_empty());
    // The marker is the caller's job.
    assert!(!marker.exists());
}

#[tokio::test]
async fn matching_marker_skips_download() {
    let (host, base) = start_host(STAMP_A, b"jar-bytes-v1").await;
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("BuildTools.jar");
    let marker = dir.path().join("BuildTools.log");
    let client = http_client().unwrap();
    let url = format!("{base}/server.jar");

    let stamp = fetch_if_stale(&client, &url, &target, &marker).await.unwrap().unwrap();
    write_marker(&marker, &stamp).await.unwrap();

    *host.body.lock().unwrap() = b"should-not-be-written".to_vec();
    let again = fetch_if_stale(&client, &url, &target, &marker).await.unwrap();

    assert_eq!(again, None);
    assert_eq!(std::fs::read(&target).unwrap(), b"jar-bytes-v1");
    assert_eq!(host.hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn changed_last_modified_triggers_download() {
    let (host, base) = start_host(STAMP_A, b"v1").await;
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("a.jar");
    let marker = dir.path().join("a.log");
    let client = http_client().unwrap();
    let url = format!("{base}/server.jar");

    let stamp = fetch_if_stale(&client, &url, &target, &marker).await.unwrap().unwrap();
    write_marker(&marker, &stamp).await.unwrap();

    *host.stamp.lock().unwrap() = STAMP_B.to_owned();
    *host.body.lock().unwrap() = b"v2".to_vec();
    let refreshed = fetch_if_stale(&client, &url, &target, &marker).await.unwrap();

    assert_eq!(refreshed.as_deref(), Some(STAMP_B));
    assert_eq!(std::fs::read(&target).unwrap(), b"v2");
}

#[tokio::test]
async fn matching_marker_without_artifact_downloads_again() {
    let (_host, base) = start_host(STAMP_A, b"v1").await;
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("a.jar");
    let marker = dir.path().join("a.log");
    write_marker(&marker, STAMP_A).await.unwrap();

    let stamp = fetch_if_stale(&http_client().unwrap(), &format!("{base}/server.jar"), &target, &marker)
        .await
        .unwrap();
    assert_eq!(stamp.as_deref(), Some(STAMP_A));
    assert!(target.exists());
}

#[tokio::test]
async fn http_error_is_acquisition_failure() {
    let (_host, base) = start_host(STAMP_A, b"v1").await;
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("a.jar");

    let err = fetch_if_stale(
        &http_client().unwrap(),
        &format!("{base}/missing.jar"),
        &target,
        &dir.path().join("a.log"),
    )
    .await;

    assert!(matches!(err, Err(AppError::Acquisition(_))));
    assert!(!target.exists());
}

#[tokio::test]
async fn missing_marker_reads_empty() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(read_marker(&dir.path().join("none.log")).await, "");
}

#[tokio::test]
async fn remove_if_exists_tolerates_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mojang_1.20.jar");
    remove_if_exists(&path).await.unwrap();

    std::fs::write(&path, b"x").unwrap();
    remove_if_exists(&path).await.unwrap();
    assert!(!path.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn tool_step_fails_on_nonzero_exit() {
    use craftplane::driver::artifact::run_java_step;

    let dir = tempfile::tempdir().unwrap();
    let ok = run_java_step("sh", &["-c".into(), "exit 0".into()], dir.path()).await;
    assert!(ok.is_ok());

    let err = run_java_step(
        "sh",
        &["-c".into(), "echo 'patch failed' >&2; exit 3".into()],
        dir.path(),
    )
    .await;
    match err {
        Err(AppError::Acquisition(msg)) => assert!(msg.contains("patch failed"), "{msg}"),
        other => panic!("expected acquisition error, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_tool_binary_is_acquisition_failure() {
    use craftplane::driver::artifact::run_java_step;

    let dir = tempfile::tempdir().unwrap();
    let err = run_java_step("/nonexistent/java", &[], dir.path()).await;
    assert!(matches!(err, Err(AppError::Acquisition(_))));
}
