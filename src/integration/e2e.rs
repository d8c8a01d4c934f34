//! End-to-end tests against a live server on an ephemeral port

use std::time::Duration;

use tempfile::NamedTempFile;

use crate::integration::support::{
    media_file, recorded_pid, recording_pid, spawn_server, test_config, wait_for_idle,
    wait_for_session, CAT_SOURCE, ENDLESS,
};
#[cfg(target_os = "linux")]
use crate::integration::support::{process_alive, wait_until_gone};

const SETTLE: Duration = Duration::from_secs(10);

/// Assert the transcoder that wrote `pidfile` no longer exists
async fn assert_transcoder_gone(pidfile: &NamedTempFile) {
    let pid = recorded_pid(pidfile.path());
    assert!(pid > 0);
    #[cfg(target_os = "linux")]
    assert!(wait_until_gone(pid, SETTLE).await, "transcoder {} survived", pid);
}

#[tokio::test]
async fn test_health() {
    let (base, _state) = spawn_server(test_config(CAT_SOURCE)).await;

    let response = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(response.status(), 200);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json, serde_json::json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_stream_delivers_every_byte() {
    let pidfile = NamedTempFile::new().unwrap();
    let script = recording_pid(pidfile.path(), CAT_SOURCE);
    let (base, state) = spawn_server(test_config(&script)).await;
    // Not a multiple of the relay buffer, so the last chunk is short.
    let (file, content) = media_file(3 * 32 * 1024 + 4321);
    let path = file.path().to_str().unwrap().to_string();

    let response = reqwest::Client::new()
        .get(format!("{}/stream", base))
        .query(&[("path", path.as_str())])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "video/mp4");
    assert_eq!(headers["cache-control"], "no-cache");
    assert_eq!(headers["access-control-allow-origin"], "*");

    let body = response.bytes().await.unwrap();
    assert_eq!(body.len(), content.len());
    assert_eq!(&body[..], &content[..]);

    assert!(wait_for_idle(&state, SETTLE).await);
    assert_eq!(state.metrics.sessions_started(), 1);
    assert_eq!(state.metrics.sessions_finished(), 1);
    assert_eq!(state.metrics.active_sessions(), 0);
    assert_eq!(state.metrics.bytes_relayed(), content.len() as u64);
    assert!(state
        .metrics
        .export_prometheus()
        .contains("relay_outcomes_total{reason=\"source_exhausted\"} 1"));
    assert_transcoder_gone(&pidfile).await;
}

#[tokio::test]
async fn test_default_source_when_path_missing() {
    let (file, content) = media_file(1000);
    let mut config = test_config(CAT_SOURCE);
    config.stream.default_source = file.path().to_str().unwrap().to_string();
    let (base, _state) = spawn_server(config).await;

    let body = reqwest::get(format!("{}/stream", base))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(&body[..], &content[..]);
}

#[tokio::test]
async fn test_missing_source_is_bad_gateway() {
    let pidfile = NamedTempFile::new().unwrap();
    let script = recording_pid(pidfile.path(), CAT_SOURCE);
    let (base, state) = spawn_server(test_config(&script)).await;

    let response = reqwest::Client::new()
        .get(format!("{}/stream", base))
        .query(&[("path", "/nonexistent/movie.mkv")])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
    let json: serde_json::Value = response.json().await.unwrap();
    assert!(json["error"]
        .as_str()
        .unwrap()
        .starts_with("Transcoder exited with"));
    assert!(json["detail"]
        .as_str()
        .unwrap()
        .contains("No such file or directory"));

    // The error is only sent once the process has been reaped.
    assert!(state.active_sessions().is_empty());
    assert_eq!(state.limiter.in_use(), 0);
    assert_eq!(state.metrics.sessions_finished(), 1);
    assert!(state
        .metrics
        .export_prometheus()
        .contains("relay_process_failures_total 1"));
    assert_transcoder_gone(&pidfile).await;
}

#[tokio::test]
async fn test_clean_exit_without_output_is_empty_stream() {
    let (base, state) = spawn_server(test_config("exit 0")).await;

    let response = reqwest::get(format!("{}/stream?path=movie.mkv", base))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.bytes().await.unwrap().is_empty());
    assert!(wait_for_idle(&state, SETTLE).await);
}

#[tokio::test]
async fn test_failure_after_output_closes_stream() {
    let pidfile = NamedTempFile::new().unwrap();
    let script = recording_pid(pidfile.path(), "printf partial; exit 1");
    let (base, state) = spawn_server(test_config(&script)).await;

    let response = reqwest::get(format!("{}/stream?path=movie.mkv", base))
        .await
        .unwrap();
    // Headers were already committed, so the client just sees the stream end.
    assert_eq!(response.status(), 200);
    assert_eq!(&response.bytes().await.unwrap()[..], b"partial");

    assert!(wait_for_idle(&state, SETTLE).await);
    assert!(state
        .metrics
        .export_prometheus()
        .contains("relay_process_failures_total 1"));
    assert_transcoder_gone(&pidfile).await;
}

#[tokio::test]
async fn test_non_utf8_stderr_does_not_break_stream() {
    // Metadata dumps often carry Latin-1; stderr keeps being read after it.
    let script = concat!(
        r"printf 'Title: caf\351\n' >&2; sleep 0.3; ",
        "echo 'Stream mapping:' >&2; printf payload"
    );
    let (base, state) = spawn_server(test_config(script)).await;

    let response = reqwest::get(format!("{}/stream?path=movie.mkv", base))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(&response.bytes().await.unwrap()[..], b"payload");

    assert!(wait_for_idle(&state, SETTLE).await);
    assert!(state
        .metrics
        .export_prometheus()
        .contains("relay_process_failures_total 0"));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_client_disconnect_kills_transcoder() {
    let (base, state) = spawn_server(test_config(ENDLESS)).await;

    let client = reqwest::Client::new();
    let mut response = client
        .get(format!("{}/stream?path=movie.mkv", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.chunk().await.unwrap().is_some());

    let pid = wait_for_session(&state, SETTLE).await.unwrap();
    assert!(process_alive(pid));

    drop(response);
    drop(client);

    assert!(wait_until_gone(pid, SETTLE).await, "transcoder {} survived", pid);
    assert!(wait_for_idle(&state, SETTLE).await);
    assert_eq!(state.metrics.sessions_started(), state.metrics.sessions_finished());
}

#[tokio::test]
async fn test_capacity_limit() {
    let mut config = test_config(ENDLESS);
    config.max_concurrent_streams = Some(1);
    let (base, state) = spawn_server(config).await;
    let url = format!("{}/stream?path=movie.mkv", base);

    let client = reqwest::Client::new();
    let mut first = client.get(&url).send().await.unwrap();
    assert_eq!(first.status(), 200);
    assert!(first.chunk().await.unwrap().is_some());

    let second = reqwest::get(&url).await.unwrap();
    assert_eq!(second.status(), 503);
    let json: serde_json::Value = second.json().await.unwrap();
    assert_eq!(json["error"], "stream limit reached (1 active)");

    drop(first);
    drop(client);
    assert!(wait_for_idle(&state, SETTLE).await);

    let mut third = reqwest::get(&url).await.unwrap();
    assert_eq!(third.status(), 200);
    assert!(third.chunk().await.unwrap().is_some());
}

#[tokio::test]
async fn test_concurrent_sessions_are_independent() {
    let (base, state) = spawn_server(test_config(ENDLESS)).await;
    let url = format!("{}/stream?path=movie.mkv", base);

    let mut a = reqwest::get(&url).await.unwrap();
    let mut b = reqwest::get(&url).await.unwrap();
    assert!(a.chunk().await.unwrap().is_some());
    assert!(b.chunk().await.unwrap().is_some());

    let sessions = state.active_sessions();
    assert_eq!(sessions.len(), 2);
    assert_ne!(sessions[0].pid, sessions[1].pid);

    drop(a);
    // The other session keeps streaming.
    for _ in 0..4 {
        assert!(b.chunk().await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_shutdown_ends_active_streams() {
    let (base, state) = spawn_server(test_config(ENDLESS)).await;

    let mut response = reqwest::get(format!("{}/stream?path=movie.mkv", base))
        .await
        .unwrap();
    assert!(response.chunk().await.unwrap().is_some());
    let pid = wait_for_session(&state, SETTLE).await.unwrap();

    state.shutdown.cancel();

    // The body ends instead of hanging.
    let rest = tokio::time::timeout(SETTLE, async {
        while let Ok(Some(_)) = response.chunk().await {}
    })
    .await;
    assert!(rest.is_ok());

    assert!(wait_for_idle(&state, SETTLE).await);
    #[cfg(target_os = "linux")]
    assert!(wait_until_gone(pid, SETTLE).await);
    let _ = pid;
}

#[tokio::test]
async fn test_debug_sessions_lists_live_stream() {
    let (base, state) = spawn_server(test_config(ENDLESS)).await;

    let mut response = reqwest::get(format!("{}/stream?path=clip.mkv", base))
        .await
        .unwrap();
    assert!(response.chunk().await.unwrap().is_some());
    let pid = wait_for_session(&state, SETTLE).await.unwrap();

    let json: serde_json::Value = reqwest::get(format!("{}/debug/sessions", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["count"], 1);
    assert_eq!(json["sessions"][0]["source"], "clip.mkv");
    assert_eq!(json["sessions"][0]["pid"], pid);
}
