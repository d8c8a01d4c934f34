//! Test fixtures for integration tests
//!
//! Stands in for ffmpeg with small `sh -c` scripts. The script receives the
//! transcoder flags as positional parameters, so `$src` below is whatever
//! followed `-i`.

use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

use crate::config::{ServerConfig, TranscoderConfig};
use crate::http::create_router;
use crate::state::AppState;

const FIND_SOURCE: &str =
    r#"src=""; while [ $# -gt 0 ]; do if [ "$1" = "-i" ]; then src="$2"; fi; shift; done; "#;

/// Copies the source file to stdout, failing like ffmpeg when it is missing
pub const CAT_SOURCE: &str = r#"exec cat "$src""#;

/// Never stops producing output
pub const ENDLESS: &str = "exec yes transcoded";

/// Prefix `script` so the transcoder first writes its pid to `pidfile`.
/// Scripts that `exec` keep the same pid.
pub fn recording_pid(pidfile: &Path, script: &str) -> String {
    format!("echo $$ > '{}'; {}", pidfile.display(), script)
}

/// Pid written by a script built with [`recording_pid`]
pub fn recorded_pid(pidfile: &Path) -> u32 {
    std::fs::read_to_string(pidfile)
        .unwrap()
        .trim()
        .parse()
        .unwrap()
}

/// Transcoder config running `script` through `sh -c`
pub fn fake_transcoder(script: &str) -> TranscoderConfig {
    TranscoderConfig {
        program: "sh".to_string(),
        global_args: vec![
            "-c".to_string(),
            format!("{}{}", FIND_SOURCE, script),
            "transcoder".to_string(),
        ],
        exit_grace_ms: 500,
        reap_timeout_ms: 2000,
        ..Default::default()
    }
}

/// Server config bound to an ephemeral local port
pub fn test_config(script: &str) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        transcoder: fake_transcoder(script),
        ..Default::default()
    }
}

/// Start the full router on an ephemeral port
pub async fn spawn_server(config: ServerConfig) -> (String, Arc<AppState>) {
    let state = Arc::new(AppState::new(config));
    let app = create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), state)
}

/// A temp file holding `len` bytes of patterned content
pub fn media_file(len: usize) -> (NamedTempFile, Vec<u8>) {
    let content: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&content).unwrap();
    file.flush().unwrap();
    (file, content)
}

/// True while `pid` exists and is not a zombie
pub fn process_alive(pid: u32) -> bool {
    let stat = match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat,
        Err(_) => return false,
    };
    // Format: pid (comm) state ...; comm may itself contain parentheses.
    match stat.rfind(')') {
        Some(end) => !matches!(stat[end + 1..].trim_start().chars().next(), Some('Z') | None),
        None => false,
    }
}

/// Poll until `pid` is gone; false if it outlives `timeout`
pub async fn wait_until_gone(pid: u32, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while process_alive(pid) {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    true
}

/// Poll until no session is registered; false on timeout
pub async fn wait_for_idle(state: &AppState, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while !state.active_sessions().is_empty() || state.limiter.in_use() > 0 {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    true
}

/// Poll until a session is registered and return its transcoder pid
pub async fn wait_for_session(state: &AppState, timeout: Duration) -> Option<u32> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(session) = state.active_sessions().first() {
            return Some(session.pid);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
