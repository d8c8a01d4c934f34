//! Application state management
//!
//! This module defines the AppState structure that holds:
//! - Server configuration and the transcoder launcher
//! - The registry of active relay sessions
//! - Stream limiter and metrics
//! - The root cancellation token, cancelled on shutdown

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::limits::{create_stream_limiter, StreamLimiter};
use crate::metrics::Metrics;
use crate::transcode::Launcher;

/// One active relay session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: Uuid,
    pub source: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// Registry of active sessions
pub type SessionMap = Arc<DashMap<Uuid, SessionInfo>>;

/// Keeps a session listed until dropped
#[derive(Debug)]
pub struct SessionEntry {
    id: Uuid,
    sessions: SessionMap,
}

impl SessionEntry {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for SessionEntry {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
    }
}

/// Application state shared across all handlers
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,

    /// Starts transcoder processes
    pub launcher: Launcher,

    /// Active sessions (session id -> info)
    pub sessions: SessionMap,

    /// Concurrent session cap
    pub limiter: StreamLimiter,

    /// Counters exported on /metrics
    pub metrics: Metrics,

    /// Parent of every session's cancellation token
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create a new AppState with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        Self {
            launcher: Launcher::new(&config.transcoder),
            sessions: Arc::new(DashMap::new()),
            limiter: create_stream_limiter(&config),
            metrics: Metrics::new(),
            shutdown: CancellationToken::new(),
            config,
        }
    }

    /// Create AppState with default configuration
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// List a session until the returned entry is dropped
    pub fn register_session(&self, source: &str, pid: u32) -> SessionEntry {
        let id = Uuid::new_v4();
        self.sessions.insert(
            id,
            SessionInfo {
                id,
                source: source.to_string(),
                pid,
                started_at: Utc::now(),
            },
        );
        SessionEntry {
            id,
            sessions: Arc::clone(&self.sessions),
        }
    }

    /// Snapshot of all active sessions, oldest first
    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<_> = self.sessions.iter().map(|r| r.value().clone()).collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    /// Token for a new session, cancelled when the server shuts down
    pub fn session_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_drop_session() {
        let state = AppState::with_defaults();

        let entry = state.register_session("movie.mkv", 42);
        let sessions = state.active_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, entry.id());
        assert_eq!(sessions[0].source, "movie.mkv");
        assert_eq!(sessions[0].pid, 42);

        drop(entry);
        assert!(state.active_sessions().is_empty());
    }

    #[test]
    fn test_session_token_follows_shutdown() {
        let state = AppState::with_defaults();
        let token = state.session_token();
        assert!(!token.is_cancelled());

        state.shutdown.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_launcher_uses_config() {
        let mut config = ServerConfig::default();
        config.transcoder.program = "/usr/local/bin/ffmpeg".to_string();
        let state = AppState::new(config);
        assert_eq!(state.launcher.program(), "/usr/local/bin/ffmpeg");
    }
}
