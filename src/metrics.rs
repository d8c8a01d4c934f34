//! Prometheus-compatible metrics endpoint

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::state::AppState;

/// Metrics collector
#[derive(Debug)]
pub struct Metrics {
    /// Server start time
    start_time: Instant,
    /// Transcoder processes started
    sessions_started: RwLock<u64>,
    /// Sessions whose process was shut down
    sessions_finished: RwLock<u64>,
    /// Sessions currently relaying
    active_sessions: RwLock<u64>,
    /// Bytes delivered to clients
    bytes_relayed: RwLock<u64>,
    /// Finished sessions by termination reason
    outcomes: RwLock<HashMap<String, u64>>,
    /// Transcoders that exited by themselves with a failure status
    process_failures: RwLock<u64>,
    /// Requests rejected before streaming, by error kind
    rejected: RwLock<HashMap<String, u64>>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            sessions_started: RwLock::new(0),
            sessions_finished: RwLock::new(0),
            active_sessions: RwLock::new(0),
            bytes_relayed: RwLock::new(0),
            outcomes: RwLock::new(HashMap::new()),
            process_failures: RwLock::new(0),
            rejected: RwLock::new(HashMap::new()),
        }
    }

    /// Record a started transcoder
    pub fn record_started(&self) {
        *self.sessions_started.write() += 1;
        *self.active_sessions.write() += 1;
    }

    /// Record a reaped transcoder
    pub fn record_finished(&self) {
        *self.sessions_finished.write() += 1;
        let mut active = self.active_sessions.write();
        *active = active.saturating_sub(1);
    }

    /// Record how a relay loop ended and what it delivered
    pub fn record_outcome(&self, outcome: &str, bytes: u64) {
        *self.bytes_relayed.write() += bytes;
        *self
            .outcomes
            .write()
            .entry(outcome.to_string())
            .or_insert(0) += 1;
    }

    /// Record a transcoder failure exit
    pub fn record_process_failure(&self) {
        *self.process_failures.write() += 1;
    }

    /// Record a request that never started streaming
    pub fn record_rejected(&self, kind: &str) {
        *self.rejected.write().entry(kind.to_string()).or_insert(0) += 1;
    }

    pub fn sessions_started(&self) -> u64 {
        *self.sessions_started.read()
    }

    pub fn sessions_finished(&self) -> u64 {
        *self.sessions_finished.read()
    }

    pub fn active_sessions(&self) -> u64 {
        *self.active_sessions.read()
    }

    pub fn bytes_relayed(&self) -> u64 {
        *self.bytes_relayed.read()
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP relay_uptime_seconds Server uptime in seconds\n");
        output.push_str("# TYPE relay_uptime_seconds counter\n");
        output.push_str(&format!("relay_uptime_seconds {}\n", self.uptime_secs()));

        output.push_str("\n# HELP relay_start_time_seconds Server start time as Unix timestamp\n");
        output.push_str("# TYPE relay_start_time_seconds gauge\n");
        output.push_str(&format!(
            "relay_start_time_seconds {}\n",
            std::time::SystemTime::UNIX_EPOCH
                .elapsed()
                .unwrap_or(Duration::ZERO)
                .as_secs()
                .saturating_sub(self.uptime_secs())
        ));

        output.push_str("\n# HELP relay_sessions_started_total Transcoder processes started\n");
        output.push_str("# TYPE relay_sessions_started_total counter\n");
        output.push_str(&format!(
            "relay_sessions_started_total {}\n",
            self.sessions_started()
        ));

        output.push_str("\n# HELP relay_sessions_finished_total Transcoder processes shut down\n");
        output.push_str("# TYPE relay_sessions_finished_total counter\n");
        output.push_str(&format!(
            "relay_sessions_finished_total {}\n",
            self.sessions_finished()
        ));

        output.push_str("\n# HELP relay_active_sessions Sessions currently running\n");
        output.push_str("# TYPE relay_active_sessions gauge\n");
        output.push_str(&format!("relay_active_sessions {}\n", self.active_sessions()));

        output.push_str("\n# HELP relay_bytes_total Bytes delivered to clients\n");
        output.push_str("# TYPE relay_bytes_total counter\n");
        output.push_str(&format!("relay_bytes_total {}\n", self.bytes_relayed()));

        output.push_str("\n# HELP relay_outcomes_total Finished sessions by termination reason\n");
        output.push_str("# TYPE relay_outcomes_total counter\n");
        for (outcome, count) in self.outcomes.read().iter() {
            output.push_str(&format!(
                "relay_outcomes_total{{reason=\"{}\"}} {}\n",
                outcome, count
            ));
        }

        output.push_str("\n# HELP relay_process_failures_total Transcoders that exited with failure\n");
        output.push_str("# TYPE relay_process_failures_total counter\n");
        output.push_str(&format!(
            "relay_process_failures_total {}\n",
            *self.process_failures.read()
        ));

        output.push_str("\n# HELP relay_rejected_total Requests that failed before streaming\n");
        output.push_str("# TYPE relay_rejected_total counter\n");
        for (kind, count) in self.rejected.read().iter() {
            output.push_str(&format!(
                "relay_rejected_total{{kind=\"{}\"}} {}\n",
                kind, count
            ));
        }

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let prometheus_output = state.metrics.export_prometheus();

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        prometheus_output,
    )
        .into_response()
}
