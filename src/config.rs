//! Server configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Streaming endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Source used when the request carries no `path` parameter
    pub default_source: String,

    /// Content-Type announced for the relayed stream
    pub content_type: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            default_source: "test2.mkv".to_string(),
            content_type: "video/mp4".to_string(),
        }
    }
}

/// External transcoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    /// Executable to run, looked up in PATH when not absolute
    pub program: String,

    /// Arguments placed before the input/output flags
    pub global_args: Vec<String>,

    /// Output container (`-f`)
    pub container: String,

    /// Video codec (`-c:v`), `copy` for passthrough
    pub video_codec: String,

    /// Audio codec (`-c:a`), `copy` for passthrough
    pub audio_codec: String,

    /// Muxer flags (`-movflags`)
    pub movflags: String,

    /// Format flags (`-fflags`)
    pub fflags: String,

    /// Output target, must be the process's stdout
    pub output: String,

    /// How long to wait for a process that closed its output to exit by itself
    pub exit_grace_ms: u64,

    /// Upper bound on the reap wait after the process was killed
    pub reap_timeout_ms: u64,

    /// Number of stderr lines kept for diagnostics
    pub stderr_tail_lines: usize,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            global_args: Vec::new(),
            container: "mp4".to_string(),
            video_codec: "copy".to_string(),
            audio_codec: "copy".to_string(),
            movflags: "frag_keyframe+empty_moov+default_base_moof".to_string(),
            fflags: "+genpts".to_string(),
            output: "pipe:1".to_string(),
            exit_grace_ms: 2000,
            reap_timeout_ms: 5000,
            stderr_tail_lines: 20,
        }
    }
}

impl TranscoderConfig {
    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }

    pub fn reap_timeout(&self) -> Duration {
        Duration::from_millis(self.reap_timeout_ms)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log output format (pretty, json)
    pub log_format: String,

    /// Maximum number of concurrent relay sessions (one transcoder each)
    pub max_concurrent_streams: Option<usize>,

    /// Streaming endpoint configuration
    pub stream: StreamConfig,

    /// Transcoder configuration
    pub transcoder: TranscoderConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_enabled: true,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            max_concurrent_streams: Some(32),
            stream: StreamConfig::default(),
            transcoder: TranscoderConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether logs should be emitted as JSON
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}
