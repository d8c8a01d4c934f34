//! Configuration file support
//!
//! Loads server configuration from TOML files.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{ServerConfig, StreamConfig, TranscoderConfig};

/// Configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Server settings
    pub server: ServerSettings,
    /// Stream endpoint settings
    pub stream: Option<StreamSettings>,
    /// Transcoder settings
    pub transcoder: Option<TranscoderSettings>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
    /// Limits settings
    pub limits: Option<LimitsSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Enable CORS
    pub cors_enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Source used when the request has no `path` parameter
    pub default_source: Option<String>,
    /// Content-Type of the relayed stream
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderSettings {
    /// Transcoder executable
    pub program: Option<String>,
    /// Arguments placed before the input/output flags
    pub global_args: Option<Vec<String>>,
    pub container: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub movflags: Option<String>,
    pub fflags: Option<String>,
    /// Grace period for a natural exit once output is closed, in ms
    pub exit_grace_ms: Option<u64>,
    /// Bound on the reap wait after kill, in ms
    pub reap_timeout_ms: Option<u64>,
    /// Stderr lines kept for diagnostics
    pub stderr_tail_lines: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSettings {
    /// Maximum concurrent relay sessions, 0 disables the limit
    pub max_concurrent_streams: Option<usize>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ConfigFile = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Generate default configuration file
    pub fn default_config() -> Self {
        let transcoder = TranscoderConfig::default();
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 8080,
                cors_enabled: Some(true),
            },
            stream: Some(StreamSettings {
                default_source: Some("test2.mkv".to_string()),
                content_type: Some("video/mp4".to_string()),
            }),
            transcoder: Some(TranscoderSettings {
                program: Some(transcoder.program),
                global_args: Some(transcoder.global_args),
                container: Some(transcoder.container),
                video_codec: Some(transcoder.video_codec),
                audio_codec: Some(transcoder.audio_codec),
                movflags: Some(transcoder.movflags),
                fflags: Some(transcoder.fflags),
                exit_grace_ms: Some(transcoder.exit_grace_ms),
                reap_timeout_ms: Some(transcoder.reap_timeout_ms),
                stderr_tail_lines: Some(transcoder.stderr_tail_lines),
            }),
            logging: Some(LoggingSettings {
                level: "info".to_string(),
                format: Some("pretty".to_string()),
            }),
            limits: Some(LimitsSettings {
                max_concurrent_streams: Some(32),
            }),
        }
    }

    /// Convert to ServerConfig, filling gaps with defaults
    pub fn into_server_config(self) -> ServerConfig {
        let defaults = ServerConfig::default();

        let stream = match self.stream {
            Some(s) => StreamConfig {
                default_source: s.default_source.unwrap_or(defaults.stream.default_source),
                content_type: s.content_type.unwrap_or(defaults.stream.content_type),
            },
            None => defaults.stream,
        };

        let transcoder = match self.transcoder {
            Some(t) => {
                let d = defaults.transcoder;
                TranscoderConfig {
                    program: t.program.unwrap_or(d.program),
                    global_args: t.global_args.unwrap_or(d.global_args),
                    container: t.container.unwrap_or(d.container),
                    video_codec: t.video_codec.unwrap_or(d.video_codec),
                    audio_codec: t.audio_codec.unwrap_or(d.audio_codec),
                    movflags: t.movflags.unwrap_or(d.movflags),
                    fflags: t.fflags.unwrap_or(d.fflags),
                    output: d.output,
                    exit_grace_ms: t.exit_grace_ms.unwrap_or(d.exit_grace_ms),
                    reap_timeout_ms: t.reap_timeout_ms.unwrap_or(d.reap_timeout_ms),
                    stderr_tail_lines: t.stderr_tail_lines.unwrap_or(d.stderr_tail_lines),
                }
            }
            None => defaults.transcoder,
        };

        let max_concurrent_streams = match self.limits.and_then(|l| l.max_concurrent_streams) {
            Some(0) => None,
            Some(n) => Some(n),
            None => defaults.max_concurrent_streams,
        };

        let (log_level, log_format) = match self.logging {
            Some(l) => (l.level, l.format.unwrap_or(defaults.log_format)),
            None => (defaults.log_level, defaults.log_format),
        };

        ServerConfig {
            host: self.server.host,
            port: self.server.port,
            cors_enabled: self.server.cors_enabled.unwrap_or(true),
            log_level,
            log_format,
            max_concurrent_streams,
            stream,
            transcoder,
        }
    }
}

/// Generate default configuration file at the specified path
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigFile::default_config();
    config.to_file(path)?;
    Ok(())
}

/// Load the server configuration from `path`; a missing file yields the
/// defaults.
pub fn load_config(path: &str) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        return Ok(ServerConfig::default());
    }
    Ok(ConfigFile::from_file(path)?.into_server_config())
}
