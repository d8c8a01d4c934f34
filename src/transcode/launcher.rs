//! Transcoder process launcher
//!
//! Builds the argument list for one transcoder invocation and starts it with
//! stdout piped back to us. The source is always handed over as a single
//! argv entry, never through a shell.

use std::ffi::OsString;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::config::TranscoderConfig;
use crate::error::LaunchError;
use crate::transcode::guard::ProcessGuard;
use crate::transcode::stderr::StderrTail;

/// Output container and codec parameters passed to the transcoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    pub container: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub movflags: String,
    pub fflags: String,
    pub output: String,
}

impl OutputFormat {
    pub fn from_config(config: &TranscoderConfig) -> Self {
        Self {
            container: config.container.clone(),
            video_codec: config.video_codec.clone(),
            audio_codec: config.audio_codec.clone(),
            movflags: config.movflags.clone(),
            fflags: config.fflags.clone(),
            output: config.output.clone(),
        }
    }

    fn push_args(&self, args: &mut Vec<OsString>) {
        let mut flag = |name: &str, value: &str| {
            if !value.is_empty() {
                args.push(name.into());
                args.push(value.into());
            }
        };
        flag("-c:v", &self.video_codec);
        flag("-c:a", &self.audio_codec);
        flag("-f", &self.container);
        flag("-movflags", &self.movflags);
        flag("-fflags", &self.fflags);
        args.push(self.output.as_str().into());
    }
}

/// One request for a transcoded stream
#[derive(Debug, Clone)]
pub struct StreamRequest {
    source: String,
    output: OutputFormat,
}

impl StreamRequest {
    pub fn new(source: impl Into<String>, output: OutputFormat) -> Result<Self, LaunchError> {
        let source = source.into();
        if source.is_empty() {
            return Err(LaunchError::EmptySource);
        }
        Ok(Self { source, output })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn output(&self) -> &OutputFormat {
        &self.output
    }
}

/// Starts transcoder processes
#[derive(Debug, Clone)]
pub struct Launcher {
    program: String,
    global_args: Vec<String>,
    output: OutputFormat,
    stderr_tail_lines: usize,
    exit_grace: Duration,
    reap_timeout: Duration,
}

impl Launcher {
    pub fn new(config: &TranscoderConfig) -> Self {
        Self {
            program: config.program.clone(),
            global_args: config.global_args.clone(),
            output: OutputFormat::from_config(config),
            stderr_tail_lines: config.stderr_tail_lines,
            exit_grace: config.exit_grace(),
            reap_timeout: config.reap_timeout(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Build a request for `source` using the configured output format
    pub fn request(&self, source: impl Into<String>) -> Result<StreamRequest, LaunchError> {
        StreamRequest::new(source, self.output.clone())
    }

    /// Full argument list for `request`, program name excluded
    pub fn args(&self, request: &StreamRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.global_args.iter().map(OsString::from).collect();
        args.push("-i".into());
        args.push(request.source().into());
        request.output().push_args(&mut args);
        args
    }

    /// Start one transcoder for `request`.
    ///
    /// On error nothing is left running: a process that started but whose
    /// pipe could not be taken is killed when its handle drops.
    pub fn launch(&self, request: &StreamRequest) -> Result<ProcessHandle, LaunchError> {
        let mut child = Command::new(&self.program)
            .args(self.args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let pid = child.id().unwrap_or_default();
        let stdout = child.stdout.take().ok_or(LaunchError::MissingPipe)?;

        let stderr = StderrTail::new(self.stderr_tail_lines);
        let stderr_task = child.stderr.take().map(|pipe| stderr.capture(pipe, pid));

        tracing::debug!(pid, source = request.source(), "transcoder started");

        Ok(ProcessHandle {
            child,
            stdout,
            pid,
            source: request.source().to_string(),
            stderr,
            stderr_task,
            exit_grace: self.exit_grace,
            reap_timeout: self.reap_timeout,
        })
    }
}

/// A running transcoder: its stdout plus what the guard needs to end it
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    stdout: ChildStdout,
    pid: u32,
    source: String,
    stderr: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
    exit_grace: Duration,
    reap_timeout: Duration,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Split into the output stream and the guard that owns the process
    pub fn into_parts(self) -> (ChildStdout, ProcessGuard) {
        let mut guard = ProcessGuard::new(self.child, self.source, self.stderr)
            .with_exit_grace(self.exit_grace)
            .with_reap_timeout(self.reap_timeout);
        if let Some(task) = self.stderr_task {
            guard = guard.with_stderr_task(task);
        }
        (self.stdout, guard)
    }
}
