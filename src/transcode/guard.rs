//! Process lifecycle guard
//!
//! Owns one transcoder process and ends it exactly once: kill (unless it
//! already exited), then reap. `shutdown` is the normal path; `Drop` is the
//! backstop for aborted or panicking sessions.

use std::fmt;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tokio::task::JoinHandle;

use crate::transcode::stderr::StderrTail;

const DEFAULT_EXIT_GRACE: Duration = Duration::from_secs(2);
const DEFAULT_REAP_TIMEOUT: Duration = Duration::from_secs(5);
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// How to end the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// The process closed its output; give it the grace period to exit on
    /// its own before killing it.
    Drain,
    /// Kill right away.
    Kill,
}

/// How the process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exited by itself before it was signalled
    Exited(ExitStatus),
    /// Killed by the guard, then reaped
    Killed(ExitStatus),
    /// Killed, but not reaped within the reap timeout. The runtime reaps it
    /// in the background once it finally exits.
    Unreaped,
}

impl ProcessExit {
    /// True when the process exited by itself with a failure status
    pub fn is_failure(&self) -> bool {
        matches!(self, ProcessExit::Exited(status) if !status.success())
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessExit::Exited(status) => write!(f, "exited ({})", status),
            ProcessExit::Killed(status) => write!(f, "killed ({})", status),
            ProcessExit::Unreaped => write!(f, "killed, not reaped"),
        }
    }
}

/// Scoped owner of a transcoder process
#[derive(Debug)]
pub struct ProcessGuard {
    child: Option<Child>,
    pid: u32,
    source: String,
    stderr: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
    exit_grace: Duration,
    reap_timeout: Duration,
}

impl ProcessGuard {
    pub fn new(child: Child, source: impl Into<String>, stderr: StderrTail) -> Self {
        Self {
            pid: child.id().unwrap_or_default(),
            child: Some(child),
            source: source.into(),
            stderr,
            stderr_task: None,
            exit_grace: DEFAULT_EXIT_GRACE,
            reap_timeout: DEFAULT_REAP_TIMEOUT,
        }
    }

    /// Attach the task draining the process's stderr
    pub fn with_stderr_task(mut self, task: JoinHandle<()>) -> Self {
        self.stderr_task = Some(task);
        self
    }

    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }

    pub fn with_reap_timeout(mut self, timeout: Duration) -> Self {
        self.reap_timeout = timeout;
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Recent stderr output. Once the process is gone this first waits
    /// briefly for the drain task to pick up the last lines.
    pub async fn diagnostics(&mut self) -> String {
        if self.child.is_none() {
            if let Some(task) = self.stderr_task.take() {
                let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, task).await;
            }
        }
        self.stderr.summary()
    }

    /// Terminate and reap the process.
    ///
    /// Returns `None` if it was already shut down; the process is never
    /// signalled twice.
    pub async fn shutdown(&mut self, mode: Shutdown) -> Option<ProcessExit> {
        let mut child = self.child.take()?;
        let pid = self.pid;

        match mode {
            Shutdown::Drain => match tokio::time::timeout(self.exit_grace, child.wait()).await {
                Ok(Ok(status)) => return Some(ProcessExit::Exited(status)),
                Ok(Err(e)) => {
                    tracing::warn!(pid, source = %self.source, "waiting for transcoder failed: {}", e)
                }
                Err(_) => tracing::debug!(
                    pid,
                    "transcoder still running {:?} after closing its output",
                    self.exit_grace
                ),
            },
            Shutdown::Kill => match child.try_wait() {
                Ok(Some(status)) => return Some(ProcessExit::Exited(status)),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(pid, "could not poll transcoder status: {}", e)
                }
            },
        }

        if let Err(e) = child.start_kill() {
            // InvalidInput means it has already exited, which is what we want.
            if e.kind() != io::ErrorKind::InvalidInput {
                tracing::warn!(pid, source = %self.source, "failed to kill transcoder: {}", e);
            }
        }

        match tokio::time::timeout(self.reap_timeout, child.wait()).await {
            Ok(Ok(status)) => Some(ProcessExit::Killed(status)),
            Ok(Err(e)) => {
                tracing::error!(pid, source = %self.source, "failed to reap transcoder: {}", e);
                Some(ProcessExit::Unreaped)
            }
            Err(_) => {
                tracing::error!(
                    pid,
                    source = %self.source,
                    "transcoder not reaped {:?} after kill",
                    self.reap_timeout
                );
                Some(ProcessExit::Unreaped)
            }
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            tracing::warn!(
                pid = self.pid,
                source = %self.source,
                "transcoder guard dropped before shutdown, killing"
            );
            let _ = child.start_kill();
            // Dropping the child hands it to the runtime's orphan reaper.
        }
    }
}
