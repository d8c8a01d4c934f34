//! Relay sessions
//!
//! A session is one request end to end: start a transcoder, pull the first
//! chunk before any response header is committed, then relay the rest on a
//! background task. Whatever ends the relay, the process guard is shut
//! down exactly once afterwards.

use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdout;
use tokio_util::sync::CancellationToken;

use crate::error::StreamError;
use crate::limits::StreamPermit;
use crate::relay::{body_channel, BodySink, Pulled, RelayBody, RelayOutcome, RelaySession, Step};
use crate::state::{AppState, SessionEntry};
use crate::transcode::{ProcessExit, ProcessGuard, Shutdown, StreamRequest};

/// What the client gets once a session is open
pub enum StreamBody {
    /// Live relay of the transcoder output
    Relay(RelayBody),
    /// The transcoder finished cleanly without producing anything
    Empty,
}

/// Bookkeeping that must be released however the session ends
struct SessionTicket {
    state: Arc<AppState>,
    entry: SessionEntry,
    _permit: StreamPermit,
}

impl Drop for SessionTicket {
    fn drop(&mut self) {
        self.state.metrics.record_finished();
    }
}

/// A session past its first chunk. Field order matters: the guard drops
/// (and kills) before the ticket releases the stream slot.
struct Running {
    guard: ProcessGuard,
    stdout: ChildStdout,
    relay: RelaySession,
    sink: BodySink,
    cancel: CancellationToken,
    first_chunk: usize,
    ticket: SessionTicket,
}

/// Cleanup mode for a finished relay loop: a source that ran dry gets the
/// chance to exit on its own, anything else is killed.
fn shutdown_mode(outcome: &RelayOutcome) -> Shutdown {
    match outcome {
        RelayOutcome::SourceExhausted => Shutdown::Drain,
        _ => Shutdown::Kill,
    }
}

/// Open a relay session for `request`.
///
/// Errors are only returned while nothing has been sent to the client yet.
pub async fn open(state: Arc<AppState>, request: StreamRequest) -> Result<StreamBody, StreamError> {
    let permit = state.limiter.try_acquire().ok_or(StreamError::AtCapacity {
        limit: state.limiter.limit().unwrap_or_default(),
    })?;

    let handle = state.launcher.launch(&request)?;
    state.metrics.record_started();

    let entry = state.register_session(request.source(), handle.pid());
    let ticket = SessionTicket {
        state: Arc::clone(&state),
        entry,
        _permit: permit,
    };
    let (mut stdout, mut guard) = handle.into_parts();
    let cancel = state.session_token();
    let mut relay = RelaySession::new();

    tracing::info!(
        session = %ticket.entry.id(),
        pid = guard.pid(),
        source = request.source(),
        "relay session started"
    );

    let first = relay.pull(&mut stdout, &cancel).await;
    match first {
        Pulled::Data(first_chunk) => {
            let (sink, body) = body_channel(&cancel);
            tokio::spawn(relay_to_client(Running {
                guard,
                stdout,
                relay,
                sink,
                cancel,
                first_chunk,
                ticket,
            }));
            Ok(StreamBody::Relay(body))
        }
        Pulled::Stop(outcome) => {
            drop(stdout);
            let exit = guard.shutdown(shutdown_mode(&outcome)).await;
            let detail = guard.diagnostics().await;
            report(&ticket, &guard, &relay, &outcome, exit, &detail);

            match (outcome, exit) {
                (RelayOutcome::ReadError(e), _) => Err(StreamError::Read(e)),
                (_, Some(ProcessExit::Exited(status))) if !status.success() => {
                    Err(StreamError::ProcessExit { status, detail })
                }
                _ => Ok(StreamBody::Empty),
            }
        }
    }
}

async fn relay_to_client(mut session: Running) {
    let outcome = match session
        .relay
        .push(session.first_chunk, &mut session.sink, &session.cancel)
        .await
    {
        Step::Continue => {
            session
                .relay
                .run(&mut session.stdout, &mut session.sink, &session.cancel)
                .await
        }
        Step::Stop(outcome) => outcome,
    };

    // End the response before waiting on the process.
    let _ = session.sink.shutdown().await;

    let exit = session.guard.shutdown(shutdown_mode(&outcome)).await;
    let detail = match exit {
        Some(exit) if exit.is_failure() => session.guard.diagnostics().await,
        _ => String::new(),
    };
    report(
        &session.ticket,
        &session.guard,
        &session.relay,
        &outcome,
        exit,
        &detail,
    );
}

fn report(
    ticket: &SessionTicket,
    guard: &ProcessGuard,
    relay: &RelaySession,
    outcome: &RelayOutcome,
    exit: Option<ProcessExit>,
    detail: &str,
) {
    let bytes = relay.bytes_transferred();
    let metrics = &ticket.state.metrics;
    metrics.record_outcome(outcome.label(), bytes);

    let session = ticket.entry.id();
    let pid = guard.pid();
    let source = guard.source();
    let failed = exit.is_some_and(|e| e.is_failure());
    let exit = exit.map(|e| e.to_string()).unwrap_or_default();

    if failed {
        metrics.record_process_failure();
        tracing::warn!(
            %session, pid, source, bytes, reason = outcome.label(), exit = %exit, stderr = detail,
            "transcoder failed"
        );
    }

    if outcome.is_clean() {
        tracing::info!(
            %session, pid, source, bytes,
            chunks = relay.chunks(),
            idle_reads = relay.idle_reads(),
            reason = outcome.label(),
            exit = %exit,
            "relay session ended"
        );
    } else {
        tracing::warn!(
            %session, pid, source, bytes,
            chunks = relay.chunks(),
            reason = outcome.label(),
            exit = %exit,
            "relay session ended: {}", outcome
        );
    }
}
