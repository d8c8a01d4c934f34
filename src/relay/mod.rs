//! Byte relay from the transcoder to the client
//!
//! The relay is a pull loop over one fixed buffer: read a chunk, write it,
//! repeat. Each iteration ends in [`Step::Continue`] or
//! [`Step::Stop`] with the reason. Cancellation is checked before every
//! read and raced against both the read and the write, so a stalled source
//! or a stuck client never outlives the session.

pub mod sink;

use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

pub use sink::{body_channel, BodySink, RelayBody};

/// Size of the relay buffer, and so the largest chunk sent to the client
pub const RELAY_BUFFER_SIZE: usize = 32 * 1024;

/// Why a relay session ended
#[derive(Debug)]
pub enum RelayOutcome {
    /// Cancellation was signalled, normally because the client went away
    ClientClosed,
    /// The source reached end of stream
    SourceExhausted,
    /// Reading from the source failed
    ReadError(io::Error),
    /// Writing to the client failed
    WriteError(io::Error),
}

impl RelayOutcome {
    /// Label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            RelayOutcome::ClientClosed => "client_closed",
            RelayOutcome::SourceExhausted => "source_exhausted",
            RelayOutcome::ReadError(_) => "read_error",
            RelayOutcome::WriteError(_) => "write_error",
        }
    }

    /// Whether the session ended without an I/O error
    pub fn is_clean(&self) -> bool {
        matches!(
            self,
            RelayOutcome::ClientClosed | RelayOutcome::SourceExhausted
        )
    }
}

impl fmt::Display for RelayOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayOutcome::ReadError(e) => write!(f, "read error: {}", e),
            RelayOutcome::WriteError(e) => write!(f, "write error: {}", e),
            other => f.write_str(other.label()),
        }
    }
}

/// Result of a single read
#[derive(Debug)]
pub enum Pulled {
    /// `n` bytes are waiting in the buffer
    Data(usize),
    Stop(RelayOutcome),
}

/// Result of one read-then-write iteration
#[derive(Debug)]
pub enum Step {
    Continue,
    Stop(RelayOutcome),
}

/// State of one relay loop
pub struct RelaySession {
    buf: Box<[u8]>,
    bytes: u64,
    chunks: u64,
    idle_reads: u64,
}

impl RelaySession {
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; RELAY_BUFFER_SIZE].into_boxed_slice(),
            bytes: 0,
            chunks: 0,
            idle_reads: 0,
        }
    }

    /// Bytes successfully written to the sink
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes
    }

    /// Chunks successfully written to the sink
    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    /// Reads that produced nothing and were retried
    pub fn idle_reads(&self) -> u64 {
        self.idle_reads
    }

    /// Read the next chunk into the buffer.
    ///
    /// Interrupted or would-block reads carry no data and no end of stream;
    /// they are retried.
    pub async fn pull<R>(&mut self, source: &mut R, cancel: &CancellationToken) -> Pulled
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        loop {
            if cancel.is_cancelled() {
                return Pulled::Stop(RelayOutcome::ClientClosed);
            }

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Pulled::Stop(RelayOutcome::ClientClosed),
                read = source.read(&mut self.buf) => read,
            };

            match read {
                Ok(0) => return Pulled::Stop(RelayOutcome::SourceExhausted),
                Ok(n) => return Pulled::Data(n),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) =>
                {
                    self.idle_reads += 1;
                }
                Err(e) => return Pulled::Stop(RelayOutcome::ReadError(e)),
            }
        }
    }

    /// Write the first `len` buffered bytes to `sink` and flush. Failed
    /// writes are not retried.
    pub async fn push<W>(&mut self, len: usize, sink: &mut W, cancel: &CancellationToken) -> Step
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let chunk = &self.buf[..len];
        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Step::Stop(RelayOutcome::ClientClosed),
            written = async {
                sink.write_all(chunk).await?;
                sink.flush().await
            } => written,
        };

        match written {
            Ok(()) => {
                self.bytes += len as u64;
                self.chunks += 1;
                Step::Continue
            }
            // A write that fails because the client is gone is a disconnect.
            Err(_) if cancel.is_cancelled() => Step::Stop(RelayOutcome::ClientClosed),
            Err(e) => Step::Stop(RelayOutcome::WriteError(e)),
        }
    }

    /// One iteration of the loop
    pub async fn step<R, W>(
        &mut self,
        source: &mut R,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Step
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        match self.pull(source, cancel).await {
            Pulled::Data(n) => self.push(n, sink, cancel).await,
            Pulled::Stop(outcome) => Step::Stop(outcome),
        }
    }

    /// Run until the source ends, an I/O error occurs or `cancel` fires
    pub async fn run<R, W>(
        &mut self,
        source: &mut R,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> RelayOutcome
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        loop {
            if let Step::Stop(outcome) = self.step(source, sink, cancel).await {
                return outcome;
            }
        }
    }
}

impl Default for RelaySession {
    fn default() -> Self {
        Self::new()
    }
}
