//! Transcoder stderr capture
//!
//! Stderr is drained on its own task so a chatty transcoder can never
//! stall on a full pipe while the relay is busy with stdout.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, FramedRead};

/// Longest stderr line kept; longer ones are dropped
pub const MAX_LINE_LENGTH: usize = 4096;

/// Splits stderr into lines on `\r` (ffmpeg progress reports) and `\n`.
///
/// An overlong line is skipped up to its delimiter instead of failing the
/// stream, because a framed reader stops for good after any decode error.
struct StderrLines {
    inner: AnyDelimiterCodec,
}

impl StderrLines {
    fn new() -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(
                b"\r\n".to_vec(),
                Vec::new(),
                MAX_LINE_LENGTH,
            ),
        }
    }

    fn skip_overlong(
        result: Result<Option<Bytes>, AnyDelimiterCodecError>,
    ) -> Result<Option<Option<Bytes>>, io::Error> {
        match result {
            Ok(line) => Ok(Some(line)),
            Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => {
                tracing::debug!("dropped stderr line over {} bytes", MAX_LINE_LENGTH);
                Ok(None)
            }
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
        }
    }
}

impl Decoder for StderrLines {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        // After an overlong line the inner codec discards up to the next
        // delimiter, so decoding again makes progress.
        loop {
            if let Some(line) = Self::skip_overlong(self.inner.decode(buf))? {
                return Ok(line);
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        loop {
            if let Some(line) = Self::skip_overlong(self.inner.decode_eof(buf))? {
                return Ok(line);
            }
        }
    }
}

/// Bounded tail of the most recent stderr lines
#[derive(Debug, Clone)]
pub struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    fn push(&self, line: String) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Retained lines, oldest first
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    /// Retained lines joined into one diagnostic string
    pub fn summary(&self) -> String {
        self.lines().join("\n")
    }

    /// Spawn a task that forwards `stderr` to tracing and keeps the tail.
    ///
    /// The pipe is read until the process closes it. Bytes that are not
    /// UTF-8 and overlong lines never stop the drain, since a closed read
    /// end would fail the transcoder's next write with EPIPE.
    pub fn capture<R>(&self, stderr: R, pid: u32) -> tokio::task::JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let tail = self.clone();
        tokio::spawn(async move {
            let mut lines = FramedRead::new(stderr, StderrLines::new());
            loop {
                match lines.next().await {
                    Some(Ok(line)) => {
                        let line = String::from_utf8_lossy(&line);
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        tracing::debug!(pid, "transcoder: {}", line);
                        tail.push(line.to_string());
                    }
                    Some(Err(e)) => {
                        tracing::debug!(pid, "stopped reading transcoder stderr: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        })
    }
}
