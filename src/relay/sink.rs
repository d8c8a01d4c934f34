//! Client-facing sink
//!
//! The relay writes into a [`BodySink`]; the HTTP response streams a
//! [`RelayBody`]. They are joined by a channel with room for a single chunk,
//! so a slow client stalls the relay instead of growing a queue. Dropping
//! the body (the connection went away) cancels the session token.

use bytes::Bytes;
use futures::Stream;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard, PollSender};

/// Create a connected sink/body pair. The body cancels `cancel` when dropped.
pub fn body_channel(cancel: &CancellationToken) -> (BodySink, RelayBody) {
    let (tx, rx) = mpsc::channel(1);
    let sink = BodySink {
        tx: PollSender::new(tx),
    };
    let body = RelayBody {
        rx,
        _cancel_on_drop: cancel.clone().drop_guard(),
    };
    (sink, body)
}

fn client_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected")
}

/// Write half: each write becomes exactly one body chunk
pub struct BodySink {
    tx: PollSender<Bytes>,
}

impl AsyncWrite for BodySink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        ready!(self.tx.poll_reserve(cx)).map_err(|_| client_gone())?;
        self.tx
            .send_item(Bytes::copy_from_slice(buf))
            .map_err(|_| client_gone())?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.tx.close();
        Poll::Ready(Ok(()))
    }
}

/// Read half, used as the streaming response body
pub struct RelayBody {
    rx: mpsc::Receiver<Bytes>,
    _cancel_on_drop: DropGuard,
}

impl Stream for RelayBody {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|chunk| chunk.map(Ok))
    }
}
