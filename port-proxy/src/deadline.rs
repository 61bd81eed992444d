//! Absolute I/O deadlines for tokio streams.
//!
//! A [`Deadline`] is armed once, when the stream is wrapped, and never renewed.
//! After it fires every read or write on the wrapped stream fails with
//! [`std::io::ErrorKind::TimedOut`], including one that is already pending.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Sleep;

pub struct Deadline<S> {
    inner: S,
    expiry: Option<Pin<Box<Sleep>>>,
}

impl<S> Deadline<S> {
    /// Wrap `inner` with a deadline `timeout` from now; zero disables it.
    pub fn new(inner: S, timeout: Duration) -> Self {
        let expiry = (!timeout.is_zero()).then(|| Box::pin(tokio::time::sleep(timeout)));
        Self { inner, expiry }
    }

    pub fn is_armed(&self) -> bool {
        self.expiry.is_some()
    }

    // Polling the timer also registers the waker, so a pending read or write
    // is woken up when the deadline passes.
    fn poll_expired(&mut self, cx: &mut Context<'_>) -> bool {
        match self.expiry.as_mut() {
            Some(sleep) => sleep.as_mut().poll(cx).is_ready(),
            None => false,
        }
    }
}

fn deadline_exceeded() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "i/o deadline exceeded")
}

impl<S: AsyncRead + Unpin> AsyncRead for Deadline<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.poll_expired(cx) {
            return Poll::Ready(Err(deadline_exceeded()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Deadline<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.poll_expired(cx) {
            return Poll::Ready(Err(deadline_exceeded()));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.poll_expired(cx) {
            return Poll::Ready(Err(deadline_exceeded()));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    // Shutdown is always allowed so an expired stream can still be closed.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
