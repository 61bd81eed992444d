//! Per-connection forwarding session.
//!
//! A session dials the forward target, then runs two copy tasks, one per
//! direction. Each task reports exactly once on its own oneshot channel; the
//! coordinator waits on both channels and the cancellation token at the same
//! time, so it notices whichever side finishes first without blocking on the
//! other.
//!
//! Exit policy:
//! - EOF on one direction: keep waiting for the other one.
//! - An I/O error on either direction: fail the session and force-close both sockets.
//! - Cancellation: force-close both sockets and end the session.
//!
//! Forced close aborts both copy tasks, which drops the socket halves they
//! own, and then awaits them, so no copy task outlives its session.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Direction, ForwardError};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Outcome of one copy direction
#[derive(Debug)]
pub struct ForwardResult {
    pub bytes_copied: u64,
    /// `None` means the source reached end-of-stream
    pub error: Option<std::io::Error>,
}

/// How a session that did not fail came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Both directions reached end-of-stream
    Completed,
    /// The enclosing scope was cancelled
    Cancelled,
}

/// Totals reported when a session ends without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub bytes: u64,
    pub end: SessionEnd,
}

/// Relays accepted connections to one forward address
#[derive(Debug, Clone)]
pub struct Forwarder {
    target: String,
    verbose: bool,
}

impl Forwarder {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            verbose: false,
        }
    }

    /// Log traffic totals at info level instead of debug
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Forward one inbound connection, given as its two halves, until both
    /// directions finish, one fails, or `cancel` fires.
    ///
    /// The inbound halves are dropped, and so closed, on every exit path,
    /// including a failed dial.
    pub async fn forward<R, W>(
        &self,
        peer: SocketAddr,
        inbound_read: R,
        inbound_write: W,
        cancel: &CancellationToken,
    ) -> Result<SessionStats, ForwardError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let outbound =
            TcpStream::connect(&self.target)
                .await
                .map_err(|source| ForwardError::Dial {
                    addr: self.target.clone(),
                    source,
                })?;
        let (outbound_read, outbound_write) = outbound.into_split();

        let (mut c2s_rx, c2s_task) = spawn_copy(inbound_read, outbound_write);
        let (mut s2c_rx, s2c_task) = spawn_copy(outbound_read, inbound_write);

        let mut total = 0u64;
        let mut c2s_open = true;
        let mut s2c_open = true;

        let outcome = loop {
            if !c2s_open && !s2c_open {
                break Ok(SessionEnd::Completed);
            }

            tokio::select! {
                _ = cancel.cancelled() => break Ok(SessionEnd::Cancelled),
                reported = &mut c2s_rx, if c2s_open => {
                    c2s_open = false;
                    if let Some(err) = settle(Direction::ClientToServer, reported, &mut total) {
                        break Err(err);
                    }
                }
                reported = &mut s2c_rx, if s2c_open => {
                    s2c_open = false;
                    if let Some(err) = settle(Direction::ServerToClient, reported, &mut total) {
                        break Err(err);
                    }
                }
            }
        };

        // Both tasks may already be done; aborting a finished task is a no-op.
        c2s_task.abort();
        s2c_task.abort();
        let _ = c2s_task.await;
        let _ = s2c_task.await;

        if self.verbose {
            tracing::info!(%peer, target = %self.target, bytes = total, "traffic from '{peer}' to '{}' amount {total}", self.target);
        } else {
            tracing::debug!(%peer, target = %self.target, bytes = total, "session finished");
        }

        outcome.map(|end| SessionStats { bytes: total, end })
    }
}

/// Fold one direction's report into the running total; returns the error
/// that fails the session, if any.
fn settle(
    direction: Direction,
    reported: Result<ForwardResult, oneshot::error::RecvError>,
    total: &mut u64,
) -> Option<ForwardError> {
    match reported {
        Ok(result) => {
            *total += result.bytes_copied;
            result
                .error
                .map(|source| ForwardError::Copy { direction, source })
        }
        Err(_) => Some(ForwardError::Copy {
            direction,
            source: std::io::Error::other("copy task ended without reporting"),
        }),
    }
}

fn spawn_copy<R, W>(src: R, dst: W) -> (oneshot::Receiver<ForwardResult>, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let result = pump(src, dst).await;
        let _ = tx.send(result);
    });
    (rx, task)
}

/// Copy `src` into `dst` until end-of-stream or error, counting bytes written.
async fn pump<R, W>(mut src: R, mut dst: W) -> ForwardResult
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut copied = 0u64;

    loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(error) => {
                return ForwardResult {
                    bytes_copied: copied,
                    error: Some(error),
                };
            }
        };
        if let Err(error) = dst.write_all(&buf[..n]).await {
            return ForwardResult {
                bytes_copied: copied,
                error: Some(error),
            };
        }
        copied += n as u64;
    }

    // Let the peer see end-of-stream; it may already be gone.
    if let Err(error) = dst.shutdown().await {
        tracing::trace!(%error, "shutdown after end-of-stream failed");
    }

    ForwardResult {
        bytes_copied: copied,
        error: None,
    }
}
