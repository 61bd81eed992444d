//! One listening socket for one `src -> dst` mapping.
//!
//! Lifecycle: `Created -> Bound -> Serving -> Stopped`.
//!
//! - [`ProxyServer::bind`] opens the listener and fails permanently if the
//!   address cannot be bound.
//! - [`ProxyServer::serve`] runs the accept loop and hands every connection to
//!   a detached forwarding session.
//! - [`ProxyServer::close`] may be called at any time, any number of times,
//!   from any task. The release logic runs exactly once. A close is an
//!   expected stop, so `serve` returns `Ok(())` for it.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, Once, OnceLock, PoisonError};

use futures_util::FutureExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::config::Timeouts;
use crate::deadline::Deadline;
use crate::error::ServerError;
use crate::forwarder::Forwarder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    Created = 0,
    Bound = 1,
    Serving = 2,
    Stopped = 3,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServerState::Created,
            1 => ServerState::Bound,
            2 => ServerState::Serving,
            _ => ServerState::Stopped,
        }
    }
}

pub struct ProxyServer {
    listen_addr: String,
    forwarder: Forwarder,
    timeouts: Timeouts,
    /// Parent of every session's cancellation scope
    scope: CancellationToken,
    /// Fired once by `close` to unblock a pending accept
    closed: CancellationToken,
    /// Present between a successful bind and the start of serve (or close)
    listener: Mutex<Option<TcpListener>>,
    local_addr: OnceLock<SocketAddr>,
    state: AtomicU8,
    running: AtomicBool,
    close_once: Once,
}

impl ProxyServer {
    /// `scope` is the cancellation scope this server and its sessions live in.
    pub fn new(
        listen_addr: impl Into<String>,
        forward_addr: impl Into<String>,
        scope: CancellationToken,
    ) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            forwarder: Forwarder::new(forward_addr),
            timeouts: Timeouts::disabled(),
            scope,
            closed: CancellationToken::new(),
            listener: Mutex::new(None),
            local_addr: OnceLock::new(),
            state: AtomicU8::new(ServerState::Created as u8),
            running: AtomicBool::new(false),
            close_once: Once::new(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.forwarder = self.forwarder.with_verbose(verbose);
        self
    }

    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    pub fn forward_addr(&self) -> &str {
        self.forwarder.target()
    }

    /// Address actually bound, once `bind` has succeeded
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// True as soon as a `close` has started, even before it finishes.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Open the listener. Binding a bound or serving server is a no-op; a
    /// closed or stopped server cannot be bound again.
    pub async fn bind(&self) -> Result<(), ServerError> {
        if self.is_closed() {
            return Err(ServerError::Closed {
                addr: self.listen_addr.clone(),
            });
        }
        match self.state() {
            ServerState::Created => {}
            ServerState::Bound | ServerState::Serving => return Ok(()),
            ServerState::Stopped => {
                return Err(ServerError::Closed {
                    addr: self.listen_addr.clone(),
                });
            }
        }

        let listener =
            TcpListener::bind(&self.listen_addr)
                .await
                .map_err(|source| ServerError::Bind {
                    addr: self.listen_addr.clone(),
                    source,
                })?;
        if let Ok(addr) = listener.local_addr() {
            let _ = self.local_addr.set(addr);
        }

        *self.lock_listener() = Some(listener);
        self.state
            .store(ServerState::Bound as u8, Ordering::Release);

        // A close that ran while we were binding found nothing to release.
        if self.is_closed() {
            self.take_listener();
            self.state
                .store(ServerState::Stopped as u8, Ordering::Release);
            return Err(ServerError::Closed {
                addr: self.listen_addr.clone(),
            });
        }

        tracing::debug!(listen = %self.listen_addr, "proxy server bound");
        Ok(())
    }

    /// Run the accept loop until the server is closed or the listener fails.
    ///
    /// A panic anywhere inside is caught here and returned as
    /// [`ServerError::Panicked`].
    pub async fn serve(&self) -> Result<(), ServerError> {
        let result = AssertUnwindSafe(self.serve_inner())
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(ServerError::Panicked {
                    addr: self.listen_addr.clone(),
                    message: panic_message(panic.as_ref()),
                })
            });

        self.running.store(false, Ordering::Release);
        self.state
            .store(ServerState::Stopped as u8, Ordering::Release);

        match &result {
            Ok(()) => tracing::info!(
                listen = %self.listen_addr,
                forward = %self.forward_addr(),
                "proxy serve ended '{}' -> '{}'",
                self.listen_addr,
                self.forward_addr()
            ),
            Err(error) => tracing::error!(
                listen = %self.listen_addr,
                forward = %self.forward_addr(),
                %error,
                "proxy serve ended '{}' -> '{}' with error",
                self.listen_addr,
                self.forward_addr()
            ),
        }
        result
    }

    async fn serve_inner(&self) -> Result<(), ServerError> {
        let Some(listener) = self.take_listener() else {
            return if self.is_closed() {
                Ok(())
            } else {
                Err(ServerError::NotBound {
                    addr: self.listen_addr.clone(),
                })
            };
        };

        // Sessions started by this serve call end when it returns.
        let sessions = self.scope.child_token();
        let _end_sessions = sessions.clone().drop_guard();

        tracing::info!(
            listen = %self.listen_addr,
            forward = %self.forward_addr(),
            "proxy serve started '{}' -> '{}'",
            self.listen_addr,
            self.forward_addr()
        );

        self.state
            .store(ServerState::Serving as u8, Ordering::Release);
        self.running.store(true, Ordering::Release);

        let result = self.accept_loop(&listener, &sessions).await;

        self.running.store(false, Ordering::Release);
        drop(listener);
        result
    }

    async fn accept_loop(
        &self,
        listener: &TcpListener,
        sessions: &CancellationToken,
    ) -> Result<(), ServerError> {
        while self.running.load(Ordering::Acquire) {
            let accepted = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => self.spawn_session(stream, peer, sessions.child_token()),
                Err(source) => {
                    // An accept racing with close is still an expected stop.
                    if self.is_closed() {
                        return Ok(());
                    }
                    return Err(ServerError::Accept {
                        addr: self.listen_addr.clone(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr, cancel: CancellationToken) {
        let forwarder = self.forwarder.clone();
        let timeouts = self.timeouts;
        let listen = self.listen_addr.clone();

        tokio::spawn(async move {
            let (read, write) = stream.into_split();
            let read = Deadline::new(read, timeouts.read);
            let write = Deadline::new(write, timeouts.write);

            let session = AssertUnwindSafe(forwarder.forward(peer, read, write, &cancel));
            match session.catch_unwind().await {
                Ok(Ok(_)) => {}
                Ok(Err(error)) => tracing::warn!(
                    %peer,
                    %listen,
                    forward = %forwarder.target(),
                    %error,
                    "forwarding session failed"
                ),
                Err(panic) => tracing::error!(
                    %peer,
                    %listen,
                    forward = %forwarder.target(),
                    message = %panic_message(panic.as_ref()),
                    "forwarding session panicked"
                ),
            }
        });
    }

    /// Stop the server. Safe to call before bind, during serve, after serve,
    /// repeatedly and concurrently; the listener is released exactly once.
    pub fn close(&self) {
        self.running.store(false, Ordering::Release);

        self.close_once.call_once(|| {
            self.closed.cancel();
            // If serve owns the listener it drops it on the way out.
            if self.take_listener().is_some() {
                tracing::debug!(listen = %self.listen_addr, "listener released by close");
            }
            let _ = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                match ServerState::from_u8(state) {
                    ServerState::Created | ServerState::Bound => {
                        Some(ServerState::Stopped as u8)
                    }
                    _ => None,
                }
            });
        });
    }

    fn lock_listener(&self) -> std::sync::MutexGuard<'_, Option<TcpListener>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_listener(&self) -> Option<TcpListener> {
        self.lock_listener().take()
    }
}

impl std::fmt::Display for ProxyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ProxyServer {{{} to {}}}",
            self.listen_addr,
            self.forward_addr()
        )
    }
}

impl std::fmt::Debug for ProxyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyServer")
            .field("listen_addr", &self.listen_addr)
            .field("forward_addr", &self.forward_addr())
            .field("state", &self.state())
            .finish()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn server(listen: &str, forward: &str) -> ProxyServer {
        ProxyServer::new(listen, forward, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_close_before_bind() {
        let server = server("127.0.0.1:0", "127.0.0.1:1");
        server.close();
        server.close();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(matches!(server.bind().await, Err(ServerError::Closed { .. })));
        assert!(server.serve().await.is_ok());
    }

    #[tokio::test]
    async fn test_close_in_progress_blocks_bind() {
        let server = server("127.0.0.1:0", "127.0.0.1:1");
        // The first step of close, with the rest of it still pending.
        server.closed.cancel();
        assert!(server.is_closed());
        assert!(matches!(server.bind().await, Err(ServerError::Closed { .. })));
        assert!(server.lock_listener().is_none());
    }

    #[tokio::test]
    async fn test_bind_after_failed_serve() {
        let server = server("127.0.0.1:0", "127.0.0.1:1");
        assert!(server.serve().await.is_err());
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(!server.is_closed());
        assert!(matches!(server.bind().await, Err(ServerError::Closed { .. })));
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_bind_twice_is_noop() {
        let server = server("127.0.0.1:0", "127.0.0.1:1");
        server.bind().await.unwrap();
        let addr = server.local_addr();
        server.bind().await.unwrap();
        assert_eq!(server.local_addr(), addr);
        assert_eq!(server.state(), ServerState::Bound);
        server.close();
    }

    #[tokio::test]
    async fn test_serve_without_bind() {
        let server = server("127.0.0.1:0", "127.0.0.1:1");
        assert!(matches!(server.serve().await, Err(ServerError::NotBound { .. })));
    }

    #[tokio::test]
    async fn test_bind_busy_port() {
        let first = server("127.0.0.1:0", "127.0.0.1:1");
        first.bind().await.unwrap();
        assert_eq!(first.state(), ServerState::Bound);

        let taken = first.local_addr().unwrap().to_string();
        let second = server(&taken, "127.0.0.1:1");
        let err = second.bind().await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
        assert!(err.to_string().contains(&taken));
        first.close();
    }

    #[tokio::test]
    async fn test_close_after_bind_releases_port() {
        let server = server("127.0.0.1:0", "127.0.0.1:1");
        server.bind().await.unwrap();
        let addr = server.local_addr().unwrap();
        server.close();
        assert_eq!(server.state(), ServerState::Stopped);

        // The port is free again.
        let rebound = TcpListener::bind(addr).await.unwrap();
        drop(rebound);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_close_stops_serve() {
        let server = Arc::new(server("127.0.0.1:0", "127.0.0.1:1"));
        server.bind().await.unwrap();
        let addr = server.local_addr().unwrap();

        let serving = tokio::spawn({
            let server = server.clone();
            async move { server.serve().await }
        });
        while !server.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(server.state(), ServerState::Serving);

        let closers: Vec<_> = (0..8)
            .map(|_| {
                let server = server.clone();
                std::thread::spawn(move || server.close())
            })
            .collect();
        for closer in closers {
            closer.join().unwrap();
        }

        let result = tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .expect("serve should return after close")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(!server.is_running());

        server.close();
        TcpListener::bind(addr).await.unwrap();
    }

    #[tokio::test]
    async fn test_serve_forwards_connections() {
        let echo = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = echo.accept().await.unwrap();
            let (mut r, mut w) = stream.split();
            tokio::io::copy(&mut r, &mut w).await.unwrap();
            w.shutdown().await.unwrap();
        });

        let server = Arc::new(server("127.0.0.1:0", &echo_addr.to_string()));
        server.bind().await.unwrap();
        let addr = server.local_addr().unwrap();
        let serving = tokio::spawn({
            let server = server.clone();
            async move { server.serve().await }
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        client.shutdown().await.unwrap();
        let mut answer = Vec::new();
        client.read_to_end(&mut answer).await.unwrap();
        assert_eq!(answer, b"ping");

        server.close();
        assert!(serving.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_display() {
        let server = server("127.0.0.1:50550", "127.0.0.1:50551");
        assert_eq!(
            server.to_string(),
            "ProxyServer {127.0.0.1:50550 to 127.0.0.1:50551}"
        );
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(42);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
