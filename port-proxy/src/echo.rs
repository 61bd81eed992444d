//! Echo responders used as forward targets by the benchmarks and tests.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Mutex, Once, OnceLock, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// TCP echo: every byte received is written back, and the write side is shut
/// down once the client finishes sending.
pub struct EchoServer {
    listen_addr: String,
    listener: Mutex<Option<TcpListener>>,
    local_addr: OnceLock<SocketAddr>,
    closed: CancellationToken,
    close_once: Once,
}

impl EchoServer {
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            listener: Mutex::new(None),
            local_addr: OnceLock::new(),
            closed: CancellationToken::new(),
            close_once: Once::new(),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub async fn bind(&self) -> Result<(), ServerError> {
        if self.close_once.is_completed() {
            return Err(ServerError::Closed {
                addr: self.listen_addr.clone(),
            });
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
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
        Ok(())
    }

    /// Accept and echo until closed. Connections in flight end with it.
    pub async fn serve(&self) -> Result<(), ServerError> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(listener) = listener else {
            return if self.close_once.is_completed() {
                Ok(())
            } else {
                Err(ServerError::NotBound {
                    addr: self.listen_addr.clone(),
                })
            };
        };

        let connections = self.closed.child_token();
        let _end_connections = connections.clone().drop_guard();

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, _)) => {
                    let cancel = connections.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            result = echo(stream) => {
                                if let Err(error) = result {
                                    tracing::debug!(%error, "echo connection failed");
                                }
                            }
                        }
                    });
                }
                Err(source) => {
                    if self.close_once.is_completed() {
                        return Ok(());
                    }
                    return Err(ServerError::Accept {
                        addr: self.listen_addr.clone(),
                        source,
                    });
                }
            }
        }
    }

    pub fn close(&self) {
        self.close_once.call_once(|| {
            self.closed.cancel();
            drop(
                self.listener
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take(),
            );
        });
    }
}

async fn echo(mut stream: TcpStream) -> std::io::Result<u64> {
    let (mut read, mut write) = stream.split();
    let copied = tokio::io::copy(&mut read, &mut write).await?;
    write.shutdown().await?;
    Ok(copied)
}

/// Serve HTTP/1.1 on `listener` until `cancel` fires, answering every request
/// with `200 OK` and the request body.
pub async fn serve_http_echo(listener: TcpListener, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(error) => {
                tracing::warn!(%error, "http echo accept failed");
                if pause_after_accept_error(&cancel).await {
                    continue;
                }
                break;
            }
        };

        let cancel = cancel.clone();
        tokio::spawn(async move {
            let service = hyper::service::service_fn(echo_request);
            let connection =
                hyper::server::conn::http1::Builder::new().serve_connection(TokioIo::new(stream), service);
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = connection => {
                    if let Err(error) = result {
                        tracing::debug!(%peer, %error, "http echo connection failed");
                    }
                }
            }
        });
    }
}

/// Back off before the next accept so a persistent failure (such as running
/// out of file descriptors) does not spin. Returns `false` if cancelled.
async fn pause_after_accept_error(cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => true,
    }
}

async fn echo_request(request: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match request.into_body().collect().await {
        Ok(body) => Response::new(Full::new(body.to_bytes())),
        Err(error) => {
            let mut response = Response::new(Full::new(Bytes::from(error.to_string())));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_tcp_echo() {
        let server = Arc::new(EchoServer::new("127.0.0.1:0"));
        server.bind().await.unwrap();
        let addr = server.local_addr().unwrap();
        let serving = tokio::spawn({
            let server = server.clone();
            async move { server.serve().await }
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hello echo").await.unwrap();
        client.shutdown().await.unwrap();
        let mut answer = Vec::new();
        client.read_to_end(&mut answer).await.unwrap();
        assert_eq!(answer, b"hello echo");

        server.close();
        server.close();
        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_http_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let serving = tokio::spawn(serve_http_echo(listener, cancel.clone()));

        let response = reqwest::Client::new()
            .post(format!("http://{addr}/"))
            .body("echo me")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.bytes().await.unwrap().as_ref(), b"echo me");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_accept_error_backs_off() {
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();
        assert!(pause_after_accept_error(&cancel).await);
        assert!(started.elapsed() >= ACCEPT_RETRY_DELAY);

        cancel.cancel();
        let started = tokio::time::Instant::now();
        assert!(!pause_after_accept_error(&cancel).await);
        assert!(started.elapsed() < ACCEPT_RETRY_DELAY);
    }
}
