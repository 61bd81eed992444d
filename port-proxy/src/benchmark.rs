//! Throughput and latency measurements against an echo target, directly or
//! through the proxy.

use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ForwardPort;
use crate::config::ProxyConfig;
use crate::echo::{EchoServer, serve_http_echo};
use crate::error::{BenchmarkError, ProxyError, ServerError};
use crate::orchestrator::run_proxy;

const CONNECT_ATTEMPTS: u32 = 100;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(20);
const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchmarkReport {
    /// Mean time of one round trip
    pub latency_ms: f64,
    pub throughput_mib_s: f64,
    /// Payload bytes sent; the same amount came back
    pub total_bytes: u64,
}

impl BenchmarkReport {
    fn measure(elapsed: Duration, rounds: usize, total_bytes: u64) -> Self {
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        Self {
            latency_ms: elapsed.as_secs_f64() * 1_000.0 / rounds.max(1) as f64,
            throughput_mib_s: total_bytes as f64 / MIB / secs,
            total_bytes,
        }
    }
}

impl std::fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "latency {:.3} ms, throughput {:.2} MiB/s, {} bytes",
            self.latency_ms, self.throughput_mib_s, self.total_bytes
        )
    }
}

/// Deterministic payload for one block
pub fn payload(block_size: usize) -> Vec<u8> {
    (0..block_size).map(|i| (i % 251) as u8).collect()
}

/// Address clients dial: the proxy's source port or the echo's destination port.
fn target_addr(config: &ProxyConfig, port: &ForwardPort, with_proxy: bool) -> String {
    let dial_port = if with_proxy { port.src_port } else { port.dst_port };
    format!("{}:{dial_port}", config.dial_host())
}

/// Runs the proxy for one pair in the background while a benchmark drives it.
struct ProxyTask {
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), ProxyError>>,
}

impl ProxyTask {
    fn start(config: ProxyConfig) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { run_proxy(&config, &cancel).await }
        });
        Self { cancel, handle }
    }

    async fn stop_if_started(task: Option<Self>) -> Result<(), BenchmarkError> {
        match task {
            Some(task) => task.stop().await,
            None => Ok(()),
        }
    }

    async fn stop(self) -> Result<(), BenchmarkError> {
        self.cancel.cancel();
        match self.handle.await {
            Ok(result) => Ok(result?),
            Err(error) => Err(ServerError::Panicked {
                addr: "proxy".to_string(),
                message: error.to_string(),
            }
            .into()),
        }
    }
}

async fn connect_with_retry(addr: &str) -> Result<TcpStream, BenchmarkError> {
    for _ in 0..CONNECT_ATTEMPTS {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(error) => {
                tracing::trace!(%addr, %error, "target not reachable yet");
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
        }
    }
    Err(BenchmarkError::Unreachable {
        addr: addr.to_string(),
    })
}

/// Send `count` blocks over one TCP connection and check every echo.
pub async fn run_socket_benchmark(
    ip: &str,
    port: ForwardPort,
    with_proxy: bool,
    block_size: usize,
    count: usize,
) -> Result<BenchmarkReport, BenchmarkError> {
    let config = ProxyConfig::new(ip, vec![port]);

    let echo = std::sync::Arc::new(EchoServer::new(config.forward_addr(&port)));
    echo.bind().await?;
    let echo_task = tokio::spawn({
        let echo = echo.clone();
        async move { echo.serve().await }
    });
    let proxy = with_proxy.then(|| ProxyTask::start(config.clone()));

    let outcome = socket_rounds(&target_addr(&config, &port, with_proxy), block_size, count).await;

    let stopped = ProxyTask::stop_if_started(proxy).await;
    echo.close();
    if let Ok(Err(error)) = echo_task.await {
        tracing::warn!(%error, "echo server failed");
    }
    stopped?;
    outcome
}

async fn socket_rounds(
    addr: &str,
    block_size: usize,
    count: usize,
) -> Result<BenchmarkReport, BenchmarkError> {
    let mut stream = connect_with_retry(addr).await?;
    let (mut read, mut write) = stream.split();
    let block = payload(block_size);
    let mut answer = vec![0u8; block_size];

    let started = Instant::now();
    for round in 0..count {
        let (written, read_back) = tokio::join!(write.write_all(&block), read.read_exact(&mut answer));
        written?;
        read_back?;
        if answer != block {
            return Err(BenchmarkError::Mismatch { round });
        }
    }
    let elapsed = started.elapsed();

    write.shutdown().await?;
    Ok(BenchmarkReport::measure(
        elapsed,
        count,
        (block_size * count) as u64,
    ))
}

/// POST `count` blocks to an HTTP echo and check every response body.
pub async fn run_http_benchmark(
    ip: &str,
    port: ForwardPort,
    with_proxy: bool,
    block_size: usize,
    count: usize,
) -> Result<BenchmarkReport, BenchmarkError> {
    let config = ProxyConfig::new(ip, vec![port]);

    let echo_addr = config.forward_addr(&port);
    let listener = TcpListener::bind(&echo_addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: echo_addr.clone(),
            source,
        })?;
    let echo_cancel = CancellationToken::new();
    let echo_task = tokio::spawn(serve_http_echo(listener, echo_cancel.clone()));
    let proxy = with_proxy.then(|| ProxyTask::start(config.clone()));

    let outcome = http_rounds(&target_addr(&config, &port, with_proxy), block_size, count).await;

    let stopped = ProxyTask::stop_if_started(proxy).await;
    echo_cancel.cancel();
    let _ = echo_task.await;
    stopped?;
    outcome
}

async fn http_rounds(
    addr: &str,
    block_size: usize,
    count: usize,
) -> Result<BenchmarkReport, BenchmarkError> {
    drop(connect_with_retry(addr).await?);

    let client = reqwest::Client::new();
    let url = format!("http://{addr}/");
    let block = payload(block_size);

    let started = Instant::now();
    for round in 0..count {
        let response = client.post(&url).body(block.clone()).send().await?;
        if !response.status().is_success() {
            return Err(BenchmarkError::Status {
                round,
                status: response.status().as_u16(),
            });
        }
        if response.bytes().await?.as_ref() != block.as_slice() {
            return Err(BenchmarkError::Mismatch { round });
        }
    }
    let elapsed = started.elapsed();

    Ok(BenchmarkReport::measure(
        elapsed,
        count,
        (block_size * count) as u64,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_pattern() {
        let block = payload(300);
        assert_eq!(block.len(), 300);
        assert_eq!(block[0], 0);
        assert_eq!(block[250], 250);
        assert_eq!(block[251], 0);
    }

    #[test]
    fn test_target_addr() {
        let port = ForwardPort::new(50550, 50551);
        let config = ProxyConfig::new("", vec![port]);
        assert_eq!(target_addr(&config, &port, true), "127.0.0.1:50550");
        assert_eq!(target_addr(&config, &port, false), "127.0.0.1:50551");
    }

    #[test]
    fn test_report_measure() {
        let report = BenchmarkReport::measure(Duration::from_secs(2), 4, 4 * 1024 * 1024);
        assert_eq!(report.latency_ms, 500.0);
        assert_eq!(report.throughput_mib_s, 2.0);
        assert_eq!(report.total_bytes, 4 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_socket_benchmark_direct() {
        let report = run_socket_benchmark("127.0.0.1", ForwardPort::new(50650, 50651), false, 4096, 16)
            .await
            .unwrap();
        assert_eq!(report.total_bytes, 4096 * 16);
    }

    #[tokio::test]
    async fn test_http_benchmark_through_proxy() {
        let report = run_http_benchmark("127.0.0.1", ForwardPort::new(50660, 50661), true, 1024, 8)
            .await
            .unwrap();
        assert_eq!(report.total_bytes, 1024 * 8);
    }
}
