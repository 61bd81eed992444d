use eyre::WrapErr;
use port_proxy::{ForwardPort, run_http_benchmark, run_socket_benchmark};

/// Value of `-b`
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BenchmarkKind {
    /// Raw TCP straight to the echo server
    Socket,
    /// Raw TCP through the proxy
    SocketProxy,
    /// HTTP straight to the echo server
    Http,
    /// HTTP through the proxy
    HttpProxy,
}

impl BenchmarkKind {
    pub fn with_proxy(self) -> bool {
        matches!(self, BenchmarkKind::SocketProxy | BenchmarkKind::HttpProxy)
    }
}

pub async fn run(
    kind: BenchmarkKind,
    ip: &str,
    port: ForwardPort,
    block_size: usize,
    count: usize,
) -> eyre::Result<()> {
    let with_proxy = kind.with_proxy();
    tracing::info!(?kind, %port, block_size, count, "benchmark started");

    let report = match kind {
        BenchmarkKind::Socket | BenchmarkKind::SocketProxy => {
            run_socket_benchmark(ip, port, with_proxy, block_size, count).await
        }
        BenchmarkKind::Http | BenchmarkKind::HttpProxy => {
            run_http_benchmark(ip, port, with_proxy, block_size, count).await
        }
    }
    .wrap_err_with(|| format!("{kind:?} benchmark failed"))?;

    tracing::info!(
        latency_ms = report.latency_ms,
        throughput_mib_s = report.throughput_mib_s,
        total_bytes = report.total_bytes,
        "benchmark finished: {report}"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::ValueEnum;

    #[test]
    fn test_kind_names() {
        assert_eq!(
            BenchmarkKind::from_str("socket-proxy", false).unwrap(),
            BenchmarkKind::SocketProxy
        );
        assert_eq!(
            BenchmarkKind::from_str("http", false).unwrap(),
            BenchmarkKind::Http
        );
        assert!(BenchmarkKind::HttpProxy.with_proxy());
        assert!(!BenchmarkKind::Socket.with_proxy());
    }
}
