//! port-proxy: TCP port forwarding daemon
//!
//! Without `-f` the daemon restarts itself in the background and returns.
//! With `-b` it runs a benchmark against a local echo server instead.

use std::time::Duration;

use clap::Parser;
use eyre::WrapErr;
use port_proxy::{CancellationToken, ForwardPort, ProxyConfig, Timeouts, parse_duration, run_proxy};
use port_proxy_token::TokenHash;

mod cli;

use cli::benchmark::BenchmarkKind;

#[derive(Parser, Debug)]
#[command(name = "port-proxy", version)]
#[command(about = "Forward TCP ports to local destinations")]
struct Cli {
    /// Forward ports in format src:dst, repeatable
    #[arg(short = 'p', long = "port", value_name = "SRC:DST")]
    ports: Vec<ForwardPort>,

    /// Listen/forward ip address, example '' or '127.0.0.1'
    #[arg(long, default_value = "")]
    ip: String,

    /// Socket read timeout, 0 disables it
    #[arg(long = "srt", value_name = "DURATION", default_value = "30s", value_parser = parse_duration)]
    read_timeout: Duration,

    /// Socket write timeout, 0 disables it
    #[arg(long = "swt", value_name = "DURATION", default_value = "30s", value_parser = parse_duration)]
    write_timeout: Duration,

    /// Run a benchmark instead of the daemon, using the first forward port
    #[arg(short = 'b', long = "benchmark", value_enum)]
    benchmark: Option<BenchmarkKind>,

    /// Benchmark block size in bytes
    #[arg(long = "bs", default_value_t = 1 << 20)]
    block_size: usize,

    /// Benchmark rounds
    #[arg(long, default_value_t = 1024)]
    count: usize,

    /// Generate a token and the hash to provision for it
    #[arg(short = 'g', long)]
    generate_token: bool,

    /// Hash of the token required to start the daemon
    #[arg(long, env = "PORT_PROXY_TOKEN_HASH")]
    token_hash: Option<TokenHash>,

    /// Log traffic of every session
    #[arg(short, long)]
    verbose: bool,

    /// Run in the foreground instead of starting a background daemon
    #[arg(short, long)]
    foreground: bool,

    /// Log destination: stdout or a file path
    #[arg(long, default_value = cli::logging::STDOUT)]
    log: String,
}

impl Cli {
    fn config(&self) -> ProxyConfig {
        ProxyConfig::new(self.ip.clone(), self.ports.clone())
            .with_timeouts(Timeouts::new(self.read_timeout, self.write_timeout))
            .with_verbose(self.verbose)
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    if cli.generate_token {
        cli::token::print_generated();
        return Ok(());
    }

    let Some(first_port) = cli.ports.first().copied() else {
        eyre::bail!("empty forward ports");
    };

    if let Some(kind) = cli.benchmark {
        cli::logging::init(cli::logging::STDOUT, cli.verbose)?;
        return cli::benchmark::run(kind, &cli.ip, first_port, cli.block_size, cli.count).await;
    }

    let config = cli.config();

    if !cli.foreground {
        let token = cli
            .token_hash
            .as_ref()
            .map(cli::token::obtain_verified)
            .transpose()?;
        cli::background::start(&config, cli.token_hash.as_ref(), token.as_ref())?;
        return Ok(());
    }

    cli::logging::init(&cli.log, cli.verbose)?;

    if let Some(hash) = &cli.token_hash {
        cli::token::obtain_verified(hash)?;
        tracing::info!("token verified");
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "{} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    tracing::info!("Listen IP Address: {}", config.listen_ip);
    tracing::info!(
        "Forward Ports: {}",
        config
            .forward_ports
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    tracing::info!("Verbose: {}", config.verbose);

    run_proxy(&config, &CancellationToken::new())
        .await
        .wrap_err("proxy stopped with error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["port-proxy", "-p", "8080:80"]).unwrap();
        assert_eq!(cli.ports, vec![ForwardPort::new(8080, 80)]);
        assert_eq!(cli.ip, "");
        assert_eq!(cli.read_timeout, Duration::from_secs(30));
        assert_eq!(cli.write_timeout, Duration::from_secs(30));
        assert_eq!(cli.block_size, 1 << 20);
        assert_eq!(cli.count, 1024);
        assert_eq!(cli.log, "stdout");
        assert!(!cli.foreground);
        assert!(cli.benchmark.is_none());
    }

    #[test]
    fn test_cli_full() {
        let cli = Cli::try_parse_from([
            "port-proxy",
            "-p",
            "50550:50551",
            "-p",
            "1:2",
            "--ip=127.0.0.1",
            "--srt",
            "250ms",
            "--swt",
            "0",
            "-b",
            "http-proxy",
            "-v",
            "-f",
        ])
        .unwrap();
        assert_eq!(cli.ports.len(), 2);
        assert_eq!(cli.benchmark, Some(BenchmarkKind::HttpProxy));

        let config = cli.config();
        assert_eq!(config.listen_ip, "127.0.0.1");
        assert_eq!(config.timeouts.read, Duration::from_millis(250));
        assert_eq!(config.timeouts.write, Duration::ZERO);
        assert!(config.verbose);
    }

    #[test]
    fn test_cli_rejects_bad_values() {
        assert!(Cli::try_parse_from(["port-proxy", "-p", "8080"]).is_err());
        assert!(Cli::try_parse_from(["port-proxy", "-p", "x:80"]).is_err());
        assert!(Cli::try_parse_from(["port-proxy", "-p", "1:2", "--srt", "30"]).is_err());
        assert!(Cli::try_parse_from(["port-proxy", "-p", "1:2", "-b", "udp"]).is_err());
    }
}
