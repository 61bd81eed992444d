//! # port-proxy
//!
//! TCP port-forwarding daemon.
//!
//! Every configured `src:dst` pair gets its own listener on `src`. Each
//! accepted connection is relayed byte for byte, in both directions, to `dst`
//! on the same host. The proxy works on raw streams and knows nothing about
//! the protocol it carries.
//!
//! ## Lifecycle
//!
//! [`run_proxy`] binds every listener before serving any of them. If one
//! port cannot be bound, the whole batch is released and the error lists every
//! failure. Once serving, the proxy stops when the process receives SIGINT,
//! SIGTERM or SIGHUP, or when the caller's [`CancellationToken`] fires, and
//! returns only after every listener has been closed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use port_proxy::{ForwardPort, ProxyConfig, Timeouts, run_proxy};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), port_proxy::ProxyError> {
//! let config = ProxyConfig::new("127.0.0.1", vec!["8080:80".parse().unwrap()])
//!     .with_timeouts(Timeouts::new(Duration::from_secs(30), Duration::from_secs(30)));
//!
//! run_proxy(&config, &CancellationToken::new()).await
//! # }
//! ```
//!
//! ## Error Types
//!
//! - [`ProxyError`]: a whole `run_proxy` batch failed
//! - [`ServerError`]: one listener failed to bind or serve
//! - [`ForwardError`]: one forwarding session failed; logged, never escalated
//! - [`ParseForwardPortError`], [`ParseDurationError`]: configuration input

pub mod benchmark;
pub mod config;
mod deadline;
pub mod duration;
pub mod echo;
mod error;
mod forward_port;
pub mod forwarder;
mod orchestrator;
pub mod server;
pub mod signal;

pub use benchmark::{BenchmarkReport, run_http_benchmark, run_socket_benchmark};
pub use config::{ProxyConfig, Timeouts};
pub use deadline::Deadline;
pub use duration::parse_duration;
pub use echo::{EchoServer, serve_http_echo};
pub use error::{
    BenchmarkError, Direction, ForwardError, ParseDurationError, ParseForwardPortError,
    ProxyError, ServerError,
};
pub use forward_port::ForwardPort;
pub use forwarder::{ForwardResult, Forwarder, SessionEnd, SessionStats};
pub use orchestrator::run_proxy;
pub use server::{ProxyServer, ServerState};

pub use tokio_util::sync::CancellationToken;
