//! Proxy configuration, built once at startup and passed into [`crate::run_proxy`].

use std::time::Duration;

use crate::ForwardPort;

/// Host used to listen when no IP is configured
pub const ALL_INTERFACES: &str = "0.0.0.0";

/// Host used to reach forward targets when no IP is configured
pub const LOCAL_HOST: &str = "127.0.0.1";

/// Absolute socket deadlines applied to every accepted connection.
///
/// A zero duration disables the corresponding deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    pub read: Duration,
    pub write: Duration,
}

impl Timeouts {
    pub fn new(read: Duration, write: Duration) -> Self {
        Self { read, write }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Listen and forward IP; empty means all interfaces
    pub listen_ip: String,
    pub forward_ports: Vec<ForwardPort>,
    pub timeouts: Timeouts,
    /// Log per-session traffic totals at info level
    pub verbose: bool,
}

impl ProxyConfig {
    pub fn new(listen_ip: impl Into<String>, forward_ports: Vec<ForwardPort>) -> Self {
        Self {
            listen_ip: listen_ip.into(),
            forward_ports,
            timeouts: Timeouts::disabled(),
            verbose: false,
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn listen_addr(&self, port: &ForwardPort) -> String {
        let host = if self.listen_ip.is_empty() {
            ALL_INTERFACES
        } else {
            &self.listen_ip
        };
        format!("{host}:{}", port.src_port)
    }

    pub fn forward_addr(&self, port: &ForwardPort) -> String {
        format!("{}:{}", self.dial_host(), port.dst_port)
    }

    /// Host that local clients and forwarded sessions connect to
    pub fn dial_host(&self) -> &str {
        if self.listen_ip.is_empty() {
            LOCAL_HOST
        } else {
            &self.listen_ip
        }
    }
}
