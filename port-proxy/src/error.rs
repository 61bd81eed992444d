//! Error types for port-proxy

/// Error parsing a `src:dst` forward port pair
#[derive(Debug, thiserror::Error)]
pub enum ParseForwardPortError {
    #[error("separator ':' not found in '{value}'")]
    MissingSeparator { value: String },

    #[error("parsing of first part '{part}' of '{value}' failed: {source}")]
    InvalidSource {
        value: String,
        part: String,
        source: std::num::ParseIntError,
    },

    #[error("parsing of second part '{part}' of '{value}' failed: {source}")]
    InvalidDestination {
        value: String,
        part: String,
        source: std::num::ParseIntError,
    },
}

/// Error parsing a duration such as `30s` or `1m30s`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseDurationError {
    #[error("empty duration")]
    Empty,

    #[error("missing unit in duration '{value}'")]
    MissingUnit { value: String },

    #[error("unknown unit '{unit}' in duration '{value}'")]
    UnknownUnit { value: String, unit: String },

    #[error("invalid number in duration '{value}'")]
    InvalidNumber { value: String },

    #[error("duration '{value}' is out of range")]
    Overflow { value: String },
}

/// Failure of a single proxy server
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("listen address is busy '{addr}': {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("server '{addr}' is not bound")]
    NotBound { addr: String },

    #[error("server '{addr}' is closed and cannot be bound again")]
    Closed { addr: String },

    #[error("accept on '{addr}' failed: {source}")]
    Accept {
        addr: String,
        source: std::io::Error,
    },

    #[error("server '{addr}' panicked: {message}")]
    Panicked { addr: String, message: String },
}

/// Which way bytes flow inside a forwarding session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Inbound client to forward target
    ClientToServer,
    /// Forward target back to the inbound client
    ServerToClient,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::ClientToServer => write!(f, "client to server"),
            Direction::ServerToClient => write!(f, "server to client"),
        }
    }
}

/// Failure of one forwarding session; never escalates past the server
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("dial '{addr}' failed: {source}")]
    Dial {
        addr: String,
        source: std::io::Error,
    },

    #[error("{direction} copy failed: {source}")]
    Copy {
        direction: Direction,
        source: std::io::Error,
    },
}

/// Failure of a whole `run_proxy` batch
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("empty forward ports")]
    NoForwardPorts,

    #[error("bind errors: {}", join_errors(.0))]
    Bind(Vec<ServerError>),

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Failure of a benchmark run
#[derive(Debug, thiserror::Error)]
pub enum BenchmarkError {
    #[error("benchmark i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("round {round} answered with status {status}")]
    Status { round: usize, status: u16 },

    #[error("round {round} answer does not match the payload")]
    Mismatch { round: usize },

    #[error("'{addr}' did not become reachable")]
    Unreachable { addr: String },
}

fn join_errors(errors: &[ServerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_errors_list_every_failure() {
        let err = ProxyError::Bind(vec![
            ServerError::Bind {
                addr: "127.0.0.1:1".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
            },
            ServerError::Bind {
                addr: "127.0.0.1:2".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            },
        ]);

        let text = err.to_string();
        assert!(text.starts_with("bind errors: "));
        assert!(text.contains("127.0.0.1:1"));
        assert!(text.contains("127.0.0.1:2"));
    }
}
