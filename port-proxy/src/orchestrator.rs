//! Runs every configured forward port as one unit.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::ProxyConfig;
use crate::error::{ProxyError, ServerError};
use crate::server::{ProxyServer, panic_message};

/// Bind one [`ProxyServer`] per forward port, serve them all and block until
/// every one of them has stopped.
///
/// Startup is all-or-nothing: if any listener fails to bind, every server in
/// the batch is closed and [`ProxyError::Bind`] lists each failure.
///
/// Shutdown starts on SIGINT, SIGTERM or SIGHUP, or when `cancel` fires. Both
/// paths close every server, which is an expected stop and not an error. The
/// first error returned by any `serve` becomes the result; a failing server
/// does not stop its siblings.
pub async fn run_proxy(config: &ProxyConfig, cancel: &CancellationToken) -> Result<(), ProxyError> {
    if config.forward_ports.is_empty() {
        return Err(ProxyError::NoForwardPorts);
    }

    let scope = cancel.child_token();
    let _scope_guard = scope.clone().drop_guard();

    let servers: Vec<Arc<ProxyServer>> = config
        .forward_ports
        .iter()
        .map(|port| {
            Arc::new(
                ProxyServer::new(
                    config.listen_addr(port),
                    config.forward_addr(port),
                    scope.clone(),
                )
                .with_timeouts(config.timeouts)
                .with_verbose(config.verbose),
            )
        })
        .collect();

    bind_all(&servers).await?;

    let mut serving = JoinSet::new();
    for server in &servers {
        let server = server.clone();
        serving.spawn(async move { server.serve().await });
    }
    tracing::info!(servers = servers.len(), "daemon started with {} proxy servers", servers.len());

    let watcher = tokio::spawn({
        let servers = servers.clone();
        let scope = scope.clone();
        async move {
            let reason = tokio::select! {
                signal = crate::signal::wait_for_shutdown() => signal,
                _ = scope.cancelled() => "cancel",
            };
            tracing::info!(reason, "daemon stopped by {reason}");
            scope.cancel();
            close_all(&servers);
        }
    });

    let result = wait_all(&mut serving).await;

    // Servers that failed on their own leave the watcher waiting.
    scope.cancel();
    if let Err(error) = watcher.await {
        tracing::error!(%error, "shutdown watcher failed");
        close_all(&servers);
    }

    result
}

/// Bind every server in order. On any failure close the whole batch and
/// return every error.
async fn bind_all(servers: &[Arc<ProxyServer>]) -> Result<(), ProxyError> {
    let mut errors = Vec::new();
    for server in servers {
        if let Err(error) = server.bind().await {
            tracing::error!(%server, %error, "bind failed");
            errors.push(error);
        }
    }

    if errors.is_empty() {
        return Ok(());
    }
    close_all(servers);
    Err(ProxyError::Bind(errors))
}

fn close_all(servers: &[Arc<ProxyServer>]) {
    for server in servers {
        server.close();
    }
}

/// Drain the join set, keeping the first error observed.
async fn wait_all(serving: &mut JoinSet<Result<(), ServerError>>) -> Result<(), ProxyError> {
    let mut first_error = None;
    while let Some(joined) = serving.join_next().await {
        let error = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(error)) => error,
            Err(join_error) => ServerError::Panicked {
                addr: "serve task".to_string(),
                message: match join_error.try_into_panic() {
                    Ok(panic) => panic_message(panic.as_ref()),
                    Err(join_error) => join_error.to_string(),
                },
            },
        };
        if first_error.is_none() {
            first_error = Some(error);
        } else {
            tracing::warn!(%error, "additional proxy server error");
        }
    }

    match first_error {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}
