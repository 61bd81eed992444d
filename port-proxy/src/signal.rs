//! Process termination signals.

/// Wait until the process is asked to stop and return the signal name.
///
/// On unix this is SIGINT, SIGTERM or SIGHUP. If a handler cannot be
/// installed the failure is logged and the future never completes, leaving
/// the caller's other shutdown paths in charge.
#[cfg(unix)]
pub async fn wait_for_shutdown() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let handlers = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    );
    let (mut interrupt, mut terminate, mut hangup) = match handlers {
        (Ok(interrupt), Ok(terminate), Ok(hangup)) => (interrupt, terminate, hangup),
        (Err(error), _, _) | (_, Err(error), _) | (_, _, Err(error)) => {
            tracing::warn!(%error, "failed to install signal handlers");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = interrupt.recv() => "interrupt",
        _ = terminate.recv() => "terminated",
        _ = hangup.recv() => "hangup",
    }
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "interrupt",
        Err(error) => {
            tracing::warn!(%error, "failed to install ctrl-c handler");
            std::future::pending().await
        }
    }
}
