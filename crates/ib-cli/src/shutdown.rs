//! SIGINT/SIGTERM turn into a cancelled token; the dispatcher notices it at
//! its next loop boundary.

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process is asked to stop.
///
/// Handlers are installed before this returns, so a signal arriving right
/// after cannot take the default kill path.
#[cfg(unix)]
pub fn cancel_on_signal(token: CancellationToken) {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut term, mut int) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!("cannot listen for termination signals: {e}");
            return;
        }
    };
    tokio::spawn(async move {
        tokio::select! {
            _ = term.recv() => {}
            _ = int.recv() => {}
        }
        tracing::info!("termination signal received");
        token.cancel();
    });
}

#[cfg(not(unix))]
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("termination signal received");
            token.cancel();
        }
    });
}
