//! Graceful shutdown sequencing (spec §5 cancellation & timeouts).
//!
//! SIGINT/SIGTERM trip a [`tokio_util::sync::CancellationToken`]; this
//! module drains in-flight agent runs up to a deadline before the
//! caller force-closes the listener and exits.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::session::SessionHub;

/// Install Ctrl-C (all platforms) and SIGTERM (unix) handlers that
/// cancel `token` exactly once.
pub fn install_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received ctrl-c, starting graceful shutdown");
        ctrl_c_token.cancel();
    });

    #[cfg(unix)]
    {
        let term_token = token;
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            if let Ok(mut sig) = signal(SignalKind::terminate()) {
                sig.recv().await;
                tracing::info!("received sigterm, starting graceful shutdown");
                term_token.cancel();
            }
        });
    }
}

/// Wait for `hub`'s in-flight runs to reach a terminal state, polling
/// every 100ms, but never past `deadline`. Returns the number of runs
/// still active when the wait ended (0 means a clean drain).
pub async fn drain(hub: &SessionHub, deadline: Duration) -> usize {
    let started = tokio::time::Instant::now();
    loop {
        let active = hub.active_run_count().await;
        if active == 0 {
            return 0;
        }
        if started.elapsed() >= deadline {
            tracing::warn!(active, "shutdown deadline reached with runs still in flight");
            return active;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
