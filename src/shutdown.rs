//! Stop paging on SIGINT / SIGTERM and let queued downloads drain.
//!
//! The first signal cancels the returned [`CancellationToken`]; the session
//! checks it between pages and between albums. A second signal exits at once.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Exit status used when a second signal forces the process down.
pub const FORCED_EXIT_STATUS: i32 = 130;

pub(crate) fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let received = Arc::new(AtomicU32::new(0));

    let handler_token = token.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut sigterm = {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!("Could not listen for SIGTERM: {}", e);
                    None
                }
            }
        };

        loop {
            #[cfg(unix)]
            let delivered = match sigterm.as_mut() {
                Some(term) => tokio::select! {
                    r = tokio::signal::ctrl_c() => r.is_ok(),
                    r = term.recv() => r.is_some(),
                },
                None => tokio::signal::ctrl_c().await.is_ok(),
            };
            #[cfg(not(unix))]
            let delivered = tokio::signal::ctrl_c().await.is_ok();

            if !delivered {
                tracing::warn!("Signal listener closed, graceful shutdown unavailable");
                return;
            }
            if on_signal(&received, &handler_token) {
                tracing::warn!("Second signal, exiting without draining");
                std::process::exit(FORCED_EXIT_STATUS);
            }
        }
    });

    token
}

/// Record one signal. Cancels `token` on the first; returns `true` once a
/// signal has already been seen.
fn on_signal(received: &AtomicU32, token: &CancellationToken) -> bool {
    if received.fetch_add(1, Ordering::SeqCst) == 0 {
        tracing::info!("Shutdown requested, finishing queued downloads");
        tracing::info!("Press Ctrl+C again to exit immediately");
        token.cancel();
        false
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_signal_cancels_second_forces() {
        let received = AtomicU32::new(0);
        let token = CancellationToken::new();
        assert!(!on_signal(&received, &token));
        assert!(token.is_cancelled());
        assert!(on_signal(&received, &token));
    }

    #[tokio::test]
    async fn install_returns_live_token() {
        let token = install_signal_handler();
        assert!(!token.is_cancelled());
    }
}
