//! Signal handling for the CLI.
//!
//! The first SIGINT (Ctrl+C), SIGTERM, or SIGHUP cancels the returned
//! [`CancellationToken`]; the caller turns that into a cancel request on the
//! sync engine so the run stops at the next asset boundary. A second signal
//! force-exits.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Exit code used when a second signal forces the process down.
const FORCE_EXIT_CODE: i32 = 130;

/// Install signal handlers and return a token cancelled on the first signal.
///
/// Must be called from within a tokio runtime. Fails only if the OS refuses
/// to register a handler.
pub(crate) fn install_signal_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let count = Arc::new(AtomicU32::new(0));

    #[cfg(unix)]
    let (mut sigterm, mut sighup) = {
        use tokio::signal::unix::{signal, SignalKind};
        (
            signal(SignalKind::terminate())?,
            signal(SignalKind::hangup())?,
        )
    };

    let handler_token = token.clone();
    tokio::spawn(async move {
        loop {
            #[cfg(unix)]
            {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                    _ = sighup.recv() => {}
                }
            }

            #[cfg(not(unix))]
            {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!("Failed to listen for Ctrl+C: {}", e);
                    return;
                }
            }

            if count.fetch_add(1, Ordering::SeqCst) == 0 {
                tracing::info!("Received shutdown signal, finishing current asset...");
                tracing::info!("Press Ctrl+C again to force exit");
                handler_token.cancel();
            } else {
                tracing::warn!("Force exit requested");
                std::process::exit(FORCE_EXIT_CODE);
            }
        }
    });

    Ok(token)
}
