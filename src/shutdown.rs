//! Run-scoped cancellation and interrupt handling
//!
//! Every run owns one [`CancellationToken`]. The first Ctrl+C cancels it and
//! lets in-flight git processes finish on their own; a second Ctrl+C exits the
//! process immediately.

use std::fmt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Error returned when work stopped because the run was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Whether an error (or anything in its context chain) is a cancellation
pub fn is_cancelled(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| cause.is::<Cancelled>())
}

/// Link `token` to process interrupts.
///
/// The handler also stops waiting for the first signal if the token is
/// cancelled for another reason, but keeps listening for the forced exit.
pub fn install_interrupt_handler(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for interrupt: {}", e);
                    return;
                }
                warn!("Interrupt received, finishing in-flight operations (press Ctrl+C again to force exit)");
                token.cancel();
            }
            _ = token.cancelled() => {
                debug!("Run cancelled, waiting only for a forced exit");
            }
        }

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second interrupt, exiting");
            std::process::exit(1);
        }
    })
}
