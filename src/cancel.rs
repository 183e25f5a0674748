//! Cooperative, single-shot cancellation shared by both client phases.
//!
//! The signal is observed only at checkpoints: after each batch acknowledgment
//! and during the wait between winner poll attempts. In-flight reads and
//! writes are never interrupted.

use std::time::Duration;

use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of [`CancelSignal::wait_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full period elapsed without cancellation.
    Elapsed,
    /// Cancellation fired before the period elapsed.
    Cancelled,
}

/// Cloneable handle to a process-wide cancellation request.
///
/// Once set, the signal stays set.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
}

impl CancelSignal {
    /// Create an unset signal.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Request cancellation. Later calls have no further effect.
    pub fn cancel(&self) { self.token.cancel(); }

    /// Non-blocking check used at submission checkpoints.
    #[must_use]
    pub fn is_set(&self) -> bool { self.token.is_cancelled() }

    /// Wait for `period` to elapse or for cancellation, whichever comes first.
    ///
    /// Returns immediately if the signal is already set.
    pub async fn wait_timeout(&self, period: Duration) -> WaitOutcome {
        tokio::select! {
            biased;
            () = self.token.cancelled() => WaitOutcome::Cancelled,
            () = sleep(period) => WaitOutcome::Elapsed,
        }
    }
}

/// Bridge SIGTERM and Ctrl-C into `signal` from a background task.
#[must_use = "abort the listener once the client has finished"]
pub fn listen_for_termination(signal: CancelSignal) -> JoinHandle<()> {
    tokio::spawn(async move {
        termination_requested().await;
        info!("termination requested");
        signal.cancel();
    })
}

/// Completes when the process is asked to terminate.
async fn termination_requested() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        if let Err(err) = res {
                            warn!(error = %err, "failed to listen for Ctrl-C");
                        }
                    },
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                wait_for_ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        wait_for_ctrl_c().await;
    }
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn wait_runs_full_period_when_not_cancelled() {
        let signal = CancelSignal::new();
        let start = Instant::now();
        assert_eq!(
            signal.wait_timeout(Duration::from_secs(5)).await,
            WaitOutcome::Elapsed
        );
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_early_on_cancel() {
        let signal = CancelSignal::new();
        let remote = signal.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            remote.cancel();
        });
        let start = Instant::now();
        assert_eq!(
            signal.wait_timeout(Duration::from_secs(60)).await,
            WaitOutcome::Cancelled
        );
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn already_set_signal_does_not_wait() {
        let signal = CancelSignal::new();
        signal.cancel();
        signal.cancel();
        assert!(signal.is_set());
        assert_eq!(
            signal.wait_timeout(Duration::from_secs(3600)).await,
            WaitOutcome::Cancelled
        );
    }
}
