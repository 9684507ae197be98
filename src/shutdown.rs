//! Cooperative cancellation.
//!
//! A [`ShutdownTrigger`] flips a shared flag exactly once; every
//! [`ShutdownToken`] clone observes it. Protocol loops poll the token at their
//! boundaries and never interrupt an operation already in flight, except for
//! backoff sleeps which wake early through [`ShutdownToken::cancelled`].

use tokio::sync::watch;
use tracing::{info, warn};

/// Create a connected trigger/token pair in the running state.
#[must_use]
pub fn channel() -> (ShutdownTrigger, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownToken { rx })
}

/// Sending side of the cancellation flag.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Request cancellation. Later calls have no further effect.
    pub fn trigger(&self) {
        self.tx.send_if_modified(|cancelled| !std::mem::replace(cancelled, true));
    }
}

/// Receiving side of the cancellation flag.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Returns `true` once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool { *self.rx.borrow() }

    /// Wait until cancellation is requested.
    ///
    /// Never completes if the trigger is dropped without firing.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Wait for SIGTERM or Ctrl-C and fire `trigger`.
pub async fn listen_for_signals(trigger: ShutdownTrigger) {
    wait_for_signal().await;
    info!("action: sigterm_received | result: in_progress");
    trigger.trigger();
}

async fn wait_for_signal() {
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
