//! Signal handling for graceful shutdown

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{debug, warn};

/// Handles shutdown signals (SIGTERM, SIGINT)
pub struct ShutdownSignal {
    sigterm: Option<Signal>,
    sigint: Option<Signal>,
}

impl ShutdownSignal {
    /// Register the signal handlers. Must be called inside the runtime.
    pub fn new() -> Self {
        Self {
            sigterm: register(SignalKind::terminate(), "SIGTERM"),
            sigint: register(SignalKind::interrupt(), "SIGINT"),
        }
    }

    /// Wait for a shutdown signal
    pub async fn wait(&mut self) {
        tokio::select! {
            _ = recv(&mut self.sigterm) => {
                debug!("received SIGTERM");
            }
            _ = recv(&mut self.sigint) => {
                debug!("received SIGINT");
            }
            result = tokio::signal::ctrl_c(), if self.sigint.is_none() => {
                if let Err(e) = result {
                    warn!(?e, "ctrl-c handler failed");
                    std::future::pending::<()>().await;
                }
                debug!("received ctrl-c");
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

fn register(kind: SignalKind, name: &str) -> Option<Signal> {
    match signal(kind) {
        Ok(sig) => Some(sig),
        Err(e) => {
            warn!(?e, signal = name, "failed to register signal handler");
            None
        }
    }
}

/// Resolves on the next delivery; never resolves without a handler
async fn recv(sig: &mut Option<Signal>) {
    match sig {
        Some(sig) => {
            sig.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}
