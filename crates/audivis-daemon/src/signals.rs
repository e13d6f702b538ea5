//! Signal handling for graceful shutdown.

use std::fmt;

use tokio::sync::mpsc;
use tracing::{info, warn};

/// The signal that requested shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "interrupt",
            Self::Terminate => "terminate",
        })
    }
}

/// Set up signal handlers for graceful shutdown.
///
/// Returns a receiver that yields once per Ctrl+C, and per SIGTERM on unix
/// or Ctrl+Break on Windows.
pub fn setup_signal_handlers() -> mpsc::Receiver<ShutdownSignal> {
    let (tx, rx) = mpsc::channel(1);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let tx_term = tx.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    while stream.recv().await.is_some() {
                        info!("Received SIGTERM");
                        let _ = tx_term.send(ShutdownSignal::Terminate).await;
                    }
                }
                Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
            }
        });
    }

    #[cfg(windows)]
    {
        let tx_break = tx.clone();
        tokio::spawn(async move {
            match tokio::signal::windows::ctrl_break() {
                Ok(mut stream) => {
                    while stream.recv().await.is_some() {
                        info!("Received Ctrl+Break");
                        let _ = tx_break.send(ShutdownSignal::Terminate).await;
                    }
                }
                Err(e) => warn!(error = %e, "Failed to install Ctrl+Break handler"),
            }
        });
    }

    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C");
            if tx.send(ShutdownSignal::Interrupt).await.is_err() {
                break;
            }
        }
    });

    rx
}
