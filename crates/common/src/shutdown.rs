// Cooperative shutdown signal threaded through long running loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

/// Cooperative shutdown signal.
///
/// Cloneable; triggering any clone wakes every waiter. Long running loops
/// await [`requested`](Shutdown::requested) at their suspension points so
/// that a termination signal lets them release child processes before the
/// process exits.
#[derive(Debug, Clone)]
pub struct Shutdown {
    triggered: Arc<AtomicBool>,
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(4);
        Self { triggered: Arc::new(AtomicBool::new(false)), tx }
    }

    /// Signal shutdown to all waiters.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        let _ = self.tx.send(());
    }

    pub fn is_requested(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is signalled. Returns immediately if it already
    /// was.
    pub async fn requested(&self) {
        if self.is_requested() {
            return;
        }
        let mut rx = self.tx.subscribe();
        // A trigger may have slipped in before the subscription existed.
        if self.is_requested() {
            return;
        }
        let _ = rx.recv().await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Trigger `shutdown` when the process receives SIGINT or SIGTERM.
pub fn trigger_on_termination(shutdown: Shutdown) -> std::io::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        info!("termination signal received, shutting down");
        shutdown.trigger();
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Shutdown;

    #[tokio::test]
    async fn waiters_wake_on_trigger() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.clone();
        let task = tokio::spawn(async move { waiter.requested().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!task.is_finished());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter should wake after trigger")
            .expect("waiter task should not panic");
    }

    #[tokio::test]
    async fn requested_returns_immediately_after_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        assert!(shutdown.is_requested());
        shutdown.requested().await;
    }
}
