//! Graceful shutdown.
//!
//! [`ShutdownSignal`] fans one trigger out to the accept loop and every
//! connection task. [`ConnectionTracker`] lets the server wait for open
//! connections to finish before it returns.
//!
//! ```rust
//! use bulwark_gateway::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//! let for_task = shutdown.clone();
//!
//! shutdown.trigger();
//! assert!(for_task.is_shutdown());
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Notify};

/// A cloneable trigger that every clone can await.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            sender,
        }
    }

    /// Triggers shutdown. Idempotent.
    pub fn trigger(&self) {
        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // No receivers is fine.
            let _ = self.sender.send(());
        }
    }

    /// Returns `true` once [`trigger`](Self::trigger) has run.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// A future that completes when shutdown is triggered, immediately if it
    /// already was.
    pub fn recv(&self) -> impl Future<Output = ()> + Send + 'static {
        // Subscribe before reading the flag so a trigger in between is seen.
        let mut receiver = self.sender.subscribe();
        let triggered = Arc::clone(&self.triggered);
        async move {
            if triggered.load(Ordering::SeqCst) {
                return;
            }
            let _ = receiver.recv().await;
        }
    }

    /// A signal that triggers on SIGTERM or SIGINT.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        let signal_clone = signal.clone();

        tokio::spawn(async move {
            wait_for_os_signal().await;
            signal_clone.trigger();
        });

        signal
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_os_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "failed to register signal handlers");
            std::future::pending::<()>().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_os_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received Ctrl+C, starting graceful shutdown"),
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

/// Counts open connections.
///
/// ```rust
/// use bulwark_gateway::shutdown::ConnectionTracker;
///
/// let tracker = ConnectionTracker::new();
/// let token = tracker.acquire();
/// assert_eq!(tracker.active_connections(), 1);
///
/// drop(token);
/// assert_eq!(tracker.active_connections(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl ConnectionTracker {
    /// Creates a tracker with no connections.
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Registers a connection until the token is dropped.
    #[must_use]
    pub fn acquire(&self) -> ConnectionToken {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionToken {
            active: Arc::clone(&self.active),
            notify: Arc::clone(&self.notify),
        }
    }

    /// Number of connections currently open.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits until every token has been dropped.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.notify.notified();
            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by a connection task for as long as the connection is open.
#[derive(Debug)]
pub struct ConnectionToken {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }
}
