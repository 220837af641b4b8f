use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::{signal, sync::watch};

/// Represents different shutdown reasons
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// OS termination signal (SIGINT, SIGTERM)
    Signal(&'static str),
    /// Explicit request from host code or the `/shutdown` route
    Requested(String),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(name) => write!(f, "signal: {name}"),
            Self::Requested(source) => write!(f, "requested: {source}"),
        }
    }
}

/// Single-shot cancellation signal shared by every shutdown source.
///
/// OS signals and explicit requests both go through [`trigger`](Self::trigger);
/// only the first one is recorded and every waiter observes that reason.
pub struct GracefulShutdown {
    /// Latest reason; `None` until the first trigger
    reason_tx: watch::Sender<Option<ShutdownReason>>,
    /// Flag indicating if shutdown has been initiated
    shutdown_initiated: AtomicBool,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (reason_tx, _) = watch::channel(None);
        Self {
            reason_tx,
            shutdown_initiated: AtomicBool::new(false),
        }
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Request shutdown. Returns `false` if a shutdown was already initiated.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!(%reason, "Server shutdown requested");
            self.reason_tx.send_replace(Some(reason));
            true
        } else {
            tracing::warn!(%reason, "Shutdown already initiated, ignoring");
            false
        }
    }

    /// Resolve with the first shutdown reason once any source triggers.
    pub async fn wait(&self) -> ShutdownReason {
        let mut receiver = self.reason_tx.subscribe();
        let reason = match receiver.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone(),
            Err(_) => None,
        };
        match reason {
            Some(reason) => reason,
            // The sender lives in `self`, so the channel cannot close while we borrow it.
            None => std::future::pending().await,
        }
    }

    /// Race OS termination signals against explicit triggers.
    ///
    /// A received signal is routed through [`trigger`](Self::trigger), so the
    /// returned reason is always the first one recorded.
    pub async fn wait_for_trigger(&self) -> ShutdownReason {
        tokio::select! {
            biased;

            reason = self.wait() => reason,
            name = wait_for_os_signal() => {
                tracing::info!("Received {name}, initiating graceful shutdown...");
                self.trigger(ShutdownReason::Signal(name));
                self.wait().await
            }
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GracefulShutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GracefulShutdown")
            .field("shutdown_initiated", &self.is_shutdown_initiated())
            .finish()
    }
}

/// Cloneable handle used to request shutdown from anywhere in the host.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    inner: Arc<GracefulShutdown>,
}

impl ShutdownHandle {
    pub(crate) fn new(inner: Arc<GracefulShutdown>) -> Self {
        Self { inner }
    }

    /// Request a graceful shutdown; `source` ends up in the logs.
    pub fn request_shutdown(&self, source: impl Into<String>) -> bool {
        self.inner.trigger(ShutdownReason::Requested(source.into()))
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.inner.is_shutdown_initiated()
    }

    /// Wait until shutdown has been initiated.
    pub async fn wait(&self) -> ShutdownReason {
        self.inner.wait().await
    }
}

async fn wait_for_os_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => "SIGINT",
        () = wait_for_sigterm() => "SIGTERM",
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // On non-Unix systems, we only have Ctrl+C
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn test_graceful_shutdown_creation() {
        let shutdown = GracefulShutdown::new();
        assert!(!shutdown.is_shutdown_initiated());
    }

    #[tokio::test]
    async fn test_first_trigger_wins() {
        let shutdown = GracefulShutdown::new();

        assert!(shutdown.trigger(ShutdownReason::Requested("/shutdown".to_string())));
        assert!(!shutdown.trigger(ShutdownReason::Signal("SIGTERM")));
        assert!(shutdown.is_shutdown_initiated());

        assert_eq!(
            shutdown.wait().await,
            ShutdownReason::Requested("/shutdown".to_string())
        );
    }

    #[tokio::test]
    async fn test_late_waiter_sees_reason() {
        let shutdown = Arc::new(GracefulShutdown::new());
        shutdown.trigger(ShutdownReason::Signal("SIGINT"));

        let reason = timeout(Duration::from_secs(1), shutdown.wait_for_trigger())
            .await
            .unwrap();
        assert_eq!(reason, ShutdownReason::Signal("SIGINT"));
    }

    #[tokio::test]
    async fn test_handle_wakes_waiters() {
        let shutdown = Arc::new(GracefulShutdown::new());
        let handle = ShutdownHandle::new(shutdown.clone());

        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait_for_trigger().await })
        };
        tokio::task::yield_now().await;

        assert!(handle.request_shutdown("test"));
        let reason = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(reason, ShutdownReason::Requested("test".to_string()));
        assert!(handle.is_shutdown_initiated());
    }
}
