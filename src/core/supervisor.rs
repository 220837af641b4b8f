//! Shutdown supervision for the servers owned by a listener.
use std::{sync::Arc, time::Duration};

use futures_util::future::join_all;
use tokio::time::Instant;
use tracing::{error, info};

use crate::{
    ports::http_server::{ManagedServer, ServerError},
    utils::graceful_shutdown::{GracefulShutdown, ShutdownReason},
};

/// Waits for the shutdown signal and drains servers against one deadline.
#[derive(Debug, Clone)]
pub struct Supervisor {
    shutdown: Arc<GracefulShutdown>,
    grace: Duration,
}

impl Supervisor {
    pub fn new(shutdown: Arc<GracefulShutdown>, grace: Duration) -> Self {
        Self { shutdown, grace }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Block until an OS signal or an explicit request triggers shutdown.
    pub async fn wait_for_shutdown(&self) -> ShutdownReason {
        self.shutdown.wait_for_trigger().await
    }

    /// Shut every server down concurrently, sharing a single deadline.
    ///
    /// Failures are logged and returned; they never prevent the remaining
    /// servers from receiving their shutdown call.
    pub async fn shutdown_all(&self, servers: &mut [Box<dyn ManagedServer>]) -> Vec<ServerError> {
        shutdown_all(servers, self.grace).await
    }
}

/// Shut `servers` down concurrently against `Instant::now() + grace`.
pub async fn shutdown_all(
    servers: &mut [Box<dyn ManagedServer>],
    grace: Duration,
) -> Vec<ServerError> {
    let deadline = Instant::now() + grace;

    let results = join_all(servers.iter_mut().map(|server| async move {
        let name = server.name().to_string();
        info!(server = %name, "Shutting down server");
        (name, server.shutdown(deadline).await)
    }))
    .await;

    results
        .into_iter()
        .filter_map(|(name, result)| match result {
            Ok(()) => {
                info!(server = %name, "Server stopped");
                None
            }
            Err(e) => {
                error!(server = %name, "Shutdown request error: {}", e);
                Some(e)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{
        net::SocketAddr,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;

    use super::*;

    struct MockServer {
        name: &'static str,
        fail: bool,
        hang: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ManagedServer for MockServer {
        fn name(&self) -> &str {
            self.name
        }

        fn local_addr(&self) -> SocketAddr {
            SocketAddr::from(([127, 0, 0, 1], 0))
        }

        async fn shutdown(&mut self, deadline: Instant) -> Result<(), ServerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep_until(deadline).await;
                return Err(ServerError::DrainTimeout {
                    server: self.name.to_string(),
                    grace: Duration::ZERO,
                });
            }
            if self.fail {
                return Err(ServerError::Task {
                    server: self.name.to_string(),
                    message: "boom".to_string(),
                });
            }
            Ok(())
        }
    }

    fn server(
        name: &'static str,
        fail: bool,
        hang: bool,
        calls: &Arc<AtomicUsize>,
    ) -> Box<dyn ManagedServer> {
        Box::new(MockServer {
            name,
            fail,
            hang,
            calls: calls.clone(),
        })
    }

    #[tokio::test]
    async fn test_failure_does_not_block_siblings() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut servers = vec![
            server("http", true, false, &calls),
            server("https", false, false, &calls),
        ];

        let errors = shutdown_all(&mut servers, Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ServerError::Task { .. }));
    }

    #[tokio::test]
    async fn test_hanging_server_bounded_by_shared_deadline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut servers = vec![
            server("http", false, true, &calls),
            server("https", false, true, &calls),
        ];

        let started = Instant::now();
        let errors = shutdown_all(&mut servers, Duration::from_millis(200)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(errors.len(), 2);
        // Both servers wait on the same deadline, not one after the other.
        assert!(started.elapsed() < Duration::from_millis(390));
    }

    #[tokio::test]
    async fn test_supervisor_returns_first_reason() {
        let shutdown = Arc::new(GracefulShutdown::new());
        let supervisor = Supervisor::new(shutdown.clone(), Duration::from_secs(1));
        shutdown.trigger(ShutdownReason::Requested("host".to_string()));

        assert_eq!(
            supervisor.wait_for_shutdown().await,
            ShutdownReason::Requested("host".to_string())
        );
        assert_eq!(supervisor.grace(), Duration::from_secs(1));
    }
}
