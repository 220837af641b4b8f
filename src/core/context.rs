//! Shared execution context.
//!
//! One [`ExecutionContext`] is created by the host and shared (behind an
//! `Arc`) by the listener and every adapter that needs process-wide state.
use std::{fmt, sync::Arc};

use arc_swap::ArcSwap;

use crate::ports::identity::IdentityProvider;

/// Settings of the identity collaborator.
#[derive(Debug, Clone)]
pub struct AuthorizationOptions {
    /// Path segment under which identity endpoints are mounted.
    pub controller_prefix: String,
    /// Issuer advertised by discovery metadata.
    pub issuer: String,
}

impl Default for AuthorizationOptions {
    fn default() -> Self {
        Self {
            controller_prefix: "auth".to_string(),
            issuer: "httplistener".to_string(),
        }
    }
}

/// Identity collaborator plus its options.
#[derive(Clone)]
pub struct AuthorizationContext {
    pub options: AuthorizationOptions,
    pub provider: Arc<dyn IdentityProvider>,
}

impl AuthorizationContext {
    pub fn new(options: AuthorizationOptions, provider: Arc<dyn IdentityProvider>) -> Self {
        Self { options, provider }
    }
}

impl fmt::Debug for AuthorizationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationContext")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Process-wide context: service identity, correlation id and the optional
/// authorization collaborator.
pub struct ExecutionContext {
    service_name: String,
    version: String,
    correlation_id: ArcSwap<String>,
    authorization: Option<AuthorizationContext>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            service_name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            correlation_id: ArcSwap::from_pointee(new_correlation_id()),
            authorization: None,
        }
    }

    pub fn with_service(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.service_name = name.into();
        self.version = version.into();
        self
    }

    pub fn with_authorization(mut self, authorization: AuthorizationContext) -> Self {
        self.authorization = Some(authorization);
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn authorization(&self) -> Option<&AuthorizationContext> {
        self.authorization.as_ref()
    }

    /// The most recently installed correlation id.
    pub fn correlation_id(&self) -> String {
        self.correlation_id.load().as_ref().clone()
    }

    /// Install a fresh correlation id and return it.
    ///
    /// Concurrent requests may refresh in any order; the returned value is the
    /// one this caller installed.
    pub fn refresh(&self) -> String {
        let id = new_correlation_id();
        self.correlation_id.store(Arc::new(id.clone()));
        id
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("service_name", &self.service_name)
            .field("version", &self.version)
            .field("correlation_id", &self.correlation_id())
            .field("authorization", &self.authorization)
            .finish()
    }
}

fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_installs_new_id() {
        let ctx = ExecutionContext::new();
        let before = ctx.correlation_id();
        let refreshed = ctx.refresh();

        assert_ne!(before, refreshed);
        assert_eq!(ctx.correlation_id(), refreshed);
        assert!(uuid::Uuid::parse_str(&refreshed).is_ok());
    }

    #[test]
    fn test_defaults_to_package_identity() {
        let ctx = ExecutionContext::new();
        assert_eq!(ctx.service_name(), "httplistener");
        assert!(ctx.authorization().is_none());

        let ctx = ctx.with_service("orders", "2.1.0");
        assert_eq!(ctx.service_name(), "orders");
        assert_eq!(ctx.version(), "2.1.0");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refresh_is_safe() {
        let ctx = Arc::new(ExecutionContext::new());
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..32 {
            let ctx = ctx.clone();
            tasks.spawn(async move { ctx.refresh() });
        }

        let mut seen = std::collections::HashSet::new();
        while let Some(id) = tasks.join_next().await {
            assert!(seen.insert(id.unwrap()));
        }
        assert!(seen.contains(&ctx.correlation_id()));
    }
}
