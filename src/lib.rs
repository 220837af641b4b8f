//! httplistener - an embeddable HTTP listener runtime.
//!
//! The crate gives a service a ready-made HTTP front: a route table with a
//! shared chain of adapters (request ids, correlation, logging, content type),
//! bearer-token authorization delegated to a pluggable identity collaborator,
//! and a lifecycle that serves plain HTTP plus optional TLS until an OS signal
//! or an explicit request triggers a bounded graceful shutdown.
//!
//! # Features
//! - Adapter chains composed outermost-first, applied to every route
//! - Plain and authorized route registration (roles and claims, any-of)
//! - Identity endpoint registrar (token, introspection, registration, discovery)
//! - HTTP/1.1 + HTTP/2, with TLS from base64 encoded PEM material
//! - Signal or `/shutdown` driven graceful shutdown with a shared deadline
//! - Structured logging via `tracing`
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use httplistener::{ExecutionContext, HttpListener, config::ListenerOptions};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let context = Arc::new(ExecutionContext::new());
//! let mut listener = HttpListener::new(ListenerOptions::default(), context);
//! listener
//!     .add_health_check()?
//!     .add_logger()?
//!     .add_controller(|| async { "hello" }, "/hello", &[])?;
//! listener.start().await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! **Ports** (traits for the identity collaborator and managed servers) are
//! separated from **adapters** (middleware, built-in controllers, the server
//! tasks and the in-memory user store). The listener, route registration and
//! shutdown supervision live in `core`.
//!
//! # Error Handling
//! Registration returns [`ListenerError`]; `start` and configuration loading
//! return `eyre::Result<T>` with context attached using `WrapErr`.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::MemoryUserAdapter,
    core::{
        Adapter, AuthorizationContext, AuthorizationOptions, AuthorizationRequirement,
        Endpoint, ExecutionContext, HttpListener, LifecycleState, ListenerError,
    },
    ports::identity::{IdentityProvider, Principal, UserContextAdapter},
    utils::{GracefulShutdown, ShutdownHandle},
};
