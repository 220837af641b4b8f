//! Type-erased endpoints and the adapter chain composer.
//!
//! An [`Endpoint`] is the uniform shape every route handler is stored in: a
//! shared function from [`Request`] to a boxed response future. Host
//! controllers are ordinary axum handlers (extractors included) and are erased
//! into an `Endpoint` at registration time.
//!
//! An [`Adapter`] transforms one endpoint into another, wrapping behavior
//! around dispatch. [`adapt`] applies an ordered adapter list so that the first
//! adapter is the outermost layer:
//!
//! ```text
//! adapt(h, [a0, a1, a2])  ==  a0(a1(a2(h)))
//!
//! request  ─▶ a0 ─▶ a1 ─▶ a2 ─▶ h
//! response ◀─ a0 ◀─ a1 ◀─ a2 ◀─┘
//! ```
use std::{fmt, future::Future, pin::Pin, sync::Arc};

use axum::{
    extract::Request,
    handler::{Handler, HandlerWithoutStateExt},
    response::{IntoResponse, Response},
};
use tower::ServiceExt;

/// Boxed, sendable response future produced by an [`Endpoint`].
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

type EndpointFn = dyn Fn(Request) -> BoxFuture + Send + Sync + 'static;
type WrapFn = dyn Fn(Endpoint) -> Endpoint + Send + Sync + 'static;

/// A type-erased request handler shared across concurrent requests.
#[derive(Clone)]
pub struct Endpoint(Arc<EndpointFn>);

impl Endpoint {
    /// Build an endpoint from an async function taking the raw request.
    pub fn from_fn<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse + 'static,
    {
        Self(Arc::new(move |req| {
            let fut = f(req);
            Box::pin(async move { fut.await.into_response() })
        }))
    }

    /// Erase any axum handler (including handlers using extractors).
    pub fn from_handler<H, T>(handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        let service = handler.into_service();
        Self::from_fn(move |req: Request| {
            let service = service.clone();
            async move {
                match service.oneshot(req).await {
                    Ok(response) => response,
                    Err(never) => match never {},
                }
            }
        })
    }

    /// Dispatch a request through this endpoint.
    pub fn call(&self, req: Request) -> BoxFuture {
        (self.0)(req)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Endpoint")
    }
}

/// A composable behavior wrapper around an [`Endpoint`].
///
/// Adapters carry a name so the effective chain of a listener can be
/// inspected. Composing the same adapter twice is legal and yields two layers.
#[derive(Clone)]
pub struct Adapter {
    name: &'static str,
    wrap: Arc<WrapFn>,
}

impl Adapter {
    /// Build an adapter from an endpoint transformation.
    pub fn new<F>(name: &'static str, wrap: F) -> Self
    where
        F: Fn(Endpoint) -> Endpoint + Send + Sync + 'static,
    {
        Self {
            name,
            wrap: Arc::new(wrap),
        }
    }

    /// Build an adapter from an async `(request, next)` function, in the same
    /// shape as `axum::middleware::from_fn`.
    pub fn from_fn<F, Fut>(name: &'static str, f: F) -> Self
    where
        F: Fn(Request, Endpoint) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let f = Arc::new(f);
        Self::new(name, move |next: Endpoint| {
            let f = Arc::clone(&f);
            Endpoint::from_fn(move |req| (*f)(req, next.clone()))
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wrap `inner`, producing the adapted endpoint.
    pub fn wrap(&self, inner: Endpoint) -> Endpoint {
        (self.wrap)(inner)
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Adapter").field(&self.name).finish()
    }
}

/// Compose `adapters` around `endpoint`; the first adapter runs first.
pub fn adapt(endpoint: Endpoint, adapters: &[Adapter]) -> Endpoint {
    adapters
        .iter()
        .rev()
        .fold(endpoint, |inner, adapter| adapter.wrap(inner))
}
