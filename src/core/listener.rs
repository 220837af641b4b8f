//! The listener: route table, default adapter chain and server lifecycle.
//!
//! Routes are registered during the *configured* phase into an owned table
//! keyed by path and method. [`HttpListener::router`] compiles that table into
//! an [`axum::Router`]; [`HttpListener::start`] binds the servers and blocks
//! until a shutdown has been triggered and every server has drained.
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use axum::{
    Router,
    extract::Request,
    http::{HeaderName, Method, header},
    routing::{MethodFilter, MethodRouter},
};
use eyre::WrapErr;
use thiserror::Error;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::{
    adapters::{
        controllers::{homepage_controller, probe_controller, shutdown_controller},
        middleware::{
            HealthCheckFilter, correlation_adapter, end_authorization_adapter,
            json_content_adapter, logger_adapter, request_id_adapter,
        },
        server::{RunningServer, tls_server_config},
    },
    config::{ValidationError, load_options_from_env, models::ListenerOptions},
    core::{
        adapter::{Adapter, Endpoint, adapt},
        authorization::AuthorizationRequirement,
        context::ExecutionContext,
        path::with_prefix,
        supervisor::Supervisor,
    },
    ports::{http_server::ManagedServer, identity::IdentityProvider},
    utils::graceful_shutdown::{GracefulShutdown, ShutdownHandle},
};

/// Lifecycle of a listener. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Configured,
    Starting,
    Running,
    ShutdownRequested,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configured => "configured",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::ShutdownRequested => "shutdown-requested",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Error type for listener configuration and startup
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ListenerError {
    /// The operation is only legal while the listener is configured
    #[error("Cannot {operation} while the listener is {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
    /// The route template is malformed or conflicts with another route
    #[error("Invalid route '{path}': {reason}")]
    InvalidRoute { path: String, reason: String },
    /// The method cannot be routed
    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(Method),
    /// Authorized registration needs an identity collaborator
    #[error("No authorization context configured")]
    MissingAuthorizationContext,
    /// A listen socket could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// TLS material could not be loaded
    #[error("TLS error: {0}")]
    Tls(String),
    /// Options failed validation
    #[error(transparent)]
    Config(#[from] ValidationError),
}

/// A registered route, kept for introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerRecord {
    pub path: String,
    pub methods: Vec<Method>,
    /// `Some` for authorized registrations
    pub requirement: Option<AuthorizationRequirement>,
}

/// Caller-owned HTTP listener.
///
/// Build one per process, register routes and adapters, then call
/// [`start`](Self::start) as the final step of the host's main routine. To
/// replace a running listener, request shutdown through its
/// [`ShutdownHandle`], wait for `start` to return and build a new one.
pub struct HttpListener {
    options: ListenerOptions,
    context: Arc<ExecutionContext>,
    default_adapters: Vec<Adapter>,
    controllers: Vec<ControllerRecord>,
    routes: BTreeMap<String, HashMap<Method, Endpoint>>,
    templates: matchit::Router<()>,
    servers: Vec<Box<dyn ManagedServer>>,
    shutdown: Arc<GracefulShutdown>,
    state: watch::Sender<LifecycleState>,
}

impl HttpListener {
    /// Create a listener in the configured state with the request id and
    /// correlation adapters installed.
    pub fn new(options: ListenerOptions, context: Arc<ExecutionContext>) -> Self {
        let options = options.normalized();
        let filter = HealthCheckFilter::from_options(&options);
        let default_adapters = vec![
            request_id_adapter(),
            correlation_adapter(context.clone(), filter),
        ];
        let (state, _) = watch::channel(LifecycleState::Configured);

        Self {
            options,
            context,
            default_adapters,
            controllers: Vec::new(),
            routes: BTreeMap::new(),
            templates: matchit::Router::new(),
            servers: Vec::new(),
            shutdown: Arc::new(GracefulShutdown::new()),
            state,
        }
    }

    /// Create a listener from options read out of the environment.
    pub fn from_env(context: Arc<ExecutionContext>) -> eyre::Result<Self> {
        let options = load_options_from_env().wrap_err("Failed to load listener options")?;
        Ok(Self::new(options, context))
    }

    pub fn api_prefix(&self) -> &str {
        &self.options.api_prefix
    }

    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> Result<&mut ListenerOptions, ListenerError> {
        self.ensure_configured("modify options")?;
        Ok(&mut self.options)
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Subscribe to lifecycle transitions.
    pub fn state_watch(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn controllers(&self) -> &[ControllerRecord] {
        &self.controllers
    }

    pub fn default_adapters(&self) -> &[Adapter] {
        &self.default_adapters
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.shutdown.clone())
    }

    /// Mount `GET {prefix}/health/probe`.
    pub fn add_health_check(&mut self) -> Result<&mut Self, ListenerError> {
        self.add_endpoint(probe_controller(), "/health/probe", &[Method::GET])
    }

    pub fn add_logger(&mut self) -> Result<&mut Self, ListenerError> {
        let filter = HealthCheckFilter::from_options(&self.options);
        self.add_adapter(logger_adapter(filter))
    }

    pub fn add_json_content(&mut self) -> Result<&mut Self, ListenerError> {
        self.add_adapter(json_content_adapter())
    }

    /// Mount the homepage now rather than at start.
    pub fn add_default_homepage(&mut self) -> Result<&mut Self, ListenerError> {
        let homepage = homepage_controller(self.context.clone());
        self.add_endpoint(homepage, "/", &[Method::GET])
    }

    /// Let the identity collaborator accept unauthenticated registrations.
    pub fn with_public_user_registration(&mut self) -> Result<&mut Self, ListenerError> {
        self.options_mut()?.public_registration = true;
        Ok(self)
    }

    /// Append `adapter` to the default chain used by later registrations.
    pub fn add_adapter(&mut self, adapter: Adapter) -> Result<&mut Self, ListenerError> {
        self.ensure_configured("add adapter")?;
        self.default_adapters.push(adapter);
        Ok(self)
    }

    /// Register an axum handler at `{prefix}{path}`; no methods means GET.
    pub fn add_controller<H, T>(
        &mut self,
        handler: H,
        path: &str,
        methods: &[Method],
    ) -> Result<&mut Self, ListenerError>
    where
        H: axum::handler::Handler<T, ()>,
        T: 'static,
    {
        self.add_endpoint(Endpoint::from_handler(handler), path, methods)
    }

    /// Register an already erased endpoint with the default chain.
    pub fn add_endpoint(
        &mut self,
        endpoint: Endpoint,
        path: &str,
        methods: &[Method],
    ) -> Result<&mut Self, ListenerError> {
        let adapters = self.default_adapters.clone();
        self.register(endpoint, path, methods, None, &adapters)
    }

    pub(crate) fn register(
        &mut self,
        endpoint: Endpoint,
        path: &str,
        methods: &[Method],
        requirement: Option<AuthorizationRequirement>,
        adapters: &[Adapter],
    ) -> Result<&mut Self, ListenerError> {
        self.ensure_configured("register routes")?;

        let path = with_prefix(&self.options.api_prefix, path);
        let methods = if methods.is_empty() {
            vec![Method::GET]
        } else {
            methods.to_vec()
        };
        for method in &methods {
            MethodFilter::try_from(method.clone())
                .map_err(|_| ListenerError::UnsupportedMethod(method.clone()))?;
        }
        self.validate_template(&path)?;

        let adapted = adapt(endpoint, adapters);
        let table = self.routes.entry(path.clone()).or_default();
        for method in &methods {
            if table.insert(method.clone(), adapted.clone()).is_some() {
                warn!(%method, path = %path, "Route registered again, replacing previous handler");
            }
        }

        info!(
            path = %path,
            methods = ?methods,
            authorized = requirement.is_some(),
            "Registered controller"
        );
        self.controllers.push(ControllerRecord {
            path,
            methods,
            requirement,
        });
        Ok(self)
    }

    fn validate_template(&mut self, path: &str) -> Result<(), ListenerError> {
        if self.routes.contains_key(path) {
            return Ok(());
        }
        insert_template(&mut self.templates, path)
    }

    /// Check a batch of unprefixed paths against the table and each other
    /// without registering anything.
    pub(crate) fn check_templates<'a>(
        &self,
        paths: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ListenerError> {
        let mut templates = self.templates.clone();
        let mut seen = HashSet::new();
        for path in paths {
            let path = with_prefix(&self.options.api_prefix, path);
            if self.routes.contains_key(&path) || !seen.insert(path.clone()) {
                continue;
            }
            insert_template(&mut templates, &path)?;
        }
        Ok(())
    }

    fn has_route(&self, path: &str, method: &Method) -> bool {
        self.routes
            .get(path)
            .is_some_and(|methods| methods.contains_key(method))
    }

    pub(crate) fn ensure_configured(&self, operation: &'static str) -> Result<(), ListenerError> {
        match self.state() {
            LifecycleState::Configured => Ok(()),
            state => Err(ListenerError::InvalidState { operation, state }),
        }
    }

    /// Prepend the session-closing adapter and flag authentication as enabled.
    pub(crate) fn enable_authentication(&mut self, provider: Arc<dyn IdentityProvider>) {
        self.default_adapters
            .insert(0, end_authorization_adapter(provider));
        self.options.enable_authentication = true;
    }

    /// Mount the homepage and shutdown routes unless the host already did.
    fn mount_default_routes(&mut self) -> Result<(), ListenerError> {
        let root = with_prefix(&self.options.api_prefix, "/");
        if !self.has_route(&root, &Method::GET) {
            self.add_default_homepage()?;
        }

        let shutdown = with_prefix(&self.options.api_prefix, "/shutdown");
        let methods: Vec<Method> = [Method::GET, Method::POST]
            .into_iter()
            .filter(|method| !self.has_route(&shutdown, method))
            .collect();
        if !methods.is_empty() {
            let handle = self.shutdown_handle();
            self.add_endpoint(shutdown_controller(handle), "/shutdown", &methods)?;
        }
        Ok(())
    }

    /// Compile the route table into an axum router with CORS applied.
    pub fn router(&self) -> Result<Router, ListenerError> {
        let mut router = Router::new();
        for (path, methods) in &self.routes {
            let mut method_router: MethodRouter = MethodRouter::new();
            for (method, endpoint) in methods {
                let filter = MethodFilter::try_from(method.clone())
                    .map_err(|_| ListenerError::UnsupportedMethod(method.clone()))?;
                let endpoint = endpoint.clone();
                method_router = method_router.on(filter, move |req: Request| endpoint.call(req));
            }
            router = panic::catch_unwind(AssertUnwindSafe(move || {
                router.route(path, method_router)
            }))
            .map_err(|_| ListenerError::InvalidRoute {
                path: path.clone(),
                reason: "rejected by the axum router".to_string(),
            })?;
        }
        Ok(router.layer(cors_layer()))
    }

    /// Serve until a shutdown signal or request arrives, then drain every
    /// server within the configured grace period.
    ///
    /// Fails if the plain HTTP port cannot be bound. TLS problems are logged
    /// and the listener keeps serving plain HTTP.
    pub async fn start(&mut self) -> eyre::Result<()> {
        self.ensure_configured("start")?;
        self.mount_default_routes()?;
        self.set_state(LifecycleState::Starting);
        info!(
            "Starting {} v{}",
            self.context.service_name(),
            self.context.version()
        );

        let router = match self.router() {
            Ok(router) => router,
            Err(e) => {
                self.set_state(LifecycleState::Stopped);
                return Err(e.into());
            }
        };

        let http = match self.start_http(router.clone()).await {
            Ok(server) => server,
            Err(e) => {
                self.set_state(LifecycleState::Stopped);
                return Err(e).wrap_err("Failed to start the http server");
            }
        };
        info!(
            "Api listening on http://{}{}",
            http.local_addr(),
            self.options.api_prefix
        );
        self.servers.push(Box::new(http));

        if self.options.enable_tls {
            match self.start_tls(router).await {
                Ok(https) => {
                    info!(
                        "Api listening on https://{}{}",
                        https.local_addr(),
                        self.options.api_prefix
                    );
                    self.servers.push(Box::new(https));
                }
                Err(e) => error!("There was an error starting the https server: {}", e),
            }
        }

        self.set_state(LifecycleState::Running);

        let supervisor = Supervisor::new(self.shutdown.clone(), self.options.shutdown_timeout());
        let reason = supervisor.wait_for_shutdown().await;
        self.set_state(LifecycleState::ShutdownRequested);
        info!(%reason, "Shutting down {} server(s)", self.servers.len());

        let failures = supervisor.shutdown_all(&mut self.servers).await;
        self.servers.clear();
        self.set_state(LifecycleState::Stopped);

        if failures.is_empty() {
            info!("Server shut down successfully");
        } else {
            warn!("Server shut down with {} error(s)", failures.len());
        }
        Ok(())
    }

    async fn start_http(&self, router: Router) -> Result<RunningServer, ListenerError> {
        let addr = self.options.http_addr()?;
        RunningServer::bind_http(addr, router).await
    }

    async fn start_tls(&self, router: Router) -> Result<RunningServer, ListenerError> {
        let addr = self
            .options
            .tls_addr()
            .map_err(|e| ListenerError::Tls(e.to_string()))?;
        let (certificate, private_key) = self
            .options
            .tls_material()
            .map_err(|e| ListenerError::Tls(e.to_string()))?;
        let config = tls_server_config(&certificate, &private_key)?;
        RunningServer::bind_tls(addr, router, Arc::new(config)).await
    }

    fn set_state(&self, state: LifecycleState) {
        let previous = self.state.send_replace(state);
        tracing::debug!(from = %previous, to = %state, "Listener state changed");
    }
}

impl fmt::Debug for HttpListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpListener")
            .field("state", &self.state())
            .field("options", &self.options)
            .field("default_adapters", &self.default_adapters)
            .field("controllers", &self.controllers.len())
            .field("servers", &self.servers.len())
            .finish()
    }
}

/// Check `path` with the same matcher and segment rules axum applies when
/// the table is compiled, and record it in `templates`.
fn insert_template(templates: &mut matchit::Router<()>, path: &str) -> Result<(), ListenerError> {
    if let Some(segment) = path
        .split('/')
        .find(|segment| segment.starts_with(':') || segment.starts_with('*'))
    {
        return Err(ListenerError::InvalidRoute {
            path: path.to_string(),
            reason: format!("segment '{segment}' is not supported, use '{{name}}' parameters"),
        });
    }
    templates
        .insert(path, ())
        .map_err(|e| ListenerError::InvalidRoute {
            path: path.to_string(),
            reason: e.to_string(),
        })
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            HeaderName::from_static("x-requested-with"),
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
        ])
}
