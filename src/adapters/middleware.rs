//! Built-in adapters applied around every route.
//!
//! Each function returns an [`Adapter`] implementing one cross-cutting
//! concern. They stay stateless apart from the shared context or identity
//! collaborator they are constructed with, so any of them can be tested on
//! its own by composing it around a trivial endpoint.
use std::sync::Arc;

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use regex::Regex;
use tracing::Instrument;

use crate::{
    config::models::{DEFAULT_HEALTH_CHECK_PATTERN, ListenerOptions},
    core::{
        adapter::{Adapter, Endpoint},
        authorization::{AuthorizationRequirement, AuthorizationSession},
        context::ExecutionContext,
    },
    ports::identity::{IdentityError, IdentityProvider},
    tracing_setup::create_request_span,
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Per-request identifier, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Correlation id observed by this request, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

/// The request id stamped by [`request_id_adapter`], if it ran.
pub fn request_id(req: &Request) -> Option<&str> {
    req.extensions()
        .get::<RequestId>()
        .map(|RequestId(id)| id.as_str())
}

/// Decides whether a request is logged, muting health-check traffic unless
/// health-check logging is enabled.
#[derive(Debug, Clone)]
pub struct HealthCheckFilter {
    /// `None` falls back to a plain substring match on the default pattern
    pattern: Option<Regex>,
    log_health_checks: bool,
}

impl HealthCheckFilter {
    pub fn new(pattern: &str, log_health_checks: bool) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Some(Regex::new(pattern)?),
            log_health_checks,
        })
    }

    /// Build from options, falling back to the default pattern if the
    /// configured one does not compile.
    pub fn from_options(options: &ListenerOptions) -> Self {
        Self::new(&options.health_check_pattern, options.log_health_checks).unwrap_or_else(|e| {
            tracing::warn!(
                "Invalid health check pattern '{}': {}. Using '{}'",
                options.health_check_pattern,
                e,
                DEFAULT_HEALTH_CHECK_PATTERN
            );
            Self {
                pattern: None,
                log_health_checks: options.log_health_checks,
            }
        })
    }

    pub fn is_health_check(&self, path: &str) -> bool {
        match &self.pattern {
            Some(pattern) => pattern.is_match(path),
            None => path.contains(DEFAULT_HEALTH_CHECK_PATTERN),
        }
    }

    pub fn should_log(&self, path: &str) -> bool {
        self.log_health_checks || !self.is_health_check(path)
    }
}

/// Generate a per-request UUID, expose it via tracing, request extensions and
/// the `X-Request-Id` header on both request and response.
pub fn request_id_adapter() -> Adapter {
    Adapter::from_fn("request_id", |mut req: Request, next: Endpoint| async move {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = create_request_span(req.method().as_str(), req.uri().path(), &request_id);

        let header_value = HeaderValue::from_str(&request_id).ok();
        if let Some(value) = &header_value {
            req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
        }
        req.extensions_mut().insert(RequestId(request_id));

        let mut response = next.call(req).instrument(span).await;

        if let Some(value) = header_value {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    })
}

/// Refresh the shared correlation id, log it and propagate it as
/// `X-Correlation-Id`.
pub fn correlation_adapter(context: Arc<ExecutionContext>, filter: HealthCheckFilter) -> Adapter {
    let filter = Arc::new(filter);
    Adapter::from_fn("correlation", move |mut req: Request, next: Endpoint| {
        let context = context.clone();
        let filter = filter.clone();
        async move {
            let correlation_id = context.refresh();

            if filter.should_log(req.uri().path()) {
                tracing::info!(
                    correlation_id = %correlation_id,
                    "Http request with correlation {}",
                    correlation_id
                );
            }

            let header_value = HeaderValue::from_str(&correlation_id).ok();
            if let Some(value) = &header_value {
                req.headers_mut().insert(CORRELATION_ID_HEADER, value.clone());
            }
            req.extensions_mut().insert(CorrelationId(correlation_id));

            let mut response = next.call(req).await;

            if let Some(value) = header_value {
                response.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
            response
        }
    })
}

/// Log method, path and host of every request that is not muted by `filter`.
pub fn logger_adapter(filter: HealthCheckFilter) -> Adapter {
    let filter = Arc::new(filter);
    Adapter::from_fn("logger", move |req: Request, next: Endpoint| {
        let filter = filter.clone();
        async move {
            if filter.should_log(req.uri().path()) {
                let host = req
                    .headers()
                    .get(header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .or_else(|| req.uri().host())
                    .unwrap_or("-");
                tracing::info!(
                    request_id = request_id(&req).unwrap_or("-"),
                    method = %req.method(),
                    path = req.uri().path(),
                    host,
                    "[{}] {} from {}",
                    req.method(),
                    req.uri().path(),
                    host
                );
            }
            next.call(req).await
        }
    })
}

/// Force `Content-Type: application/json` on the response, dropping any
/// value the handler set.
pub fn json_content_adapter() -> Adapter {
    Adapter::from_fn("json_content", |req: Request, next: Endpoint| async move {
        let mut response = next.call(req).await;
        let headers = response.headers_mut();
        headers.remove(header::CONTENT_TYPE);
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(JSON_CONTENT_TYPE),
        );
        response
    })
}

/// Reject the request unless it carries a bearer credential that the identity
/// provider accepts and whose principal satisfies `requirement`.
///
/// Missing or invalid credentials yield `401`, an authenticated principal
/// lacking every required role and claim yields `403`. On success the
/// [`Principal`](crate::ports::identity::Principal) is inserted into the
/// request extensions and recorded in the request's [`AuthorizationSession`].
pub fn token_authorization_adapter(
    provider: Arc<dyn IdentityProvider>,
    requirement: AuthorizationRequirement,
) -> Adapter {
    let requirement = Arc::new(requirement);
    Adapter::from_fn("token_authorization", move |mut req: Request, next: Endpoint| {
        let provider = provider.clone();
        let requirement = requirement.clone();
        async move {
            let Some(credential) = bearer_token(req.headers()) else {
                return unauthorized(&IdentityError::MissingCredential);
            };

            let principal = match provider.authenticate(&credential).await {
                Ok(principal) => principal,
                Err(e) => {
                    match &e {
                        IdentityError::Backend(_) => {
                            tracing::error!(path = req.uri().path(), "Token validation failed: {}", e)
                        }
                        _ => tracing::warn!(path = req.uri().path(), "Rejected credential: {}", e),
                    }
                    return unauthorized(&e);
                }
            };

            if !requirement.is_satisfied_by(&principal) {
                tracing::warn!(
                    subject = %principal.subject,
                    path = req.uri().path(),
                    "Principal lacks required roles or claims"
                );
                return forbidden(&requirement);
            }

            if let Some(session) = req.extensions().get::<AuthorizationSession>() {
                session.begin(principal.clone());
            }
            req.extensions_mut().insert(principal);
            next.call(req).await
        }
    })
}

/// Outermost adapter once authentication is enabled: opens an
/// [`AuthorizationSession`] for the request and closes it with the identity
/// provider after the rest of the chain has produced a response.
pub fn end_authorization_adapter(provider: Arc<dyn IdentityProvider>) -> Adapter {
    Adapter::from_fn("end_authorization", move |mut req: Request, next: Endpoint| {
        let provider = provider.clone();
        async move {
            let session = AuthorizationSession::default();
            req.extensions_mut().insert(session.clone());

            let response = next.call(req).await;

            if let Some(principal) = session.end() {
                provider.end_authorization(&principal);
                tracing::debug!(subject = %principal.subject, "Authorization session closed");
            }
            response
        }
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

fn unauthorized(error: &IdentityError) -> Response {
    let body = serde_json::json!({
        "error": "unauthorized",
        "message": error.to_string(),
    });
    (
        StatusCode::UNAUTHORIZED,
        [
            (header::WWW_AUTHENTICATE, "Bearer"),
            (header::CONTENT_TYPE, JSON_CONTENT_TYPE),
        ],
        body.to_string(),
    )
        .into_response()
}

fn forbidden(requirement: &AuthorizationRequirement) -> Response {
    let body = serde_json::json!({
        "error": "forbidden",
        "message": "Insufficient roles or claims",
        "roles": requirement.roles(),
        "claims": requirement.claims(),
    });
    (
        StatusCode::FORBIDDEN,
        [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)],
        body.to_string(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::{body::Body, http::HeaderName};

    use super::*;
    use crate::{
        core::adapter::adapt,
        ports::identity::{AuthorizationControllers, Principal, UserContextAdapter},
    };

    /// Accepts `Bearer <subject>:<role>` credentials.
    #[derive(Default)]
    struct StubIdentity {
        ended: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl IdentityProvider for StubIdentity {
        fn controllers(
            &self,
            _users: Arc<dyn UserContextAdapter>,
            _options: &ListenerOptions,
        ) -> AuthorizationControllers {
            let ok = Endpoint::from_fn(|_req| async { StatusCode::OK });
            AuthorizationControllers {
                token: ok.clone(),
                introspection: ok.clone(),
                register: ok.clone(),
                revoke: ok.clone(),
                configuration: ok.clone(),
                jwks: ok,
            }
        }

        async fn authenticate(&self, credential: &str) -> Result<Principal, IdentityError> {
            match credential.split_once(':') {
                Some((subject, role)) => Ok(Principal::new(subject).with_roles([role])),
                None => Err(IdentityError::InvalidCredential("malformed".to_string())),
            }
        }

        fn end_authorization(&self, principal: &Principal) {
            self.ended.lock().unwrap().push(principal.subject.clone());
        }
    }

    fn ok_endpoint() -> Endpoint {
        Endpoint::from_fn(|_req| async { (StatusCode::OK, "ok") })
    }

    fn request(uri: &str) -> Request {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn authorized(uri: &str, credential: &str) -> Request {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {credential}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_request_id_adapter() {
        let endpoint = Endpoint::from_fn(|req: Request| async move {
            let id = request_id(&req).unwrap().to_string();
            assert_eq!(req.headers().get(REQUEST_ID_HEADER).unwrap(), id.as_str());
            id
        });
        let composed = adapt(endpoint, &[request_id_adapter()]);

        let response = composed.call(request("/")).await;
        let header = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(uuid::Uuid::parse_str(&header).is_ok());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], header.as_bytes());
    }

    #[tokio::test]
    async fn test_request_ids_are_unique() {
        let composed = adapt(ok_endpoint(), &[request_id_adapter()]);
        let first = composed.call(request("/")).await;
        let second = composed.call(request("/")).await;
        assert_ne!(
            first.headers().get(REQUEST_ID_HEADER),
            second.headers().get(REQUEST_ID_HEADER)
        );
    }

    #[tokio::test]
    async fn test_correlation_adapter_refreshes_context() {
        let context = Arc::new(ExecutionContext::new());
        let before = context.correlation_id();
        let filter = HealthCheckFilter::new("health", false).unwrap();
        let composed = adapt(
            Endpoint::from_fn(|req: Request| async move {
                req.extensions().get::<CorrelationId>().unwrap().0.clone()
            }),
            &[correlation_adapter(context.clone(), filter)],
        );

        let response = composed.call(request("/orders")).await;
        let header = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert_ne!(header, before);
        assert_eq!(header, context.correlation_id());
    }

    #[test]
    fn test_health_check_filter() {
        let muted = HealthCheckFilter::new("health", false).unwrap();
        assert!(!muted.should_log("/health/probe"));
        assert!(!muted.should_log("/api/health"));
        assert!(muted.should_log("/users"));
        // Only the literal pattern counts, not its individual characters.
        assert!(muted.should_log("/the"));

        let verbose = HealthCheckFilter::new("health", true).unwrap();
        assert!(verbose.should_log("/health/probe"));

        let options = ListenerOptions {
            health_check_pattern: "(".to_string(),
            ..ListenerOptions::default()
        };
        let fallback = HealthCheckFilter::from_options(&options);
        assert!(fallback.is_health_check("/health/probe"));
        assert!(!fallback.is_health_check("/heal"));
    }

    #[tokio::test]
    async fn test_json_content_adapter_replaces_header() {
        let endpoint = Endpoint::from_fn(|_req| async {
            let mut response = "plain".into_response();
            response.headers_mut().append(
                HeaderName::from_static("content-type"),
                HeaderValue::from_static("text/html"),
            );
            response
        });
        let composed = adapt(endpoint, &[json_content_adapter()]);

        let response = composed.call(request("/")).await;
        let values: Vec<_> = response
            .headers()
            .get_all(header::CONTENT_TYPE)
            .iter()
            .collect();
        assert_eq!(values, vec![HeaderValue::from_static(JSON_CONTENT_TYPE)]);
    }

    #[tokio::test]
    async fn test_token_adapter_requires_credential() {
        let provider: Arc<dyn IdentityProvider> = Arc::new(StubIdentity::default());
        let composed = adapt(
            ok_endpoint(),
            &[token_authorization_adapter(
                provider,
                AuthorizationRequirement::authenticated(),
            )],
        );

        let response = composed.call(request("/secure")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );

        let response = composed.call(authorized("/secure", "garbage")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = composed.call(authorized("/secure", "alice:reader")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_token_adapter_enforces_roles() {
        let provider: Arc<dyn IdentityProvider> = Arc::new(StubIdentity::default());
        let composed = adapt(
            Endpoint::from_fn(|req: Request| async move {
                req.extensions().get::<Principal>().unwrap().subject.clone()
            }),
            &[token_authorization_adapter(
                provider,
                AuthorizationRequirement::with_roles(["_su", "_admin"]),
            )],
        );

        let response = composed.call(authorized("/register", "bob:reader")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = composed.call(authorized("/register", "root:_admin")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"root");
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn test_end_authorization_closes_session_after_rejection_and_success() {
        let stub = Arc::new(StubIdentity::default());
        let provider: Arc<dyn IdentityProvider> = stub.clone();
        let composed = adapt(
            ok_endpoint(),
            &[
                end_authorization_adapter(provider.clone()),
                token_authorization_adapter(
                    provider,
                    AuthorizationRequirement::with_roles(["_admin"]),
                ),
            ],
        );

        let response = composed.call(authorized("/x", "carol:_admin")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*stub.ended.lock().unwrap(), vec!["carol".to_string()]);

        // Rejected before a principal was recorded: nothing to close.
        let response = composed.call(authorized("/x", "dave:reader")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(stub.ended.lock().unwrap().len(), 1);
    }
}
