//! Authorization requirements and the identity route registrar.
//!
//! Roles and claims are explicit sets matched with any-of semantics: a
//! principal passes if it holds at least one required role or at least one
//! required claim. An empty requirement admits any authenticated principal.
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};

use axum::{handler::Handler, http::Method};
use tracing::{error, info, warn};

use crate::{
    adapters::{memory_users::MemoryUserAdapter, middleware::token_authorization_adapter},
    core::{
        adapter::Endpoint,
        listener::{HttpListener, ListenerError},
        path::join_url,
    },
    ports::identity::{Principal, UserContextAdapter},
};

/// Roles allowed to register and revoke users.
pub const SUPERUSER_ROLES: [&str; 2] = ["_su", "_admin"];

/// Roles and claims a principal must satisfy to reach a route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationRequirement {
    roles: BTreeSet<String>,
    claims: BTreeSet<String>,
}

impl AuthorizationRequirement {
    /// Any authenticated principal.
    pub fn authenticated() -> Self {
        Self::default()
    }

    pub fn with_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_roles_and_claims(roles, std::iter::empty::<String>())
    }

    pub fn with_claims<I, S>(claims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_roles_and_claims(std::iter::empty::<String>(), claims)
    }

    pub fn with_roles_and_claims<R, RS, C, CS>(roles: R, claims: C) -> Self
    where
        R: IntoIterator<Item = RS>,
        RS: Into<String>,
        C: IntoIterator<Item = CS>,
        CS: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            claims: claims.into_iter().map(Into::into).collect(),
        }
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn claims(&self) -> &BTreeSet<String> {
        &self.claims
    }

    /// True when no role or claim is required.
    pub fn is_bare(&self) -> bool {
        self.roles.is_empty() && self.claims.is_empty()
    }

    pub fn is_satisfied_by(&self, principal: &Principal) -> bool {
        self.is_bare()
            || !self.roles.is_disjoint(&principal.roles)
            || !self.claims.is_disjoint(&principal.claims)
    }
}

/// Per-request slot holding the principal admitted by the token adapter.
///
/// Inserted by the session-closing adapter; the token adapter records into it
/// and the closing adapter drains it once the response is ready.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationSession(Arc<Mutex<Option<Principal>>>);

impl AuthorizationSession {
    pub fn begin(&self, principal: Principal) {
        let mut slot = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(principal);
    }

    pub fn principal(&self) -> Option<Principal> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Take the recorded principal, leaving the session empty.
    pub fn end(&self) -> Option<Principal> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl HttpListener {
    /// Register `handler` behind bearer authentication only.
    pub fn add_authorized_controller<H, T>(
        &mut self,
        handler: H,
        path: &str,
        methods: &[Method],
    ) -> Result<&mut Self, ListenerError>
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.add_authorized_endpoint(
            Endpoint::from_handler(handler),
            path,
            AuthorizationRequirement::authenticated(),
            methods,
        )
    }

    pub fn add_authorized_controller_with_roles<H, T, I, S>(
        &mut self,
        handler: H,
        path: &str,
        roles: I,
        methods: &[Method],
    ) -> Result<&mut Self, ListenerError>
    where
        H: Handler<T, ()>,
        T: 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_authorized_endpoint(
            Endpoint::from_handler(handler),
            path,
            AuthorizationRequirement::with_roles(roles),
            methods,
        )
    }

    pub fn add_authorized_controller_with_claims<H, T, I, S>(
        &mut self,
        handler: H,
        path: &str,
        claims: I,
        methods: &[Method],
    ) -> Result<&mut Self, ListenerError>
    where
        H: Handler<T, ()>,
        T: 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_authorized_endpoint(
            Endpoint::from_handler(handler),
            path,
            AuthorizationRequirement::with_claims(claims),
            methods,
        )
    }

    pub fn add_authorized_controller_with_roles_and_claims<H, T, R, RS, C, CS>(
        &mut self,
        handler: H,
        path: &str,
        roles: R,
        claims: C,
        methods: &[Method],
    ) -> Result<&mut Self, ListenerError>
    where
        H: Handler<T, ()>,
        T: 'static,
        R: IntoIterator<Item = RS>,
        RS: Into<String>,
        C: IntoIterator<Item = CS>,
        CS: Into<String>,
    {
        self.add_authorized_endpoint(
            Endpoint::from_handler(handler),
            path,
            AuthorizationRequirement::with_roles_and_claims(roles, claims),
            methods,
        )
    }

    /// Register `endpoint` with the default chain plus a token authorization
    /// adapter enforcing `requirement`.
    pub fn add_authorized_endpoint(
        &mut self,
        endpoint: Endpoint,
        path: &str,
        requirement: AuthorizationRequirement,
        methods: &[Method],
    ) -> Result<&mut Self, ListenerError> {
        let provider = self
            .context()
            .authorization()
            .map(|authorization| authorization.provider.clone())
            .ok_or(ListenerError::MissingAuthorizationContext)?;

        let mut adapters = self.default_adapters().to_vec();
        adapters.push(token_authorization_adapter(provider, requirement.clone()));
        self.register(endpoint, path, methods, Some(requirement), &adapters)
    }

    /// Mount the identity endpoints on top of `users` and enable
    /// authentication for routes registered afterwards.
    ///
    /// Without an authorization context this logs an error and registers
    /// nothing.
    pub fn with_authentication(
        &mut self,
        users: Arc<dyn UserContextAdapter>,
    ) -> Result<&mut Self, ListenerError> {
        self.ensure_configured("with_authentication")?;

        let Some(authorization) = self.context().authorization().cloned() else {
            error!("No authorization context configured, authentication stays disabled");
            return Ok(self);
        };
        if self.options().enable_authentication {
            warn!("Authentication already enabled, ignoring");
            return Ok(self);
        }

        let controllers = authorization.provider.controllers(users, self.options());
        let prefix = authorization.options.controller_prefix.as_str();
        let admin = AuthorizationRequirement::with_roles(SUPERUSER_ROLES);
        let discovery = [".well-known", "openid-configuration"];
        let routes = [
            (controllers.token.clone(), join_url(&[prefix, "token"]), Method::POST, None),
            (controllers.token, join_url(&[prefix, "token"]), Method::POST, None),
            (
                controllers.introspection.clone(),
                join_url(&[prefix, "token", "introspect"]),
                Method::POST,
                None,
            ),
            (
                controllers.introspection,
                join_url(&[prefix, "{tenantId}", "token", "introspect"]),
                Method::POST,
                None,
            ),
            (
                controllers.register.clone(),
                join_url(&[prefix, "register"]),
                Method::POST,
                Some(admin.clone()),
            ),
            (
                controllers.register,
                join_url(&[prefix, "{tenantId}", "register"]),
                Method::POST,
                Some(admin.clone()),
            ),
            (
                controllers.revoke.clone(),
                join_url(&[prefix, "revoke"]),
                Method::POST,
                Some(admin.clone()),
            ),
            (
                controllers.revoke,
                join_url(&[prefix, "{tenantId}", "revoke"]),
                Method::POST,
                Some(admin),
            ),
            (
                controllers.configuration.clone(),
                join_url(&[prefix, discovery[0], discovery[1]]),
                Method::GET,
                None,
            ),
            (
                controllers.configuration,
                join_url(&[prefix, "{tenantId}", discovery[0], discovery[1]]),
                Method::GET,
                None,
            ),
            (
                controllers.jwks.clone(),
                join_url(&[prefix, discovery[0], discovery[1], "jwks"]),
                Method::GET,
                None,
            ),
            (
                controllers.jwks,
                join_url(&[prefix, "{tenantId}", discovery[0], discovery[1], "jwks"]),
                Method::GET,
                None,
            ),
        ];

        // All or nothing: a conflict with a host route leaves the table untouched.
        self.check_templates(routes.iter().map(|(_, path, _, _)| path.as_str()))?;
        for (endpoint, path, method, requirement) in routes {
            match requirement {
                Some(requirement) => {
                    self.add_authorized_endpoint(endpoint, &path, requirement, &[method])?
                }
                None => self.add_endpoint(endpoint, &path, &[method])?,
            };
        }

        self.enable_authentication(authorization.provider);
        info!(prefix, "Authentication enabled");
        Ok(self)
    }

    /// [`with_authentication`](Self::with_authentication) backed by an
    /// in-memory user store.
    pub fn with_default_authentication(&mut self) -> Result<&mut Self, ListenerError> {
        self.with_authentication(Arc::new(MemoryUserAdapter::new()))
    }
}
