//! Identity collaborator ports.
//!
//! Token issuance, validation and user persistence live behind these traits.
//! The listener only consumes them: it mounts the endpoints a provider hands
//! out and asks it to authenticate bearer credentials.
use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{config::models::ListenerOptions, core::adapter::Endpoint};

/// Error type for identity collaborator operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdentityError {
    /// No bearer credential was presented
    #[error("Missing bearer credential")]
    MissingCredential,
    /// The credential was presented but could not be validated
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),
    /// The identity backend failed
    #[error("Identity backend error: {0}")]
    Backend(String),
}

/// The authenticated caller behind a validated credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub subject: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub claims: BTreeSet<String>,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn with_claims<I, S>(mut self, claims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.claims.extend(claims.into_iter().map(Into::into));
        self
    }
}

/// A stored user record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub claims: BTreeSet<String>,
}

/// Persistence port for user records.
#[async_trait]
pub trait UserContextAdapter: Send + Sync {
    async fn get_user(&self, id: &str) -> Result<Option<User>, IdentityError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, IdentityError>;

    /// Insert or replace a user, keyed by `id`.
    async fn upsert_user(&self, user: User) -> Result<(), IdentityError>;

    /// Remove a user, returning whether it existed.
    async fn remove_user(&self, id: &str) -> Result<bool, IdentityError>;
}

/// The fixed set of identity endpoints a provider exposes.
#[derive(Clone, Debug)]
pub struct AuthorizationControllers {
    pub token: Endpoint,
    pub introspection: Endpoint,
    pub register: Endpoint,
    pub revoke: Endpoint,
    pub configuration: Endpoint,
    pub jwks: Endpoint,
}

/// IdentityProvider defines the port for credential validation and the
/// identity endpoints mounted by the authorization registrar.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Build the identity endpoints on top of a user store.
    ///
    /// `options` carries listener-level switches such as
    /// `public_registration`.
    fn controllers(
        &self,
        users: Arc<dyn UserContextAdapter>,
        options: &ListenerOptions,
    ) -> AuthorizationControllers;

    /// Validate a bearer credential.
    async fn authenticate(&self, credential: &str) -> Result<Principal, IdentityError>;

    /// Release any per-request authorization state held for `principal`.
    fn end_authorization(&self, _principal: &Principal) {}
}
