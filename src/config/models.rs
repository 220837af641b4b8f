//! Configuration data structures for the listener.
//!
//! [`ListenerOptions`] maps directly to environment variables (`HTTP_PORT`,
//! `ENABLE_TLS`, ...) and to YAML / JSON / TOML files. Every field has a
//! default so a bare environment yields a working plain-HTTP listener on
//! port 5000.
use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use crate::{
    config::validation::{ValidationError, ValidationResult},
    core::path::join_url,
};

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_HTTP_PORT: &str = "5000";
pub const DEFAULT_TLS_PORT: &str = "5001";
pub const DEFAULT_DATABASE_NAME: &str = "users";
pub const DEFAULT_HEALTH_CHECK_PATTERN: &str = "health";
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Listener configuration snapshot.
///
/// Read once when the listener is constructed. Mutation is only accepted
/// while the listener is still being configured.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ListenerOptions {
    /// IP address both servers bind to
    pub bind_address: String,
    /// Plain HTTP port
    pub http_port: String,
    /// Start a second server terminating TLS
    pub enable_tls: bool,
    /// TLS port
    pub tls_port: String,
    /// Base64 encoded PEM certificate chain
    pub tls_certificate: Option<String>,
    /// Base64 encoded PEM private key
    pub tls_private_key: Option<String>,
    /// Global prefix joined in front of every route
    pub api_prefix: String,
    /// Name of the user database handed to identity collaborators
    pub database_name: String,
    /// Set once the authorization routes are mounted
    pub enable_authentication: bool,
    /// Log requests whose path matches `health_check_pattern`
    pub log_health_checks: bool,
    /// Allow anonymous user registration (consumed by identity providers)
    pub public_registration: bool,
    /// Regex identifying health-check paths
    pub health_check_pattern: String,
    /// Grace period for draining servers on shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            http_port: DEFAULT_HTTP_PORT.to_string(),
            enable_tls: false,
            tls_port: DEFAULT_TLS_PORT.to_string(),
            tls_certificate: None,
            tls_private_key: None,
            api_prefix: String::new(),
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            enable_authentication: false,
            log_health_checks: false,
            public_registration: false,
            health_check_pattern: DEFAULT_HEALTH_CHECK_PATTERN.to_string(),
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl ListenerOptions {
    /// Replace blank values with defaults and normalise the API prefix.
    pub fn normalized(mut self) -> Self {
        fn or_default(value: &mut String, default: &str) {
            if value.trim().is_empty() {
                *value = default.to_string();
            }
        }

        or_default(&mut self.bind_address, DEFAULT_BIND_ADDRESS);
        or_default(&mut self.http_port, DEFAULT_HTTP_PORT);
        or_default(&mut self.tls_port, DEFAULT_TLS_PORT);
        or_default(&mut self.database_name, DEFAULT_DATABASE_NAME);
        or_default(&mut self.health_check_pattern, DEFAULT_HEALTH_CHECK_PATTERN);

        self.tls_certificate = self.tls_certificate.filter(|v| !v.trim().is_empty());
        self.tls_private_key = self.tls_private_key.filter(|v| !v.trim().is_empty());

        let prefix = join_url(&[self.api_prefix.as_str()]);
        self.api_prefix = if prefix == "/" { String::new() } else { prefix };
        self
    }

    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    pub fn with_http_port(mut self, port: impl Into<String>) -> Self {
        self.http_port = port.into();
        self
    }

    pub fn with_api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = prefix.into();
        self.normalized()
    }

    /// Enable TLS with base64 encoded PEM material.
    pub fn with_tls(
        mut self,
        port: impl Into<String>,
        certificate: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        self.enable_tls = true;
        self.tls_port = port.into();
        self.tls_certificate = Some(certificate.into());
        self.tls_private_key = Some(private_key.into());
        self
    }

    pub fn with_log_health_checks(mut self, enabled: bool) -> Self {
        self.log_health_checks = enabled;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_secs = timeout.as_secs();
        self
    }

    pub fn http_addr(&self) -> ValidationResult<SocketAddr> {
        socket_addr(&self.bind_address, &self.http_port, "http_port")
    }

    pub fn tls_addr(&self) -> ValidationResult<SocketAddr> {
        socket_addr(&self.bind_address, &self.tls_port, "tls_port")
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Decode the base64 certificate and key into PEM bytes.
    pub fn tls_material(&self) -> ValidationResult<(Vec<u8>, Vec<u8>)> {
        let certificate = decode_pem(self.tls_certificate.as_deref(), "tls_certificate")?;
        let private_key = decode_pem(self.tls_private_key.as_deref(), "tls_private_key")?;
        Ok((certificate, private_key))
    }
}

fn socket_addr(host: &str, port: &str, field: &str) -> ValidationResult<SocketAddr> {
    let ip: IpAddr = host
        .parse()
        .map_err(|_| ValidationError::InvalidListenAddress {
            address: host.to_string(),
            reason: "Must be an IP address (e.g., '0.0.0.0' or '127.0.0.1')".to_string(),
        })?;
    let port: u16 = port.parse().map_err(|_| ValidationError::InvalidField {
        field: field.to_string(),
        message: format!("'{port}' is not a valid port"),
    })?;
    Ok(SocketAddr::new(ip, port))
}

fn decode_pem(value: Option<&str>, field: &str) -> ValidationResult<Vec<u8>> {
    let value = value.ok_or_else(|| ValidationError::MissingField {
        field: field.to_string(),
    })?;
    STANDARD
        .decode(value.trim())
        .map_err(|e| ValidationError::InvalidTls {
            message: format!("{field} is not valid base64: {e}"),
        })
}
