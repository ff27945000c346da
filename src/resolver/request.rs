//! Outbound request options shared by the HTTP-backed strategies.
//!
//! TLS verification and client certificates are client-level settings in
//! `reqwest`, so each distinct [`RequestOptions`] gets its own
//! [`reqwest::Client`], built once at construction. Basic auth is applied
//! per request.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Client, Identity, RequestBuilder};
use serde::Deserialize;

use crate::{ResolverError, Result};

/// How requests authenticate against an origin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    #[default]
    None,
    Basic { user: String, password: String },
    ClientCert { cert: PathBuf, key: PathBuf },
}

/// Credential and TLS keys as they appear in configuration.
///
/// A complete `cert`/`key` pair takes precedence over `user`/`pw`; incomplete
/// pairs are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RequestOverrides {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pw: Option<String>,
    #[serde(default)]
    pub cert: Option<PathBuf>,
    #[serde(default)]
    pub key: Option<PathBuf>,
    #[serde(default)]
    pub ssl_check: Option<bool>,
}

impl RequestOverrides {
    /// Credentials these keys specify, if any.
    pub fn credentials(&self) -> Option<Credentials> {
        if let (Some(cert), Some(key)) = (&self.cert, &self.key) {
            return Some(Credentials::ClientCert {
                cert: cert.clone(),
                key: key.clone(),
            });
        }
        if let (Some(user), Some(password)) = (&self.user, &self.pw) {
            return Some(Credentials::Basic {
                user: user.clone(),
                password: password.clone(),
            });
        }
        None
    }
}

/// Resolved per-request options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    pub credentials: Credentials,
    pub verify_tls: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            credentials: Credentials::None,
            verify_tls: true,
        }
    }
}

impl RequestOptions {
    /// Options from generic configuration keys.
    pub fn from_overrides(overrides: &RequestOverrides) -> Self {
        Self::default().merged(overrides)
    }

    /// Apply more specific overrides on top of these options.
    ///
    /// Credentials are replaced as a unit: a template that configures
    /// `user`/`pw` drops an inherited client certificate and vice versa.
    pub fn merged(&self, overrides: &RequestOverrides) -> Self {
        Self {
            credentials: overrides
                .credentials()
                .unwrap_or_else(|| self.credentials.clone()),
            verify_tls: overrides.ssl_check.unwrap_or(self.verify_tls),
        }
    }

    /// Build an HTTP client carrying the TLS side of these options.
    ///
    /// Client certificates are read eagerly so a bad path fails at startup.
    pub fn build_client(&self, timeout: Option<Duration>) -> Result<Client> {
        let mut builder = Client::builder().danger_accept_invalid_certs(!self.verify_tls);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        if let Credentials::ClientCert { cert, key } = &self.credentials {
            builder = builder.identity(load_identity(cert, key)?);
        }
        builder
            .build()
            .map_err(|e| ResolverError::Misconfigured(format!("failed to build HTTP client: {e}")))
    }

    fn basic_auth(&self) -> Option<(String, String)> {
        match &self.credentials {
            Credentials::Basic { user, password } => Some((user.clone(), password.clone())),
            _ => None,
        }
    }
}

fn load_identity(cert: &Path, key: &Path) -> Result<Identity> {
    let read = |path: &Path| {
        std::fs::read(path).map_err(|e| {
            ResolverError::Misconfigured(format!(
                "Unable to read client certificate material {}: {e}",
                path.display()
            ))
        })
    };
    let mut pem = read(cert)?;
    pem.push(b'\n');
    pem.extend(read(key)?);
    Identity::from_pem(&pem).map_err(|e| {
        ResolverError::Misconfigured(format!("Invalid client certificate {}: {e}", cert.display()))
    })
}

/// A client bound to one set of options.
#[derive(Debug, Clone)]
pub struct PreparedClient {
    client: Client,
    basic_auth: Option<(String, String)>,
}

impl PreparedClient {
    pub fn new(options: &RequestOptions, timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            client: options.build_client(timeout)?,
            basic_auth: options.basic_auth(),
        })
    }

    /// Bind this client to a URL.
    pub fn request(&self, url: String) -> SourceRequest {
        SourceRequest {
            url,
            client: self.clone(),
        }
    }
}

/// A fully assembled outbound request for one identifier.
#[derive(Debug, Clone)]
pub struct SourceRequest {
    pub url: String,
    client: PreparedClient,
}

impl SourceRequest {
    pub fn get(&self) -> RequestBuilder {
        self.with_auth(self.client.client.get(&self.url))
    }

    pub fn head(&self) -> RequestBuilder {
        self.with_auth(self.client.client.head(&self.url))
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.client.basic_auth {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        self.client
            .basic_auth
            .as_ref()
            .map(|(user, password)| (user.as_str(), password.as_str()))
    }
}
