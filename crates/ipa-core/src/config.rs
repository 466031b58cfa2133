//! Configuration structures for directory clients.
//!
//! This module provides the configuration used to reach a directory server, including schema
//! handling switches, TLS settings, timeouts and search paging.

use crate::Error;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use validator::{Validate, ValidationError};

/// URI schemes understood by the directory layer.
pub const SUPPORTED_SCHEMES: &[&str] = &["ldap", "ldaps", "ldapi"];

/// Credentials used for a simple bind.
#[derive(Debug, Serialize, Deserialize)]
pub struct BindCredentials {
    /// Bind DN (e.g. `cn=Directory Manager`)
    pub bind_dn: String,

    /// Bind password
    #[serde(skip_serializing)]
    password: SecretString,
}

impl BindCredentials {
    /// Create new bind credentials.
    #[must_use]
    pub fn new(bind_dn: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            bind_dn: bind_dn.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Get the bind DN.
    #[must_use]
    pub fn bind_dn(&self) -> &str {
        &self.bind_dn
    }

    /// Get the bind password.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

/// Configuration for a directory client.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct DirectoryConfig {
    /// Directory server URI (`ldap://`, `ldaps://` or `ldapi://`)
    #[validate(custom(function = "validate_ldap_uri"))]
    pub ldap_uri: String,

    /// Optional credentials for binding right after connecting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<BindCredentials>,

    /// Always refetch schema from the server instead of reusing the cached copy
    #[serde(default)]
    pub force_schema_updates: bool,

    /// Never request schema from the server
    #[serde(default)]
    pub no_schema: bool,

    /// Decode values according to their schema syntax
    #[serde(default = "default_true")]
    pub decode_attrs: bool,

    /// Issue StartTLS after connecting
    #[serde(default)]
    pub start_tls: bool,

    /// Whether to verify TLS certificates
    #[serde(default = "default_true")]
    pub tls_verify: bool,

    /// Optional path to custom CA certificate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_ca_cert: Option<PathBuf>,

    /// Connection timeout in seconds
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,

    /// Per-operation timeout in seconds
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// Page size for paged searches issued without a size limit
    #[validate(range(min = 2, max = 100_000))]
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Pause after a rename so server-side membership plugins can catch up
    #[serde(default = "default_rename_settle_millis")]
    pub rename_settle_millis: u64,
}

const fn default_true() -> bool {
    true
}

const fn default_connection_timeout_secs() -> u64 {
    10
}

const fn default_operation_timeout_secs() -> u64 {
    30
}

const fn default_page_size() -> usize {
    2000
}

const fn default_rename_settle_millis() -> u64 {
    300
}

fn validate_ldap_uri(uri: &str) -> Result<(), ValidationError> {
    let parsed = Url::parse(uri).map_err(|_| ValidationError::new("ldap_uri"))?;
    if SUPPORTED_SCHEMES.contains(&parsed.scheme()) {
        Ok(())
    } else {
        Err(ValidationError::new("ldap_uri_scheme"))
    }
}

impl DirectoryConfig {
    /// Create a new configuration for the given server URI.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the URI is invalid or uses an unsupported scheme.
    pub fn new(ldap_uri: impl Into<String>) -> Result<Self, Error> {
        let config = Self {
            ldap_uri: ldap_uri.into(),
            credentials: None,
            force_schema_updates: false,
            no_schema: false,
            decode_attrs: default_true(),
            start_tls: false,
            tls_verify: default_true(),
            tls_ca_cert: None,
            connection_timeout_secs: default_connection_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            page_size: default_page_size(),
            rename_settle_millis: default_rename_settle_millis(),
        };

        config
            .validate()
            .map_err(|e| Error::ConfigError(format!("Invalid configuration: {e}")))?;

        Ok(config)
    }

    /// Deserialize a configuration from JSON and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the document is malformed or fails validation.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set bind credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: BindCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Always refetch schema on load and after every bind.
    #[must_use]
    pub const fn with_force_schema_updates(mut self, force: bool) -> Self {
        self.force_schema_updates = force;
        self
    }

    /// Disable schema retrieval entirely.
    #[must_use]
    pub const fn with_no_schema(mut self, no_schema: bool) -> Self {
        self.no_schema = no_schema;
        self
    }

    /// Enable or disable schema-driven value decoding.
    #[must_use]
    pub const fn with_decode_attrs(mut self, decode: bool) -> Self {
        self.decode_attrs = decode;
        self
    }

    /// Enable StartTLS.
    #[must_use]
    pub const fn with_start_tls(mut self, start_tls: bool) -> Self {
        self.start_tls = start_tls;
        self
    }

    /// Set whether to verify TLS certificates.
    #[must_use]
    pub const fn with_tls_verify(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Set custom CA certificate path.
    #[must_use]
    pub fn with_ca_cert(mut self, path: PathBuf) -> Self {
        self.tls_ca_cert = Some(path);
        self
    }

    /// Set connection timeout in seconds.
    #[must_use]
    pub const fn with_connection_timeout_secs(mut self, seconds: u64) -> Self {
        self.connection_timeout_secs = seconds;
        self
    }

    /// Set operation timeout in seconds.
    #[must_use]
    pub const fn with_operation_timeout_secs(mut self, seconds: u64) -> Self {
        self.operation_timeout_secs = seconds;
        self
    }

    /// Set the page size used by paged searches.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the pause applied after a rename, in milliseconds.
    #[must_use]
    pub const fn with_rename_settle_millis(mut self, millis: u64) -> Self {
        self.rename_settle_millis = millis;
        self
    }

    /// Get the connection timeout as a Duration.
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Get the operation timeout as a Duration.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Get the post-rename pause as a Duration.
    #[must_use]
    pub const fn rename_settle_delay(&self) -> Duration {
        Duration::from_millis(self.rename_settle_millis)
    }

    /// Parse the server URI.
    ///
    /// # Errors
    ///
    /// Returns an error if the URI cannot be parsed.
    pub fn parse_ldap_uri(&self) -> Result<Url, Error> {
        Ok(Url::parse(&self.ldap_uri)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = DirectoryConfig::new("ldap://ipa.example.com:389").unwrap();
        assert!(!config.force_schema_updates);
        assert!(!config.no_schema);
        assert!(config.decode_attrs);
        assert!(config.tls_verify);
        assert_eq!(config.page_size, 2000);
        assert_eq!(config.connection_timeout(), Duration::from_secs(10));
        assert_eq!(config.rename_settle_delay(), Duration::from_millis(300));
    }

    #[test]
    fn test_config_rejects_unsupported_scheme() {
        let err = DirectoryConfig::new("https://ipa.example.com").unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));

        let err = DirectoryConfig::new("not a uri").unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_builder_overrides() {
        let config = DirectoryConfig::new("ldaps://ipa.example.com")
            .unwrap()
            .with_credentials(BindCredentials::new("cn=Directory Manager", "secret"))
            .with_force_schema_updates(true)
            .with_decode_attrs(false)
            .with_tls_verify(false)
            .with_operation_timeout_secs(5)
            .with_page_size(100)
            .with_rename_settle_millis(0);

        assert!(config.force_schema_updates);
        assert!(!config.decode_attrs);
        assert!(!config.tls_verify);
        assert_eq!(config.operation_timeout(), Duration::from_secs(5));
        assert_eq!(config.page_size, 100);
        assert_eq!(config.rename_settle_delay(), Duration::ZERO);
        let credentials = config.credentials.as_ref().unwrap();
        assert_eq!(credentials.bind_dn(), "cn=Directory Manager");
        assert_eq!(credentials.password(), "secret");
    }

    #[test]
    fn test_from_json_applies_defaults() {
        let config = DirectoryConfig::from_json(
            r#"{
                "ldap_uri": "ldap://ipa.example.com",
                "credentials": {"bind_dn": "cn=Directory Manager", "password": "secret"},
                "page_size": 500
            }"#,
        )
        .unwrap();

        assert_eq!(config.page_size, 500);
        assert!(config.decode_attrs);
        assert_eq!(config.operation_timeout_secs, 30);
        assert_eq!(config.credentials.unwrap().password(), "secret");
    }

    #[test]
    fn test_from_json_validates_ranges() {
        let err = DirectoryConfig::from_json(r#"{"ldap_uri": "ldap://h", "page_size": 1}"#)
            .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_password_is_not_serialized() {
        let config = DirectoryConfig::new("ldap://ipa.example.com")
            .unwrap()
            .with_credentials(BindCredentials::new("cn=Directory Manager", "hunter2"));

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("cn=Directory Manager"));
        assert!(!json.contains("hunter2"));
    }
}
