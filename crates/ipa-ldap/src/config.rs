//! Connection helpers: server URI construction and `ldap3` settings.

use crate::Result;
use ipa_core::{DirectoryConfig, Error};
use ldap3::LdapConnSettings;
use native_tls::{Certificate, TlsConnector};
use std::fmt;
use std::fs;

/// Default port for plain LDAP and StartTLS.
pub const DEFAULT_LDAP_PORT: u16 = 389;
/// Default port for LDAP over TLS.
pub const DEFAULT_LDAPS_PORT: u16 = 636;

/// Transport used to reach the directory server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// `ldap://`, optionally upgraded with StartTLS.
    Ldap,
    /// `ldaps://`.
    Ldaps,
    /// `ldapi://`, the server's local Unix socket.
    Ldapi,
}

impl Protocol {
    /// Picks a transport: ldapi when requested, ldaps when a CA certificate is available,
    /// plain ldap otherwise.
    #[must_use]
    pub const fn guess(has_ca_cert: bool, use_ldapi: bool) -> Self {
        if use_ldapi {
            Self::Ldapi
        } else if has_ca_cert {
            Self::Ldaps
        } else {
            Self::Ldap
        }
    }

    /// URI scheme for this transport.
    #[must_use]
    pub const fn scheme(self) -> &'static str {
        match self {
            Self::Ldap => "ldap",
            Self::Ldaps => "ldaps",
            Self::Ldapi => "ldapi",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Builds the server URI for `host`.
///
/// For ldapi the URI points at the instance socket derived from `realm`
/// (`EXAMPLE.COM` becomes `slapd-EXAMPLE-COM.socket`); host and port are ignored.
///
/// # Errors
///
/// Returns [`Error::ConfigError`] for ldapi without a realm.
pub fn ldap_uri(
    protocol: Protocol,
    host: &str,
    port: Option<u16>,
    realm: Option<&str>,
) -> Result<String> {
    match protocol {
        Protocol::Ldapi => {
            let realm = realm.ok_or_else(|| {
                Error::ConfigError("realm is required for ldapi connections".to_string())
            })?;
            let instance = realm.replace('.', "-");
            Ok(format!("ldapi://%2fvar%2frun%2fslapd-{instance}.socket"))
        }
        Protocol::Ldap | Protocol::Ldaps => {
            let port = port.unwrap_or(if protocol == Protocol::Ldaps {
                DEFAULT_LDAPS_PORT
            } else {
                DEFAULT_LDAP_PORT
            });
            let host = if host.contains(':') && !host.starts_with('[') {
                format!("[{host}]")
            } else {
                host.to_string()
            };
            Ok(format!("{protocol}://{host}:{port}"))
        }
    }
}

pub(crate) fn build_ldap_settings(config: &DirectoryConfig) -> Result<LdapConnSettings> {
    let mut settings = LdapConnSettings::new()
        .set_conn_timeout(config.connection_timeout())
        .set_starttls(config.start_tls);

    if !config.tls_verify {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| {
                Error::ConfigError(format!("failed to construct TLS connector: {err}"))
            })?;
        settings = settings.set_connector(connector).set_no_tls_verify(true);
    } else if let Some(cert_path) = &config.tls_ca_cert {
        let pem = fs::read(cert_path).map_err(|err| {
            Error::ConfigError(format!(
                "failed to read CA certificate {}: {err}",
                cert_path.display()
            ))
        })?;
        let certificate = Certificate::from_pem(&pem)
            .map_err(|err| Error::ConfigError(format!("invalid CA certificate: {err}")))?;
        let connector = TlsConnector::builder()
            .add_root_certificate(certificate)
            .build()
            .map_err(|err| Error::ConfigError(format!("failed to load CA certificate: {err}")))?;
        settings = settings.set_connector(connector);
    }

    Ok(settings)
}
