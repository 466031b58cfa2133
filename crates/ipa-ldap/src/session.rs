//! The protocol session capability used by [`DirectoryClient`](crate::DirectoryClient).
//!
//! A [`DirectorySession`] performs single LDAP operations and reports protocol faults as
//! [`LdapFault`] values. It knows nothing about schema, typed values or entries. The
//! [`Ldap3Session`] implementation speaks to a real server through `ldap3`; tests substitute
//! their own.

use crate::config::build_ldap_settings;
use async_trait::async_trait;
use ipa_core::DirectoryConfig;
use ldap3::controls::{Control, ControlType, PagedResults, RawControl};
use ldap3::{LdapConnAsync, LdapError, Mod, Scope, SearchEntry, SearchOptions};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

/// Represents the search scope for LDAP queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
    /// Base object only.
    Base,
    /// One level below the base.
    OneLevel,
    /// Entire subtree.
    #[default]
    Subtree,
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// LDAP result codes and client-side conditions a session can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCode {
    /// Operation succeeded (0).
    Success,
    /// Server time limit exceeded (3).
    TimeLimitExceeded,
    /// Server size limit exceeded (4).
    SizeLimitExceeded,
    /// Administrative limit exceeded (11).
    AdminLimitExceeded,
    /// Attribute or value to delete does not exist (16).
    NoSuchAttribute,
    /// Constraint violation (19).
    ConstraintViolation,
    /// Value does not match the attribute syntax (21).
    InvalidSyntax,
    /// Target entry does not exist (32).
    NoSuchObject,
    /// Inappropriate authentication (48).
    InappropriateAuth,
    /// Invalid credentials (49).
    InvalidCredentials,
    /// Insufficient access rights (50).
    InsufficientAccess,
    /// Object class violation (65).
    ObjectClassViolation,
    /// Operation not allowed on a non-leaf entry (66).
    NotAllowedOnNonLeaf,
    /// Operation not allowed on an RDN attribute (67).
    NotAllowedOnRdn,
    /// Entry already exists (68).
    AlreadyExists,
    /// The server could not be reached or dropped the connection.
    ServerDown,
    /// Client-side failure, such as a SASL mechanism error.
    LocalError,
    /// The client gave up waiting for a response.
    Timeout,
    /// The filter could not be parsed.
    FilterError,
    /// The connection could not be established.
    ConnectError,
    /// Any other result code.
    Other(u32),
}

impl FaultCode {
    /// Maps an LDAP result code.
    #[must_use]
    pub const fn from_rc(rc: u32) -> Self {
        match rc {
            0 => Self::Success,
            3 => Self::TimeLimitExceeded,
            4 => Self::SizeLimitExceeded,
            11 => Self::AdminLimitExceeded,
            16 => Self::NoSuchAttribute,
            19 => Self::ConstraintViolation,
            21 => Self::InvalidSyntax,
            32 => Self::NoSuchObject,
            48 => Self::InappropriateAuth,
            49 => Self::InvalidCredentials,
            50 => Self::InsufficientAccess,
            65 => Self::ObjectClassViolation,
            66 => Self::NotAllowedOnNonLeaf,
            67 => Self::NotAllowedOnRdn,
            68 => Self::AlreadyExists,
            81 => Self::ServerDown,
            82 => Self::LocalError,
            85 => Self::Timeout,
            87 => Self::FilterError,
            91 => Self::ConnectError,
            other => Self::Other(other),
        }
    }

    /// Standard description of the code.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::TimeLimitExceeded => "Time limit exceeded",
            Self::SizeLimitExceeded => "Size limit exceeded",
            Self::AdminLimitExceeded => "Administrative limit exceeded",
            Self::NoSuchAttribute => "No such attribute",
            Self::ConstraintViolation => "Constraint violation",
            Self::InvalidSyntax => "Invalid syntax",
            Self::NoSuchObject => "No such object",
            Self::InappropriateAuth => "Inappropriate authentication",
            Self::InvalidCredentials => "Invalid credentials",
            Self::InsufficientAccess => "Insufficient access",
            Self::ObjectClassViolation => "Object class violation",
            Self::NotAllowedOnNonLeaf => "Operation not allowed on non-leaf",
            Self::NotAllowedOnRdn => "Operation not allowed on RDN",
            Self::AlreadyExists => "Already exists",
            Self::ServerDown => "Can't contact LDAP server",
            Self::LocalError => "Local error",
            Self::Timeout => "Timed out",
            Self::FilterError => "Bad search filter",
            Self::ConnectError => "Connect error",
            Self::Other(_) => "Unknown error",
        }
    }

    /// Returns true for administrative, size and time limit results.
    #[must_use]
    pub const fn is_limit(self) -> bool {
        matches!(
            self,
            Self::AdminLimitExceeded | Self::SizeLimitExceeded | Self::TimeLimitExceeded
        )
    }
}

/// Protocol fault reported by a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{desc}: {info}")]
pub struct LdapFault {
    /// Result code or client condition.
    pub code: FaultCode,
    /// Short description.
    pub desc: String,
    /// Diagnostic message from the server or client library.
    pub info: String,
}

impl LdapFault {
    /// Creates a fault with the standard description for `code`.
    #[must_use]
    pub fn new(code: FaultCode, info: impl Into<String>) -> Self {
        Self {
            code,
            desc: code.description().to_string(),
            info: info.into(),
        }
    }

    fn from_result(result: &ldap3::LdapResult) -> Self {
        Self::new(FaultCode::from_rc(result.rc), result.text.clone())
    }
}

/// Paged results request state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paging {
    /// Requested page size. Zero asks the server to abandon the cursor.
    pub size: i32,
    /// Cookie from the previous page, empty for the first request.
    pub cookie: Vec<u8>,
}

/// Parameters for one search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    /// Search base.
    pub base: String,
    /// Search scope.
    pub scope: SearchScope,
    /// Filter string.
    pub filter: String,
    /// Attributes to return, `None` for all user attributes.
    pub attrs: Option<Vec<String>>,
    /// Server-side time limit.
    pub time_limit: Option<Duration>,
    /// Server-side size limit, zero for unlimited.
    pub size_limit: i32,
    /// Paged results control, when paging.
    pub paging: Option<Paging>,
}

impl SearchParams {
    /// Creates a search request with no limits and no paging.
    #[must_use]
    pub fn new(base: impl Into<String>, scope: SearchScope, filter: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            scope,
            filter: filter.into(),
            attrs: None,
            time_limit: None,
            size_limit: 0,
            paging: None,
        }
    }

    /// Restricts the returned attributes.
    #[must_use]
    pub fn with_attrs(mut self, attrs: Vec<String>) -> Self {
        self.attrs = Some(attrs);
        self
    }
}

/// Entry as returned by the server: a DN and its attribute byte values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawEntry {
    /// Distinguished name as sent by the server.
    pub dn: String,
    /// Attributes with their values in server order.
    pub attributes: Vec<(String, Vec<Vec<u8>>)>,
}

impl RawEntry {
    /// Values of an attribute (case-insensitive).
    #[must_use]
    pub fn values(&self, attribute: &str) -> Option<&[Vec<u8>]> {
        self.attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, values)| values.as_slice())
    }
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchPage {
    /// Entries in protocol order.
    pub entries: Vec<RawEntry>,
    /// Continuation reference URLs.
    pub referrals: Vec<String>,
    /// Cookie from the paged results response control; empty when there are no more pages.
    pub cookie: Vec<u8>,
    /// Limit fault that ended the search early, with the entries sent before it kept.
    pub truncated_by: Option<LdapFault>,
}

/// LDAP modification request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryModification {
    /// Add attribute values.
    Add {
        /// Attribute to modify.
        attribute: String,
        /// Values to add.
        values: Vec<Vec<u8>>,
    },
    /// Delete attribute values.
    Delete {
        /// Attribute to modify.
        attribute: String,
        /// Values to delete, `None` removes the attribute.
        values: Option<Vec<Vec<u8>>>,
    },
    /// Replace attribute values.
    Replace {
        /// Attribute to modify.
        attribute: String,
        /// Replacement values.
        values: Vec<Vec<u8>>,
    },
}

impl DirectoryModification {
    /// Attribute the modification applies to.
    #[must_use]
    pub fn attribute(&self) -> &str {
        match self {
            Self::Add { attribute, .. }
            | Self::Delete { attribute, .. }
            | Self::Replace { attribute, .. } => attribute,
        }
    }
}

/// Low-level directory operations.
///
/// Implementations report every protocol failure as an [`LdapFault`]; translation into
/// [`ipa_core::Error`] happens in the client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectorySession: Send {
    /// Simple bind with a DN and password.
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<(), LdapFault>;

    /// SASL EXTERNAL bind.
    async fn external_bind(&mut self) -> Result<(), LdapFault>;

    /// Runs a search and returns one page of results.
    async fn search(&mut self, params: &SearchParams) -> Result<SearchPage, LdapFault>;

    /// Adds an entry.
    async fn add(
        &mut self,
        dn: &str,
        attributes: &[(String, Vec<Vec<u8>>)],
    ) -> Result<(), LdapFault>;

    /// Applies modifications to an entry.
    async fn modify(
        &mut self,
        dn: &str,
        modifications: &[DirectoryModification],
    ) -> Result<(), LdapFault>;

    /// Deletes an entry.
    async fn delete(&mut self, dn: &str) -> Result<(), LdapFault>;

    /// Renames an entry within its parent.
    async fn rename(&mut self, dn: &str, new_rdn: &str, delete_old: bool)
        -> Result<(), LdapFault>;

    /// Ends the session.
    async fn unbind(&mut self) -> Result<(), LdapFault>;
}

/// Session backed by an `ldap3` connection.
pub struct Ldap3Session {
    inner: ldap3::Ldap,
    operation_timeout: Duration,
}

impl Ldap3Session {
    /// Opens a connection to the configured server.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::ConnectError`] when the TLS settings are unusable, or the mapped
    /// `ldap3` error when the server cannot be reached.
    pub async fn connect(config: &DirectoryConfig) -> Result<Self, LdapFault> {
        let settings = build_ldap_settings(config)
            .map_err(|err| LdapFault::new(FaultCode::ConnectError, err.to_string()))?;
        let (conn, ldap) = LdapConnAsync::with_settings(settings, &config.ldap_uri)
            .await
            .map_err(map_ldap_error)?;
        ldap3::drive!(conn);
        Ok(Self {
            inner: ldap,
            operation_timeout: config.operation_timeout(),
        })
    }
}

async fn with_deadline<F, T>(limit: Duration, fut: F) -> Result<T, LdapFault>
where
    F: Future<Output = Result<T, LdapError>>,
{
    timeout(limit, fut)
        .await
        .map_err(|_| LdapFault::new(FaultCode::Timeout, "operation timed out"))?
        .map_err(map_ldap_error)
}

fn ensure_success(result: &ldap3::LdapResult) -> Result<(), LdapFault> {
    if result.rc == 0 {
        Ok(())
    } else {
        Err(LdapFault::from_result(result))
    }
}

fn value_set(values: &[Vec<u8>]) -> HashSet<Vec<u8>> {
    values.iter().cloned().collect()
}

#[async_trait]
impl DirectorySession for Ldap3Session {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<(), LdapFault> {
        let result = with_deadline(self.operation_timeout, self.inner.simple_bind(dn, password))
            .await?;
        ensure_success(&result)
    }

    async fn external_bind(&mut self) -> Result<(), LdapFault> {
        let result =
            with_deadline(self.operation_timeout, self.inner.sasl_external_bind()).await?;
        ensure_success(&result)
    }

    async fn search(&mut self, params: &SearchParams) -> Result<SearchPage, LdapFault> {
        let mut options = SearchOptions::new().sizelimit(params.size_limit);
        if let Some(limit) = params.time_limit {
            options = options.timelimit(i32::try_from(limit.as_secs()).unwrap_or(i32::MAX));
        }
        let attrs = params.attrs.clone().unwrap_or_default();

        let ldap = self.inner.with_search_options(options);
        if let Some(paging) = &params.paging {
            ldap.with_controls(vec![RawControl::from(PagedResults {
                size: paging.size,
                cookie: paging.cookie.clone(),
            })]);
        }

        let ldap3::SearchResult(results, result) = with_deadline(
            self.operation_timeout,
            ldap.search(&params.base, params.scope.into(), &params.filter, attrs),
        )
        .await?;

        let mut page = SearchPage::default();
        match FaultCode::from_rc(result.rc) {
            FaultCode::Success => {}
            code if code.is_limit() => page.truncated_by = Some(LdapFault::from_result(&result)),
            _ => return Err(LdapFault::from_result(&result)),
        }

        for ctrl in &result.ctrls {
            if let Control(Some(ControlType::PagedResults), raw) = ctrl {
                page.cookie = raw.parse::<PagedResults>().cookie;
            }
        }

        for entry in results {
            if entry.is_ref() {
                page.referrals.extend(ldap3::parse_refs(entry.0));
                continue;
            }
            let entry = SearchEntry::construct(entry);
            let mut attributes: Vec<(String, Vec<Vec<u8>>)> = entry
                .attrs
                .into_iter()
                .map(|(name, values)| (name, values.into_iter().map(String::into_bytes).collect()))
                .collect();
            attributes.extend(entry.bin_attrs);
            page.entries.push(RawEntry {
                dn: entry.dn,
                attributes,
            });
        }

        Ok(page)
    }

    async fn add(
        &mut self,
        dn: &str,
        attributes: &[(String, Vec<Vec<u8>>)],
    ) -> Result<(), LdapFault> {
        let attrs = attributes
            .iter()
            .map(|(name, values)| (name.as_bytes().to_vec(), value_set(values)))
            .collect::<Vec<_>>();
        let result = with_deadline(self.operation_timeout, self.inner.add(dn, attrs)).await?;
        ensure_success(&result)
    }

    async fn modify(
        &mut self,
        dn: &str,
        modifications: &[DirectoryModification],
    ) -> Result<(), LdapFault> {
        let mods = modifications
            .iter()
            .map(|m| match m {
                DirectoryModification::Add { attribute, values } => {
                    Mod::Add(attribute.as_bytes().to_vec(), value_set(values))
                }
                DirectoryModification::Delete { attribute, values } => Mod::Delete(
                    attribute.as_bytes().to_vec(),
                    values.as_deref().map(value_set).unwrap_or_default(),
                ),
                DirectoryModification::Replace { attribute, values } => {
                    Mod::Replace(attribute.as_bytes().to_vec(), value_set(values))
                }
            })
            .collect::<Vec<_>>();

        let result = with_deadline(self.operation_timeout, self.inner.modify(dn, mods)).await?;
        ensure_success(&result)
    }

    async fn delete(&mut self, dn: &str) -> Result<(), LdapFault> {
        let result = with_deadline(self.operation_timeout, self.inner.delete(dn)).await?;
        ensure_success(&result)
    }

    async fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old: bool,
    ) -> Result<(), LdapFault> {
        let result = with_deadline(
            self.operation_timeout,
            self.inner.modifydn(dn, new_rdn, delete_old, None),
        )
        .await?;
        ensure_success(&result)
    }

    async fn unbind(&mut self) -> Result<(), LdapFault> {
        with_deadline(self.operation_timeout, self.inner.unbind()).await
    }
}

fn map_ldap_error(err: LdapError) -> LdapFault {
    let code = match &err {
        LdapError::LdapResult { result } => return LdapFault::from_result(result),
        LdapError::Timeout { .. } => FaultCode::Timeout,
        LdapError::FilterParsing => FaultCode::FilterError,
        LdapError::Io { .. }
        | LdapError::EndOfStream
        | LdapError::OpSend { .. }
        | LdapError::ResultRecv { .. } => FaultCode::ServerDown,
        LdapError::NativeTLS { .. } | LdapError::UrlParsing { .. } => FaultCode::ConnectError,
        _ => FaultCode::LocalError,
    };
    LdapFault::new(code, err.to_string())
}
