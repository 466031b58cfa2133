//! Directory client: searches, entry CRUD and error translation on top of a session.

use crate::codec::TypeCodec;
use crate::dn::{Dn, Rdn};
use crate::entry::Entry;
use crate::filter::{make_filter, FilterOptions, MatchRule};
use crate::schema::Schema;
use crate::schema_cache::SchemaCache;
use crate::session::{
    DirectorySession, FaultCode, Ldap3Session, LdapFault, Paging, RawEntry, SearchParams,
    SearchScope,
};
use crate::value::Value;
use crate::Result;
use ipa_core::{DirectoryConfig, Error};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_FILTER: &str = "(objectClass=*)";
const UNIQUENESS_VIOLATION: &str = "Another entry with the same attribute value already exists";

/// Parameters for [`DirectoryClient::find_entries`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchRequest {
    /// Search base; the root DN when not set.
    pub base: Dn,
    /// Search scope.
    pub scope: SearchScope,
    /// Filter string; empty or `None` matches every entry.
    pub filter: Option<String>,
    /// Attributes to return, `None` for all.
    pub attrs: Option<Vec<String>>,
    /// Server-side time limit; `None` or zero is unlimited.
    pub time_limit: Option<Duration>,
    /// Server-side size limit; `None` or zero is unlimited.
    pub size_limit: Option<i32>,
    /// Return continuation references instead of skipping them.
    pub search_refs: bool,
    /// Use the paged results control.
    pub paged_search: bool,
}

impl SearchRequest {
    /// Subtree search under `base`.
    #[must_use]
    pub fn new(base: Dn) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }

    /// Sets the scope.
    #[must_use]
    pub const fn scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the filter.
    #[must_use]
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Restricts the returned attributes.
    #[must_use]
    pub fn attrs<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attrs = Some(attrs.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the server-side time limit.
    #[must_use]
    pub const fn time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    /// Sets the server-side size limit.
    #[must_use]
    pub const fn size_limit(mut self, limit: i32) -> Self {
        self.size_limit = Some(limit);
        self
    }

    /// Returns continuation references with the results.
    #[must_use]
    pub const fn search_refs(mut self, enabled: bool) -> Self {
        self.search_refs = enabled;
        self
    }

    /// Pages through the results with the paged results control.
    #[must_use]
    pub const fn paged(mut self, enabled: bool) -> Self {
        self.paged_search = enabled;
        self
    }
}

/// Outcome of [`DirectoryClient::find_entries`].
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    /// Matching entries in the order the server sent them.
    pub entries: Vec<Entry>,
    /// True when a server limit cut the results short.
    pub truncated: bool,
    /// Continuation reference URLs, only collected with [`SearchRequest::search_refs`].
    pub referrals: Vec<String>,
}

/// Schema-aware client for one directory session.
///
/// Operations run sequentially on the wrapped session. Every protocol fault is translated into
/// an [`ipa_core::Error`] before it is returned.
pub struct DirectoryClient {
    config: Arc<DirectoryConfig>,
    session: Box<dyn DirectorySession>,
    schema_cache: Arc<SchemaCache>,
    codec: Arc<TypeCodec>,
}

impl DirectoryClient {
    /// Wraps an established session and loads the server schema through it.
    ///
    /// A schema that cannot be retrieved is logged and the client continues without one.
    pub async fn new(
        config: DirectoryConfig,
        session: Box<dyn DirectorySession>,
        schema_cache: Arc<SchemaCache>,
    ) -> Self {
        let mut client = Self::from_parts(config, session, schema_cache);
        client.load_schema(false).await;
        client
    }

    /// Connects to the configured server, binds with the configured credentials if any, and
    /// loads the schema.
    ///
    /// # Errors
    ///
    /// Returns the translated connection or bind failure.
    pub async fn connect(
        config: DirectoryConfig,
        schema_cache: Arc<SchemaCache>,
    ) -> Result<Self> {
        let session = Ldap3Session::connect(&config)
            .await
            .map_err(|fault| translate_fault(&config.ldap_uri, fault, None))?;
        let credentials = config
            .credentials
            .as_ref()
            .map(|c| (c.bind_dn().to_string(), c.password().to_string()));

        let mut client = Self::from_parts(config, Box::new(session), schema_cache);
        match credentials {
            Some((bind_dn, password)) => client.simple_bind(&bind_dn, &password).await?,
            None => client.load_schema(false).await,
        }
        Ok(client)
    }

    fn from_parts(
        config: DirectoryConfig,
        session: Box<dyn DirectorySession>,
        schema_cache: Arc<SchemaCache>,
    ) -> Self {
        let codec = Arc::new(TypeCodec::new(None, config.decode_attrs));
        Self {
            config: Arc::new(config),
            session,
            schema_cache,
            codec,
        }
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Codec for entries created by this client.
    #[must_use]
    pub fn codec(&self) -> &Arc<TypeCodec> {
        &self.codec
    }

    /// Server schema, if it was loaded.
    #[must_use]
    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.codec.schema()
    }

    /// Shared schema cache.
    #[must_use]
    pub fn schema_cache(&self) -> &Arc<SchemaCache> {
        &self.schema_cache
    }

    /// Simple bind. The schema is reloaded since its visibility depends on the bound identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccessDenied`] for bad credentials, or another translated fault.
    pub async fn simple_bind(&mut self, bind_dn: &str, password: &str) -> Result<()> {
        self.session
            .simple_bind(bind_dn, password)
            .await
            .map_err(|fault| translate_fault(&self.config.ldap_uri, fault, None))?;
        self.schema_cache.flush(&self.config.ldap_uri);
        self.load_schema(false).await;
        Ok(())
    }

    /// SASL EXTERNAL bind, used for ldapi autobind. Reloads the schema.
    ///
    /// # Errors
    ///
    /// Returns the translated bind failure.
    pub async fn external_bind(&mut self) -> Result<()> {
        self.session
            .external_bind()
            .await
            .map_err(|fault| translate_fault(&self.config.ldap_uri, fault, None))?;
        self.schema_cache.flush(&self.config.ldap_uri);
        self.load_schema(false).await;
        Ok(())
    }

    /// Ends the session and drops its cached schema.
    ///
    /// # Errors
    ///
    /// Returns the translated unbind failure.
    pub async fn unbind(&mut self) -> Result<()> {
        let result = self
            .session
            .unbind()
            .await
            .map_err(|fault| translate_fault(&self.config.ldap_uri, fault, None));
        self.schema_cache.flush(&self.config.ldap_uri);
        self.codec = Arc::new(TypeCodec::new(None, self.config.decode_attrs));
        result
    }

    async fn load_schema(&mut self, force_refresh: bool) {
        let schema = if self.config.no_schema {
            None
        } else {
            let force = force_refresh || self.config.force_schema_updates;
            match self
                .schema_cache
                .get_schema(&self.config.ldap_uri, self.session.as_mut(), force)
                .await
            {
                Ok(schema) => Some(schema),
                Err(err) => {
                    warn!(uri = %self.config.ldap_uri, error = %err, "continuing without schema");
                    None
                }
            }
        };
        self.codec = Arc::new(TypeCodec::new(schema, self.config.decode_attrs));
    }

    /// Creates an empty entry bound to this client's codec.
    #[must_use]
    pub fn make_entry(&self, dn: Dn) -> Entry {
        Entry::new(Arc::clone(&self.codec), dn)
    }

    /// Builds `attr=value,<parent>`. For a list the first element is used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedValue`] when the value has no text form.
    pub fn make_dn_from_attr(&self, attr: &str, value: &Value, parent: &Dn) -> Result<Dn> {
        let value = match value {
            Value::List(items) | Value::Tuple(items) => items.first(),
            other => Some(other),
        };
        let text = value.and_then(Value::to_text).ok_or_else(|| {
            Error::UnsupportedValue(format!("{attr} value cannot be used in a DN"))
        })?;
        Ok(parent.clone().with_prefix(Rdn::new(attr, text)))
    }

    /// Builds a DN from the entry's `primary_key` attribute under `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the entry lacks the attribute.
    pub fn make_dn(&self, entry: &mut Entry, primary_key: &str, parent: &Dn) -> Result<Dn> {
        let value = entry
            .first(primary_key)?
            .ok_or_else(|| Error::not_found(format!("{primary_key} attribute of the entry")))?;
        self.make_dn_from_attr(primary_key, &value, parent)
    }

    /// Runs a search and translates the results into entries.
    ///
    /// Hitting an administrative, size or time limit is reported through
    /// [`SearchResults::truncated`] with whatever entries arrived before it. A paged search that
    /// fails midway abandons the server cursor before the fault is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when nothing matched and no limit was hit, or the translated
    /// protocol fault.
    pub async fn find_entries(&mut self, request: &SearchRequest) -> Result<SearchResults> {
        let filter = request
            .filter
            .as_deref()
            .filter(|filter| !filter.is_empty())
            .unwrap_or(DEFAULT_FILTER);
        let size_limit = request.size_limit.unwrap_or(0).max(0);
        let configured_page = i32::try_from(self.config.page_size).unwrap_or(i32::MAX);
        let page_size = (if size_limit > 0 { size_limit } else { configured_page }) - 1;
        let paged = request.paged_search && page_size > 0;

        let mut params = SearchParams::new(request.base.as_str(), request.scope, filter);
        params.attrs = request.attrs.as_deref().map(normalize_attrs);
        params.time_limit = request.time_limit.filter(|limit| !limit.is_zero());
        params.size_limit = size_limit;

        let mut raw_entries: Vec<RawEntry> = Vec::new();
        let mut referrals = Vec::new();
        let mut truncated = false;
        let mut cookie: Vec<u8> = Vec::new();

        loop {
            params.paging = paged.then(|| Paging {
                size: page_size,
                cookie: cookie.clone(),
            });

            let page = match self.session.search(&params).await {
                Ok(page) => page,
                Err(fault) => {
                    if paged && !cookie.is_empty() {
                        self.cancel_paged_search(&params, std::mem::take(&mut cookie))
                            .await;
                    }
                    if fault.code.is_limit() {
                        truncated = true;
                        break;
                    }
                    return Err(translate_fault(&self.config.ldap_uri, fault, None));
                }
            };

            raw_entries.extend(page.entries);
            if request.search_refs {
                referrals.extend(page.referrals);
            } else if !page.referrals.is_empty() {
                debug!(count = page.referrals.len(), "skipping search references");
            }

            if let Some(fault) = page.truncated_by {
                debug!(error = %fault, "search truncated by server limit");
                if paged && !cookie.is_empty() {
                    self.cancel_paged_search(&params, std::mem::take(&mut cookie))
                        .await;
                }
                truncated = true;
                break;
            }

            if !paged {
                break;
            }
            cookie = page.cookie;
            if cookie.is_empty() {
                break;
            }
        }

        if raw_entries.is_empty() && referrals.is_empty() && !truncated {
            return Err(Error::not_found("no such entry"));
        }

        let entries = raw_entries
            .into_iter()
            .map(|raw| self.entry_from_raw(raw))
            .collect::<Result<Vec<_>>>()?;
        Ok(SearchResults {
            entries,
            truncated,
            referrals,
        })
    }

    async fn cancel_paged_search(&mut self, params: &SearchParams, cookie: Vec<u8>) {
        let mut cancel = params.clone();
        cancel.paging = Some(Paging { size: 0, cookie });
        if let Err(fault) = self.session.search(&cancel).await {
            warn!(error = %fault, "error cancelling paged search");
        }
    }

    fn entry_from_raw(&self, raw: RawEntry) -> Result<Entry> {
        let mut entry = self.make_entry(Dn::parse(&raw.dn)?);
        for (name, values) in raw.attributes {
            entry.raw().set(&name, values);
        }
        entry.reset_modlist()?;
        Ok(entry)
    }

    /// Returns every matching entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LimitsExceeded`] when the results were truncated, [`Error::NotFound`]
    /// when nothing matched.
    pub async fn get_entries(
        &mut self,
        base: &Dn,
        scope: SearchScope,
        filter: Option<&str>,
        attrs: Option<&[&str]>,
    ) -> Result<Vec<Entry>> {
        let mut request = SearchRequest::new(base.clone()).scope(scope);
        request.filter = filter.map(ToString::to_string);
        if let Some(attrs) = attrs {
            request = request.attrs(attrs.iter().copied());
        }
        let results = self.find_entries(&request).await?;
        if results.truncated {
            return Err(Error::LimitsExceeded);
        }
        Ok(results.entries)
    }

    /// Finds the single entry with `attr=value` and the given object class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SingleMatchExpected`] for several matches, [`Error::LimitsExceeded`]
    /// when truncated and [`Error::NotFound`] when nothing matched.
    pub async fn find_entry_by_attr(
        &mut self,
        attr: &str,
        value: impl Into<Value>,
        object_class: &str,
        attrs: Option<&[&str]>,
        base: &Dn,
    ) -> Result<Entry> {
        let filter = make_filter(
            [(attr, value.into()), ("objectClass", Value::from(object_class))],
            MatchRule::All,
            FilterOptions::default(),
        )?;
        let mut request = SearchRequest::new(base.clone()).filter(filter);
        if let Some(attrs) = attrs {
            request = request.attrs(attrs.iter().copied());
        }

        let results = self.find_entries(&request).await?;
        if results.entries.len() > 1 {
            return Err(Error::SingleMatchExpected {
                found: results.entries.len(),
            });
        }
        if results.truncated {
            return Err(Error::LimitsExceeded);
        }
        results
            .entries
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("no such entry"))
    }

    /// Reads one entry by DN.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the entry does not exist and [`Error::LimitsExceeded`]
    /// when a limit was hit.
    pub async fn get_entry(
        &mut self,
        dn: &Dn,
        attrs: Option<&[&str]>,
        time_limit: Option<Duration>,
        size_limit: Option<i32>,
    ) -> Result<Entry> {
        let mut request = SearchRequest::new(dn.clone()).scope(SearchScope::Base);
        if let Some(attrs) = attrs {
            request = request.attrs(attrs.iter().copied());
        }
        request.time_limit = time_limit;
        request.size_limit = size_limit;

        let results = self.find_entries(&request).await?;
        if results.truncated {
            return Err(Error::LimitsExceeded);
        }
        results
            .entries
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("no such entry"))
    }

    /// Creates `entry` on the server and takes its current state as the new baseline.
    ///
    /// Attributes without values are left out of the request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateEntry`] when the DN is taken, or another translated fault.
    pub async fn add_entry(&mut self, entry: &mut Entry) -> Result<()> {
        let attributes: Vec<(String, Vec<Vec<u8>>)> = entry
            .raw()
            .to_map()?
            .into_iter()
            .filter(|(_, values)| !values.is_empty())
            .collect();

        self.session
            .add(entry.dn().as_str(), &attributes)
            .await
            .map_err(|fault| translate_fault(&self.config.ldap_uri, fault, None))?;
        entry.reset_modlist()
    }

    /// Sends the entry's pending changes and takes its current state as the new baseline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyModlist`] when nothing changed, or the modlist or protocol error.
    pub async fn update_entry(&mut self, entry: &mut Entry) -> Result<()> {
        let modlist = entry.generate_modlist()?;
        if modlist.is_empty() {
            return Err(Error::EmptyModlist);
        }

        self.session
            .modify(entry.dn().as_str(), &modlist)
            .await
            .map_err(|fault| translate_fault(&self.config.ldap_uri, fault, None))?;
        entry.reset_modlist()
    }

    /// Deletes an entry given either the entry or its DN.
    ///
    /// # Errors
    ///
    /// Returns the translated fault, e.g. [`Error::NotAllowedOnNonLeaf`].
    pub async fn delete_entry(&mut self, target: impl AsRef<Dn> + Send) -> Result<()> {
        let dn = target.as_ref().as_str().to_string();
        self.session
            .delete(&dn)
            .await
            .map_err(|fault| translate_fault(&self.config.ldap_uri, fault, None))
    }

    /// Renames the entry at `dn` to `new_rdn` within the same parent.
    ///
    /// Afterwards the client pauses for the configured settle delay so that server plugins
    /// maintaining membership attributes can catch up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyModlist`] when `new_rdn` is already the entry's RDN.
    pub async fn update_entry_rdn(
        &mut self,
        dn: &Dn,
        new_rdn: &Rdn,
        delete_old: bool,
    ) -> Result<()> {
        if dn.first() == Some(new_rdn) {
            return Err(Error::EmptyModlist);
        }

        self.session
            .rename(dn.as_str(), &new_rdn.to_string(), delete_old)
            .await
            .map_err(|fault| translate_fault(&self.config.ldap_uri, fault, None))?;

        let settle = self.config.rename_settle_delay();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
        Ok(())
    }

    /// Lower-cased union of the MUST and MAY attributes of `object_classes`.
    ///
    /// Returns `None` when no schema is loaded. Unknown classes are skipped unless
    /// `raise_on_unknown` is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown class with `raise_on_unknown`.
    pub fn get_allowed_attributes(
        &self,
        object_classes: &[&str],
        raise_on_unknown: bool,
    ) -> Result<Option<Vec<String>>> {
        let Some(schema) = self.codec.schema() else {
            return Ok(None);
        };

        let mut allowed = BTreeSet::new();
        for name in object_classes {
            match schema.object_class(name) {
                Some(class) => {
                    allowed.extend(class.must.iter().chain(&class.may).map(|a| a.to_lowercase()));
                }
                None if raise_on_unknown => {
                    return Err(Error::not_found(format!("objectclass {name} not found")));
                }
                None => {}
            }
        }
        Ok(Some(allowed.into_iter().collect()))
    }

    /// Returns true if `attr` holds DNs.
    #[must_use]
    pub fn has_dn_syntax(&self, attr: &str) -> bool {
        self.codec.has_dn_syntax(attr)
    }
}

fn normalize_attrs(attrs: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(attrs.len());
    for attr in attrs {
        let lower = attr.to_lowercase();
        if !normalized.contains(&lower) {
            normalized.push(lower);
        }
    }
    normalized
}

/// Translates a protocol fault into the error returned to callers.
///
/// `arg_desc` describes the operation's arguments; it becomes the not-found reason and is
/// appended to the diagnostic of other faults.
///
/// A session only reports a fault for a failed operation, so a fault carrying a success code
/// means the session could not tell what went wrong. It becomes a [`Error::DatabaseError`]
/// as is, without the delegation check applied to unknown codes.
#[must_use]
pub fn translate_fault(uri: &str, fault: LdapFault, arg_desc: Option<&str>) -> Error {
    let desc = fault.desc.trim().to_string();
    let mut info = fault.info.trim().to_string();
    if let Some(args) = arg_desc {
        info = format!("{info} arguments: {args}");
    }

    match fault.code {
        FaultCode::Timeout => Error::DatabaseTimeout,
        FaultCode::NoSuchObject => Error::not_found(arg_desc.unwrap_or("no such entry")),
        FaultCode::AlreadyExists => Error::DuplicateEntry,
        FaultCode::ConstraintViolation if info.starts_with(UNIQUENESS_VIOLATION) => {
            Error::DuplicateEntry
        }
        FaultCode::ConstraintViolation | FaultCode::ConnectError => {
            Error::DatabaseError { desc, info }
        }
        FaultCode::InsufficientAccess | FaultCode::LocalError => Error::AccessDenied { info },
        FaultCode::InvalidCredentials => Error::AccessDenied {
            info: format!("{info} {desc}"),
        },
        FaultCode::InappropriateAuth => Error::AccessDenied {
            info: format!("{desc}: {info}"),
        },
        FaultCode::NoSuchAttribute => Error::MidairCollision,
        FaultCode::InvalidSyntax => Error::InvalidSyntax { attr: info },
        FaultCode::ObjectClassViolation => Error::ObjectClassViolation { info },
        FaultCode::AdminLimitExceeded
        | FaultCode::SizeLimitExceeded
        | FaultCode::TimeLimitExceeded => Error::LimitsExceeded,
        FaultCode::NotAllowedOnRdn => Error::NotAllowedOnRdn { attr: info },
        FaultCode::FilterError => Error::BadSearchFilter { info },
        FaultCode::NotAllowedOnNonLeaf => Error::NotAllowedOnNonLeaf,
        FaultCode::ServerDown => Error::NetworkError {
            uri: uri.to_string(),
            error: info,
        },
        FaultCode::Success => {
            debug!(%desc, %info, "operation failed with a success result code");
            Error::DatabaseError { desc, info }
        }
        FaultCode::Other(_) => {
            if info.contains("NOT_ALLOWED_TO_DELEGATE") {
                return Error::AccessDenied {
                    info: "KDC returned NOT_ALLOWED_TO_DELEGATE".to_string(),
                };
            }
            debug!(code = ?fault.code, %desc, %info, "unhandled LDAP fault");
            Error::DatabaseError { desc, info }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{DirectoryModification, MockDirectorySession, SearchPage};
    use mockall::predicate::{always, eq, function};
    use mockall::Sequence;

    const URI: &str = "ldap://ipa.example.com:389";

    fn config() -> DirectoryConfig {
        DirectoryConfig::new(URI)
            .unwrap()
            .with_no_schema(true)
            .with_rename_settle_millis(0)
    }

    async fn client(session: MockDirectorySession) -> DirectoryClient {
        DirectoryClient::new(config(), Box::new(session), Arc::new(SchemaCache::new())).await
    }

    fn raw_entry(uid: &str) -> RawEntry {
        RawEntry {
            dn: format!("uid={uid},cn=users,dc=example"),
            attributes: vec![("uid".to_string(), vec![uid.as_bytes().to_vec()])],
        }
    }

    fn page(uids: &[&str], cookie: &[u8]) -> SearchPage {
        SearchPage {
            entries: uids.iter().map(|uid| raw_entry(uid)).collect(),
            cookie: cookie.to_vec(),
            ..SearchPage::default()
        }
    }

    fn cookie_is(expected: &'static [u8]) -> impl Fn(&SearchParams) -> bool {
        move |params: &SearchParams| {
            params
                .paging
                .as_ref()
                .is_some_and(|paging| paging.cookie == expected && paging.size == 1999)
        }
    }

    fn base() -> Dn {
        Dn::parse("cn=users,dc=example").unwrap()
    }

    #[tokio::test]
    async fn paged_search_concatenates_pages() {
        let mut session = MockDirectorySession::new();
        let mut seq = Sequence::new();
        session
            .expect_search()
            .with(function(cookie_is(b"")))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(page(&["a", "b"], b"c1")));
        session
            .expect_search()
            .with(function(cookie_is(b"c1")))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(page(&["c"], b"c2")));
        session
            .expect_search()
            .with(function(cookie_is(b"c2")))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(page(&["d"], b"")));

        let mut client = client(session).await;
        let results = client
            .find_entries(&SearchRequest::new(base()).paged(true))
            .await
            .unwrap();

        assert!(!results.truncated);
        let dns: Vec<String> = results
            .entries
            .iter()
            .map(|entry| entry.dn().to_string())
            .collect();
        assert_eq!(
            dns,
            vec![
                "uid=a,cn=users,dc=example",
                "uid=b,cn=users,dc=example",
                "uid=c,cn=users,dc=example",
                "uid=d,cn=users,dc=example",
            ]
        );
    }

    #[tokio::test]
    async fn no_matches_is_not_found() {
        let mut session = MockDirectorySession::new();
        session
            .expect_search()
            .with(function(|params: &SearchParams| {
                params.filter == DEFAULT_FILTER && params.paging.is_none()
            }))
            .returning(|_| Ok(SearchPage::default()));

        let mut client = client(session).await;
        let err = client
            .find_entries(&SearchRequest::new(base()))
            .await
            .unwrap_err();
        assert_eq!(err, Error::not_found("no such entry"));
    }

    #[tokio::test]
    async fn size_limit_truncates_instead_of_failing() {
        let mut session = MockDirectorySession::new();
        session
            .expect_search()
            .with(function(|params: &SearchParams| params.size_limit == 1))
            .returning(|_| {
                Ok(SearchPage {
                    truncated_by: Some(LdapFault::new(FaultCode::SizeLimitExceeded, "")),
                    ..page(&["a"], b"")
                })
            });

        let mut client = client(session).await;
        let results = client
            .find_entries(&SearchRequest::new(base()).size_limit(1))
            .await
            .unwrap();
        assert!(results.truncated);
        assert_eq!(results.entries.len(), 1);
    }

    #[tokio::test]
    async fn limit_fault_with_no_entries_is_truncated() {
        let mut session = MockDirectorySession::new();
        session
            .expect_search()
            .returning(|_| Err(LdapFault::new(FaultCode::AdminLimitExceeded, "")));

        let mut client = client(session).await;
        let results = client
            .find_entries(&SearchRequest::new(base()))
            .await
            .unwrap();
        assert!(results.truncated);
        assert!(results.entries.is_empty());
    }

    #[tokio::test]
    async fn paged_failure_cancels_the_cursor() {
        let mut session = MockDirectorySession::new();
        let mut seq = Sequence::new();
        session
            .expect_search()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(page(&["a"], b"c1")));
        session
            .expect_search()
            .with(function(cookie_is(b"c1")))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(LdapFault::new(FaultCode::ServerDown, "connection reset")));
        session
            .expect_search()
            .with(function(|params: &SearchParams| {
                params
                    .paging
                    .as_ref()
                    .is_some_and(|paging| paging.size == 0 && paging.cookie == b"c1")
            }))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(LdapFault::new(FaultCode::ServerDown, "still down")));

        let mut client = client(session).await;
        let err = client
            .find_entries(&SearchRequest::new(base()).paged(true))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::NetworkError {
                uri: URI.to_string(),
                error: "connection reset".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn search_normalizes_attributes_and_limits() {
        let mut session = MockDirectorySession::new();
        session
            .expect_search()
            .with(function(|params: &SearchParams| {
                params.attrs == Some(vec!["cn".to_string(), "uid".to_string()])
                    && params.time_limit.is_none()
                    && params.filter == "(uid=a)"
            }))
            .returning(|_| Ok(page(&["a"], b"")));

        let mut client = client(session).await;
        let request = SearchRequest::new(base())
            .filter("(uid=a)")
            .attrs(["CN", "cn", "uid"])
            .time_limit(Duration::ZERO);
        assert_eq!(client.find_entries(&request).await.unwrap().entries.len(), 1);
    }

    #[tokio::test]
    async fn referrals_are_only_returned_on_request() {
        let mut session = MockDirectorySession::new();
        session.expect_search().times(2).returning(|_| {
            Ok(SearchPage {
                referrals: vec!["ldap://replica.example.com/dc=example".to_string()],
                ..SearchPage::default()
            })
        });

        let mut client = client(session).await;
        let err = client
            .find_entries(&SearchRequest::new(base()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        let results = client
            .find_entries(&SearchRequest::new(base()).search_refs(true))
            .await
            .unwrap();
        assert_eq!(results.referrals.len(), 1);
        assert!(results.entries.is_empty());
    }

    #[tokio::test]
    async fn find_entry_by_attr_requires_a_single_match() {
        let mut session = MockDirectorySession::new();
        session
            .expect_search()
            .with(function(|params: &SearchParams| {
                params.filter == r"(&(uid=a\2a)(objectClass=posixaccount))"
            }))
            .returning(|_| Ok(page(&["a1", "a2"], b"")));

        let mut client = client(session).await;
        let err = client
            .find_entry_by_attr("uid", "a*", "posixaccount", None, &base())
            .await
            .unwrap_err();
        assert_eq!(err, Error::SingleMatchExpected { found: 2 });
    }

    #[tokio::test]
    async fn get_entry_uses_base_scope() {
        let mut session = MockDirectorySession::new();
        session
            .expect_search()
            .with(function(|params: &SearchParams| {
                params.scope == SearchScope::Base && params.base == "uid=a,cn=users,dc=example"
            }))
            .returning(|_| Ok(page(&["a"], b"")));

        let mut client = client(session).await;
        let dn = Dn::parse("uid=a,cn=users,dc=example").unwrap();
        let mut entry = client.get_entry(&dn, None, None, None).await.unwrap();
        assert_eq!(entry.first("uid").unwrap(), Some(Value::from("a")));
        assert!(entry.generate_modlist().unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_entry_skips_empty_attributes() {
        let mut session = MockDirectorySession::new();
        session
            .expect_add()
            .with(
                eq("uid=new,cn=users,dc=example"),
                function(|attrs: &[(String, Vec<Vec<u8>>)]| {
                    attrs == [("uid".to_string(), vec![b"new".to_vec()])]
                }),
            )
            .times(1)
            .returning(|_, _| Ok(()));

        let mut client = client(session).await;
        let mut entry = client.make_entry(Dn::parse("uid=new,cn=users,dc=example").unwrap());
        entry.set("uid", "new");
        entry.set("description", Vec::<Value>::new());
        client.add_entry(&mut entry).await.unwrap();
        assert!(entry.original().contains_key("uid"));
    }

    #[tokio::test]
    async fn update_entry_sends_modlist_and_resets_baseline() {
        let mut session = MockDirectorySession::new();
        session
            .expect_modify()
            .with(
                always(),
                function(|mods: &[DirectoryModification]| {
                    mods == [DirectoryModification::Replace {
                        attribute: "cn".to_string(),
                        values: vec![b"Admin".to_vec()],
                    }]
                }),
            )
            .times(1)
            .returning(|_, _| Ok(()));

        let mut client = client(session).await;
        let mut entry = client.make_entry(base());
        entry.set("cn", "Admin");
        client.update_entry(&mut entry).await.unwrap();

        let err = client.update_entry(&mut entry).await.unwrap_err();
        assert_eq!(err, Error::EmptyModlist);
    }

    #[tokio::test]
    async fn rename_to_same_rdn_is_rejected() {
        let mut session = MockDirectorySession::new();
        session
            .expect_rename()
            .with(eq("uid=a,cn=users,dc=example"), eq("uid=b"), eq(true))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut client = client(session).await;
        let dn = Dn::parse("uid=a,cn=users,dc=example").unwrap();
        let err = client
            .update_entry_rdn(&dn, &Rdn::new("UID", "a"), true)
            .await
            .unwrap_err();
        assert_eq!(err, Error::EmptyModlist);
        client
            .update_entry_rdn(&dn, &Rdn::new("uid", "b"), true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_accepts_entry_or_dn() {
        let mut session = MockDirectorySession::new();
        session
            .expect_delete()
            .with(eq("cn=users,dc=example"))
            .times(1)
            .returning(|_| Ok(()));
        session
            .expect_delete()
            .with(eq("uid=a,cn=users,dc=example"))
            .times(1)
            .returning(|_| Err(LdapFault::new(FaultCode::NotAllowedOnNonLeaf, "")));

        let mut client = client(session).await;
        let entry = client.make_entry(base());
        client.delete_entry(&entry).await.unwrap();
        let err = client
            .delete_entry(Dn::parse("uid=a,cn=users,dc=example").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err, Error::NotAllowedOnNonLeaf);
    }

    #[tokio::test]
    async fn bind_reloads_schema() {
        let schema_page = || SearchPage {
            entries: vec![RawEntry {
                dn: "cn=schema".to_string(),
                attributes: vec![(
                    "objectClasses".to_string(),
                    vec![b"( 2.5.6.6 NAME 'person' SUP top STRUCTURAL MUST ( sn $ cn ) \
                           MAY ( userPassword $ description ) )"
                        .to_vec()],
                )],
            }],
            ..SearchPage::default()
        };

        let mut session = MockDirectorySession::new();
        session
            .expect_search()
            .times(2)
            .returning(move |_| Ok(schema_page()));
        session
            .expect_simple_bind()
            .with(eq("cn=Directory Manager"), eq("secret"))
            .times(1)
            .returning(|_, _| Ok(()));

        let cache = Arc::new(SchemaCache::new());
        let config = DirectoryConfig::new(URI).unwrap();
        let mut client = DirectoryClient::new(config, Box::new(session), Arc::clone(&cache)).await;
        assert!(client.schema().is_some());
        client
            .simple_bind("cn=Directory Manager", "secret")
            .await
            .unwrap();

        assert_eq!(
            client
                .get_allowed_attributes(&["person", "PERSON"], false)
                .unwrap(),
            Some(vec![
                "cn".to_string(),
                "description".to_string(),
                "sn".to_string(),
                "userpassword".to_string(),
            ])
        );
        let err = client.get_allowed_attributes(&["nope"], true).unwrap_err();
        assert_eq!(err, Error::not_found("objectclass nope not found"));
    }

    #[tokio::test]
    async fn schema_failure_degrades_to_schemaless() {
        let mut session = MockDirectorySession::new();
        session
            .expect_search()
            .returning(|_| Err(LdapFault::new(FaultCode::InsufficientAccess, "denied")));

        let config = DirectoryConfig::new(URI).unwrap();
        let client =
            DirectoryClient::new(config, Box::new(session), Arc::new(SchemaCache::new())).await;
        assert!(client.schema().is_none());
        assert_eq!(client.get_allowed_attributes(&["person"], true).unwrap(), None);
    }

    #[tokio::test]
    async fn make_dn_uses_primary_key() {
        let client = client(MockDirectorySession::new()).await;
        let mut entry = client.make_entry(Dn::root());
        entry.set("cn", vec!["editors", "other"]);
        let dn = client.make_dn(&mut entry, "cn", &base()).unwrap();
        assert_eq!(dn.to_string(), "cn=editors,cn=users,dc=example");
        assert!(matches!(
            client.make_dn(&mut entry, "uid", &base()),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn faults_translate_to_domain_errors() {
        let translate = |code, info: &str| translate_fault(URI, LdapFault::new(code, info), None);

        assert_eq!(translate(FaultCode::AlreadyExists, ""), Error::DuplicateEntry);
        assert_eq!(
            translate(
                FaultCode::ConstraintViolation,
                "Another entry with the same attribute value already exists (uid)"
            ),
            Error::DuplicateEntry
        );
        assert_eq!(
            translate(FaultCode::ConstraintViolation, "password too short"),
            Error::DatabaseError {
                desc: "Constraint violation".to_string(),
                info: "password too short".to_string(),
            }
        );
        assert_eq!(
            translate(FaultCode::InvalidCredentials, "bad password"),
            Error::AccessDenied {
                info: "bad password Invalid credentials".to_string()
            }
        );
        assert_eq!(
            translate(FaultCode::InappropriateAuth, "anonymous"),
            Error::AccessDenied {
                info: "Inappropriate authentication: anonymous".to_string()
            }
        );
        assert_eq!(translate(FaultCode::NoSuchAttribute, ""), Error::MidairCollision);
        assert_eq!(translate(FaultCode::TimeLimitExceeded, ""), Error::LimitsExceeded);
        assert_eq!(translate(FaultCode::Timeout, ""), Error::DatabaseTimeout);
        assert_eq!(
            translate(FaultCode::FilterError, "(uid="),
            Error::BadSearchFilter {
                info: "(uid=".to_string()
            }
        );
        assert_eq!(
            translate(FaultCode::LocalError, "SASL failure"),
            Error::AccessDenied {
                info: "SASL failure".to_string()
            }
        );
        assert_eq!(
            translate(FaultCode::Other(80), "KDC: NOT_ALLOWED_TO_DELEGATE"),
            Error::AccessDenied {
                info: "KDC returned NOT_ALLOWED_TO_DELEGATE".to_string()
            }
        );
        assert_eq!(
            translate(FaultCode::Other(80), "boom"),
            Error::DatabaseError {
                desc: "Unknown error".to_string(),
                info: "boom".to_string(),
            }
        );
    }

    #[test]
    fn success_code_fault_skips_delegation_check() {
        let err = translate_fault(
            URI,
            LdapFault::new(FaultCode::Success, "KDC: NOT_ALLOWED_TO_DELEGATE"),
            None,
        );
        assert_eq!(
            err,
            Error::DatabaseError {
                desc: "Success".to_string(),
                info: "KDC: NOT_ALLOWED_TO_DELEGATE".to_string(),
            }
        );
    }

    #[test]
    fn not_found_uses_argument_description() {
        let fault = LdapFault::new(FaultCode::NoSuchObject, "");
        assert_eq!(
            translate_fault(URI, fault.clone(), Some("user admin")),
            Error::not_found("user admin")
        );
        assert_eq!(translate_fault(URI, fault, None), Error::not_found("no such entry"));

        let err = translate_fault(
            URI,
            LdapFault::new(FaultCode::ObjectClassViolation, "missing sn"),
            Some("uid=a"),
        );
        assert_eq!(
            err,
            Error::ObjectClassViolation {
                info: "missing sn arguments: uid=a".to_string()
            }
        );
    }
}
