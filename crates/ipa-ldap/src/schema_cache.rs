//! Per-server schema cache.

use crate::schema::Schema;
use crate::session::{DirectorySession, FaultCode, LdapFault, RawEntry, SearchParams, SearchScope};
use crate::Result;
use chrono::{DateTime, Utc};
use ipa_core::Error;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

const SCHEMA_ATTRIBUTES: &[&str] = &["attributetypes", "objectclasses"];

#[derive(Clone)]
struct CachedSchema {
    schema: Arc<Schema>,
    retrieved_at: DateTime<Utc>,
}

/// Schema objects keyed by server URI.
///
/// Retrieval goes through the session passed to [`SchemaCache::get_schema`]; the cache never
/// opens connections of its own. Share one cache between clients with an `Arc`.
#[derive(Default)]
pub struct SchemaCache {
    servers: RwLock<HashMap<String, CachedSchema>>,
}

impl SchemaCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the schema for `url`, retrieving it through `session` on a miss.
    ///
    /// With `force_refresh` the cached copy is dropped first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NetworkError`] when the server is down and [`Error::DatabaseError`] for
    /// any other retrieval failure.
    pub async fn get_schema(
        &self,
        url: &str,
        session: &mut dyn DirectorySession,
        force_refresh: bool,
    ) -> Result<Arc<Schema>> {
        if force_refresh {
            self.flush(url);
        }

        let cached = self
            .servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .map(|cached| Arc::clone(&cached.schema));
        if let Some(schema) = cached {
            return Ok(schema);
        }

        let schema = Arc::new(retrieve_schema(url, session).await?);
        self.servers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                url.to_string(),
                CachedSchema {
                    schema: Arc::clone(&schema),
                    retrieved_at: Utc::now(),
                },
            );
        Ok(schema)
    }

    /// Drops the cached schema for `url`, if any.
    pub fn flush(&self, url: &str) {
        debug!(url, "flushing schema from cache");
        self.servers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url);
    }

    /// When the cached schema for `url` was retrieved.
    #[must_use]
    pub fn retrieved_at(&self, url: &str) -> Option<DateTime<Utc>> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .map(|cached| cached.retrieved_at)
    }
}

async fn retrieve_schema(url: &str, session: &mut dyn DirectorySession) -> Result<Schema> {
    debug!(url, "retrieving schema");

    let entry = match search_subschema(session, "cn=schema").await {
        Err(fault) if fault.code == FaultCode::NoSuchObject => {
            debug!("cn=schema not found, fallback to cn=subschema");
            search_subschema(session, "cn=subschema").await
        }
        other => other,
    }
    .map_err(|fault| schema_error(url, &fault))?;

    let entry = entry.ok_or_else(|| Error::DatabaseError {
        desc: format!("uri={url}"),
        info: "Unable to retrieve LDAP schema: no subschema entry returned".to_string(),
    })?;

    let attribute_types = text_values(&entry, "attributetypes");
    let object_classes = text_values(&entry, "objectclasses");
    Ok(Schema::parse(
        attribute_types.iter().map(String::as_str),
        object_classes.iter().map(String::as_str),
    ))
}

async fn search_subschema(
    session: &mut dyn DirectorySession,
    base: &str,
) -> std::result::Result<Option<RawEntry>, LdapFault> {
    let params = SearchParams::new(base, SearchScope::Base, "(objectClass=*)")
        .with_attrs(SCHEMA_ATTRIBUTES.iter().map(ToString::to_string).collect());
    let page = session.search(&params).await?;
    Ok(page.entries.into_iter().next())
}

fn text_values(entry: &RawEntry, attribute: &str) -> Vec<String> {
    entry
        .values(attribute)
        .unwrap_or_default()
        .iter()
        .map(|value| String::from_utf8_lossy(value).into_owned())
        .collect()
}

fn schema_error(url: &str, fault: &LdapFault) -> Error {
    if fault.code == FaultCode::ServerDown {
        return Error::NetworkError {
            uri: url.to_string(),
            error: "LDAP Server Down, unable to retrieve LDAP schema".to_string(),
        };
    }
    Error::DatabaseError {
        desc: format!("uri={url}"),
        info: format!(
            "Unable to retrieve LDAP schema: {}: {}",
            fault.desc.trim(),
            fault.info.trim()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MockDirectorySession, SearchPage};
    use mockall::predicate::function;

    const URL: &str = "ldap://ipa.example.com:389";

    fn schema_page() -> SearchPage {
        SearchPage {
            entries: vec![RawEntry {
                dn: "cn=schema".to_string(),
                attributes: vec![
                    (
                        "attributeTypes".to_string(),
                        vec![b"( 2.5.4.3 NAME 'cn' SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )"
                            .to_vec()],
                    ),
                    (
                        "objectClasses".to_string(),
                        vec![b"( 2.5.6.0 NAME 'top' ABSTRACT MUST objectClass )".to_vec()],
                    ),
                ],
            }],
            ..SearchPage::default()
        }
    }

    #[tokio::test]
    async fn caches_schema_per_url() {
        let mut session = MockDirectorySession::new();
        session
            .expect_search()
            .with(function(|params: &SearchParams| {
                params.base == "cn=schema" && params.scope == SearchScope::Base
            }))
            .times(1)
            .returning(|_| Ok(schema_page()));

        let cache = SchemaCache::new();
        let first = cache.get_schema(URL, &mut session, false).await.unwrap();
        let second = cache.get_schema(URL, &mut session, false).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.attribute_type("cn").is_some());
        assert!(cache.retrieved_at(URL).is_some());
    }

    #[tokio::test]
    async fn force_refresh_and_flush_refetch() {
        let mut session = MockDirectorySession::new();
        session
            .expect_search()
            .times(3)
            .returning(|_| Ok(schema_page()));

        let cache = SchemaCache::new();
        let first = cache.get_schema(URL, &mut session, false).await.unwrap();
        let refreshed = cache.get_schema(URL, &mut session, true).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &refreshed));

        cache.flush(URL);
        assert!(cache.retrieved_at(URL).is_none());
        cache.flush(URL);
        cache.get_schema(URL, &mut session, false).await.unwrap();
    }

    #[tokio::test]
    async fn falls_back_to_subschema() {
        let mut session = MockDirectorySession::new();
        let mut seq = mockall::Sequence::new();
        session
            .expect_search()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(LdapFault::new(FaultCode::NoSuchObject, "")));
        session
            .expect_search()
            .with(function(|params: &SearchParams| params.base == "cn=subschema"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(schema_page()));

        let cache = SchemaCache::new();
        let schema = cache.get_schema(URL, &mut session, false).await.unwrap();
        assert!(schema.object_class("top").is_some());
    }

    #[tokio::test]
    async fn server_down_is_a_network_error() {
        let mut session = MockDirectorySession::new();
        session
            .expect_search()
            .returning(|_| Err(LdapFault::new(FaultCode::ServerDown, "connection reset")));

        let cache = SchemaCache::new();
        let err = cache.get_schema(URL, &mut session, false).await.unwrap_err();
        assert_eq!(
            err,
            Error::NetworkError {
                uri: URL.to_string(),
                error: "LDAP Server Down, unable to retrieve LDAP schema".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn other_faults_are_database_errors() {
        let mut session = MockDirectorySession::new();
        session
            .expect_search()
            .returning(|_| Err(LdapFault::new(FaultCode::InsufficientAccess, "denied ")));

        let cache = SchemaCache::new();
        let err = cache.get_schema(URL, &mut session, false).await.unwrap_err();
        assert_eq!(
            err,
            Error::DatabaseError {
                desc: format!("uri={URL}"),
                info: "Unable to retrieve LDAP schema: Insufficient access: denied".to_string(),
            }
        );
    }
}
