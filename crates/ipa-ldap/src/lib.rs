//! Schema-aware LDAP access for IPA.
//!
//! This crate provides the entry model and client used to talk to an IPA directory server:
//!
//! - [`Dn`] / [`Rdn`] - distinguished names
//! - [`Schema`] and [`SchemaCache`] - server schema, parsed and cached per server
//! - [`TypeCodec`] - conversion between wire bytes and typed [`Value`]s
//! - [`Entry`] - an entry with typed and raw views kept in sync, and its change list
//! - [`DirectoryClient`] - searches and CRUD over a [`DirectorySession`]
//!
//! ```
//! use std::sync::Arc;
//! use ipa_ldap::{Dn, Entry, TypeCodec, Value};
//!
//! let dn = Dn::parse("uid=admin,cn=users").unwrap();
//! let mut entry = Entry::new(Arc::new(TypeCodec::default()), dn);
//! entry.set("uid", "admin");
//! entry.reset_modlist().unwrap();
//! entry.set("uid", "root");
//! assert_eq!(entry.generate_modlist().unwrap().len(), 2);
//! assert_eq!(entry.first("uid").unwrap(), Some(Value::from("root")));
//! ```

#![cfg_attr(not(test), deny(missing_docs))]

mod client;
mod codec;
mod config;
mod dn;
mod entry;
pub mod filter;
mod modlist;
mod schema;
mod schema_cache;
mod session;
mod value;

pub use client::{translate_fault, DirectoryClient, SearchRequest, SearchResults};
pub use codec::{syntax_target, DecodeTarget, Encoded, TypeCodec, DN_SYNTAX_OID};
pub use config::{ldap_uri, Protocol, DEFAULT_LDAPS_PORT, DEFAULT_LDAP_PORT};
pub use dn::{Ava, Dn, DnError, Rdn};
pub use entry::{AttrValue, Entry, RawView, SingleValueView};
pub use filter::{combine_filters, make_filter, make_filter_from_attr, FilterOptions, MatchRule};
pub use schema::{AttributeType, ObjectClass, ObjectClassKind, Schema};
pub use schema_cache::SchemaCache;
pub use session::{
    DirectoryModification, DirectorySession, FaultCode, Ldap3Session, LdapFault, Paging,
    RawEntry, SearchPage, SearchParams, SearchScope,
};
pub use value::Value;

/// Convenient result alias that reuses the core error type.
pub type Result<T> = ipa_core::Result<T>;
