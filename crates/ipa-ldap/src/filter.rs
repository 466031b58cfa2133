//! Search filter construction.
//!
//! Filters are built as strings in RFC 4515 syntax. Every value is escaped before it is
//! embedded, so callers can pass user input straight through.
//!
//! ```
//! use ipa_ldap::filter::{make_filter, FilterOptions, MatchRule};
//! use ipa_ldap::Value;
//!
//! let filter = make_filter(
//!     [("uid", Value::from("admin")), ("cn", Value::from("a*b"))],
//!     MatchRule::All,
//!     FilterOptions::default(),
//! )
//! .unwrap();
//! assert_eq!(filter, r"(&(uid=admin)(cn=a\2ab))");
//! ```

use crate::value::Value;
use crate::Result;
use ipa_core::Error;
use std::fmt::Write;

/// How the individual filters are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchRule {
    /// Match entries that match any filter (`|`).
    #[default]
    Any,
    /// Match entries that match every filter (`&`).
    All,
    /// Match entries that match none of the filters (`!`).
    None,
}

impl MatchRule {
    const fn operator(self) -> char {
        match self {
            Self::Any => '|',
            Self::All => '&',
            Self::None => '!',
        }
    }
}

/// Value matching options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterOptions {
    /// `(attr=value)` when set, a substring match `(attr=*value*)` otherwise.
    pub exact: bool,
    /// Allow the leading `*` of a substring match.
    pub leading_wildcard: bool,
    /// Allow the trailing `*` of a substring match.
    pub trailing_wildcard: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            exact: true,
            leading_wildcard: true,
            trailing_wildcard: true,
        }
    }
}

impl FilterOptions {
    /// Substring matching with both wildcards.
    #[must_use]
    pub const fn substring() -> Self {
        Self {
            exact: false,
            leading_wildcard: true,
            trailing_wildcard: true,
        }
    }
}

/// Combines filters with `rule`.
///
/// Empty filters are dropped and bare `attr=value` terms get their parentheses. A single
/// remaining filter is returned as is, except under [`MatchRule::None`] which always negates
/// the OR of everything given.
pub fn combine_filters<S: AsRef<str>>(filters: &[S], rule: MatchRule) -> String {
    let filters: Vec<&str> = filters
        .iter()
        .map(AsRef::as_ref)
        .filter(|f| !f.is_empty())
        .collect();

    if rule == MatchRule::None && !filters.is_empty() {
        return format!("(!{})", combine_filters(&filters, MatchRule::Any));
    }

    let compound = filters.len() > 1;
    let mut combined = String::new();
    if compound {
        combined.push('(');
        combined.push(rule.operator());
    }
    for filter in filters {
        if filter.starts_with('(') {
            combined.push_str(filter);
        } else {
            let _ = write!(combined, "({filter})");
        }
    }
    if compound {
        combined.push(')');
    }
    combined
}

/// Builds the filter matching `attr` against `value`.
///
/// A list or tuple yields one term per element combined with `rule`; null yields an empty
/// filter.
///
/// # Errors
///
/// Returns [`Error::UnsupportedValue`] for a mapping, which has no filter form.
pub fn make_filter_from_attr(
    attr: &str,
    value: &Value,
    rule: MatchRule,
    options: FilterOptions,
) -> Result<String> {
    let text = match value {
        Value::Null => return Ok(String::new()),
        Value::List(items) | Value::Tuple(items) => {
            let filters = items
                .iter()
                .map(|item| make_filter_from_attr(attr, item, MatchRule::Any, options))
                .collect::<Result<Vec<_>>>()?;
            return Ok(combine_filters(&filters, rule));
        }
        Value::Map(_) => {
            return Err(Error::UnsupportedValue(format!(
                "a mapping cannot be matched in a filter for {attr}"
            )))
        }
        Value::Bytes(bytes) => escape_filter_bytes(bytes),
        other => escape_filter_value(&other.to_text().unwrap_or_default()),
    };

    let mut assertion = text;
    if !options.exact {
        if options.leading_wildcard {
            assertion.insert(0, '*');
        }
        if options.trailing_wildcard {
            assertion.push('*');
        }
    }

    Ok(if rule == MatchRule::None {
        format!("(!({attr}={assertion}))")
    } else {
        format!("({attr}={assertion})")
    })
}

/// Builds a filter from attribute/value pairs.
///
/// Each attribute becomes a term (see [`make_filter_from_attr`]) and the terms are combined
/// with `rule`. Null values are skipped.
///
/// # Errors
///
/// Fails when a value has no filter form.
pub fn make_filter<I, K>(attrs: I, rule: MatchRule, options: FilterOptions) -> Result<String>
where
    I: IntoIterator<Item = (K, Value)>,
    K: AsRef<str>,
{
    let term_rule = if rule == MatchRule::None {
        MatchRule::Any
    } else {
        rule
    };
    let filters = attrs
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(attr, value)| make_filter_from_attr(attr.as_ref(), &value, term_rule, options))
        .collect::<Result<Vec<_>>>()?;
    Ok(combine_filters(&filters, rule))
}

/// Escapes the filter metacharacters `*`, `(`, `)`, `\` and NUL as `\xx`.
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' | '*' | '(' | ')' | '\0' => {
                let _ = write!(escaped, "\\{:02x}", c as u32);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Escapes a binary assertion value. Bytes that are not valid UTF-8 are hex-escaped.
#[must_use]
pub fn escape_filter_bytes(value: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(value) {
        return escape_filter_value(text);
    }
    let mut escaped = String::with_capacity(value.len() * 3);
    for &byte in value {
        if byte.is_ascii() && !matches!(byte, b'\\' | b'*' | b'(' | b')' | 0) {
            escaped.push(char::from(byte));
        } else {
            let _ = write!(escaped, "\\{byte:02x}");
        }
    }
    escaped
}
