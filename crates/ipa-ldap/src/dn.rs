//! Distinguished Name utilities for working with directory entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use ipa_core::error::Error as CoreError;

/// Errors that can occur when parsing or manipulating distinguished names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnError {
    /// A relative distinguished name was empty.
    #[error("relative distinguished name cannot be empty")]
    Empty,
    /// A component in the distinguished name was invalid.
    #[error("invalid distinguished name component: {0}")]
    InvalidComponent(String),
    /// A component was missing the attribute name to the left of the `=`.
    #[error("distinguished name component missing attribute: {0}")]
    MissingAttribute(String),
    /// A component was missing the value to the right of the `=`.
    #[error("distinguished name component missing value for attribute {0}")]
    MissingValue(String),
    /// The distinguished name ended with an escape character.
    #[error("distinguished name contains an unterminated escape sequence")]
    UnterminatedEscape,
    /// Hex escapes decoded to bytes that are not UTF-8.
    #[error("distinguished name value is not valid UTF-8: {0}")]
    InvalidEscape(String),
}

impl From<DnError> for CoreError {
    fn from(err: DnError) -> Self {
        CoreError::InvalidDn(err.to_string())
    }
}

/// Single attribute/value assertion inside an RDN.
#[derive(Debug, Clone, Eq)]
pub struct Ava {
    attribute: String,
    value: String,
}

impl Ava {
    /// Create a new attribute/value assertion.
    #[must_use]
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Attribute portion (e.g. `cn`).
    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Value portion.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true if this assertion uses the provided attribute name (case-insensitive).
    #[must_use]
    pub fn matches_attribute(&self, attribute: &str) -> bool {
        self.attribute.eq_ignore_ascii_case(attribute)
    }
}

impl PartialEq for Ava {
    fn eq(&self, other: &Self) -> bool {
        self.matches_attribute(&other.attribute) && self.value == other.value
    }
}

impl fmt::Display for Ava {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attribute, escape(&self.value))
    }
}

/// Relative distinguished name: a set of `+`-joined attribute/value assertions.
#[derive(Debug, Clone, Eq)]
pub struct Rdn {
    avas: Vec<Ava>,
}

impl Rdn {
    /// Create a single-valued RDN.
    #[must_use]
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            avas: vec![Ava::new(attribute, value)],
        }
    }

    /// Create a multi-valued RDN.
    ///
    /// # Errors
    ///
    /// Returns [`DnError::Empty`] when no assertions are given.
    pub fn from_avas(avas: Vec<Ava>) -> Result<Self, DnError> {
        if avas.is_empty() {
            return Err(DnError::Empty);
        }
        Ok(Self { avas })
    }

    /// Parses a single RDN such as `cn=admins` or `cn=John+uid=1234`.
    ///
    /// # Errors
    ///
    /// Returns [`DnError`] when the input is empty or malformed.
    pub fn parse(input: &str) -> Result<Self, DnError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(DnError::Empty);
        }
        parse_rdn(input)
    }

    /// Assertions making up this RDN.
    #[must_use]
    pub fn avas(&self) -> &[Ava] {
        &self.avas
    }

    /// Attribute of the first assertion.
    #[must_use]
    pub fn attribute(&self) -> &str {
        self.avas[0].attribute()
    }

    /// Value of the first assertion.
    #[must_use]
    pub fn value(&self) -> &str {
        self.avas[0].value()
    }

    /// Looks up the value for `attribute` (case-insensitive).
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.avas
            .iter()
            .find(|ava| ava.matches_attribute(attribute))
            .map(Ava::value)
    }
}

impl PartialEq for Rdn {
    fn eq(&self, other: &Self) -> bool {
        self.avas.len() == other.avas.len() && self.avas.iter().all(|ava| other.avas.contains(ava))
    }
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self.avas.iter().map(ToString::to_string).collect::<Vec<_>>();
        f.write_str(&parts.join("+"))
    }
}

impl FromStr for Rdn {
    type Err = DnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Strongly-typed distinguished name.
///
/// Keeps a canonical string representation alongside the parsed RDNs. Equality compares RDNs,
/// with attribute names matched case-insensitively. The empty DN is the root DSE.
#[derive(Debug, Clone, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Dn {
    raw: String,
    rdns: Vec<Rdn>,
}

impl Dn {
    /// The empty (root) distinguished name.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Builds a DN from RDNs, most specific first.
    #[must_use]
    pub fn from_rdns(rdns: Vec<Rdn>) -> Self {
        Self {
            raw: rdns_to_string(&rdns),
            rdns,
        }
    }

    /// Parses a distinguished name from a string.
    ///
    /// An empty (or all-whitespace) string yields the root DN.
    ///
    /// # Errors
    ///
    /// Returns [`DnError`] if the distinguished name contains invalid syntax.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, DnError> {
        let raw = input.as_ref().trim();
        if raw.is_empty() {
            return Ok(Self::root());
        }

        let rdns = split_escaped(raw, ',')?
            .iter()
            .map(|component| parse_rdn(component))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::from_rdns(rdns))
    }

    /// Borrows the canonical distinguished name string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true for the root DN.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Number of RDNs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    /// Returns true if there are no RDNs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Returns the RDNs in order.
    #[must_use]
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// Leftmost (most specific) RDN.
    #[must_use]
    pub fn first(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    /// DN of the parent entry; the root DN is its own parent.
    #[must_use]
    pub fn parent(&self) -> Self {
        Self::from_rdns(self.rdns.iter().skip(1).cloned().collect())
    }

    /// Returns an iterator over all attribute/value assertions in order.
    pub fn components(&self) -> impl Iterator<Item = &Ava> + '_ {
        self.rdns.iter().flat_map(|rdn| rdn.avas.iter())
    }

    /// Looks up the value for the first attribute that matches `attribute` (case-insensitive).
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.components()
            .find(|ava| ava.matches_attribute(attribute))
            .map(Ava::value)
    }

    /// Returns true if the distinguished name contains a matching attribute/value pair.
    #[must_use]
    pub fn contains(&self, attribute: &str, value: &str) -> bool {
        self.components()
            .any(|ava| ava.matches_attribute(attribute) && ava.value.eq_ignore_ascii_case(value))
    }

    /// Creates a new distinguished name by prefixing the provided RDN.
    #[must_use]
    pub fn with_prefix(mut self, rdn: Rdn) -> Self {
        self.rdns.insert(0, rdn);
        self.raw = rdns_to_string(&self.rdns);
        self
    }

    /// Creates a new distinguished name by appending another distinguished name.
    ///
    /// This is useful when combining an entry-specific RDN with a base DN.
    #[must_use]
    pub fn join(mut self, suffix: &Dn) -> Self {
        self.rdns.extend(suffix.rdns.iter().cloned());
        self.raw = rdns_to_string(&self.rdns);
        self
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.rdns == other.rdns
    }
}

impl AsRef<Dn> for Dn {
    fn as_ref(&self) -> &Dn {
        self
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Dn {
    type Err = DnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Dn> for String {
    fn from(value: Dn) -> Self {
        value.raw
    }
}

impl From<Rdn> for Dn {
    fn from(rdn: Rdn) -> Self {
        Self::from_rdns(vec![rdn])
    }
}

impl TryFrom<&str> for Dn {
    type Error = DnError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Dn {
    type Error = DnError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

fn parse_rdn(component: &str) -> Result<Rdn, DnError> {
    if component.is_empty() {
        return Err(DnError::InvalidComponent(component.to_string()));
    }

    let avas = split_escaped(component, '+')?
        .iter()
        .map(|part| split_attribute_value(part).map(|(attr, value)| Ava::new(attr, value)))
        .collect::<Result<Vec<_>, _>>()?;

    Rdn::from_avas(avas)
}

/// Splits on `delimiter`, leaving escape sequences intact for [`unescape`].
fn split_escaped(input: &str, delimiter: char) -> Result<Vec<String>, DnError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escape = false;

    for ch in input.chars() {
        if escape {
            current.push(ch);
            escape = false;
            continue;
        }

        if ch == '\\' {
            current.push(ch);
            escape = true;
            continue;
        }

        if ch == delimiter {
            parts.push(current.trim().to_string());
            current.clear();
            continue;
        }

        current.push(ch);
    }

    if escape {
        return Err(DnError::UnterminatedEscape);
    }

    parts.push(current.trim().to_string());
    if parts.iter().any(String::is_empty) {
        return Err(DnError::InvalidComponent(input.to_string()));
    }
    Ok(parts)
}

fn split_attribute_value(component: &str) -> Result<(String, String), DnError> {
    let mut escape = false;
    let mut index = None;

    for (i, ch) in component.char_indices() {
        if escape {
            escape = false;
            continue;
        }

        if ch == '\\' {
            escape = true;
            continue;
        }

        if ch == '=' {
            index = Some(i);
            break;
        }
    }

    let idx = index.ok_or_else(|| DnError::InvalidComponent(component.to_string()))?;
    let attribute = component[..idx].trim();
    let value_part = component[idx + 1..].trim_start();

    if attribute.is_empty() {
        return Err(DnError::MissingAttribute(component.to_string()));
    }

    if value_part.is_empty() {
        return Err(DnError::MissingValue(attribute.to_string()));
    }

    Ok((attribute.to_string(), unescape(value_part)?))
}

fn unescape(value: &str) -> Result<String, DnError> {
    let mut bytes = Vec::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            continue;
        }

        let next = chars.next().ok_or(DnError::UnterminatedEscape)?;
        let hex_pair = chars
            .peek()
            .and_then(|low| Some((next.to_digit(16)?, low.to_digit(16)?)));
        match hex_pair {
            Some((high, low)) => {
                chars.next();
                // Both digits are < 16, the byte cannot overflow.
                bytes.push(u8::try_from(high * 16 + low).unwrap_or_default());
            }
            None => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(next.encode_utf8(&mut buf).as_bytes());
            }
        }
    }

    String::from_utf8(bytes).map_err(|_| DnError::InvalidEscape(value.to_string()))
}

fn escape(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }

    let chars: Vec<char> = value.chars().collect();
    let mut escaped = String::with_capacity(value.len());

    for (idx, ch) in chars.iter().enumerate() {
        let is_first = idx == 0;
        let is_last = idx == chars.len() - 1;
        if *ch == '\0' {
            escaped.push_str("\\00");
            continue;
        }
        let needs_escape = matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=')
            || (is_first && (*ch == ' ' || *ch == '#'))
            || (is_last && *ch == ' ');

        if needs_escape {
            escaped.push('\\');
        }
        escaped.push(*ch);
    }

    escaped
}

fn rdns_to_string(rdns: &[Rdn]) -> String {
    rdns.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
