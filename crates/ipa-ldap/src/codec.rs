//! Conversion between typed [`Value`]s and wire byte strings.

use crate::dn::Dn;
use crate::schema::Schema;
use crate::value::Value;
use crate::Result;
use ipa_core::Error;
use std::sync::Arc;
use tracing::error;

/// Syntax OID of distinguished names.
pub const DN_SYNTAX_OID: &str = "1.3.6.1.4.1.1466.115.121.1.12";

/// Value encoded for the wire, preserving the container shape it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    /// Null passes through.
    Null,
    /// Encoded scalar.
    Bytes(Vec<u8>),
    /// Encoded list.
    List(Vec<Encoded>),
    /// Encoded tuple.
    Tuple(Vec<Encoded>),
    /// Encoded mapping.
    Map(Vec<(Encoded, Encoded)>),
}

/// Type a wire value decodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeTarget {
    /// Opaque bytes.
    Bytes,
    /// Distinguished name.
    Dn,
    /// UTF-8 text.
    Text,
}

/// Decode target for a syntax OID.
#[must_use]
pub fn syntax_target(syntax: &str) -> DecodeTarget {
    match syntax {
        "1.3.6.1.4.1.1466.115.121.1.1"    // ACI item
        | "1.3.6.1.4.1.1466.115.121.1.4"  // Audio
        | "1.3.6.1.4.1.1466.115.121.1.5"  // Binary
        | "1.3.6.1.4.1.1466.115.121.1.8"  // Certificate
        | "1.3.6.1.4.1.1466.115.121.1.9"  // Certificate List
        | "1.3.6.1.4.1.1466.115.121.1.10" // Certificate Pair
        | "1.3.6.1.4.1.1466.115.121.1.23" // Fax
        | "1.3.6.1.4.1.1466.115.121.1.28" // JPEG
        | "1.3.6.1.4.1.1466.115.121.1.40" // OctetString
        | "1.3.6.1.4.1.1466.115.121.1.49" // Supported Algorithm
        | "1.3.6.1.4.1.1466.115.121.1.51" // Teletext Terminal Identifier
        => DecodeTarget::Bytes,

        DN_SYNTAX_OID
        | "2.16.840.1.113730.3.8.3.3"       // enrolledBy
        | "2.16.840.1.113730.3.8.3.18"      // managedBy
        | "2.16.840.1.113730.3.8.3.5"       // memberUser
        | "2.16.840.1.113730.3.8.3.7"       // memberHost
        | "2.16.840.1.113730.3.8.3.20"      // memberService
        | "2.16.840.1.113730.3.8.11.4"      // ipaNTFallbackPrimaryGroup
        | "2.16.840.1.113730.3.8.11.21"     // ipaAllowToImpersonate
        | "2.16.840.1.113730.3.8.11.22"     // ipaAllowedTarget
        | "2.16.840.1.113730.3.8.7.1"       // memberAllowCmd
        | "2.16.840.1.113730.3.8.7.2"       // memberDenyCmd
        | "2.16.840.1.113719.1.301.4.14.1"  // krbRealmReferences
        | "2.16.840.1.113719.1.301.4.17.1"  // krbKdcServers
        | "2.16.840.1.113719.1.301.4.18.1"  // krbPwdServers
        | "2.16.840.1.113719.1.301.4.26.1"  // krbPrincipalReferences
        | "2.16.840.1.113719.1.301.4.29.1"  // krbAdmServers
        | "2.16.840.1.113719.1.301.4.36.1"  // krbPwdPolicyReference
        | "2.16.840.1.113719.1.301.4.40.1"  // krbTicketPolicyReference
        | "2.16.840.1.113719.1.301.4.41.1"  // krbSubTrees
        | "2.16.840.1.113719.1.301.4.52.1"  // krbObjectReferences
        | "2.16.840.1.113719.1.301.4.53.1"  // krbPrincContainerRef
        => DecodeTarget::Dn,

        _ => DecodeTarget::Text,
    }
}

/// Attributes whose server schema is missing or declares the wrong syntax.
fn syntax_override(attr: &str) -> Option<&'static str> {
    match attr.to_ascii_lowercase().as_str() {
        "managedtemplate" | "managedbase" | "originscope" => Some(DN_SYNTAX_OID),
        _ => None,
    }
}

/// Attributes known to be single-valued regardless of schema.
fn single_value_override(attr: &str) -> Option<bool> {
    match attr.to_ascii_lowercase().as_str() {
        "nsslapd-ssl-check-hostname"
        | "nsslapd-lookthroughlimit"
        | "nsslapd-idlistscanlimit"
        | "nsslapd-anonlimitsdn"
        | "nsslapd-minssf-exclude-rootdse" => Some(true),
        _ => None,
    }
}

/// Schema-aware value codec.
///
/// Without a schema every attribute decodes as text unless an override applies.
#[derive(Debug, Clone)]
pub struct TypeCodec {
    schema: Option<Arc<Schema>>,
    decode_attrs: bool,
}

impl Default for TypeCodec {
    fn default() -> Self {
        Self::new(None, true)
    }
}

impl TypeCodec {
    /// Creates a codec over an optional schema.
    ///
    /// With `decode_attrs` false every value decodes to [`Value::Bytes`].
    #[must_use]
    pub const fn new(schema: Option<Arc<Schema>>, decode_attrs: bool) -> Self {
        Self {
            schema,
            decode_attrs,
        }
    }

    /// The schema backing this codec, if any.
    #[must_use]
    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.schema.as_ref()
    }

    /// Whether values are decoded by syntax.
    #[must_use]
    pub const fn decode_attrs(&self) -> bool {
        self.decode_attrs
    }

    /// Encodes a value, keeping its container shape.
    #[must_use]
    pub fn encode(value: &Value) -> Encoded {
        match value {
            Value::Null => Encoded::Null,
            Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Decimal(_)
            | Value::Text(_)
            | Value::Dn(_) => Encoded::Bytes(value.to_text().unwrap_or_default().into_bytes()),
            Value::Bytes(bytes) => Encoded::Bytes(bytes.clone()),
            Value::List(items) => Encoded::List(items.iter().map(Self::encode).collect()),
            Value::Tuple(items) => Encoded::Tuple(items.iter().map(Self::encode).collect()),
            Value::Map(pairs) => Encoded::Map(
                pairs
                    .iter()
                    .map(|(key, value)| (Self::encode(key), Self::encode(value)))
                    .collect(),
            ),
        }
    }

    /// Encodes one attribute value to its wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedValue`] for null and container values, which cannot be a
    /// single attribute value.
    pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
        match Self::encode(value) {
            Encoded::Bytes(bytes) => Ok(bytes),
            _ => Err(Error::UnsupportedValue(format!(
                "value={value:?} type={}",
                value.kind()
            ))),
        }
    }

    /// Syntax OID for an attribute: override table first, then the schema.
    #[must_use]
    pub fn syntax(&self, attr: &str) -> Option<&str> {
        if let Some(syntax) = syntax_override(attr) {
            return Some(syntax);
        }
        self.schema.as_deref()?.attribute_syntax(attr)
    }

    /// Returns true when the attribute uses DN syntax.
    #[must_use]
    pub fn has_dn_syntax(&self, attr: &str) -> bool {
        self.syntax(attr) == Some(DN_SYNTAX_OID)
    }

    /// Whether the attribute is single-valued; `None` when unknown.
    #[must_use]
    pub fn single_value(&self, attr: &str) -> Option<bool> {
        if let Some(single) = single_value_override(attr) {
            return Some(single);
        }
        self.schema
            .as_deref()?
            .attribute_type(attr)
            .map(|attribute_type| attribute_type.single_value)
    }

    /// Decodes one wire value of `attr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] when the bytes are not valid for the target type.
    pub fn decode(&self, raw: &[u8], attr: &str) -> Result<Value> {
        if !self.decode_attrs {
            return Ok(Value::Bytes(raw.to_vec()));
        }

        let target = self.syntax(attr).map_or(DecodeTarget::Text, syntax_target);
        if target == DecodeTarget::Bytes {
            return Ok(Value::Bytes(raw.to_vec()));
        }

        let decoded = std::str::from_utf8(raw).ok().and_then(|text| match target {
            DecodeTarget::Dn => Dn::parse(text).ok().map(Value::Dn),
            _ => Some(Value::Text(text.to_string())),
        });

        decoded.ok_or_else(|| {
            let value = String::from_utf8_lossy(raw).into_owned();
            error!(attr, value = %value, ?target, "unable to convert attribute value");
            Error::InvalidValue {
                attr: attr.to_string(),
                value,
            }
        })
    }

    /// Decodes every value of `attr`.
    ///
    /// # Errors
    ///
    /// Returns the first decode failure.
    pub fn decode_all(&self, raw: &[Vec<u8>], attr: &str) -> Result<Vec<Value>> {
        raw.iter().map(|value| self.decode(value, attr)).collect()
    }
}
