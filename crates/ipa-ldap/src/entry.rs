//! Directory entries with a typed view and a raw view over the same attributes.
//!
//! Every attribute is stored as two parallel lists: typed [`Value`]s (the "nice" view) and wire
//! byte strings (the raw view). Writing one side invalidates the other; the next read of either
//! side reconciles them against the last synchronized pair. Reads therefore take `&mut self`
//! and may fail when a value cannot be encoded or decoded.
//!
//! ```
//! use std::sync::Arc;
//! use ipa_ldap::{Dn, Entry, TypeCodec, Value};
//!
//! let mut entry = Entry::new(Arc::new(TypeCodec::default()), Dn::parse("cn=test").unwrap());
//! entry.set("description", "hello");
//! assert_eq!(entry.raw().get("description").unwrap(), Some(&vec![b"hello".to_vec()]));
//! assert_eq!(entry.first("DESCRIPTION").unwrap(), Some(Value::from("hello")));
//! ```

use crate::codec::TypeCodec;
use crate::dn::Dn;
use crate::value::Value;
use crate::Result;
use ipa_core::Error;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Attribute value as seen through the nice view.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// Set from a bare value; `None` when the attribute is empty.
    Single(Option<Value>),
    /// Set from a list.
    Multi(Vec<Value>),
}

impl AttrValue {
    /// All values, regardless of how the attribute was set.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Self::Single(value) => value.into_iter().collect(),
            Self::Multi(values) => values,
        }
    }

    /// Borrows the scalar of a [`AttrValue::Single`].
    #[must_use]
    pub fn as_single(&self) -> Option<&Value> {
        match self {
            Self::Single(value) => value.as_ref(),
            Self::Multi(_) => None,
        }
    }

    /// Returns true for [`AttrValue::Multi`].
    #[must_use]
    pub const fn is_multi(&self) -> bool {
        matches!(self, Self::Multi(_))
    }
}

impl From<Value> for AttrValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Single(None),
            Value::List(values) => Self::Multi(values),
            other => Self::Single(Some(other)),
        }
    }
}

impl From<Option<Value>> for AttrValue {
    fn from(value: Option<Value>) -> Self {
        value.map_or(Self::Single(None), Self::from)
    }
}

impl From<Vec<Value>> for AttrValue {
    fn from(values: Vec<Value>) -> Self {
        Self::Multi(values)
    }
}

impl From<Vec<&str>> for AttrValue {
    fn from(values: Vec<&str>) -> Self {
        Self::Multi(values.into_iter().map(Value::from).collect())
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(values: Vec<String>) -> Self {
        Self::Multi(values.into_iter().map(Value::from).collect())
    }
}

impl From<Vec<Dn>> for AttrValue {
    fn from(values: Vec<Dn>) -> Self {
        Self::Multi(values.into_iter().map(Value::from).collect())
    }
}

macro_rules! scalar_attr_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for AttrValue {
                fn from(value: $ty) -> Self {
                    Self::from(Value::from(value))
                }
            }
        )*
    };
}

scalar_attr_value!(&str, String, bool, i64, i32, u32, f64, Decimal, Dn);

#[derive(Debug, Clone, Default)]
struct Slot {
    nice: Option<Vec<Value>>,
    raw: Option<Vec<Vec<u8>>>,
    synced: Option<(Vec<Value>, Vec<Vec<u8>>)>,
}

/// A directory entry.
#[derive(Clone)]
pub struct Entry {
    codec: Arc<TypeCodec>,
    dn: Dn,
    names: HashMap<String, String>,
    slots: BTreeMap<String, Slot>,
    not_list: HashSet<String>,
    orig: BTreeMap<String, Vec<Vec<u8>>>,
}

impl Entry {
    /// Creates an empty entry.
    #[must_use]
    pub fn new(codec: Arc<TypeCodec>, dn: Dn) -> Self {
        Self {
            codec,
            dn,
            names: HashMap::new(),
            slots: BTreeMap::new(),
            not_list: HashSet::new(),
            orig: BTreeMap::new(),
        }
    }

    /// Copies this entry under another codec.
    ///
    /// Only the raw view crosses over; typed values are decoded again by the new codec.
    ///
    /// # Errors
    ///
    /// Returns an error when pending typed values cannot be encoded.
    pub fn copy_with_codec(&mut self, codec: Arc<TypeCodec>) -> Result<Self> {
        let raw = self.raw().to_map()?;
        let mut copy = Self::new(codec, self.dn.clone());
        copy.not_list = self.not_list.clone();
        copy.orig = self.orig.clone();
        for (name, values) in raw {
            copy.set_raw(&name, values);
        }
        Ok(copy)
    }

    /// Copies this entry under a different DN.
    #[must_use]
    pub fn with_dn(&self, dn: Dn) -> Self {
        let mut copy = self.clone();
        copy.dn = dn;
        copy
    }

    /// Codec used to convert between the views.
    #[must_use]
    pub fn codec(&self) -> &Arc<TypeCodec> {
        &self.codec
    }

    /// Distinguished name.
    #[must_use]
    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    /// Replaces the distinguished name.
    pub fn set_dn(&mut self, dn: Dn) {
        self.dn = dn;
    }

    /// Sets an attribute through the nice view.
    ///
    /// A bare value is remembered as such and read back bare; a list is read back as a list.
    pub fn set(&mut self, name: &str, value: impl Into<AttrValue>) {
        let key = self.add_attr_name(name);
        let values = match value.into() {
            AttrValue::Single(value) => {
                self.not_list.insert(key.clone());
                value.into_iter().collect()
            }
            AttrValue::Multi(values) => {
                self.not_list.remove(&key);
                values
            }
        };

        let slot = self.slots.entry(key).or_default();
        slot.nice = Some(values);
        slot.raw = None;
        slot.synced = None;
    }

    /// Reads an attribute through the nice view.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] when a raw value cannot be decoded, or
    /// [`Error::UnsupportedValue`] when a pending typed value cannot be encoded.
    pub fn get(&mut self, name: &str) -> Result<Option<AttrValue>> {
        let Some(key) = self.canonical(name) else {
            return Ok(None);
        };
        let values = self.load_nice(&key)?.clone();

        if self.not_list.contains(&key) {
            if values.len() <= 1 {
                return Ok(Some(AttrValue::Single(values.into_iter().next())));
            }
            self.not_list.remove(&key);
        }
        Ok(Some(AttrValue::Multi(values)))
    }

    /// All typed values of an attribute, empty when absent.
    ///
    /// # Errors
    ///
    /// See [`Entry::get`].
    pub fn values(&mut self, name: &str) -> Result<Vec<Value>> {
        Ok(self.get(name)?.map(AttrValue::into_values).unwrap_or_default())
    }

    /// First typed value of an attribute.
    ///
    /// # Errors
    ///
    /// See [`Entry::get`].
    pub fn first(&mut self, name: &str) -> Result<Option<Value>> {
        Ok(self.values(name)?.into_iter().next())
    }

    /// Mutable access to the typed values of an attribute.
    ///
    /// Changes are reconciled into the raw view on its next read.
    ///
    /// # Errors
    ///
    /// See [`Entry::get`].
    pub fn values_mut(&mut self, name: &str) -> Result<Option<&mut Vec<Value>>> {
        let Some(key) = self.canonical(name) else {
            return Ok(None);
        };
        self.load_nice(&key).map(Some)
    }

    /// Removes an attribute and every alias pointing at it.
    pub fn remove(&mut self, name: &str) -> bool {
        let Some(key) = self.canonical(name) else {
            return false;
        };
        self.names.retain(|_, canonical| *canonical != key);
        self.not_list.remove(&key);
        self.slots.remove(&key).is_some()
    }

    /// Returns true if the attribute (or one of its aliases) is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(&name.to_lowercase())
    }

    /// Canonical names of the present attributes.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true when the entry has no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Removes every attribute. The modification baseline is kept.
    pub fn clear(&mut self) {
        self.names.clear();
        self.slots.clear();
        self.not_list.clear();
    }

    /// Raw (byte string) view of the attributes.
    pub fn raw(&mut self) -> RawView<'_> {
        RawView { entry: self }
    }

    /// Single-value view of the attributes.
    pub fn single_value(&mut self) -> SingleValueView<'_> {
        SingleValueView { entry: self }
    }

    /// Takes the current raw view as the baseline for [`Entry::generate_modlist`].
    ///
    /// # Errors
    ///
    /// Returns an error when pending typed values cannot be encoded.
    pub fn reset_modlist(&mut self) -> Result<()> {
        self.orig = self.raw().to_map()?;
        Ok(())
    }

    /// Takes another entry's raw view as the baseline.
    ///
    /// # Errors
    ///
    /// Returns an error when the other entry's typed values cannot be encoded.
    pub fn reset_modlist_from(&mut self, other: &mut Entry) -> Result<()> {
        self.orig = other.raw().to_map()?;
        Ok(())
    }

    /// Raw values recorded at the last baseline.
    #[must_use]
    pub fn original(&self) -> &BTreeMap<String, Vec<Vec<u8>>> {
        &self.orig
    }

    pub(crate) fn set_raw(&mut self, name: &str, values: Vec<Vec<u8>>) {
        let key = self.add_attr_name(name);
        let slot = self.slots.entry(key).or_default();
        slot.raw = Some(values);
        slot.nice = None;
        slot.synced = None;
    }

    fn canonical(&self, name: &str) -> Option<String> {
        self.names.get(&name.to_lowercase()).cloned()
    }

    /// Registers `name`, renaming an existing attribute to this spelling, and returns the key
    /// to store under.
    fn add_attr_name(&mut self, name: &str) -> String {
        let lower = name.to_lowercase();

        if let Some(old) = self.names.get(&lower).cloned() {
            if old != name {
                for canonical in self.names.values_mut() {
                    if *canonical == old {
                        *canonical = name.to_string();
                    }
                }
                if let Some(slot) = self.slots.remove(&old) {
                    self.slots.insert(name.to_string(), slot);
                }
                if self.not_list.remove(&old) {
                    self.not_list.insert(name.to_string());
                }
                if let Some(values) = self.orig.remove(&old) {
                    self.orig.insert(name.to_string(), values);
                }
            }
            return name.to_string();
        }

        if let Some(attribute_type) = self
            .codec
            .schema()
            .and_then(|schema| schema.attribute_type(name))
        {
            for alias in &attribute_type.names {
                self.names.insert(alias.to_lowercase(), name.to_string());
            }
        }
        self.names.insert(lower, name.to_string());

        let migrated = self.orig.keys().find(|key| {
            key.as_str() != name
                && self.names.get(&key.to_lowercase()).map(String::as_str) == Some(name)
        });
        if let Some(old) = migrated.cloned() {
            if let Some(values) = self.orig.remove(&old) {
                self.orig.insert(name.to_string(), values);
            }
        }

        name.to_string()
    }

    fn load_nice(&mut self, key: &str) -> Result<&mut Vec<Value>> {
        let slot = self.slots.entry(key.to_string()).or_default();
        slot.nice.get_or_insert_with(Vec::new);
        if slot.raw.is_some() {
            self.sync_attr(key)?;
        }
        self.slots
            .get_mut(key)
            .and_then(|slot| slot.nice.as_mut())
            .ok_or_else(|| Error::not_found(key.to_string()))
    }

    fn load_raw(&mut self, key: &str) -> Result<&mut Vec<Vec<u8>>> {
        let slot = self.slots.entry(key.to_string()).or_default();
        slot.raw.get_or_insert_with(Vec::new);
        if slot.nice.is_some() {
            self.sync_attr(key)?;
        }
        self.slots
            .get_mut(key)
            .and_then(|slot| slot.raw.as_mut())
            .ok_or_else(|| Error::not_found(key.to_string()))
    }

    /// Reconciles the two views of one attribute against the last synchronized pair.
    ///
    /// All conversions happen before either list is touched, so a failed conversion leaves
    /// the attribute unchanged.
    fn sync_attr(&mut self, key: &str) -> Result<()> {
        let codec = Arc::clone(&self.codec);
        let Some(slot) = self.slots.get_mut(key) else {
            return Ok(());
        };
        let (Some(nice), Some(raw)) = (slot.nice.as_mut(), slot.raw.as_mut()) else {
            return Ok(());
        };

        let (nice_sync, raw_sync) = slot.synced.clone().unwrap_or_default();
        if *nice == nice_sync && *raw == raw_sync {
            return Ok(());
        }

        let nice_adds = difference(nice, &nice_sync);
        let nice_dels = difference(&nice_sync, nice);
        let raw_adds = difference(raw, &raw_sync);
        let raw_dels = difference(&raw_sync, raw);

        let nice_adds_encoded = encode_all(&nice_adds)?;
        let nice_dels_encoded = encode_all(&nice_dels)?;
        let raw_adds_decoded = codec.decode_all(&raw_adds, key)?;
        // Raw changes are matched against the typed list by wire form, so `Int(7)` and
        // `b"7"` are the same value.
        let mut nice_encoded = encode_all(nice)?;

        for encoded in &nice_dels_encoded {
            if !raw_adds.contains(encoded) {
                remove_first(raw, encoded);
            }
        }
        for deleted in &raw_dels {
            if nice_adds_encoded.contains(deleted) {
                continue;
            }
            if let Some(pos) = nice_encoded.iter().position(|encoded| encoded == deleted) {
                nice.remove(pos);
                nice_encoded.remove(pos);
            }
        }
        for encoded in nice_adds_encoded {
            if !raw_dels.contains(&encoded) && !raw.contains(&encoded) {
                raw.push(encoded);
            }
        }
        for (added, decoded) in raw_adds.into_iter().zip(raw_adds_decoded) {
            if !nice_dels_encoded.contains(&added) && !nice_encoded.contains(&added) {
                nice.push(decoded);
                nice_encoded.push(added);
            }
        }

        let multi = nice.len() > 1;
        slot.synced = Some((nice.clone(), raw.clone()));
        if multi {
            self.not_list.remove(key);
        }
        Ok(())
    }
}

fn difference<T: PartialEq + Clone>(left: &[T], right: &[T]) -> Vec<T> {
    let mut out: Vec<T> = Vec::new();
    for item in left {
        if !right.contains(item) && !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

fn remove_first<T: PartialEq>(list: &mut Vec<T>, item: &T) {
    if let Some(pos) = list.iter().position(|candidate| candidate == item) {
        list.remove(pos);
    }
}

fn encode_all(values: &[Value]) -> Result<Vec<Vec<u8>>> {
    values.iter().map(TypeCodec::encode_value).collect()
}

impl AsRef<Dn> for Entry {
    fn as_ref(&self) -> &Dn {
        &self.dn
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attributes = self
            .slots
            .iter()
            .map(|(name, slot)| {
                let shown = match (&slot.nice, &slot.raw) {
                    (Some(nice), _) => format!("{nice:?}"),
                    (None, Some(raw)) => format!(
                        "{:?}",
                        raw.iter()
                            .map(|value| String::from_utf8_lossy(value))
                            .collect::<Vec<_>>()
                    ),
                    (None, None) => "[]".to_string(),
                };
                (name.as_str(), shown)
            })
            .collect::<BTreeMap<_, _>>();

        f.debug_struct("Entry")
            .field("dn", &self.dn.as_str())
            .field("attributes", &attributes)
            .finish()
    }
}

/// Byte string view over an [`Entry`].
pub struct RawView<'a> {
    entry: &'a mut Entry,
}

impl RawView<'_> {
    /// Raw values of an attribute.
    ///
    /// # Errors
    ///
    /// Returns an error when pending typed values cannot be encoded.
    pub fn get(&mut self, name: &str) -> Result<Option<&Vec<Vec<u8>>>> {
        Ok(self.get_mut(name)?.map(|values| &*values))
    }

    /// Mutable raw values of an attribute. Changes reach the typed view on its next read.
    ///
    /// # Errors
    ///
    /// Returns an error when pending typed values cannot be encoded.
    pub fn get_mut(&mut self, name: &str) -> Result<Option<&mut Vec<Vec<u8>>>> {
        let Some(key) = self.entry.canonical(name) else {
            return Ok(None);
        };
        self.entry.load_raw(&key).map(Some)
    }

    /// Sets an attribute from raw values.
    pub fn set(&mut self, name: &str, values: Vec<Vec<u8>>) {
        self.entry.set_raw(name, values);
    }

    /// Removes an attribute.
    pub fn remove(&mut self, name: &str) -> bool {
        self.entry.remove(name)
    }

    /// Returns true if the attribute is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entry.contains(name)
    }

    /// Canonical attribute names.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entry.keys()
    }

    /// Every attribute with its raw values.
    ///
    /// # Errors
    ///
    /// Returns an error when pending typed values cannot be encoded.
    pub fn to_map(&mut self) -> Result<BTreeMap<String, Vec<Vec<u8>>>> {
        let mut map = BTreeMap::new();
        for key in self.entry.keys() {
            let values = self.entry.load_raw(&key)?.clone();
            map.insert(key, values);
        }
        Ok(map)
    }
}

/// View that reads and writes attributes as single values.
pub struct SingleValueView<'a> {
    entry: &'a mut Entry,
}

impl SingleValueView<'_> {
    /// The only value of an attribute, `None` when absent or empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyValues`] when the attribute holds more than one value.
    pub fn get(&mut self, name: &str) -> Result<Option<Value>> {
        let mut values = self.entry.values(name)?;
        if values.len() > 1 {
            return Err(Error::TooManyValues {
                attr: name.to_string(),
                count: values.len(),
            });
        }
        Ok(values.pop())
    }

    /// Sets an attribute to one value, or empties it with `None`.
    pub fn set(&mut self, name: &str, value: Option<Value>) {
        match value {
            Some(value) => self.entry.set(name, AttrValue::Multi(vec![value])),
            None => self.entry.set(name, AttrValue::Single(None)),
        }
    }

    /// Removes an attribute.
    pub fn remove(&mut self, name: &str) -> bool {
        self.entry.remove(name)
    }

    /// Returns true if the attribute is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entry.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    fn codec() -> Arc<TypeCodec> {
        let schema = Schema::parse(
            [
                "( 2.5.4.3 NAME ( 'cn' 'commonName' ) SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
                "( 2.5.4.31 NAME 'member' SYNTAX 1.3.6.1.4.1.1466.115.121.1.12 )",
                "( 2.16.840.1.113730.3.8.16.1.5 NAME 'ipatokenOTPdigits' \
                 SYNTAX 1.3.6.1.4.1.1466.115.121.1.27 SINGLE-VALUE )",
            ],
            [],
        );
        Arc::new(TypeCodec::new(Some(Arc::new(schema)), true))
    }

    fn entry() -> Entry {
        Entry::new(codec(), Dn::parse("cn=test,dc=example").unwrap())
    }

    #[test]
    fn nice_write_is_visible_raw() {
        let mut entry = entry();
        entry.set("member", vec![Dn::parse("uid=a,dc=example").unwrap()]);
        assert_eq!(
            entry.raw().get("member").unwrap(),
            Some(&vec![b"uid=a,dc=example".to_vec()])
        );
    }

    #[test]
    fn raw_write_is_visible_nice() {
        let mut entry = entry();
        entry
            .raw()
            .set("member", vec![b"uid=a,dc=example".to_vec(), b"uid=b,dc=example".to_vec()]);
        let values = entry.values("member").unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(
            values[0].as_dn(),
            Some(&Dn::parse("uid=a,dc=example").unwrap())
        );
    }

    #[test]
    fn scalar_marker_round_trips() {
        let mut entry = entry();
        entry.set("cn", "single");
        assert_eq!(
            entry.get("cn").unwrap(),
            Some(AttrValue::Single(Some(Value::from("single"))))
        );

        entry.set("cn", vec!["a", "b"]);
        assert_eq!(
            entry.get("cn").unwrap(),
            Some(AttrValue::Multi(vec![Value::from("a"), Value::from("b")]))
        );

        entry.set("cn", None::<Value>);
        assert_eq!(entry.get("cn").unwrap(), Some(AttrValue::Single(None)));
        assert_eq!(entry.raw().get("cn").unwrap(), Some(&Vec::new()));
    }

    #[test]
    fn marker_cleared_when_sync_finds_several_values() {
        let mut entry = entry();
        entry.set("cn", "one");
        entry.raw().get_mut("cn").unwrap().unwrap().push(b"two".to_vec());
        assert!(entry.get("cn").unwrap().unwrap().is_multi());
    }

    #[test]
    fn sync_is_idempotent() {
        let mut entry = entry();
        entry.set("cn", vec!["a", "b"]);
        let raw_first = entry.raw().get("cn").unwrap().cloned();
        let nice_first = entry.values("cn").unwrap();
        let raw_second = entry.raw().get("cn").unwrap().cloned();
        let nice_second = entry.values("cn").unwrap();
        assert_eq!(raw_first, raw_second);
        assert_eq!(nice_first, nice_second);
    }

    #[test]
    fn sequential_edits_propagate() {
        let mut entry = entry();
        entry.set("cn", vec!["a", "b"]);
        entry.raw().get("cn").unwrap();

        entry.values_mut("cn").unwrap().unwrap().retain(|v| v.as_str() != Some("a"));
        entry.values_mut("cn").unwrap().unwrap().push(Value::from("c"));
        entry.raw().get_mut("cn").unwrap().unwrap().push(b"d".to_vec());

        let raw = entry.raw().get("cn").unwrap().cloned().unwrap();
        assert_eq!(raw, vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
        let nice = entry.values("cn").unwrap();
        assert_eq!(
            nice,
            vec![Value::from("b"), Value::from("c"), Value::from("d")]
        );
    }

    #[test]
    fn edits_on_both_sides_since_last_sync_merge() {
        let mut entry = entry();
        entry.set("cn", vec!["a", "b", "x"]);
        entry.raw().get("cn").unwrap();

        // Same removal on both sides, plus a different addition on each.
        let slot = entry.slots.get_mut("cn").unwrap();
        slot.nice = Some(vec![Value::from("b"), Value::from("x"), Value::from("n")]);
        slot.raw = Some(vec![b"b".to_vec(), b"x".to_vec(), b"r".to_vec()]);

        assert_eq!(
            entry.values("cn").unwrap(),
            vec![
                Value::from("b"),
                Value::from("x"),
                Value::from("n"),
                Value::from("r")
            ]
        );
        assert_eq!(
            entry.raw().get("cn").unwrap().cloned().unwrap(),
            vec![b"b".to_vec(), b"x".to_vec(), b"r".to_vec(), b"n".to_vec()]
        );
    }

    #[test]
    fn same_change_on_both_sides_is_not_duplicated() {
        let mut entry = entry();
        entry.set("cn", vec!["x"]);
        entry.raw().get("cn").unwrap();

        let slot = entry.slots.get_mut("cn").unwrap();
        slot.nice = Some(vec![Value::from("y")]);
        slot.raw = Some(vec![b"y".to_vec()]);

        assert_eq!(entry.values("cn").unwrap(), vec![Value::from("y")]);
        assert_eq!(
            entry.raw().get("cn").unwrap(),
            Some(&vec![b"y".to_vec()])
        );
    }

    #[test]
    fn decode_failure_is_reported() {
        let mut entry = entry();
        entry.raw().set("member", vec![b"garbage".to_vec()]);
        let err = entry.get("member").unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));
    }

    #[test]
    fn names_are_case_insensitive_and_follow_latest_spelling() {
        let mut entry = entry();
        entry.set("cn", "x");
        assert!(entry.contains("CN"));
        assert!(entry.contains("commonName"));

        entry.set("CommonName", "y");
        assert_eq!(entry.keys(), vec!["CommonName".to_string()]);
        assert_eq!(entry.first("cn").unwrap(), Some(Value::from("y")));

        assert!(entry.remove("cn"));
        assert!(!entry.contains("commonname"));
        assert!(entry.is_empty());
    }

    #[test]
    fn rename_moves_baseline() {
        let mut entry = entry();
        entry.set("cn", "x");
        entry.reset_modlist().unwrap();
        entry.set("CN", "x");
        assert!(entry.original().contains_key("CN"));
        assert!(!entry.original().contains_key("cn"));
    }

    #[test]
    fn single_value_view() {
        let mut entry = entry();
        entry.single_value().set("ipatokenotpdigits", Some(Value::Int(6)));
        assert_eq!(
            entry.single_value().get("ipatokenotpdigits").unwrap(),
            Some(Value::Int(6))
        );
        assert_eq!(entry.single_value().get("missing").unwrap(), None);

        entry.set("cn", vec!["a", "b"]);
        let err = entry.single_value().get("cn").unwrap_err();
        assert_eq!(
            err,
            Error::TooManyValues {
                attr: "cn".to_string(),
                count: 2
            }
        );

        entry.single_value().set("cn", None);
        assert_eq!(entry.single_value().get("cn").unwrap(), None);
    }

    #[test]
    fn copy_with_codec_trusts_raw_only() {
        let mut entry = entry();
        entry.set("member", Dn::parse("uid=a,dc=example").unwrap());
        entry.reset_modlist().unwrap();

        let mut copy = entry
            .copy_with_codec(Arc::new(TypeCodec::new(None, false)))
            .unwrap();
        assert_eq!(copy.dn(), entry.dn());
        assert_eq!(
            copy.first("member").unwrap(),
            Some(Value::Bytes(b"uid=a,dc=example".to_vec()))
        );
        assert_eq!(copy.original(), entry.original());
    }

    #[test]
    fn with_dn_keeps_attributes() {
        let mut entry = entry();
        entry.set("cn", "x");
        let mut moved = entry.with_dn(Dn::parse("cn=other,dc=example").unwrap());
        assert_eq!(moved.dn().to_string(), "cn=other,dc=example");
        assert_eq!(moved.first("cn").unwrap(), Some(Value::from("x")));
    }

    #[test]
    fn encoding_a_container_fails() {
        let mut entry = entry();
        entry.set("cn", vec![Value::List(vec![Value::from("nested")])]);
        let err = entry.raw().get("cn").unwrap_err();
        assert!(matches!(err, Error::UnsupportedValue(_)));
    }

    #[test]
    fn raw_removal_reaches_integer_values() {
        let mut entry = entry();
        entry.set("ipatokenotpdigits", vec![Value::Int(6)]);
        assert_eq!(entry.raw().get("ipatokenotpdigits").unwrap(), Some(&vec![b"6".to_vec()]));

        entry.raw().get_mut("ipatokenotpdigits").unwrap().unwrap().clear();
        assert!(entry.values("ipatokenotpdigits").unwrap().is_empty());
    }

    #[test]
    fn raw_removal_reaches_boolean_values() {
        let mut entry = entry();
        entry.set("cn", vec![Value::Bool(true), Value::from("x")]);
        entry.raw().get("cn").unwrap();

        entry
            .raw()
            .get_mut("cn")
            .unwrap()
            .unwrap()
            .retain(|value| value.as_slice() != b"TRUE");
        assert_eq!(entry.values("cn").unwrap(), vec![Value::from("x")]);
    }

    #[test]
    fn raw_removal_reaches_text_under_dn_syntax() {
        let mut entry = entry();
        entry.set("member", vec!["uid=a,dc=example"]);
        entry.raw().get("member").unwrap();

        entry.raw().get_mut("member").unwrap().unwrap().clear();
        assert!(entry.values("member").unwrap().is_empty());
        assert_eq!(entry.raw().get("member").unwrap(), Some(&Vec::new()));
    }

    #[test]
    fn same_addition_on_both_views_is_kept_once() {
        let mut entry = entry();
        entry.set("ipatokenotpdigits", vec![Value::Int(6)]);
        entry.raw().get("ipatokenotpdigits").unwrap();

        let slot = entry.slots.get_mut("ipatokenotpdigits").unwrap();
        slot.nice.as_mut().unwrap().push(Value::Int(7));
        slot.raw.as_mut().unwrap().push(b"7".to_vec());

        assert_eq!(
            entry.values("ipatokenotpdigits").unwrap(),
            vec![Value::Int(6), Value::Int(7)]
        );
        assert_eq!(
            entry.raw().get("ipatokenotpdigits").unwrap(),
            Some(&vec![b"6".to_vec(), b"7".to_vec()])
        );
    }
}
