//! Parsed directory schema.
//!
//! Attribute type and object class definitions are read from the subschema entry in the
//! RFC 4512 description format, for example:
//!
//! ```text
//! ( 2.5.4.3 NAME ( 'cn' 'commonName' ) SUP name SYNTAX 1.3.6.1.4.1.1466.115.121.1.15{256} )
//! ```

use std::collections::HashMap;
use tracing::warn;

/// Maximum number of SUP hops followed when resolving an inherited syntax.
const MAX_SUP_DEPTH: usize = 16;

/// Parsed attribute type definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeType {
    /// Numeric OID.
    pub oid: String,
    /// Declared names, first is the primary name.
    pub names: Vec<String>,
    /// Superior attribute type.
    pub sup: Option<String>,
    /// Syntax OID with any length bound stripped.
    pub syntax: Option<String>,
    /// Length bound from `SYNTAX oid{len}`.
    pub syntax_len: Option<u32>,
    /// Whether the attribute holds at most one value.
    pub single_value: bool,
    /// Whether the attribute is operational and read-only.
    pub no_user_modification: bool,
    /// USAGE, defaults to `userApplications`.
    pub usage: String,
}

impl AttributeType {
    /// Primary name, or the OID when the type has no name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.names.first().map_or(self.oid.as_str(), String::as_str)
    }
}

/// Object class kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClassKind {
    /// `STRUCTURAL` (the default).
    Structural,
    /// `AUXILIARY`.
    Auxiliary,
    /// `ABSTRACT`.
    Abstract,
}

/// Parsed object class definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectClass {
    /// Numeric OID.
    pub oid: String,
    /// Declared names.
    pub names: Vec<String>,
    /// Superior classes.
    pub sup: Vec<String>,
    /// Class kind.
    pub kind: ObjectClassKind,
    /// Required attributes.
    pub must: Vec<String>,
    /// Allowed attributes.
    pub may: Vec<String>,
}

/// Attribute types and object classes published by one server.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    attribute_types: Vec<AttributeType>,
    object_classes: Vec<ObjectClass>,
    attribute_index: HashMap<String, usize>,
    class_index: HashMap<String, usize>,
}

impl Schema {
    /// Builds a schema from raw definition strings.
    ///
    /// Definitions that cannot be parsed are skipped with a warning.
    pub fn parse<'a, A, O>(attribute_types: A, object_classes: O) -> Self
    where
        A: IntoIterator<Item = &'a str>,
        O: IntoIterator<Item = &'a str>,
    {
        let mut schema = Self::default();

        for definition in attribute_types {
            match parse_attribute_type(definition) {
                Some(attribute_type) => schema.insert_attribute_type(attribute_type),
                None => warn!(definition, "skipping malformed attribute type definition"),
            }
        }

        for definition in object_classes {
            match parse_object_class(definition) {
                Some(object_class) => schema.insert_object_class(object_class),
                None => warn!(definition, "skipping malformed object class definition"),
            }
        }

        schema
    }

    fn insert_attribute_type(&mut self, attribute_type: AttributeType) {
        let idx = self.attribute_types.len();
        self.attribute_index
            .insert(attribute_type.oid.to_ascii_lowercase(), idx);
        for name in &attribute_type.names {
            self.attribute_index.insert(name.to_ascii_lowercase(), idx);
        }
        self.attribute_types.push(attribute_type);
    }

    fn insert_object_class(&mut self, object_class: ObjectClass) {
        let idx = self.object_classes.len();
        self.class_index
            .insert(object_class.oid.to_ascii_lowercase(), idx);
        for name in &object_class.names {
            self.class_index.insert(name.to_ascii_lowercase(), idx);
        }
        self.object_classes.push(object_class);
    }

    /// Looks up an attribute type by any of its names or its OID.
    #[must_use]
    pub fn attribute_type(&self, name: &str) -> Option<&AttributeType> {
        self.attribute_index
            .get(&name.to_ascii_lowercase())
            .map(|idx| &self.attribute_types[*idx])
    }

    /// Looks up an object class by any of its names or its OID.
    #[must_use]
    pub fn object_class(&self, name: &str) -> Option<&ObjectClass> {
        self.class_index
            .get(&name.to_ascii_lowercase())
            .map(|idx| &self.object_classes[*idx])
    }

    /// Syntax OID of an attribute, following SUP when the type does not declare one.
    #[must_use]
    pub fn attribute_syntax(&self, name: &str) -> Option<&str> {
        let mut current = self.attribute_type(name)?;
        for _ in 0..MAX_SUP_DEPTH {
            if let Some(syntax) = current.syntax.as_deref() {
                return Some(syntax);
            }
            current = self.attribute_type(current.sup.as_deref()?)?;
        }
        None
    }

    /// All parsed attribute types.
    #[must_use]
    pub fn attribute_types(&self) -> &[AttributeType] {
        &self.attribute_types
    }

    /// All parsed object classes.
    #[must_use]
    pub fn object_classes(&self) -> &[ObjectClass] {
        &self.object_classes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Quoted(String),
    Word(String),
}

fn tokenize(definition: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = definition.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '\'' => {
                chars.next();
                let mut quoted = String::new();
                loop {
                    match chars.next()? {
                        '\'' => break,
                        c => quoted.push(c),
                    }
                }
                tokens.push(Token::Quoted(quoted));
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == '\'' {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }

    Some(tokens)
}

/// Keywords that take no value.
const FLAG_KEYWORDS: &[&str] = &[
    "SINGLE-VALUE",
    "COLLECTIVE",
    "NO-USER-MODIFICATION",
    "OBSOLETE",
    "ABSTRACT",
    "STRUCTURAL",
    "AUXILIARY",
];

struct Definition {
    oid: String,
    fields: Vec<(String, Vec<String>)>,
}

impl Definition {
    fn parse(text: &str) -> Option<Self> {
        let tokens = tokenize(text)?;
        let mut iter = tokens.into_iter().peekable();

        if iter.next()? != Token::Open {
            return None;
        }
        let oid = match iter.next()? {
            Token::Word(oid) | Token::Quoted(oid) => oid,
            _ => return None,
        };

        let mut fields = Vec::new();
        loop {
            let keyword = match iter.next()? {
                Token::Close => break,
                Token::Word(keyword) => keyword.to_ascii_uppercase(),
                _ => return None,
            };

            if FLAG_KEYWORDS.contains(&keyword.as_str()) {
                fields.push((keyword, Vec::new()));
                continue;
            }

            let values = match iter.next()? {
                Token::Open => {
                    let mut values = Vec::new();
                    loop {
                        match iter.next()? {
                            Token::Close => break,
                            Token::Quoted(value) => values.push(value),
                            Token::Word(word) => values.extend(
                                word.split('$')
                                    .filter(|part| !part.is_empty())
                                    .map(str::to_string),
                            ),
                            Token::Open => return None,
                        }
                    }
                    values
                }
                Token::Quoted(value) | Token::Word(value) => vec![value],
                Token::Close => return None,
            };
            fields.push((keyword, values));
        }

        Some(Self { oid, fields })
    }

    fn get(&self, keyword: &str) -> Option<&[String]> {
        self.fields
            .iter()
            .find(|(name, _)| name == keyword)
            .map(|(_, values)| values.as_slice())
    }

    fn first(&self, keyword: &str) -> Option<String> {
        self.get(keyword).and_then(|values| values.first().cloned())
    }

    fn list(&self, keyword: &str) -> Vec<String> {
        self.get(keyword).map(<[String]>::to_vec).unwrap_or_default()
    }

    fn has(&self, keyword: &str) -> bool {
        self.get(keyword).is_some()
    }
}

fn parse_attribute_type(text: &str) -> Option<AttributeType> {
    let definition = Definition::parse(text)?;

    let (syntax, syntax_len) = match definition.first("SYNTAX") {
        Some(raw) => match raw.split_once('{') {
            Some((oid, bound)) => (
                Some(oid.to_string()),
                bound.trim_end_matches('}').parse().ok(),
            ),
            None => (Some(raw), None),
        },
        None => (None, None),
    };

    Some(AttributeType {
        names: definition.list("NAME"),
        sup: definition.first("SUP"),
        syntax,
        syntax_len,
        single_value: definition.has("SINGLE-VALUE"),
        no_user_modification: definition.has("NO-USER-MODIFICATION"),
        usage: definition
            .first("USAGE")
            .unwrap_or_else(|| "userApplications".to_string()),
        oid: definition.oid,
    })
}

fn parse_object_class(text: &str) -> Option<ObjectClass> {
    let definition = Definition::parse(text)?;

    let kind = if definition.has("AUXILIARY") {
        ObjectClassKind::Auxiliary
    } else if definition.has("ABSTRACT") {
        ObjectClassKind::Abstract
    } else {
        ObjectClassKind::Structural
    };

    Some(ObjectClass {
        names: definition.list("NAME"),
        sup: definition.list("SUP"),
        kind,
        must: definition.list("MUST"),
        may: definition.list("MAY"),
        oid: definition.oid,
    })
}
