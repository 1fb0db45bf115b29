//! Runtime schema declarations for document validation.
//!
//! A schema is a tree of [`SchemaNode`]s rooted at an [`ObjectSchema`]. Parsing a value
//! against it checks types, fills declared defaults and coerces identifiers, producing a new
//! value. Two entry points mirror each other:
//!
//! - [`Schema::parse_document`] / [`Schema::parse_typed`] fail with a [`ValidationError`]
//!   listing every issue found.
//! - [`Schema::safe_parse`] never fails; it returns a [`SafeParse`] that callers inspect.
//!
//! # Example
//!
//! ```ignore
//! use docmodel_core::schema::*;
//!
//! let user = Schema::<User>::new(object([
//!     ("firstName", string()),
//!     ("lastName", string().optional()),
//!     ("status", enumeration(["invited", "active", "deleted"]).default("active")),
//!     ("history", object([
//!         ("date", date()),
//!         ("action", enumeration(["login", "logout"])),
//!     ]).array()),
//! ]));
//! ```

mod issue;
mod parse;

use bson::{Bson, Document};
use serde::de::DeserializeOwned;
use std::{marker::PhantomData, sync::Arc};

pub use issue::{IssueCode, PathSegment, ValidationError, ValidationIssue};

pub use crate::object_id::object_id;

/// What to do with keys that an [`ObjectSchema`] does not declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownKeys {
    /// Drop undeclared keys from the parsed output.
    #[default]
    Strip,
    /// Keep undeclared keys unchanged.
    Passthrough,
    /// Report each undeclared key as an issue.
    Strict,
}

/// A node of a schema tree.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    String {
        min_length: Option<usize>,
        max_length: Option<usize>,
    },
    /// Any numeric BSON value (int32, int64 or double).
    Number,
    /// Integral numbers; doubles without a fractional part are narrowed to int64.
    Integer,
    Boolean,
    /// A BSON datetime. With `coerce`, RFC 3339 strings and epoch milliseconds are accepted.
    Date {
        coerce: bool,
    },
    /// See [`crate::object_id`].
    ObjectId,
    Any,
    Enum(Vec<String>),
    Literal(Bson),
    Array(Box<SchemaNode>),
    Object(ObjectSchema),
    /// Missing (or null) values are allowed and omitted from the output.
    Optional(Box<SchemaNode>),
    Nullable(Box<SchemaNode>),
    /// Missing (or null) values are replaced by the default before parsing.
    Default(Box<SchemaNode>, Bson),
    /// The first option that parses wins.
    Union(Vec<SchemaNode>),
}

impl SchemaNode {
    pub fn optional(self) -> SchemaNode {
        SchemaNode::Optional(Box::new(self))
    }

    pub fn nullable(self) -> SchemaNode {
        SchemaNode::Nullable(Box::new(self))
    }

    pub fn default(self, value: impl Into<Bson>) -> SchemaNode {
        SchemaNode::Default(Box::new(self), value.into())
    }

    pub fn array(self) -> SchemaNode {
        SchemaNode::Array(Box::new(self))
    }

    /// Sets a minimum length on a string node. Other nodes are returned unchanged.
    pub fn min_length(self, minimum: usize) -> SchemaNode {
        match self {
            SchemaNode::String { max_length, .. } => SchemaNode::String {
                min_length: Some(minimum),
                max_length,
            },
            other => other,
        }
    }

    /// Sets a maximum length on a string node. Other nodes are returned unchanged.
    pub fn max_length(self, maximum: usize) -> SchemaNode {
        match self {
            SchemaNode::String { min_length, .. } => SchemaNode::String {
                min_length,
                max_length: Some(maximum),
            },
            other => other,
        }
    }

    /// Enables string and timestamp coercion on a date node.
    pub fn coerce(self) -> SchemaNode {
        match self {
            SchemaNode::Date { .. } => SchemaNode::Date { coerce: true },
            other => other,
        }
    }

    /// Whether a missing value satisfies this node.
    pub fn accepts_missing(&self) -> bool {
        matches!(self, SchemaNode::Optional(_) | SchemaNode::Default(..))
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        match self {
            SchemaNode::Optional(inner)
            | SchemaNode::Nullable(inner)
            | SchemaNode::Default(inner, _)
            | SchemaNode::Array(inner) => inner.collect_paths(prefix, out),
            SchemaNode::Object(shape) => shape.collect_paths(prefix, out),
            SchemaNode::Union(options) => {
                for option in options {
                    option.collect_paths(prefix, out);
                }
            }
            _ => {}
        }
    }
}

impl From<ObjectSchema> for SchemaNode {
    fn from(shape: ObjectSchema) -> Self {
        SchemaNode::Object(shape)
    }
}

/// An object node: ordered keys with their nodes plus an unknown-key policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSchema {
    fields: Vec<(String, SchemaNode)>,
    unknown_keys: UnknownKeys,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            unknown_keys: UnknownKeys::Strip,
        }
    }

    /// Adds or replaces a field.
    pub fn field(mut self, key: impl Into<String>, node: impl Into<SchemaNode>) -> Self {
        let key = key.into();
        let node = node.into();

        match self.fields.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = node,
            None => self.fields.push((key, node)),
        }

        self
    }

    pub fn passthrough(mut self) -> Self {
        self.unknown_keys = UnknownKeys::Passthrough;
        self
    }

    pub fn strict(mut self) -> Self {
        self.unknown_keys = UnknownKeys::Strict;
        self
    }

    pub fn strip(mut self) -> Self {
        self.unknown_keys = UnknownKeys::Strip;
        self
    }

    pub fn unknown_keys(&self) -> UnknownKeys {
        self.unknown_keys
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &SchemaNode)> {
        self.fields
            .iter()
            .map(|(key, node)| (key.as_str(), node))
    }

    pub fn get(&self, key: &str) -> Option<&SchemaNode> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, node)| node)
    }

    pub fn optional(self) -> SchemaNode {
        SchemaNode::from(self).optional()
    }

    pub fn array(self) -> SchemaNode {
        SchemaNode::from(self).array()
    }

    pub fn default(self, value: impl Into<Bson>) -> SchemaNode {
        SchemaNode::from(self).default(value)
    }

    /// Enumerates every dotted path reachable through nested objects and arrays.
    ///
    /// For `{ auth: { hash }, history: [{ action }] }` this yields `auth`, `auth.hash`,
    /// `history` and `history.action`.
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_paths("", &mut out);
        out.dedup();
        out
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        for (key, node) in &self.fields {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };

            out.push(path.clone());
            node.collect_paths(&path, out);
        }
    }
}

pub fn string() -> SchemaNode {
    SchemaNode::String {
        min_length: None,
        max_length: None,
    }
}

pub fn number() -> SchemaNode {
    SchemaNode::Number
}

pub fn integer() -> SchemaNode {
    SchemaNode::Integer
}

pub fn boolean() -> SchemaNode {
    SchemaNode::Boolean
}

pub fn date() -> SchemaNode {
    SchemaNode::Date { coerce: false }
}

pub fn any() -> SchemaNode {
    SchemaNode::Any
}

pub fn enumeration<I, V>(values: I) -> SchemaNode
where
    I: IntoIterator<Item = V>,
    V: Into<String>,
{
    SchemaNode::Enum(values.into_iter().map(Into::into).collect())
}

pub fn literal(value: impl Into<Bson>) -> SchemaNode {
    SchemaNode::Literal(value.into())
}

pub fn array(item: impl Into<SchemaNode>) -> SchemaNode {
    SchemaNode::Array(Box::new(item.into()))
}

pub fn union(options: impl IntoIterator<Item = SchemaNode>) -> SchemaNode {
    SchemaNode::Union(options.into_iter().collect())
}

/// Builds an object schema from `(key, node)` pairs.
pub fn object<I, K, N>(fields: I) -> ObjectSchema
where
    I: IntoIterator<Item = (K, N)>,
    K: Into<String>,
    N: Into<SchemaNode>,
{
    fields
        .into_iter()
        .fold(ObjectSchema::new(), |shape, (key, node)| shape.field(key, node))
}

/// Result of a non-throwing parse.
#[derive(Debug, Clone, PartialEq)]
pub enum SafeParse<T> {
    Success(T),
    Failure(ValidationError),
}

impl<T> SafeParse<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, SafeParse::Success(_))
    }

    pub fn error(&self) -> Option<&ValidationError> {
        match self {
            SafeParse::Success(_) => None,
            SafeParse::Failure(error) => Some(error),
        }
    }

    pub fn into_result(self) -> Result<T, ValidationError> {
        match self {
            SafeParse::Success(value) => Ok(value),
            SafeParse::Failure(error) => Err(error),
        }
    }
}

impl<T> From<Result<T, ValidationError>> for SafeParse<T> {
    fn from(result: Result<T, ValidationError>) -> Self {
        match result {
            Ok(value) => SafeParse::Success(value),
            Err(error) => SafeParse::Failure(error),
        }
    }
}

/// A root object schema bound to the typed output `D` it produces.
///
/// `D` is any serde type; `bson::Document` gives an untyped schema.
#[derive(Debug)]
pub struct Schema<D> {
    root: Arc<ObjectSchema>,
    _marker: PhantomData<fn() -> D>,
}

impl<D> Clone for Schema<D> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            _marker: PhantomData,
        }
    }
}

impl<D> Schema<D> {
    pub fn new(root: ObjectSchema) -> Self {
        Self {
            root: Arc::new(root),
            _marker: PhantomData,
        }
    }

    pub fn root(&self) -> &ObjectSchema {
        &self.root
    }

    /// See [`ObjectSchema::paths`].
    pub fn paths(&self) -> Vec<String> {
        self.root.paths()
    }

    /// Strictly parses `value`, returning the coerced and defaulted value.
    pub fn parse(&self, value: &Bson) -> Result<Bson, ValidationError> {
        parse::parse_root(&self.root, value)
    }

    /// Strictly parses a document.
    pub fn parse_document(&self, doc: &Document) -> Result<Document, ValidationError> {
        match parse::parse_object(&self.root, doc)? {
            Bson::Document(parsed) => Ok(parsed),
            _ => Err(ValidationError::message(
                IssueCode::Custom,
                "object schema produced a non-document value",
            )),
        }
    }
}

impl<D: DeserializeOwned> Schema<D> {
    /// Strictly parses `value` and deserializes the result into `D`.
    pub fn parse_typed(&self, value: &Bson) -> Result<D, ValidationError> {
        let parsed = self.parse(value)?;

        bson::de::deserialize_from_bson(parsed)
            .map_err(|e| ValidationError::message(IssueCode::Custom, e.to_string()))
    }

    /// Parses without failing; inspect the returned [`SafeParse`].
    pub fn safe_parse(&self, value: &Bson) -> SafeParse<D> {
        self.parse_typed(value).into()
    }
}
