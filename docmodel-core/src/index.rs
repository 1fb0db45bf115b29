//! Index declarations.
//!
//! An [`IndexDef`] is an ordered list of `(path, direction)` keys plus [`IndexOptions`].
//! Models collect them at enhancement time and materialize them on the backend with
//! `Model::sync_indexes`.
//!
//! ```ignore
//! use docmodel::index::{IndexDef, IndexOptions};
//!
//! let by_email = IndexDef::asc("email");
//! let unique = IndexOptions { unique: true, ..Default::default() };
//! let compound = IndexDef::asc("lastName").then_desc("firstName");
//! ```

use bson::{Bson, Document};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::Expr,
};

/// Direction or kind of a single index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDirection {
    Asc,
    Desc,
    Text,
    Hashed,
    Geo2dSphere,
}

impl IndexDirection {
    /// The value MongoDB uses for this key in an index specification.
    pub fn to_bson(self) -> Bson {
        match self {
            IndexDirection::Asc => Bson::Int32(1),
            IndexDirection::Desc => Bson::Int32(-1),
            IndexDirection::Text => Bson::String("text".to_string()),
            IndexDirection::Hashed => Bson::String("hashed".to_string()),
            IndexDirection::Geo2dSphere => Bson::String("2dsphere".to_string()),
        }
    }

    pub fn from_bson(value: &Bson) -> DocumentStoreResult<Self> {
        match value {
            Bson::Int32(1) | Bson::Int64(1) => Ok(IndexDirection::Asc),
            Bson::Int32(-1) | Bson::Int64(-1) => Ok(IndexDirection::Desc),
            Bson::Double(n) if *n == 1.0 => Ok(IndexDirection::Asc),
            Bson::Double(n) if *n == -1.0 => Ok(IndexDirection::Desc),
            Bson::String(kind) => match kind.as_str() {
                "text" => Ok(IndexDirection::Text),
                "hashed" => Ok(IndexDirection::Hashed),
                "2dsphere" => Ok(IndexDirection::Geo2dSphere),
                other => Err(DocumentStoreError::InvalidDocument(format!(
                    "unknown index kind '{other}'"
                ))),
            },
            other => Err(DocumentStoreError::InvalidDocument(format!(
                "invalid index direction {other}"
            ))),
        }
    }
}

/// Options of an index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexOptions {
    pub unique: bool,
    /// Skip documents that lack every indexed path.
    pub sparse: bool,
    /// Explicit index name. Defaults to MongoDB's `<path>_<direction>` convention.
    pub name: Option<String>,
    /// Only documents matching this filter are indexed.
    pub partial_filter: Option<Expr>,
    pub expire_after_seconds: Option<u64>,
}

/// A declared index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDef {
    pub keys: Vec<(String, IndexDirection)>,
    pub options: IndexOptions,
}

impl IndexDef {
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = (K, IndexDirection)>,
        K: Into<String>,
    {
        Self {
            keys: keys
                .into_iter()
                .map(|(path, direction)| (path.into(), direction))
                .collect(),
            options: IndexOptions::default(),
        }
    }

    pub fn asc(path: impl Into<String>) -> Self {
        Self::new([(path, IndexDirection::Asc)])
    }

    pub fn desc(path: impl Into<String>) -> Self {
        Self::new([(path, IndexDirection::Desc)])
    }

    pub fn then_asc(mut self, path: impl Into<String>) -> Self {
        self.keys.push((path.into(), IndexDirection::Asc));
        self
    }

    pub fn then_desc(mut self, path: impl Into<String>) -> Self {
        self.keys.push((path.into(), IndexDirection::Desc));
        self
    }

    pub fn with_options(mut self, options: IndexOptions) -> Self {
        self.options = options;
        self
    }

    /// Parses a MongoDB key specification such as `{ "email": 1, "createdAt": -1 }`.
    pub fn from_keys(keys: &Document) -> DocumentStoreResult<Self> {
        let keys = keys
            .iter()
            .map(|(path, direction)| Ok((path.clone(), IndexDirection::from_bson(direction)?)))
            .collect::<DocumentStoreResult<Vec<_>>>()?;

        if keys.is_empty() {
            return Err(DocumentStoreError::InvalidDocument(
                "index must have at least one key".to_string(),
            ));
        }

        Ok(Self {
            keys,
            options: IndexOptions::default(),
        })
    }

    /// Renders the key specification as a document.
    pub fn keys_document(&self) -> Document {
        self.keys
            .iter()
            .map(|(path, direction)| (path.clone(), direction.to_bson()))
            .collect()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|(path, _)| path.as_str())
    }

    /// The explicit name, or `email_1_createdAt_-1` style generated from the keys.
    pub fn name(&self) -> String {
        if let Some(name) = &self.options.name {
            return name.clone();
        }

        self.keys
            .iter()
            .map(|(path, direction)| format!("{path}_{}", direction_label(*direction)))
            .collect::<Vec<_>>()
            .join("_")
    }
}

fn direction_label(direction: IndexDirection) -> String {
    match direction.to_bson() {
        Bson::String(kind) => kind,
        other => other.to_string(),
    }
}
