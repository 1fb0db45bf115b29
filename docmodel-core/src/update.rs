//! Update documents applied client-side.
//!
//! Supported operators, all on dotted paths:
//!
//! - `$set: { path: value }`
//! - `$unset: { path: "" }`
//! - `$inc: { path: number }`
//! - `$push: { path: value }` and `$push: { path: { $each: [values] } }`
//!
//! Top-level keys that do not start with `$` are treated as `$set`, so
//! `{ "email": "a@b.c" }` and `{ "$set": { "email": "a@b.c" } }` are equivalent.

use bson::{Bson, Document, doc, oid::ObjectId};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    path::{get_path, push_path, set_path, unset_path},
    query::Expr,
};

/// The document an upsert starts from: the equality terms of `filter` on dotted paths, with the
/// filter's `_id` or a fresh one.
pub fn upsert_seed(filter: Option<&Expr>) -> DocumentStoreResult<Document> {
    let terms = filter.map(Expr::equality_terms).unwrap_or_default();
    let id = match terms.get("_id") {
        Some(Bson::ObjectId(id)) => *id,
        _ => ObjectId::new(),
    };
    let mut seed = doc! { "_id": id };

    for (path, value) in terms {
        if path != "_id" {
            set_path(&mut seed, &path, value)?;
        }
    }

    Ok(seed)
}

/// Applies `update` to `target` and reports whether anything changed.
///
/// `_id` cannot be modified.
pub fn apply_update(target: &mut Document, update: &Document) -> DocumentStoreResult<bool> {
    let before = target.clone();

    for (key, value) in update {
        if !key.starts_with('$') {
            set_field(target, key, value.clone())?;
            continue;
        }

        let fields = value.as_document().ok_or_else(|| {
            DocumentStoreError::InvalidDocument(format!("operator {key} expects a document"))
        })?;

        match key.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_field(target, path, value.clone())?;
                }
            }
            "$unset" => {
                for (path, _) in fields {
                    guard_id(path)?;
                    unset_path(target, path);
                }
            }
            "$inc" => {
                for (path, amount) in fields {
                    guard_id(path)?;
                    let current = get_path(target, path).cloned().unwrap_or(Bson::Int32(0));
                    set_path(target, path, increment(path, &current, amount)?)?;
                }
            }
            "$push" => {
                for (path, value) in fields {
                    guard_id(path)?;
                    match value {
                        Bson::Document(spec) if spec.contains_key("$each") => {
                            let items = spec.get_array("$each").map_err(|_| {
                                DocumentStoreError::InvalidDocument(format!(
                                    "$each at '{path}' must be an array"
                                ))
                            })?;

                            for item in items {
                                push_path(target, path, item.clone())?;
                            }
                        }
                        other => push_path(target, path, other.clone())?,
                    }
                }
            }
            other => {
                return Err(DocumentStoreError::Unsupported(format!(
                    "update operator {other}"
                )));
            }
        }
    }

    Ok(*target != before)
}

fn set_field(target: &mut Document, path: &str, value: Bson) -> DocumentStoreResult<()> {
    if path == "_id" {
        return match target.get("_id") {
            Some(existing) if *existing == value => Ok(()),
            _ => Err(immutable_id()),
        };
    }

    set_path(target, path, value)
}

fn guard_id(path: &str) -> DocumentStoreResult<()> {
    if path == "_id" {
        Err(immutable_id())
    } else {
        Ok(())
    }
}

fn immutable_id() -> DocumentStoreError {
    DocumentStoreError::InvalidDocument("the _id field is immutable".to_string())
}

fn increment(path: &str, current: &Bson, amount: &Bson) -> DocumentStoreResult<Bson> {
    let value = match (current, amount) {
        (Bson::Int32(a), Bson::Int32(b)) => a
            .checked_add(*b)
            .map(Bson::Int32)
            .unwrap_or_else(|| Bson::Int64(i64::from(*a) + i64::from(*b))),
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(i64::from(*a).saturating_add(*b)),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a.saturating_add(i64::from(*b))),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a.saturating_add(*b)),
        (current, amount) => match (as_f64(current), as_f64(amount)) {
            (Some(a), Some(b)) => Bson::Double(a + b),
            _ => {
                return Err(DocumentStoreError::InvalidDocument(format!(
                    "cannot apply $inc to non-numeric value at '{path}'"
                )));
            }
        },
    };

    Ok(value)
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}
