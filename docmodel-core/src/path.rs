//! Dotted-path access into BSON documents.
//!
//! Paths use the MongoDB convention: `auth.hash` walks into a nested document, and a numeric
//! segment such as `history.0.action` indexes into an array. [`values_at`] additionally fans
//! out through arrays so that `history.action` yields the `action` of every history entry.

use bson::{Bson, Document};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Returns the value at `path`, following numeric segments into arrays.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Collects every value reachable at `path`, fanning out through arrays.
///
/// Array values found at the end of the path are returned as-is (not flattened), so the caller
/// can decide whether to match the array itself or its elements.
pub fn values_at<'a>(doc: &'a Document, path: &str) -> Vec<&'a Bson> {
    let segments = path.split('.').collect::<Vec<_>>();
    let mut out = Vec::new();

    if let Some((first, rest)) = segments.split_first() {
        if let Some(value) = doc.get(*first) {
            collect(value, rest, &mut out);
        }
    }

    out
}

fn collect<'a>(value: &'a Bson, rest: &[&str], out: &mut Vec<&'a Bson>) {
    let Some((segment, tail)) = rest.split_first() else {
        out.push(value);
        return;
    };

    match value {
        Bson::Document(inner) => {
            if let Some(next) = inner.get(*segment) {
                collect(next, tail, out);
            }
        }
        Bson::Array(items) => match segment.parse::<usize>() {
            Ok(index) => {
                if let Some(next) = items.get(index) {
                    collect(next, tail, out);
                }
            }
            Err(_) => {
                for item in items {
                    collect(item, rest, out);
                }
            }
        },
        _ => {}
    }
}

/// Sets the value at `path`, creating intermediate documents as needed.
pub fn set_path(doc: &mut Document, path: &str, value: Bson) -> DocumentStoreResult<()> {
    let (parent, last) = parent_mut(doc, path, true)?;

    match parent {
        Slot::Document(inner) => {
            inner.insert(last.to_string(), value);
            Ok(())
        }
        Slot::Array(items) => {
            let index = parse_index(path, last)?;
            match index.cmp(&items.len()) {
                std::cmp::Ordering::Less => items[index] = value,
                std::cmp::Ordering::Equal => items.push(value),
                std::cmp::Ordering::Greater => {
                    return Err(DocumentStoreError::InvalidDocument(format!(
                        "index {index} out of bounds at path '{path}'"
                    )));
                }
            }
            Ok(())
        }
    }
}

/// Removes the value at `path`, returning it when present.
pub fn unset_path(doc: &mut Document, path: &str) -> Option<Bson> {
    match parent_mut(doc, path, false).ok()? {
        (Slot::Document(inner), last) => inner.remove(last),
        (Slot::Array(items), last) => {
            let index = last.parse::<usize>().ok()?;
            // Mongo leaves a null hole rather than shifting the array.
            items
                .get_mut(index)
                .map(|slot| std::mem::replace(slot, Bson::Null))
        }
    }
}

/// Appends `value` to the array at `path`, creating the array when the path is missing.
pub fn push_path(doc: &mut Document, path: &str, value: Bson) -> DocumentStoreResult<()> {
    let (parent, last) = parent_mut(doc, path, true)?;

    let target = match parent {
        Slot::Document(inner) => {
            if !inner.contains_key(last) {
                inner.insert(last.to_string(), Bson::Array(Vec::new()));
            }
            inner.get_mut(last)
        }
        Slot::Array(items) => items.get_mut(parse_index(path, last)?),
    };

    match target {
        Some(Bson::Array(items)) => {
            items.push(value);
            Ok(())
        }
        _ => Err(DocumentStoreError::InvalidDocument(format!(
            "value at path '{path}' is not an array"
        ))),
    }
}

enum Slot<'a> {
    Document(&'a mut Document),
    Array(&'a mut Vec<Bson>),
}

fn parent_mut<'a, 'p>(
    doc: &'a mut Document,
    path: &'p str,
    create: bool,
) -> DocumentStoreResult<(Slot<'a>, &'p str)> {
    let segments = path.split('.').collect::<Vec<_>>();
    let Some((last, parents)) = segments.split_last() else {
        return Err(DocumentStoreError::InvalidDocument("empty path".to_string()));
    };

    let mut slot = Slot::Document(doc);

    for segment in parents {
        let next = match slot {
            Slot::Document(inner) => {
                if !inner.contains_key(*segment) {
                    if !create {
                        return Err(missing(path));
                    }
                    inner.insert(segment.to_string(), Bson::Document(Document::new()));
                }
                inner.get_mut(*segment)
            }
            Slot::Array(items) => items.get_mut(parse_index(path, segment)?),
        };

        slot = match next {
            Some(Bson::Document(inner)) => Slot::Document(inner),
            Some(Bson::Array(items)) => Slot::Array(items),
            _ => {
                return Err(DocumentStoreError::InvalidDocument(format!(
                    "cannot traverse scalar at path '{path}'"
                )));
            }
        };
    }

    Ok((slot, last))
}

fn parse_index(path: &str, segment: &str) -> DocumentStoreResult<usize> {
    segment.parse::<usize>().map_err(|_| {
        DocumentStoreError::InvalidDocument(format!(
            "segment '{segment}' of path '{path}' is not an array index"
        ))
    })
}

fn missing(path: &str) -> DocumentStoreError {
    DocumentStoreError::InvalidDocument(format!("path '{path}' does not exist"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn user() -> Document {
        doc! {
            "name": "John",
            "auth": { "hash": "h", "salt": "s" },
            "history": [
                { "action": "login" },
                { "action": "update" },
            ],
        }
    }

    #[test]
    fn get_path_walks_documents_and_indexes() {
        let doc = user();

        assert_eq!(get_path(&doc, "auth.hash"), Some(&Bson::String("h".into())));
        assert_eq!(
            get_path(&doc, "history.1.action"),
            Some(&Bson::String("update".into()))
        );
        assert_eq!(get_path(&doc, "history.action"), None);
        assert_eq!(get_path(&doc, "missing.path"), None);
    }

    #[test]
    fn values_at_fans_out_through_arrays() {
        let doc = user();
        let actions = values_at(&doc, "history.action");

        assert_eq!(
            actions,
            vec![&Bson::String("login".into()), &Bson::String("update".into())]
        );
    }

    #[test]
    fn set_path_creates_intermediate_documents() {
        let mut doc = Document::new();
        set_path(&mut doc, "profile.address.city", "Oslo".into()).unwrap();

        assert_eq!(
            get_path(&doc, "profile.address.city"),
            Some(&Bson::String("Oslo".into()))
        );
    }

    #[test]
    fn set_path_rejects_scalar_traversal() {
        let mut doc = user();

        assert!(set_path(&mut doc, "name.first", "J".into()).is_err());
    }

    #[test]
    fn push_and_unset() {
        let mut doc = user();
        push_path(&mut doc, "history", doc! { "action": "logout" }.into()).unwrap();
        push_path(&mut doc, "tags", "new".into()).unwrap();

        assert_eq!(doc.get_array("history").unwrap().len(), 3);
        assert_eq!(doc.get_array("tags").unwrap().len(), 1);
        assert!(push_path(&mut doc, "name", "x".into()).is_err());

        assert_eq!(unset_path(&mut doc, "auth.salt"), Some(Bson::String("s".into())));
        assert_eq!(get_path(&doc, "auth.salt"), None);
        assert_eq!(unset_path(&mut doc, "nothing.here"), None);
    }
}
