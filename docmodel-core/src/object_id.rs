//! Identifier coercion.
//!
//! [`object_id`] is an ordinary [`SchemaNode`] that accepts any of:
//!
//! - an [`ObjectId`] value,
//! - a 24-character hex string,
//! - a document whose `_id` field is one of the above (a populated reference),
//!
//! and normalizes all three to a BSON `ObjectId`. Because it is a plain node it composes with
//! the other combinators:
//!
//! ```ignore
//! use docmodel_core::{object_id::object_id, schema::{object, string}};
//!
//! let post = object([
//!     ("title", string()),
//!     ("author", object_id()),
//!     ("commenters", object_id().array()),
//!     ("editor", object_id().optional()),
//! ]);
//! ```

use bson::{Bson, oid::ObjectId};

use crate::schema::{IssueCode, SchemaNode, ValidationError};

/// Message reported for every identifier that fails to coerce.
pub const INVALID_OBJECT_ID: &str = "invalid object id";

/// Returns a schema node that coerces its input to an [`ObjectId`].
pub fn object_id() -> SchemaNode {
    SchemaNode::ObjectId
}

/// Coerces a raw identifier, its hex string form, or a document carrying `_id`.
pub fn coerce_object_id(value: &Bson) -> Result<ObjectId, ValidationError> {
    match value {
        Bson::Document(doc) => match doc.get("_id") {
            Some(inner @ (Bson::ObjectId(_) | Bson::String(_))) => coerce_raw(inner),
            _ => Err(invalid()),
        },
        other => coerce_raw(other),
    }
}

/// Reports whether `value` is a hex string or identifier accepted by [`coerce_object_id`].
pub fn is_valid_object_id(value: &str) -> bool {
    ObjectId::parse_str(value).is_ok()
}

fn coerce_raw(value: &Bson) -> Result<ObjectId, ValidationError> {
    match value {
        Bson::ObjectId(id) => Ok(*id),
        Bson::String(hex) => ObjectId::parse_str(hex).map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

fn invalid() -> ValidationError {
    ValidationError::message(IssueCode::InvalidObjectId, INVALID_OBJECT_ID)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Schema, object};
    use bson::doc;

    const HEX: &str = "507f1f77bcf86cd799439011";

    #[test]
    fn coerces_hex_string() {
        let id = coerce_object_id(&Bson::String(HEX.into())).unwrap();

        assert_eq!(id, ObjectId::parse_str(HEX).unwrap());
    }

    #[test]
    fn passes_through_identifier() {
        let id = ObjectId::new();

        assert_eq!(coerce_object_id(&Bson::ObjectId(id)).unwrap(), id);
    }

    #[test]
    fn extracts_id_from_wrapping_document() {
        let id = coerce_object_id(&Bson::Document(doc! { "_id": HEX, "name": "x" })).unwrap();

        assert_eq!(id.to_hex(), HEX);
    }

    #[test]
    fn rejects_malformed_strings() {
        let err = coerce_object_id(&Bson::String("not-an-id".into())).unwrap_err();

        assert_eq!(err.to_string(), INVALID_OBJECT_ID);
        assert_eq!(err.issues()[0].code, IssueCode::InvalidObjectId);
        assert!(coerce_object_id(&Bson::Document(doc! { "_id": "nope" })).is_err());
        assert!(coerce_object_id(&Bson::Int32(4)).is_err());
        assert!(!is_valid_object_id("not-an-id"));
    }

    #[test]
    fn composes_with_array_and_optional() {
        let schema = Schema::<bson::Document>::new(object([
            ("friends", object_id().array()),
            ("editor", object_id().optional()),
            ("owner", object_id().default(Bson::String(HEX.into()))),
        ]));

        let parsed = schema
            .parse_document(&doc! { "friends": [HEX, { "_id": HEX }] })
            .unwrap();

        let expected = ObjectId::parse_str(HEX).unwrap();
        assert_eq!(
            parsed.get_array("friends").unwrap(),
            &vec![Bson::ObjectId(expected), Bson::ObjectId(expected)]
        );
        assert!(!parsed.contains_key("editor"));
        assert_eq!(parsed.get_object_id("owner").unwrap(), expected);

        let err = schema
            .parse_document(&doc! { "friends": ["bad"] })
            .unwrap_err();
        assert_eq!(err.to_string(), "friends.0: invalid object id");
    }
}
