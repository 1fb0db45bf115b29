//! Query expression evaluation for in-memory document filtering.
//!
//! This module provides the evaluation engine for query expressions, enabling filtering,
//! comparison and sorting of BSON documents. Field names are dotted paths; a path that
//! crosses an array matches when any element matches, as in MongoDB.

use std::{cmp::Ordering, collections::HashMap};
use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};

use docmodel_core::{
    query::{QueryVisitor, Expr, FieldOp},
    error::{DocumentStoreError, DocumentStoreResult},
    path::values_at,
};


/// Type-erased, comparable representation of BSON values.
///
/// This enum wraps BSON values and provides comparison operations for
/// filtering queries. It normalizes numeric types to f64 for easy comparison.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// DateTime value
    DateTime(DateTime),
    /// ObjectId value
    ObjectId(ObjectId),
    /// String value
    String(&'a str),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Map/Object of comparable values
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Array(arr) => Comparable::Array(
                arr
                    .iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            Bson::Document(doc) => Comparable::Map(
                doc
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>()
            ),
            _ => Comparable::Null, // Other types are not comparable
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Whether two BSON values are equal once numbers are normalized.
pub(crate) fn values_equal(left: &Bson, right: &Bson) -> bool {
    Comparable::from(left) == Comparable::from(right)
}

/// Sort order of two optional values. Missing and null values sort first; values of
/// different types compare equal.
pub(crate) fn sort_order(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let left = left.map(Comparable::from).unwrap_or(Comparable::Null);
    let right = right.map(Comparable::from).unwrap_or(Comparable::Null);

    match (&left, &right) {
        (Comparable::Null, Comparable::Null) => Ordering::Equal,
        (Comparable::Null, _) => Ordering::Less,
        (_, Comparable::Null) => Ordering::Greater,
        _ => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
    }
}


pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocumentStoreResult<bool> {
        self.visit_expr(expr)
    }

    pub fn matches(document: &Document, expr: &Expr) -> DocumentStoreResult<bool> {
        DocumentEvaluator::new(document).evaluate(expr)
    }

    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a Document>,
        expr: &Expr,
    ) -> DocumentStoreResult<Vec<Document>> {
        let mut out = Vec::new();

        for doc in documents {
            if DocumentEvaluator::new(doc).evaluate(expr)? {
                out.push(doc.clone());
            }
        }

        Ok(out)
    }

    /// Every value at `field`, with arrays expanded into their elements next to the array
    /// itself, so `{ friends: [a, b] }` yields `[a, b]`, `a` and `b`.
    fn candidates(&self, field: &str) -> Vec<&'a Bson> {
        let mut out = Vec::new();

        for value in values_at(self.document, field) {
            out.push(value);

            if let Bson::Array(items) = value {
                out.extend(items.iter());
            }
        }

        out
    }

    fn any_candidate(&self, field: &str, predicate: impl Fn(&Bson) -> bool) -> bool {
        self.candidates(field)
            .into_iter()
            .any(predicate)
    }

    fn equals(&self, field: &str, value: &Bson) -> bool {
        let candidates = self.candidates(field);

        if candidates.is_empty() {
            return matches!(value, Bson::Null);
        }

        candidates
            .into_iter()
            .any(|candidate| values_equal(candidate, value))
    }

    fn any_of(&self, field: &str, value: &Bson) -> bool {
        match value {
            Bson::Array(values) => values
                .iter()
                .any(|value| self.equals(field, value)),
            single => self.equals(field, single),
        }
    }
}

impl<'a> QueryVisitor for DocumentEvaluator<'a> {
    type Output = bool;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(!values_at(self.document, field).is_empty() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let expected = Comparable::from(value);

        Ok(match op {
            FieldOp::Eq => self.equals(field, value),
            FieldOp::Ne => !self.equals(field, value),
            FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => {
                self.any_candidate(field, |candidate| {
                    match Comparable::from(candidate).partial_cmp(&expected) {
                        Some(ordering) => match op {
                            FieldOp::Gt => ordering == Ordering::Greater,
                            FieldOp::Gte => ordering != Ordering::Less,
                            FieldOp::Lt => ordering == Ordering::Less,
                            _ => ordering != Ordering::Greater,
                        },
                        None => false,
                    }
                })
            },
            FieldOp::Contains => self.any_candidate(field, |candidate| contains(candidate, value)),
            FieldOp::NotContains => !self.any_candidate(field, |candidate| contains(candidate, value)),
            FieldOp::StartsWith => self.any_candidate(field, |candidate| {
                match (candidate, value) {
                    (Bson::String(left), Bson::String(right)) => left.starts_with(right.as_str()),
                    _ => false,
                }
            }),
            FieldOp::EndsWith => self.any_candidate(field, |candidate| {
                match (candidate, value) {
                    (Bson::String(left), Bson::String(right)) => left.ends_with(right.as_str()),
                    _ => false,
                }
            }),
            FieldOp::AnyOf => self.any_of(field, value),
            FieldOp::NoneOf => !self.any_of(field, value),
        })
    }
}

fn contains(candidate: &Bson, value: &Bson) -> bool {
    match (candidate, value) {
        (Bson::Array(items), value) => items
            .iter()
            .any(|item| values_equal(item, value)),
        (Bson::String(left), Bson::String(right)) => left.contains(right.as_str()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docmodel_core::query::Filter;

    fn user() -> Document {
        doc! {
            "firstName": "John",
            "email": "john@example.com",
            "logins": 3,
            "auth": { "hash": "abc" },
            "history": [
                { "action": "signup" },
                { "action": "login" },
            ],
            "friends": [ObjectId::parse_str("64b64c7f2f4e4a0d5c8b4567").unwrap()],
        }
    }

    fn check(expr: Expr) -> bool {
        DocumentEvaluator::matches(&user(), &expr).unwrap()
    }

    #[test]
    fn dotted_paths_fan_out_through_arrays() {
        assert!(check(Filter::eq("auth.hash", "abc")));
        assert!(check(Filter::eq("history.action", "login")));
        assert!(!check(Filter::eq("history.action", "logout")));
        assert!(check(Filter::exists("history.action")));
        assert!(check(Filter::not_exists("auth.salt")));
    }

    #[test]
    fn object_ids_and_numbers_compare_by_value() {
        let friend = ObjectId::parse_str("64b64c7f2f4e4a0d5c8b4567").unwrap();

        assert!(check(Filter::eq("friends", friend)));
        assert!(check(Filter::contains("friends", friend)));
        assert!(check(Filter::eq("logins", 3.0)));
        assert!(check(Filter::gte("logins", 3i64)));
        assert!(!check(Filter::gt("logins", 3)));
    }

    #[test]
    fn missing_fields_equal_null_only() {
        assert!(check(Filter::eq("lastName", Bson::Null)));
        assert!(!check(Filter::eq("lastName", "Doe")));
        assert!(check(Filter::ne("lastName", "Doe")));
    }

    #[test]
    fn set_membership() {
        assert!(check(Filter::any_of("history.action", vec!["logout", "signup"])));
        assert!(check(Filter::none_of("history.action", vec!["logout", "update"])));
        assert!(check(Filter::starts_with("email", "john@")));
        assert!(check(Filter::or([Filter::eq("firstName", "Jane"), Filter::ends_with("email", ".com")])));
    }

    #[test]
    fn missing_values_sort_first() {
        let one = Bson::Int32(1);

        assert_eq!(sort_order(None, Some(&one)), Ordering::Less);
        assert_eq!(sort_order(Some(&Bson::Double(2.0)), Some(&one)), Ordering::Greater);
    }
}
