//! Query construction and filtering API for models and backends.
//!
//! Every model operation that selects documents takes an [`Expr`] (for single filters) or a
//! [`Query`] (filters plus sort and pagination). Backends consume the same AST, either by
//! evaluating it directly or by translating it with a [`QueryVisitor`].
//!
//! # Query Building
//!
//! ```ignore
//! use docmodel::query::{Query, Filter, SortDirection};
//!
//! let query = Query::builder()
//!     .filter(Filter::eq("email", "john@example.com"))
//!     .sort("firstName", SortDirection::Asc)
//!     .limit(10)
//!     .build();
//! ```
//!
//! # Filter Expression API
//!
//! The [`Filter`] struct provides static constructors for filter expressions:
//!
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - String: `starts_with`, `ends_with`, `contains`, `not_contains`
//! - Existence: `exists`, `not_exists`
//! - Array: `any_of`, `none_of`
//! - Logical: `and`, `or`, `all`
//! - Identity: `id`
//!
//! Field names are dotted paths (`auth.hash`, `history.action`). A path that crosses an array
//! matches when any element matches.

use bson::{Bson, Document, oid::ObjectId};

use crate::error::DocumentStoreError;

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

/// One sort key of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    /// The dotted path to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// Equal to (exact match). Against an array field, matches when any element is equal.
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// String or array contains value.
    Contains,
    /// String or array does not contain value.
    NotContains,
    /// String starts with value.
    StartsWith,
    /// String ends with value.
    EndsWith,
    /// Field (or any element of it) equals any of the values.
    AnyOf,
    /// Field (and every element of it) equals none of the values.
    NoneOf,
}

/// A filter expression for querying documents.
///
/// Expressions can be combined using logical operators (`And`, `Or`, `Not`)
/// to build complex filter predicates. An empty `And` matches every document.
///
/// # Example
///
/// ```ignore
/// use docmodel::query::Filter;
///
/// let active_admins = Filter::and([
///     Filter::eq("_status", "active"),
///     Filter::any_of("roles", vec!["admin"]),
/// ]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOT of an expression (inverts the result).
    Not(Box<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The dotted path to compare.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    ///
    /// If this expression is already an OR, the other expression is appended
    /// to the list. Otherwise, a new OR expression is created.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression (logical NOT).
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Whether this expression matches every document.
    pub fn is_match_all(&self) -> bool {
        matches!(self, Expr::And(exprs) if exprs.iter().all(Expr::is_match_all))
    }

    /// Collects the `path == value` terms reachable through top-level ANDs.
    ///
    /// Upserts seed a new document from these terms, so `{ email: "a", age > 3 }` seeds
    /// `{ email: "a" }`.
    pub fn equality_terms(&self) -> Document {
        let mut out = Document::new();
        self.collect_equality(&mut out);
        out
    }

    fn collect_equality(&self, out: &mut Document) {
        match self {
            Expr::And(exprs) => {
                for expr in exprs {
                    expr.collect_equality(out);
                }
            }
            Expr::Field {
                field,
                op: FieldOp::Eq,
                value,
            } => {
                out.insert(field.clone(), value.clone());
            }
            _ => {}
        }
    }
}

impl Default for Expr {
    fn default() -> Self {
        Filter::all()
    }
}

/// A structured query for retrieving and filtering documents.
///
/// This struct encapsulates filters, limits, offsets, and sort specifications
/// for document queries. Use [`QueryBuilder`] for ergonomic construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Optional filter expression to match documents.
    pub filter: Option<Expr>,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
    /// Number of documents to skip (for pagination).
    pub offset: Option<usize>,
    /// Sort keys, applied in order.
    pub sort: Vec<Sort>,
}

impl Query {
    /// Creates a new empty query with no filters or limits.
    pub fn new() -> Self {
        Query {
            filter: None,
            limit: None,
            offset: None,
            sort: Vec::new(),
        }
    }

    /// Creates a query that selects documents matching `filter`.
    pub fn filtered(filter: Expr) -> Self {
        Query {
            filter: Some(filter),
            ..Query::new()
        }
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// The filter of this query, or a match-all expression.
    pub fn filter_or_all(&self) -> Expr {
        self.filter.clone().unwrap_or_default()
    }
}

impl From<Expr> for Query {
    fn from(filter: Expr) -> Self {
        Query::filtered(filter)
    }
}

/// Helper struct for constructing filter expressions.
///
/// All methods accept field names and values as `Into<String>` and `Into<Bson>` for ergonomics.
pub struct Filter;

impl Filter {
    /// Matches every document.
    pub fn all() -> Expr {
        Expr::And(Vec::new())
    }

    /// Matches the document with the given `_id`.
    pub fn id(id: ObjectId) -> Expr {
        Filter::eq("_id", id)
    }

    /// Matches documents where the field equals the specified value.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// Matches documents where the field does not equal the specified value.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches documents where the string field starts with the specified value.
    pub fn starts_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::StartsWith, value.into())
    }

    /// Matches documents where the string field ends with the specified value.
    pub fn ends_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::EndsWith, value.into())
    }

    /// Matches documents where the field (string or array) contains the specified value.
    pub fn contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Contains, value.into())
    }

    /// Matches documents where the field (string or array) does not contain the specified value.
    pub fn not_contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::NotContains, value.into())
    }

    /// Matches documents where the field is present.
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    /// Matches documents where the field is missing.
    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    /// Combines multiple expressions such that all must match for a document to be included.
    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    /// Combines multiple expressions such that any can match for a document to be included.
    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Matches documents where the field (or one of its elements) equals any of the values.
    pub fn any_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::AnyOf, value.into())
    }

    /// Matches documents where the field (and each of its elements) equals none of the values.
    pub fn none_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::NoneOf, value.into())
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        QueryBuilder { query: Query::default() }
    }

    /// Sets the filter expression for this query.
    ///
    /// # Arguments
    ///
    /// * `filter` - The filter expression to apply
    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.filter = Some(filter);
        self
    }

    /// Sets the maximum number of documents to return.
    ///
    /// # Arguments
    ///
    /// * `limit` - The maximum number of documents to return
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Sets the number of documents to skip (for pagination).
    ///
    /// # Arguments
    ///
    /// * `offset` - The number of documents to skip
    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Appends a sort key. Earlier keys take precedence.
    ///
    /// # Arguments
    ///
    /// * `field` - The dotted path to sort by
    /// * `direction` - The sort direction (ascending or descending)
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort.push(Sort { field: field.into(), direction });
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

/// Walks an [`Expr`] tree, producing a backend-specific representation.
pub trait QueryVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn equality_terms_follow_nested_ands_only() {
        let filter = Filter::and([
            Filter::eq("email", "john@example.com"),
            Filter::gt("age", 3),
            Filter::and([Filter::eq("auth.hash", "h")]),
            Filter::or([Filter::eq("ignored", true)]),
        ]);

        assert_eq!(
            filter.equality_terms(),
            doc! { "email": "john@example.com", "auth.hash": "h" }
        );
    }

    #[test]
    fn match_all_detection() {
        assert!(Filter::all().is_match_all());
        assert!(Filter::and([Filter::all()]).is_match_all());
        assert!(!Filter::eq("a", 1).is_match_all());
        assert!(Query::new().filter_or_all().is_match_all());
    }

    #[test]
    fn builder_accumulates_sort_keys() {
        let query = Query::builder()
            .filter(Filter::exists("email"))
            .sort("lastName", SortDirection::Asc)
            .sort("firstName", SortDirection::Desc)
            .offset(5)
            .limit(10)
            .build();

        assert_eq!(query.sort.len(), 2);
        assert_eq!(query.sort[1].direction, SortDirection::Desc);
        assert_eq!(query.offset, Some(5));
        assert_eq!(query.limit, Some(10));
    }

    #[test]
    fn and_appends_to_existing_conjunction() {
        let expr = Filter::eq("a", 1).and(Filter::eq("b", 2)).and(Filter::eq("c", 3));

        match expr {
            Expr::And(list) => assert_eq!(list.len(), 3),
            other => panic!("expected conjunction, got {other:?}"),
        }
    }
}
