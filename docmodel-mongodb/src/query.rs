//! Query translation from the docmodel AST to MongoDB query syntax.
//!
//! This module translates docmodel's abstract query expressions into
//! MongoDB BSON documents for execution by the MongoDB query engine.
//! String operators translate to anchored, escaped, case-sensitive regular expressions so
//! they behave like the in-memory evaluator.

use bson::{Document, Bson, doc};

use docmodel_core::{
    query::{QueryVisitor, Expr, FieldOp, Filter},
    error::DocumentStoreError,
};


/// Translates docmodel query expressions into MongoDB query documents.
///
/// This struct implements the [`QueryVisitor`] trait to convert abstract
/// query expressions into MongoDB's native BSON query syntax.
pub(crate) struct MongoQueryTranslator;

impl MongoQueryTranslator {
    /// Translates `expr`, rendering a match-all expression as `{}`.
    pub fn translate(expr: &Expr) -> Result<Document, DocumentStoreError> {
        if expr.is_match_all() {
            return Ok(doc! {});
        }

        MongoQueryTranslator.visit_expr(expr)
    }

    /// Best-effort reverse translation of a partial filter read back from the server.
    /// Only plain equality documents are understood.
    pub fn equality_filter(filter: &Document) -> Option<Expr> {
        filter
            .iter()
            .map(|(field, value)| match value {
                Bson::Document(inner) if inner.keys().any(|key| key.starts_with('$')) => {
                    match inner.get("$eq") {
                        Some(value) if inner.len() == 1 => Some(Filter::eq(field.clone(), value.clone())),
                        _ => None,
                    }
                }
                value => Some(Filter::eq(field.clone(), value.clone())),
            })
            .collect::<Option<Vec<_>>>()
            .map(Filter::and)
    }
}

fn escape_regex(value: &str) -> String {
    let mut out = String::with_capacity(value.len());

    for c in value.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            out.push('\\');
        }

        out.push(c);
    }

    out
}

fn string_operand<'a>(op: &str, value: &'a Bson) -> Result<&'a str, DocumentStoreError> {
    match value {
        Bson::String(s) => Ok(s),
        _ => Err(DocumentStoreError::Backend(format!("{op} operator requires a string value"))),
    }
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            return Ok(doc! {});
        }

        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: match op {
                FieldOp::Eq => doc! { "$eq": value },
                FieldOp::Ne => doc! { "$ne": value },
                FieldOp::Gt => doc! { "$gt": value },
                FieldOp::Gte => doc! { "$gte": value },
                FieldOp::Lt => doc! { "$lt": value },
                FieldOp::Lte => doc! { "$lte": value },
                FieldOp::Contains => match value {
                    Bson::String(s) => doc! { "$regex": escape_regex(s) },
                    Bson::Array(arr) => doc! { "$all": arr },
                    other => doc! { "$eq": other },
                },
                FieldOp::NotContains => match value {
                    Bson::String(s) => doc! { "$not": { "$regex": escape_regex(s) } },
                    Bson::Array(arr) => doc! { "$nin": arr },
                    other => doc! { "$ne": other },
                },
                FieldOp::StartsWith => doc! {
                    "$regex": format!("^{}", escape_regex(string_operand("StartsWith", value)?)),
                },
                FieldOp::EndsWith => doc! {
                    "$regex": format!("{}$", escape_regex(string_operand("EndsWith", value)?)),
                },
                FieldOp::AnyOf => match value {
                    Bson::Array(_) => doc! { "$in": value },
                    single => doc! { "$in": [single] },
                },
                FieldOp::NoneOf => match value {
                    Bson::Array(_) => doc! { "$nin": value },
                    single => doc! { "$nin": [single] },
                },
            }
        })
    }
}
