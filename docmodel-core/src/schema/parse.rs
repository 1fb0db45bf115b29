use bson::{Bson, Document};

use super::{IssueCode, ObjectSchema, PathSegment, SchemaNode, UnknownKeys, ValidationError, ValidationIssue};
use crate::object_id::coerce_object_id;

pub(super) fn parse_root(root: &ObjectSchema, value: &Bson) -> Result<Bson, ValidationError> {
    let mut ctx = ParseContext::default();
    let parsed = ctx.node(&SchemaNode::Object(root.clone()), Some(value));
    ctx.finish(parsed)
}

pub(super) fn parse_object(root: &ObjectSchema, doc: &Document) -> Result<Bson, ValidationError> {
    let mut ctx = ParseContext::default();
    let parsed = ctx.object(root, doc).map(Bson::Document);
    ctx.finish(parsed)
}

#[derive(Default)]
struct ParseContext {
    path: Vec<PathSegment>,
    issues: Vec<ValidationIssue>,
}

impl ParseContext {
    fn finish(self, parsed: Option<Bson>) -> Result<Bson, ValidationError> {
        if !self.issues.is_empty() {
            return Err(ValidationError::new(self.issues));
        }

        parsed.ok_or_else(|| ValidationError::message(IssueCode::Required, "Required"))
    }

    fn report(&mut self, code: IssueCode, message: impl Into<String>) {
        self.issues
            .push(ValidationIssue::new(&self.path, code, message));
    }

    fn invalid_type(&mut self, expected: &str, received: Option<&Bson>) {
        let received = type_name(received);

        self.report(
            IssueCode::InvalidType {
                expected: expected.to_string(),
                received: received.to_string(),
            },
            format!("Expected {expected}, received {received}"),
        );
    }

    fn required(&mut self) -> Option<Bson> {
        self.report(IssueCode::Required, "Required");
        None
    }

    fn scoped<T>(&mut self, segment: PathSegment, f: impl FnOnce(&mut Self) -> T) -> T {
        self.path.push(segment);
        let out = f(self);
        self.path.pop();
        out
    }

    /// Parses `value` against `node`. `None` in the output means the key is omitted; failures
    /// are recorded in `issues`.
    fn node(&mut self, node: &SchemaNode, value: Option<&Bson>) -> Option<Bson> {
        match node {
            SchemaNode::Optional(inner) => match value {
                None | Some(Bson::Null) => None,
                Some(_) => self.node(inner, value),
            },
            SchemaNode::Default(inner, fallback) => match value {
                None | Some(Bson::Null) => self.node(inner, Some(fallback)),
                Some(_) => self.node(inner, value),
            },
            SchemaNode::Nullable(inner) => match value {
                Some(Bson::Null) => Some(Bson::Null),
                _ => self.node(inner, value),
            },
            SchemaNode::Any => value.cloned(),
            _ => match value {
                None => self.required(),
                Some(value) => self.present(node, value),
            },
        }
    }

    fn present(&mut self, node: &SchemaNode, value: &Bson) -> Option<Bson> {
        match node {
            SchemaNode::String {
                min_length,
                max_length,
            } => self.string(value, *min_length, *max_length),
            SchemaNode::Number => match value {
                Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => Some(value.clone()),
                other => {
                    self.invalid_type("number", Some(other));
                    None
                }
            },
            SchemaNode::Integer => match value {
                Bson::Int32(_) | Bson::Int64(_) => Some(value.clone()),
                Bson::Double(n) if n.fract() == 0.0 && n.is_finite() => {
                    if (i64::MIN as f64..i64::MAX as f64).contains(n) {
                        Some(Bson::Int64(*n as i64))
                    } else {
                        self.report(IssueCode::NotInteger, "Integer out of range");
                        None
                    }
                }
                Bson::Double(_) => {
                    self.report(IssueCode::NotInteger, "Expected integer, received float");
                    None
                }
                other => {
                    self.invalid_type("integer", Some(other));
                    None
                }
            },
            SchemaNode::Boolean => match value {
                Bson::Boolean(_) => Some(value.clone()),
                other => {
                    self.invalid_type("boolean", Some(other));
                    None
                }
            },
            SchemaNode::Date { coerce } => self.date(value, *coerce),
            SchemaNode::ObjectId => match coerce_object_id(value) {
                Ok(id) => Some(Bson::ObjectId(id)),
                Err(err) => {
                    for issue in err.issues {
                        self.report(issue.code, issue.message);
                    }
                    None
                }
            },
            SchemaNode::Enum(options) => match value {
                Bson::String(s) if options.iter().any(|option| option == s) => {
                    Some(value.clone())
                }
                other => {
                    let expected = options
                        .iter()
                        .map(|option| format!("'{option}'"))
                        .collect::<Vec<_>>()
                        .join(" | ");

                    self.report(
                        IssueCode::InvalidEnumValue,
                        format!("Invalid enum value. Expected {expected}, received {other}"),
                    );
                    None
                }
            },
            SchemaNode::Literal(expected) => {
                if value == expected {
                    Some(value.clone())
                } else {
                    self.report(
                        IssueCode::InvalidLiteral,
                        format!("Invalid literal value, expected {expected}"),
                    );
                    None
                }
            }
            SchemaNode::Array(item) => match value {
                Bson::Array(items) => {
                    let parsed = items
                        .iter()
                        .enumerate()
                        .map(|(index, element)| {
                            self.scoped(PathSegment::Index(index), |ctx| {
                                ctx.node(item, Some(element)).unwrap_or(Bson::Null)
                            })
                        })
                        .collect();

                    Some(Bson::Array(parsed))
                }
                other => {
                    self.invalid_type("array", Some(other));
                    None
                }
            },
            SchemaNode::Object(shape) => match value {
                Bson::Document(doc) => self.object(shape, doc).map(Bson::Document),
                other => {
                    self.invalid_type("object", Some(other));
                    None
                }
            },
            SchemaNode::Union(options) => self.union(options, value),
            SchemaNode::Optional(_)
            | SchemaNode::Default(..)
            | SchemaNode::Nullable(_)
            | SchemaNode::Any => self.node(node, Some(value)),
        }
    }

    fn string(&mut self, value: &Bson, min: Option<usize>, max: Option<usize>) -> Option<Bson> {
        let Bson::String(s) = value else {
            self.invalid_type("string", Some(value));
            return None;
        };

        let length = s.chars().count();

        if let Some(minimum) = min.filter(|minimum| length < *minimum) {
            self.report(
                IssueCode::TooSmall { minimum },
                format!("String must contain at least {minimum} character(s)"),
            );
            return None;
        }

        if let Some(maximum) = max.filter(|maximum| length > *maximum) {
            self.report(
                IssueCode::TooBig { maximum },
                format!("String must contain at most {maximum} character(s)"),
            );
            return None;
        }

        Some(value.clone())
    }

    fn date(&mut self, value: &Bson, coerce: bool) -> Option<Bson> {
        match value {
            Bson::DateTime(_) => Some(value.clone()),
            Bson::String(s) if coerce => match chrono::DateTime::parse_from_rfc3339(s) {
                Ok(parsed) => Some(Bson::DateTime(bson::DateTime::from_chrono(
                    parsed.with_timezone(&chrono::Utc),
                ))),
                Err(_) => {
                    self.report(IssueCode::InvalidDate, "Invalid date");
                    None
                }
            },
            Bson::Int64(millis) if coerce => {
                Some(Bson::DateTime(bson::DateTime::from_millis(*millis)))
            }
            Bson::Int32(millis) if coerce => {
                Some(Bson::DateTime(bson::DateTime::from_millis(i64::from(*millis))))
            }
            other => {
                self.invalid_type("date", Some(other));
                None
            }
        }
    }

    fn union(&mut self, options: &[SchemaNode], value: &Bson) -> Option<Bson> {
        for option in options {
            let mut attempt = ParseContext {
                path: self.path.clone(),
                issues: Vec::new(),
            };

            if let Some(parsed) = attempt.node(option, Some(value)) {
                if attempt.issues.is_empty() {
                    return Some(parsed);
                }
            }
        }

        self.report(IssueCode::InvalidUnion, "Invalid input");
        None
    }

    fn object(&mut self, shape: &ObjectSchema, doc: &Document) -> Option<Document> {
        let mut out = Document::new();

        for (key, node) in shape.fields() {
            let parsed = self.scoped(PathSegment::Key(key.to_string()), |ctx| {
                ctx.node(node, doc.get(key))
            });

            if let Some(parsed) = parsed {
                out.insert(key, parsed);
            }
        }

        for (key, value) in doc {
            if shape.get(key).is_some() {
                continue;
            }

            match shape.unknown_keys() {
                UnknownKeys::Strip => {}
                UnknownKeys::Passthrough => {
                    out.insert(key.clone(), value.clone());
                }
                UnknownKeys::Strict => {
                    self.scoped(PathSegment::Key(key.clone()), |ctx| {
                        ctx.report(
                            IssueCode::UnrecognizedKey,
                            format!("Unrecognized key: '{key}'"),
                        )
                    });
                }
            }
        }

        Some(out)
    }
}

fn type_name(value: Option<&Bson>) -> &'static str {
    match value {
        None => "undefined",
        Some(Bson::Null) => "null",
        Some(Bson::String(_)) => "string",
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)) => "number",
        Some(Bson::Boolean(_)) => "boolean",
        Some(Bson::DateTime(_) | Bson::Timestamp(_)) => "date",
        Some(Bson::ObjectId(_)) => "objectId",
        Some(Bson::Array(_)) => "array",
        Some(Bson::Document(_)) => "object",
        Some(Bson::Binary(_)) => "binary",
        Some(_) => "unknown",
    }
}
