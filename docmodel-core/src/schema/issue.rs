use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// One step of the path to an invalid value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => f.write_str(key),
            PathSegment::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Machine-readable classification of a [`ValidationIssue`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "code")]
pub enum IssueCode {
    Required,
    InvalidType {
        expected: String,
        received: String,
    },
    InvalidEnumValue,
    InvalidLiteral,
    InvalidUnion,
    InvalidObjectId,
    InvalidDate,
    NotInteger,
    TooSmall {
        minimum: usize,
    },
    TooBig {
        maximum: usize,
    },
    UnrecognizedKey,
    Custom,
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub path: Vec<PathSegment>,
    #[serde(flatten)]
    pub code: IssueCode,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: &[PathSegment], code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            path: path.to_vec(),
            code,
            message: message.into(),
        }
    }

    /// Returns the path in dotted notation (`history.0.action`).
    pub fn dotted_path(&self) -> String {
        self.path
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.dotted_path(), self.message)
        }
    }
}

/// Structured failure of a strict parse, carrying every issue found.
///
/// Renders as `path: message` pairs joined by `; `.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{}", render_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    /// Builds an error with a single issue at the root path.
    pub fn message(code: IssueCode, message: impl Into<String>) -> Self {
        Self::new(vec![ValidationIssue::new(&[], code, message)])
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// Returns the issues reported at exactly `path` (dotted notation).
    pub fn issues_at(&self, path: &str) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.dotted_path() == path)
            .collect()
    }
}

fn render_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
