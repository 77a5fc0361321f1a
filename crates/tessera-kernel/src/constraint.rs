//! Argument validation rules.
//!
//! Constraints are attached to method parameters and evaluated before any
//! wrapper runs. A `null` argument is judged only by [`Constraint::NotNull`];
//! every other rule passes it, so optional parameters stay optional.

use crate::error::Violation;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

type ValuePredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// A validation rule over one argument value.
#[derive(Clone)]
pub enum Constraint {
    NotNull,
    /// Strings must contain a non-whitespace character; arrays and objects
    /// must have an element.
    NotEmpty,
    /// Upper bound on string length (in chars) or array length.
    MaxLength(usize),
    /// Inclusive numeric bounds.
    Range { min: Option<f64>, max: Option<f64> },
    /// The whole string must match.
    Matches(Regex),
    Custom { kind: String, predicate: ValuePredicate },
}

impl Constraint {
    pub fn range(min: impl Into<Option<f64>>, max: impl Into<Option<f64>>) -> Self {
        Self::Range {
            min: min.into(),
            max: max.into(),
        }
    }

    /// Anchored regex constraint. Fails only on an invalid pattern.
    pub fn matches(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(&format!("^(?:{pattern})$")).map(Self::Matches)
    }

    pub fn custom<F>(kind: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self::Custom {
            kind: kind.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// The kind reported in violations.
    pub fn kind(&self) -> &str {
        match self {
            Constraint::NotNull => "not_null",
            Constraint::NotEmpty => "not_empty",
            Constraint::MaxLength(_) => "max_length",
            Constraint::Range { .. } => "range",
            Constraint::Matches(_) => "matches",
            Constraint::Custom { kind, .. } => kind,
        }
    }

    pub fn check(&self, value: &Value) -> bool {
        if value.is_null() {
            return !matches!(self, Constraint::NotNull);
        }
        match self {
            Constraint::NotNull => true,
            Constraint::NotEmpty => match value {
                Value::String(s) => !s.trim().is_empty(),
                Value::Array(items) => !items.is_empty(),
                Value::Object(map) => !map.is_empty(),
                _ => true,
            },
            Constraint::MaxLength(limit) => match value {
                Value::String(s) => s.chars().count() <= *limit,
                Value::Array(items) => items.len() <= *limit,
                _ => true,
            },
            Constraint::Range { min, max } => match value.as_f64() {
                Some(n) => min.is_none_or(|lo| n >= lo) && max.is_none_or(|hi| n <= hi),
                None => false,
            },
            Constraint::Matches(regex) => value.as_str().is_some_and(|s| regex.is_match(s)),
            Constraint::Custom { predicate, .. } => predicate(value),
        }
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::MaxLength(limit) => write!(f, "max_length({limit})"),
            Constraint::Range { min, max } => write!(f, "range({min:?}, {max:?})"),
            Constraint::Matches(regex) => write!(f, "matches({})", regex.as_str()),
            other => f.write_str(other.kind()),
        }
    }
}

/// A constraint bound to a named parameter.
#[derive(Debug, Clone)]
pub struct ConstraintDeclaration {
    pub parameter: String,
    pub constraint: Constraint,
}

impl ConstraintDeclaration {
    pub fn new(parameter: impl Into<String>, constraint: Constraint) -> Self {
        Self {
            parameter: parameter.into(),
            constraint,
        }
    }

    pub fn check(&self, value: &Value) -> Option<Violation> {
        (!self.constraint.check(value)).then(|| Violation {
            parameter: self.parameter.clone(),
            value: value.clone(),
            constraint: self.constraint.kind().to_string(),
        })
    }
}
