//! # Core Type Definitions
//!
//! This module contains the leaf types shared by the pattern algebra, the
//! concept model and the three compilers:
//! - Schema and instance identifiers (`Label`, `ConceptId`)
//! - Literal values and comparisons (`Value`, `Comparator`, `ValuePredicate`)
//! - Attribute datatypes (`DataType`)
//! - Error types (`QuarryError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer representations only (no floating-point values)
//! - Implement `Ord` so patterns can live in `BTreeSet`s
//! - Are plain values; equality is structural

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// The label of a schema concept (a type, a role or a rule).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label(pub String);

impl Label {
    /// Create a new label from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the label as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Labels generated by the concept model start with `@` and are never
    /// written by users.
    #[must_use]
    pub fn is_implicit(&self) -> bool {
        self.0.starts_with('@')
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Label {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Unique identifier of a concept in the concept model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConceptId(pub u64);

impl ConceptId {
    /// Big-endian key bytes, so storage order matches id order.
    #[must_use]
    pub const fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for ConceptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.0)
    }
}

// =============================================================================
// VALUES
// =============================================================================

/// A literal attribute value.
///
/// Dates are milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    Long(i64),
    String(String),
    Boolean(bool),
    Date(i64),
}

impl Value {
    /// The narrowest datatype able to hold this value.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Long(_) => DataType::Long,
            Self::String(_) => DataType::String,
            Self::Boolean(_) => DataType::Boolean,
            Self::Date(_) => DataType::Date,
        }
    }

    /// The string payload, if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{}", quote(s)),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Date(ms) => write!(f, "date({ms})"),
        }
    }
}

/// Quote a string literal, escaping backslashes and double quotes.
#[must_use]
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len().saturating_add(2));
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Comparison operator of a value predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Comparator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Like,
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Contains => "contains",
            Self::Like => "like",
        };
        f.write_str(token)
    }
}

/// A comparison applied to the value of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValuePredicate {
    pub comparator: Comparator,
    pub value: Value,
}

impl ValuePredicate {
    /// Create a predicate.
    #[must_use]
    pub fn new(comparator: Comparator, value: impl Into<Value>) -> Self {
        Self {
            comparator,
            value: value.into(),
        }
    }

    /// Exact-match predicate.
    #[must_use]
    pub fn eq(value: impl Into<Value>) -> Self {
        Self::new(Comparator::Eq, value)
    }

    /// The value this predicate pins, if it is an equality.
    ///
    /// Only equalities can be inserted.
    #[must_use]
    pub fn equal_value(&self) -> Option<&Value> {
        match self.comparator {
            Comparator::Eq => Some(&self.value),
            _ => None,
        }
    }
}

impl From<Value> for ValuePredicate {
    fn from(value: Value) -> Self {
        Self::eq(value)
    }
}

impl From<i64> for ValuePredicate {
    fn from(value: i64) -> Self {
        Self::eq(value)
    }
}

impl From<&str> for ValuePredicate {
    fn from(value: &str) -> Self {
        Self::eq(value)
    }
}

impl From<bool> for ValuePredicate {
    fn from(value: bool) -> Self {
        Self::eq(value)
    }
}

impl fmt::Display for ValuePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.comparator, self.value)
    }
}

/// Datatype of an attribute type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataType {
    Long,
    Double,
    String,
    Boolean,
    Date,
}

impl DataType {
    /// Whether a value may be stored in an attribute of this datatype.
    ///
    /// Doubles accept longs; everything else must match exactly.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Long | Self::Double, Value::Long(_))
                | (Self::String, Value::String(_))
                | (Self::Boolean, Value::Boolean(_))
                | (Self::Date, Value::Date(_))
        )
    }

    /// Parse a datatype keyword.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "long" => Some(Self::Long),
            "double" => Some(Self::Double),
            "string" => Some(Self::String),
            "boolean" => Some(Self::Boolean),
            "date" => Some(Self::Date),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = match self {
            Self::Long => "long",
            Self::Double => "double",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Date => "date",
        };
        f.write_str(keyword)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur while composing, compiling or executing patterns.
///
/// - No silent failures, apart from the idempotent undefine/delete no-ops
/// - Use `Result<T, QuarryError>` for fallible operations
/// - The core never panics; every error is reported to the immediate caller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuarryError {
    /// A singular constraint kind was added twice with different values.
    #[error("the statement `{statement}` has conflicting constraints: `{constraint}` and `{existing}`")]
    ConflictingConstraints {
        statement: String,
        constraint: String,
        existing: String,
    },

    /// A step requires a variable that nothing in its conjunct resolves.
    #[error("variable {variable} has no resolvable binding in its conjunct")]
    MalformedReference { variable: String },

    /// A mutation targeted a concept of the wrong kind.
    #[error("cannot {operation} on {concept}: it is not {expected}")]
    InvalidTargetKind {
        operation: &'static str,
        concept: String,
        expected: String,
    },

    /// `and` / `or` called without any patterns.
    #[error("cannot compose an empty {0}")]
    VacuousComposition(&'static str),

    /// The requirement graph of a conjunct has no valid order.
    #[error("mutation steps form a dependency cycle over {variables:?}")]
    CyclicDependency { variables: Vec<String> },

    /// A constraint kind has no meaning in the requested write mode.
    #[error("`{constraint}` is not supported in {mode} queries")]
    UnsupportedWrite { constraint: String, mode: String },

    /// No schema concept carries the label.
    #[error("no schema concept is labelled `{0}`")]
    LabelNotFound(Label),

    /// No concept carries the id.
    #[error("no concept has id {0}")]
    ConceptNotFound(ConceptId),

    /// A concept builder lacks what it needs to create its concept.
    #[error("cannot build {variable}: {reason}")]
    IncompleteConcept { variable: String, reason: String },

    /// A type cannot be removed while things still depend on it.
    #[error("type `{label}` still has {reason}")]
    TypeInUse { label: Label, reason: &'static str },

    /// An attribute value does not fit the attribute type's datatype.
    #[error("value {value} does not fit datatype {data_type}")]
    ValueTypeMismatch { value: String, data_type: DataType },

    /// An attribute value does not match its type's regex.
    #[error("value {value} does not match regex `{regex}`")]
    RegexViolation { value: String, regex: String },

    /// A regex constraint is not a valid expression.
    #[error("invalid regex `{regex}`: {reason}")]
    InvalidRegex { regex: String, reason: String },

    /// A rule statement cannot be turned into a rule definition.
    #[error("rule `{label}` is malformed: {reason}")]
    MalformedRule { label: String, reason: String },

    /// The operation is not allowed in the current transaction kind.
    #[error("{operation} requires a {required} transaction")]
    TransactionKind {
        operation: &'static str,
        required: &'static str,
    },

    /// The storage has been closed.
    #[error("storage is closed")]
    StorageClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl QuarryError {
    pub fn conflicting(
        statement: impl fmt::Display,
        constraint: impl fmt::Display,
        existing: impl fmt::Display,
    ) -> Self {
        Self::ConflictingConstraints {
            statement: statement.to_string(),
            constraint: constraint.to_string(),
            existing: existing.to_string(),
        }
    }

    pub fn malformed_reference(variable: impl fmt::Display) -> Self {
        Self::MalformedReference {
            variable: variable.to_string(),
        }
    }

    pub fn define_abstract_on_non_type(concept: impl fmt::Display) -> Self {
        Self::InvalidTargetKind {
            operation: "define is-abstract",
            concept: concept.to_string(),
            expected: "a type".to_string(),
        }
    }

    pub fn invalid_target(
        operation: &'static str,
        concept: impl fmt::Display,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidTargetKind {
            operation,
            concept: concept.to_string(),
            expected: expected.into(),
        }
    }

    pub fn incomplete(variable: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::IncompleteConcept {
            variable: variable.to_string(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
