//! # Pattern Documents
//!
//! JSON form of patterns read by the CLI. Documents are converted through
//! the quarry-core builders, so every conflict and composition error is the
//! same one the library reports.
//!
//! ```json
//! {
//!   "pattern": {"and": [
//!     {"var": "$x", "isa": "person", "has": [{"type": "name", "attribute": "Alice"}]},
//!     {"var": "$m", "rel": [{"role": "spouse", "player": "$x"}], "isa": "marriage"}
//!   ]},
//!   "bound": {"y": 7}
//! }
//! ```
//!
//! A reference is either a string or a nested statement. Strings starting
//! with `$` name variables; other strings are type labels. Attribute strings
//! are literals unless they start with `$`.

use quarry_core::{
    Answer, Comparator, ConceptId, DataType, IntoAttribute, Pattern, QuarryError, Statement,
    Value, ValuePredicate, Variable, anon, label, var,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors raised while reading or converting a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("invalid document: {0}")]
    Json(String),

    #[error("unknown datatype '{0}'")]
    UnknownDataType(String),

    #[error("unknown comparator '{0}'")]
    UnknownComparator(String),

    #[error("cannot read document {path}: {reason}")]
    Io { path: String, reason: String },

    #[error(transparent)]
    Pattern(#[from] QuarryError),
}

// =============================================================================
// DOCUMENT TYPES
// =============================================================================

/// A pattern plus variables already bound to concept ids.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Document {
    pub pattern: PatternDoc,
    #[serde(default)]
    pub bound: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PatternDoc {
    And { and: Vec<PatternDoc> },
    Or { or: Vec<PatternDoc> },
    Statement(Box<StatementDoc>),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct StatementDoc {
    pub var: Option<String>,
    pub label: Option<String>,
    pub id: Option<u64>,
    pub isa: Option<RefDoc>,
    pub isa_explicit: Option<RefDoc>,
    pub sub: Option<RefDoc>,
    pub sub_explicit: Option<RefDoc>,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    pub datatype: Option<String>,
    pub regex: Option<String>,
    pub value: Option<ValueDoc>,
    pub neq: Option<RefDoc>,
    #[serde(default)]
    pub plays: Vec<RefDoc>,
    #[serde(default)]
    pub plays_required: Vec<RefDoc>,
    #[serde(default)]
    pub relates: Vec<RelatesDoc>,
    #[serde(default)]
    pub owns: Vec<RefDoc>,
    #[serde(default)]
    pub key: Vec<RefDoc>,
    #[serde(default)]
    pub has: Vec<HasDoc>,
    #[serde(default)]
    pub rel: Vec<RolePlayerDoc>,
    pub when: Option<PatternDoc>,
    pub then: Option<PatternDoc>,
}

/// `"$x"`, `"person"` or a nested statement.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RefDoc {
    Name(String),
    Statement(Box<StatementDoc>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RelatesDoc {
    As(RelatesAsDoc),
    Role(RefDoc),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelatesAsDoc {
    pub role: RefDoc,
    #[serde(rename = "as")]
    pub super_role: RefDoc,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HasDoc {
    #[serde(rename = "type")]
    pub ty: String,
    pub attribute: AttributeDoc,
    /// Variable or statement for the ownership relation.
    pub via: Option<RefDoc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AttributeDoc {
    Literal(LiteralDoc),
    Statement(Box<StatementDoc>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RolePlayerDoc {
    Cast {
        role: Option<RefDoc>,
        player: RefDoc,
    },
    Player(RefDoc),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ValueDoc {
    Predicate { op: String, value: LiteralDoc },
    Literal(LiteralDoc),
}

/// A literal. Dates are `{"date": <epoch millis>}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LiteralDoc {
    Boolean(bool),
    Long(i64),
    String(String),
    Date { date: i64 },
}

// =============================================================================
// CONVERSION
// =============================================================================

impl Document {
    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        serde_json::from_str(json).map_err(|e| DocumentError::Json(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, DocumentError> {
        let json = std::fs::read_to_string(path).map_err(|e| DocumentError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&json)
    }

    pub fn to_pattern(&self) -> Result<Pattern, DocumentError> {
        self.pattern.to_pattern()
    }

    /// The `bound` map as an answer over named variables.
    #[must_use]
    pub fn bound(&self) -> Answer {
        self.bound
            .iter()
            .map(|(name, id)| (Variable::named(name), ConceptId(*id)))
            .collect()
    }
}

impl PatternDoc {
    pub fn to_pattern(&self) -> Result<Pattern, DocumentError> {
        Ok(match self {
            Self::And { and } => Pattern::from(Pattern::and(Self::convert_all(and)?)?),
            Self::Or { or } => Pattern::from(Pattern::or(Self::convert_all(or)?)?),
            Self::Statement(doc) => Pattern::from(doc.to_statement()?),
        })
    }

    fn convert_all(docs: &[PatternDoc]) -> Result<Vec<Pattern>, DocumentError> {
        docs.iter().map(Self::to_pattern).collect()
    }
}

impl RefDoc {
    pub fn to_statement(&self) -> Result<Statement, DocumentError> {
        match self {
            Self::Name(name) => Ok(reference(name)),
            Self::Statement(doc) => doc.to_statement(),
        }
    }
}

fn reference(name: &str) -> Statement {
    if name.starts_with('$') {
        var(name)
    } else {
        label(name)
    }
}

impl LiteralDoc {
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Boolean(b) => Value::Boolean(*b),
            Self::Long(v) => Value::Long(*v),
            Self::String(s) => Value::String(s.clone()),
            Self::Date { date } => Value::Date(*date),
        }
    }
}

impl ValueDoc {
    pub fn to_predicate(&self) -> Result<ValuePredicate, DocumentError> {
        match self {
            Self::Literal(literal) => Ok(ValuePredicate::eq(literal.to_value())),
            Self::Predicate { op, value } => Ok(ValuePredicate::new(comparator(op)?, value.to_value())),
        }
    }
}

fn comparator(op: &str) -> Result<Comparator, DocumentError> {
    Ok(match op {
        "==" | "eq" => Comparator::Eq,
        "!=" | "neq" => Comparator::Neq,
        ">" | "gt" => Comparator::Gt,
        ">=" | "gte" => Comparator::Gte,
        "<" | "lt" => Comparator::Lt,
        "<=" | "lte" => Comparator::Lte,
        "contains" => Comparator::Contains,
        "like" => Comparator::Like,
        other => return Err(DocumentError::UnknownComparator(other.to_string())),
    })
}

impl AttributeDoc {
    fn to_attribute(&self) -> Result<Statement, DocumentError> {
        match self {
            Self::Literal(LiteralDoc::String(s)) if s.starts_with('$') => Ok(var(s)),
            Self::Literal(literal) => Ok(literal.to_value().into_attribute()),
            Self::Statement(doc) => doc.to_statement(),
        }
    }
}

impl StatementDoc {
    /// Build the statement, one constraint per field.
    pub fn to_statement(&self) -> Result<Statement, DocumentError> {
        let mut s = match (&self.var, &self.label) {
            (Some(name), Some(l)) => var(name).label(l.as_str())?,
            (Some(name), None) => var(name),
            (None, Some(l)) => label(l.as_str()),
            (None, None) => anon(),
        };

        if let Some(id) = self.id {
            s = s.id(ConceptId(id))?;
        }
        if let Some(ty) = &self.isa {
            s = s.isa(ty.to_statement()?)?;
        }
        if let Some(ty) = &self.isa_explicit {
            s = s.isa_explicit(ty.to_statement()?)?;
        }
        if let Some(sup) = &self.sub {
            s = s.sub(sup.to_statement()?)?;
        }
        if let Some(sup) = &self.sub_explicit {
            s = s.sub_explicit(sup.to_statement()?)?;
        }
        if self.is_abstract {
            s = s.is_abstract()?;
        }
        if let Some(name) = &self.datatype {
            let data_type = DataType::parse(name)
                .ok_or_else(|| DocumentError::UnknownDataType(name.clone()))?;
            s = s.datatype(data_type)?;
        }
        if let Some(regex) = &self.regex {
            s = s.regex(regex.as_str())?;
        }
        if let Some(value) = &self.value {
            s = s.val(value.to_predicate()?)?;
        }
        if let Some(other) = &self.neq {
            s = s.neq(other.to_statement()?)?;
        }

        for role in &self.plays {
            s = s.plays(role.to_statement()?)?;
        }
        for role in &self.plays_required {
            s = s.plays_required(role.to_statement()?)?;
        }
        for relates in &self.relates {
            s = match relates {
                RelatesDoc::Role(role) => s.relates(role.to_statement()?)?,
                RelatesDoc::As(r) => s.relates_as(r.role.to_statement()?, r.super_role.to_statement()?)?,
            };
        }
        for ty in &self.owns {
            s = s.has_type(ty.to_statement()?)?;
        }
        for ty in &self.key {
            s = s.key(ty.to_statement()?)?;
        }
        for has in &self.has {
            let attribute = has.attribute.to_attribute()?;
            s = match &has.via {
                Some(relation) => s.has_via(has.ty.as_str(), attribute, relation.to_statement()?)?,
                None => s.has(has.ty.as_str(), attribute)?,
            };
        }
        for rp in &self.rel {
            s = match rp {
                RolePlayerDoc::Cast {
                    role: Some(role),
                    player,
                } => s.rel_role(role.to_statement()?, player.to_statement()?)?,
                RolePlayerDoc::Cast { role: None, player } | RolePlayerDoc::Player(player) => {
                    s.rel(player.to_statement()?)?
                }
            };
        }

        if let Some(body) = &self.when {
            s = s.when(body.to_pattern()?)?;
        }
        if let Some(head) = &self.then {
            s = s.then(head.to_pattern()?)?;
        }
        Ok(s)
    }
}
