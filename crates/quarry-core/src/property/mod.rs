//! # Constraints
//!
//! The closed set of constraint kinds a statement can carry. Every kind knows
//! how to compile itself into each of the three targets:
//!
//! - [`fragments`]: traversal fragments for matching
//! - [`executors`]: dependency-ordered mutation steps for writes
//! - [`atoms`]: reasoning atoms for inference
//!
//! All matches over [`Constraint`] are exhaustive; adding a kind means
//! updating every compiler.

pub mod atoms;
pub mod executors;
pub mod fragments;

use std::fmt;
use std::mem;

use crate::pattern::{Pattern, Statement, Variable};
use crate::types::{ConceptId, DataType, Label, ValuePredicate, quote};

// =============================================================================
// CONSTRAINT
// =============================================================================

/// A single constraint on a statement's variable.
///
/// Variant order fixes the canonical display order of a statement.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Constraint {
    /// Role players of a relation, in insertion order.
    Relation(Vec<RolePlayer>),
    Value(ValuePredicate),
    Id(ConceptId),
    Label(Label),
    Isa {
        ty: Statement,
        explicit: bool,
    },
    Sub {
        sup: Statement,
        explicit: bool,
    },
    IsAbstract,
    DataType(DataType),
    Regex(String),
    Plays {
        role: Statement,
        required: bool,
    },
    Relates {
        role: Statement,
        super_role: Option<Statement>,
    },
    HasAttributeType {
        attribute_type: Statement,
        key: bool,
    },
    /// Ownership of an attribute through an implicit (or user-named) relation.
    HasAttribute {
        label: Label,
        attribute: Statement,
        relation: Statement,
    },
    Neq(Statement),
    When(Pattern),
    Then(Pattern),
}

/// One `role: player` entry of a relation. The role is optional on match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RolePlayer {
    pub role: Option<Statement>,
    pub player: Statement,
}

impl RolePlayer {
    #[must_use]
    pub fn new(role: Option<Statement>, player: Statement) -> Self {
        Self { role, player }
    }
}

impl Constraint {
    /// The keyword of this kind.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Relation(_) => "relation",
            Self::Value(_) => "value",
            Self::Id(_) => "id",
            Self::Label(_) => "label",
            Self::Isa { explicit: false, .. } => "isa",
            Self::Isa { explicit: true, .. } => "isa!",
            Self::Sub { explicit: false, .. } => "sub",
            Self::Sub { explicit: true, .. } => "sub!",
            Self::IsAbstract => "is-abstract",
            Self::DataType(_) => "datatype",
            Self::Regex(_) => "regex",
            Self::Plays { .. } => "plays",
            Self::Relates { .. } => "relates",
            Self::HasAttributeType { key: false, .. } => "has",
            Self::HasAttributeType { key: true, .. } => "key",
            Self::HasAttribute { .. } => "has",
            Self::Neq(_) => "!=",
            Self::When(_) => "when",
            Self::Then(_) => "then",
        }
    }

    /// Whether a statement may carry at most one constraint of this kind.
    #[must_use]
    pub fn is_singular(&self) -> bool {
        match self {
            Self::Relation(_)
            | Self::Id(_)
            | Self::Label(_)
            | Self::Isa { .. }
            | Self::Sub { .. }
            | Self::IsAbstract
            | Self::Value(_)
            | Self::DataType(_)
            | Self::Regex(_)
            | Self::When(_)
            | Self::Then(_) => true,
            Self::Plays { .. }
            | Self::Relates { .. }
            | Self::HasAttributeType { .. }
            | Self::HasAttribute { .. }
            | Self::Neq(_) => false,
        }
    }

    /// Whether `other` is the same kind. `isa` and `isa!` share a kind.
    #[must_use]
    pub fn same_kind(&self, other: &Self) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }

    /// Statements this constraint refers to that belong to the same scope.
    ///
    /// The implicit relation of an ownership is excluded unless the user
    /// named its variable. Rule bodies and heads are separate scopes.
    #[must_use]
    pub fn inner_statements(&self) -> Vec<&Statement> {
        match self {
            Self::HasAttribute {
                attribute,
                relation,
                ..
            } => {
                let mut inner = vec![attribute];
                if relation.var().is_named() {
                    inner.push(relation);
                }
                inner
            }
            _ => self.implicit_inner_statements(),
        }
    }

    /// Every statement this constraint refers to, implicit ones included.
    #[must_use]
    pub fn implicit_inner_statements(&self) -> Vec<&Statement> {
        match self {
            Self::Relation(players) => players
                .iter()
                .flat_map(|rp| rp.role.iter().chain(std::iter::once(&rp.player)))
                .collect(),
            Self::Isa { ty, .. } => vec![ty],
            Self::Sub { sup, .. } => vec![sup],
            Self::Plays { role, .. } => vec![role],
            Self::Relates { role, super_role } => {
                let mut inner = vec![role];
                inner.extend(super_role.iter());
                inner
            }
            Self::HasAttributeType { attribute_type, .. } => vec![attribute_type],
            Self::HasAttribute {
                attribute,
                relation,
                ..
            } => vec![attribute, relation],
            Self::Neq(other) => vec![other],
            Self::Value(_)
            | Self::Id(_)
            | Self::Label(_)
            | Self::IsAbstract
            | Self::DataType(_)
            | Self::Regex(_)
            | Self::When(_)
            | Self::Then(_) => Vec::new(),
        }
    }

    /// The type label this constraint pins its variable to, if any.
    pub(crate) fn label(&self) -> Option<&Label> {
        match self {
            Self::Label(label) => Some(label),
            _ => None,
        }
    }
}

// =============================================================================
// DISPLAY
// =============================================================================

/// How a statement is shown when another statement refers to it.
pub(crate) struct Ref<'a>(pub &'a Statement);

impl fmt::Display for Ref<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.var().is_named() {
            write!(f, "{}", self.0.var())
        } else {
            f.write_str(&self.0.printable_name())
        }
    }
}

fn write_value_literal(f: &mut fmt::Formatter<'_>, predicate: &ValuePredicate) -> fmt::Result {
    match predicate.equal_value() {
        Some(value) => write!(f, "{value}"),
        None => write!(f, "{predicate}"),
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relation(players) => {
                f.write_str("(")?;
                for (i, rp) in players.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    if let Some(role) = &rp.role {
                        write!(f, "{}: ", Ref(role))?;
                    }
                    write!(f, "{}", Ref(&rp.player))?;
                }
                f.write_str(")")
            }
            Self::Value(predicate) => write_value_literal(f, predicate),
            Self::Id(id) => write!(f, "id {id}"),
            Self::Label(label) => write!(f, "label {label}"),
            Self::Isa { ty, .. } | Self::Sub { sup: ty, .. } => {
                write!(f, "{} {}", self.name(), Ref(ty))
            }
            Self::IsAbstract => f.write_str("is-abstract"),
            Self::DataType(data_type) => write!(f, "datatype {data_type}"),
            Self::Regex(regex) => write!(f, "regex {}", quote(regex)),
            Self::Plays { role, .. } => write!(f, "plays {}", Ref(role)),
            Self::Relates { role, super_role } => {
                write!(f, "relates {}", Ref(role))?;
                if let Some(sup) = super_role {
                    write!(f, " as {}", Ref(sup))?;
                }
                Ok(())
            }
            Self::HasAttributeType { attribute_type, .. } => {
                write!(f, "{} {}", self.name(), Ref(attribute_type))
            }
            Self::HasAttribute {
                label,
                attribute,
                relation,
            } => {
                write!(f, "has {label} ")?;
                match inline_value(label, attribute) {
                    Some(predicate) => write_value_literal(f, predicate)?,
                    None => write!(f, "{}", Ref(attribute))?,
                }
                if relation.var().is_named() {
                    write!(f, " via {}", relation.var())?;
                }
                Ok(())
            }
            Self::Neq(other) => write!(f, "!= {}", Ref(other)),
            Self::When(pattern) => write!(f, "when {}", Braced(pattern)),
            Self::Then(pattern) => write!(f, "then {}", Braced(pattern)),
        }
    }
}

/// An anonymous attribute that is only `isa label` plus one value predicate
/// is printed as the bare value.
fn inline_value<'a>(label: &Label, attribute: &'a Statement) -> Option<&'a ValuePredicate> {
    if attribute.var().is_named() {
        return None;
    }
    let mut predicate = None;
    for constraint in attribute.constraints() {
        match constraint {
            Constraint::Value(p) if predicate.is_none() => predicate = Some(p),
            Constraint::Isa { ty, explicit: false }
                if ty.type_label() == Some(label) => {}
            _ => return None,
        }
    }
    predicate
}

/// A pattern wrapped in `{ ... }` for rule bodies and heads.
struct Braced<'a>(&'a Pattern);

impl fmt::Display for Braced<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Pattern::Conjunction(_) => write!(f, "{}", self.0),
            _ => write!(f, "{{ {} }}", self.0),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
