//! # Reasoning Atoms
//!
//! Inference works on atoms rather than statements. Mapping is pure: a
//! constraint looks at its sibling statements in the same conjunct to decide
//! what atom it becomes, and some constraints become no atom at all.
//!
//! - `isa` on a relation variable is absorbed into the relation atom
//! - `has` becomes a resource atom carrying the attribute's value predicates
//! - `when` and `then` belong to rule definitions and never become atoms

use std::fmt;

use crate::pattern::{Statement, Variable};
use crate::property::Constraint;
use crate::types::{ConceptId, DataType, Label, ValuePredicate};

/// Which part of a rule an atom comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RulePart {
    Body,
    Head,
}

/// The query an atom belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AtomOwner {
    Query,
    Rule { label: Label, part: RulePart },
}

/// A single reasoning atom.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Atom {
    pub owner: AtomOwner,
    pub kind: AtomKind,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AtomKind {
    Id {
        var: Variable,
        id: ConceptId,
    },
    Label {
        var: Variable,
        label: Label,
    },
    Value {
        var: Variable,
        predicate: ValuePredicate,
    },
    Isa {
        var: Variable,
        ty: Variable,
        explicit: bool,
    },
    Sub {
        var: Variable,
        sup: Variable,
        explicit: bool,
    },
    IsAbstract {
        var: Variable,
    },
    DataType {
        var: Variable,
        data_type: DataType,
    },
    Regex {
        var: Variable,
        regex: String,
    },
    Neq {
        var: Variable,
        other: Variable,
    },
    Plays {
        var: Variable,
        role: Variable,
    },
    Relates {
        var: Variable,
        role: Variable,
    },
    Owns {
        var: Variable,
        attribute_type: Variable,
        key: bool,
    },
    /// Ownership of an attribute, with the predicates its value must meet.
    Resource {
        owner: Variable,
        attribute: Variable,
        label: Label,
        relation: Variable,
        predicates: Vec<ValuePredicate>,
    },
    /// A relation, with its type when a sibling `isa` gives one.
    Relation {
        var: Variable,
        ty: Option<Variable>,
        role_players: Vec<(Option<Variable>, Variable)>,
    },
}

impl fmt::Display for AtomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id { var, id } => write!(f, "id({var}, {id})"),
            Self::Label { var, label } => write!(f, "label({var}, {label})"),
            Self::Value { var, predicate } => write!(f, "value({var} {predicate})"),
            Self::Isa { var, ty, explicit } => {
                let name = if *explicit { "isa!" } else { "isa" };
                write!(f, "{name}({var}, {ty})")
            }
            Self::Sub { var, sup, explicit } => {
                let name = if *explicit { "sub!" } else { "sub" };
                write!(f, "{name}({var}, {sup})")
            }
            Self::IsAbstract { var } => write!(f, "is-abstract({var})"),
            Self::DataType { var, data_type } => write!(f, "datatype({var}, {data_type})"),
            Self::Regex { var, regex } => write!(f, "regex({var}, {regex:?})"),
            Self::Neq { var, other } => write!(f, "neq({var}, {other})"),
            Self::Plays { var, role } => write!(f, "plays({var}, {role})"),
            Self::Relates { var, role } => write!(f, "relates({var}, {role})"),
            Self::Owns {
                var,
                attribute_type,
                key,
            } => {
                let name = if *key { "key" } else { "has" };
                write!(f, "{name}({var}, {attribute_type})")
            }
            Self::Resource {
                owner,
                attribute,
                label,
                predicates,
                ..
            } => {
                write!(f, "resource({owner}, {label}: {attribute}")?;
                for predicate in predicates {
                    write!(f, " {predicate}")?;
                }
                f.write_str(")")
            }
            Self::Relation {
                var,
                ty,
                role_players,
            } => {
                write!(f, "relation({var}")?;
                if let Some(ty) = ty {
                    write!(f, " isa {ty}")?;
                }
                for (role, player) in role_players {
                    match role {
                        Some(role) => write!(f, ", {role}: {player}")?,
                        None => write!(f, ", {player}")?,
                    }
                }
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

/// Constraints of every sibling statement about `var`.
fn sibling_constraints<'a>(
    var: &'a Variable,
    siblings: &'a [Statement],
) -> impl Iterator<Item = &'a Constraint> {
    siblings
        .iter()
        .filter(move |s| s.var() == var)
        .flat_map(Statement::constraints)
}

impl Constraint {
    /// The atom this constraint on `var` maps to, given its siblings.
    #[must_use]
    pub fn to_atom(
        &self,
        var: &Variable,
        siblings: &[Statement],
        owner: &AtomOwner,
    ) -> Option<Atom> {
        let var = var.clone();
        let kind = match self {
            Self::Id(id) => AtomKind::Id { var, id: *id },
            Self::Label(label) => AtomKind::Label {
                var,
                label: label.clone(),
            },
            Self::Value(predicate) => AtomKind::Value {
                var,
                predicate: predicate.clone(),
            },
            Self::Isa { ty, explicit } => {
                let is_relation = sibling_constraints(&var, siblings)
                    .any(|c| matches!(c, Self::Relation(_)));
                if is_relation {
                    return None;
                }
                AtomKind::Isa {
                    var,
                    ty: ty.var().clone(),
                    explicit: *explicit,
                }
            }
            Self::Sub { sup, explicit } => AtomKind::Sub {
                var,
                sup: sup.var().clone(),
                explicit: *explicit,
            },
            Self::IsAbstract => AtomKind::IsAbstract { var },
            Self::DataType(data_type) => AtomKind::DataType {
                var,
                data_type: *data_type,
            },
            Self::Regex(regex) => AtomKind::Regex {
                var,
                regex: regex.clone(),
            },
            Self::Neq(other) => AtomKind::Neq {
                var,
                other: other.var().clone(),
            },
            Self::Plays { role, .. } => AtomKind::Plays {
                var,
                role: role.var().clone(),
            },
            Self::Relates { role, .. } => AtomKind::Relates {
                var,
                role: role.var().clone(),
            },
            Self::HasAttributeType {
                attribute_type,
                key,
            } => AtomKind::Owns {
                var,
                attribute_type: attribute_type.var().clone(),
                key: *key,
            },
            Self::HasAttribute {
                label,
                attribute,
                relation,
            } => {
                let mut predicates: Vec<ValuePredicate> =
                    sibling_constraints(attribute.var(), siblings)
                        .filter_map(|c| match c {
                            Self::Value(predicate) => Some(predicate.clone()),
                            _ => None,
                        })
                        .collect();
                predicates.sort();
                predicates.dedup();
                AtomKind::Resource {
                    owner: var,
                    attribute: attribute.var().clone(),
                    label: label.clone(),
                    relation: relation.var().clone(),
                    predicates,
                }
            }
            Self::Relation(players) => {
                let ty = sibling_constraints(&var, siblings).find_map(|c| match c {
                    Self::Isa { ty, .. } => Some(ty.var().clone()),
                    _ => None,
                });
                AtomKind::Relation {
                    var,
                    ty,
                    role_players: players
                        .iter()
                        .map(|rp| {
                            (
                                rp.role.as_ref().map(|r| r.var().clone()),
                                rp.player.var().clone(),
                            )
                        })
                        .collect(),
                }
            }
            Self::When(_) | Self::Then(_) => return None,
        };
        Some(Atom {
            owner: owner.clone(),
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{Pattern, var};

    fn siblings_of(statement: &Statement) -> Vec<Statement> {
        statement.implicit_inner_statements()
    }

    #[test]
    fn isa_is_absorbed_into_relation() {
        let r = var("r")
            .rel_role("spouse", var("x"))
            .and_then(|r| r.isa("marriage"))
            .expect("build");
        let siblings = siblings_of(&r);
        let atoms: Vec<Atom> = r
            .constraints()
            .filter_map(|c| c.to_atom(r.var(), &siblings, &AtomOwner::Query))
            .collect();
        assert_eq!(atoms.len(), 1);
        match &atoms[0].kind {
            AtomKind::Relation { ty, role_players, .. } => {
                assert!(ty.is_some());
                assert_eq!(role_players.len(), 1);
            }
            other => unreachable!("expected a relation atom, got {other}"),
        }
    }

    #[test]
    fn plain_isa_stays() {
        let x = var("x").isa("person").expect("isa");
        let siblings = siblings_of(&x);
        let constraint = x.constraints().next().expect("isa");
        let atom = constraint
            .to_atom(x.var(), &siblings, &AtomOwner::Query)
            .expect("atom");
        assert!(matches!(atom.kind, AtomKind::Isa { .. }));
    }

    #[test]
    fn resource_collects_sibling_predicates() {
        let n = var("n")
            .val(ValuePredicate::new(crate::types::Comparator::Gte, 18))
            .expect("val");
        let x = var("x").has("age", n).expect("has");
        let siblings = siblings_of(&x);
        let constraint = x.constraints().next().expect("has");
        let atom = constraint
            .to_atom(x.var(), &siblings, &AtomOwner::Query)
            .expect("atom");
        match atom.kind {
            AtomKind::Resource { predicates, .. } => assert_eq!(predicates.len(), 1),
            other => unreachable!("expected a resource atom, got {other}"),
        }
    }

    #[test]
    fn rule_parts_yield_no_atom() {
        let body = Pattern::from(var("x").isa("person").expect("isa"));
        let when = Constraint::When(body);
        assert!(
            when.to_atom(&Variable::named("r"), &[], &AtomOwner::Query)
                .is_none()
        );
    }
}
