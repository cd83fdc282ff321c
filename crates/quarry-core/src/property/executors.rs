//! # Mutation Steps
//!
//! Writes compile each constraint into steps. A step names the variables it
//! needs bound before it can run (`requires`) and the variables it binds or
//! describes (`produces`). The writer orders steps so every producer of a
//! variable runs before any step requiring it.
//!
//! A `Describe` step does not touch the concept model: it records one fact
//! about the concept its variable stands for. The concept itself is built
//! lazily from everything described about it.

use std::collections::BTreeSet;
use std::fmt;

use crate::pattern::{Pattern, Variable};
use crate::property::Constraint;
use crate::types::{ConceptId, DataType, Label, QuarryError, Value};

/// The kind of write a conjunct is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WriteMode {
    Define,
    Undefine,
    Insert,
    Delete,
}

impl WriteMode {
    /// Schema writes need a schema transaction.
    #[must_use]
    pub fn is_schema(self) -> bool {
        matches!(self, Self::Define | Self::Undefine)
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = match self {
            Self::Define => "define",
            Self::Undefine => "undefine",
            Self::Insert => "insert",
            Self::Delete => "delete",
        };
        f.write_str(keyword)
    }
}

/// One fact recorded about a concept before it is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConceptParam {
    Id(ConceptId),
    Label(Label),
    /// Super type, given as the variable that resolves to it.
    Sub(Variable),
    /// Type of a new thing, given as the variable that resolves to it.
    Isa(Variable),
    Value(Value),
    DataType(DataType),
    When(Pattern),
    Then(Pattern),
    /// The concept is a role.
    Role,
}

impl fmt::Display for ConceptParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id {id}"),
            Self::Label(label) => write!(f, "label {label}"),
            Self::Sub(sup) => write!(f, "sub {sup}"),
            Self::Isa(ty) => write!(f, "isa {ty}"),
            Self::Value(value) => write!(f, "value {value}"),
            Self::DataType(data_type) => write!(f, "datatype {data_type}"),
            Self::When(_) => f.write_str("when"),
            Self::Then(_) => f.write_str("then"),
            Self::Role => f.write_str("role"),
        }
    }
}

/// What a step does when it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    Describe {
        var: Variable,
        param: ConceptParam,
    },
    SetAbstract {
        var: Variable,
        value: bool,
    },
    SetRegex {
        var: Variable,
        regex: String,
    },
    UnsetRegex {
        var: Variable,
        regex: String,
    },
    /// Delete a type if its direct super type is still `sup`.
    DeleteType {
        var: Variable,
        sup: Variable,
    },
    Plays {
        var: Variable,
        role: Variable,
        required: bool,
    },
    Unplay {
        var: Variable,
        role: Variable,
    },
    Relates {
        var: Variable,
        role: Variable,
    },
    Unrelate {
        var: Variable,
        role: Variable,
    },
    Owns {
        var: Variable,
        attribute_type: Variable,
        key: bool,
    },
    Disown {
        var: Variable,
        attribute_type: Variable,
    },
    /// Attach an attribute and bind `relation` to the ownership edge.
    AttachAttribute {
        owner: Variable,
        attribute: Variable,
        relation: Variable,
    },
    DetachAttribute {
        owner: Variable,
        attribute: Variable,
    },
    AddRolePlayers {
        relation: Variable,
        players: Vec<(Variable, Variable)>,
    },
    RemoveRolePlayers {
        relation: Variable,
        players: Vec<(Option<Variable>, Variable)>,
    },
    /// Delete a thing if it is an instance of `ty`.
    DeleteThing {
        var: Variable,
        ty: Variable,
    },
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Describe { var, param } => write!(f, "describe {var} {param}"),
            Self::SetAbstract { var, value } => write!(f, "set {var} is-abstract={value}"),
            Self::SetRegex { var, regex } => write!(f, "set {var} regex {regex:?}"),
            Self::UnsetRegex { var, regex } => write!(f, "unset {var} regex {regex:?}"),
            Self::DeleteType { var, sup } => write!(f, "delete type {var} sub {sup}"),
            Self::Plays { var, role, .. } => write!(f, "{var} plays {role}"),
            Self::Unplay { var, role } => write!(f, "{var} unplays {role}"),
            Self::Relates { var, role } => write!(f, "{var} relates {role}"),
            Self::Unrelate { var, role } => write!(f, "{var} unrelates {role}"),
            Self::Owns {
                var,
                attribute_type,
                key,
            } => {
                let keyword = if *key { "key" } else { "has" };
                write!(f, "{var} {keyword} {attribute_type}")
            }
            Self::Disown {
                var,
                attribute_type,
            } => write!(f, "{var} disowns {attribute_type}"),
            Self::AttachAttribute {
                owner,
                attribute,
                relation,
            } => write!(f, "attach {attribute} to {owner} via {relation}"),
            Self::DetachAttribute { owner, attribute } => {
                write!(f, "detach {attribute} from {owner}")
            }
            Self::AddRolePlayers { relation, players } => {
                write!(f, "add to {relation}:")?;
                for (role, player) in players {
                    write!(f, " {role}={player}")?;
                }
                Ok(())
            }
            Self::RemoveRolePlayers { relation, players } => {
                write!(f, "remove from {relation}:")?;
                for (role, player) in players {
                    match role {
                        Some(role) => write!(f, " {role}={player}")?,
                        None => write!(f, " {player}")?,
                    }
                }
                Ok(())
            }
            Self::DeleteThing { var, ty } => write!(f, "delete {var} isa {ty}"),
        }
    }
}

/// A unit of work in a write plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub requires: BTreeSet<Variable>,
    pub produces: BTreeSet<Variable>,
    pub action: StepAction,
}

impl Step {
    #[must_use]
    pub fn new(action: StepAction) -> Self {
        Self {
            requires: BTreeSet::new(),
            produces: BTreeSet::new(),
            action,
        }
    }

    #[must_use]
    pub fn requires<'a>(mut self, vars: impl IntoIterator<Item = &'a Variable>) -> Self {
        self.requires.extend(vars.into_iter().cloned());
        self
    }

    #[must_use]
    pub fn produces<'a>(mut self, vars: impl IntoIterator<Item = &'a Variable>) -> Self {
        self.produces.extend(vars.into_iter().cloned());
        self
    }

    fn describe(var: &Variable, param: ConceptParam) -> Self {
        Self::new(StepAction::Describe {
            var: var.clone(),
            param,
        })
        .produces([var])
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.action)
    }
}

// =============================================================================
// CONSTRAINT → STEPS
// =============================================================================

impl Constraint {
    /// Mutation steps applying this constraint to `var` in `mode`.
    pub fn steps(&self, var: &Variable, mode: WriteMode) -> Result<Vec<Step>, QuarryError> {
        match mode {
            WriteMode::Define => self.define_steps(var),
            WriteMode::Undefine => self.undefine_steps(var),
            WriteMode::Insert => self.insert_steps(var),
            WriteMode::Delete => self.delete_steps(var),
        }
    }

    fn unsupported(&self, mode: WriteMode) -> QuarryError {
        QuarryError::UnsupportedWrite {
            constraint: self.to_string(),
            mode: mode.to_string(),
        }
    }

    fn define_steps(&self, var: &Variable) -> Result<Vec<Step>, QuarryError> {
        let steps = match self {
            Self::Id(id) => vec![Step::describe(var, ConceptParam::Id(*id))],
            Self::Label(label) => vec![Step::describe(var, ConceptParam::Label(label.clone()))],
            Self::Sub { sup, .. } => vec![
                Step::describe(var, ConceptParam::Sub(sup.var().clone())).requires([sup.var()]),
            ],
            Self::IsAbstract => vec![
                Step::new(StepAction::SetAbstract {
                    var: var.clone(),
                    value: true,
                })
                .requires([var]),
            ],
            Self::DataType(data_type) => {
                vec![Step::describe(var, ConceptParam::DataType(*data_type))]
            }
            Self::Regex(regex) => {
                regex_lite::Regex::new(regex).map_err(|e| QuarryError::InvalidRegex {
                    regex: regex.clone(),
                    reason: e.to_string(),
                })?;
                vec![
                    Step::new(StepAction::SetRegex {
                        var: var.clone(),
                        regex: regex.clone(),
                    })
                    .requires([var]),
                ]
            }
            Self::Plays { role, required } => vec![
                Step::new(StepAction::Plays {
                    var: var.clone(),
                    role: role.var().clone(),
                    required: *required,
                })
                .requires([var, role.var()]),
            ],
            Self::Relates { role, super_role } => {
                let role_var = role.var();
                let mut steps = vec![
                    Step::describe(role_var, ConceptParam::Role),
                    Step::new(StepAction::Relates {
                        var: var.clone(),
                        role: role_var.clone(),
                    })
                    .requires([var, role_var]),
                ];
                if let Some(sup) = super_role {
                    steps.push(
                        Step::describe(role_var, ConceptParam::Sub(sup.var().clone()))
                            .requires([sup.var()]),
                    );
                }
                steps
            }
            Self::HasAttributeType {
                attribute_type,
                key,
            } => vec![
                Step::new(StepAction::Owns {
                    var: var.clone(),
                    attribute_type: attribute_type.var().clone(),
                    key: *key,
                })
                .requires([var, attribute_type.var()]),
            ],
            Self::When(pattern) => vec![Step::describe(var, ConceptParam::When(pattern.clone()))],
            Self::Then(pattern) => vec![Step::describe(var, ConceptParam::Then(pattern.clone()))],
            Self::Value(_)
            | Self::Isa { .. }
            | Self::Neq(_)
            | Self::HasAttribute { .. }
            | Self::Relation(_) => return Err(self.unsupported(WriteMode::Define)),
        };
        Ok(steps)
    }

    fn undefine_steps(&self, var: &Variable) -> Result<Vec<Step>, QuarryError> {
        let steps = match self {
            Self::Id(id) => vec![Step::describe(var, ConceptParam::Id(*id))],
            Self::Label(label) => vec![Step::describe(var, ConceptParam::Label(label.clone()))],
            Self::Sub { sup, .. } => vec![
                Step::new(StepAction::DeleteType {
                    var: var.clone(),
                    sup: sup.var().clone(),
                })
                .requires([var, sup.var()]),
            ],
            Self::IsAbstract => vec![
                Step::new(StepAction::SetAbstract {
                    var: var.clone(),
                    value: false,
                })
                .requires([var]),
            ],
            Self::Regex(regex) => vec![
                Step::new(StepAction::UnsetRegex {
                    var: var.clone(),
                    regex: regex.clone(),
                })
                .requires([var]),
            ],
            Self::Plays { role, .. } => vec![
                Step::new(StepAction::Unplay {
                    var: var.clone(),
                    role: role.var().clone(),
                })
                .requires([var, role.var()]),
            ],
            Self::Relates { role, .. } => vec![
                Step::new(StepAction::Unrelate {
                    var: var.clone(),
                    role: role.var().clone(),
                })
                .requires([var, role.var()]),
            ],
            Self::HasAttributeType { attribute_type, .. } => vec![
                Step::new(StepAction::Disown {
                    var: var.clone(),
                    attribute_type: attribute_type.var().clone(),
                })
                .requires([var, attribute_type.var()]),
            ],
            // A rule goes away with `sub rule`; its body and head go with it.
            Self::When(_) | Self::Then(_) => Vec::new(),
            Self::Value(_)
            | Self::Isa { .. }
            | Self::DataType(_)
            | Self::Neq(_)
            | Self::HasAttribute { .. }
            | Self::Relation(_) => return Err(self.unsupported(WriteMode::Undefine)),
        };
        Ok(steps)
    }

    fn insert_steps(&self, var: &Variable) -> Result<Vec<Step>, QuarryError> {
        let steps = match self {
            Self::Id(id) => vec![Step::describe(var, ConceptParam::Id(*id))],
            Self::Label(label) => vec![Step::describe(var, ConceptParam::Label(label.clone()))],
            Self::Value(predicate) => {
                let value = predicate
                    .equal_value()
                    .ok_or_else(|| self.unsupported(WriteMode::Insert))?;
                vec![Step::describe(var, ConceptParam::Value(value.clone()))]
            }
            Self::Isa { ty, .. } => vec![
                Step::describe(var, ConceptParam::Isa(ty.var().clone())).requires([ty.var()]),
            ],
            Self::HasAttribute {
                attribute,
                relation,
                ..
            } => vec![
                Step::new(StepAction::AttachAttribute {
                    owner: var.clone(),
                    attribute: attribute.var().clone(),
                    relation: relation.var().clone(),
                })
                .requires([var, attribute.var()])
                .produces([relation.var()]),
            ],
            Self::Relation(role_players) => {
                let mut players = Vec::with_capacity(role_players.len());
                for rp in role_players {
                    let role = rp.role.as_ref().ok_or_else(|| {
                        QuarryError::incomplete(
                            rp.player.var(),
                            format!("role players of {var} need a role on insert"),
                        )
                    })?;
                    players.push((role.var().clone(), rp.player.var().clone()));
                }
                let mut step = Step::new(StepAction::AddRolePlayers {
                    relation: var.clone(),
                    players: players.clone(),
                })
                .requires([var]);
                for (role, player) in &players {
                    step = step.requires([role, player]);
                }
                vec![step]
            }
            Self::Sub { .. }
            | Self::IsAbstract
            | Self::DataType(_)
            | Self::Regex(_)
            | Self::Neq(_)
            | Self::Plays { .. }
            | Self::Relates { .. }
            | Self::HasAttributeType { .. }
            | Self::When(_)
            | Self::Then(_) => return Err(self.unsupported(WriteMode::Insert)),
        };
        Ok(steps)
    }

    fn delete_steps(&self, var: &Variable) -> Result<Vec<Step>, QuarryError> {
        let steps = match self {
            Self::Id(id) => vec![Step::describe(var, ConceptParam::Id(*id))],
            Self::Label(label) => vec![Step::describe(var, ConceptParam::Label(label.clone()))],
            // The thing is already bound; its value only narrowed the match.
            Self::Value(_) => Vec::new(),
            Self::Isa { ty, .. } => vec![
                Step::new(StepAction::DeleteThing {
                    var: var.clone(),
                    ty: ty.var().clone(),
                })
                .requires([var, ty.var()]),
            ],
            Self::HasAttribute { attribute, .. } => vec![
                Step::new(StepAction::DetachAttribute {
                    owner: var.clone(),
                    attribute: attribute.var().clone(),
                })
                .requires([var, attribute.var()]),
            ],
            Self::Relation(role_players) => {
                let players: Vec<(Option<Variable>, Variable)> = role_players
                    .iter()
                    .map(|rp| {
                        (
                            rp.role.as_ref().map(|r| r.var().clone()),
                            rp.player.var().clone(),
                        )
                    })
                    .collect();
                let mut step = Step::new(StepAction::RemoveRolePlayers {
                    relation: var.clone(),
                    players: players.clone(),
                })
                .requires([var]);
                for (role, player) in &players {
                    step = step.requires(role.iter().chain([player]));
                }
                vec![step]
            }
            Self::Sub { .. }
            | Self::IsAbstract
            | Self::DataType(_)
            | Self::Regex(_)
            | Self::Neq(_)
            | Self::Plays { .. }
            | Self::Relates { .. }
            | Self::HasAttributeType { .. }
            | Self::When(_)
            | Self::Then(_) => return Err(self.unsupported(WriteMode::Delete)),
        };
        Ok(steps)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::pattern::{label, var};
    use crate::types::ValuePredicate;

    fn x() -> Variable {
        Variable::named("x")
    }

    #[test]
    fn define_is_abstract_requires_the_type() {
        let steps = Constraint::IsAbstract
            .steps(&x(), WriteMode::Define)
            .expect("steps");
        assert_eq!(steps.len(), 1);
        assert!(steps[0].requires.contains(&x()));
        assert!(steps[0].produces.is_empty());
    }

    #[test]
    fn define_sub_produces_the_type() {
        let sup = label("entity");
        let steps = Constraint::Sub {
            sup: sup.clone(),
            explicit: false,
        }
        .steps(&x(), WriteMode::Define)
        .expect("steps");
        assert!(steps[0].produces.contains(&x()));
        assert!(steps[0].requires.contains(sup.var()));
    }

    #[test]
    fn undefine_sub_deletes() {
        let steps = Constraint::Sub {
            sup: label("entity"),
            explicit: false,
        }
        .steps(&x(), WriteMode::Undefine)
        .expect("steps");
        assert!(matches!(steps[0].action, StepAction::DeleteType { .. }));
    }

    #[test]
    fn insert_has_produces_the_relation() {
        let x = var("x").has("name", "Alice").expect("has");
        let constraint = x.constraints().next().expect("has");
        let steps = constraint.steps(x.var(), WriteMode::Insert).expect("steps");
        assert_eq!(steps.len(), 1);
        assert!(steps[0].requires.contains(x.var()));
        assert_eq!(steps[0].requires.len(), 2);
        assert_eq!(steps[0].produces.len(), 1);
    }

    #[test]
    fn insert_requires_equality_values() {
        let gt = Constraint::Value(ValuePredicate::new(crate::types::Comparator::Gt, 3));
        assert!(matches!(
            gt.steps(&x(), WriteMode::Insert),
            Err(QuarryError::UnsupportedWrite { .. })
        ));
        let eq = Constraint::Value(ValuePredicate::eq(3));
        assert_eq!(eq.steps(&x(), WriteMode::Insert).expect("steps").len(), 1);
    }

    #[test]
    fn delete_ignores_values() {
        let eq = Constraint::Value(ValuePredicate::eq(3));
        assert!(eq.steps(&x(), WriteMode::Delete).expect("steps").is_empty());
    }

    #[test]
    fn insert_role_players_need_roles() {
        let r = var("r").rel(var("a")).expect("rel");
        let constraint = r.constraints().next().expect("relation");
        assert!(matches!(
            constraint.steps(r.var(), WriteMode::Insert),
            Err(QuarryError::IncompleteConcept { .. })
        ));
        assert!(constraint.steps(r.var(), WriteMode::Delete).is_ok());
    }

    #[test]
    fn neq_is_never_writable() {
        let neq = Constraint::Neq(var("y"));
        for mode in [
            WriteMode::Define,
            WriteMode::Undefine,
            WriteMode::Insert,
            WriteMode::Delete,
        ] {
            assert!(matches!(
                neq.steps(&x(), mode),
                Err(QuarryError::UnsupportedWrite { .. })
            ));
        }
    }

    #[test]
    fn invalid_regex_is_rejected_at_compile_time() {
        let regex = Constraint::Regex("(unclosed".to_string());
        assert!(matches!(
            regex.steps(&x(), WriteMode::Define),
            Err(QuarryError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn relates_describes_the_role() {
        let steps = Constraint::Relates {
            role: label("husband"),
            super_role: Some(label("spouse")),
        }
        .steps(&x(), WriteMode::Define)
        .expect("steps");
        assert_eq!(steps.len(), 3);
        assert!(
            steps
                .iter()
                .filter(|s| s.produces.contains(label("husband").var()))
                .count()
                == 2
        );
    }

    #[test]
    fn rules_vanish_on_undefine() {
        let body = Pattern::from(var("x").isa("person").expect("isa"));
        assert!(
            Constraint::When(body)
                .steps(&x(), WriteMode::Undefine)
                .expect("steps")
                .is_empty()
        );
    }
}
