//! # Traversal Fragments
//!
//! Matching compiles each constraint into fragments: the smallest units a
//! traversal planner can reorder and execute. A fragment starts at one
//! variable and may reach others.

use std::collections::BTreeSet;
use std::fmt;

use crate::pattern::Variable;
use crate::property::{Constraint, RolePlayer};
use crate::types::{ConceptId, DataType, Label, ValuePredicate, quote};

/// A single traversal step.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Fragment {
    Id {
        start: Variable,
        id: ConceptId,
    },
    Label {
        start: Variable,
        label: Label,
    },
    Value {
        start: Variable,
        predicate: ValuePredicate,
    },
    Isa {
        start: Variable,
        ty: Variable,
        explicit: bool,
    },
    Sub {
        start: Variable,
        sup: Variable,
        explicit: bool,
    },
    IsAbstract {
        start: Variable,
    },
    DataType {
        start: Variable,
        data_type: DataType,
    },
    Regex {
        start: Variable,
        regex: String,
    },
    Neq {
        start: Variable,
        other: Variable,
    },
    Plays {
        start: Variable,
        role: Variable,
        required: bool,
    },
    Relates {
        start: Variable,
        role: Variable,
    },
    Owns {
        start: Variable,
        attribute_type: Variable,
        key: bool,
    },
    Has {
        owner: Variable,
        attribute: Variable,
        relation: Variable,
    },
    /// One casting: `relation` connects to `player` through `edge`.
    RolePlayer {
        relation: Variable,
        edge: Variable,
        role: Option<Variable>,
        player: Variable,
    },
    /// Two castings of one relation must be different edges.
    DistinctCasting {
        relation: Variable,
        edge: Variable,
        other: Variable,
    },
}

impl Fragment {
    /// The variable this fragment starts from.
    #[must_use]
    pub fn start(&self) -> &Variable {
        match self {
            Self::Id { start, .. }
            | Self::Label { start, .. }
            | Self::Value { start, .. }
            | Self::Isa { start, .. }
            | Self::Sub { start, .. }
            | Self::IsAbstract { start }
            | Self::DataType { start, .. }
            | Self::Regex { start, .. }
            | Self::Neq { start, .. }
            | Self::Plays { start, .. }
            | Self::Relates { start, .. }
            | Self::Owns { start, .. } => start,
            Self::Has { owner, .. } => owner,
            Self::RolePlayer { relation, .. } | Self::DistinctCasting { relation, .. } => relation,
        }
    }

    /// Every variable this fragment mentions.
    #[must_use]
    pub fn variables(&self) -> BTreeSet<&Variable> {
        let mut vars = BTreeSet::from([self.start()]);
        match self {
            Self::Isa { ty: other, .. }
            | Self::Sub { sup: other, .. }
            | Self::Neq { other, .. }
            | Self::Plays { role: other, .. }
            | Self::Relates { role: other, .. }
            | Self::Owns {
                attribute_type: other,
                ..
            } => {
                vars.insert(other);
            }
            Self::Has {
                attribute,
                relation,
                ..
            } => {
                vars.insert(attribute);
                vars.insert(relation);
            }
            Self::RolePlayer {
                edge, role, player, ..
            } => {
                vars.insert(edge);
                vars.insert(player);
                vars.extend(role.iter());
            }
            Self::DistinctCasting { edge, other, .. } => {
                vars.insert(edge);
                vars.insert(other);
            }
            Self::Id { .. }
            | Self::Label { .. }
            | Self::Value { .. }
            | Self::IsAbstract { .. }
            | Self::DataType { .. }
            | Self::Regex { .. } => {}
        }
        vars
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id { start, id } => write!(f, "{start}[id:{id}]"),
            Self::Label { start, label } => write!(f, "{start}[label:{label}]"),
            Self::Value { start, predicate } => write!(f, "{start}[value:{predicate}]"),
            Self::Isa {
                start,
                ty,
                explicit,
            } => {
                let bang = if *explicit { "!" } else { "" };
                write!(f, "{start}-[isa{bang}]->{ty}")
            }
            Self::Sub {
                start,
                sup,
                explicit,
            } => {
                let bang = if *explicit { "!" } else { "" };
                write!(f, "{start}-[sub{bang}]->{sup}")
            }
            Self::IsAbstract { start } => write!(f, "{start}[is-abstract]"),
            Self::DataType { start, data_type } => write!(f, "{start}[datatype:{data_type}]"),
            Self::Regex { start, regex } => write!(f, "{start}[regex:{}]", quote(regex)),
            Self::Neq { start, other } => write!(f, "{start}[neq:{other}]"),
            Self::Plays {
                start,
                role,
                required,
            } => {
                let tag = if *required { "plays required" } else { "plays" };
                write!(f, "{start}-[{tag}]->{role}")
            }
            Self::Relates { start, role } => write!(f, "{start}-[relates]->{role}"),
            Self::Owns {
                start,
                attribute_type,
                key,
            } => {
                let tag = if *key { "key" } else { "has" };
                write!(f, "{start}-[{tag}]->{attribute_type}")
            }
            Self::Has {
                owner,
                attribute,
                relation,
            } => write!(f, "{owner}-[has:{relation}]->{attribute}"),
            Self::RolePlayer {
                relation,
                edge,
                role,
                player,
            } => match role {
                Some(role) => write!(f, "{relation}-[{edge}:{role}]->{player}"),
                None => write!(f, "{relation}-[{edge}]->{player}"),
            },
            Self::DistinctCasting {
                relation,
                edge,
                other,
            } => write!(f, "{relation}[{edge}!={other}]"),
        }
    }
}

impl Constraint {
    /// Traversal fragments matching this constraint from `start`.
    #[must_use]
    pub fn fragments(&self, start: &Variable) -> Vec<Fragment> {
        let start = start.clone();
        match self {
            Self::Id(id) => vec![Fragment::Id { start, id: *id }],
            Self::Label(label) => vec![Fragment::Label {
                start,
                label: label.clone(),
            }],
            Self::Value(predicate) => vec![Fragment::Value {
                start,
                predicate: predicate.clone(),
            }],
            Self::Isa { ty, explicit } => vec![Fragment::Isa {
                start,
                ty: ty.var().clone(),
                explicit: *explicit,
            }],
            Self::Sub { sup, explicit } => vec![Fragment::Sub {
                start,
                sup: sup.var().clone(),
                explicit: *explicit,
            }],
            Self::IsAbstract => vec![Fragment::IsAbstract { start }],
            Self::DataType(data_type) => vec![Fragment::DataType {
                start,
                data_type: *data_type,
            }],
            Self::Regex(regex) => vec![Fragment::Regex {
                start,
                regex: regex.clone(),
            }],
            Self::Neq(other) => vec![Fragment::Neq {
                start,
                other: other.var().clone(),
            }],
            Self::Plays { role, required } => vec![Fragment::Plays {
                start,
                role: role.var().clone(),
                required: *required,
            }],
            Self::Relates { role, super_role } => {
                let role = role.var().clone();
                let mut fragments = vec![Fragment::Relates {
                    start,
                    role: role.clone(),
                }];
                if let Some(sup) = super_role {
                    fragments.push(Fragment::Sub {
                        start: role,
                        sup: sup.var().clone(),
                        explicit: true,
                    });
                }
                fragments
            }
            Self::HasAttributeType {
                attribute_type,
                key,
            } => vec![Fragment::Owns {
                start,
                attribute_type: attribute_type.var().clone(),
                key: *key,
            }],
            Self::HasAttribute {
                attribute,
                relation,
                ..
            } => vec![Fragment::Has {
                owner: start,
                attribute: attribute.var().clone(),
                relation: relation.var().clone(),
            }],
            Self::Relation(players) => {
                let edges: Vec<Variable> = players
                    .iter()
                    .enumerate()
                    .map(|(i, rp)| casting_edge(&start, i, rp))
                    .collect();
                let mut fragments: Vec<Fragment> = players
                    .iter()
                    .zip(&edges)
                    .map(|(rp, edge)| Fragment::RolePlayer {
                        relation: start.clone(),
                        edge: edge.clone(),
                        role: rp.role.as_ref().map(|r| r.var().clone()),
                        player: rp.player.var().clone(),
                    })
                    .collect();
                for (i, edge) in edges.iter().enumerate() {
                    for other in &edges[i + 1..] {
                        fragments.push(Fragment::DistinctCasting {
                            relation: start.clone(),
                            edge: edge.clone(),
                            other: other.clone(),
                        });
                    }
                }
                fragments
            }
            Self::When(_) | Self::Then(_) => Vec::new(),
        }
    }
}

/// The edge variable of the `index`-th casting of `relation`.
///
/// Role and player are part of the name: other statements about the same
/// relation variable number their castings from zero too.
#[must_use]
pub fn casting_edge(relation: &Variable, index: usize, casting: &RolePlayer) -> Variable {
    let role = casting
        .role
        .as_ref()
        .map(|r| r.var().to_string())
        .unwrap_or_default();
    relation.derived(&format!("casting{index}[{role}:{}]", casting.player.var()))
}
