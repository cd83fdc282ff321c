//! # Concept Model
//!
//! Typed records of everything a write can touch: schema concepts (types,
//! roles, rules) and things (entities, relations, attributes), plus the
//! [`ConceptStore`] contract the write executor runs against.

pub mod graph;

pub use graph::ConceptGraph;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::types::{ConceptId, DataType, Label, QuarryError, Value};

// =============================================================================
// CONCEPTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConceptKind {
    EntityType,
    RelationType,
    AttributeType,
    Role,
    Rule,
    Entity,
    Relation,
    Attribute,
}

impl ConceptKind {
    /// Entity, relation and attribute types.
    #[must_use]
    pub fn is_type(self) -> bool {
        matches!(
            self,
            Self::EntityType | Self::RelationType | Self::AttributeType
        )
    }

    /// Types, roles and rules.
    #[must_use]
    pub fn is_schema(self) -> bool {
        !self.is_thing()
    }

    #[must_use]
    pub fn is_thing(self) -> bool {
        matches!(self, Self::Entity | Self::Relation | Self::Attribute)
    }

    /// The kind of instances of a type of this kind.
    #[must_use]
    pub fn instance_kind(self) -> Option<Self> {
        match self {
            Self::EntityType => Some(Self::Entity),
            Self::RelationType => Some(Self::Relation),
            Self::AttributeType => Some(Self::Attribute),
            _ => None,
        }
    }
}

impl fmt::Display for ConceptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EntityType => "entity type",
            Self::RelationType => "relation type",
            Self::AttributeType => "attribute type",
            Self::Role => "role",
            Self::Rule => "rule",
            Self::Entity => "entity",
            Self::Relation => "relation",
            Self::Attribute => "attribute",
        };
        f.write_str(name)
    }
}

/// A stored concept. Schema fields are empty on things and vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    pub id: ConceptId,
    pub kind: ConceptKind,

    // Schema concepts
    pub label: Option<Label>,
    pub sup: Option<ConceptId>,
    pub is_abstract: bool,
    pub data_type: Option<DataType>,
    pub regex: Option<String>,
    /// Role → required.
    pub plays: BTreeMap<ConceptId, bool>,
    pub relates: BTreeSet<ConceptId>,
    /// Attribute type → key.
    pub owns: BTreeMap<ConceptId, bool>,
    pub when: Option<String>,
    pub then: Option<String>,

    // Things
    pub type_id: Option<ConceptId>,
    pub value: Option<Value>,
    /// Attribute → ownership relation.
    pub attributes: BTreeMap<ConceptId, ConceptId>,
    /// `(role, player)` castings of a relation.
    pub role_players: Vec<(ConceptId, ConceptId)>,
    /// Relations this thing plays a role in.
    pub playing: BTreeSet<ConceptId>,
}

impl Concept {
    fn empty(id: ConceptId, kind: ConceptKind) -> Self {
        Self {
            id,
            kind,
            label: None,
            sup: None,
            is_abstract: false,
            data_type: None,
            regex: None,
            plays: BTreeMap::new(),
            relates: BTreeSet::new(),
            owns: BTreeMap::new(),
            when: None,
            then: None,
            type_id: None,
            value: None,
            attributes: BTreeMap::new(),
            role_players: Vec::new(),
            playing: BTreeSet::new(),
        }
    }

    /// A schema concept.
    #[must_use]
    pub fn schema(id: ConceptId, kind: ConceptKind, label: Label, sup: Option<ConceptId>) -> Self {
        Self {
            label: Some(label),
            sup,
            ..Self::empty(id, kind)
        }
    }

    /// A thing of type `type_id`.
    #[must_use]
    pub fn thing(id: ConceptId, kind: ConceptKind, type_id: ConceptId) -> Self {
        Self {
            type_id: Some(type_id),
            ..Self::empty(id, kind)
        }
    }

    #[must_use]
    pub fn is_type(&self) -> bool {
        self.kind.is_type()
    }

    #[must_use]
    pub fn is_thing(&self) -> bool {
        self.kind.is_thing()
    }

    #[must_use]
    pub fn is_role(&self) -> bool {
        self.kind == ConceptKind::Role
    }

    #[must_use]
    pub fn is_attribute(&self) -> bool {
        self.kind == ConceptKind::Attribute
    }

    /// Meta concepts have no super type.
    #[must_use]
    pub fn is_meta(&self) -> bool {
        self.kind.is_schema() && self.sup.is_none()
    }
}

impl fmt::Display for Concept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.label, &self.value) {
            (Some(label), _) => write!(f, "{} `{label}`", self.kind),
            (None, Some(value)) => write!(f, "{} {} {value}", self.kind, self.id),
            (None, None) => write!(f, "{} {}", self.kind, self.id),
        }
    }
}

/// Everything needed to create a new schema concept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDefinition {
    pub label: Label,
    pub sup: ConceptId,
    pub data_type: Option<DataType>,
    pub when: Option<String>,
    pub then: Option<String>,
}

impl TypeDefinition {
    #[must_use]
    pub fn new(label: Label, sup: ConceptId) -> Self {
        Self {
            label,
            sup,
            data_type: None,
            when: None,
            then: None,
        }
    }
}

// =============================================================================
// STORE CONTRACT
// =============================================================================

/// The concept model operations the write executor needs.
///
/// Removal operations (`remove_*`, `detach_attribute`,
/// `remove_role_player`) are idempotent.
pub trait ConceptStore {
    fn concept(&self, id: ConceptId) -> Result<Option<Concept>, QuarryError>;

    fn lookup_label(&self, label: &Label) -> Result<Option<ConceptId>, QuarryError>;

    /// Number of direct instances of `ty`.
    fn instance_count(&self, ty: ConceptId) -> Result<i64, QuarryError>;

    fn is_deleted(&self, id: ConceptId) -> Result<bool, QuarryError> {
        Ok(self.concept(id)?.is_none())
    }

    /// The concept, or `ConceptNotFound`.
    fn require(&self, id: ConceptId) -> Result<Concept, QuarryError> {
        self.concept(id)?.ok_or(QuarryError::ConceptNotFound(id))
    }

    /// The id labelled `label`, or `LabelNotFound`.
    fn require_label(&self, label: &Label) -> Result<ConceptId, QuarryError> {
        self.lookup_label(label)?
            .ok_or_else(|| QuarryError::LabelNotFound(label.clone()))
    }

    // Schema

    fn define_type(&mut self, definition: TypeDefinition) -> Result<ConceptId, QuarryError>;

    fn set_sup(&mut self, ty: ConceptId, sup: ConceptId) -> Result<(), QuarryError>;

    fn set_abstract(&mut self, ty: ConceptId, is_abstract: bool) -> Result<(), QuarryError>;

    fn set_regex(&mut self, ty: ConceptId, regex: Option<String>) -> Result<(), QuarryError>;

    fn add_plays(&mut self, ty: ConceptId, role: ConceptId, required: bool)
    -> Result<(), QuarryError>;

    fn remove_plays(&mut self, ty: ConceptId, role: ConceptId) -> Result<(), QuarryError>;

    fn add_relates(&mut self, ty: ConceptId, role: ConceptId) -> Result<(), QuarryError>;

    fn remove_relates(&mut self, ty: ConceptId, role: ConceptId) -> Result<(), QuarryError>;

    fn add_owns(
        &mut self,
        ty: ConceptId,
        attribute_type: ConceptId,
        key: bool,
    ) -> Result<(), QuarryError>;

    fn remove_owns(&mut self, ty: ConceptId, attribute_type: ConceptId)
    -> Result<(), QuarryError>;

    /// Delete any concept. Types with subtypes or instances are refused;
    /// things take their castings and ownerships with them.
    fn delete(&mut self, id: ConceptId) -> Result<(), QuarryError>;

    // Data

    /// Create an instance of `ty`. Attributes with an existing value are
    /// returned rather than duplicated.
    fn insert_instance(
        &mut self,
        ty: ConceptId,
        value: Option<Value>,
    ) -> Result<ConceptId, QuarryError>;

    /// Attach `attribute` to `owner`, returning the ownership relation.
    fn attach_attribute(
        &mut self,
        owner: ConceptId,
        attribute: ConceptId,
    ) -> Result<ConceptId, QuarryError>;

    fn detach_attribute(&mut self, owner: ConceptId, attribute: ConceptId)
    -> Result<(), QuarryError>;

    fn add_role_player(
        &mut self,
        relation: ConceptId,
        role: ConceptId,
        player: ConceptId,
    ) -> Result<(), QuarryError>;

    /// Remove castings of `player`, restricted to `role` when given.
    fn remove_role_player(
        &mut self,
        relation: ConceptId,
        role: Option<ConceptId>,
        player: ConceptId,
    ) -> Result<(), QuarryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_classification() {
        assert!(ConceptKind::EntityType.is_type());
        assert!(ConceptKind::Role.is_schema());
        assert!(!ConceptKind::Role.is_type());
        assert!(ConceptKind::Attribute.is_thing());
        assert_eq!(
            ConceptKind::RelationType.instance_kind(),
            Some(ConceptKind::Relation)
        );
        assert_eq!(ConceptKind::Rule.instance_kind(), None);
    }

    #[test]
    fn records_survive_postcard() {
        let mut concept = Concept::thing(ConceptId(9), ConceptKind::Attribute, ConceptId(3));
        concept.value = Some(Value::from("Alice"));
        concept.playing.insert(ConceptId(12));
        let bytes = postcard::to_allocvec(&concept).expect("encode");
        let back: Concept = postcard::from_bytes(&bytes).expect("decode");
        assert_eq!(back, concept);
    }

    #[test]
    fn display_prefers_labels() {
        let person = Concept::schema(
            ConceptId(5),
            ConceptKind::EntityType,
            Label::new("person"),
            Some(ConceptId(1)),
        );
        assert_eq!(person.to_string(), "entity type `person`");
        assert!(!person.is_meta());
        let thing = Concept::thing(ConceptId(7), ConceptKind::Entity, ConceptId(5));
        assert_eq!(thing.to_string(), "entity V7");
    }
}
