//! # Innate Primitives
//!
//! Fixed constants of the concept model: the meta-type labels every graph is
//! seeded with, the storage key layout, and the naming scheme of implicit
//! attribute-ownership types.

use crate::types::Label;

// =============================================================================
// META TYPES
// =============================================================================

/// Root of all entity types.
pub const ENTITY: &str = "entity";

/// Root of all relation types.
pub const RELATION: &str = "relation";

/// Root of all attribute types.
pub const ATTRIBUTE: &str = "attribute";

/// Root of all roles.
pub const ROLE: &str = "role";

/// Root of all rules.
pub const RULE: &str = "rule";

/// Every meta label, in seeding order.
pub const META_LABELS: [&str; 5] = [ENTITY, RELATION, ATTRIBUTE, ROLE, RULE];

// =============================================================================
// STORAGE KEY LAYOUT
// =============================================================================

/// `CONCEPT_PREFIX ++ id (u64 BE)` → postcard `Concept` record.
pub const CONCEPT_PREFIX: u8 = 0x01;

/// `LABEL_PREFIX ++ label bytes` → id (u64 BE).
pub const LABEL_PREFIX: u8 = 0x02;

/// `ATTRIBUTE_INDEX_PREFIX ++ type id ++ postcard value` → attribute id.
pub const ATTRIBUTE_INDEX_PREFIX: u8 = 0x03;

/// `INSTANCE_COUNT_PREFIX ++ type id` → i64 BE, maintained untracked.
pub const INSTANCE_COUNT_PREFIX: u8 = 0x04;

/// First id handed out by a fresh key generator.
pub const FIRST_CONCEPT_ID: u64 = 1;

// =============================================================================
// IMPLICIT OWNERSHIP TYPES
// =============================================================================

/// Relation type backing ownership of `attribute`, e.g. `@has-name`.
#[must_use]
pub fn has_relation(attribute: &Label) -> Label {
    Label::new(format!("@has-{attribute}"))
}

/// Relation type backing key ownership of `attribute`, e.g. `@key-email`.
#[must_use]
pub fn key_relation(attribute: &Label) -> Label {
    Label::new(format!("@key-{attribute}"))
}

/// Role played by the owner in an implicit ownership relation.
#[must_use]
pub fn owner_role(relation: &Label) -> Label {
    Label::new(format!("{relation}-owner"))
}

/// Role played by the attribute in an implicit ownership relation.
#[must_use]
pub fn value_role(relation: &Label) -> Label {
    Label::new(format!("{relation}-value"))
}
