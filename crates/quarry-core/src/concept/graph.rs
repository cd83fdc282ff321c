//! # Concept Graph
//!
//! [`ConceptStore`] over any [`Storage`]. Concept records are postcard
//! encoded under the concept prefix; secondary keys index labels, attribute
//! values and per-type instance counts (see `primitives` for the layout).
//!
//! A fresh graph is seeded with the meta types. Attribute ownership is backed
//! by implicit relation types (`@has-<label>`, `@key-<label>`) created when
//! the ownership is defined.

use std::collections::BTreeSet;

use super::{Concept, ConceptKind, ConceptStore, TypeDefinition};
use crate::primitives::{
    ATTRIBUTE, ATTRIBUTE_INDEX_PREFIX, CONCEPT_PREFIX, ENTITY, INSTANCE_COUNT_PREFIX,
    LABEL_PREFIX, META_LABELS, RELATION, ROLE, RULE, has_relation, key_relation, owner_role,
    value_role,
};
use crate::storage::{Storage, decode_counter, prefixed};
use crate::types::{ConceptId, Label, QuarryError, Value};

// =============================================================================
// KEYS
// =============================================================================

fn concept_key(id: ConceptId) -> Vec<u8> {
    prefixed(CONCEPT_PREFIX, &id.to_key())
}

fn label_key(label: &Label) -> Vec<u8> {
    prefixed(LABEL_PREFIX, label.as_str().as_bytes())
}

fn counter_key(ty: ConceptId) -> Vec<u8> {
    prefixed(INSTANCE_COUNT_PREFIX, &ty.to_key())
}

fn attribute_index_key(ty: ConceptId, value: &Value) -> Result<Vec<u8>, QuarryError> {
    let mut key = prefixed(ATTRIBUTE_INDEX_PREFIX, &ty.to_key());
    let encoded =
        postcard::to_allocvec(value).map_err(|e| QuarryError::SerializationError(e.to_string()))?;
    key.extend_from_slice(&encoded);
    Ok(key)
}

fn decode_id(bytes: &[u8]) -> Result<ConceptId, QuarryError> {
    <[u8; 8]>::try_from(bytes)
        .map(|raw| ConceptId(u64::from_be_bytes(raw)))
        .map_err(|_| QuarryError::DeserializationError(format!("bad id of {} bytes", bytes.len())))
}

/// Decoder for `Storage::iterate`; undecodable records are skipped.
fn decode_concept(bytes: &[u8]) -> Option<Concept> {
    match postcard::from_bytes(bytes) {
        Ok(concept) => Some(concept),
        Err(e) => {
            tracing::warn!(error = %e, "skipping undecodable concept record");
            None
        }
    }
}

/// Counts for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub schema_concepts: usize,
    pub things: usize,
}

// =============================================================================
// GRAPH
// =============================================================================

#[derive(Debug)]
pub struct ConceptGraph<S: Storage> {
    storage: S,
}

impl<S: Storage> ConceptGraph<S> {
    /// Wrap `storage`, seeding the meta types if they are missing.
    pub fn open(storage: S) -> Result<Self, QuarryError> {
        let mut graph = Self { storage };
        if graph.lookup_label(&Label::new(ENTITY))?.is_none() {
            graph.seed_meta_types()?;
        }
        Ok(graph)
    }

    fn seed_meta_types(&mut self) -> Result<(), QuarryError> {
        for label in META_LABELS {
            let kind = match label {
                ENTITY => ConceptKind::EntityType,
                RELATION => ConceptKind::RelationType,
                ATTRIBUTE => ConceptKind::AttributeType,
                ROLE => ConceptKind::Role,
                _ => ConceptKind::Rule,
            };
            let mut concept = Concept::schema(self.next_id(), kind, Label::new(label), None);
            concept.is_abstract = kind.is_type();
            self.write(&concept)?;
            self.storage
                .put(&label_key(&Label::new(label)), &concept.id.to_key())?;
        }
        tracing::debug!(count = META_LABELS.len(), "seeded meta types");
        Ok(())
    }

    #[must_use]
    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn commit(&mut self) -> Result<(), QuarryError> {
        self.storage.commit()
    }

    pub fn close(&mut self) {
        self.storage.close();
    }

    /// Every stored concept, in id order.
    pub fn concepts(&self) -> Result<Vec<Concept>, QuarryError> {
        self.storage
            .iterate(&[CONCEPT_PREFIX], |_, value| decode_concept(value))
    }

    pub fn stats(&self) -> Result<GraphStats, QuarryError> {
        let mut stats = GraphStats::default();
        for concept in self.concepts()? {
            if concept.is_thing() {
                stats.things = stats.things.saturating_add(1);
            } else {
                stats.schema_concepts = stats.schema_concepts.saturating_add(1);
            }
        }
        Ok(stats)
    }

    fn next_id(&self) -> ConceptId {
        ConceptId(self.storage.key_generator().next_key())
    }

    fn write(&mut self, concept: &Concept) -> Result<(), QuarryError> {
        let bytes = postcard::to_allocvec(concept)
            .map_err(|e| QuarryError::SerializationError(e.to_string()))?;
        self.storage.put(&concept_key(concept.id), &bytes)
    }

    fn bump_count(&mut self, ty: ConceptId, delta: i64) -> Result<(), QuarryError> {
        self.storage.merge_untracked(&counter_key(ty), delta)
    }

    /// `ty` followed by its super types, nearest first.
    fn type_chain(&self, ty: ConceptId) -> Result<Vec<Concept>, QuarryError> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut next = Some(ty);
        while let Some(id) = next {
            if !seen.insert(id) {
                break;
            }
            let concept = self.require(id)?;
            next = concept.sup;
            chain.push(concept);
        }
        Ok(chain)
    }

    fn type_chain_ids(&self, ty: ConceptId) -> Result<BTreeSet<ConceptId>, QuarryError> {
        Ok(self.type_chain(ty)?.into_iter().map(|c| c.id).collect())
    }

    fn type_of(concept: &Concept) -> Result<ConceptId, QuarryError> {
        concept
            .type_id
            .ok_or_else(|| QuarryError::incomplete(concept, "a thing without a type"))
    }

    fn get_or_define(&mut self, label: Label, sup: ConceptId) -> Result<ConceptId, QuarryError> {
        match self.lookup_label(&label)? {
            Some(id) => Ok(id),
            None => self.define_type(TypeDefinition::new(label, sup)),
        }
    }

    /// The implicit relation type and its `(owner, value)` roles for
    /// ownership of `attribute_type`, created on first use.
    fn implicit_relation(
        &mut self,
        attribute_type: &Concept,
        key: bool,
    ) -> Result<(ConceptId, ConceptId, ConceptId), QuarryError> {
        let attribute_label = attribute_type
            .label
            .as_ref()
            .ok_or_else(|| QuarryError::incomplete(attribute_type, "an unlabelled type"))?;
        let relation_label = if key {
            key_relation(attribute_label)
        } else {
            has_relation(attribute_label)
        };
        let role_meta = self.require_label(&Label::new(ROLE))?;
        let relation_meta = self.require_label(&Label::new(RELATION))?;

        let owner = self.get_or_define(owner_role(&relation_label), role_meta)?;
        let value = self.get_or_define(value_role(&relation_label), role_meta)?;
        let relation = self.get_or_define(relation_label, relation_meta)?;
        self.add_relates(relation, owner)?;
        self.add_relates(relation, value)?;
        Ok((relation, owner, value))
    }

    /// The owned attribute type and key flag that let `owner_type` own
    /// attributes of `attribute_type`.
    fn ownership(
        &self,
        owner_type: ConceptId,
        attribute_type: ConceptId,
    ) -> Result<Option<(ConceptId, bool)>, QuarryError> {
        let attribute_chain = self.type_chain_ids(attribute_type)?;
        for ty in self.type_chain(owner_type)? {
            for (owned, key) in &ty.owns {
                if attribute_chain.contains(owned) {
                    return Ok(Some((*owned, *key)));
                }
            }
        }
        Ok(None)
    }

    fn check_regex(&self, ty: ConceptId, value: &Value) -> Result<(), QuarryError> {
        let Some(text) = value.as_str() else {
            return Ok(());
        };
        for concept in self.type_chain(ty)? {
            let Some(regex) = &concept.regex else {
                continue;
            };
            let compiled = regex_lite::Regex::new(&format!("^(?:{regex})$")).map_err(|e| {
                QuarryError::InvalidRegex {
                    regex: regex.clone(),
                    reason: e.to_string(),
                }
            })?;
            if !compiled.is_match(text) {
                return Err(QuarryError::RegexViolation {
                    value: value.to_string(),
                    regex: regex.clone(),
                });
            }
        }
        Ok(())
    }

    fn is_implicit_relation(&self, relation: &Concept) -> Result<bool, QuarryError> {
        let ty = self.require(Self::type_of(relation)?)?;
        Ok(ty.label.as_ref().is_some_and(Label::is_implicit))
    }

    /// Delete an ownership relation and unlink it from owner and attribute.
    fn delete_ownership(&mut self, relation: &Concept) -> Result<(), QuarryError> {
        for (_, player) in &relation.role_players {
            if let Some(mut concept) = self.concept(*player)? {
                concept.playing.remove(&relation.id);
                concept.attributes.retain(|_, r| *r != relation.id);
                self.write(&concept)?;
            }
        }
        self.bump_count(Self::type_of(relation)?, -1)?;
        self.storage.delete(&concept_key(relation.id))
    }

    fn delete_schema(&mut self, concept: Concept) -> Result<(), QuarryError> {
        if concept.is_meta() {
            return Err(QuarryError::invalid_target(
                "delete",
                &concept,
                "a user-defined concept",
            ));
        }
        let id = concept.id;
        let label = concept
            .label
            .clone()
            .unwrap_or_else(|| Label::new(id.to_string()));

        let subtypes = self.storage.iterate(&[CONCEPT_PREFIX], |_, value| {
            decode_concept(value).filter(|c| c.sup == Some(id))
        })?;
        if !subtypes.is_empty() {
            return Err(QuarryError::TypeInUse {
                label,
                reason: "subtypes",
            });
        }
        if concept.is_type() && self.instance_count(id)? > 0 {
            return Err(QuarryError::TypeInUse {
                label,
                reason: "instances",
            });
        }

        let referencing = self.storage.iterate(&[CONCEPT_PREFIX], |_, value| {
            decode_concept(value).filter(|c| {
                c.plays.contains_key(&id) || c.relates.contains(&id) || c.owns.contains_key(&id)
            })
        })?;
        for mut other in referencing {
            other.plays.remove(&id);
            other.relates.remove(&id);
            other.owns.remove(&id);
            self.write(&other)?;
        }

        self.storage.delete(&concept_key(id))?;
        self.storage.delete(&label_key(&label))?;
        tracing::debug!(%label, %id, "deleted schema concept");
        Ok(())
    }

    fn delete_thing(&mut self, concept: Concept) -> Result<(), QuarryError> {
        let id = concept.id;
        for relation_id in &concept.playing {
            let Some(mut relation) = self.concept(*relation_id)? else {
                continue;
            };
            if self.is_implicit_relation(&relation)? {
                self.delete_ownership(&relation)?;
            } else {
                relation.role_players.retain(|(_, player)| *player != id);
                self.write(&relation)?;
            }
        }

        if concept.kind == ConceptKind::Relation {
            for (_, player) in &concept.role_players {
                if *player == id {
                    continue;
                }
                if let Some(mut other) = self.concept(*player)? {
                    other.playing.remove(&id);
                    self.write(&other)?;
                }
            }
        }

        let ty = Self::type_of(&concept)?;
        if let Some(value) = &concept.value {
            self.storage.delete(&attribute_index_key(ty, value)?)?;
        }
        self.bump_count(ty, -1)?;
        self.storage.delete(&concept_key(id))?;
        tracing::debug!(%id, kind = %concept.kind, "deleted thing");
        Ok(())
    }

    fn require_kind(
        &self,
        id: ConceptId,
        operation: &'static str,
        expected: &str,
        accept: impl Fn(&Concept) -> bool,
    ) -> Result<Concept, QuarryError> {
        let concept = self.require(id)?;
        if accept(&concept) {
            Ok(concept)
        } else {
            Err(QuarryError::invalid_target(operation, &concept, expected))
        }
    }
}

// =============================================================================
// STORE CONTRACT
// =============================================================================

impl<S: Storage> ConceptStore for ConceptGraph<S> {
    fn concept(&self, id: ConceptId) -> Result<Option<Concept>, QuarryError> {
        match self.storage.get(&concept_key(id))? {
            Some(bytes) => postcard::from_bytes(&bytes)
                .map(Some)
                .map_err(|e| QuarryError::DeserializationError(e.to_string())),
            None => Ok(None),
        }
    }

    fn lookup_label(&self, label: &Label) -> Result<Option<ConceptId>, QuarryError> {
        self.storage
            .get(&label_key(label))?
            .map(|raw| decode_id(&raw))
            .transpose()
    }

    fn instance_count(&self, ty: ConceptId) -> Result<i64, QuarryError> {
        Ok(self
            .storage
            .get(&counter_key(ty))?
            .map(|raw| decode_counter(&raw))
            .unwrap_or(0))
    }

    fn define_type(&mut self, definition: TypeDefinition) -> Result<ConceptId, QuarryError> {
        let TypeDefinition {
            label,
            sup,
            data_type,
            when,
            then,
        } = definition;

        let sup = self.require_kind(sup, "sub", "a schema concept", |c| c.kind.is_schema())?;
        if self.lookup_label(&label)?.is_some() {
            return Err(QuarryError::invalid_target("define", &label, "a new label"));
        }

        let mut concept = Concept::schema(self.next_id(), sup.kind, label.clone(), Some(sup.id));
        match sup.kind {
            ConceptKind::AttributeType => {
                concept.data_type = Some(data_type.or(sup.data_type).ok_or_else(|| {
                    QuarryError::incomplete(&label, "an attribute type needs a datatype")
                })?);
            }
            ConceptKind::Rule => {
                let malformed = |reason: &str| QuarryError::MalformedRule {
                    label: label.to_string(),
                    reason: reason.to_string(),
                };
                concept.when = Some(when.ok_or_else(|| malformed("missing `when`"))?);
                concept.then = Some(then.ok_or_else(|| malformed("missing `then`"))?);
            }
            _ if data_type.is_some() => {
                return Err(QuarryError::invalid_target(
                    "define datatype",
                    &label,
                    "an attribute type",
                ));
            }
            _ => {}
        }

        self.write(&concept)?;
        self.storage.put(&label_key(&label), &concept.id.to_key())?;
        tracing::debug!(%label, kind = %concept.kind, id = %concept.id, "defined schema concept");
        Ok(concept.id)
    }

    fn set_sup(&mut self, ty: ConceptId, sup: ConceptId) -> Result<(), QuarryError> {
        let mut concept =
            self.require_kind(ty, "sub", "a user-defined type", |c| c.kind.is_schema() && !c.is_meta())?;
        if concept.sup == Some(sup) {
            return Ok(());
        }
        let kind = concept.kind;
        let expected = format!("a {kind}");
        let sup_concept = self.require_kind(sup, "sub", &expected, |c| c.kind == kind)?;
        if self.type_chain_ids(sup)?.contains(&ty) {
            return Err(QuarryError::invalid_target(
                "sub",
                &sup_concept,
                "outside the type's own hierarchy",
            ));
        }
        concept.sup = Some(sup);
        self.write(&concept)
    }

    fn set_abstract(&mut self, ty: ConceptId, is_abstract: bool) -> Result<(), QuarryError> {
        let mut concept = self.require(ty)?;
        if !concept.is_type() {
            return Err(if is_abstract {
                QuarryError::define_abstract_on_non_type(&concept)
            } else {
                QuarryError::invalid_target("undefine is-abstract", &concept, "a type")
            });
        }
        if is_abstract && self.instance_count(ty)? > 0 {
            return Err(QuarryError::TypeInUse {
                label: concept.label.clone().unwrap_or_else(|| Label::new(ty.to_string())),
                reason: "instances",
            });
        }
        concept.is_abstract = is_abstract;
        self.write(&concept)
    }

    fn set_regex(&mut self, ty: ConceptId, regex: Option<String>) -> Result<(), QuarryError> {
        let mut concept = self.require_kind(ty, "regex", "a string attribute type", |c| {
            c.kind == ConceptKind::AttributeType
                && c.data_type == Some(crate::types::DataType::String)
        })?;
        if let Some(regex) = &regex {
            regex_lite::Regex::new(regex).map_err(|e| QuarryError::InvalidRegex {
                regex: regex.clone(),
                reason: e.to_string(),
            })?;
        }
        concept.regex = regex;
        self.write(&concept)
    }

    fn add_plays(
        &mut self,
        ty: ConceptId,
        role: ConceptId,
        required: bool,
    ) -> Result<(), QuarryError> {
        self.require_kind(role, "plays", "a role", Concept::is_role)?;
        let mut concept = self.require_kind(ty, "plays", "a type", Concept::is_type)?;
        concept.plays.insert(role, required);
        self.write(&concept)
    }

    fn remove_plays(&mut self, ty: ConceptId, role: ConceptId) -> Result<(), QuarryError> {
        let mut concept = self.require(ty)?;
        if concept.plays.remove(&role).is_some() {
            self.write(&concept)?;
        }
        Ok(())
    }

    fn add_relates(&mut self, ty: ConceptId, role: ConceptId) -> Result<(), QuarryError> {
        self.require_kind(role, "relates", "a role", Concept::is_role)?;
        let mut concept = self.require_kind(ty, "relates", "a relation type", |c| {
            c.kind == ConceptKind::RelationType
        })?;
        if concept.relates.insert(role) {
            self.write(&concept)?;
        }
        Ok(())
    }

    fn remove_relates(&mut self, ty: ConceptId, role: ConceptId) -> Result<(), QuarryError> {
        let mut concept = self.require(ty)?;
        if concept.relates.remove(&role) {
            self.write(&concept)?;
        }
        Ok(())
    }

    fn add_owns(
        &mut self,
        ty: ConceptId,
        attribute_type: ConceptId,
        key: bool,
    ) -> Result<(), QuarryError> {
        self.require_kind(ty, "has", "a type", Concept::is_type)?;
        let attribute = self.require_kind(attribute_type, "has", "an attribute type", |c| {
            c.kind == ConceptKind::AttributeType
        })?;
        let (_, owner, value) = self.implicit_relation(&attribute, key)?;

        let mut concept = self.require(ty)?;
        concept.owns.insert(attribute_type, key);
        concept.plays.insert(owner, key);
        self.write(&concept)?;

        let mut attribute = self.require(attribute_type)?;
        attribute.plays.entry(value).or_insert(false);
        self.write(&attribute)
    }

    fn remove_owns(&mut self, ty: ConceptId, attribute_type: ConceptId) -> Result<(), QuarryError> {
        let mut concept = self.require(ty)?;
        if concept.owns.remove(&attribute_type).is_some() {
            self.write(&concept)?;
        }
        Ok(())
    }

    fn delete(&mut self, id: ConceptId) -> Result<(), QuarryError> {
        let concept = self.require(id)?;
        if concept.kind.is_schema() {
            self.delete_schema(concept)
        } else {
            self.delete_thing(concept)
        }
    }

    fn insert_instance(
        &mut self,
        ty: ConceptId,
        value: Option<Value>,
    ) -> Result<ConceptId, QuarryError> {
        let ty_concept = self.require(ty)?;
        let Some(kind) = ty_concept.kind.instance_kind() else {
            return Err(QuarryError::invalid_target(
                "insert",
                &ty_concept,
                "a thing type",
            ));
        };
        if ty_concept.is_abstract {
            return Err(QuarryError::invalid_target(
                "insert",
                &ty_concept,
                "a concrete type",
            ));
        }

        let id = if kind == ConceptKind::Attribute {
            let value = value
                .ok_or_else(|| QuarryError::incomplete(&ty_concept, "an attribute needs a value"))?;
            let data_type = ty_concept
                .data_type
                .ok_or_else(|| QuarryError::incomplete(&ty_concept, "no datatype"))?;
            if !data_type.accepts(&value) {
                return Err(QuarryError::ValueTypeMismatch {
                    value: value.to_string(),
                    data_type,
                });
            }
            self.check_regex(ty, &value)?;

            let index = attribute_index_key(ty, &value)?;
            if let Some(raw) = self.storage.get(&index)? {
                return decode_id(&raw);
            }
            let mut concept = Concept::thing(self.next_id(), kind, ty);
            concept.value = Some(value);
            self.write(&concept)?;
            self.storage.put(&index, &concept.id.to_key())?;
            concept.id
        } else {
            if value.is_some() {
                return Err(QuarryError::invalid_target(
                    "insert a value",
                    &ty_concept,
                    "an attribute type",
                ));
            }
            let concept = Concept::thing(self.next_id(), kind, ty);
            self.write(&concept)?;
            concept.id
        };

        self.bump_count(ty, 1)?;
        Ok(id)
    }

    fn attach_attribute(
        &mut self,
        owner: ConceptId,
        attribute: ConceptId,
    ) -> Result<ConceptId, QuarryError> {
        let owner_concept = self.require_kind(owner, "has", "a thing", Concept::is_thing)?;
        let attribute_concept =
            self.require_kind(attribute, "has", "an attribute", Concept::is_attribute)?;
        if let Some(relation) = owner_concept.attributes.get(&attribute) {
            return Ok(*relation);
        }

        let attribute_type = Self::type_of(&attribute_concept)?;
        let Some((owned, key)) = self.ownership(Self::type_of(&owner_concept)?, attribute_type)?
        else {
            let attribute_label = self
                .require(attribute_type)?
                .label
                .unwrap_or_else(|| Label::new(attribute_type.to_string()));
            return Err(QuarryError::invalid_target(
                "has",
                &owner_concept,
                format!("an owner of `{attribute_label}`"),
            ));
        };
        let owned_label = self
            .require(owned)?
            .label
            .ok_or_else(|| QuarryError::incomplete(owned, "an unlabelled attribute type"))?;
        let relation_label = if key {
            key_relation(&owned_label)
        } else {
            has_relation(&owned_label)
        };
        let relation_type = self.require_label(&relation_label)?;
        let owner_role = self.require_label(&owner_role(&relation_label))?;
        let value_role = self.require_label(&value_role(&relation_label))?;

        let mut relation = Concept::thing(self.next_id(), ConceptKind::Relation, relation_type);
        relation.role_players = vec![(owner_role, owner), (value_role, attribute)];
        self.write(&relation)?;
        self.bump_count(relation_type, 1)?;

        let mut owner_concept = self.require(owner)?;
        owner_concept.attributes.insert(attribute, relation.id);
        owner_concept.playing.insert(relation.id);
        self.write(&owner_concept)?;

        let mut attribute_concept = self.require(attribute)?;
        attribute_concept.playing.insert(relation.id);
        self.write(&attribute_concept)?;

        Ok(relation.id)
    }

    fn detach_attribute(
        &mut self,
        owner: ConceptId,
        attribute: ConceptId,
    ) -> Result<(), QuarryError> {
        let Some(owner_concept) = self.concept(owner)? else {
            return Ok(());
        };
        let Some(relation_id) = owner_concept.attributes.get(&attribute) else {
            return Ok(());
        };
        if let Some(relation) = self.concept(*relation_id)? {
            self.delete_ownership(&relation)?;
        }
        Ok(())
    }

    fn add_role_player(
        &mut self,
        relation: ConceptId,
        role: ConceptId,
        player: ConceptId,
    ) -> Result<(), QuarryError> {
        let mut relation_concept = self.require_kind(relation, "add role player", "a relation", |c| {
            c.kind == ConceptKind::Relation
        })?;
        let role_concept = self.require_kind(role, "add role player", "a role", Concept::is_role)?;
        let role_label = role_concept
            .label
            .clone()
            .unwrap_or_else(|| Label::new(role.to_string()));
        let role_chain = self.type_chain_ids(role)?;

        let relates = self
            .type_chain(Self::type_of(&relation_concept)?)?
            .iter()
            .any(|t| t.relates.iter().any(|r| role_chain.contains(r)));
        if !relates {
            return Err(QuarryError::invalid_target(
                "add role player",
                &relation_concept,
                format!("a relation relating `{role_label}`"),
            ));
        }

        let player_concept =
            self.require_kind(player, "add role player", "a thing", Concept::is_thing)?;
        let plays = self
            .type_chain(Self::type_of(&player_concept)?)?
            .iter()
            .any(|t| t.plays.keys().any(|r| role_chain.contains(r)));
        if !plays {
            return Err(QuarryError::invalid_target(
                "add role player",
                &player_concept,
                format!("a player of `{role_label}`"),
            ));
        }

        if !relation_concept.role_players.contains(&(role, player)) {
            relation_concept.role_players.push((role, player));
            self.write(&relation_concept)?;
        }
        let mut player_concept = self.require(player)?;
        if player_concept.playing.insert(relation) {
            self.write(&player_concept)?;
        }
        Ok(())
    }

    fn remove_role_player(
        &mut self,
        relation: ConceptId,
        role: Option<ConceptId>,
        player: ConceptId,
    ) -> Result<(), QuarryError> {
        let Some(mut relation_concept) = self.concept(relation)? else {
            return Ok(());
        };
        let before = relation_concept.role_players.len();
        relation_concept
            .role_players
            .retain(|(r, p)| !(*p == player && role.is_none_or(|role| role == *r)));
        if relation_concept.role_players.len() == before {
            return Ok(());
        }
        let still_playing = relation_concept
            .role_players
            .iter()
            .any(|(_, p)| *p == player);
        self.write(&relation_concept)?;

        if !still_playing && let Some(mut player_concept) = self.concept(player)? {
            player_concept.playing.remove(&relation);
            self.write(&player_concept)?;
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, RedbStorage, TransactionOptions};
    use crate::types::DataType;

    fn graph() -> ConceptGraph<MemoryStorage> {
        ConceptGraph::open(MemoryStorage::default()).expect("open")
    }

    fn meta(graph: &ConceptGraph<MemoryStorage>, label: &str) -> ConceptId {
        graph.require_label(&Label::new(label)).expect("meta")
    }

    fn define(graph: &mut ConceptGraph<MemoryStorage>, label: &str, sup: &str) -> ConceptId {
        let sup = meta(graph, sup);
        graph
            .define_type(TypeDefinition::new(Label::new(label), sup))
            .expect("define")
    }

    fn define_attribute(
        graph: &mut ConceptGraph<MemoryStorage>,
        label: &str,
        data_type: DataType,
    ) -> ConceptId {
        let mut definition = TypeDefinition::new(Label::new(label), meta(graph, ATTRIBUTE));
        definition.data_type = Some(data_type);
        graph.define_type(definition).expect("define attribute")
    }

    #[test]
    fn meta_types_are_seeded_once() {
        let graph = graph();
        for label in META_LABELS {
            assert!(graph.lookup_label(&Label::new(label)).expect("lookup").is_some());
        }
        let storage = graph.storage;
        let reopened = ConceptGraph::open(storage).expect("reopen");
        assert_eq!(
            reopened.stats().expect("stats").schema_concepts,
            META_LABELS.len()
        );
    }

    #[test]
    fn subtypes_inherit_kind() {
        let mut graph = graph();
        let person = define(&mut graph, "person", ENTITY);
        assert_eq!(
            graph.require(person).expect("person").kind,
            ConceptKind::EntityType
        );
        let role = define(&mut graph, "spouse", ROLE);
        assert!(graph.require(role).expect("role").is_role());
    }

    #[test]
    fn attribute_types_need_a_datatype() {
        let mut graph = graph();
        let attribute = meta(&graph, ATTRIBUTE);
        let err = graph
            .define_type(TypeDefinition::new(Label::new("name"), attribute))
            .expect_err("no datatype");
        assert!(matches!(err, QuarryError::IncompleteConcept { .. }));
    }

    #[test]
    fn abstract_types_cannot_be_instantiated() {
        let mut graph = graph();
        let person = define(&mut graph, "person", ENTITY);
        graph.set_abstract(person, true).expect("abstract");
        assert!(matches!(
            graph.insert_instance(person, None),
            Err(QuarryError::InvalidTargetKind { .. })
        ));
        assert!(matches!(
            graph.insert_instance(meta(&graph, ENTITY), None),
            Err(QuarryError::InvalidTargetKind { .. })
        ));
    }

    #[test]
    fn abstract_on_a_thing_is_rejected() {
        let mut graph = graph();
        let person = define(&mut graph, "person", ENTITY);
        let alice = graph.insert_instance(person, None).expect("insert");
        assert!(matches!(
            graph.set_abstract(alice, true),
            Err(QuarryError::InvalidTargetKind { .. })
        ));
    }

    #[test]
    fn attributes_are_deduplicated_and_checked() {
        let mut graph = graph();
        let name = define_attribute(&mut graph, "name", DataType::String);
        let a = graph
            .insert_instance(name, Some(Value::from("Alice")))
            .expect("insert");
        let b = graph
            .insert_instance(name, Some(Value::from("Alice")))
            .expect("insert");
        assert_eq!(a, b);
        assert_eq!(graph.instance_count(name).expect("count"), 1);

        assert!(matches!(
            graph.insert_instance(name, Some(Value::Long(3))),
            Err(QuarryError::ValueTypeMismatch { .. })
        ));
    }

    #[test]
    fn regex_is_enforced_on_insert() {
        let mut graph = graph();
        let email = define_attribute(&mut graph, "email", DataType::String);
        graph
            .set_regex(email, Some(".+@.+".to_string()))
            .expect("regex");
        assert!(
            graph
                .insert_instance(email, Some(Value::from("a@b")))
                .is_ok()
        );
        assert!(matches!(
            graph.insert_instance(email, Some(Value::from("nope"))),
            Err(QuarryError::RegexViolation { .. })
        ));
    }

    #[test]
    fn regex_needs_a_string_attribute() {
        let mut graph = graph();
        let age = define_attribute(&mut graph, "age", DataType::Long);
        assert!(matches!(
            graph.set_regex(age, Some("[0-9]+".to_string())),
            Err(QuarryError::InvalidTargetKind { .. })
        ));
    }

    #[test]
    fn ownership_is_required_and_cascades() {
        let mut graph = graph();
        let person = define(&mut graph, "person", ENTITY);
        let name = define_attribute(&mut graph, "name", DataType::String);
        let alice = graph.insert_instance(person, None).expect("alice");
        let value = graph
            .insert_instance(name, Some(Value::from("Alice")))
            .expect("name");

        assert!(matches!(
            graph.attach_attribute(alice, value),
            Err(QuarryError::InvalidTargetKind { .. })
        ));

        graph.add_owns(person, name, false).expect("owns");
        let relation = graph.attach_attribute(alice, value).expect("attach");
        assert_eq!(
            graph.attach_attribute(alice, value).expect("idempotent"),
            relation
        );
        assert!(graph.require(alice).expect("alice").attributes.contains_key(&value));

        graph.delete(value).expect("delete attribute");
        assert!(graph.is_deleted(relation).expect("deleted"));
        assert!(graph.require(alice).expect("alice").attributes.is_empty());
    }

    #[test]
    fn role_players_are_validated() {
        let mut graph = graph();
        let person = define(&mut graph, "person", ENTITY);
        let marriage = define(&mut graph, "marriage", RELATION);
        let spouse = define(&mut graph, "spouse", ROLE);
        graph.add_relates(marriage, spouse).expect("relates");

        let alice = graph.insert_instance(person, None).expect("alice");
        let wedding = graph.insert_instance(marriage, None).expect("marriage");
        assert!(matches!(
            graph.add_role_player(wedding, spouse, alice),
            Err(QuarryError::InvalidTargetKind { .. })
        ));

        graph.add_plays(person, spouse, false).expect("plays");
        graph
            .add_role_player(wedding, spouse, alice)
            .expect("role player");
        assert!(graph.require(alice).expect("alice").playing.contains(&wedding));

        graph.delete(alice).expect("delete alice");
        assert!(graph.require(wedding).expect("wedding").role_players.is_empty());
    }

    #[test]
    fn removing_role_players_is_idempotent() {
        let mut graph = graph();
        let person = define(&mut graph, "person", ENTITY);
        let marriage = define(&mut graph, "marriage", RELATION);
        let spouse = define(&mut graph, "spouse", ROLE);
        graph.add_relates(marriage, spouse).expect("relates");
        graph.add_plays(person, spouse, false).expect("plays");
        let alice = graph.insert_instance(person, None).expect("alice");
        let wedding = graph.insert_instance(marriage, None).expect("marriage");
        graph.add_role_player(wedding, spouse, alice).expect("add");

        graph.remove_role_player(wedding, None, alice).expect("remove");
        graph.remove_role_player(wedding, None, alice).expect("again");
        assert!(graph.require(alice).expect("alice").playing.is_empty());
    }

    #[test]
    fn types_in_use_cannot_be_deleted() {
        let mut graph = graph();
        let person = define(&mut graph, "person", ENTITY);
        let woman = define(&mut graph, "woman", ENTITY);
        graph.set_sup(woman, person).expect("sub");

        assert!(matches!(
            graph.delete(person),
            Err(QuarryError::TypeInUse {
                reason: "subtypes",
                ..
            })
        ));

        let alice = graph.insert_instance(woman, None).expect("alice");
        assert!(matches!(
            graph.delete(woman),
            Err(QuarryError::TypeInUse {
                reason: "instances",
                ..
            })
        ));

        graph.delete(alice).expect("delete thing");
        graph.delete(woman).expect("delete type");
        assert!(
            graph
                .lookup_label(&Label::new("woman"))
                .expect("lookup")
                .is_none()
        );
    }

    #[test]
    fn sub_cycles_are_rejected() {
        let mut graph = graph();
        let a = define(&mut graph, "a", ENTITY);
        let b = define(&mut graph, "b", ENTITY);
        graph.set_sup(b, a).expect("b sub a");
        assert!(graph.set_sup(a, b).is_err());
    }

    #[test]
    fn meta_types_cannot_be_deleted() {
        let mut graph = graph();
        let entity = meta(&graph, ENTITY);
        assert!(matches!(
            graph.delete(entity),
            Err(QuarryError::InvalidTargetKind { .. })
        ));
    }

    #[test]
    fn rules_need_body_and_head() {
        let mut graph = graph();
        let rule = meta(&graph, RULE);
        let mut definition = TypeDefinition::new(Label::new("r"), rule);
        definition.when = Some("{ $x isa person; }".to_string());
        assert!(matches!(
            graph.define_type(definition.clone()),
            Err(QuarryError::MalformedRule { .. })
        ));
        definition.then = Some("{ $x isa adult; }".to_string());
        assert!(graph.define_type(definition).is_ok());
    }

    #[test]
    fn persistent_graph_survives_reopen() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("graph.redb");

        let person = {
            let storage = RedbStorage::open(&path, TransactionOptions::schema()).expect("open");
            let mut graph = ConceptGraph::open(storage).expect("graph");
            let entity = graph.require_label(&Label::new(ENTITY)).expect("entity");
            let person = graph
                .define_type(TypeDefinition::new(Label::new("person"), entity))
                .expect("define");
            graph.commit().expect("commit");
            person
        };

        let storage = RedbStorage::open(&path, TransactionOptions::data()).expect("reopen");
        let mut graph = ConceptGraph::open(storage).expect("graph");
        assert_eq!(
            graph.lookup_label(&Label::new("person")).expect("lookup"),
            Some(person)
        );
        let alice = graph.insert_instance(person, None).expect("insert");
        assert!(alice > person);
    }
}
