//! # Write Planning and Execution
//!
//! A [`WritePlan`] is the dependency-ordered list of mutation steps for one
//! conjunct. Compilation is all-or-nothing: an unresolvable variable or a
//! requirement cycle fails before anything touches the concept model.
//!
//! Execution runs the steps in order against a [`ConceptStore`]. Describe
//! steps only record facts about a variable's concept; the concept is built
//! the first time a later step needs it, and any concept still unbuilt after
//! the last step is built then. A failing step stops execution; earlier
//! steps are not undone.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::concept::{Concept, ConceptStore, TypeDefinition};
use crate::pattern::{self, Conjunction, Pattern, Statement, Variable};
use crate::primitives::ROLE;
use crate::property::Constraint;
use crate::property::executors::{ConceptParam, Step, StepAction, WriteMode};
use crate::types::{ConceptId, DataType, Label, QuarryError, Value};

// =============================================================================
// ANSWER
// =============================================================================

/// Variable bindings going into and coming out of a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Answer(BTreeMap<Variable, ConceptId>);

impl Answer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, var: &Variable) -> Option<ConceptId> {
        self.0.get(var).copied()
    }

    #[must_use]
    pub fn contains(&self, var: &Variable) -> bool {
        self.0.contains_key(var)
    }

    pub fn insert(&mut self, var: Variable, id: ConceptId) -> Option<ConceptId> {
        self.0.insert(var, id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Variable, ConceptId)> {
        self.0.iter().map(|(var, id)| (var, *id))
    }

    /// Bindings of user-named variables only.
    pub fn named(&self) -> impl Iterator<Item = (&Variable, ConceptId)> {
        self.iter().filter(|(var, _)| var.is_named())
    }
}

impl FromIterator<(Variable, ConceptId)> for Answer {
    fn from_iter<I: IntoIterator<Item = (Variable, ConceptId)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bindings: Vec<String> = self
            .named()
            .map(|(var, id)| format!("{var}={id}"))
            .collect();
        write!(f, "{{{}}}", bindings.join(", "))
    }
}

// =============================================================================
// PLAN
// =============================================================================

/// Ordered mutation steps for one conjunct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePlan {
    mode: WriteMode,
    steps: Vec<Step>,
}

impl WritePlan {
    /// Compile `conjunction` for `mode`. Variables in `bound` count as
    /// already resolved.
    pub fn compile(
        conjunction: &Conjunction<Statement>,
        mode: WriteMode,
        bound: &Answer,
    ) -> Result<Self, QuarryError> {
        let steps = collect_steps(conjunction, mode)?;

        let mut producers: BTreeMap<&Variable, Vec<usize>> = BTreeMap::new();
        for (i, step) in steps.iter().enumerate() {
            for var in &step.produces {
                producers.entry(var).or_default().push(i);
            }
        }

        for step in &steps {
            for var in &step.requires {
                if !producers.contains_key(var) && !bound.contains(var) {
                    return Err(QuarryError::malformed_reference(var));
                }
            }
        }

        // Producer → requirer edges, deduplicated.
        let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); steps.len()];
        let mut in_degree = vec![0_usize; steps.len()];
        for (i, step) in steps.iter().enumerate() {
            let mut waits_on = BTreeSet::new();
            for var in &step.requires {
                if let Some(sources) = producers.get(var) {
                    waits_on.extend(sources.iter().copied().filter(|j| *j != i));
                }
            }
            for j in waits_on {
                if dependents[j].insert(i) {
                    in_degree[i] = in_degree[i].saturating_add(1);
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..steps.len()).filter(|i| in_degree[*i] == 0).collect();
        let mut order = Vec::with_capacity(steps.len());
        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &next in &dependents[i] {
                in_degree[next] = in_degree[next].saturating_sub(1);
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() < steps.len() {
            let scheduled: BTreeSet<usize> = order.into_iter().collect();
            let variables: BTreeSet<String> = steps
                .iter()
                .enumerate()
                .filter(|(i, _)| !scheduled.contains(i))
                .flat_map(|(_, step)| step.produces.iter().chain(&step.requires))
                .map(ToString::to_string)
                .collect();
            return Err(QuarryError::CyclicDependency {
                variables: variables.into_iter().collect(),
            });
        }

        let mut slots: Vec<Option<Step>> = steps.into_iter().map(Some).collect();
        let steps = order
            .into_iter()
            .filter_map(|i| slots.get_mut(i).and_then(Option::take))
            .collect();
        Ok(Self { mode, steps })
    }

    #[must_use]
    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run the plan, extending `answer` with every variable it resolves.
    pub fn execute<C: ConceptStore>(
        &self,
        store: &mut C,
        answer: Answer,
    ) -> Result<Answer, QuarryError> {
        let mut context = WriteContext {
            store,
            mode: self.mode,
            answer,
            builders: BTreeMap::new(),
        };
        for step in &self.steps {
            tracing::debug!(mode = %self.mode, %step, "executing write step");
            context.run(&step.action)?;
        }
        context.build_remaining()?;
        Ok(context.answer)
    }
}

impl fmt::Display for WritePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            writeln!(f, "{i:>3}  {step}")?;
        }
        Ok(())
    }
}

/// One plan per conjunct of `pattern`'s normal form. Fails if any conjunct
/// fails to compile.
pub fn compile_write(
    pattern: &Pattern,
    mode: WriteMode,
    bound: &Answer,
) -> Result<Vec<WritePlan>, QuarryError> {
    pattern
        .normal_form()
        .iter()
        .map(|conjunction| WritePlan::compile(conjunction, mode, bound))
        .collect()
}

/// Steps of every implicit inner statement, one set per (variable, constraint).
///
/// On delete, the `isa` an ownership puts on its attribute statement is
/// skipped: detaching an attribute leaves the attribute itself alone.
fn collect_steps(
    conjunction: &Conjunction<Statement>,
    mode: WriteMode,
) -> Result<Vec<Step>, QuarryError> {
    let mut seen: BTreeSet<(Variable, Constraint)> = BTreeSet::new();
    if mode == WriteMode::Delete {
        for statement in conjunction {
            for inner in statement.implicit_inner_statements() {
                for constraint in inner.constraints() {
                    if let Constraint::HasAttribute {
                        label, attribute, ..
                    } = constraint
                    {
                        seen.insert((
                            attribute.var().clone(),
                            Constraint::Isa {
                                ty: pattern::label(label.clone()),
                                explicit: false,
                            },
                        ));
                    }
                }
            }
        }
    }

    let mut steps = Vec::new();
    for statement in conjunction {
        for inner in statement.implicit_inner_statements() {
            for constraint in inner.constraints() {
                if seen.insert((inner.var().clone(), constraint.clone())) {
                    steps.extend(constraint.steps(inner.var(), mode)?);
                }
            }
        }
    }
    Ok(steps)
}

// =============================================================================
// EXECUTION
// =============================================================================

/// Facts gathered about a concept before it is built.
#[derive(Debug, Default)]
struct ConceptBuilder {
    id: Option<ConceptId>,
    label: Option<Label>,
    sup: Option<ConceptId>,
    isa: Option<ConceptId>,
    value: Option<Value>,
    data_type: Option<DataType>,
    when: Option<Pattern>,
    then: Option<Pattern>,
    role: bool,
}

/// Record `value` in `slot`, refusing a different value already there.
fn assign<T: PartialEq + fmt::Display>(
    slot: &mut Option<T>,
    value: T,
    var: &Variable,
    what: &str,
) -> Result<(), QuarryError> {
    match slot {
        Some(existing) if *existing != value => Err(QuarryError::conflicting(
            var,
            format!("{what} {value}"),
            format!("{what} {existing}"),
        )),
        Some(_) => Ok(()),
        None => {
            *slot = Some(value);
            Ok(())
        }
    }
}

struct WriteContext<'a, C: ConceptStore> {
    store: &'a mut C,
    mode: WriteMode,
    answer: Answer,
    builders: BTreeMap<Variable, ConceptBuilder>,
}

impl<C: ConceptStore> WriteContext<'_, C> {
    fn run(&mut self, action: &StepAction) -> Result<(), QuarryError> {
        match action {
            StepAction::Describe { var, param } => self.describe(var, param),
            StepAction::SetAbstract { var, value } => {
                let id = self.get(var)?;
                if !value && self.store.is_deleted(id)? {
                    return Ok(());
                }
                self.store.set_abstract(id, *value)
            }
            StepAction::SetRegex { var, regex } => {
                let id = self.get(var)?;
                self.store.set_regex(id, Some(regex.clone()))
            }
            StepAction::UnsetRegex { var, regex } => {
                let id = self.get(var)?;
                match self.store.concept(id)? {
                    Some(concept) if concept.regex.as_ref() == Some(regex) => {
                        self.store.set_regex(id, None)
                    }
                    _ => Ok(()),
                }
            }
            StepAction::DeleteType { var, sup } => {
                let id = self.get(var)?;
                let Some(concept) = self.store.concept(id)? else {
                    return Ok(());
                };
                let sup = self.get(sup)?;
                if concept.sup == Some(sup) {
                    self.store.delete(id)
                } else {
                    tracing::debug!(%concept, "type no longer has the undefined super type");
                    Ok(())
                }
            }
            StepAction::Plays {
                var,
                role,
                required,
            } => {
                let (id, role) = (self.get(var)?, self.get(role)?);
                self.store.add_plays(id, role, *required)
            }
            StepAction::Relates { var, role } => {
                let (id, role) = (self.get(var)?, self.get(role)?);
                self.store.add_relates(id, role)
            }
            StepAction::Owns {
                var,
                attribute_type,
                key,
            } => {
                let (id, attribute_type) = (self.get(var)?, self.get(attribute_type)?);
                self.store.add_owns(id, attribute_type, *key)
            }
            StepAction::Unplay { var, role } => {
                if let Some((id, role)) = self.live_pair(var, role)? {
                    self.store.remove_plays(id, role)?;
                }
                Ok(())
            }
            StepAction::Unrelate { var, role } => {
                if let Some((id, role)) = self.live_pair(var, role)? {
                    self.store.remove_relates(id, role)?;
                }
                Ok(())
            }
            StepAction::Disown {
                var,
                attribute_type,
            } => {
                if let Some((id, attribute_type)) = self.live_pair(var, attribute_type)? {
                    self.store.remove_owns(id, attribute_type)?;
                }
                Ok(())
            }
            StepAction::AttachAttribute {
                owner,
                attribute,
                relation,
            } => {
                let (owner, attribute) = (self.get(owner)?, self.get(attribute)?);
                let edge = self.store.attach_attribute(owner, attribute)?;
                if !self.answer.contains(relation) {
                    self.answer.insert(relation.clone(), edge);
                }
                Ok(())
            }
            StepAction::DetachAttribute { owner, attribute } => {
                let (owner, attribute) = (self.get(owner)?, self.get(attribute)?);
                self.store.detach_attribute(owner, attribute)
            }
            StepAction::AddRolePlayers { relation, players } => {
                let relation = self.get(relation)?;
                for (role, player) in players {
                    let (role, player) = (self.get(role)?, self.get(player)?);
                    self.store.add_role_player(relation, role, player)?;
                }
                Ok(())
            }
            StepAction::RemoveRolePlayers { relation, players } => {
                let relation = self.get(relation)?;
                if self.store.is_deleted(relation)? {
                    return Ok(());
                }
                for (role, player) in players {
                    let role = role.as_ref().map(|r| self.get(r)).transpose()?;
                    let player = self.get(player)?;
                    self.store.remove_role_player(relation, role, player)?;
                }
                Ok(())
            }
            StepAction::DeleteThing { var, ty } => {
                let id = self.get(var)?;
                let Some(concept) = self.store.concept(id)? else {
                    return Ok(());
                };
                let ty = self.get(ty)?;
                if !concept.is_thing() {
                    return Err(QuarryError::invalid_target("delete", &concept, "a thing"));
                }
                if !self.is_instance_of(&concept, ty)? {
                    let ty = self.store.require(ty)?;
                    return Err(QuarryError::invalid_target(
                        "delete",
                        &concept,
                        format!("an instance of {ty}"),
                    ));
                }
                self.store.delete(id)
            }
        }
    }

    fn describe(&mut self, var: &Variable, param: &ConceptParam) -> Result<(), QuarryError> {
        if self.answer.contains(var) {
            return Ok(());
        }
        // Referenced types resolve now, while their describers are complete.
        let resolved = match param {
            ConceptParam::Sub(sup) => Some(self.get(sup)?),
            ConceptParam::Isa(ty) => Some(self.get(ty)?),
            _ => None,
        };
        let builder = self.builders.entry(var.clone()).or_default();
        match (param, resolved) {
            (ConceptParam::Id(id), _) => assign(&mut builder.id, *id, var, "id"),
            (ConceptParam::Label(label), _) => {
                assign(&mut builder.label, label.clone(), var, "label")
            }
            (ConceptParam::Sub(_), Some(sup)) => assign(&mut builder.sup, sup, var, "sub"),
            (ConceptParam::Isa(_), Some(ty)) => assign(&mut builder.isa, ty, var, "isa"),
            (ConceptParam::Value(value), _) => {
                assign(&mut builder.value, value.clone(), var, "value")
            }
            (ConceptParam::DataType(data_type), _) => {
                assign(&mut builder.data_type, *data_type, var, "datatype")
            }
            (ConceptParam::When(body), _) => assign(&mut builder.when, body.clone(), var, "when"),
            (ConceptParam::Then(head), _) => assign(&mut builder.then, head.clone(), var, "then"),
            (ConceptParam::Role, _) => {
                builder.role = true;
                Ok(())
            }
            (ConceptParam::Sub(_) | ConceptParam::Isa(_), None) => {
                Err(QuarryError::malformed_reference(var))
            }
        }
    }

    /// The concept bound to `var`, built on first use.
    fn get(&mut self, var: &Variable) -> Result<ConceptId, QuarryError> {
        if let Some(id) = self.answer.get(var) {
            return Ok(id);
        }
        let builder = self
            .builders
            .remove(var)
            .ok_or_else(|| QuarryError::malformed_reference(var))?;
        let id = self.build(var, builder)?;
        self.answer.insert(var.clone(), id);
        Ok(id)
    }

    /// Both concepts, unless either is already gone.
    fn live_pair(
        &mut self,
        a: &Variable,
        b: &Variable,
    ) -> Result<Option<(ConceptId, ConceptId)>, QuarryError> {
        let (a, b) = (self.get(a)?, self.get(b)?);
        if self.store.is_deleted(a)? || self.store.is_deleted(b)? {
            return Ok(None);
        }
        Ok(Some((a, b)))
    }

    fn build_remaining(&mut self) -> Result<(), QuarryError> {
        while let Some((var, builder)) = self.builders.pop_first() {
            if !self.answer.contains(&var) {
                let id = self.build(&var, builder)?;
                self.answer.insert(var, id);
            }
        }
        Ok(())
    }

    fn build(&mut self, var: &Variable, builder: ConceptBuilder) -> Result<ConceptId, QuarryError> {
        match self.mode {
            WriteMode::Define => self.build_schema(var, builder),
            WriteMode::Insert => self.build_thing(var, builder),
            WriteMode::Undefine | WriteMode::Delete => self.resolve(var, &builder),
        }
    }

    fn resolve(&self, var: &Variable, builder: &ConceptBuilder) -> Result<ConceptId, QuarryError> {
        if let Some(id) = builder.id {
            return Ok(self.store.require(id)?.id);
        }
        if let Some(label) = &builder.label {
            return self.store.require_label(label);
        }
        Err(QuarryError::incomplete(
            var,
            "it is neither bound nor identified by id or label",
        ))
    }

    fn build_schema(
        &mut self,
        var: &Variable,
        builder: ConceptBuilder,
    ) -> Result<ConceptId, QuarryError> {
        if builder.id.is_some() {
            let id = self.resolve(var, &builder)?;
            if let Some(sup) = builder.sup {
                self.store.set_sup(id, sup)?;
            }
            return Ok(id);
        }
        let label = builder
            .label
            .ok_or_else(|| QuarryError::incomplete(var, "a schema concept needs a label"))?;

        if let Some(id) = self.store.lookup_label(&label)? {
            if let Some(sup) = builder.sup {
                self.store.set_sup(id, sup)?;
            }
            return Ok(id);
        }

        let sup = match builder.sup {
            Some(sup) => sup,
            None if builder.role => self.store.require_label(&Label::new(ROLE))?,
            None => {
                return Err(QuarryError::incomplete(
                    var,
                    format!("`{label}` is new and needs a super type"),
                ));
            }
        };
        let mut definition = TypeDefinition::new(label, sup);
        definition.data_type = builder.data_type;
        definition.when = builder.when.map(|body| body.to_string());
        definition.then = builder.then.map(|head| head.to_string());
        self.store.define_type(definition)
    }

    fn build_thing(
        &mut self,
        var: &Variable,
        builder: ConceptBuilder,
    ) -> Result<ConceptId, QuarryError> {
        if builder.id.is_some() || builder.label.is_some() {
            return self.resolve(var, &builder);
        }
        let ty = builder
            .isa
            .ok_or_else(|| QuarryError::incomplete(var, "a new thing needs `isa`"))?;
        self.store.insert_instance(ty, builder.value)
    }

    /// Whether `thing` is a direct or indirect instance of `ty`.
    fn is_instance_of(&self, thing: &Concept, ty: ConceptId) -> Result<bool, QuarryError> {
        let mut seen = BTreeSet::new();
        let mut next = thing.type_id;
        while let Some(id) = next {
            if id == ty {
                return Ok(true);
            }
            if !seen.insert(id) {
                break;
            }
            next = self.store.require(id)?.sup;
        }
        Ok(false)
    }
}

// =============================================================================
// TESTS
// =============================================================================
