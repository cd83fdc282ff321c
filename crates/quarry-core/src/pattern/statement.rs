//! # Statements
//!
//! A statement is a variable plus the set of constraints placed on it. It is
//! an immutable value: every builder call returns a new statement and leaves
//! the receiver untouched.
//!
//! Builder rules:
//! - adding a singular kind that is already present with a different value
//!   fails with `ConflictingConstraints`
//! - adding an equal constraint is a no-op
//! - role players accumulate in one `Relation` aggregate, in insertion order

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::pattern::{Pattern, Variable, label};
use crate::property::{Constraint, RolePlayer};
use crate::types::{ConceptId, DataType, Label, QuarryError, Value, ValuePredicate};

/// A variable together with its constraints.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Statement(Arc<StatementInner>);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct StatementInner {
    var: Variable,
    constraints: BTreeSet<Constraint>,
}

/// Anything that can stand where a statement about a type or role is expected.
///
/// String slices and labels become type-label statements.
pub trait IntoStatement {
    fn into_statement(self) -> Statement;
}

impl IntoStatement for Statement {
    fn into_statement(self) -> Statement {
        self
    }
}

impl IntoStatement for &Statement {
    fn into_statement(self) -> Statement {
        self.clone()
    }
}

impl IntoStatement for &str {
    fn into_statement(self) -> Statement {
        label(self)
    }
}

impl IntoStatement for Label {
    fn into_statement(self) -> Statement {
        label(self)
    }
}

/// The attribute side of `has`: either a literal value or a statement.
pub trait IntoAttribute {
    fn into_attribute(self) -> Statement;
}

impl IntoAttribute for Statement {
    fn into_attribute(self) -> Statement {
        self
    }
}

impl IntoAttribute for Value {
    fn into_attribute(self) -> Statement {
        Statement::from_parts(
            Variable::anonymous(),
            BTreeSet::from([Constraint::Value(ValuePredicate::eq(self))]),
        )
    }
}

impl IntoAttribute for &str {
    fn into_attribute(self) -> Statement {
        Value::from(self).into_attribute()
    }
}

impl IntoAttribute for String {
    fn into_attribute(self) -> Statement {
        Value::from(self).into_attribute()
    }
}

impl IntoAttribute for i64 {
    fn into_attribute(self) -> Statement {
        Value::Long(self).into_attribute()
    }
}

impl IntoAttribute for bool {
    fn into_attribute(self) -> Statement {
        Value::Boolean(self).into_attribute()
    }
}

impl Statement {
    /// A statement with no constraints.
    #[must_use]
    pub fn new(var: Variable) -> Self {
        Self::from_parts(var, BTreeSet::new())
    }

    pub(crate) fn from_parts(var: Variable, constraints: BTreeSet<Constraint>) -> Self {
        Self(Arc::new(StatementInner { var, constraints }))
    }

    #[must_use]
    pub fn var(&self) -> &Variable {
        &self.0.var
    }

    /// Constraints in canonical order.
    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.0.constraints.iter()
    }

    #[must_use]
    pub fn contains(&self, constraint: &Constraint) -> bool {
        self.0.constraints.contains(constraint)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.constraints.is_empty()
    }

    /// The label this statement pins its variable to, if any.
    #[must_use]
    pub fn type_label(&self) -> Option<&Label> {
        self.constraints().find_map(Constraint::label)
    }

    /// The relation aggregate, if this statement has role players.
    #[must_use]
    pub fn role_players(&self) -> Option<&[RolePlayer]> {
        self.constraints().find_map(|c| match c {
            Constraint::Relation(players) => Some(players.as_slice()),
            _ => None,
        })
    }

    // =========================================================================
    // CONSTRAINT SET
    // =========================================================================

    /// Add a constraint, enforcing the singular-kind rule.
    pub fn with(&self, constraint: Constraint) -> Result<Self, QuarryError> {
        if let Constraint::Relation(players) = &constraint {
            return Ok(self.merge_role_players(players));
        }
        if self.contains(&constraint) {
            return Ok(self.clone());
        }
        if constraint.is_singular()
            && let Some(existing) = self.constraints().find(|c| c.same_kind(&constraint))
        {
            return Err(QuarryError::conflicting(self, &constraint, existing));
        }
        let mut constraints = self.0.constraints.clone();
        constraints.insert(constraint);
        Ok(Self::from_parts(self.var().clone(), constraints))
    }

    /// A copy without `constraint`. Removing an absent constraint is a no-op.
    #[must_use]
    pub fn remove(&self, constraint: &Constraint) -> Self {
        if !self.contains(constraint) {
            return self.clone();
        }
        let mut constraints = self.0.constraints.clone();
        constraints.remove(constraint);
        Self::from_parts(self.var().clone(), constraints)
    }

    fn merge_role_players(&self, players: &[RolePlayer]) -> Self {
        let mut constraints = self.0.constraints.clone();
        let mut merged = Vec::new();
        constraints.retain(|c| match c {
            Constraint::Relation(existing) => {
                merged.extend(existing.iter().cloned());
                false
            }
            _ => true,
        });
        merged.extend(players.iter().cloned());
        constraints.insert(Constraint::Relation(merged));
        Self::from_parts(self.var().clone(), constraints)
    }

    // =========================================================================
    // BUILDERS
    // =========================================================================

    pub fn id(&self, id: ConceptId) -> Result<Self, QuarryError> {
        self.with(Constraint::Id(id))
    }

    pub fn label(&self, label: impl Into<Label>) -> Result<Self, QuarryError> {
        self.with(Constraint::Label(label.into()))
    }

    pub fn val(&self, predicate: impl Into<ValuePredicate>) -> Result<Self, QuarryError> {
        self.with(Constraint::Value(predicate.into()))
    }

    pub fn isa(&self, ty: impl IntoStatement) -> Result<Self, QuarryError> {
        self.with(Constraint::Isa {
            ty: ty.into_statement(),
            explicit: false,
        })
    }

    /// `isa!`: direct instances only.
    pub fn isa_explicit(&self, ty: impl IntoStatement) -> Result<Self, QuarryError> {
        self.with(Constraint::Isa {
            ty: ty.into_statement(),
            explicit: true,
        })
    }

    pub fn sub(&self, sup: impl IntoStatement) -> Result<Self, QuarryError> {
        self.with(Constraint::Sub {
            sup: sup.into_statement(),
            explicit: false,
        })
    }

    /// `sub!`: direct subtypes only.
    pub fn sub_explicit(&self, sup: impl IntoStatement) -> Result<Self, QuarryError> {
        self.with(Constraint::Sub {
            sup: sup.into_statement(),
            explicit: true,
        })
    }

    pub fn is_abstract(&self) -> Result<Self, QuarryError> {
        self.with(Constraint::IsAbstract)
    }

    pub fn datatype(&self, data_type: DataType) -> Result<Self, QuarryError> {
        self.with(Constraint::DataType(data_type))
    }

    pub fn regex(&self, regex: impl Into<String>) -> Result<Self, QuarryError> {
        self.with(Constraint::Regex(regex.into()))
    }

    pub fn neq(&self, other: impl IntoStatement) -> Result<Self, QuarryError> {
        self.with(Constraint::Neq(other.into_statement()))
    }

    pub fn plays(&self, role: impl IntoStatement) -> Result<Self, QuarryError> {
        self.with(Constraint::Plays {
            role: role.into_statement(),
            required: false,
        })
    }

    /// `plays` that every instance must fulfil.
    pub fn plays_required(&self, role: impl IntoStatement) -> Result<Self, QuarryError> {
        self.with(Constraint::Plays {
            role: role.into_statement(),
            required: true,
        })
    }

    pub fn relates(&self, role: impl IntoStatement) -> Result<Self, QuarryError> {
        self.with(Constraint::Relates {
            role: role.into_statement(),
            super_role: None,
        })
    }

    /// `relates role as super_role`.
    pub fn relates_as(
        &self,
        role: impl IntoStatement,
        super_role: impl IntoStatement,
    ) -> Result<Self, QuarryError> {
        self.with(Constraint::Relates {
            role: role.into_statement(),
            super_role: Some(super_role.into_statement()),
        })
    }

    pub fn has_type(&self, attribute_type: impl IntoStatement) -> Result<Self, QuarryError> {
        self.with(Constraint::HasAttributeType {
            attribute_type: attribute_type.into_statement(),
            key: false,
        })
    }

    pub fn key(&self, attribute_type: impl IntoStatement) -> Result<Self, QuarryError> {
        self.with(Constraint::HasAttributeType {
            attribute_type: attribute_type.into_statement(),
            key: true,
        })
    }

    /// Ownership of an attribute. The attribute statement gains `isa label`.
    pub fn has(
        &self,
        label: impl Into<Label>,
        attribute: impl IntoAttribute,
    ) -> Result<Self, QuarryError> {
        self.has_via(label, attribute, Statement::new(Variable::anonymous()))
    }

    /// Ownership through an explicitly named relation statement.
    pub fn has_via(
        &self,
        label: impl Into<Label>,
        attribute: impl IntoAttribute,
        relation: Statement,
    ) -> Result<Self, QuarryError> {
        let label = label.into();
        let attribute = attribute.into_attribute().isa(label.clone())?;
        self.with(Constraint::HasAttribute {
            label,
            attribute,
            relation,
        })
    }

    /// Add a role player without a role.
    pub fn rel(&self, player: impl IntoStatement) -> Result<Self, QuarryError> {
        self.with(Constraint::Relation(vec![RolePlayer::new(
            None,
            player.into_statement(),
        )]))
    }

    /// Add a role player in `role`.
    pub fn rel_role(
        &self,
        role: impl IntoStatement,
        player: impl IntoStatement,
    ) -> Result<Self, QuarryError> {
        self.with(Constraint::Relation(vec![RolePlayer::new(
            Some(role.into_statement()),
            player.into_statement(),
        )]))
    }

    /// Rule body.
    pub fn when(&self, body: impl Into<Pattern>) -> Result<Self, QuarryError> {
        self.with(Constraint::When(body.into()))
    }

    /// Rule head.
    pub fn then(&self, head: impl Into<Pattern>) -> Result<Self, QuarryError> {
        self.with(Constraint::Then(head.into()))
    }

    // =========================================================================
    // TRAVERSAL
    // =========================================================================

    /// This statement and every statement nested in the same scope.
    ///
    /// LIFO expansion; shared sub-statements are visited once.
    #[must_use]
    pub fn inner_statements(&self) -> Vec<Statement> {
        self.expand(Constraint::inner_statements)
    }

    /// Like [`Self::inner_statements`], but also follows implicit statements
    /// such as the relation behind an attribute ownership.
    #[must_use]
    pub fn implicit_inner_statements(&self) -> Vec<Statement> {
        self.expand(Constraint::implicit_inner_statements)
    }

    fn expand(&self, children: fn(&Constraint) -> Vec<&Statement>) -> Vec<Statement> {
        let mut pending = vec![self.clone()];
        let mut seen: HashSet<*const StatementInner> = HashSet::new();
        let mut out = Vec::new();

        while let Some(statement) = pending.pop() {
            if !seen.insert(Arc::as_ptr(&statement.0)) {
                continue;
            }
            for constraint in statement.constraints() {
                pending.extend(children(constraint).into_iter().cloned());
            }
            out.push(statement);
        }
        out
    }

    /// Named variables reachable through explicit inner statements.
    #[must_use]
    pub fn variables(&self) -> BTreeSet<Variable> {
        self.inner_statements()
            .into_iter()
            .map(|s| s.var().clone())
            .filter(Variable::is_named)
            .collect()
    }

    // =========================================================================
    // DISPLAY
    // =========================================================================

    /// Short form used when this statement appears inside another one:
    /// the bare variable, the bare label, or the back-quoted full form.
    #[must_use]
    pub fn printable_name(&self) -> String {
        if self.is_empty() {
            return self.var().to_string();
        }
        if self.0.constraints.len() == 1
            && let Some(label) = self.type_label()
        {
            return label.to_string();
        }
        format!("`{self}`")
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut head = Vec::new();
        let mut tail = Vec::new();
        if self.var().is_named() || self.is_empty() {
            head.push(self.var().to_string());
        }
        for constraint in self.constraints() {
            match constraint {
                Constraint::Relation(_) | Constraint::Value(_) => {
                    head.push(constraint.to_string());
                }
                _ => tail.push(constraint.to_string()),
            }
        }
        f.write_str(&head.join(" "))?;
        if !tail.is_empty() {
            if !head.is_empty() {
                f.write_str(" ")?;
            }
            f.write_str(&tail.join(", "))?;
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{anon, var};

    #[test]
    fn builders_leave_the_receiver_untouched() {
        let x = var("x");
        let typed = x.isa("person").expect("isa");
        assert!(x.is_empty());
        assert!(!typed.is_empty());
    }

    #[test]
    fn equal_singular_add_is_a_no_op() {
        let x = var("x").isa("person").expect("isa");
        let again = x.isa("person").expect("same isa");
        assert_eq!(x, again);
    }

    #[test]
    fn unequal_singular_add_conflicts() {
        let x = var("x").isa("person").expect("isa");
        let err = x.isa("company").expect_err("conflict");
        assert!(matches!(err, QuarryError::ConflictingConstraints { .. }));
    }

    #[test]
    fn isa_and_explicit_isa_conflict() {
        let x = var("x").isa("person").expect("isa");
        assert!(x.isa_explicit("person").is_err());
    }

    #[test]
    fn role_players_accumulate_in_order() {
        let r = var("r")
            .rel_role("husband", var("x"))
            .and_then(|r| r.rel_role("wife", var("y")))
            .and_then(|r| r.rel(var("z")))
            .expect("relation");
        let players = r.role_players().expect("aggregate");
        assert_eq!(players.len(), 3);
        assert_eq!(players[0].player, var("x"));
        assert_eq!(players[2].role, None);
        assert_eq!(
            r.constraints()
                .filter(|c| matches!(c, Constraint::Relation(_)))
                .count(),
            1
        );
    }

    #[test]
    fn has_types_the_attribute() {
        let x = var("x").has("name", var("n")).expect("has");
        let attribute = x
            .constraints()
            .find_map(|c| match c {
                Constraint::HasAttribute { attribute, .. } => Some(attribute.clone()),
                _ => None,
            })
            .expect("ownership");
        assert!(attribute.contains(&Constraint::Isa {
            ty: label("name"),
            explicit: false
        }));
    }

    #[test]
    fn has_with_conflicting_attribute_type_fails() {
        let n = var("n").isa("age").expect("isa");
        let err = var("x").has("name", n).expect_err("conflict");
        assert!(matches!(err, QuarryError::ConflictingConstraints { .. }));
    }

    #[test]
    fn remove_absent_is_a_no_op() {
        let x = var("x").isa("person").expect("isa");
        assert_eq!(x.remove(&Constraint::IsAbstract), x);
    }

    #[test]
    fn remove_then_add_restores() {
        let x = var("x")
            .isa("person")
            .and_then(|x| x.is_abstract())
            .expect("build");
        let removed = x.remove(&Constraint::IsAbstract);
        assert_ne!(removed, x);
        assert_eq!(removed.is_abstract().expect("re-add"), x);
    }

    #[test]
    fn printable_names() {
        assert_eq!(var("x").printable_name(), "$x");
        assert_eq!(label("person").printable_name(), "person");
        let typed = var("x").isa("person").expect("isa");
        assert_eq!(typed.printable_name(), "`$x isa person`");
    }

    #[test]
    fn canonical_display() {
        let x = var("x")
            .isa("person")
            .and_then(|x| x.has("name", "Alice"))
            .expect("build");
        assert_eq!(x.to_string(), r#"$x isa person, has name "Alice""#);
    }

    #[test]
    fn relation_display_leads() {
        let r = var("r")
            .rel_role("spouse", var("x"))
            .and_then(|r| r.isa("marriage"))
            .expect("build");
        assert_eq!(r.to_string(), "$r (spouse: $x) isa marriage");
    }

    #[test]
    fn variables_skip_anonymous_and_implicit() {
        let x = var("x")
            .isa("person")
            .and_then(|x| x.has("name", var("n")))
            .and_then(|x| x.neq(anon()))
            .expect("build");
        let vars: Vec<String> = x.variables().iter().map(|v| v.to_string()).collect();
        assert_eq!(vars, ["$n", "$x"]);
    }

    #[test]
    fn user_named_has_relation_is_explicit() {
        let x = var("x")
            .has_via("name", var("n"), var("r"))
            .expect("has via");
        assert!(x.variables().contains(&Variable::named("r")));
    }

    #[test]
    fn shared_sub_statements_are_visited_once() {
        let shared = var("t").label("person").expect("label");
        let x = var("x")
            .isa(&shared)
            .and_then(|x| x.neq(var("y").isa(&shared).expect("isa")))
            .expect("build");
        let count = x
            .implicit_inner_statements()
            .iter()
            .filter(|s| s.var() == shared.var())
            .count();
        assert_eq!(count, 1);
    }
}
