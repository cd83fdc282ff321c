//! # Reasoner Input
//!
//! Builds the inputs of the reasoning engine from patterns: queries as
//! conjunctions of atoms, and rule definitions as body queries plus a head.

use std::collections::BTreeSet;
use std::fmt;

use crate::pattern::{Conjunction, Pattern, Statement, Variable};
use crate::property::Constraint;
use crate::property::atoms::{Atom, AtomOwner, RulePart};
use crate::types::{Label, QuarryError};

/// A conjunction of atoms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonerQuery {
    pub owner: AtomOwner,
    pub atoms: BTreeSet<Atom>,
    pub variables: BTreeSet<Variable>,
}

impl ReasonerQuery {
    /// Map every constraint of a conjunct, implicit statements included.
    #[must_use]
    pub fn from_conjunction(conjunction: &Conjunction<Statement>, owner: AtomOwner) -> Self {
        let siblings: Vec<Statement> = conjunction
            .iter()
            .flat_map(Statement::implicit_inner_statements)
            .collect();
        let mut atoms = BTreeSet::new();
        for statement in &siblings {
            for constraint in statement.constraints() {
                atoms.extend(constraint.to_atom(statement.var(), &siblings, &owner));
            }
        }
        Self {
            atoms,
            variables: conjunction.variables(),
            owner,
        }
    }

    /// One query per disjunct of `pattern`.
    #[must_use]
    pub fn from_pattern(pattern: &Pattern) -> Vec<Self> {
        pattern
            .normal_form()
            .iter()
            .map(|conjunct| Self::from_conjunction(conjunct, AtomOwner::Query))
            .collect()
    }
}

impl fmt::Display for ReasonerQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let atoms: Vec<String> = self.atoms.iter().map(ToString::to_string).collect();
        write!(f, "{}", atoms.join(", "))
    }
}

/// A rule: one body query per disjunct of `when`, and a single head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDefinition {
    pub label: Label,
    pub body: Vec<ReasonerQuery>,
    pub head: ReasonerQuery,
}

impl RuleDefinition {
    /// Read a rule from a statement carrying `label`, `when` and `then`.
    pub fn from_statement(statement: &Statement) -> Result<Self, QuarryError> {
        let malformed = |label: &str, reason: &str| QuarryError::MalformedRule {
            label: label.to_string(),
            reason: reason.to_string(),
        };

        let label = statement
            .type_label()
            .ok_or_else(|| malformed(&statement.printable_name(), "a rule needs a label"))?
            .clone();

        let mut when = None;
        let mut then = None;
        for constraint in statement.constraints() {
            match constraint {
                Constraint::When(pattern) => when = Some(pattern),
                Constraint::Then(pattern) => then = Some(pattern),
                _ => {}
            }
        }
        let when = when.ok_or_else(|| malformed(label.as_str(), "missing `when`"))?;
        let then = then.ok_or_else(|| malformed(label.as_str(), "missing `then`"))?;

        let body_owner = AtomOwner::Rule {
            label: label.clone(),
            part: RulePart::Body,
        };
        let body = when
            .normal_form()
            .iter()
            .map(|conjunct| ReasonerQuery::from_conjunction(conjunct, body_owner.clone()))
            .collect();

        let head_form = then.normal_form();
        if head_form.len() != 1 {
            return Err(malformed(
                label.as_str(),
                "the head must be a single conjunction",
            ));
        }
        let head_owner = AtomOwner::Rule {
            label: label.clone(),
            part: RulePart::Head,
        };
        let head = head_form
            .iter()
            .next()
            .map(|conjunct| ReasonerQuery::from_conjunction(conjunct, head_owner))
            .ok_or_else(|| malformed(label.as_str(), "empty head"))?;

        Ok(Self { label, body, head })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{label, var};
    use crate::property::atoms::AtomKind;

    fn rule(when: Pattern, then: Pattern) -> Statement {
        label("grandparenthood")
            .sub("rule")
            .and_then(|s| s.when(when))
            .and_then(|s| s.then(then))
            .expect("rule")
    }

    fn parenthood(parent: &str, child: &str) -> Pattern {
        var(format!("r{parent}{child}"))
            .rel_role("parent", var(parent))
            .and_then(|r| r.rel_role("child", var(child)))
            .and_then(|r| r.isa("parenthood"))
            .expect("relation")
            .into()
    }

    #[test]
    fn query_conjoins_atoms() {
        let x = var("x")
            .isa("person")
            .and_then(|x| x.has("name", "Alice"))
            .expect("build");
        let queries = ReasonerQuery::from_pattern(&x.into());
        assert_eq!(queries.len(), 1);
        let query = &queries[0];
        assert!(
            query
                .atoms
                .iter()
                .any(|a| matches!(a.kind, AtomKind::Resource { .. }))
        );
        assert!(query.atoms.iter().all(|a| a.owner == AtomOwner::Query));
    }

    #[test]
    fn rule_with_disjunctive_body() {
        let body: Pattern = Pattern::or([parenthood("a", "b"), parenthood("b", "c")])
            .expect("or")
            .into();
        let head = parenthood("a", "c");
        let definition = RuleDefinition::from_statement(&rule(body, head)).expect("rule");
        assert_eq!(definition.label.as_str(), "grandparenthood");
        assert_eq!(definition.body.len(), 2);
        assert!(matches!(
            definition.head.owner,
            AtomOwner::Rule {
                part: RulePart::Head,
                ..
            }
        ));
    }

    #[test]
    fn disjunctive_head_is_malformed() {
        let body = parenthood("a", "b");
        let head: Pattern = Pattern::or([parenthood("a", "c"), parenthood("c", "a")])
            .expect("or")
            .into();
        assert!(matches!(
            RuleDefinition::from_statement(&rule(body, head)),
            Err(QuarryError::MalformedRule { .. })
        ));
    }

    #[test]
    fn missing_then_is_malformed() {
        let statement = label("r")
            .when(parenthood("a", "b"))
            .expect("when");
        assert!(matches!(
            RuleDefinition::from_statement(&statement),
            Err(QuarryError::MalformedRule { .. })
        ));
    }

    #[test]
    fn rule_atoms_are_scoped() {
        let definition =
            RuleDefinition::from_statement(&rule(parenthood("a", "b"), parenthood("b", "a")))
                .expect("rule");
        // The rule statement's own `sub rule` is not part of either query.
        assert!(
            definition.body[0]
                .atoms
                .iter()
                .all(|a| !matches!(a.kind, AtomKind::Sub { .. }))
        );
    }
}
