//! # Match Compilation
//!
//! Turns a pattern into the input of the traversal engine: one fragment set
//! per conjunct of the pattern's normal form.
//!
//! - Every statement of a conjunct contributes fragments, implicit inner
//!   statements included
//! - Fragments are kept in a `BTreeSet`, so compilation is deterministic and
//!   duplicate fragments from shared statements collapse

use std::collections::BTreeSet;
use std::fmt;

use crate::pattern::{Conjunction, Pattern, Statement, Variable};
use crate::property::fragments::Fragment;

/// Fragments of one conjunct, plus the variables it projects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConjunctFragments {
    pub variables: BTreeSet<Variable>,
    pub fragments: BTreeSet<Fragment>,
}

impl ConjunctFragments {
    /// Compile a single conjunct.
    #[must_use]
    pub fn from_conjunction(conjunction: &Conjunction<Statement>) -> Self {
        let mut fragments = BTreeSet::new();
        for statement in conjunction {
            for inner in statement.implicit_inner_statements() {
                for constraint in inner.constraints() {
                    fragments.extend(constraint.fragments(inner.var()));
                }
            }
        }
        Self {
            variables: conjunction.variables(),
            fragments,
        }
    }
}

/// Traversal input for a whole pattern: one entry per disjunct.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchPlan {
    pub conjuncts: Vec<ConjunctFragments>,
}

impl MatchPlan {
    #[must_use]
    pub fn len(&self) -> usize {
        self.conjuncts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conjuncts.is_empty()
    }
}

/// Normalize `pattern` and compile every conjunct.
#[must_use]
pub fn compile_match(pattern: &Pattern) -> MatchPlan {
    let conjuncts = pattern
        .normal_form()
        .iter()
        .map(ConjunctFragments::from_conjunction)
        .collect();
    MatchPlan { conjuncts }
}

impl fmt::Display for MatchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, conjunct) in self.conjuncts.iter().enumerate() {
            let vars: Vec<String> = conjunct.variables.iter().map(ToString::to_string).collect();
            writeln!(f, "conjunct {i} [{}]", vars.join(", "))?;
            for fragment in &conjunct.fragments {
                writeln!(f, "  {fragment}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{label, var};

    #[test]
    fn one_entry_per_disjunct() {
        let a = var("x").isa("a").expect("isa");
        let b = var("x").isa("b").expect("isa");
        let pattern: Pattern = Pattern::or([a.into(), b.into()]).expect("or").into();
        assert_eq!(compile_match(&pattern).len(), 2);
    }

    #[test]
    fn inner_statements_contribute_fragments() {
        let x = var("x").isa("person").expect("isa");
        let plan = compile_match(&x.into());
        let conjunct = &plan.conjuncts[0];
        assert!(conjunct.fragments.contains(&Fragment::Label {
            start: label("person").var().clone(),
            label: "person".into(),
        }));
        assert_eq!(conjunct.fragments.len(), 2);
    }

    #[test]
    fn implicit_has_relation_is_matched_but_not_projected() {
        let x = var("x").has("name", "Alice").expect("has");
        let plan = compile_match(&x.into());
        let conjunct = &plan.conjuncts[0];
        assert_eq!(conjunct.variables.len(), 1);
        assert!(
            conjunct
                .fragments
                .iter()
                .any(|f| matches!(f, Fragment::Has { .. }))
        );
        assert!(
            conjunct
                .fragments
                .iter()
                .any(|f| matches!(f, Fragment::Value { .. }))
        );
    }

    #[test]
    fn shared_labels_collapse() {
        let x = var("x").isa("person").expect("isa");
        let y = var("y").isa("person").expect("isa");
        let pattern: Pattern = Pattern::and([x.into(), y.into()]).expect("and").into();
        let plan = compile_match(&pattern);
        let labels = plan.conjuncts[0]
            .fragments
            .iter()
            .filter(|f| matches!(f, Fragment::Label { .. }))
            .count();
        assert_eq!(labels, 1);
    }
}
