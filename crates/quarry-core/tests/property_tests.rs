//! # Property-Based Tests
//!
//! Algebraic invariants of patterns and statements, checked with proptest.

use proptest::collection::vec;
use proptest::prelude::*;
use quarry_core::{
    Answer, Pattern, Statement, Variable, WriteMode, WritePlan, compile_match, label, var,
};

/// A small typed statement: `$<name> isa <ty>`.
fn typed_statement() -> impl Strategy<Value = Statement> {
    ("[a-e]", "[p-t]").prop_map(|(name, ty)| var(name).isa(ty.as_str()).expect("isa"))
}

/// Nested and/or patterns over typed statements.
fn pattern() -> impl Strategy<Value = Pattern> {
    let leaf = typed_statement().prop_map(Pattern::from);
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            vec(inner.clone(), 1..4)
                .prop_map(|items| Pattern::from(Pattern::and(items).expect("and"))),
            vec(inner, 1..4).prop_map(|items| Pattern::from(Pattern::or(items).expect("or"))),
        ]
    })
}

/// Rebuild a pattern from its normal form.
fn from_normal_form(pattern: &Pattern) -> Pattern {
    let normal_form = pattern.normal_form();
    let disjuncts = normal_form.iter().map(|conj| {
        Pattern::from(Pattern::and(conj.iter().cloned().map(Pattern::from)).expect("and"))
    });
    Pattern::from(Pattern::or(disjuncts).expect("or"))
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Normalizing twice is the same as normalizing once.
    #[test]
    fn normal_form_is_idempotent(p in pattern()) {
        let nf = p.normal_form();
        prop_assert_eq!(from_normal_form(&p).normal_form(), nf);
    }

    /// Normalization keeps every statement and every variable.
    #[test]
    fn normal_form_preserves_variables(p in pattern()) {
        let rebuilt = from_normal_form(&p);
        prop_assert_eq!(rebuilt.variables(), p.variables());
    }

    /// Adding the same `isa` twice is the same as adding it once.
    #[test]
    fn singular_add_is_idempotent(name in "[a-z]{1,6}", ty in "[a-z]{1,6}") {
        let once = var(&name).isa(ty.as_str()).expect("isa");
        let twice = once.isa(ty.as_str()).expect("isa again");
        prop_assert_eq!(once, twice);
    }

    /// An `isa` to a different type always conflicts.
    #[test]
    fn unequal_singular_add_conflicts(ty in "[a-m]{1,4}", other in "[n-z]{1,4}") {
        let x = var("x").isa(ty.as_str()).expect("isa");
        prop_assert!(x.isa(other.as_str()).is_err());
    }

    /// A second value predicate is a no-op when equal and a conflict otherwise.
    #[test]
    fn value_is_singular(first in any::<i64>(), second in any::<i64>()) {
        let x = var("x").val(first).expect("val");
        prop_assert_eq!(x.val(first).expect("same value"), x.clone());
        prop_assert_eq!(x.val(second).is_ok(), first == second);
    }

    /// N role players end up in one relation constraint, in insertion order.
    #[test]
    fn role_players_keep_order(players in vec("[a-z]{1,5}", 1..8)) {
        let mut r = var("r");
        for player in &players {
            r = r.rel_role("member", var(player)).expect("rel");
        }
        let collected: Vec<&str> = r
            .role_players()
            .expect("relation")
            .iter()
            .map(|rp| rp.player.var().name())
            .collect();
        let expected: Vec<&str> = players.iter().map(String::as_str).collect();
        prop_assert_eq!(collected, expected);
        prop_assert_eq!(r.constraints().count(), 1);
    }

    /// Statement variables do not depend on the order constraints were added.
    #[test]
    fn variables_stable_under_reordering(attrs in vec("[a-z]{1,5}", 1..5)) {
        let forward = attrs.iter().fold(var("x"), |s, a| s.has("name", var(a)).expect("has"));
        let backward = attrs.iter().rev().fold(var("x"), |s, a| s.has("name", var(a)).expect("has"));
        prop_assert_eq!(forward.variables(), backward.variables());
        prop_assert!(forward.variables().iter().all(Variable::is_named));
    }

    /// Removing a constraint and adding it back restores the statement.
    #[test]
    fn remove_then_add_restores(ty in "[a-z]{1,6}", value in any::<i64>()) {
        let x = var("x")
            .isa(ty.as_str())
            .and_then(|s| s.has("count", value))
            .expect("statement");
        for constraint in x.constraints() {
            let restored = x.remove(constraint).with(constraint.clone()).expect("re-add");
            prop_assert_eq!(&restored, &x);
        }
    }

    /// Match compilation yields one fragment set per disjunct.
    #[test]
    fn match_plan_per_disjunct(p in pattern()) {
        prop_assert_eq!(compile_match(&p).len(), p.normal_form().len());
    }

    /// Write plans are deterministic: compiling twice gives the same order.
    #[test]
    fn write_plans_are_deterministic(types in vec("[a-z]{1,5}", 1..6)) {
        let statements: Vec<Statement> = types
            .iter()
            .map(|ty| label(ty.as_str()).sub("entity").expect("sub"))
            .collect();
        let conj = quarry_core::Conjunction::new(statements);
        let first = WritePlan::compile(&conj, WriteMode::Define, &Answer::new()).expect("plan");
        let second = WritePlan::compile(&conj, WriteMode::Define, &Answer::new()).expect("plan");
        prop_assert_eq!(first, second);
    }
}
