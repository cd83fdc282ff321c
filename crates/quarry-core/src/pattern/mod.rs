//! # Pattern Algebra
//!
//! Patterns are built from statements with conjunction and disjunction.
//! Every pattern is an immutable value and can be normalized to disjunctive
//! normal form: a disjunction of conjunctions of statements.
//!
//! Traversals (normalization, variable collection) use explicit stacks, so
//! deeply nested patterns never grow the call stack.

pub mod statement;
pub mod variable;

pub use statement::{IntoAttribute, IntoStatement, Statement};
pub use variable::{VarKind, Variable};

use std::collections::BTreeSet;
use std::collections::btree_set;
use std::fmt;

use crate::property::Constraint;
use crate::types::{Label, QuarryError};

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// An empty statement about the user-named variable `name`.
#[must_use]
pub fn var(name: impl AsRef<str>) -> Statement {
    Statement::new(Variable::named(name))
}

/// An empty statement about a fresh anonymous variable.
#[must_use]
pub fn anon() -> Statement {
    Statement::new(Variable::anonymous())
}

/// The statement naming the schema concept labelled `label`.
///
/// Every call with the same label yields an equal statement.
#[must_use]
pub fn label(label: impl Into<Label>) -> Statement {
    let label = label.into();
    Statement::from_parts(
        Variable::for_label(&label),
        BTreeSet::from([Constraint::Label(label)]),
    )
}

// =============================================================================
// SET WRAPPERS
// =============================================================================

/// A set of patterns that must all hold.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Conjunction<T>(BTreeSet<T>);

/// A set of patterns of which at least one must hold.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Disjunction<T>(BTreeSet<T>);

macro_rules! set_wrapper {
    ($name:ident) => {
        impl<T: Ord> $name<T> {
            #[must_use]
            pub fn new(items: impl IntoIterator<Item = T>) -> Self {
                Self(items.into_iter().collect())
            }

            pub fn iter(&self) -> btree_set::Iter<'_, T> {
                self.0.iter()
            }

            #[must_use]
            pub fn len(&self) -> usize {
                self.0.len()
            }

            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            #[must_use]
            pub fn contains(&self, item: &T) -> bool {
                self.0.contains(item)
            }
        }

        impl<T: Ord> Default for $name<T> {
            fn default() -> Self {
                Self(BTreeSet::new())
            }
        }

        impl<'a, T: Ord> IntoIterator for &'a $name<T> {
            type Item = &'a T;
            type IntoIter = btree_set::Iter<'a, T>;

            fn into_iter(self) -> Self::IntoIter {
                self.0.iter()
            }
        }

        impl<T: Ord> IntoIterator for $name<T> {
            type Item = T;
            type IntoIter = btree_set::IntoIter<T>;

            fn into_iter(self) -> Self::IntoIter {
                self.0.into_iter()
            }
        }

        impl<T: Ord> FromIterator<T> for $name<T> {
            fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
                Self::new(iter)
            }
        }
    };
}

set_wrapper!(Conjunction);
set_wrapper!(Disjunction);

impl Conjunction<Statement> {
    /// Named variables of every statement in the conjunct.
    #[must_use]
    pub fn variables(&self) -> BTreeSet<Variable> {
        self.iter().flat_map(Statement::variables).collect()
    }
}

/// Normal form: a disjunction of conjunctions of statements.
pub type NormalForm = Disjunction<Conjunction<Statement>>;

// =============================================================================
// PATTERN
// =============================================================================

/// Any composable pattern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Pattern {
    Statement(Statement),
    Conjunction(Conjunction<Pattern>),
    Disjunction(Disjunction<Pattern>),
}

impl From<Statement> for Pattern {
    fn from(statement: Statement) -> Self {
        Self::Statement(statement)
    }
}

impl From<Conjunction<Pattern>> for Pattern {
    fn from(conjunction: Conjunction<Pattern>) -> Self {
        Self::Conjunction(conjunction)
    }
}

impl From<Disjunction<Pattern>> for Pattern {
    fn from(disjunction: Disjunction<Pattern>) -> Self {
        Self::Disjunction(disjunction)
    }
}

enum Frame<'a> {
    Enter(&'a Pattern),
    ExitAnd(usize),
    ExitOr(usize),
}

impl Pattern {
    /// Conjoin patterns, flattening nested conjunctions.
    pub fn and(
        patterns: impl IntoIterator<Item = Pattern>,
    ) -> Result<Conjunction<Pattern>, QuarryError> {
        let mut items = BTreeSet::new();
        for pattern in patterns {
            match pattern {
                Self::Conjunction(inner) => items.extend(inner),
                other => {
                    items.insert(other);
                }
            }
        }
        if items.is_empty() {
            return Err(QuarryError::VacuousComposition("conjunction"));
        }
        Ok(Conjunction(items))
    }

    /// Disjoin patterns, flattening nested disjunctions.
    pub fn or(
        patterns: impl IntoIterator<Item = Pattern>,
    ) -> Result<Disjunction<Pattern>, QuarryError> {
        let mut items = BTreeSet::new();
        for pattern in patterns {
            match pattern {
                Self::Disjunction(inner) => items.extend(inner),
                other => {
                    items.insert(other);
                }
            }
        }
        if items.is_empty() {
            return Err(QuarryError::VacuousComposition("disjunction"));
        }
        Ok(Disjunction(items))
    }

    /// Disjunctive normal form.
    ///
    /// - a statement becomes `{{statement}}`
    /// - a conjunction becomes the cartesian product of its children's
    ///   disjuncts, each combined by set union
    /// - a disjunction becomes the union of its children's normal forms
    #[must_use]
    pub fn normal_form(&self) -> NormalForm {
        let mut frames = vec![Frame::Enter(self)];
        let mut results: Vec<NormalForm> = Vec::new();

        while let Some(frame) = frames.pop() {
            match frame {
                Frame::Enter(Self::Statement(statement)) => {
                    results.push(Disjunction::new([Conjunction::new([statement.clone()])]));
                }
                Frame::Enter(Self::Conjunction(children)) => {
                    frames.push(Frame::ExitAnd(children.len()));
                    frames.extend(children.iter().rev().map(Frame::Enter));
                }
                Frame::Enter(Self::Disjunction(children)) => {
                    frames.push(Frame::ExitOr(children.len()));
                    frames.extend(children.iter().rev().map(Frame::Enter));
                }
                Frame::ExitAnd(n) => {
                    let children = results.split_off(results.len().saturating_sub(n));
                    results.push(cartesian_product(children));
                }
                Frame::ExitOr(n) => {
                    let children = results.split_off(results.len().saturating_sub(n));
                    results.push(children.into_iter().flatten().collect());
                }
            }
        }

        results.pop().unwrap_or_default()
    }

    /// Named variables of every statement, through explicit inner statements.
    #[must_use]
    pub fn variables(&self) -> BTreeSet<Variable> {
        let mut pending = vec![self];
        let mut vars = BTreeSet::new();
        while let Some(pattern) = pending.pop() {
            match pattern {
                Self::Statement(statement) => vars.extend(statement.variables()),
                Self::Conjunction(children) => pending.extend(children.iter()),
                Self::Disjunction(children) => pending.extend(children.iter()),
            }
        }
        vars
    }
}

fn cartesian_product(children: Vec<NormalForm>) -> NormalForm {
    let mut acc: Vec<BTreeSet<Statement>> = vec![BTreeSet::new()];
    for child in children {
        let mut next = Vec::with_capacity(acc.len().saturating_mul(child.len()));
        for partial in &acc {
            for conjunct in &child {
                let mut combined = partial.clone();
                combined.extend(conjunct.iter().cloned());
                next.push(combined);
            }
        }
        acc = next;
    }
    acc.into_iter().map(Conjunction).collect()
}

// =============================================================================
// DISPLAY
// =============================================================================

/// Writes `statement;` followed by every named inner statement that carries
/// its own constraints, since those cannot be inlined by name.
fn write_statement(f: &mut fmt::Formatter<'_>, statement: &Statement) -> fmt::Result {
    write!(f, "{statement};")?;
    let mut written = BTreeSet::new();
    for inner in statement.inner_statements().iter().skip(1) {
        if inner.var().is_named() && !inner.is_empty() && written.insert(inner.clone()) {
            write!(f, " {inner};")?;
        }
    }
    Ok(())
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Statement(statement) => write_statement(f, statement),
            Self::Conjunction(children) => {
                f.write_str("{")?;
                for child in children {
                    f.write_str(" ")?;
                    match child {
                        Self::Statement(statement) => write_statement(f, statement)?,
                        _ => write!(f, "{child};")?,
                    }
                }
                f.write_str(" }")
            }
            Self::Disjunction(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" or ")?;
                    }
                    match child {
                        Self::Conjunction(_) => write!(f, "{child}")?,
                        _ => write!(f, "{{ {child} }}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
