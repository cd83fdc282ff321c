//! # quarry-core
//!
//! The pattern algebra and constraint compiler of the Quarry graph knowledge
//! database.
//!
//! Patterns are immutable statements about variables, composed with `and` /
//! `or` and normalized to disjunctive normal form. Each conjunct compiles to
//! one of three targets:
//! - `matcher`: traversal fragments for the match engine
//! - `writer`: dependency-ordered mutation steps, executed against a
//!   concept store
//! - `reasoner`: atoms for the inference engine
//!
//! ## Architectural Constraints
//!
//! - No async, no network dependencies (pure Rust)
//! - Pattern values are shared through `Arc` and never mutated
//! - Compilation is deterministic: ordered collections only
//! - Constraint kinds are one closed enum, matched exhaustively

// =============================================================================
// MODULES
// =============================================================================

pub mod concept;
pub mod matcher;
pub mod pattern;
pub mod primitives;
pub mod property;
pub mod reasoner;
pub mod session;
pub mod storage;
pub mod types;
pub mod writer;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{
    Comparator, ConceptId, DataType, Label, QuarryError, Value, ValuePredicate,
};

// =============================================================================
// RE-EXPORTS: Pattern Algebra
// =============================================================================

pub use pattern::{
    Conjunction, Disjunction, IntoAttribute, IntoStatement, NormalForm, Pattern, Statement,
    VarKind, Variable, anon, label, var,
};
pub use property::{Constraint, RolePlayer};

// =============================================================================
// RE-EXPORTS: Compilation Targets
// =============================================================================

pub use matcher::{ConjunctFragments, MatchPlan, compile_match};
pub use property::atoms::{Atom, AtomKind, AtomOwner, RulePart};
pub use property::executors::{ConceptParam, Step, StepAction, WriteMode};
pub use property::fragments::Fragment;
pub use reasoner::{ReasonerQuery, RuleDefinition};
pub use writer::{Answer, WritePlan, compile_write};

// =============================================================================
// RE-EXPORTS: Concepts and Storage
// =============================================================================

pub use concept::graph::GraphStats;
pub use concept::{Concept, ConceptGraph, ConceptKind, ConceptStore, TypeDefinition};
pub use session::{Session, StorageBackend};
pub use storage::{
    KeyGenerator, MemoryStorage, RedbStorage, Storage, TransactionKind, TransactionOptions,
};
