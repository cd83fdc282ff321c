//! # Session Module
//!
//! A session owns one concept graph and runs whole patterns against it.
//!
//! ## Storage Backends
//!
//! - `InMemory`: a graph over `MemoryStorage` (volatile)
//! - `Persistent`: a graph over `RedbStorage`; writes reach disk on `commit`
//!
//! Every write normalizes its pattern and compiles all conjuncts before the
//! first one executes. Define and undefine need a schema transaction.

use std::path::Path;

use crate::concept::graph::GraphStats;
use crate::concept::{Concept, ConceptGraph, ConceptStore};
use crate::matcher::{MatchPlan, compile_match};
use crate::pattern::Pattern;
use crate::property::executors::WriteMode;
use crate::reasoner::ReasonerQuery;
use crate::storage::{MemoryStorage, RedbStorage, Storage, TransactionKind, TransactionOptions};
use crate::types::{ConceptId, Label, QuarryError};
use crate::writer::{Answer, compile_write};

/// Storage backend for a Session.
#[derive(Debug)]
pub enum StorageBackend {
    /// Graph over in-memory storage.
    InMemory(ConceptGraph<MemoryStorage>),
    /// Graph over a redb database.
    Persistent(ConceptGraph<RedbStorage>),
}

#[derive(Debug)]
pub struct Session {
    backend: StorageBackend,
}

impl Session {
    /// A session over a fresh in-memory graph.
    pub fn in_memory(options: TransactionOptions) -> Result<Self, QuarryError> {
        let graph = ConceptGraph::open(MemoryStorage::new(options))?;
        Ok(Self {
            backend: StorageBackend::InMemory(graph),
        })
    }

    /// A session over the redb database at `path`, created if missing.
    pub fn open(path: impl AsRef<Path>, options: TransactionOptions) -> Result<Self, QuarryError> {
        let graph = ConceptGraph::open(RedbStorage::open(path, options)?)?;
        Ok(Self {
            backend: StorageBackend::Persistent(graph),
        })
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    #[must_use]
    pub fn transaction_kind(&self) -> TransactionKind {
        match &self.backend {
            StorageBackend::InMemory(g) => g.storage().options().kind,
            StorageBackend::Persistent(g) => g.storage().options().kind,
        }
    }

    /// Switch the transaction kind for subsequent writes.
    pub fn begin(&mut self, kind: TransactionKind) {
        let options = TransactionOptions { kind };
        match &mut self.backend {
            StorageBackend::InMemory(g) => g.storage_mut().set_options(options),
            StorageBackend::Persistent(g) => g.storage_mut().set_options(options),
        }
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    pub fn define(&mut self, pattern: &Pattern) -> Result<Vec<Answer>, QuarryError> {
        self.write(WriteMode::Define, pattern, &Answer::new())
    }

    pub fn undefine(&mut self, pattern: &Pattern) -> Result<Vec<Answer>, QuarryError> {
        self.write(WriteMode::Undefine, pattern, &Answer::new())
    }

    pub fn insert(&mut self, pattern: &Pattern, bound: &Answer) -> Result<Vec<Answer>, QuarryError> {
        self.write(WriteMode::Insert, pattern, bound)
    }

    pub fn delete(&mut self, pattern: &Pattern, bound: &Answer) -> Result<Vec<Answer>, QuarryError> {
        self.write(WriteMode::Delete, pattern, bound)
    }

    /// Compile every conjunct of `pattern`, then execute them in order.
    /// Returns one answer per conjunct.
    pub fn write(
        &mut self,
        mode: WriteMode,
        pattern: &Pattern,
        bound: &Answer,
    ) -> Result<Vec<Answer>, QuarryError> {
        if mode.is_schema() && self.transaction_kind() != TransactionKind::Schema {
            return Err(QuarryError::TransactionKind {
                operation: if mode == WriteMode::Define {
                    "define"
                } else {
                    "undefine"
                },
                required: "schema",
            });
        }

        let plans = compile_write(pattern, mode, bound)?;
        let mut answers = Vec::with_capacity(plans.len());
        for plan in &plans {
            let answer = match &mut self.backend {
                StorageBackend::InMemory(g) => plan.execute(g, bound.clone())?,
                StorageBackend::Persistent(g) => plan.execute(g, bound.clone())?,
            };
            answers.push(answer);
        }

        let steps: usize = plans.iter().map(|p| p.len()).sum();
        tracing::info!(%mode, conjuncts = plans.len(), steps, "write applied");
        Ok(answers)
    }

    // =========================================================================
    // COMPILATION
    // =========================================================================

    #[must_use]
    pub fn match_plan(&self, pattern: &Pattern) -> MatchPlan {
        compile_match(pattern)
    }

    #[must_use]
    pub fn reasoner_queries(&self, pattern: &Pattern) -> Vec<ReasonerQuery> {
        ReasonerQuery::from_pattern(pattern)
    }

    // =========================================================================
    // LOOKUPS
    // =========================================================================

    pub fn concept(&self, id: ConceptId) -> Result<Option<Concept>, QuarryError> {
        match &self.backend {
            StorageBackend::InMemory(g) => g.concept(id),
            StorageBackend::Persistent(g) => g.concept(id),
        }
    }

    pub fn lookup_label(&self, label: &Label) -> Result<Option<ConceptId>, QuarryError> {
        match &self.backend {
            StorageBackend::InMemory(g) => g.lookup_label(label),
            StorageBackend::Persistent(g) => g.lookup_label(label),
        }
    }

    pub fn instance_count(&self, ty: ConceptId) -> Result<i64, QuarryError> {
        match &self.backend {
            StorageBackend::InMemory(g) => g.instance_count(ty),
            StorageBackend::Persistent(g) => g.instance_count(ty),
        }
    }

    pub fn concepts(&self) -> Result<Vec<Concept>, QuarryError> {
        match &self.backend {
            StorageBackend::InMemory(g) => g.concepts(),
            StorageBackend::Persistent(g) => g.concepts(),
        }
    }

    pub fn stats(&self) -> Result<GraphStats, QuarryError> {
        match &self.backend {
            StorageBackend::InMemory(g) => g.stats(),
            StorageBackend::Persistent(g) => g.stats(),
        }
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    pub fn commit(&mut self) -> Result<(), QuarryError> {
        match &mut self.backend {
            StorageBackend::InMemory(g) => g.commit(),
            StorageBackend::Persistent(g) => g.commit(),
        }
    }

    /// Close the storage. Uncommitted persistent writes are dropped.
    pub fn close(&mut self) {
        match &mut self.backend {
            StorageBackend::InMemory(g) => g.close(),
            StorageBackend::Persistent(g) => g.close(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::pattern::{Variable, label, var};
    use crate::types::DataType;

    fn person_schema() -> Pattern {
        let name = label("name")
            .sub("attribute")
            .and_then(|s| s.datatype(DataType::String))
            .expect("name");
        let person = label("person")
            .sub("entity")
            .and_then(|s| s.has_type("name"))
            .expect("person");
        Pattern::from(Pattern::and([Pattern::from(name), Pattern::from(person)]).expect("and"))
    }

    #[test]
    fn schema_writes_need_a_schema_transaction() {
        let mut session = Session::in_memory(TransactionOptions::data()).expect("session");
        let err = session.define(&person_schema()).expect_err("data tx");
        assert!(matches!(err, QuarryError::TransactionKind { .. }));

        session.begin(TransactionKind::Schema);
        session.define(&person_schema()).expect("define");
        assert!(
            session
                .lookup_label(&Label::new("person"))
                .expect("lookup")
                .is_some()
        );
    }

    #[test]
    fn one_answer_per_conjunct() {
        let mut session = Session::in_memory(TransactionOptions::schema()).expect("session");
        session.define(&person_schema()).expect("define");

        let alice = Pattern::from(var("x").isa("person").expect("alice"));
        let bob = Pattern::from(var("x").isa("person").expect("bob"));
        let either = Pattern::from(Pattern::or([alice.clone(), bob]).expect("or"));
        let answers = session.insert(&either, &Answer::new()).expect("insert");
        // Equal statements collapse to one disjunct.
        assert_eq!(answers.len(), 1);

        let person = session
            .lookup_label(&Label::new("person"))
            .expect("lookup")
            .expect("person");
        assert_eq!(session.instance_count(person).expect("count"), 1);

        let x = answers[0].get(&Variable::named("x")).expect("x");
        session.delete(&alice, &answers[0]).expect("delete");
        assert!(session.concept(x).expect("lookup").is_none());
        assert_eq!(session.instance_count(person).expect("count"), 0);
    }

    #[test]
    fn failed_compilation_writes_nothing() {
        let mut session = Session::in_memory(TransactionOptions::schema()).expect("session");
        session.define(&person_schema()).expect("define");
        let before = session.stats().expect("stats");

        let good = Pattern::from(var("x").isa("person").expect("good"));
        let bad = Pattern::from(var("y").rel_role("spouse", var("z")).expect("bad"));
        let either = Pattern::from(Pattern::or([good, bad]).expect("or"));
        assert!(session.insert(&either, &Answer::new()).is_err());
        assert_eq!(session.stats().expect("stats"), before);
    }

    #[test]
    fn persistent_session_commits() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("session.redb");
        {
            let mut session = Session::open(&path, TransactionOptions::schema()).expect("open");
            assert!(session.is_persistent());
            session.define(&person_schema()).expect("define");
            session.commit().expect("commit");
        }
        let session = Session::open(&path, TransactionOptions::data()).expect("reopen");
        assert!(
            session
                .lookup_label(&Label::new("name"))
                .expect("lookup")
                .is_some()
        );
        assert_eq!(session.transaction_kind(), TransactionKind::Data);
    }

    #[test]
    fn compilation_views() {
        let session = Session::in_memory(TransactionOptions::data()).expect("session");
        let pattern = Pattern::from(var("x").isa("person").expect("x"));
        assert_eq!(session.match_plan(&pattern).len(), 1);
        assert_eq!(session.reasoner_queries(&pattern).len(), 1);
    }
}
