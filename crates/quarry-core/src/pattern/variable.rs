//! # Variables
//!
//! A variable names a concept inside a pattern. User-named variables take part
//! in result projection; anonymous ones are internal.
//!
//! Anonymous variables come from two sources:
//! - a process-wide counter, so every call to [`Variable::anonymous`] is fresh
//! - a type label, so two references to `person` are the same variable

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::Label;

static NEXT_ANONYMOUS: AtomicU64 = AtomicU64::new(0);

/// Whether a variable was written by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VarKind {
    Named,
    Anonymous,
}

/// An immutable, cheaply cloned pattern variable.
///
/// Ordered by name first, then by kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variable {
    name: Arc<str>,
    kind: VarKind,
}

impl Variable {
    /// A user-named variable. A leading `$` is stripped.
    #[must_use]
    pub fn named(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        let name = name.strip_prefix('$').unwrap_or(name);
        Self {
            name: Arc::from(name),
            kind: VarKind::Named,
        }
    }

    /// A fresh anonymous variable.
    #[must_use]
    pub fn anonymous() -> Self {
        let n = NEXT_ANONYMOUS.fetch_add(1, Ordering::Relaxed);
        Self {
            name: Arc::from(n.to_string()),
            kind: VarKind::Anonymous,
        }
    }

    /// The anonymous variable standing for the type labelled `label`.
    #[must_use]
    pub fn for_label(label: &Label) -> Self {
        Self {
            name: Arc::from(format!("<{label}>")),
            kind: VarKind::Anonymous,
        }
    }

    /// An anonymous variable derived from this one, e.g. a casting edge.
    ///
    /// The same `(self, suffix)` always yields the same variable. The kind of
    /// `self` is part of the name, so `$0` and the first anonymous variable
    /// derive different variables.
    #[must_use]
    pub fn derived(&self, suffix: &str) -> Self {
        let marker = match self.kind {
            VarKind::Named => '$',
            VarKind::Anonymous => '_',
        };
        Self {
            name: Arc::from(format!("{marker}{}/{suffix}", self.name)),
            kind: VarKind::Anonymous,
        }
    }

    /// The identity string, without the `$` sigil.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> VarKind {
        self.kind
    }

    /// Whether this variable takes part in result projection.
    #[must_use]
    pub fn is_named(&self) -> bool {
        self.kind == VarKind::Named
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            VarKind::Named => write!(f, "${}", self.name),
            VarKind::Anonymous => write!(f, "$_{}", self.name),
        }
    }
}
