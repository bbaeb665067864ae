//! Process-wide term interner.
//!
//! Terms are content-addressed by structural hash plus equality. Interning a
//! term returns an `Arc`-backed handle that can be cheaply cloned; interning
//! the same shape twice returns the same allocation, which makes equality a
//! pointer comparison almost everywhere.

use std::sync::LazyLock;

use parking_lot::RwLock;
use rustc_hash::FxHashSet;

use super::{Term, TermData, TermKind};

static INTERNER: LazyLock<Interner> = LazyLock::new(Interner::new);

/// The process-wide interner.
pub fn interner() -> &'static Interner {
    &INTERNER
}

/// Term interner with concurrent lookups.
///
/// Reads take a shared lock; only the first interning of a new shape takes
/// the exclusive lock.
#[derive(Debug, Default)]
pub struct Interner {
    terms: RwLock<FxHashSet<Term>>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a term shape, returning the canonical handle.
    pub fn intern(&self, kind: TermKind) -> Term {
        let candidate = Term::from_data(TermData::new(kind));
        {
            let terms = self.terms.read();
            if let Some(existing) = terms.get(&candidate) {
                return existing.clone();
            }
        }
        let mut terms = self.terms.write();
        // Another writer may have inserted between the lock handoff.
        if let Some(existing) = terms.get(&candidate) {
            existing.clone()
        } else {
            terms.insert(candidate.clone());
            candidate
        }
    }

    /// Number of unique terms interned.
    pub fn len(&self) -> usize {
        self.terms.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.read().is_empty()
    }
}
