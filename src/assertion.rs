//! Assertion records, potential assertions, and identifiers.
//!
//! An [`Assertion`] is an immutable fact or quantified formula with
//! provenance. The only field that ever changes after construction is the
//! active flag, and the truth maintenance system is its single writer; the
//! flag is therefore an atomic on an otherwise frozen, reference-counted
//! record.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rustc_hash::FxHashSet;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::term::{OP_EQUAL, OP_FORALL, Term};

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Shared monotonic counter for assertion and rule ids, seeded from the wall
/// clock at startup so ids from different runs do not collide.
static NEXT_ID: AtomicU64 = AtomicU64::new(0);
static NEXT_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

fn seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(1)
        << 20
}

/// Mint a fresh id.
pub fn next_id() -> u64 {
    loop {
        let current = NEXT_ID.load(Ordering::Relaxed);
        if current != 0 {
            return NEXT_ID.fetch_add(1, Ordering::Relaxed);
        }
        // First caller seeds the counter.
        if NEXT_ID
            .compare_exchange(0, seed(), Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            continue;
        }
    }
}

/// Mint a fresh monotonic timestamp.
pub fn next_timestamp() -> u64 {
    NEXT_TIMESTAMP.fetch_add(1, Ordering::Relaxed) + 1
}

/// Identifier of an assertion in the TMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssertionId(pub u64);

impl AssertionId {
    pub fn fresh() -> Self {
        AssertionId(next_id())
    }
}

impl fmt::Display for AssertionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// Identifier of a note. Notes own one KB each.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(pub SmolStr);

impl NoteId {
    pub fn new(id: impl Into<SmolStr>) -> Self {
        NoteId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a knowledge base: the global KB or one note's KB.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KbId(pub SmolStr);

impl KbId {
    pub const GLOBAL: &str = "global";

    pub fn global() -> Self {
        KbId(SmolStr::new_static(Self::GLOBAL))
    }

    pub fn note(note: &NoteId) -> Self {
        KbId(note.0.clone())
    }

    pub fn is_global(&self) -> bool {
        self.0 == Self::GLOBAL
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// ASSERTION
// ============================================================================

/// Term class of an assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssertionType {
    /// No quantifier, no skolem symbols.
    Ground,
    /// A `forall` formula with quantified variables.
    Universal,
    /// Ground apart from introduced skolem symbols.
    Skolemized,
}

/// A fact or quantified formula known to the system.
#[derive(Debug)]
pub struct Assertion {
    pub id: AssertionId,
    /// Always a list.
    pub term: Term,
    /// Higher is more important; drives eviction and derivation priority.
    pub priority: f64,
    /// Monotonic creation stamp; older is smaller.
    pub timestamp: u64,
    pub source_note: Option<NoteId>,
    /// Ids of the assertions that directly supported this one.
    pub justifications: Vec<AssertionId>,
    pub ty: AssertionType,
    pub is_equality: bool,
    pub is_oriented_equality: bool,
    pub is_negated: bool,
    /// Non-empty only for [`AssertionType::Universal`].
    pub quantified_vars: Vec<SmolStr>,
    /// 0 for external input, else 1 + max depth among justifications.
    pub depth: u32,
    pub kb: KbId,
    active: AtomicBool,
}

impl Assertion {
    /// Rebuild a record from persisted fields. Used by snapshot load.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: AssertionId,
        term: Term,
        priority: f64,
        timestamp: u64,
        source_note: Option<NoteId>,
        justifications: Vec<AssertionId>,
        ty: AssertionType,
        quantified_vars: Vec<SmolStr>,
        depth: u32,
        kb: KbId,
        active: bool,
    ) -> Assertion {
        let (is_equality, is_oriented_equality) = equality_flags(&term);
        let is_negated = term.is_negated();
        Assertion {
            id,
            term,
            priority,
            timestamp,
            source_note,
            justifications,
            ty,
            is_equality,
            is_oriented_equality,
            is_negated,
            quantified_vars,
            depth,
            kb,
            active: AtomicBool::new(active),
        }
    }

    /// Whether the TMS currently holds this assertion active.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Flip the active flag. The TMS is the single caller.
    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// The term this assertion effectively states, for indexing and reading:
    /// the inner term for negated ground/skolemized assertions, the body
    /// under `forall` for universals, otherwise the full term.
    pub fn effective_term(&self) -> &Term {
        effective_term_of(&self.term, self.ty)
    }

    /// Atoms appearing in head position anywhere in the effective term.
    pub fn referenced_predicates(&self) -> FxHashSet<SmolStr> {
        let mut out = FxHashSet::default();
        collect_head_atoms(self.effective_term(), &mut out);
        out
    }
}

/// See [`Assertion::effective_term`].
pub fn effective_term_of(term: &Term, ty: AssertionType) -> &Term {
    match ty {
        AssertionType::Universal => forall_body(term).unwrap_or(term),
        AssertionType::Ground | AssertionType::Skolemized => {
            term.negation_inner().unwrap_or(term)
        }
    }
}

/// The body of `(forall (vars…) body)`.
pub fn forall_body(term: &Term) -> Option<&Term> {
    let children = term.children()?;
    if children.len() == 3 && term.operator().is_some_and(|op| op == OP_FORALL) {
        Some(&children[2])
    } else {
        None
    }
}

/// The variables bound by a quantifier form `(forall|exists vars body)`,
/// where `vars` is a single variable or a list of variables.
pub fn quantifier_vars(term: &Term) -> Vec<SmolStr> {
    let Some(children) = term.children() else {
        return Vec::new();
    };
    let Some(binder) = children.get(1) else {
        return Vec::new();
    };
    if let Some(name) = binder.as_variable() {
        return vec![name.clone()];
    }
    binder.children()
        .map(|vars| {
            vars.iter()
                .filter_map(|v| v.as_variable().cloned())
                .collect()
        })
        .unwrap_or_default()
}

fn collect_head_atoms(term: &Term, out: &mut FxHashSet<SmolStr>) {
    if let Some(children) = term.children() {
        if let Some(op) = term.operator() {
            out.insert(op.clone());
        }
        for child in children {
            collect_head_atoms(child, out);
        }
    }
}

impl Serialize for Assertion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Assertion", 13)?;
        s.serialize_field("id", &self.id)?;
        s.serialize_field("term", &self.term)?;
        s.serialize_field("priority", &self.priority)?;
        s.serialize_field("timestamp", &self.timestamp)?;
        s.serialize_field("sourceNoteId", &self.source_note)?;
        s.serialize_field("justifications", &self.justifications)?;
        s.serialize_field("type", &self.ty)?;
        s.serialize_field("isEquality", &self.is_equality)?;
        s.serialize_field("isOrientedEquality", &self.is_oriented_equality)?;
        s.serialize_field("isNegated", &self.is_negated)?;
        s.serialize_field("quantifiedVars", &self.quantified_vars)?;
        s.serialize_field("derivationDepth", &self.depth)?;
        s.serialize_field("kbId", &self.kb)?;
        s.serialize_field("isActive", &self.is_active())?;
        s.end()
    }
}

// ============================================================================
// POTENTIAL ASSERTION
// ============================================================================

/// What reasoners propose and what a KB commit turns into an [`Assertion`]
/// (or rejects): the same shape minus id, timestamp, active flag, and owner.
#[derive(Debug, Clone, PartialEq)]
pub struct PotentialAssertion {
    pub term: Term,
    pub priority: f64,
    pub source_note: Option<NoteId>,
    pub justifications: Vec<AssertionId>,
    pub ty: AssertionType,
    pub is_equality: bool,
    pub is_oriented_equality: bool,
    pub is_negated: bool,
    pub quantified_vars: Vec<SmolStr>,
    pub depth: u32,
}

impl PotentialAssertion {
    /// A ground (or skolemized, after commit-time promotion) proposal.
    /// Equality and negation flags are derived from the term.
    pub fn ground(term: Term, priority: f64) -> Self {
        let (is_equality, is_oriented) = equality_flags(&term);
        let is_negated = term.is_negated();
        Self {
            term,
            priority,
            source_note: None,
            justifications: Vec::new(),
            ty: AssertionType::Ground,
            is_equality,
            is_oriented_equality: is_oriented,
            is_negated,
            quantified_vars: Vec::new(),
            depth: 0,
        }
    }

    /// A universal proposal for a `(forall (vars…) body)` term.
    pub fn universal(term: Term, priority: f64, quantified_vars: Vec<SmolStr>) -> Self {
        debug_assert!(forall_body(&term).is_some(), "universal term must be a forall");
        debug_assert!(!quantified_vars.is_empty());
        Self {
            term,
            priority,
            source_note: None,
            justifications: Vec::new(),
            ty: AssertionType::Universal,
            is_equality: false,
            is_oriented_equality: false,
            is_negated: false,
            quantified_vars,
            depth: 0,
        }
    }

    pub fn with_source(mut self, source_note: Option<NoteId>) -> Self {
        self.source_note = source_note;
        self
    }

    pub fn with_support(mut self, justifications: Vec<AssertionId>, depth: u32) -> Self {
        self.justifications = justifications;
        self.justifications.sort_unstable();
        self.justifications.dedup();
        self.depth = depth;
        self
    }

    /// Build the committed record. Called by the KB once id, timestamp,
    /// final type, and owner are decided.
    pub(crate) fn into_assertion(
        self,
        id: AssertionId,
        timestamp: u64,
        ty: AssertionType,
        kb: KbId,
    ) -> Assertion {
        Assertion {
            id,
            term: self.term,
            priority: self.priority,
            timestamp,
            source_note: self.source_note,
            justifications: self.justifications,
            ty,
            is_equality: self.is_equality,
            is_oriented_equality: self.is_oriented_equality,
            is_negated: self.is_negated,
            quantified_vars: self.quantified_vars,
            depth: self.depth,
            kb,
            active: AtomicBool::new(true),
        }
    }

    /// See [`Assertion::effective_term`].
    pub fn effective_term(&self) -> &Term {
        effective_term_of(&self.term, self.ty)
    }
}

/// `(= L R)`: equality; oriented when arity 3 and `weight(L) > weight(R)`.
pub fn equality_flags(term: &Term) -> (bool, bool) {
    let is_equality = term.operator().is_some_and(|op| op == OP_EQUAL);
    let oriented = is_equality
        && term.children().is_some_and(|children| {
            children.len() == 3 && children[1].weight() > children[2].weight()
        });
    (is_equality, oriented)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::parse_term;

    #[test]
    fn ids_are_monotonic() {
        let a = next_id();
        let b = next_id();
        assert!(b > a);
    }

    #[test]
    fn equality_orientation_requires_heavier_left() {
        let oriented = parse_term("(= (f a b) c)").unwrap();
        let flat = parse_term("(= a b)").unwrap();
        assert_eq!(equality_flags(&oriented), (true, true));
        assert_eq!(equality_flags(&flat), (true, false));
    }

    #[test]
    fn effective_term_strips_negation() {
        let term = parse_term("(not (p a))").unwrap();
        let potential = PotentialAssertion::ground(term, 1.0);
        assert!(potential.is_negated);
        assert_eq!(potential.effective_term().kif(), "(p a)");
    }

    #[test]
    fn effective_term_of_universal_is_forall_body() {
        let term = parse_term("(forall (?x) (p ?x))").unwrap();
        let potential = PotentialAssertion::universal(term, 1.0, vec!["?x".into()]);
        assert_eq!(potential.effective_term().kif(), "(p ?x)");
    }

    #[test]
    fn referenced_predicates_walks_heads() {
        let term = parse_term("(p (q a) (r (s b)))").unwrap();
        let assertion =
            PotentialAssertion::ground(term, 1.0).into_assertion(
                AssertionId::fresh(),
                next_timestamp(),
                AssertionType::Ground,
                KbId::global(),
            );
        let predicates = assertion.referenced_predicates();
        for name in ["p", "q", "r", "s"] {
            assert!(predicates.contains(name), "missing {name}");
        }
    }
}
