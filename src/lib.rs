//! # noesis-core
//!
//! Core library for symbolic knowledge storage, truth maintenance, and
//! rule-based reasoning.
//!
//! Knowledge is written as S-expression terms, partitioned into named
//! knowledge bases (one global plus one per note), derived by rules, and kept
//! consistent by a justification-based truth maintenance system: retracting a
//! supporting assertion automatically invalidates everything that depended on
//! it.
//!
//! ## Module Structure (dependency order)
//!
//! ```text
//! engine    → wiring: input/retraction handling, queries, snapshot, status
//!   ↓
//! reason    → forward / rewrite / instantiation / backward strategies,
//!             operators, query dispatcher
//!   ↓
//! kb        → per-KB assertion store, capacity eviction, universal index
//!   ↓
//! tms       → justification graph, active/inactive flips, contradictions
//!   ↓
//! events    → typed and pattern-triggered publish/subscribe
//!   ↓
//! rules     → rule records, validation, concurrent rule set
//!   ↓
//! index     → structural path index (trie over term shape)
//!   ↓
//! unify     → unification, one-way matching, substitution, rewriting
//!   ↓
//! assertion → assertion records, identifiers
//!   ↓
//! term      → interned terms, KIF lexer and parser
//! ```

// ============================================================================
// MODULES (dependency order: term → assertion → unify → index → rules →
// events → tms → kb → reason → engine)
// ============================================================================

/// Interned terms: atoms, variables, lists; KIF lexer and parser
pub mod term;

/// Assertion records, potential assertions, identifiers
pub mod assertion;

/// Unification, one-way matching, substitution, rewriting
pub mod unify;

/// Structural path index for candidate retrieval
pub mod index;

/// Rule records, validation, concurrent rule set
pub mod rules;

/// Typed and pattern-triggered publish/subscribe
pub mod events;

/// Justification-based truth maintenance
pub mod tms;

/// Per-KB assertion store with capacity-bounded eviction
pub mod kb;

/// Reasoning strategies and the query dispatcher
pub mod reason;

/// Engine wiring: external interface, queries, snapshot
pub mod engine;

/// Engine configuration and hard limits
pub mod config;

/// Error types
pub mod error;

/// Snapshot persistence of notes, assertions, rules, and config
pub mod snapshot;

// Re-export the types nearly every caller needs
pub use assertion::{Assertion, AssertionId, AssertionType, KbId, NoteId, PotentialAssertion};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, ParseError};
pub use events::{Answer, AnswerStatus, EngineEvent, Query, QueryType};
pub use term::Term;
pub use unify::Bindings;
