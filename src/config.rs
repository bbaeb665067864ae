//! Engine configuration and hard resource limits.

use serde::{Deserialize, Serialize};

/// Recursion cap for substitution, unification, matching, and rewriting.
pub const MAX_TERM_RECURSION: u32 = 50;

/// Maximum weight (node count) of any derived term.
pub const MAX_DERIVED_WEIGHT: u32 = 150;

/// Fraction of KB capacity at which a warning is logged.
pub const KB_WARN_THRESHOLD: f64 = 0.90;

/// Fraction of KB capacity at which a critical log is emitted.
pub const KB_CRITICAL_THRESHOLD: f64 = 0.98;

/// Priority decay applied to every forward-chained or rewritten derivation.
pub const DERIVATION_PRIORITY_DECAY: f64 = 0.95;

/// How long the blocking query helper waits for an `Answer`.
pub const QUERY_SYNC_TIMEOUT_SECS: u64 = 60;

/// Configuration values consumed by the core.
///
/// Hosts may persist this record in the snapshot and re-install it on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Capacity of every KB (global and per-note), in active assertions.
    pub global_kb_capacity: usize,
    /// Maximum derivation depth for forward, rewrite, and universal
    /// instantiation reasoning.
    pub reasoning_depth_limit: u32,
    /// Default recursion depth for backward-chained queries.
    pub query_depth_limit: u32,
    /// Whether input assertions should be broadcast to external listeners.
    /// Not interpreted by the core; carried for hosts.
    pub broadcast_input_assertions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            global_kb_capacity: 4096,
            reasoning_depth_limit: 4,
            query_depth_limit: 8,
            broadcast_input_assertions: false,
        }
    }
}

impl EngineConfig {
    /// Config with a specific KB capacity, other values default.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            global_kb_capacity: capacity,
            ..Self::default()
        }
    }
}
