//! Justification-based truth maintenance.
//!
//! The TMS owns every assertion record and three relations over them: the
//! id→assertion map, each assertion's direct justifications, and the reverse
//! dependent edges. It is the single writer of the active flag. Retracting a
//! supported assertion removes it and re-evaluates its dependents, cascading
//! an inactive flip through everything that loses support.
//!
//! Mutators collect the events they cause into a caller-supplied sink and
//! never emit while the store lock is held; the convenience wrappers emit
//! after unlocking. The knowledge bases listen to those events for index
//! maintenance.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::assertion::{Assertion, AssertionId, KbId};
use crate::events::{EngineEvent, EventBus};
use crate::term::Term;

/// How a detected contradiction is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionPolicy {
    /// Report and do nothing.
    #[default]
    LogOnly,
    /// Retract the active conflicting assertions with minimum priority,
    /// breaking the tie toward the newest timestamp. A full tie retracts
    /// more than one.
    RetractWeakest,
}

#[derive(Default)]
struct TmsInner {
    assertions: FxHashMap<AssertionId, Arc<Assertion>>,
    justifications: FxHashMap<AssertionId, Vec<AssertionId>>,
    dependents: FxHashMap<AssertionId, FxHashSet<AssertionId>>,
    /// Full-term secondary index: exact-duplicate checks and contradiction
    /// lookup by complement term.
    by_term: FxHashMap<Term, FxHashSet<AssertionId>>,
    /// Active assertions per owning KB, kept in lockstep with flag flips.
    active_counts: FxHashMap<KbId, usize>,
}

impl TmsInner {
    fn bump_active(&mut self, kb: &KbId, delta: isize) {
        let count = self.active_counts.entry(kb.clone()).or_insert(0);
        *count = count.saturating_add_signed(delta);
    }
}

/// The truth-maintenance store.
pub struct Tms {
    bus: Arc<EventBus>,
    inner: RwLock<TmsInner>,
}

impl Tms {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            inner: RwLock::new(TmsInner::default()),
        }
    }

    // ========================================================================
    // WRITE PATH (event-sink variants; callers emit after their locks drop)
    // ========================================================================

    /// Admit an assertion with its justification edges.
    ///
    /// Rejects a duplicate id and rejects when any justification id is
    /// unknown. When the justification set is non-empty and not every
    /// justification is active, the assertion is admitted inactive.
    pub fn add_pending(
        &self,
        assertion: Assertion,
        events: &mut Vec<EngineEvent>,
    ) -> Option<Arc<Assertion>> {
        let mut inner = self.inner.write();
        if inner.assertions.contains_key(&assertion.id) {
            warn!("duplicate assertion id rejected: {}", assertion.id);
            return None;
        }
        for justification in &assertion.justifications {
            if !inner.assertions.contains_key(justification) {
                warn!(
                    "assertion {} cites unknown justification {justification}",
                    assertion.id
                );
                return None;
            }
        }

        let active = assertion.justifications.is_empty()
            || assertion
                .justifications
                .iter()
                .all(|j| inner.assertions[j].is_active());
        assertion.set_active(active);

        let assertion = Arc::new(assertion);
        let id = assertion.id;
        inner
            .justifications
            .insert(id, assertion.justifications.clone());
        for justification in &assertion.justifications {
            inner
                .dependents
                .entry(*justification)
                .or_default()
                .insert(id);
        }
        inner
            .by_term
            .entry(assertion.term.clone())
            .or_default()
            .insert(id);
        inner.assertions.insert(id, assertion.clone());

        if active {
            inner.bump_active(&assertion.kb, 1);
            detect_contradiction(&inner, &assertion, events);
        } else {
            events.push(EngineEvent::AssertionStateChanged {
                assertion_id: id,
                is_active: false,
                kb_id: assertion.kb.clone(),
            });
        }
        Some(assertion)
    }

    /// Remove an assertion and re-evaluate everything it supported.
    pub fn retract_pending(
        &self,
        id: AssertionId,
        reason: impl Into<SmolStr>,
        events: &mut Vec<EngineEvent>,
    ) -> Option<Arc<Assertion>> {
        let mut inner = self.inner.write();
        let mut visited = FxHashSet::default();
        retract_locked(&mut inner, id, &reason.into(), events, &mut visited)
    }

    /// Convenience wrapper: retract and emit the resulting events.
    pub fn retract(&self, id: AssertionId, reason: impl Into<SmolStr>) -> Option<Arc<Assertion>> {
        let mut events = Vec::new();
        let removed = self.retract_pending(id, reason, &mut events);
        self.bus.emit_all(events);
        removed
    }

    /// Resolve a detected contradiction under the given policy, emitting the
    /// retraction events it causes.
    pub fn resolve_contradiction(
        &self,
        conflicting: &[AssertionId],
        kb: &KbId,
        policy: ResolutionPolicy,
    ) {
        match policy {
            ResolutionPolicy::LogOnly => {
                warn!("contradiction in {kb}: {conflicting:?}");
            }
            ResolutionPolicy::RetractWeakest => {
                let mut events = Vec::new();
                {
                    let mut inner = self.inner.write();
                    let candidates: Vec<Arc<Assertion>> = conflicting
                        .iter()
                        .filter_map(|id| inner.assertions.get(id).cloned())
                        .filter(|a| a.is_active())
                        .collect();
                    let Some(min_priority) = candidates
                        .iter()
                        .map(|a| a.priority)
                        .min_by(f64::total_cmp)
                    else {
                        return;
                    };
                    let weakest: Vec<&Arc<Assertion>> = candidates
                        .iter()
                        .filter(|a| a.priority == min_priority)
                        .collect();
                    let newest = weakest.iter().map(|a| a.timestamp).max().unwrap_or(0);
                    let doomed: Vec<AssertionId> = weakest
                        .iter()
                        .filter(|a| a.timestamp == newest)
                        .map(|a| a.id)
                        .collect();
                    for id in doomed {
                        let mut visited = FxHashSet::default();
                        retract_locked(&mut inner, id, &"contradiction".into(), &mut events, &mut visited);
                    }
                }
                self.bus.emit_all(events);
            }
        }
    }

    /// Install a restored assertion set wholesale, recording justification
    /// and dependent edges as stored. Nothing is emitted.
    pub fn bulk_load(&self, assertions: Vec<Assertion>) {
        let mut inner = self.inner.write();
        for assertion in assertions {
            let assertion = Arc::new(assertion);
            let id = assertion.id;
            let justifications = assertion.justifications.clone();
            inner.justifications.insert(id, justifications.clone());
            for justification in justifications {
                inner.dependents.entry(justification).or_default().insert(id);
            }
            inner
                .by_term
                .entry(assertion.term.clone())
                .or_default()
                .insert(id);
            if assertion.is_active() {
                inner.bump_active(&assertion.kb, 1);
            }
            inner.assertions.insert(id, assertion);
        }
    }

    /// Drop everything. Used by snapshot load.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        *inner = TmsInner::default();
    }

    // ========================================================================
    // READ VIEW
    // ========================================================================

    pub fn get(&self, id: AssertionId) -> Option<Arc<Assertion>> {
        self.inner.read().assertions.get(&id).cloned()
    }

    pub fn is_active(&self, id: AssertionId) -> bool {
        self.inner
            .read()
            .assertions
            .get(&id)
            .is_some_and(|a| a.is_active())
    }

    /// Number of active assertions owned by `kb`.
    pub fn active_count(&self, kb: &KbId) -> usize {
        self.inner
            .read()
            .active_counts
            .get(kb)
            .copied()
            .unwrap_or(0)
    }

    /// Active assertions with exactly this term in this KB.
    pub fn active_with_term(&self, term: &Term, kb: &KbId) -> Vec<Arc<Assertion>> {
        let inner = self.inner.read();
        inner
            .by_term
            .get(term)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.assertions.get(id))
                    .filter(|a| a.is_active() && &a.kb == kb)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every assertion owned by `kb`, active or not.
    pub fn assertions_in(&self, kb: &KbId) -> Vec<Arc<Assertion>> {
        self.inner
            .read()
            .assertions
            .values()
            .filter(|a| &a.kb == kb)
            .cloned()
            .collect()
    }

    /// Every active assertion in the store.
    pub fn all_active(&self) -> Vec<Arc<Assertion>> {
        self.inner
            .read()
            .assertions
            .values()
            .filter(|a| a.is_active())
            .cloned()
            .collect()
    }

    pub fn dependents_of(&self, id: AssertionId) -> Vec<AssertionId> {
        self.inner
            .read()
            .dependents
            .get(&id)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().assertions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// LOCKED HELPERS
// ============================================================================

fn retract_locked(
    inner: &mut TmsInner,
    id: AssertionId,
    reason: &SmolStr,
    events: &mut Vec<EngineEvent>,
    visited: &mut FxHashSet<AssertionId>,
) -> Option<Arc<Assertion>> {
    if !visited.insert(id) {
        return None;
    }
    let assertion = inner.assertions.remove(&id)?;
    debug!("retracting {id} ({reason}): {}", assertion.term);

    let justifications = inner.justifications.remove(&id).unwrap_or_default();
    for justification in justifications {
        if let Some(dependents) = inner.dependents.get_mut(&justification) {
            dependents.remove(&id);
        }
    }
    if let Some(ids) = inner.by_term.get_mut(&assertion.term) {
        ids.remove(&id);
        if ids.is_empty() {
            inner.by_term.remove(&assertion.term);
        }
    }
    let dependents = inner.dependents.remove(&id).unwrap_or_default();

    if assertion.is_active() {
        assertion.set_active(false);
        inner.bump_active(&assertion.kb, -1);
        events.push(EngineEvent::Retracted {
            assertion: assertion.clone(),
            kb_id: assertion.kb.clone(),
            reason: reason.clone(),
        });
    } else {
        events.push(EngineEvent::AssertionStateChanged {
            assertion_id: id,
            is_active: false,
            kb_id: assertion.kb.clone(),
        });
    }

    for dependent in dependents {
        update_locked(inner, dependent, events, visited);
    }
    Some(assertion)
}

/// Recompute a dependent's active flag after a supporter changed.
fn update_locked(
    inner: &mut TmsInner,
    id: AssertionId,
    events: &mut Vec<EngineEvent>,
    visited: &mut FxHashSet<AssertionId>,
) {
    if !visited.insert(id) {
        return;
    }
    let Some(assertion) = inner.assertions.get(&id).cloned() else {
        return;
    };
    let active = inner.justifications.get(&id).is_some_and(|justs| {
        !justs.is_empty()
            && justs
                .iter()
                .all(|j| inner.assertions.get(j).is_some_and(|a| a.is_active()))
    });
    if active == assertion.is_active() {
        return;
    }
    assertion.set_active(active);
    inner.bump_active(&assertion.kb, if active { 1 } else { -1 });
    events.push(EngineEvent::AssertionStateChanged {
        assertion_id: id,
        is_active: active,
        kb_id: assertion.kb.clone(),
    });
    if active {
        detect_contradiction(inner, &assertion, events);
    }
    let dependents: Vec<AssertionId> = inner
        .dependents
        .get(&id)
        .map(|deps| deps.iter().copied().collect())
        .unwrap_or_default();
    for dependent in dependents {
        update_locked(inner, dependent, events, visited);
    }
}

/// When `assertion` becomes active, look for an active complement in the
/// same KB: `(not a)` for a positive `a`, the inner term for a negated one.
fn detect_contradiction(inner: &TmsInner, assertion: &Assertion, events: &mut Vec<EngineEvent>) {
    let complement = match assertion.term.negation_inner() {
        Some(positive) => positive.clone(),
        None => Term::negated(assertion.term.clone()),
    };
    let Some(ids) = inner.by_term.get(&complement) else {
        return;
    };
    for other in ids {
        if *other == assertion.id {
            continue;
        }
        let Some(existing) = inner.assertions.get(other) else {
            continue;
        };
        if existing.is_active() && existing.kb == assertion.kb {
            events.push(EngineEvent::ContradictionDetected {
                conflicting_ids: vec![assertion.id, *other],
                kb_id: assertion.kb.clone(),
            });
        }
    }
}
