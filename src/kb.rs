//! Per-KB assertion store with capacity-bounded eviction.
//!
//! A knowledge base owns the structural indices over its assertions (the
//! path index for ground and skolemized terms, the predicate map for
//! universals) and the priority-ordered eviction queue. The assertion
//! records themselves live in the TMS; a KB's size is the number of active
//! TMS assertions it owns.
//!
//! All writes go through one reader-writer lock. Events are collected while
//! the lock is held and emitted after it drops, so listeners (including the
//! reasoners and this KB's own index maintenance) may re-enter `commit`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use tracing::{debug, error, warn};

use crate::assertion::{Assertion, AssertionId, AssertionType, KbId, PotentialAssertion, next_timestamp};
use crate::config::{KB_CRITICAL_THRESHOLD, KB_WARN_THRESHOLD};
use crate::events::{EngineEvent, EventBus, EventKind};
use crate::index::PathIndex;
use crate::term::Term;
use crate::tms::Tms;
use crate::unify::{is_trivial, match_terms, Bindings};

/// Eviction order: lowest priority first, oldest timestamp on ties.
#[derive(Debug, Clone, Copy)]
struct EvictionEntry {
    priority: f64,
    timestamp: u64,
    id: AssertionId,
}

impl PartialEq for EvictionEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EvictionEntry {}

impl PartialOrd for EvictionEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EvictionEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the maximum; invert so the weakest, oldest entry
        // surfaces first.
        self.priority
            .total_cmp(&other.priority)
            .then(self.timestamp.cmp(&other.timestamp))
            .reverse()
    }
}

#[derive(Default)]
struct KbInner {
    path: PathIndex,
    /// Predicate symbol → universal assertions referencing it.
    universal: FxHashMap<SmolStr, FxHashSet<AssertionId>>,
    evictable: BinaryHeap<EvictionEntry>,
}

/// One knowledge base: the global KB or a note's KB.
pub struct KnowledgeBase {
    id: KbId,
    capacity: usize,
    tms: Arc<Tms>,
    bus: Arc<EventBus>,
    inner: RwLock<KbInner>,
}

impl KnowledgeBase {
    /// Create the KB and register its index-maintenance listeners: every KB
    /// reacts to retraction and status-change events for assertions it owns.
    pub fn new(id: KbId, capacity: usize, tms: Arc<Tms>, bus: Arc<EventBus>) -> Arc<Self> {
        let kb = Arc::new(Self {
            id,
            capacity,
            tms,
            bus: bus.clone(),
            inner: RwLock::new(KbInner::default()),
        });

        let weak = Arc::downgrade(&kb);
        bus.subscribe(EventKind::Retracted, move |event| {
            let Some(kb) = weak.upgrade() else { return };
            if let EngineEvent::Retracted { assertion, kb_id, .. } = event {
                if *kb_id == kb.id {
                    kb.unindex(assertion);
                }
            }
        });

        let weak = Arc::downgrade(&kb);
        bus.subscribe(EventKind::AssertionStateChanged, move |event| {
            let Some(kb) = weak.upgrade() else { return };
            let EngineEvent::AssertionStateChanged {
                assertion_id,
                is_active,
                kb_id,
            } = event
            else {
                return;
            };
            if *kb_id != kb.id {
                return;
            }
            let Some(assertion) = kb.tms.get(*assertion_id) else {
                return;
            };
            if *is_active {
                kb.index(&assertion);
            } else {
                kb.unindex(&assertion);
            }
        });

        kb
    }

    pub fn id(&self) -> &KbId {
        &self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Active assertions owned by this KB.
    pub fn count(&self) -> usize {
        self.tms.active_count(&self.id)
    }

    // ========================================================================
    // COMMIT
    // ========================================================================

    /// Turn a potential assertion into a committed one, or reject it.
    ///
    /// Rejections are silent toward the caller (`None`): trivial terms,
    /// exact duplicates, subsumed terms, and capacity exhaustion all merely
    /// log. A successful commit emits `Asserted` after the write lock drops.
    pub fn commit(&self, potential: PotentialAssertion, source: &str) -> Option<Arc<Assertion>> {
        let mut events = Vec::new();
        let committed = self.commit_inner(potential, source, &mut events);
        self.bus.emit_all(events);
        committed
    }

    fn commit_inner(
        &self,
        potential: PotentialAssertion,
        source: &str,
        events: &mut Vec<EngineEvent>,
    ) -> Option<Arc<Assertion>> {
        if !potential.term.is_list() {
            warn!("rejecting non-list assertion from {source}: {}", potential.term);
            return None;
        }
        if is_trivial(&potential.term) {
            debug!("dropping trivial term from {source}: {}", potential.term);
            return None;
        }

        let mut inner = self.inner.write();

        // A ground proposal that mentions skolem symbols is skolemized.
        let ty = if potential.ty == AssertionType::Ground && potential.term.has_skolem() {
            AssertionType::Skolemized
        } else {
            potential.ty
        };

        if !self.tms.active_with_term(&potential.term, &self.id).is_empty() {
            debug!("duplicate already active in {}: {}", self.id, potential.term);
            return None;
        }

        if self.is_subsumed(&inner, &potential) {
            debug!("subsumed in {}: {}", self.id, potential.term);
            return None;
        }

        while self.tms.active_count(&self.id) >= self.capacity {
            if !self.evict_one(&mut inner, events) {
                warn!(
                    "KB {} full ({} / {}); rejecting {}",
                    self.id,
                    self.tms.active_count(&self.id),
                    self.capacity,
                    potential.term
                );
                return None;
            }
        }

        let assertion = potential.into_assertion(
            AssertionId::fresh(),
            next_timestamp(),
            ty,
            self.id.clone(),
        );
        let assertion = self.tms.add_pending(assertion, events)?;

        if assertion.is_active() {
            index_into(&mut inner, &assertion);
        }
        events.push(EngineEvent::Asserted {
            assertion: assertion.clone(),
            kb_id: self.id.clone(),
        });

        let count = self.tms.active_count(&self.id);
        if count as f64 >= self.capacity as f64 * KB_CRITICAL_THRESHOLD {
            error!("KB {} nearly full: {count} / {}", self.id, self.capacity);
        } else if count as f64 >= self.capacity as f64 * KB_WARN_THRESHOLD {
            warn!("KB {} filling up: {count} / {}", self.id, self.capacity);
        }
        Some(assertion)
    }

    /// Step 4 of the commit pipeline: is some active ground/skolemized
    /// assertion with the same polarity a generalization of the proposal?
    /// The existing assertion's effective term is matched against the full
    /// proposed term.
    fn is_subsumed(&self, inner: &KbInner, potential: &PotentialAssertion) -> bool {
        let candidates = inner.path.find_generalizations_of(&potential.term);
        candidates.into_iter().any(|id| {
            self.tms.get(id).is_some_and(|existing| {
                existing.is_active()
                    && matches!(
                        existing.ty,
                        AssertionType::Ground | AssertionType::Skolemized
                    )
                    && existing.is_negated == potential.is_negated
                    && match_terms(existing.effective_term(), &potential.term, &Bindings::new())
                        .is_some()
            })
        })
    }

    /// Retract the weakest evictable assertion. False when nothing is left
    /// to evict.
    fn evict_one(&self, inner: &mut KbInner, events: &mut Vec<EngineEvent>) -> bool {
        while let Some(entry) = inner.evictable.pop() {
            // Entries are lazily invalidated: the assertion may be gone or
            // inactive by now.
            let Some(victim) = self.tms.get(entry.id).filter(|a| a.is_active()) else {
                continue;
            };
            debug!("evicting {} from {}: {}", victim.id, self.id, victim.term);
            self.tms.retract_pending(victim.id, "eviction", events);
            unindex_from(inner, &victim);
            events.push(EngineEvent::AssertionEvicted {
                assertion: victim,
                kb_id: self.id.clone(),
            });
            return true;
        }
        false
    }

    // ========================================================================
    // RETRACT / CLEAR
    // ========================================================================

    /// Retract by id. Index maintenance happens through the events the TMS
    /// fires, which every KB listens to.
    pub fn retract(&self, id: AssertionId, reason: impl Into<SmolStr>) {
        self.tms.retract(id, reason);
    }

    /// Retract every assertion owned by this KB, then drop the indices.
    pub fn clear(&self, reason: impl Into<SmolStr>) {
        let reason = reason.into();
        for assertion in self.tms.assertions_in(&self.id) {
            self.tms.retract(assertion.id, reason.clone());
        }
        let mut inner = self.inner.write();
        inner.path.clear();
        inner.universal.clear();
        inner.evictable.clear();
    }

    // ========================================================================
    // READ VIEW
    // ========================================================================

    /// Active assertions whose term might unify with `query` (candidates;
    /// callers apply `unify` as the final filter).
    pub fn unifiable_candidates(&self, query: &Term) -> Vec<Arc<Assertion>> {
        self.resolve(self.inner.read().path.find_unifiable(query))
    }

    /// Active assertions that the pattern may generalize.
    pub fn instance_candidates(&self, pattern: &Term) -> Vec<Arc<Assertion>> {
        self.resolve(self.inner.read().path.find_instances_of(pattern))
    }

    /// Active universal assertions referencing the given predicate.
    pub fn universals_referencing(&self, predicate: &str) -> Vec<Arc<Assertion>> {
        let ids: Vec<AssertionId> = self
            .inner
            .read()
            .universal
            .get(predicate)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        ids.into_iter()
            .filter_map(|id| self.tms.get(id))
            .filter(|a| a.is_active())
            .collect()
    }

    /// Every active assertion owned by this KB.
    pub fn active_assertions(&self) -> Vec<Arc<Assertion>> {
        self.tms
            .assertions_in(&self.id)
            .into_iter()
            .filter(|a| a.is_active())
            .collect()
    }

    /// Rebuild the indices from the TMS, e.g. after a snapshot load.
    pub fn rebuild_indices(&self) {
        let mut inner = self.inner.write();
        inner.path.clear();
        inner.universal.clear();
        inner.evictable.clear();
        for assertion in self.tms.assertions_in(&self.id) {
            if assertion.is_active() {
                index_into(&mut inner, &assertion);
            }
        }
    }

    fn resolve(&self, ids: FxHashSet<AssertionId>) -> Vec<Arc<Assertion>> {
        ids.into_iter()
            .filter_map(|id| self.tms.get(id))
            .filter(|a| a.is_active())
            .collect()
    }

    fn index(&self, assertion: &Arc<Assertion>) {
        index_into(&mut self.inner.write(), assertion);
    }

    fn unindex(&self, assertion: &Arc<Assertion>) {
        unindex_from(&mut self.inner.write(), assertion);
    }
}

/// Ground and skolemized assertions are path-indexed by effective term;
/// universals are recorded under every predicate their body references.
/// Only ground and skolemized assertions are evictable.
fn index_into(inner: &mut KbInner, assertion: &Arc<Assertion>) {
    match assertion.ty {
        AssertionType::Ground | AssertionType::Skolemized => {
            inner.path.insert(assertion.effective_term(), assertion.id);
            inner.evictable.push(EvictionEntry {
                priority: assertion.priority,
                timestamp: assertion.timestamp,
                id: assertion.id,
            });
        }
        AssertionType::Universal => {
            for predicate in assertion.referenced_predicates() {
                inner
                    .universal
                    .entry(predicate)
                    .or_default()
                    .insert(assertion.id);
            }
        }
    }
}

fn unindex_from(inner: &mut KbInner, assertion: &Arc<Assertion>) {
    match assertion.ty {
        AssertionType::Ground | AssertionType::Skolemized => {
            inner.path.remove(assertion.effective_term(), assertion.id);
            // Eviction entries are invalidated lazily on pop.
        }
        AssertionType::Universal => {
            for predicate in assertion.referenced_predicates() {
                if let Some(ids) = inner.universal.get_mut(&predicate) {
                    ids.remove(&assertion.id);
                    if ids.is_empty() {
                        inner.universal.remove(&predicate);
                    }
                }
            }
        }
    }
}

// ============================================================================
// REGISTRY AND ACTIVE CONTEXT
// ============================================================================

/// Lazily-created knowledge bases, one per referenced KB id.
pub struct KbRegistry {
    tms: Arc<Tms>,
    bus: Arc<EventBus>,
    config: Arc<RwLock<crate::config::EngineConfig>>,
    kbs: RwLock<FxHashMap<KbId, Arc<KnowledgeBase>>>,
}

impl KbRegistry {
    pub fn new(
        tms: Arc<Tms>,
        bus: Arc<EventBus>,
        config: Arc<RwLock<crate::config::EngineConfig>>,
    ) -> Self {
        Self {
            tms,
            bus,
            config,
            kbs: RwLock::new(FxHashMap::default()),
        }
    }

    /// The KB for `id`, created on first reference.
    pub fn get_or_create(&self, id: &KbId) -> Arc<KnowledgeBase> {
        if let Some(kb) = self.kbs.read().get(id) {
            return kb.clone();
        }
        let capacity = self.config.read().global_kb_capacity;
        let mut kbs = self.kbs.write();
        kbs.entry(id.clone())
            .or_insert_with(|| {
                KnowledgeBase::new(id.clone(), capacity, self.tms.clone(), self.bus.clone())
            })
            .clone()
    }

    pub fn get(&self, id: &KbId) -> Option<Arc<KnowledgeBase>> {
        self.kbs.read().get(id).cloned()
    }

    /// Empty and drop a note's KB.
    pub fn remove(&self, id: &KbId) {
        let removed = self.kbs.write().remove(id);
        if let Some(kb) = removed {
            kb.clear("note-removed");
        }
    }

    pub fn all(&self) -> Vec<Arc<KnowledgeBase>> {
        self.kbs.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.kbs.read().len()
    }

    /// Drop every KB without retracting (snapshot load clears the TMS
    /// wholesale).
    pub fn reset(&self) {
        self.kbs.write().clear();
    }
}

/// The set of note KBs participating in reasoning right now. The global KB
/// is always active.
#[derive(Default)]
pub struct ActiveContext {
    set: RwLock<FxHashSet<KbId>>,
}

impl ActiveContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, kb: &KbId) -> bool {
        kb.is_global() || self.set.read().contains(kb)
    }

    pub fn is_note_active(&self, note: Option<&crate::assertion::NoteId>) -> bool {
        match note {
            Some(note) => self.set.read().contains(&KbId::note(note)),
            // Knowledge without a source note belongs to the global context.
            None => true,
        }
    }

    pub fn activate(&self, kb: KbId) {
        self.set.write().insert(kb);
    }

    pub fn deactivate(&self, kb: &KbId) {
        self.set.write().remove(kb);
    }

    pub fn snapshot(&self) -> Vec<KbId> {
        self.set.read().iter().cloned().collect()
    }
}
