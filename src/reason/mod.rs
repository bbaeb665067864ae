//! Reasoning strategies and the query dispatcher.
//!
//! Four strategies share one [`ReasonerContext`]: forward chaining, equality
//! rewriting, and universal instantiation run synchronously inside the
//! `Asserted` event dispatch that triggered them; backward chaining is
//! goal-directed and asynchronous (operators may be). The dispatcher fans a
//! query out to every reasoner that supports its type and folds the answers.

pub mod backward;
pub mod dispatch;
pub mod forward;
pub mod instantiate;
pub mod operators;
pub mod rewrite;

use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::assertion::{
    Assertion, AssertionId, KbId, NoteId, PotentialAssertion, next_timestamp,
};
use crate::config::{DERIVATION_PRIORITY_DECAY, EngineConfig, MAX_DERIVED_WEIGHT};
use crate::events::{Answer, EngineEvent, EventBus, Query, QueryType};
use crate::kb::{ActiveContext, KbRegistry, KnowledgeBase};
use crate::rules::{Rule, RuleSet};
use crate::term::Term;
use crate::tms::Tms;
use crate::unify::is_trivial;

use operators::OperatorRegistry;

/// Boxed future returned by async reasoner surfaces.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Pseudo-KB owning rule axioms; it has no [`KnowledgeBase`] instance and
/// never participates in capacity or eviction.
pub const RULES_KB: &str = "rules";

/// A query-capable reasoner. The event-driven strategies also implement
/// this, reporting support for no query type.
pub trait Reasoner: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, ty: QueryType) -> bool;

    /// Answer a supported query. The returned future runs on the shared
    /// executor and must observe the context's cancellation token.
    fn answer(&self, query: Query) -> BoxFuture<Answer>;
}

/// Everything a reasoning strategy needs: the stores, the bus, the limits,
/// and the pause/stop switches.
pub struct ReasonerContext {
    pub config: Arc<RwLock<EngineConfig>>,
    pub bus: Arc<EventBus>,
    pub tms: Arc<Tms>,
    pub rules: Arc<RuleSet>,
    pub kbs: Arc<KbRegistry>,
    pub active: Arc<ActiveContext>,
    pub operators: Arc<OperatorRegistry>,
    /// Cancelled on engine stop; every outstanding query observes it.
    pub cancel: CancellationToken,
    /// Queries currently in flight on the executor.
    pub pending_queries: std::sync::atomic::AtomicUsize,
    pause_tx: watch::Sender<bool>,
    pause_rx: watch::Receiver<bool>,
}

impl ReasonerContext {
    pub fn new(
        config: Arc<RwLock<EngineConfig>>,
        bus: Arc<EventBus>,
        tms: Arc<Tms>,
        rules: Arc<RuleSet>,
        kbs: Arc<KbRegistry>,
        active: Arc<ActiveContext>,
        operators: Arc<OperatorRegistry>,
    ) -> Arc<Self> {
        let (pause_tx, pause_rx) = watch::channel(false);
        Arc::new(Self {
            config,
            bus,
            tms,
            rules,
            kbs,
            active,
            operators,
            cancel: CancellationToken::new(),
            pending_queries: std::sync::atomic::AtomicUsize::new(0),
            pause_tx,
            pause_rx,
        })
    }

    pub fn depth_limit(&self) -> u32 {
        self.config.read().reasoning_depth_limit
    }

    pub fn query_depth(&self) -> u32 {
        self.config.read().query_depth_limit
    }

    /// An assertion participates in reasoning when its KB or its source note
    /// is in the active set.
    pub fn in_active_context(&self, kb: &KbId, source_note: Option<&NoteId>) -> bool {
        self.active.is_active(kb)
            || source_note.is_some_and(|note| self.active.is_active(&KbId::note(note)))
    }

    /// The KBs a reasoning step reads: the current KB, every other active
    /// note KB, and the global KB. The current KB comes first.
    pub fn reasoning_kbs(&self, current: &KbId) -> Vec<Arc<KnowledgeBase>> {
        let mut out = vec![self.kbs.get_or_create(current)];
        for kb_id in self.active.snapshot() {
            if &kb_id != current {
                out.push(self.kbs.get_or_create(&kb_id));
            }
        }
        let global = KbId::global();
        if current != &global {
            out.push(self.kbs.get_or_create(&global));
        }
        out
    }

    /// Rules whose source note participates in reasoning and whose axiom is
    /// still active (a derived rule deactivates with its support).
    pub fn active_rules(&self) -> Vec<Arc<Rule>> {
        self.rules
            .all()
            .into_iter()
            .filter(|rule| {
                self.active.is_note_active(rule.source_note.as_ref())
                    && self.tms.is_active(rule.axiom)
            })
            .collect()
    }

    // ========================================================================
    // PAUSE / STOP
    // ========================================================================

    pub fn set_paused(&self, paused: bool) {
        let _ = self.pause_tx.send(paused);
    }

    pub fn is_paused(&self) -> bool {
        *self.pause_rx.borrow()
    }

    /// Block until un-paused or the engine stops.
    pub async fn wait_if_paused(&self) {
        let mut rx = self.pause_rx.clone();
        while *rx.borrow() {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = rx.changed() => {
                    if result.is_err() {
                        return;
                    }
                }
            }
        }
    }

    // ========================================================================
    // DERIVATION SUPPORT
    // ========================================================================

    /// Priority, depth, and common source note aggregated over a support
    /// set: priority is the minimum decayed by ×0.95, depth is 1 + the
    /// maximum, and the source note is the one every supporter shares (else
    /// none). `None` when a supporter is unknown.
    pub fn support_profile(&self, support: &[AssertionId]) -> Option<SupportProfile> {
        let mut profile = SupportProfile {
            priority: f64::INFINITY,
            depth: 0,
            source_note: None,
        };
        let mut first = true;
        for id in support {
            let assertion = self.tms.get(*id)?;
            profile.priority = profile.priority.min(assertion.priority);
            profile.depth = profile.depth.max(assertion.depth + 1);
            if first {
                profile.source_note = assertion.source_note.clone();
                first = false;
            } else if profile.source_note != assertion.source_note {
                profile.source_note = None;
            }
        }
        if first {
            return None;
        }
        profile.priority *= DERIVATION_PRIORITY_DECAY;
        Some(profile)
    }

    /// Commit a derivation after enforcing the derived-term gates: list
    /// shape, groundness for non-universals, weight, and depth.
    pub fn commit_derivation(
        &self,
        kb: &KbId,
        potential: PotentialAssertion,
        source: &str,
    ) -> Option<Arc<Assertion>> {
        if !potential.term.is_list() {
            return None;
        }
        if potential.ty != crate::assertion::AssertionType::Universal
            && potential.term.has_variable()
        {
            debug!("dropping non-ground derivation: {}", potential.term);
            return None;
        }
        if potential.term.weight() > MAX_DERIVED_WEIGHT {
            debug!("dropping overweight derivation: {}", potential.term);
            return None;
        }
        if potential.depth > self.depth_limit() {
            debug!("dropping too-deep derivation: {}", potential.term);
            return None;
        }
        if is_trivial(&potential.term) {
            return None;
        }
        self.kbs.get_or_create(kb).commit(potential, source)
    }

    // ========================================================================
    // RULE REGISTRATION
    // ========================================================================

    /// Register a rule form: add its TMS axiom (supported by
    /// `justifications`, empty for external rules), validate, and insert
    /// into the rule set. An equivalence also registers the reverse
    /// implication, justified by the equivalence's axiom.
    ///
    /// Returns `None` for duplicates and invalid forms.
    pub fn add_rule(
        &self,
        form: Term,
        priority: f64,
        source_note: Option<NoteId>,
        justifications: Vec<AssertionId>,
        depth: u32,
    ) -> Option<Arc<Rule>> {
        if !Rule::is_rule_form(&form) {
            warn!("rejecting rule form: {form}");
            return None;
        }
        if self.rules.find_by_form(&form).is_some() {
            debug!("rule already registered: {form}");
            return None;
        }

        let mut events = Vec::new();
        let axiom = PotentialAssertion::ground(form.clone(), priority)
            .with_source(source_note.clone())
            .with_support(justifications, depth)
            .into_assertion(
                AssertionId::fresh(),
                next_timestamp(),
                crate::assertion::AssertionType::Ground,
                KbId(smol_str::SmolStr::new_static(RULES_KB)),
            );
        let axiom = self.tms.add_pending(axiom, &mut events)?;

        let rule = match Rule::new(form, priority, source_note.clone(), axiom.id) {
            Ok(rule) => rule,
            Err(error) => {
                warn!("invalid rule dropped: {error}");
                self.tms.retract_pending(axiom.id, "invalid-rule", &mut events);
                self.bus.emit_all(events);
                return None;
            }
        };
        let Some(rule) = self.rules.add(rule) else {
            self.tms.retract_pending(axiom.id, "duplicate-rule", &mut events);
            self.bus.emit_all(events);
            return None;
        };
        events.push(EngineEvent::RuleAdded { rule: rule.clone() });
        self.bus.emit_all(events);

        if rule.form.operator().is_some_and(|op| op == crate::term::OP_IFF) {
            let reverse = Term::list(vec![
                Term::atom(crate::term::OP_IMPLIES),
                rule.consequent.clone(),
                rule.antecedent.clone(),
            ]);
            self.add_rule(
                reverse,
                priority,
                source_note,
                vec![rule.axiom],
                depth.saturating_add(1),
            );
        }
        Some(rule)
    }

    /// Remove a rule and retract its axiom, cascading into everything the
    /// rule derived.
    pub fn remove_rule(&self, rule: &Arc<Rule>) {
        if self.rules.remove(rule.id).is_some() {
            self.bus.emit(EngineEvent::RuleRemoved { rule: rule.clone() });
        }
        self.tms.retract(rule.axiom, "rule-removed");
    }
}

/// Aggregate provenance of a support set.
#[derive(Debug, Clone, PartialEq)]
pub struct SupportProfile {
    pub priority: f64,
    pub depth: u32,
    pub source_note: Option<NoteId>,
}
