//! Engine wiring: the external interface of the reasoning core.
//!
//! The engine assembles the stores, the event bus, and the reasoners, and
//! consumes the boundary events: `ExternalInput` terms become rules or
//! assertions, `RetractionRequest`s remove them, `Query` events are answered
//! asynchronously. Hosts may equally call the corresponding methods
//! directly; every state change is still announced on the bus.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, warn};

use crate::assertion::{Assertion, KbId, NoteId, PotentialAssertion, quantifier_vars};
use crate::config::{EngineConfig, QUERY_SYNC_TIMEOUT_SECS};
use crate::error::EngineError;
use crate::events::{
    Answer, EngineEvent, EventBus, EventKind, Query, QueryType, RetractionTarget,
};
use crate::kb::{ActiveContext, KbRegistry};
use crate::reason::backward::BackwardChainer;
use crate::reason::dispatch::QueryDispatcher;
use crate::reason::forward::ForwardChainer;
use crate::reason::instantiate::UniversalInstantiator;
use crate::reason::operators::OperatorRegistry;
use crate::reason::rewrite::RewriteReasoner;
use crate::reason::{RULES_KB, Reasoner, ReasonerContext};
use crate::rules::{Rule, RuleSet};
use crate::snapshot::Note;
use crate::term::{OP_FORALL, Term, parse_terms};
use crate::tms::{ResolutionPolicy, Tms};
use crate::unify::is_trivial;

/// Priority assigned to externally supplied input when the host gives none.
pub const DEFAULT_INPUT_PRIORITY: f64 = 1.0;

/// The reasoning engine.
pub struct Engine {
    config: Arc<RwLock<EngineConfig>>,
    bus: Arc<EventBus>,
    tms: Arc<Tms>,
    rules: Arc<RuleSet>,
    kbs: Arc<KbRegistry>,
    active: Arc<ActiveContext>,
    ctx: Arc<ReasonerContext>,
    dispatcher: Arc<QueryDispatcher>,
    resolution: RwLock<ResolutionPolicy>,
    notes: RwLock<FxHashMap<NoteId, Note>>,
    // Owns the runtime when the host did not supply one.
    _owned_runtime: Option<Runtime>,
    // Subscriptions hold weak references; the engine keeps the strategies
    // alive.
    _forward: Arc<ForwardChainer>,
    _rewrite: Arc<RewriteReasoner>,
    _instantiate: Arc<UniversalInstantiator>,
}

impl Engine {
    /// Build an engine with its own multi-thread runtime.
    pub fn new(config: EngineConfig) -> Arc<Engine> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("runtime construction cannot fail with default settings");
        let handle = runtime.handle().clone();
        Self::build(config, handle, Some(runtime))
    }

    /// Build an engine on a host-provided runtime.
    pub fn with_runtime(config: EngineConfig, runtime: Handle) -> Arc<Engine> {
        Self::build(config, runtime, None)
    }

    fn build(config: EngineConfig, runtime: Handle, owned: Option<Runtime>) -> Arc<Engine> {
        let config = Arc::new(RwLock::new(config));
        let bus = Arc::new(EventBus::new());
        let tms = Arc::new(Tms::new(bus.clone()));
        let rules = Arc::new(RuleSet::new());
        let kbs = Arc::new(KbRegistry::new(tms.clone(), bus.clone(), config.clone()));
        let active = Arc::new(ActiveContext::new());
        let operators = Arc::new(OperatorRegistry::with_builtins());
        let ctx = ReasonerContext::new(
            config.clone(),
            bus.clone(),
            tms.clone(),
            rules.clone(),
            kbs.clone(),
            active.clone(),
            operators,
        );

        let forward = ForwardChainer::register(ctx.clone());
        let rewrite = RewriteReasoner::register(ctx.clone());
        let instantiate = UniversalInstantiator::register(ctx.clone());
        let backward = BackwardChainer::new(ctx.clone());
        let reasoners: Vec<Arc<dyn Reasoner>> = vec![
            forward.clone(),
            rewrite.clone(),
            instantiate.clone(),
            backward,
        ];
        let dispatcher = QueryDispatcher::register(ctx.clone(), reasoners, runtime.clone());

        let engine = Arc::new(Engine {
            config,
            bus: bus.clone(),
            tms,
            rules,
            kbs,
            active,
            ctx,
            dispatcher,
            resolution: RwLock::new(ResolutionPolicy::default()),
            notes: RwLock::new(FxHashMap::default()),
            _owned_runtime: owned,
            _forward: forward,
            _rewrite: rewrite,
            _instantiate: instantiate,
        });

        // Inbound boundary events.
        let weak = Arc::downgrade(&engine);
        bus.subscribe(EventKind::ExternalInput, move |event| {
            let Some(engine) = weak.upgrade() else { return };
            if let EngineEvent::ExternalInput {
                term,
                source_id,
                note_id,
            } = event
            {
                engine.assert_input(term.clone(), source_id, note_id.clone());
            }
        });

        let weak = Arc::downgrade(&engine);
        bus.subscribe(EventKind::RetractionRequest, move |event| {
            let Some(engine) = weak.upgrade() else { return };
            if let EngineEvent::RetractionRequest {
                target,
                source_id,
                note_id,
            } = event
            {
                engine.handle_retraction(target, source_id, note_id.as_ref());
            }
        });

        // Derived-rule axioms retract with their support; drop the rule too.
        let weak = Arc::downgrade(&engine);
        bus.subscribe(EventKind::Retracted, move |event| {
            let Some(engine) = weak.upgrade() else { return };
            if let EngineEvent::Retracted { assertion, kb_id, .. } = event {
                if kb_id.as_str() == RULES_KB {
                    if let Some(rule) = engine.rules.find_by_axiom(assertion.id) {
                        engine.rules.remove(rule.id);
                        engine.bus.emit(EngineEvent::RuleRemoved { rule });
                    }
                }
            }
        });

        // Contradictions resolve under the configured policy.
        let weak = Arc::downgrade(&engine);
        bus.subscribe(EventKind::ContradictionDetected, move |event| {
            let Some(engine) = weak.upgrade() else { return };
            if let EngineEvent::ContradictionDetected {
                conflicting_ids,
                kb_id,
            } = event
            {
                let policy = *engine.resolution.read();
                engine.tms.resolve_contradiction(conflicting_ids, kb_id, policy);
            }
        });

        engine
    }

    // ========================================================================
    // INPUT
    // ========================================================================

    /// Ingest one term: implications register as rules, `forall`-wrapped
    /// implications likewise, other `forall`s become universal assertions,
    /// everything else a ground assertion in the note's KB (or the global
    /// KB).
    pub fn assert_input(
        &self,
        term: Term,
        source: &str,
        note: Option<NoteId>,
    ) -> Option<Arc<Assertion>> {
        self.assert_input_with_priority(term, DEFAULT_INPUT_PRIORITY, source, note)
    }

    /// [`Engine::assert_input`] with an explicit priority.
    pub fn assert_input_with_priority(
        &self,
        term: Term,
        priority: f64,
        source: &str,
        note: Option<NoteId>,
    ) -> Option<Arc<Assertion>> {
        let kb = note
            .as_ref()
            .map(KbId::note)
            .unwrap_or_else(KbId::global);

        if Rule::is_rule_form(&term) {
            self.ctx.add_rule(term, priority, note, Vec::new(), 0);
            return None;
        }

        if term.operator().is_some_and(|op| op == OP_FORALL) {
            if let Some(body) = crate::assertion::forall_body(&term) {
                if Rule::is_rule_form(body) {
                    self.ctx
                        .add_rule(body.clone(), priority, note, Vec::new(), 0);
                    return None;
                }
            }
            let vars = quantifier_vars(&term);
            if !vars.is_empty() {
                let potential = PotentialAssertion::universal(term, priority, vars)
                    .with_source(note);
                return self.kbs.get_or_create(&kb).commit(potential, source);
            }
        }

        let potential = PotentialAssertion::ground(term, priority).with_source(note);
        self.kbs.get_or_create(&kb).commit(potential, source)
    }

    /// Announce a transient term to pattern subscribers without committing
    /// it to any KB.
    pub fn broadcast_temporary(&self, term: Term, source: &str, note: Option<NoteId>) {
        self.bus.emit(EngineEvent::TemporaryAssertion {
            term,
            source_id: SmolStr::new(source),
            note_id: note,
        });
    }

    /// Parse a KIF document (a rules file or pasted input) and ingest every
    /// top-level term. Parse errors reject single terms and are returned;
    /// the rest of the input still loads.
    pub fn load_kif(
        &self,
        input: &str,
        source: &str,
        note: Option<NoteId>,
    ) -> Vec<crate::error::ParseError> {
        let parsed = parse_terms(input);
        for term in parsed.terms {
            if is_trivial(&term) {
                debug!("skipping trivial input: {term}");
                continue;
            }
            self.assert_input(term, source, note.clone());
        }
        parsed.errors
    }

    // ========================================================================
    // RETRACTION
    // ========================================================================

    fn handle_retraction(
        &self,
        target: &RetractionTarget,
        source: &str,
        note: Option<&NoteId>,
    ) {
        match target {
            RetractionTarget::ById(id) => {
                self.tms.retract(*id, SmolStr::new(source));
            }
            RetractionTarget::ByKif(term) => {
                let kb = note.map(KbId::note).unwrap_or_else(KbId::global);
                for assertion in self.tms.active_with_term(term, &kb) {
                    self.tms.retract(assertion.id, SmolStr::new(source));
                }
            }
            RetractionTarget::ByRuleForm(form) => {
                if let Some(rule) = self.rules.find_by_form(form) {
                    self.ctx.remove_rule(&rule);
                } else {
                    warn!("no rule with form {form}");
                }
            }
            RetractionTarget::ByNote(note) => {
                self.remove_note(note);
            }
        }
    }

    /// Public retraction entry point mirroring the event.
    pub fn retract(&self, target: RetractionTarget, source: &str) {
        self.handle_retraction(&target, source, None);
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Answer a query on the shared executor and announce the answer.
    pub async fn query(&self, query: Query) -> Answer {
        let answer = self.dispatcher.dispatch(query).await;
        self.bus.emit(EngineEvent::Answer(answer.clone()));
        answer
    }

    /// Blocking query helper: registers a one-shot listener for the query
    /// id's `Answer`, emits the `Query` event, and waits up to 60 seconds.
    /// Must not be called from inside the runtime.
    pub fn query_sync(&self, query: Query) -> Result<Answer, EngineError> {
        let (tx, rx) = std::sync::mpsc::sync_channel::<Answer>(1);
        let wanted = query.id;
        let subscription = self.bus.subscribe(EventKind::Answer, move |event| {
            if let EngineEvent::Answer(answer) = event {
                if answer.query_id == wanted {
                    let _ = tx.try_send(answer.clone());
                }
            }
        });

        self.bus.emit(EngineEvent::Query(query));
        let outcome = rx.recv_timeout(Duration::from_secs(QUERY_SYNC_TIMEOUT_SECS));
        self.bus.unsubscribe(subscription);
        outcome.map_err(|_| EngineError::query("timed out waiting for answer"))
    }

    /// Convenience: ask for bindings against a pattern.
    pub async fn ask_bindings(&self, pattern: Term) -> Answer {
        self.query(Query::new(QueryType::AskBindings, pattern)).await
    }

    /// Convenience: is the pattern provable?
    pub async fn ask_true_false(&self, pattern: Term) -> Answer {
        self.query(Query::new(QueryType::AskTrueFalse, pattern)).await
    }

    // ========================================================================
    // NOTES AND ACTIVE CONTEXT
    // ========================================================================

    /// Create or update a note. Its KB exists lazily on first reference.
    pub fn upsert_note(&self, note: Note) {
        self.notes.write().insert(note.id.clone(), note);
    }

    /// Remove a note: empty its KB, drop its rules, forget it.
    pub fn remove_note(&self, note: &NoteId) {
        let kb = KbId::note(note);
        for rule in self.rules.remove_by_source(note) {
            self.bus.emit(EngineEvent::RuleRemoved { rule: rule.clone() });
            self.tms.retract(rule.axiom, "note-removed");
        }
        self.kbs.remove(&kb);
        self.active.deactivate(&kb);
        self.notes.write().remove(note);
    }

    pub fn notes(&self) -> Vec<Note> {
        self.notes.read().values().cloned().collect()
    }

    /// Membership predicate for the active set.
    pub fn is_active(&self, kb: &KbId) -> bool {
        self.active.is_active(kb)
    }

    pub fn set_note_active(&self, note: &NoteId, active: bool) {
        let kb = KbId::note(note);
        if active {
            self.active.activate(kb);
        } else {
            self.active.deactivate(&kb);
        }
    }

    // ========================================================================
    // READ VIEW AND CONTROL
    // ========================================================================

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn tms(&self) -> &Arc<Tms> {
        &self.tms
    }

    pub fn config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    pub fn set_config(&self, config: EngineConfig) {
        *self.config.write() = config;
    }

    pub fn set_resolution_policy(&self, policy: ResolutionPolicy) {
        *self.resolution.write() = policy;
    }

    /// Active assertions in one KB.
    pub fn assertions_in(&self, kb: &KbId) -> Vec<Arc<Assertion>> {
        self.tms
            .assertions_in(kb)
            .into_iter()
            .filter(|a| a.is_active())
            .collect()
    }

    pub fn rules(&self) -> Vec<Arc<Rule>> {
        self.rules.all()
    }

    /// Emit a `SystemStatus` event describing the current state.
    pub fn emit_status(&self, message: impl Into<String>) {
        self.bus.emit(EngineEvent::SystemStatus {
            status_message: message.into(),
            kb_count: self.kbs.len(),
            kb_capacity: self.config.read().global_kb_capacity,
            task_queue_size: self.ctx.pending_queries.load(Ordering::Relaxed),
            rule_count: self.rules.len(),
        });
    }

    /// Pause reasoning: waiters inside the reasoners block until resumed.
    pub fn pause(&self) {
        self.ctx.set_paused(true);
        self.emit_status("paused");
    }

    pub fn resume(&self) {
        self.ctx.set_paused(false);
        self.emit_status("running");
    }

    /// Stop: cancel all outstanding query futures and announce the final
    /// status. The executor shuts down when the engine is dropped.
    pub fn stop(&self) {
        info!("engine stopping");
        self.ctx.cancel.cancel();
        self.ctx.set_paused(false);
        self.emit_status("stopped");
    }

    pub(crate) fn context(&self) -> &Arc<ReasonerContext> {
        &self.ctx
    }

    pub(crate) fn registry(&self) -> &Arc<KbRegistry> {
        &self.kbs
    }

    pub(crate) fn rule_set(&self) -> &Arc<RuleSet> {
        &self.rules
    }
}
