//! Typed and pattern-triggered publish/subscribe.
//!
//! Every state change the core makes is described by an [`EngineEvent`].
//! Subscribers register by event kind or, for assertion-bearing events, by
//! a term pattern; a pattern subscriber fires with the bindings of a
//! successful one-way match against the event's term.
//!
//! Listeners run synchronously on the emitting task, in registration order.
//! Mutators therefore defer emission until their locks are released, so a
//! listener may re-enter the store (the forward chainer commits derivations
//! from inside `Asserted` handling). A panicking listener is logged and
//! contained; it never breaks dispatch.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use smol_str::SmolStr;
use tracing::error;
use uuid::Uuid;

use crate::assertion::{Assertion, AssertionId, KbId, NoteId, next_id};
use crate::rules::Rule;
use crate::term::Term;
use crate::unify::{Bindings, match_terms};

// ============================================================================
// QUERIES AND ANSWERS
// ============================================================================

/// The query types the dispatcher understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum QueryType {
    /// Return every binding map satisfying the pattern.
    AskBindings,
    /// Succeed iff the pattern is provable.
    AskTrueFalse,
    /// Prove the goal; the first proof suffices.
    AchieveGoal,
}

/// An inbound query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub ty: QueryType,
    pub pattern: Term,
    pub target_kb_id: Option<KbId>,
    /// Free-form parameters, e.g. `depth`.
    pub parameters: FxHashMap<String, serde_json::Value>,
}

impl Query {
    pub fn new(ty: QueryType, pattern: Term) -> Self {
        Self {
            id: Uuid::new_v4(),
            ty,
            pattern,
            target_kb_id: None,
            parameters: FxHashMap::default(),
        }
    }

    pub fn with_target(mut self, kb: KbId) -> Self {
        self.target_kb_id = Some(kb);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// The `depth` parameter, if present and integral.
    pub fn depth_parameter(&self) -> Option<u32> {
        self.parameters.get("depth")?.as_u64().map(|d| d as u32)
    }
}

/// Outcome of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnswerStatus {
    Success,
    Failure,
    Timeout,
    Error,
}

/// The answer to a [`Query`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub query_id: Uuid,
    pub status: AnswerStatus,
    pub bindings: Vec<Bindings>,
    pub explanation: Option<String>,
}

impl Answer {
    pub fn success(query_id: Uuid, bindings: Vec<Bindings>) -> Self {
        Self {
            query_id,
            status: AnswerStatus::Success,
            bindings,
            explanation: None,
        }
    }

    pub fn failure(query_id: Uuid) -> Self {
        Self {
            query_id,
            status: AnswerStatus::Failure,
            bindings: Vec::new(),
            explanation: None,
        }
    }

    pub fn error(query_id: Uuid, explanation: impl Into<String>) -> Self {
        Self {
            query_id,
            status: AnswerStatus::Error,
            bindings: Vec::new(),
            explanation: Some(explanation.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == AnswerStatus::Success
    }
}

/// What a retraction request targets.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "target")]
pub enum RetractionTarget {
    ById(AssertionId),
    ByNote(NoteId),
    ByRuleForm(Term),
    ByKif(Term),
}

// ============================================================================
// EVENTS
// ============================================================================

/// Everything the core announces at its boundary. Event and field names are
/// contractual for any serialized form.
#[derive(Debug, Clone, Serialize)]
pub enum EngineEvent {
    #[serde(rename_all = "camelCase")]
    Asserted {
        assertion: Arc<Assertion>,
        kb_id: KbId,
    },
    #[serde(rename_all = "camelCase")]
    Retracted {
        assertion: Arc<Assertion>,
        kb_id: KbId,
        reason: SmolStr,
    },
    #[serde(rename_all = "camelCase")]
    AssertionEvicted {
        assertion: Arc<Assertion>,
        kb_id: KbId,
    },
    #[serde(rename_all = "camelCase")]
    AssertionStateChanged {
        assertion_id: AssertionId,
        is_active: bool,
        kb_id: KbId,
    },
    RuleAdded {
        rule: Arc<Rule>,
    },
    RuleRemoved {
        rule: Arc<Rule>,
    },
    #[serde(rename_all = "camelCase")]
    ContradictionDetected {
        conflicting_ids: Vec<AssertionId>,
        kb_id: KbId,
    },
    /// Inbound: textual term input already parsed by the boundary.
    #[serde(rename_all = "camelCase")]
    ExternalInput {
        term: Term,
        source_id: SmolStr,
        note_id: Option<NoteId>,
    },
    /// A transient term for pattern subscribers; never committed to a KB.
    #[serde(rename_all = "camelCase")]
    TemporaryAssertion {
        term: Term,
        source_id: SmolStr,
        note_id: Option<NoteId>,
    },
    /// Inbound retraction request.
    #[serde(rename_all = "camelCase")]
    RetractionRequest {
        #[serde(flatten)]
        target: RetractionTarget,
        source_id: SmolStr,
        note_id: Option<NoteId>,
    },
    Query(Query),
    Answer(Answer),
    #[serde(rename_all = "camelCase")]
    SystemStatus {
        status_message: String,
        kb_count: usize,
        kb_capacity: usize,
        task_queue_size: usize,
        rule_count: usize,
    },
}

/// Runtime tag of an event, used to key typed subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Asserted,
    Retracted,
    AssertionEvicted,
    AssertionStateChanged,
    RuleAdded,
    RuleRemoved,
    ContradictionDetected,
    ExternalInput,
    TemporaryAssertion,
    RetractionRequest,
    Query,
    Answer,
    SystemStatus,
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::Asserted { .. } => EventKind::Asserted,
            EngineEvent::Retracted { .. } => EventKind::Retracted,
            EngineEvent::AssertionEvicted { .. } => EventKind::AssertionEvicted,
            EngineEvent::AssertionStateChanged { .. } => EventKind::AssertionStateChanged,
            EngineEvent::RuleAdded { .. } => EventKind::RuleAdded,
            EngineEvent::RuleRemoved { .. } => EventKind::RuleRemoved,
            EngineEvent::ContradictionDetected { .. } => EventKind::ContradictionDetected,
            EngineEvent::ExternalInput { .. } => EventKind::ExternalInput,
            EngineEvent::TemporaryAssertion { .. } => EventKind::TemporaryAssertion,
            EngineEvent::RetractionRequest { .. } => EventKind::RetractionRequest,
            EngineEvent::Query(_) => EventKind::Query,
            EngineEvent::Answer(_) => EventKind::Answer,
            EngineEvent::SystemStatus { .. } => EventKind::SystemStatus,
        }
    }

    /// The term pattern subscribers are matched against, when this event
    /// carries one.
    fn pattern_term(&self) -> Option<&Term> {
        match self {
            EngineEvent::Asserted { assertion, .. } => Some(&assertion.term),
            EngineEvent::TemporaryAssertion { term, .. } => Some(term),
            _ => None,
        }
    }
}

// ============================================================================
// BUS
// ============================================================================

/// Handle for removing a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&EngineEvent) + Send + Sync>;
type PatternListener = Arc<dyn Fn(&EngineEvent, &Bindings) + Send + Sync>;

/// Process-wide publish/subscribe bus.
#[derive(Default)]
pub struct EventBus {
    typed: RwLock<FxHashMap<EventKind, Vec<(SubscriptionId, Listener)>>>,
    patterns: RwLock<Vec<(SubscriptionId, Term, PatternListener)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a concrete event kind.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> SubscriptionId
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(next_id());
        self.typed
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Subscribe to assertion-bearing events whose term matches `pattern`.
    pub fn subscribe_pattern<F>(&self, pattern: Term, listener: F) -> SubscriptionId
    where
        F: Fn(&EngineEvent, &Bindings) + Send + Sync + 'static,
    {
        let id = SubscriptionId(next_id());
        self.patterns.write().push((id, pattern, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        for listeners in self.typed.write().values_mut() {
            listeners.retain(|(sub, _)| *sub != id);
        }
        self.patterns.write().retain(|(sub, _, _)| *sub != id);
    }

    /// Dispatch one event to its typed subscribers, then to every pattern
    /// subscriber whose pattern matches the event's term.
    pub fn emit(&self, event: EngineEvent) {
        // Clone the listener lists out of the locks: listeners may
        // re-enter subscribe/emit.
        let typed: Vec<Listener> = self
            .typed
            .read()
            .get(&event.kind())
            .map(|listeners| listeners.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();
        for listener in typed {
            contain(|| listener(&event));
        }

        if let Some(term) = event.pattern_term() {
            let term = term.clone();
            let patterns: Vec<(Term, PatternListener)> = self
                .patterns
                .read()
                .iter()
                .map(|(_, pattern, l)| (pattern.clone(), l.clone()))
                .collect();
            for (pattern, listener) in patterns {
                if let Some(bindings) = match_terms(&pattern, &term, &Bindings::new()) {
                    contain(|| listener(&event, &bindings));
                }
            }
        }
    }

    /// Emit a batch in order. Mutators collect events under their locks and
    /// hand them here after unlocking.
    pub fn emit_all(&self, events: Vec<EngineEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

fn contain(f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic".to_string());
        error!("event listener panicked: {message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::parse_term;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn input_event(term: &str) -> EngineEvent {
        EngineEvent::TemporaryAssertion {
            term: parse_term(term).unwrap(),
            source_id: SmolStr::new("test"),
            note_id: None,
        }
    }

    #[test]
    fn typed_subscribers_see_matching_kinds_only() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        bus.subscribe(EventKind::TemporaryAssertion, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(input_event("(p a)"));
        bus.emit(EngineEvent::SystemStatus {
            status_message: "ok".into(),
            kb_count: 0,
            kb_capacity: 0,
            task_queue_size: 0,
            rule_count: 0,
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pattern_subscribers_receive_bindings() {
        let bus = EventBus::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe_pattern(parse_term("(instance ?x Dog)").unwrap(), move |_, bindings| {
            sink.lock().push(bindings.get("?x").unwrap().kif().to_string());
        });
        bus.emit(input_event("(instance MyDog Dog)"));
        bus.emit(input_event("(instance MyCat Cat)"));
        assert_eq!(seen.lock().as_slice(), &["MyDog".to_string()]);
    }

    #[test]
    fn panicking_listener_does_not_break_dispatch() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventKind::TemporaryAssertion, |_| panic!("boom"));
        let counter = hits.clone();
        bus.subscribe(EventKind::TemporaryAssertion, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(input_event("(p a)"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let sub = bus.subscribe(EventKind::TemporaryAssertion, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(input_event("(p a)"));
        bus.unsubscribe(sub);
        bus.emit(input_event("(p a)"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
