//! Universal instantiation.
//!
//! A new ground fact is tried against the active universal assertions that
//! reference its head predicate; a new universal is tried against the
//! existing ground facts with its body's head. Instantiation succeeds when
//! some subexpression of the universal's body matches the fact with bindings
//! covering every quantified variable; the instantiated body derives as a
//! ground (or skolemized) assertion supported by both sides.

use std::sync::Arc;

use crate::assertion::{Assertion, AssertionId, AssertionType, KbId, PotentialAssertion};
use crate::events::{Answer, EngineEvent, EventKind, Query, QueryType};
use crate::term::Term;
use crate::unify::{Bindings, match_terms, substitute};

use super::{BoxFuture, Reasoner, ReasonerContext};

/// The universal-instantiation strategy. Construction subscribes it to
/// `Asserted`; it answers no query types.
pub struct UniversalInstantiator {
    ctx: Arc<ReasonerContext>,
}

impl UniversalInstantiator {
    pub fn register(ctx: Arc<ReasonerContext>) -> Arc<Self> {
        let reasoner = Arc::new(Self { ctx });
        let weak = Arc::downgrade(&reasoner);
        reasoner.ctx.bus.subscribe(EventKind::Asserted, move |event| {
            let Some(reasoner) = weak.upgrade() else { return };
            if let EngineEvent::Asserted { assertion, kb_id } = event {
                reasoner.on_asserted(assertion, kb_id);
            }
        });
        reasoner
    }

    fn on_asserted(&self, assertion: &Arc<Assertion>, kb: &KbId) {
        if !assertion.is_active()
            || !self
                .ctx
                .in_active_context(kb, assertion.source_note.as_ref())
        {
            return;
        }
        let depth_limit = self.ctx.depth_limit();

        match assertion.ty {
            AssertionType::Ground | AssertionType::Skolemized => {
                let Some(head) = assertion.effective_term().operator().cloned() else {
                    return;
                };
                for store in self.ctx.reasoning_kbs(kb) {
                    for universal in store.universals_referencing(&head) {
                        if universal.depth < depth_limit {
                            self.instantiate(&universal, assertion, kb);
                        }
                    }
                }
            }
            AssertionType::Universal => {
                if assertion.depth >= depth_limit {
                    return;
                }
                let Some(head) = assertion.effective_term().operator().cloned() else {
                    return;
                };
                for store in self.ctx.reasoning_kbs(kb) {
                    for fact in store.active_assertions() {
                        if matches!(fact.ty, AssertionType::Ground | AssertionType::Skolemized)
                            && fact.effective_term().operator() == Some(&head)
                        {
                            self.instantiate(assertion, &fact, kb);
                        }
                    }
                }
            }
        }
    }

    /// Find a subexpression of the universal's body matching the fact such
    /// that the bindings cover every quantified variable, then derive the
    /// substituted body.
    fn instantiate(&self, universal: &Arc<Assertion>, ground: &Arc<Assertion>, kb: &KbId) {
        let body = universal.effective_term();
        let Some(bindings) = find_covering_match(body, ground.effective_term(), universal) else {
            return;
        };
        let instantiated = substitute(body, &bindings, true);
        if instantiated.has_variable() {
            return;
        }

        let mut support: Vec<AssertionId> = universal
            .justifications
            .iter()
            .chain(ground.justifications.iter())
            .copied()
            .collect();
        support.push(universal.id);
        support.push(ground.id);
        let Some(profile) = self.ctx.support_profile(&support) else {
            return;
        };
        let potential = PotentialAssertion::ground(instantiated, profile.priority)
            .with_source(profile.source_note.clone())
            .with_support(support, profile.depth);
        self.ctx.commit_derivation(kb, potential, "instantiate");
    }
}

/// First subexpression of `body` that matches `fact` with bindings covering
/// all of the universal's quantified variables.
fn find_covering_match(
    body: &Term,
    fact: &Term,
    universal: &Assertion,
) -> Option<Bindings> {
    if let Some(bindings) = match_terms(body, fact, &Bindings::new()) {
        if universal
            .quantified_vars
            .iter()
            .all(|var| bindings.contains(var))
        {
            return Some(bindings);
        }
    }
    for child in body.children()? {
        if let Some(bindings) = find_covering_match(child, fact, universal) {
            return Some(bindings);
        }
    }
    None
}

impl Reasoner for UniversalInstantiator {
    fn name(&self) -> &'static str {
        "instantiate"
    }

    fn supports(&self, _ty: QueryType) -> bool {
        false
    }

    fn answer(&self, query: Query) -> BoxFuture<Answer> {
        Box::pin(async move { Answer::failure(query.id) })
    }
}
