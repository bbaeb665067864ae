//! Equality rewriting.
//!
//! A positive equality `(= L R)` whose left side outweighs its right is an
//! oriented rewrite rule (the weight ordering forces termination). Each new
//! fact is applied as a rule to every other active fact, and every existing
//! rule is applied to the new fact; a successful rewrite derives the
//! rewritten term supported by both sides.

use std::sync::Arc;

use crate::assertion::{Assertion, AssertionType, KbId, PotentialAssertion};
use crate::config::DERIVATION_PRIORITY_DECAY;
use crate::events::{Answer, EngineEvent, EventKind, Query, QueryType};
use crate::unify::rewrite;

use super::{BoxFuture, Reasoner, ReasonerContext};

/// The equality-rewrite strategy. Construction subscribes it to `Asserted`;
/// it answers no query types.
pub struct RewriteReasoner {
    ctx: Arc<ReasonerContext>,
}

impl RewriteReasoner {
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
            || !matches!(
                assertion.ty,
                AssertionType::Ground | AssertionType::Skolemized
            )
            || !self
                .ctx
                .in_active_context(kb, assertion.source_note.as_ref())
        {
            return;
        }

        let pool: Vec<Arc<Assertion>> = self
            .ctx
            .reasoning_kbs(kb)
            .iter()
            .flat_map(|store| store.active_assertions())
            .filter(|fact| {
                fact.id != assertion.id
                    && matches!(fact.ty, AssertionType::Ground | AssertionType::Skolemized)
            })
            .collect();

        if is_rewrite_rule(assertion) {
            for target in &pool {
                self.apply(assertion, target, kb);
            }
        }
        for rule in pool.iter().filter(|fact| is_rewrite_rule(fact)) {
            self.apply(rule, assertion, kb);
        }
    }

    /// Rewrite `target` with `rule` and derive the result.
    fn apply(&self, rule: &Arc<Assertion>, target: &Arc<Assertion>, kb: &KbId) {
        let Some(children) = rule.term.children() else {
            return;
        };
        let (lhs, rhs) = (&children[1], &children[2]);
        let Some(rewritten) = rewrite(&target.term, lhs, rhs) else {
            return;
        };

        let mut support = target.justifications.clone();
        support.push(target.id);
        support.push(rule.id);
        let depth = 1 + target.depth.max(rule.depth);
        let priority = (rule.priority + target.priority) / 2.0 * DERIVATION_PRIORITY_DECAY;

        let source_note = if rule.source_note == target.source_note {
            rule.source_note.clone()
        } else {
            None
        };
        let potential = PotentialAssertion::ground(rewritten, priority)
            .with_source(source_note)
            .with_support(support, depth);
        self.ctx.commit_derivation(kb, potential, "rewrite");
    }
}

/// Oriented rewrite rule: a positive `(= L R)` of arity 3 with
/// `weight(L) > weight(R)`.
fn is_rewrite_rule(assertion: &Assertion) -> bool {
    assertion.is_oriented_equality && !assertion.is_negated
}

impl Reasoner for RewriteReasoner {
    fn name(&self) -> &'static str {
        "rewrite"
    }

    fn supports(&self, _ty: QueryType) -> bool {
        false
    }

    fn answer(&self, query: Query) -> BoxFuture<Answer> {
        Box::pin(async move { Answer::failure(query.id) })
    }
}
