//! Forward chaining.
//!
//! Every newly asserted ground or skolemized fact in an active context is
//! matched against the antecedent clauses of the active rules. A clause hit
//! starts a search for the remaining clauses over the current KB, the other
//! active note KBs, and the global KB; each complete match substitutes into
//! the consequent and derives.
//!
//! Consequents branch on their top operator: conjunctions derive each
//! conjunct, quantified implications register derived rules, existentials
//! are skolemized, and everything else derives a plain fact.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use smol_str::SmolStr;
use tracing::debug;

use crate::assertion::{
    Assertion, AssertionId, AssertionType, KbId, PotentialAssertion, quantifier_vars,
};
use crate::events::{Answer, EngineEvent, EventKind, Query, QueryType};
use crate::rules::Rule;
use crate::term::{
    OP_AND, OP_EXISTS, OP_FORALL, OP_IFF, OP_IMPLIES, SKOLEM_CONSTANT_PREFIX,
    SKOLEM_FUNCTION_PREFIX, Term,
};
use crate::unify::{Bindings, substitute, unify};

use super::{BoxFuture, Reasoner, ReasonerContext};

static SKOLEM_COUNTER: AtomicU64 = AtomicU64::new(1);

/// The forward-chaining strategy. Construction subscribes it to `Asserted`;
/// it answers no query types.
pub struct ForwardChainer {
    ctx: Arc<ReasonerContext>,
}

impl ForwardChainer {
    pub fn register(ctx: Arc<ReasonerContext>) -> Arc<Self> {
        let chainer = Arc::new(Self { ctx });
        let weak = Arc::downgrade(&chainer);
        chainer.ctx.bus.subscribe(EventKind::Asserted, move |event| {
            let Some(chainer) = weak.upgrade() else { return };
            if let EngineEvent::Asserted { assertion, kb_id } = event {
                chainer.on_asserted(assertion, kb_id);
            }
        });
        chainer
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

        for rule in self.ctx.active_rules() {
            for (at, clause) in rule.clauses.iter().enumerate() {
                let clause_negated = clause.is_negated();
                if clause_negated != assertion.is_negated {
                    continue;
                }
                let pattern = clause.negation_inner().unwrap_or(clause);
                let Some(bindings) = unify(pattern, assertion.effective_term(), &Bindings::new())
                else {
                    continue;
                };
                let remaining: Vec<&Term> = rule
                    .clauses
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != at)
                    .map(|(_, c)| c)
                    .collect();
                let support = vec![assertion.id, rule.axiom];
                self.satisfy(&rule, &remaining, bindings, support, assertion.depth, kb);
            }
        }
    }

    /// Depth-first search over the remaining antecedent clauses.
    fn satisfy(
        &self,
        rule: &Arc<Rule>,
        remaining: &[&Term],
        bindings: Bindings,
        support: Vec<AssertionId>,
        max_depth: u32,
        kb: &KbId,
    ) {
        let Some((clause, rest)) = remaining.split_first() else {
            self.fire(rule, &bindings, support, kb);
            return;
        };
        let clause_negated = clause.is_negated();
        let pattern = clause.negation_inner().unwrap_or(clause);
        let pattern = substitute(pattern, &bindings, true);
        let depth_limit = self.ctx.depth_limit();

        for store in self.ctx.reasoning_kbs(kb) {
            for fact in store.unifiable_candidates(&pattern) {
                if fact.is_negated != clause_negated {
                    continue;
                }
                // A support set that would exceed the derivation depth
                // limit cannot fire.
                if fact.depth.max(max_depth) + 1 > depth_limit {
                    continue;
                }
                let Some(extended) = unify(&pattern, fact.effective_term(), &bindings) else {
                    continue;
                };
                let mut support = support.clone();
                support.push(fact.id);
                self.satisfy(
                    rule,
                    rest,
                    extended,
                    support,
                    max_depth.max(fact.depth),
                    kb,
                );
            }
        }
    }

    /// All antecedents matched: substitute into the consequent and derive.
    fn fire(&self, rule: &Arc<Rule>, bindings: &Bindings, support: Vec<AssertionId>, kb: &KbId) {
        let consequent = substitute(&rule.consequent, bindings, true);
        let consequent = strip_double_negation(consequent);
        debug!("rule {} fires: {consequent}", rule.id);
        self.derive_term(consequent, &support, kb);
    }

    fn derive_term(&self, term: Term, support: &[AssertionId], kb: &KbId) {
        match term.operator().map(SmolStr::as_str) {
            Some(OP_AND) => {
                for conjunct in &term.children().unwrap_or_default()[1..] {
                    self.derive_term(strip_double_negation(conjunct.clone()), support, kb);
                }
            }
            Some(OP_FORALL) => self.derive_universal(term, support, kb),
            Some(OP_EXISTS) => self.derive_existential(term, support, kb),
            _ => self.derive_fact(term, support, kb),
        }
    }

    /// `(forall vars (=> A C))` registers a derived rule (both directions
    /// for `<=>`); any other body derives a universal assertion.
    fn derive_universal(&self, term: Term, support: &[AssertionId], kb: &KbId) {
        let Some(profile) = self.ctx.support_profile(support) else {
            return;
        };
        if profile.depth > self.ctx.depth_limit() {
            return;
        }
        let body = crate::assertion::forall_body(&term).cloned();
        if let Some(body) = body {
            if body
                .operator()
                .is_some_and(|op| op == OP_IMPLIES || op == OP_IFF)
            {
                self.ctx.add_rule(
                    body,
                    profile.priority,
                    profile.source_note,
                    support.to_vec(),
                    profile.depth,
                );
                return;
            }
        }
        let vars = quantifier_vars(&term);
        if vars.is_empty() {
            debug!("forall without quantified variables dropped: {term}");
            return;
        }
        let potential = PotentialAssertion::universal(term, profile.priority, vars)
            .with_source(profile.source_note.clone())
            .with_support(support.to_vec(), profile.depth);
        self.ctx.commit_derivation(kb, potential, "forward");
    }

    /// Skolemize `(exists vars body)`: free variables become parameters of
    /// fresh skolem functions; without free variables a fresh skolem
    /// constant suffices.
    fn derive_existential(&self, term: Term, support: &[AssertionId], kb: &KbId) {
        let Some(children) = term.children() else {
            return;
        };
        let Some(body) = children.get(2).cloned() else {
            debug!("malformed exists dropped: {term}");
            return;
        };
        let quantified = quantifier_vars(&term);
        if quantified.is_empty() {
            self.derive_term(body, support, kb);
            return;
        }
        let free: Vec<SmolStr> = term
            .variables()
            .iter()
            .filter(|v| !quantified.contains(v))
            .cloned()
            .collect();

        let mut skolems = Bindings::new();
        for var in &quantified {
            let n = SKOLEM_COUNTER.fetch_add(1, Ordering::Relaxed);
            let skolem = if free.is_empty() {
                Term::atom(format!("{SKOLEM_CONSTANT_PREFIX}{n}"))
            } else {
                let mut call = Vec::with_capacity(free.len() + 1);
                call.push(Term::atom(format!("{SKOLEM_FUNCTION_PREFIX}{n}")));
                call.extend(free.iter().map(|v| Term::variable(v.clone())));
                Term::list(call)
            };
            skolems.insert(var.clone(), skolem);
        }
        let skolemized = substitute(&body, &skolems, true);
        self.derive_term(strip_double_negation(skolemized), support, kb);
    }

    fn derive_fact(&self, term: Term, support: &[AssertionId], kb: &KbId) {
        let Some(profile) = self.ctx.support_profile(support) else {
            return;
        };
        let potential = PotentialAssertion::ground(term, profile.priority)
            .with_source(profile.source_note.clone())
            .with_support(support.to_vec(), profile.depth);
        self.ctx.commit_derivation(kb, potential, "forward");
    }
}

/// Collapse `(not (not X))` at the top until stable.
pub(crate) fn strip_double_negation(term: Term) -> Term {
    let mut current = term;
    loop {
        let Some(inner) = current.negation_inner() else {
            return current;
        };
        let Some(innermost) = inner.negation_inner() else {
            return current;
        };
        current = innermost.clone();
    }
}

impl Reasoner for ForwardChainer {
    fn name(&self) -> &'static str {
        "forward"
    }

    fn supports(&self, _ty: QueryType) -> bool {
        false
    }

    fn answer(&self, query: Query) -> BoxFuture<Answer> {
        Box::pin(async move { Answer::failure(query.id) })
    }
}
