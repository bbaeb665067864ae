//! Goal-directed backward chaining.
//!
//! `prove` dispatches on the goal's top operator: conjunctions fold bindings
//! left to right, disjunctions branch with a copy of the proof stack,
//! negation is negation-as-failure, and plain goals consult registered
//! operators, the stored facts, and the rules (consequents unified after
//! uniquely renaming rule variables).
//!
//! Cycle detection is per straight-line proof: the substituted goal is
//! pushed on a proof stack and a recurring goal cuts the branch. `or`
//! branches receive a copy of the stack, so a cycle spanning disjuncts is
//! not cut, consistent with negation-as-failure semantics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_recursion::async_recursion;
use indexmap::IndexSet;
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::assertion::KbId;
use crate::events::{Answer, Query, QueryType};
use crate::term::{OP_AND, OP_NOT, OP_OR, Term};
use crate::unify::{Bindings, substitute, unify};

use super::{BoxFuture, Reasoner, ReasonerContext};

static RENAME_COUNTER: AtomicU64 = AtomicU64::new(1);

/// The backward-chaining strategy; serves all three query types.
#[derive(Clone)]
pub struct BackwardChainer {
    ctx: Arc<ReasonerContext>,
}

impl BackwardChainer {
    pub fn new(ctx: Arc<ReasonerContext>) -> Arc<Self> {
        Arc::new(Self { ctx })
    }

    async fn prove_query(&self, query: Query) -> Answer {
        let kb = query.target_kb_id.clone().unwrap_or_else(KbId::global);
        let depth = query.depth_parameter().unwrap_or(self.ctx.query_depth());
        let mut stack = FxHashSet::default();
        let results = self
            .prove(&query.pattern, &kb, Bindings::new(), depth, &mut stack)
            .await;

        match query.ty {
            QueryType::AskBindings => {
                let vars = query.pattern.variables().to_vec();
                let mut seen: IndexSet<String> = IndexSet::new();
                let mut bindings = Vec::new();
                for result in results {
                    let restricted = result.restricted_to(&vars);
                    if seen.insert(restricted.canonical()) {
                        bindings.push(restricted);
                    }
                }
                if bindings.is_empty() {
                    Answer::failure(query.id)
                } else {
                    Answer::success(query.id, bindings)
                }
            }
            QueryType::AskTrueFalse | QueryType::AchieveGoal => {
                if results.is_empty() {
                    Answer::failure(query.id)
                } else {
                    Answer::success(query.id, Vec::new())
                }
            }
        }
    }

    /// Prove a goal, returning every binding map that satisfies it.
    #[async_recursion]
    pub async fn prove(
        &self,
        goal: &Term,
        kb: &KbId,
        bindings: Bindings,
        depth: u32,
        stack: &mut FxHashSet<Term>,
    ) -> Vec<Bindings> {
        if self.ctx.cancel.is_cancelled() {
            return Vec::new();
        }
        self.ctx.wait_if_paused().await;

        let goal = substitute(goal, &bindings, true);
        if goal.as_atom().is_some_and(|a| a == "true") {
            return vec![bindings];
        }
        if depth == 0 || stack.contains(&goal) {
            trace!("cutting goal: {goal}");
            return Vec::new();
        }
        stack.insert(goal.clone());

        let children = goal.children().map(<[Term]>::to_vec).unwrap_or_default();
        let results = match goal.operator().map(|op| op.as_str()) {
            Some(OP_AND) => {
                let mut acc = vec![bindings];
                for subgoal in &children[1..] {
                    let mut next = Vec::new();
                    for current in acc {
                        next.extend(self.prove(subgoal, kb, current, depth, stack).await);
                    }
                    acc = next;
                    if acc.is_empty() {
                        break;
                    }
                }
                acc
            }
            Some(OP_OR) => {
                let mut out = Vec::new();
                for disjunct in &children[1..] {
                    let mut branch_stack = stack.clone();
                    out.extend(
                        self.prove(disjunct, kb, bindings.clone(), depth, &mut branch_stack)
                            .await,
                    );
                }
                out
            }
            Some(OP_NOT) if children.len() == 2 => {
                let sub = self
                    .prove(&children[1], kb, bindings.clone(), depth, stack)
                    .await;
                if sub.is_empty() { vec![bindings] } else { Vec::new() }
            }
            _ => self.prove_leaf(&goal, kb, &bindings, depth, stack).await,
        };

        stack.remove(&goal);
        dedup(results)
    }

    /// A plain goal: registered operator, else stored facts; rules in
    /// either case.
    #[async_recursion]
    async fn prove_leaf(
        &self,
        goal: &Term,
        kb: &KbId,
        bindings: &Bindings,
        depth: u32,
        stack: &mut FxHashSet<Term>,
    ) -> Vec<Bindings> {
        let mut out = Vec::new();

        let operator = goal
            .operator()
            .and_then(|name| self.ctx.operators.get(name));
        if let Some(operator) = operator {
            let result = tokio::select! {
                _ = self.ctx.cancel.cancelled() => Err("cancelled".to_string()),
                result = operator.apply(goal.clone()) => result,
            };
            match result {
                Ok(term) if term.as_atom().is_some_and(|a| a == "true") => {
                    out.push(bindings.clone());
                }
                Ok(term) if term.as_atom().is_some_and(|a| a == "false") => {}
                Ok(term) => {
                    if let Some(unified) = unify(goal, &term, bindings) {
                        out.push(unified);
                    }
                }
                Err(error) => {
                    debug!("operator failed on {goal}: {error}");
                }
            }
        } else {
            for store in self.ctx.reasoning_kbs(kb) {
                for fact in store.unifiable_candidates(goal) {
                    if fact.is_negated {
                        continue;
                    }
                    if let Some(unified) = unify(goal, fact.effective_term(), bindings) {
                        out.push(unified);
                    }
                }
            }
        }

        for rule in self.ctx.active_rules() {
            let renaming = renaming_for(&rule.form, depth);
            let consequent = substitute(&rule.consequent, &renaming, false);
            let Some(unified) = unify(&consequent, goal, bindings) else {
                continue;
            };
            let antecedent = substitute(&rule.antecedent, &renaming, false);
            out.extend(self.prove(&antecedent, kb, unified, depth - 1, stack).await);
        }
        out
    }
}

/// Fresh names for every variable of a rule form, suffixed with the proof
/// depth and a monotonic counter.
fn renaming_for(form: &Term, depth: u32) -> Bindings {
    let counter = RENAME_COUNTER.fetch_add(1, Ordering::Relaxed);
    form.variables()
        .iter()
        .map(|name| {
            (
                name.clone(),
                Term::variable(format!("{name}_{depth}_{counter}")),
            )
        })
        .collect()
}

/// De-duplicate binding maps by canonical form, keeping first-seen order.
fn dedup(results: Vec<Bindings>) -> Vec<Bindings> {
    let mut seen: IndexSet<String> = IndexSet::new();
    let mut out = Vec::new();
    for result in results {
        if seen.insert(result.canonical()) {
            out.push(result);
        }
    }
    out
}

impl Reasoner for BackwardChainer {
    fn name(&self) -> &'static str {
        "backward"
    }

    fn supports(&self, ty: QueryType) -> bool {
        matches!(
            ty,
            QueryType::AskBindings | QueryType::AskTrueFalse | QueryType::AchieveGoal
        )
    }

    fn answer(&self, query: Query) -> BoxFuture<Answer> {
        let chainer = self.clone();
        Box::pin(async move { chainer.prove_query(query).await })
    }
}
