//! Query dispatcher.
//!
//! On a `Query` event the dispatcher asks every reasoner whether it supports
//! the query type, invokes the supporters concurrently on the shared
//! executor, awaits them all, and folds their answers into one `Answer`
//! event. A timeout or error surfaces only when no reasoner succeeded.

use std::sync::Arc;

use indexmap::IndexSet;
use tokio::runtime::Handle;
use tracing::debug;

use crate::events::{Answer, AnswerStatus, EngineEvent, EventKind, Query, QueryType};
use crate::unify::Bindings;

use super::{Reasoner, ReasonerContext};

/// Fans queries out to the registered reasoners and merges their answers.
pub struct QueryDispatcher {
    ctx: Arc<ReasonerContext>,
    reasoners: Vec<Arc<dyn Reasoner>>,
    runtime: Handle,
}

impl QueryDispatcher {
    /// Build the dispatcher and subscribe it to `Query` events; each query
    /// runs as its own task and its `Answer` is emitted back on the bus.
    pub fn register(
        ctx: Arc<ReasonerContext>,
        reasoners: Vec<Arc<dyn Reasoner>>,
        runtime: Handle,
    ) -> Arc<Self> {
        let dispatcher = Arc::new(Self {
            ctx,
            reasoners,
            runtime,
        });
        let weak = Arc::downgrade(&dispatcher);
        dispatcher.ctx.bus.subscribe(EventKind::Query, move |event| {
            let Some(dispatcher) = weak.upgrade() else { return };
            let EngineEvent::Query(query) = event else { return };
            let query = query.clone();
            let task = dispatcher.clone();
            dispatcher
                .ctx
                .pending_queries
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            dispatcher.runtime.spawn(async move {
                let answer = task.dispatch(query).await;
                task.ctx
                    .pending_queries
                    .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
                task.ctx.bus.emit(EngineEvent::Answer(answer));
            });
        });
        dispatcher
    }

    /// Run one query to completion.
    pub async fn dispatch(&self, query: Query) -> Answer {
        let supporters: Vec<Arc<dyn Reasoner>> = self
            .reasoners
            .iter()
            .filter(|r| r.supports(query.ty))
            .cloned()
            .collect();
        if supporters.is_empty() {
            debug!("no reasoner supports {:?}", query.ty);
            return Answer::failure(query.id);
        }

        let handles: Vec<_> = supporters
            .iter()
            .map(|reasoner| self.runtime.spawn(reasoner.answer(query.clone())))
            .collect();

        let mut pool: Vec<Bindings> = Vec::new();
        let mut succeeded = false;
        let mut first_issue: Option<Answer> = None;

        let mut handles = handles.into_iter();
        for handle in handles.by_ref() {
            match handle.await {
                Ok(answer) => match answer.status {
                    AnswerStatus::Success => {
                        succeeded = true;
                        pool.extend(answer.bindings);
                        if query.ty == QueryType::AchieveGoal {
                            // A proof suffices; stop waiting on the rest.
                            break;
                        }
                    }
                    AnswerStatus::Timeout | AnswerStatus::Error => {
                        if first_issue.is_none() {
                            first_issue = Some(answer);
                        }
                    }
                    AnswerStatus::Failure => {}
                },
                Err(join_error) => {
                    if first_issue.is_none() {
                        first_issue = Some(Answer::error(query.id, join_error.to_string()));
                    }
                }
            }
        }
        for remaining in handles {
            remaining.abort();
        }

        if succeeded {
            let bindings = if query.ty == QueryType::AskBindings {
                dedup_canonical(pool)
            } else {
                pool
            };
            return Answer::success(query.id, bindings);
        }
        match first_issue {
            Some(issue) => Answer {
                query_id: query.id,
                status: issue.status,
                bindings: Vec::new(),
                explanation: issue.explanation,
            },
            None => Answer::failure(query.id),
        }
    }
}

fn dedup_canonical(bindings: Vec<Bindings>) -> Vec<Bindings> {
    let mut seen: IndexSet<String> = IndexSet::new();
    let mut out = Vec::new();
    for b in bindings {
        if seen.insert(b.canonical()) {
            out.push(b);
        }
    }
    out
}
