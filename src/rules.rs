//! Rule records, validation, and the concurrent rule set.
//!
//! A rule is `(=> antecedent consequent)` or `(<=> antecedent consequent)`.
//! Rules are equal by form (the whole implication), not by id; the rule set
//! deduplicates accordingly. Each registered rule carries the id of its TMS
//! axiom so derivations can cite the rule as a justification and retracting
//! the rule cascades into everything it derived.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::warn;

use crate::assertion::{AssertionId, NoteId, next_id, quantifier_vars};
use crate::error::EngineError;
use crate::term::{OP_AND, OP_EXISTS, OP_FORALL, OP_IFF, OP_IMPLIES, OP_NOT, Term};

/// Identifier of a registered rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub u64);

impl RuleId {
    pub fn fresh() -> Self {
        RuleId(next_id())
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A validated implication rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: RuleId,
    /// TMS axiom standing in for this rule in justification sets.
    pub axiom: AssertionId,
    /// The whole implication.
    pub form: Term,
    pub antecedent: Term,
    pub consequent: Term,
    pub priority: f64,
    /// Antecedent clauses after stripping an outer `and`; empty for the
    /// antecedent `true`.
    pub clauses: Vec<Term>,
    pub source_note: Option<NoteId>,
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.form == other.form
    }
}

impl Eq for Rule {}

impl std::hash::Hash for Rule {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.form.hash(state);
    }
}

impl Rule {
    /// Validate a rule form and build the record.
    ///
    /// The form must be `(=> A C)` or `(<=> A C)`; the antecedent must be a
    /// list, `(not list)`, an `(and …)` of those, or the atom `true`.
    /// Consequent variables bound by neither the antecedent nor a local
    /// quantifier are a warning, not an error.
    pub fn new(
        form: Term,
        priority: f64,
        source_note: Option<NoteId>,
        axiom: AssertionId,
    ) -> Result<Rule, EngineError> {
        let op = form
            .operator()
            .filter(|op| *op == OP_IMPLIES || *op == OP_IFF)
            .ok_or_else(|| {
                EngineError::validation(format!("not a rule form: {form}"))
            })?
            .clone();
        let children = form.children().unwrap_or_default();
        if children.len() != 3 {
            return Err(EngineError::validation(format!(
                "rule form must have two operands: {form}"
            )));
        }
        let antecedent = children[1].clone();
        let consequent = children[2].clone();
        validate_antecedent(&antecedent)?;
        if op == OP_IFF {
            // The reverse direction is registered as its own rule; each
            // direction's antecedent must stand alone.
            validate_antecedent(&consequent)?;
        }
        warn_unbound_consequent_vars(&form, &antecedent, &consequent);

        let clauses = flatten_clauses(&antecedent);
        Ok(Rule {
            id: RuleId::fresh(),
            axiom,
            form,
            antecedent,
            consequent,
            priority,
            clauses,
            source_note,
        })
    }

    /// Whether the term is a rule form this module accepts.
    pub fn is_rule_form(term: &Term) -> bool {
        term.operator()
            .is_some_and(|op| op == OP_IMPLIES || op == OP_IFF)
            && term.children().is_some_and(|c| c.len() == 3)
    }
}

impl Serialize for Rule {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Rule", 4)?;
        s.serialize_field("id", &self.id)?;
        s.serialize_field("form", &self.form)?;
        s.serialize_field("priority", &self.priority)?;
        s.serialize_field("sourceNoteId", &self.source_note)?;
        s.end()
    }
}

fn validate_antecedent(antecedent: &Term) -> Result<(), EngineError> {
    if antecedent.as_atom().is_some_and(|a| a == "true") {
        return Ok(());
    }
    let Some(children) = antecedent.children() else {
        return Err(EngineError::validation(format!(
            "antecedent must be a list: {antecedent}"
        )));
    };
    match antecedent.operator() {
        Some(op) if op == OP_AND => {
            for clause in &children[1..] {
                validate_clause(clause)?;
            }
            Ok(())
        }
        _ => validate_clause(antecedent),
    }
}

fn validate_clause(clause: &Term) -> Result<(), EngineError> {
    let Some(children) = clause.children() else {
        return Err(EngineError::validation(format!(
            "antecedent clause must be a list: {clause}"
        )));
    };
    if clause.operator().is_some_and(|op| op == OP_NOT)
        && !(children.len() == 2 && children[1].is_list())
    {
        return Err(EngineError::validation(format!(
            "negated antecedent clause must wrap a list: {clause}"
        )));
    }
    Ok(())
}

/// Strip an outer `and`; the atom `true` flattens to no clauses.
fn flatten_clauses(antecedent: &Term) -> Vec<Term> {
    if antecedent.as_atom().is_some_and(|a| a == "true") {
        return Vec::new();
    }
    match (antecedent.operator(), antecedent.children()) {
        (Some(op), Some(children)) if op == OP_AND => children[1..].to_vec(),
        _ => vec![antecedent.clone()],
    }
}

fn warn_unbound_consequent_vars(form: &Term, antecedent: &Term, consequent: &Term) {
    let bound: FxHashSet<&SmolStr> = antecedent.variables().iter().collect();
    let mut local = FxHashSet::default();
    collect_locally_quantified(consequent, &mut local);
    let unbound: Vec<&SmolStr> = consequent
        .variables()
        .iter()
        .filter(|v| !bound.contains(v) && !local.contains(*v))
        .collect();
    if !unbound.is_empty() {
        warn!("rule {form} has unbound consequent variables: {unbound:?}");
    }
}

fn collect_locally_quantified(term: &Term, out: &mut FxHashSet<SmolStr>) {
    if let Some(children) = term.children() {
        if term
            .operator()
            .is_some_and(|op| op == OP_FORALL || op == OP_EXISTS)
        {
            out.extend(quantifier_vars(term));
        }
        for child in children {
            collect_locally_quantified(child, out);
        }
    }
}

// ============================================================================
// RULE SET
// ============================================================================

#[derive(Debug, Default)]
struct RuleSetInner {
    by_id: FxHashMap<RuleId, Arc<Rule>>,
    by_form: FxHashMap<Term, RuleId>,
    by_axiom: FxHashMap<AssertionId, RuleId>,
}

/// Concurrent set of registered rules, deduplicated by rule form.
#[derive(Debug, Default)]
pub struct RuleSet {
    inner: RwLock<RuleSetInner>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule. Returns `None` if a rule with the same form is
    /// already present.
    pub fn add(&self, rule: Rule) -> Option<Arc<Rule>> {
        let mut inner = self.inner.write();
        if inner.by_form.contains_key(&rule.form) {
            return None;
        }
        let rule = Arc::new(rule);
        inner.by_form.insert(rule.form.clone(), rule.id);
        inner.by_axiom.insert(rule.axiom, rule.id);
        inner.by_id.insert(rule.id, rule.clone());
        Some(rule)
    }

    pub fn get(&self, id: RuleId) -> Option<Arc<Rule>> {
        self.inner.read().by_id.get(&id).cloned()
    }

    pub fn find_by_form(&self, form: &Term) -> Option<Arc<Rule>> {
        let inner = self.inner.read();
        inner.by_form.get(form).and_then(|id| inner.by_id.get(id)).cloned()
    }

    /// The rule whose TMS axiom is `axiom`, if any.
    pub fn find_by_axiom(&self, axiom: AssertionId) -> Option<Arc<Rule>> {
        let inner = self.inner.read();
        inner
            .by_axiom
            .get(&axiom)
            .and_then(|id| inner.by_id.get(id))
            .cloned()
    }

    pub fn remove(&self, id: RuleId) -> Option<Arc<Rule>> {
        let mut inner = self.inner.write();
        let rule = inner.by_id.remove(&id)?;
        inner.by_form.remove(&rule.form);
        inner.by_axiom.remove(&rule.axiom);
        Some(rule)
    }

    pub fn remove_by_form(&self, form: &Term) -> Option<Arc<Rule>> {
        let id = *self.inner.read().by_form.get(form)?;
        self.remove(id)
    }

    /// Remove every rule sourced from the given note.
    pub fn remove_by_source(&self, note: &NoteId) -> Vec<Arc<Rule>> {
        let ids: Vec<RuleId> = self
            .inner
            .read()
            .by_id
            .values()
            .filter(|rule| rule.source_note.as_ref() == Some(note))
            .map(|rule| rule.id)
            .collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Snapshot of all rules, in no particular order.
    pub fn all(&self) -> Vec<Arc<Rule>> {
        self.inner.read().by_id.values().cloned().collect()
    }

    /// Drop every rule. Used by snapshot load.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        *inner = RuleSetInner::default();
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::parse_term;

    fn t(s: &str) -> Term {
        parse_term(s).unwrap()
    }

    fn rule(s: &str) -> Result<Rule, EngineError> {
        Rule::new(t(s), 1.0, None, AssertionId::fresh())
    }

    #[test]
    fn accepts_implication_and_equivalence() {
        assert!(rule("(=> (p ?x) (q ?x))").is_ok());
        assert!(rule("(<=> (p ?x) (q ?x))").is_ok());
    }

    #[test]
    fn rejects_non_rule_forms() {
        assert!(rule("(p a)").is_err());
        assert!(rule("(=> (p ?x))").is_err());
        assert!(rule("(=> atom (q ?x))").is_err());
        assert!(rule("(=> (not atom) (q ?x))").is_err());
    }

    #[test]
    fn antecedent_true_flattens_to_no_clauses() {
        let r = rule("(=> true (q a))").unwrap();
        assert!(r.clauses.is_empty());
    }

    #[test]
    fn outer_and_is_flattened() {
        let r = rule("(=> (and (p ?x) (not (r ?x))) (q ?x))").unwrap();
        assert_eq!(r.clauses.len(), 2);
        assert_eq!(r.clauses[1].kif(), "(not (r ?x))");
    }

    #[test]
    fn rule_set_deduplicates_by_form() {
        let set = RuleSet::new();
        let first = rule("(=> (p ?x) (q ?x))").unwrap();
        let second = rule("(=> (p ?x) (q ?x))").unwrap();
        assert!(set.add(first).is_some());
        assert!(set.add(second).is_none());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn remove_by_source_clears_only_that_note() {
        let set = RuleSet::new();
        let note = NoteId::new("n1");
        let mut from_note = rule("(=> (p ?x) (q ?x))").unwrap();
        from_note.source_note = Some(note.clone());
        let global = rule("(=> (r ?x) (s ?x))").unwrap();
        set.add(from_note);
        set.add(global);
        let removed = set.remove_by_source(&note);
        assert_eq!(removed.len(), 1);
        assert_eq!(set.len(), 1);
    }
}
