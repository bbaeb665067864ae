//! Unification, one-way matching, substitution, and rewriting.
//!
//! All four operations are pure and depth-limited: recursion is hard-capped
//! at [`MAX_TERM_RECURSION`] frames so pathological inputs fail closed
//! instead of overflowing the stack. Only full unification performs the
//! occurs check.

use rustc_hash::FxHashMap;
use serde::Serialize;
use smol_str::SmolStr;

use crate::config::MAX_TERM_RECURSION;
use crate::term::{Term, TermKind, is_reflexive_predicate};

// ============================================================================
// BINDINGS
// ============================================================================

/// A substitution: variable name (including `?`) → term.
///
/// Extension is persistent in the API sense: [`unify`] and [`match_terms`]
/// return a new map and leave their input untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Bindings(FxHashMap<SmolStr, Term>);

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Term> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SmolStr, &Term)> {
        self.0.iter()
    }

    /// A copy extended with one binding.
    pub fn bound(&self, name: SmolStr, term: Term) -> Self {
        let mut next = self.clone();
        next.0.insert(name, term);
        next
    }

    /// Insert in place. Used by operator plumbing; reasoners extend via
    /// [`Bindings::bound`].
    pub fn insert(&mut self, name: SmolStr, term: Term) {
        self.0.insert(name, term);
    }

    /// Canonical string form: entries sorted by variable name. Two binding
    /// maps are the same answer iff their canonical forms are equal.
    pub fn canonical(&self) -> String {
        let mut entries: Vec<(&SmolStr, &Term)> = self.0.iter().collect();
        entries.sort_unstable_by_key(|(name, _)| *name);
        let mut out = String::new();
        for (name, term) in entries {
            out.push_str(name);
            out.push('=');
            out.push_str(term.kif());
            out.push(';');
        }
        out
    }

    /// Keep only bindings for the given variable names.
    pub fn restricted_to(&self, names: &[SmolStr]) -> Self {
        Bindings(
            self.0
                .iter()
                .filter(|(name, _)| names.contains(name))
                .map(|(name, term)| (name.clone(), term.clone()))
                .collect(),
        )
    }
}

impl FromIterator<(SmolStr, Term)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (SmolStr, Term)>>(iter: I) -> Self {
        Bindings(iter.into_iter().collect())
    }
}

// ============================================================================
// UNIFICATION
// ============================================================================

/// Full unification with occurs check. Returns the extended bindings, or
/// `None` if the terms cannot unify.
pub fn unify(x: &Term, y: &Term, bindings: &Bindings) -> Option<Bindings> {
    unify_at(x, y, bindings, 0)
}

fn unify_at(x: &Term, y: &Term, bindings: &Bindings, depth: u32) -> Option<Bindings> {
    if depth > MAX_TERM_RECURSION {
        return None;
    }
    let x = substitute(x, bindings, true);
    let y = substitute(y, bindings, true);

    if x == y {
        return Some(bindings.clone());
    }
    if let Some(name) = x.as_variable() {
        return bind_variable(name, &y, bindings);
    }
    if let Some(name) = y.as_variable() {
        return bind_variable(name, &x, bindings);
    }
    match (x.children(), y.children()) {
        (Some(xs), Some(ys)) if xs.len() == ys.len() => {
            let mut current = bindings.clone();
            for (a, b) in xs.iter().zip(ys.iter()) {
                current = unify_at(a, b, &current, depth + 1)?;
            }
            Some(current)
        }
        _ => None,
    }
}

fn bind_variable(name: &SmolStr, term: &Term, bindings: &Bindings) -> Option<Bindings> {
    if occurs(name, term) {
        return None;
    }
    Some(bindings.bound(name.clone(), term.clone()))
}

/// Occurs check: does `name` appear anywhere in `term`?
fn occurs(name: &str, term: &Term) -> bool {
    match term.kind() {
        TermKind::Atom(_) => false,
        TermKind::Variable(v) => v == name,
        TermKind::List(children) => {
            term.has_variable() && children.iter().any(|child| occurs(name, child))
        }
    }
}

// ============================================================================
// ONE-WAY MATCHING
// ============================================================================

/// One-way matching: only variables of `pattern` may bind. A variable that
/// is already bound must re-match its binding against the target. No occurs
/// check.
pub fn match_terms(pattern: &Term, term: &Term, bindings: &Bindings) -> Option<Bindings> {
    match_at(pattern, term, bindings, 0)
}

fn match_at(pattern: &Term, term: &Term, bindings: &Bindings, depth: u32) -> Option<Bindings> {
    if depth > MAX_TERM_RECURSION {
        return None;
    }
    if let Some(name) = pattern.as_variable() {
        return match bindings.get(name) {
            Some(bound) => {
                let bound = bound.clone();
                match_at(&bound, term, bindings, depth + 1)
            }
            None => Some(bindings.bound(name.clone(), term.clone())),
        };
    }
    if pattern == term {
        return Some(bindings.clone());
    }
    match (pattern.children(), term.children()) {
        (Some(ps), Some(ts)) if ps.len() == ts.len() => {
            let mut current = bindings.clone();
            for (p, t) in ps.iter().zip(ts.iter()) {
                current = match_at(p, t, &current, depth + 1)?;
            }
            Some(current)
        }
        _ => None,
    }
}

// ============================================================================
// SUBSTITUTION
// ============================================================================

/// Apply bindings to a term. With `fully` false only the outermost variable
/// replacement is applied; with `fully` true bindings are chased
/// transitively. Terms without variables are returned unchanged.
pub fn substitute(term: &Term, bindings: &Bindings, fully: bool) -> Term {
    substitute_at(term, bindings, fully, 0)
}

fn substitute_at(term: &Term, bindings: &Bindings, fully: bool, depth: u32) -> Term {
    if depth > MAX_TERM_RECURSION || !term.has_variable() || bindings.is_empty() {
        return term.clone();
    }
    match term.kind() {
        TermKind::Atom(_) => term.clone(),
        TermKind::Variable(name) => match bindings.get(name) {
            Some(bound) if fully => substitute_at(bound, bindings, true, depth + 1),
            Some(bound) => bound.clone(),
            None => term.clone(),
        },
        TermKind::List(children) => {
            let mut changed = false;
            let mut next = Vec::with_capacity(children.len());
            for child in children {
                let substituted = substitute_at(child, bindings, fully, depth + 1);
                changed |= substituted != *child;
                next.push(substituted);
            }
            if changed { Term::list(next) } else { term.clone() }
        }
    }
}

// ============================================================================
// REWRITING
// ============================================================================

/// Attempt to rewrite `target` with the rule `lhs → rhs`: match `lhs` at the
/// root, or else recurse into list children and take the first subterm that
/// rewrites. `None` means no subterm rewrote (callers keep the original).
pub fn rewrite(target: &Term, lhs: &Term, rhs: &Term) -> Option<Term> {
    rewrite_at(target, lhs, rhs, 0)
}

fn rewrite_at(target: &Term, lhs: &Term, rhs: &Term, depth: u32) -> Option<Term> {
    if depth > MAX_TERM_RECURSION {
        return None;
    }
    if let Some(bindings) = match_terms(lhs, target, &Bindings::new()) {
        let result = substitute(rhs, &bindings, true);
        if result != *target {
            return Some(result);
        }
    }
    let children = target.children()?;
    for (i, child) in children.iter().enumerate() {
        if let Some(rewritten) = rewrite_at(child, lhs, rhs, depth + 1) {
            let mut next = children.to_vec();
            next[i] = rewritten;
            return Some(Term::list(next));
        }
    }
    None
}

// ============================================================================
// TRIVIALITY
// ============================================================================

/// `(R x x)` for `=` or a reflexive predicate is trivial; `(not L)` is
/// trivial iff `L` is. Trivial assertions are never committed.
pub fn is_trivial(term: &Term) -> bool {
    if let Some(inner) = term.negation_inner() {
        return is_trivial(inner);
    }
    let Some(children) = term.children() else {
        return false;
    };
    let Some(op) = term.operator() else {
        return false;
    };
    children.len() == 3 && is_reflexive_predicate(op) && children[1] == children[2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::parse_term;

    fn t(s: &str) -> Term {
        parse_term(s).unwrap()
    }

    #[test]
    fn unify_binds_both_sides() {
        let bindings = unify(&t("(p ?x b)"), &t("(p a ?y)"), &Bindings::new()).unwrap();
        assert_eq!(bindings.get("?x").unwrap().kif(), "a");
        assert_eq!(bindings.get("?y").unwrap().kif(), "b");
    }

    #[test]
    fn unify_is_sound() {
        let x = t("(p ?x (f ?y))");
        let y = t("(p a (f b))");
        let sigma = unify(&x, &y, &Bindings::new()).unwrap();
        assert_eq!(substitute(&x, &sigma, true), substitute(&y, &sigma, true));
    }

    #[test]
    fn unify_occurs_check_fails() {
        assert!(unify(&t("?x"), &t("(f ?x)"), &Bindings::new()).is_none());
    }

    #[test]
    fn unify_respects_existing_bindings() {
        let seed = unify(&t("?x"), &t("a"), &Bindings::new()).unwrap();
        assert!(unify(&t("(p ?x)"), &t("(p b)"), &seed).is_none());
        assert!(unify(&t("(p ?x)"), &t("(p a)"), &seed).is_some());
    }

    #[test]
    fn unify_arity_mismatch_fails() {
        assert!(unify(&t("(p a)"), &t("(p a b)"), &Bindings::new()).is_none());
    }

    #[test]
    fn match_is_one_way() {
        assert!(match_terms(&t("(p ?x)"), &t("(p a)"), &Bindings::new()).is_some());
        assert!(match_terms(&t("(p a)"), &t("(p ?x)"), &Bindings::new()).is_none());
    }

    #[test]
    fn match_binds_only_pattern_variables() {
        let pattern = t("(p ?x ?x)");
        let sigma = match_terms(&pattern, &t("(p a a)"), &Bindings::new()).unwrap();
        assert_eq!(substitute(&pattern, &sigma, true), t("(p a a)"));
        assert_eq!(sigma.len(), 1);
        assert!(match_terms(&pattern, &t("(p a b)"), &Bindings::new()).is_none());
    }

    #[test]
    fn substitute_outer_only() {
        let bindings: Bindings = [
            (SmolStr::new("?x"), t("?y")),
            (SmolStr::new("?y"), t("a")),
        ]
        .into_iter()
        .collect();
        assert_eq!(substitute(&t("?x"), &bindings, false), t("?y"));
        assert_eq!(substitute(&t("?x"), &bindings, true), t("a"));
    }

    #[test]
    fn substitute_returns_same_term_without_variables() {
        let term = t("(p a b)");
        let bindings: Bindings = [(SmolStr::new("?x"), t("c"))].into_iter().collect();
        assert_eq!(substitute(&term, &bindings, true), term);
    }

    #[test]
    fn rewrite_at_root_and_inside() {
        let lhs = t("(f ?x)");
        let rhs = t("?x");
        assert_eq!(rewrite(&t("(f a)"), &lhs, &rhs).unwrap(), t("a"));
        assert_eq!(rewrite(&t("(p (f a) b)"), &lhs, &rhs).unwrap(), t("(p a b)"));
        assert!(rewrite(&t("(p a b)"), &lhs, &rhs).is_none());
    }

    #[test]
    fn trivial_reflexive_forms() {
        assert!(is_trivial(&t("(= a a)")));
        assert!(is_trivial(&t("(instance ?x ?x)")));
        assert!(is_trivial(&t("(not (same b b))")));
        assert!(!is_trivial(&t("(= a b)")));
        assert!(!is_trivial(&t("(believes a a)")));
    }

    #[test]
    fn canonical_bindings_are_order_independent() {
        let first: Bindings = [
            (SmolStr::new("?x"), t("a")),
            (SmolStr::new("?y"), t("b")),
        ]
        .into_iter()
        .collect();
        let second: Bindings = [
            (SmolStr::new("?y"), t("b")),
            (SmolStr::new("?x"), t("a")),
        ]
        .into_iter()
        .collect();
        assert_eq!(first.canonical(), second.canonical());
    }
}
