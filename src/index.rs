//! Structural path index for candidate retrieval.
//!
//! A trie keyed on term shape. Each inserted term contributes one path (the
//! pre-order key sequence of its structure), and the owning assertion id is
//! recorded at the path's terminal node. The three search primitives return
//! a *superset* of the matching assertion ids; callers apply the appropriate
//! semantic relation (`unify` / `match_terms`) as the final filter.
//!
//! Enables:
//! - "find unifiable": assertions whose term might unify with a query
//! - "find instances": assertions that a pattern generalizes
//! - "find generalizations": assertions whose term generalizes a query

use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;

use crate::assertion::AssertionId;
use crate::term::{Term, TermKind};

/// One step of a term's path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PathKey {
    /// An atom, keyed by value.
    Atom(SmolStr),
    /// Sentinel for any variable.
    Variable,
    /// A list whose head is the given atom.
    ListOp(SmolStr),
    /// Sentinel for a list whose head is not an atom.
    ListMarker,
}

fn key_of(term: &Term) -> PathKey {
    match term.kind() {
        TermKind::Atom(value) => PathKey::Atom(value.clone()),
        TermKind::Variable(_) => PathKey::Variable,
        TermKind::List(_) => match term.operator() {
            Some(op) => PathKey::ListOp(op.clone()),
            None => PathKey::ListMarker,
        },
    }
}

/// The elements a term contributes to the walk after its own key: all
/// children for a marker-keyed list (the head was not consumed by the key),
/// the non-head children otherwise.
fn tail_of(term: &Term) -> &[Term] {
    match (term.children(), term.operator()) {
        (Some(children), Some(_)) => &children[1..],
        (Some(children), None) => children,
        (None, _) => &[],
    }
}

#[derive(Debug, Default)]
struct Node {
    /// Assertions whose term's path terminates here.
    ids: FxHashSet<AssertionId>,
    children: FxHashMap<PathKey, Node>,
}

impl Node {
    fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.children.is_empty()
    }

    /// Every id stored anywhere in this subtree.
    fn collect_all(&self, out: &mut FxHashSet<AssertionId>) {
        out.extend(self.ids.iter().copied());
        for child in self.children.values() {
            child.collect_all(out);
        }
    }
}

/// Trie over term shape. Not internally synchronized; the owning KB guards
/// it with its reader-writer lock.
#[derive(Debug, Default)]
pub struct PathIndex {
    root: Node,
    len: usize,
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed assertions.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, term: &Term, id: AssertionId) {
        let mut node = &mut self.root;
        let mut queue: Vec<Term> = vec![term.clone()];
        while let Some(current) = queue.pop() {
            queue.extend(tail_of(&current).iter().rev().cloned());
            node = node.children.entry(key_of(&current)).or_default();
        }
        if node.ids.insert(id) {
            self.len += 1;
        }
    }

    /// Remove an id, pruning nodes left with neither ids nor children.
    pub fn remove(&mut self, term: &Term, id: AssertionId) {
        let mut path: Vec<PathKey> = Vec::new();
        let mut queue: Vec<Term> = vec![term.clone()];
        while let Some(current) = queue.pop() {
            queue.extend(tail_of(&current).iter().rev().cloned());
            path.push(key_of(&current));
        }
        if remove_along(&mut self.root, &path, 0, id) {
            self.len -= 1;
        }
    }

    pub fn clear(&mut self) {
        self.root = Node::default();
        self.len = 0;
    }

    /// Candidate assertions whose term might unify with `query`.
    pub fn find_unifiable(&self, query: &Term) -> FxHashSet<AssertionId> {
        let mut out = FxHashSet::default();
        walk_unifiable(&self.root, &[query.clone()], &mut out);
        out
    }

    /// Candidate assertions that are instances of `pattern`.
    pub fn find_instances_of(&self, pattern: &Term) -> FxHashSet<AssertionId> {
        let mut out = FxHashSet::default();
        match pattern.kind() {
            TermKind::Variable(_) => self.root.collect_all(&mut out),
            TermKind::Atom(value) => {
                if let Some(child) = self.root.children.get(&PathKey::Atom(value.clone())) {
                    out.extend(child.ids.iter().copied());
                }
            }
            TermKind::List(_) => {
                if let Some(child) = self.root.children.get(&key_of(pattern)) {
                    child.collect_all(&mut out);
                }
            }
        }
        out
    }

    /// Candidate assertions whose term generalizes `query`.
    pub fn find_generalizations_of(&self, query: &Term) -> FxHashSet<AssertionId> {
        let mut out = FxHashSet::default();
        walk_generalizations(&self.root, &[query.clone()], &mut out);
        out
    }
}

fn remove_along(node: &mut Node, path: &[PathKey], at: usize, id: AssertionId) -> bool {
    if at == path.len() {
        return node.ids.remove(&id);
    }
    let Some(child) = node.children.get_mut(&path[at]) else {
        return false;
    };
    let removed = remove_along(child, path, at + 1, id);
    if child.is_empty() {
        node.children.remove(&path[at]);
    }
    removed
}

/// One step toward unifiable candidates: an indexed variable co-unifies with
/// any query subterm; a query variable accepts everything under the node; a
/// query list also accepts the list-marker subtree.
fn walk_unifiable(node: &Node, queue: &[Term], out: &mut FxHashSet<AssertionId>) {
    let Some((query, rest)) = queue.split_first() else {
        out.extend(node.ids.iter().copied());
        return;
    };

    if let Some(child) = node.children.get(&PathKey::Variable) {
        walk_unifiable(child, rest, out);
    }

    match query.kind() {
        TermKind::Variable(_) => node.collect_all(out),
        TermKind::Atom(value) => {
            if let Some(child) = node.children.get(&PathKey::Atom(value.clone())) {
                walk_unifiable(child, rest, out);
            }
        }
        TermKind::List(children) => {
            if let Some(child) = node.children.get(&PathKey::ListMarker) {
                child.collect_all(out);
            }
            let head = &children[0];
            if head.is_atom() {
                if let Some(child) = node.children.get(&key_of(query)) {
                    walk_unifiable(child, &with_rest(tail_of(query), rest), out);
                }
            } else if head.is_variable() {
                // A variable head unifies with any indexed operator.
                for (key, child) in &node.children {
                    if matches!(key, PathKey::ListOp(_)) {
                        walk_unifiable(child, &with_rest(&children[1..], rest), out);
                    }
                }
            }
        }
    }
}

fn walk_generalizations(node: &Node, queue: &[Term], out: &mut FxHashSet<AssertionId>) {
    let Some((query, rest)) = queue.split_first() else {
        out.extend(node.ids.iter().copied());
        return;
    };

    if let Some(child) = node.children.get(&PathKey::Variable) {
        walk_generalizations(child, rest, out);
    }

    match query.kind() {
        TermKind::Variable(_) => {}
        TermKind::Atom(value) => {
            if let Some(child) = node.children.get(&PathKey::Atom(value.clone())) {
                walk_generalizations(child, rest, out);
            }
        }
        TermKind::List(children) => {
            // Shallow list-marker match: var-headed stored patterns.
            if let Some(child) = node.children.get(&PathKey::ListMarker) {
                child.collect_all(out);
            }
            let head = &children[0];
            if head.is_atom() {
                if let Some(child) = node.children.get(&key_of(query)) {
                    walk_generalizations(child, &with_rest(tail_of(query), rest), out);
                }
            }
        }
    }
}

fn with_rest(front: &[Term], rest: &[Term]) -> Vec<Term> {
    let mut queue = Vec::with_capacity(front.len() + rest.len());
    queue.extend_from_slice(front);
    queue.extend_from_slice(rest);
    queue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::parse_term;
    use crate::unify::{Bindings, match_terms, unify};

    fn t(s: &str) -> Term {
        parse_term(s).unwrap()
    }

    fn id(n: u64) -> AssertionId {
        AssertionId(n)
    }

    fn index_of(entries: &[(&str, u64)]) -> PathIndex {
        let mut index = PathIndex::new();
        for (source, n) in entries {
            index.insert(&t(source), id(*n));
        }
        index
    }

    #[test]
    fn unifiable_candidates_cover_all_unifiers() {
        let index = index_of(&[
            ("(instance MyDog Dog)", 1),
            ("(instance MyCat Cat)", 2),
            ("(instance ?z Dog)", 3),
            ("(attribute MyDog Canine)", 4),
        ]);
        let query = t("(instance ?x Dog)");
        let found = index.find_unifiable(&query);
        // Every genuinely unifiable entry must be in the candidate set.
        assert!(found.contains(&id(1)));
        assert!(found.contains(&id(3)));
        assert!(!found.contains(&id(4)));
        for candidate in [t("(instance MyDog Dog)"), t("(instance ?z Dog)")] {
            assert!(unify(&query, &candidate, &Bindings::new()).is_some());
        }
    }

    #[test]
    fn variable_query_collects_everything() {
        let index = index_of(&[("(p a)", 1), ("(q b)", 2), ("c", 3)]);
        assert_eq!(index.find_unifiable(&t("?x")).len(), 3);
    }

    #[test]
    fn instances_are_found_under_the_pattern() {
        let index = index_of(&[
            ("(instance MyDog Dog)", 1),
            ("(instance MyCat Cat)", 2),
            ("(subclass Dog Animal)", 3),
        ]);
        let pattern = t("(instance ?x Dog)");
        let found = index.find_instances_of(&pattern);
        assert!(found.contains(&id(1)));
        assert!(!found.contains(&id(3)));
        assert!(match_terms(&pattern, &t("(instance MyDog Dog)"), &Bindings::new()).is_some());
    }

    #[test]
    fn generalizations_include_variable_patterns() {
        let index = index_of(&[
            ("(instance ?x Dog)", 1),
            ("(instance MyDog Dog)", 2),
            ("(instance MyDog ?k)", 3),
            ("(instance MyCat Cat)", 4),
        ]);
        let found = index.find_generalizations_of(&t("(instance MyDog Dog)"));
        assert!(found.contains(&id(1)));
        assert!(found.contains(&id(2)));
        assert!(found.contains(&id(3)));
        assert!(!found.contains(&id(4)));
    }

    #[test]
    fn remove_prunes_empty_nodes() {
        let mut index = PathIndex::new();
        let term = t("(p (q a) b)");
        index.insert(&term, id(1));
        assert_eq!(index.len(), 1);
        index.remove(&term, id(1));
        assert!(index.is_empty());
        assert!(index.root.children.is_empty());
        assert!(index.find_unifiable(&t("(p ?x ?y)")).is_empty());
    }

    #[test]
    fn shared_prefixes_stay_intact_after_removal() {
        let mut index = index_of(&[("(p a b)", 1), ("(p a c)", 2)]);
        index.remove(&t("(p a b)"), id(1));
        let found = index.find_unifiable(&t("(p a ?x)"));
        assert!(!found.contains(&id(1)));
        assert!(found.contains(&id(2)));
    }

    #[test]
    fn nested_structure_distinguishes_paths() {
        let index = index_of(&[("(p (f a))", 1), ("(p (g a))", 2)]);
        let found = index.find_unifiable(&t("(p (f ?x))"));
        assert!(found.contains(&id(1)));
        assert!(!found.contains(&id(2)));
    }
}
