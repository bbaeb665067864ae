//! Immutable, interned S-expression terms.
//!
//! A [`Term`] is one of three variants: an atom (symbol or quoted string), a
//! variable (`?`-prefixed name), or a list of terms. Terms are hash-consed
//! through a process-wide interner, so equal terms share one allocation and
//! equality is a pointer comparison on the hot path. Derived properties such
//! as weight, the occurring-variable set, skolem occurrence, and the
//! canonical KIF form are computed once and cached on the shared record.

mod intern;
mod lexer;
mod parser;

pub use intern::{Interner, interner};
pub use lexer::{KifToken, Lexer, Token, TokenKind, tokenize};
pub use parser::{Parsed, parse_term, parse_terms};

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use rustc_hash::FxHashSet;
use smol_str::SmolStr;

// ============================================================================
// RESERVED OPERATORS AND SYMBOL CLASSES
// ============================================================================

/// `(=> antecedent consequent)`
pub const OP_IMPLIES: &str = "=>";
/// `(<=> antecedent consequent)`
pub const OP_IFF: &str = "<=>";
pub const OP_AND: &str = "and";
pub const OP_OR: &str = "or";
pub const OP_NOT: &str = "not";
pub const OP_EXISTS: &str = "exists";
pub const OP_FORALL: &str = "forall";
pub const OP_EQUAL: &str = "=";

/// Prefix of skolem constants introduced by existential elimination.
pub const SKOLEM_CONSTANT_PREFIX: &str = "skc_";
/// Prefix of skolem function symbols introduced by existential elimination.
pub const SKOLEM_FUNCTION_PREFIX: &str = "skf_";

/// Predicates that are reflexive: `(R x x)` carries no information and is
/// never committed.
pub const REFLEXIVE_PREDICATES: [&str; 8] = [
    "instance",
    "subclass",
    "subrelation",
    "equivalent",
    "same",
    "equal",
    "domain",
    "range",
];

/// True if `op` is `=` or one of the reflexive predicates.
pub fn is_reflexive_predicate(op: &str) -> bool {
    op == OP_EQUAL || REFLEXIVE_PREDICATES.contains(&op)
}

// ============================================================================
// TERM
// ============================================================================

/// The three term variants.
#[derive(Debug)]
pub enum TermKind {
    /// A symbol or quoted string. Equal iff values are equal.
    Atom(SmolStr),
    /// A `?`-prefixed name of length ≥ 2.
    Variable(SmolStr),
    /// An ordered sequence of terms.
    List(Vec<Term>),
}

/// Shared payload of an interned term.
///
/// The structural hash, weight, and occurrence flags are computed at
/// construction (children are already interned, so this is O(arity), not
/// O(size)); the KIF form and variable set are filled on first access.
#[derive(Debug)]
pub struct TermData {
    kind: TermKind,
    hash: u64,
    weight: u32,
    has_variable: bool,
    has_skolem: bool,
    kif: OnceLock<String>,
    variables: OnceLock<Vec<SmolStr>>,
}

/// An immutable, interned term. Cheap to clone (one `Arc` increment).
#[derive(Clone)]
pub struct Term(Arc<TermData>);

impl Term {
    /// Intern an atom.
    pub fn atom(value: impl Into<SmolStr>) -> Term {
        interner().intern(TermKind::Atom(value.into()))
    }

    /// Intern a variable. The name must carry its `?` prefix.
    pub fn variable(name: impl Into<SmolStr>) -> Term {
        let name = name.into();
        debug_assert!(
            name.starts_with('?') && name.len() >= 2,
            "variable name must start with '?' and have length >= 2: {name:?}"
        );
        interner().intern(TermKind::Variable(name))
    }

    /// Intern a list. Child order is preserved.
    pub fn list(children: Vec<Term>) -> Term {
        interner().intern(TermKind::List(children))
    }

    /// `(not inner)`
    pub fn negated(inner: Term) -> Term {
        Term::list(vec![Term::atom(OP_NOT), inner])
    }

    pub(crate) fn from_data(data: TermData) -> Term {
        Term(Arc::new(data))
    }

    pub fn kind(&self) -> &TermKind {
        &self.0.kind
    }

    pub fn is_atom(&self) -> bool {
        matches!(self.0.kind, TermKind::Atom(_))
    }

    pub fn is_variable(&self) -> bool {
        matches!(self.0.kind, TermKind::Variable(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self.0.kind, TermKind::List(_))
    }

    /// The atom's value, if this is an atom.
    pub fn as_atom(&self) -> Option<&SmolStr> {
        match &self.0.kind {
            TermKind::Atom(value) => Some(value),
            _ => None,
        }
    }

    /// The variable's name (including `?`), if this is a variable.
    pub fn as_variable(&self) -> Option<&SmolStr> {
        match &self.0.kind {
            TermKind::Variable(name) => Some(name),
            _ => None,
        }
    }

    /// The list's children, if this is a list.
    pub fn children(&self) -> Option<&[Term]> {
        match &self.0.kind {
            TermKind::List(children) => Some(children),
            _ => None,
        }
    }

    /// The operator of a list: the value of its first child when that child
    /// is an atom.
    pub fn operator(&self) -> Option<&SmolStr> {
        self.children()?.first()?.as_atom()
    }

    /// True if the top operator is `not`.
    pub fn is_negated(&self) -> bool {
        self.operator().is_some_and(|op| op == OP_NOT)
    }

    /// The inner term of `(not inner)`, if this is a well-formed negation.
    pub fn negation_inner(&self) -> Option<&Term> {
        let children = self.children()?;
        if children.len() == 2 && self.is_negated() {
            Some(&children[1])
        } else {
            None
        }
    }

    /// 1 for atoms and variables, 1 + Σ children for lists.
    pub fn weight(&self) -> u32 {
        self.0.weight
    }

    /// Whether any variable occurs anywhere inside.
    pub fn has_variable(&self) -> bool {
        self.0.has_variable
    }

    /// Whether any skolem constant or function symbol occurs anywhere inside.
    pub fn has_skolem(&self) -> bool {
        self.0.has_skolem
    }

    /// The set of variable names occurring anywhere inside, sorted.
    pub fn variables(&self) -> &[SmolStr] {
        self.0.variables.get_or_init(|| {
            let mut seen = FxHashSet::default();
            collect_variables(self, &mut seen);
            let mut names: Vec<SmolStr> = seen.into_iter().collect();
            names.sort_unstable();
            names
        })
    }

    /// The canonical KIF string form, cached on first access.
    pub fn kif(&self) -> &str {
        self.0.kif.get_or_init(|| {
            let mut out = String::new();
            write_kif(self, &mut out);
            out
        })
    }

    pub(crate) fn structural_hash(&self) -> u64 {
        self.0.hash
    }
}

fn collect_variables(term: &Term, out: &mut FxHashSet<SmolStr>) {
    match term.kind() {
        TermKind::Atom(_) => {}
        TermKind::Variable(name) => {
            out.insert(name.clone());
        }
        TermKind::List(children) => {
            for child in children {
                collect_variables(child, out);
            }
        }
    }
}

impl TermData {
    pub(crate) fn new(kind: TermKind) -> TermData {
        let (hash, weight, has_variable, has_skolem) = match &kind {
            TermKind::Atom(value) => {
                let skolem = value.starts_with(SKOLEM_CONSTANT_PREFIX)
                    || value.starts_with(SKOLEM_FUNCTION_PREFIX);
                (hash_leaf(0, value), 1, false, skolem)
            }
            TermKind::Variable(name) => (hash_leaf(1, name), 1, true, false),
            TermKind::List(children) => {
                let mut hasher = rustc_hash::FxHasher::default();
                2u8.hash(&mut hasher);
                let mut weight = 1u32;
                let mut has_variable = false;
                let mut has_skolem = false;
                for child in children {
                    hasher.write_u64(child.structural_hash());
                    weight += child.weight();
                    has_variable |= child.has_variable();
                    has_skolem |= child.has_skolem();
                }
                (hasher.finish(), weight, has_variable, has_skolem)
            }
        };
        TermData {
            kind,
            hash,
            weight,
            has_variable,
            has_skolem,
            kif: OnceLock::new(),
            variables: OnceLock::new(),
        }
    }
}

fn hash_leaf(tag: u8, text: &str) -> u64 {
    let mut hasher = rustc_hash::FxHasher::default();
    tag.hash(&mut hasher);
    text.hash(&mut hasher);
    hasher.finish()
}

// ============================================================================
// EQUALITY / HASHING
// ============================================================================

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        // Interned terms that are equal share an allocation.
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        if self.0.hash != other.0.hash {
            return false;
        }
        match (&self.0.kind, &other.0.kind) {
            (TermKind::Atom(a), TermKind::Atom(b)) => a == b,
            (TermKind::Variable(a), TermKind::Variable(b)) => a == b,
            (TermKind::List(a), TermKind::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Term {}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

// ============================================================================
// KIF RENDERING
// ============================================================================

/// Characters permitted in a bare (unquoted) atom token.
pub(crate) fn is_bare_atom_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_-+*/.<>=:!#%&'".contains(c)
}

fn atom_needs_quoting(value: &str) -> bool {
    value.is_empty() || !value.chars().all(is_bare_atom_char)
}

fn write_kif(term: &Term, out: &mut String) {
    match term.kind() {
        TermKind::Atom(value) => {
            if atom_needs_quoting(value) {
                out.push('"');
                for c in value.chars() {
                    if c == '"' || c == '\\' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push('"');
            } else {
                out.push_str(value);
            }
        }
        TermKind::Variable(name) => out.push_str(name),
        TermKind::List(children) => {
            out.push('(');
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                write_kif(child, out);
            }
            out.push(')');
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kif())
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kif())
    }
}

// ============================================================================
// SERDE (terms travel as KIF strings)
// ============================================================================

impl serde::Serialize for Term {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.kif())
    }
}

impl<'de> serde::Deserialize<'de> for Term {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Term, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_term(&text).map_err(serde::de::Error::custom)
    }
}
