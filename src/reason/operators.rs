//! Backward-chaining operators.
//!
//! An operator is a pure async function from a goal term to a result term.
//! The backward chainer awaits the result and interprets it: the atom `true`
//! succeeds with the current bindings, the atom `false` fails, and any other
//! term is unified with the goal. Operator errors and cancellations fail the
//! proof branch.
//!
//! The builtin library covers arithmetic: `(= ?S (+ 2 3))` binds `?S ↦ 5`,
//! and `(< 1 2)` proves outright.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::term::Term;

use super::BoxFuture;

/// A registered operator.
pub trait Operator: Send + Sync {
    fn name(&self) -> &str;

    /// Evaluate the goal. The whole goal list (operator included) is passed.
    fn apply(&self, goal: Term) -> BoxFuture<Result<Term, String>>;
}

/// Registry of operators keyed by head atom.
#[derive(Default)]
pub struct OperatorRegistry {
    operators: RwLock<FxHashMap<SmolStr, Arc<dyn Operator>>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the arithmetic builtins.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(ArithmeticEquality));
        for (name, test) in [
            ("<", (|a, b| a < b) as fn(f64, f64) -> bool),
            (">", |a, b| a > b),
            ("<=", |a, b| a <= b),
            (">=", |a, b| a >= b),
            ("==", |a, b| a == b),
        ] {
            registry.register(Arc::new(Comparison { name, test }));
        }
        registry
    }

    pub fn register(&self, operator: Arc<dyn Operator>) {
        self.operators
            .write()
            .insert(SmolStr::new(operator.name()), operator);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Operator>> {
        self.operators.read().get(name).cloned()
    }
}

// ============================================================================
// BUILTINS
// ============================================================================

/// `(= L R)` with at least one arithmetically evaluable side. A variable on
/// one side is answered with the evaluated other side in goal shape, so
/// unification binds it.
struct ArithmeticEquality;

impl Operator for ArithmeticEquality {
    fn name(&self) -> &str {
        "="
    }

    fn apply(&self, goal: Term) -> BoxFuture<Result<Term, String>> {
        let result = (|| {
            let children = goal.children().ok_or("not a call")?;
            if children.len() != 3 {
                return Err("= takes two operands".to_string());
            }
            let (left, right) = (&children[1], &children[2]);
            let left_value = eval_numeric(left);
            let right_value = eval_numeric(right);
            Ok(match (left_value, right_value) {
                (Some(l), Some(r)) => Term::atom(if l == r { "true" } else { "false" }),
                (None, Some(r)) if left.is_variable() => Term::list(vec![
                    Term::atom("="),
                    number_atom(r),
                    right.clone(),
                ]),
                (Some(l), None) if right.is_variable() => Term::list(vec![
                    Term::atom("="),
                    left.clone(),
                    number_atom(l),
                ]),
                _ => Term::atom("false"),
            })
        })();
        Box::pin(std::future::ready(result))
    }
}

/// Numeric comparison returning the atom `true` or `false`.
struct Comparison {
    name: &'static str,
    test: fn(f64, f64) -> bool,
}

impl Operator for Comparison {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, goal: Term) -> BoxFuture<Result<Term, String>> {
        let test = self.test;
        let result = (|| {
            let children = goal.children().ok_or_else(|| "not a call".to_string())?;
            if children.len() != 3 {
                return Err(format!("{} takes two operands", goal));
            }
            let left = eval_numeric(&children[1]).ok_or_else(|| "not numeric".to_string())?;
            let right = eval_numeric(&children[2]).ok_or_else(|| "not numeric".to_string())?;
            Ok(Term::atom(if test(left, right) { "true" } else { "false" }))
        })();
        Box::pin(std::future::ready(result))
    }
}

/// Evaluate a numeric expression: a number atom, or `+ - * /` applied to
/// numeric expressions.
pub fn eval_numeric(term: &Term) -> Option<f64> {
    if let Some(value) = term.as_atom() {
        return value.parse::<f64>().ok();
    }
    let children = term.children()?;
    let op = term.operator()?;
    let mut values = children[1..].iter().map(eval_numeric);
    let first = values.next()??;
    match op.as_str() {
        "+" => values.try_fold(first, |acc, v| Some(acc + v?)),
        "*" => values.try_fold(first, |acc, v| Some(acc * v?)),
        "-" => {
            if children.len() == 2 {
                Some(-first)
            } else {
                values.try_fold(first, |acc, v| Some(acc - v?))
            }
        }
        "/" => values.try_fold(first, |acc, v| {
            let v = v?;
            if v == 0.0 { None } else { Some(acc / v) }
        }),
        _ => None,
    }
}

/// Render a numeric result, integral values without a fraction.
pub fn number_atom(value: f64) -> Term {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        Term::atom(format!("{}", value as i64))
    } else {
        Term::atom(format!("{value}"))
    }
}
