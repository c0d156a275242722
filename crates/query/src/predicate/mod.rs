//! Predicate algebra.
//!
//! Reasons about `(where, orderBy, limit, offset)` descriptors without
//! looking at rows: whether one descriptor is covered by another, how to
//! merge several into one, and what is left of one after removing another.
//! Every function is total and conservative: when a relationship cannot be
//! proven the answer is `false` (subset) or `None` (difference).
//!
//! Residual clauses never reach this module; callers strip them first.

mod minus;
mod subset;
mod union;

pub use minus::minus_where_predicates;
pub use subset::{
    is_limit_subset, is_offset_limit_subset, is_order_by_subset, is_predicate_subset,
    is_where_subset,
};
pub use union::union_where_predicates;

use crate::ast::{Expr, Func, OrderByClause, PropRef};
use alloc::vec::Vec;
use core::cmp::Ordering;
use strand_core::Value;

/// A request for a slice of a collection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadSubsetOptions {
    /// Row filter; `None` means every row.
    pub filter: Option<Expr>,
    pub order_by: Vec<OrderByClause>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl LoadSubsetOptions {
    pub fn filtered(filter: Expr) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }

    pub fn with_order_by(mut self, order_by: Vec<OrderByClause>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// A single-field constraint recognized by the algebra.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Atom<'a> {
    /// `field <op> value` with the field on the left.
    Cmp {
        field: &'a PropRef,
        op: Func,
        value: &'a Value,
    },
    /// `field in [values]`.
    In {
        field: &'a PropRef,
        values: &'a [Value],
    },
}

impl<'a> Atom<'a> {
    pub(crate) fn parse(expr: &'a Expr) -> Option<Self> {
        let (func, args) = expr.as_func()?;
        match (func, args) {
            (Func::In, [Expr::Ref(field), Expr::Val(Value::Array(values))]) => {
                Some(Atom::In { field, values })
            }
            (op, [Expr::Ref(field), Expr::Val(value)]) if op.is_comparison() => {
                Some(Atom::Cmp { field, op, value })
            }
            (op, [Expr::Val(value), Expr::Ref(field)]) if op.is_comparison() => Some(Atom::Cmp {
                field,
                op: op.flipped(),
                value,
            }),
            _ => None,
        }
    }

    pub(crate) fn field(&self) -> &'a PropRef {
        match self {
            Atom::Cmp { field, .. } | Atom::In { field, .. } => field,
        }
    }

    /// The literal values the atom pins the field to, for `eq` and `in`.
    pub(crate) fn points(&self) -> Option<&'a [Value]> {
        match *self {
            Atom::Cmp {
                op: Func::Eq,
                value,
                ..
            } => Some(core::slice::from_ref(value)),
            Atom::In { values, .. } => Some(values),
            Atom::Cmp { .. } => None,
        }
    }

    /// Whether a row whose field equals `v` satisfies the atom.
    ///
    /// `None` when the answer is unknown (Null or incomparable types).
    pub(crate) fn accepts(&self, v: &Value) -> Option<bool> {
        match *self {
            Atom::Cmp { op, value, .. } => satisfies(v, op, value),
            Atom::In { values, .. } => {
                let mut unknown = false;
                for w in values {
                    match v.sql_eq(w) {
                        Some(true) => return Some(true),
                        Some(false) => {}
                        None => unknown = true,
                    }
                }
                if unknown {
                    None
                } else {
                    Some(false)
                }
            }
        }
    }

    pub(crate) fn bound(&self) -> Option<Bound<'a>> {
        match *self {
            Atom::Cmp { op, value, .. } => Bound::new(op, value),
            Atom::In { .. } => None,
        }
    }
}

/// `v <op> w` under SQL semantics.
pub(crate) fn satisfies(v: &Value, op: Func, w: &Value) -> Option<bool> {
    if op == Func::Eq {
        return v.sql_eq(w);
    }
    let ord = v.sql_cmp(w)?;
    Some(match op {
        Func::Gt => ord == Ordering::Greater,
        Func::Gte => ord != Ordering::Less,
        Func::Lt => ord == Ordering::Less,
        Func::Lte => ord != Ordering::Greater,
        _ => return None,
    })
}

/// One side of a range.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Bound<'a> {
    pub value: &'a Value,
    pub inclusive: bool,
    pub lower: bool,
}

impl<'a> Bound<'a> {
    fn new(op: Func, value: &'a Value) -> Option<Self> {
        let (lower, inclusive) = match op {
            Func::Gt => (true, false),
            Func::Gte => (true, true),
            Func::Lt => (false, false),
            Func::Lte => (false, true),
            _ => return None,
        };
        Some(Self {
            value,
            inclusive,
            lower,
        })
    }

    pub(crate) fn op(&self) -> Func {
        match (self.lower, self.inclusive) {
            (true, false) => Func::Gt,
            (true, true) => Func::Gte,
            (false, false) => Func::Lt,
            (false, true) => Func::Lte,
        }
    }

    /// The complement bound: `not(x > v)` is `x <= v`.
    pub(crate) fn negated(&self) -> Self {
        Self {
            value: self.value,
            inclusive: !self.inclusive,
            lower: !self.lower,
        }
    }

    /// Compares two bounds on the same side by how much they admit.
    ///
    /// `Greater` means `self` admits strictly more rows than `other`.
    pub(crate) fn looseness(&self, other: &Bound<'_>) -> Option<Ordering> {
        debug_assert_eq!(self.lower, other.lower);
        let ord = self.value.sql_cmp(other.value)?;
        let by_value = if self.lower { ord.reverse() } else { ord };
        Some(by_value.then(self.inclusive.cmp(&other.inclusive)))
    }

    pub(crate) fn to_expr(self, field: &PropRef) -> Expr {
        Expr::func(
            self.op(),
            alloc::vec![Expr::Ref(field.clone()), Expr::Val(self.value.clone())],
        )
    }
}

/// Builds `field = v` or `field in [..]` from a value list.
pub(crate) fn points_expr(field: &PropRef, mut values: Vec<Value>) -> Expr {
    match values.len() {
        0 => Expr::val(false),
        1 => Expr::eq(Expr::Ref(field.clone()), Expr::Val(values.remove(0))),
        _ => Expr::in_list(Expr::Ref(field.clone()), values),
    }
}

pub(crate) fn is_false(expr: &Expr) -> bool {
    matches!(expr, Expr::Val(Value::Boolean(false)))
}

pub(crate) fn is_true(expr: &Expr) -> bool {
    matches!(expr, Expr::Val(Value::Boolean(true)))
}

/// Operands of `func(..)` when `expr` is that call.
pub(crate) fn operands(expr: &Expr, func: Func) -> Option<&[Expr]> {
    match expr.as_func() {
        Some((f, args)) if f == func => Some(args),
        _ => None,
    }
}
