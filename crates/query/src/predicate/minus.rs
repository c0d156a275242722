//! Difference of filters.

use super::{is_false, is_where_subset, operands, points_expr, Atom, Bound};
use crate::ast::{Expr, Func};
use alloc::vec::Vec;
use core::cmp::Ordering;
use strand_core::Value;

/// Computes `a AND NOT b`, the rows of `a` that a load of `b` did not cover.
///
/// Returns `None` when the difference has no simple form; callers then load
/// `a` unreduced.
pub fn minus_where_predicates(a: Option<&Expr>, b: Option<&Expr>) -> Option<Expr> {
    if is_where_subset(a, b) {
        return Some(Expr::val(false));
    }
    let (a, b) = (a?, b?);
    minus(a, b)
}

fn minus(a: &Expr, b: &Expr) -> Option<Expr> {
    if is_where_subset(Some(a), Some(b)) {
        return Some(Expr::val(false));
    }
    if is_false(b) {
        return Some(a.clone());
    }
    // (a1 or a2) - b = (a1 - b) or (a2 - b)
    if let Some(parts) = operands(a, Func::Or) {
        let rest = parts
            .iter()
            .map(|p| minus(p, b))
            .collect::<Option<Vec<_>>>()?;
        return Some(simplify_or(rest));
    }
    // a - (b1 or b2) = (a - b1) - b2
    if let Some(parts) = operands(b, Func::Or) {
        let mut rest = a.clone();
        for p in parts {
            rest = minus(&rest, p)?;
            if is_false(&rest) {
                break;
            }
        }
        return Some(rest);
    }

    let (a_atom, b_atom) = (Atom::parse(a)?, Atom::parse(b)?);
    if a_atom.field() != b_atom.field() {
        return None;
    }
    let field = a_atom.field();

    if let Some(points) = a_atom.points() {
        let remaining: Vec<Value> = points
            .iter()
            .filter(|v| b_atom.accepts(v) != Some(true))
            .cloned()
            .collect();
        return Some(points_expr(field, remaining));
    }

    let a_bound = a_atom.bound()?;
    let cut = b_atom.bound()?.negated();
    if a_bound.lower == cut.lower {
        // Same side: keep the tighter bound
        let tighter = match a_bound.looseness(&cut)? {
            Ordering::Greater => cut,
            _ => a_bound,
        };
        return Some(tighter.to_expr(field));
    }
    let (lower, upper) = if a_bound.lower {
        (a_bound, cut)
    } else {
        (cut, a_bound)
    };
    if range_is_empty(&lower, &upper)? {
        return Some(Expr::val(false));
    }
    Some(Expr::and(alloc::vec![
        lower.to_expr(field),
        upper.to_expr(field)
    ]))
}

fn range_is_empty(lower: &Bound<'_>, upper: &Bound<'_>) -> Option<bool> {
    Some(match lower.value.sql_cmp(upper.value)? {
        Ordering::Greater => true,
        Ordering::Equal => !(lower.inclusive && upper.inclusive),
        Ordering::Less => false,
    })
}

fn simplify_or(parts: Vec<Expr>) -> Expr {
    let kept: Vec<Expr> = parts.into_iter().filter(|p| !is_false(p)).collect();
    if kept.is_empty() {
        Expr::val(false)
    } else {
        Expr::or(kept)
    }
}
