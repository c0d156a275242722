//! Subset reasoning.

use super::{is_false, is_true, operands, Atom, LoadSubsetOptions};
use crate::ast::{Expr, Func, OrderByClause};
use core::cmp::Ordering;

/// True when every row matching `a` is guaranteed to match `b`.
///
/// `None` stands for "no filter" (every row).
pub fn is_where_subset(a: Option<&Expr>, b: Option<&Expr>) -> bool {
    match (a, b) {
        (_, None) => true,
        (None, Some(b)) => is_true(b),
        (Some(a), Some(b)) => expr_subset(a, b),
    }
}

fn expr_subset(a: &Expr, b: &Expr) -> bool {
    if a == b || is_false(a) || is_true(b) {
        return true;
    }
    if let Some(bs) = operands(b, Func::And) {
        return bs.iter().all(|bi| expr_subset(a, bi));
    }
    if let Some(as_) = operands(a, Func::Or) {
        return as_.iter().all(|ai| expr_subset(ai, b));
    }
    if let Some(as_) = operands(a, Func::And) {
        if as_.iter().any(|ai| expr_subset(ai, b)) {
            return true;
        }
    }
    if let Some(bs) = operands(b, Func::Or) {
        return bs.iter().any(|bi| expr_subset(a, bi));
    }
    match (Atom::parse(a), Atom::parse(b)) {
        (Some(a), Some(b)) if a.field() == b.field() => atom_subset(&a, &b),
        _ => false,
    }
}

fn atom_subset(a: &Atom<'_>, b: &Atom<'_>) -> bool {
    // Point constraints are checked value by value
    if let Some(points) = a.points() {
        return points.iter().all(|v| b.accepts(v) == Some(true));
    }
    let (Some(ab), Some(bb)) = (a.bound(), b.bound()) else {
        return false;
    };
    if ab.lower != bb.lower {
        return false;
    }
    matches!(
        bb.looseness(&ab),
        Some(Ordering::Greater) | Some(Ordering::Equal)
    )
}

/// True when `a` is empty or a prefix of `b`.
pub fn is_order_by_subset(a: &[OrderByClause], b: &[OrderByClause]) -> bool {
    a.len() <= b.len() && a.iter().zip(b).all(|(x, y)| x == y)
}

/// `a` returns no more rows than `b`.
pub fn is_limit_subset(a: Option<usize>, b: Option<usize>) -> bool {
    match (a, b) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(a), Some(b)) => a <= b,
    }
}

/// The window `[offset, offset + limit)` of `a` lies inside that of `b`.
pub fn is_offset_limit_subset(a: &LoadSubsetOptions, b: &LoadSubsetOptions) -> bool {
    let a_start = a.offset.unwrap_or(0);
    let b_start = b.offset.unwrap_or(0);
    if a.limit == Some(0) {
        return true;
    }
    if a_start < b_start {
        return false;
    }
    match (a.limit, b.limit) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(a_len), Some(b_len)) => a_start.saturating_add(a_len) <= b_start.saturating_add(b_len),
    }
}

/// True when loading `a` is covered by a completed load of `b`.
pub fn is_predicate_subset(a: &LoadSubsetOptions, b: &LoadSubsetOptions) -> bool {
    if b.limit.is_none() && b.offset.unwrap_or(0) == 0 {
        return is_where_subset(a.filter.as_ref(), b.filter.as_ref());
    }
    a.filter == b.filter
        && is_order_by_subset(&a.order_by, &b.order_by)
        && is_offset_limit_subset(a, b)
}
