//! Index-assisted filtering.

use crate::lazy::IndexHandle;
use crate::traits::IndexOperation;
use alloc::collections::BTreeSet;
use strand_core::{Key, Value};
use strand_query::ast::{Expr, Func};

/// Candidate keys for rows matching `expr`, answered from ready indexes.
///
/// `expr` reads a single row (no alias segment). Returns `None` when some
/// part of the expression cannot be answered by an index; the caller then
/// scans. A returned set may be a superset of the matching rows when only
/// some conjuncts of an `and` are indexed, so callers still evaluate the
/// full expression against each candidate.
pub fn optimize_where(expr: &Expr, indexes: &[IndexHandle]) -> Option<BTreeSet<Key>> {
    let (func, args) = expr.as_func()?;
    match func {
        Func::And => {
            let mut result: Option<BTreeSet<Key>> = None;
            for arg in args {
                if let Some(keys) = optimize_where(arg, indexes) {
                    result = Some(match result {
                        Some(acc) => acc.intersection(&keys).cloned().collect(),
                        None => keys,
                    });
                }
            }
            result
        }
        Func::Or => {
            let mut result = BTreeSet::new();
            for arg in args {
                result.extend(optimize_where(arg, indexes)?);
            }
            Some(result)
        }
        _ => {
            let op = IndexOperation::from_func(func)?;
            let (path, value, op) = match args {
                [Expr::Ref(r), Expr::Val(v)] => (&r.path, v, op),
                [Expr::Val(v), Expr::Ref(r)] if func.is_comparison() => {
                    (&r.path, v, IndexOperation::from_func(func.flipped())?)
                }
                _ => return None,
            };
            lookup(indexes, path, op, value)
        }
    }
}

fn lookup(
    indexes: &[IndexHandle],
    path: &[alloc::string::String],
    op: IndexOperation,
    value: &Value,
) -> Option<BTreeSet<Key>> {
    let index = indexes
        .iter()
        .filter(|h| h.matches_field(path))
        .find_map(|h| h.ready().ok().filter(|i| i.supports(op)))?;
    tracing::trace!(index = %index.meta().name, ?op, "answering predicate from index");
    Some(index.lookup(op, value))
}
