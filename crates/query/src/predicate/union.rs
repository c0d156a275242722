//! Union of filters.

use super::{is_false, is_true, operands, points_expr, Atom, Bound};
use crate::ast::{Expr, Func, PropRef};
use alloc::vec::Vec;
use core::cmp::Ordering;
use strand_core::Value;

/// Merges several filters into one that matches any row matched by one of
/// them.
///
/// An absent filter (every row) absorbs the rest. `eq`/`in` on the same
/// field fold into one `in` list; lower or upper bounds on the same field
/// keep the loosest; everything else is joined with `or`.
pub fn union_where_predicates(predicates: &[Option<Expr>]) -> Option<Expr> {
    let mut disjuncts: Vec<&Expr> = Vec::new();
    for p in predicates {
        flatten_or(p.as_ref()?, &mut disjuncts);
    }

    let mut merged = Merger::default();
    for d in disjuncts {
        if is_true(d) {
            return Some(Expr::val(true));
        }
        if is_false(d) {
            continue;
        }
        merged.push(d);
    }
    Some(merged.finish())
}

fn flatten_or<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    match operands(expr, Func::Or) {
        Some(args) => args.iter().for_each(|a| flatten_or(a, out)),
        None => out.push(expr),
    }
}

enum Slot<'a> {
    Points { field: &'a PropRef, values: Vec<Value> },
    Bound { field: &'a PropRef, bound: Bound<'a> },
    Other(&'a Expr),
}

#[derive(Default)]
struct Merger<'a> {
    slots: Vec<Slot<'a>>,
}

impl<'a> Merger<'a> {
    fn push(&mut self, expr: &'a Expr) {
        let Some(atom) = Atom::parse(expr) else {
            self.push_other(expr);
            return;
        };
        let field = atom.field();
        if let Some(points) = atom.points() {
            let position = self
                .slots
                .iter()
                .position(|s| matches!(s, Slot::Points { field: f, .. } if *f == field));
            let index = match position {
                Some(i) => i,
                None => {
                    self.slots.push(Slot::Points {
                        field,
                        values: Vec::new(),
                    });
                    self.slots.len() - 1
                }
            };
            if let Slot::Points { values, .. } = &mut self.slots[index] {
                for v in points {
                    if !values.contains(v) {
                        values.push(v.clone());
                    }
                }
            }
            return;
        }
        let Some(bound) = atom.bound() else {
            self.push_other(expr);
            return;
        };
        for slot in self.slots.iter_mut() {
            if let Slot::Bound { field: f, bound: b } = slot {
                if *f == field && b.lower == bound.lower {
                    match bound.looseness(b) {
                        Some(Ordering::Greater) => {
                            *b = bound;
                            return;
                        }
                        Some(_) => return,
                        // incomparable literals stay separate
                        None => {}
                    }
                }
            }
        }
        self.slots.push(Slot::Bound { field, bound });
    }

    fn push_other(&mut self, expr: &'a Expr) {
        let duplicate = self
            .slots
            .iter()
            .any(|s| matches!(s, Slot::Other(e) if *e == expr));
        if !duplicate {
            self.slots.push(Slot::Other(expr));
        }
    }

    fn finish(self) -> Expr {
        let mut out: Vec<Expr> = Vec::with_capacity(self.slots.len());
        for slot in self.slots {
            let expr = match slot {
                Slot::Points { field, values } => points_expr(field, values),
                Slot::Bound { field, bound } => bound.to_expr(field),
                Slot::Other(e) => e.clone(),
            };
            if !out.contains(&expr) {
                out.push(expr);
            }
        }
        match out.len() {
            0 => Expr::val(false),
            _ => Expr::or(out),
        }
    }
}
