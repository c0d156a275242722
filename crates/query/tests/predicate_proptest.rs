//! Property-based tests for the predicate algebra.
//!
//! Predicates are generated over one integer field and checked by
//! evaluating them on every row of a small domain (including Null): the
//! algebra may be conservative but must never claim something that row
//! evaluation contradicts.

use proptest::prelude::*;
use strand_core::Value;
use strand_query::ast::Expr;
use strand_query::eval::{evaluate, is_truthy};
use strand_query::predicate::{
    is_where_subset, minus_where_predicates, union_where_predicates,
};

fn domain() -> Vec<Value> {
    let mut rows: Vec<Value> = (-3i64..=13)
        .map(|x| Value::object([("x", Value::Int64(x))]))
        .collect();
    rows.push(Value::object([("x", Value::Null)]));
    rows.push(Value::object([("x", Value::Float64(4.5))]));
    rows
}

fn matches(expr: &Expr, row: &Value) -> bool {
    is_truthy(&evaluate(expr, row).expect("generated predicates evaluate"))
}

fn literal() -> impl Strategy<Value = i64> {
    0i64..10
}

fn atom() -> impl Strategy<Value = Expr> {
    let x = || Expr::col("x");
    prop_oneof![
        literal().prop_map(move |v| Expr::eq(x(), Expr::val(v))),
        literal().prop_map(move |v| Expr::gt(x(), Expr::val(v))),
        literal().prop_map(move |v| Expr::gte(x(), Expr::val(v))),
        literal().prop_map(move |v| Expr::lt(x(), Expr::val(v))),
        literal().prop_map(move |v| Expr::lte(x(), Expr::val(v))),
        literal().prop_map(move |v| Expr::lt(Expr::val(v), x())),
        prop::collection::vec(literal(), 0..4).prop_map(move |vs| {
            Expr::in_list(x(), vs.into_iter().map(Value::Int64).collect())
        }),
    ]
}

fn predicate() -> impl Strategy<Value = Expr> {
    atom().prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..3).prop_map(Expr::and),
            prop::collection::vec(inner.clone(), 1..3).prop_map(Expr::or),
            inner.prop_map(Expr::not),
        ]
    })
}

proptest! {
    /// Property: a claimed subset never contains a row the superset rejects.
    #[test]
    fn subset_is_sound(a in predicate(), b in predicate()) {
        if is_where_subset(Some(&a), Some(&b)) {
            for row in domain() {
                prop_assert!(!matches(&a, &row) || matches(&b, &row), "row {} in {} but not {}", row, a, b);
            }
        }
    }

    /// Property: every predicate is a subset of itself and of "everything".
    #[test]
    fn subset_is_reflexive(a in predicate()) {
        prop_assert!(is_where_subset(Some(&a), Some(&a)));
        prop_assert!(is_where_subset(Some(&a), None));
    }

    /// Property: the union matches every row any input matches.
    #[test]
    fn union_covers_inputs(preds in prop::collection::vec(predicate(), 1..4)) {
        let inputs: Vec<Option<Expr>> = preds.iter().cloned().map(Some).collect();
        let union = union_where_predicates(&inputs).expect("no absent input");
        for row in domain() {
            let any = preds.iter().any(|p| matches(p, &row));
            prop_assert_eq!(any, matches(&union, &row), "row {} union {}", row, union);
        }
    }

    /// Property: `a - b` is exactly the rows of `a` that `b` does not match.
    #[test]
    fn minus_is_exact(a in predicate(), b in predicate()) {
        if let Some(diff) = minus_where_predicates(Some(&a), Some(&b)) {
            for row in domain() {
                let expected = matches(&a, &row) && !matches(&b, &row);
                prop_assert_eq!(expected, matches(&diff, &row), "row {} a {} b {} diff {}", row, a, b, diff);
            }
        }
    }
}
