//! Expression evaluation.
//!
//! Rows are `Value::Object`s. Inside a query pipeline the row is namespaced
//! by alias (`{"todo": {...}, "user": {...}}`) so that `todo.done` resolves
//! through the alias segment; subscription filters and index expressions
//! evaluate against the bare row.
//!
//! Comparisons follow three-valued logic: any comparison involving Null
//! yields Null, and a filter only passes rows whose predicate is
//! `Boolean(true)`.

use crate::ast::{Expr, Func};
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;
use strand_core::{pattern_match, Error, Result, Value};

/// A compiled expression.
pub type Evaluator = Rc<dyn Fn(&Value) -> Result<Value>>;

/// A compiled boolean filter.
pub type Predicate = Rc<dyn Fn(&Value) -> Result<bool>>;

/// Compiles an expression into a reusable evaluator.
pub fn compile(expr: &Expr) -> Evaluator {
    let expr = expr.clone();
    Rc::new(move |row: &Value| evaluate(&expr, row))
}

/// Compiles a boolean expression into a filter.
pub fn compile_predicate(expr: &Expr) -> Predicate {
    let expr = expr.clone();
    Rc::new(move |row: &Value| Ok(is_truthy(&evaluate(&expr, row)?)))
}

/// True only for `Boolean(true)`.
pub fn is_truthy(value: &Value) -> bool {
    matches!(value, Value::Boolean(true))
}

/// Evaluates `expr` against `row`.
pub fn evaluate(expr: &Expr, row: &Value) -> Result<Value> {
    match expr {
        Expr::Ref(r) => Ok(row.get_path(&r.path).cloned().unwrap_or(Value::Null)),
        Expr::Val(v) => Ok(v.clone()),
        Expr::Agg { func, .. } => Err(Error::expression(alloc::format!(
            "aggregate `{}` used outside of a grouped select",
            func.name()
        ))),
        Expr::Func { func, args } => eval_func(*func, args, row),
    }
}

fn eval_func(func: Func, args: &[Expr], row: &Value) -> Result<Value> {
    match func {
        Func::And => {
            // false dominates, then unknown
            let mut unknown = false;
            for arg in args {
                match evaluate(arg, row)? {
                    Value::Boolean(false) => return Ok(Value::Boolean(false)),
                    Value::Boolean(true) => {}
                    _ => unknown = true,
                }
            }
            Ok(if unknown { Value::Null } else { Value::Boolean(true) })
        }
        Func::Or => {
            let mut unknown = false;
            for arg in args {
                match evaluate(arg, row)? {
                    Value::Boolean(true) => return Ok(Value::Boolean(true)),
                    Value::Boolean(false) => {}
                    _ => unknown = true,
                }
            }
            Ok(if unknown { Value::Null } else { Value::Boolean(false) })
        }
        Func::Not => {
            let [a] = arity::<1>(func, args)?;
            Ok(match evaluate(a, row)? {
                Value::Boolean(b) => Value::Boolean(!b),
                _ => Value::Null,
            })
        }
        Func::Eq | Func::Gt | Func::Gte | Func::Lt | Func::Lte => {
            let [a, b] = arity::<2>(func, args)?;
            let left = evaluate(a, row)?;
            let right = evaluate(b, row)?;
            Ok(compare(func, &left, &right))
        }
        Func::In => {
            let [a, b] = arity::<2>(func, args)?;
            let needle = evaluate(a, row)?;
            let list = evaluate(b, row)?;
            Ok(in_list(&needle, &list))
        }
        Func::Like | Func::Ilike => {
            let [a, b] = arity::<2>(func, args)?;
            let value = evaluate(a, row)?;
            let pattern = evaluate(b, row)?;
            Ok(match (value.as_str(), pattern.as_str()) {
                (Some(v), Some(p)) if func == Func::Like => Value::Boolean(pattern_match::like(v, p)),
                (Some(v), Some(p)) => Value::Boolean(pattern_match::ilike(v, p)),
                _ => Value::Null,
            })
        }
        Func::IsNull => {
            let [a] = arity::<1>(func, args)?;
            Ok(Value::Boolean(evaluate(a, row)?.is_null()))
        }
        Func::Upper | Func::Lower => {
            let [a] = arity::<1>(func, args)?;
            Ok(match evaluate(a, row)? {
                Value::String(s) if func == Func::Upper => Value::String(s.to_uppercase()),
                Value::String(s) => Value::String(s.to_lowercase()),
                _ => Value::Null,
            })
        }
        Func::Length => {
            let [a] = arity::<1>(func, args)?;
            Ok(match evaluate(a, row)? {
                Value::String(s) => Value::Int64(s.chars().count() as i64),
                Value::Array(items) => Value::Int64(items.len() as i64),
                _ => Value::Null,
            })
        }
        Func::Concat => {
            let mut out = String::new();
            for arg in args {
                match evaluate(arg, row)? {
                    Value::Null => {}
                    Value::String(s) => out.push_str(&s),
                    other => out.push_str(&alloc::format!("{}", other)),
                }
            }
            Ok(Value::String(out))
        }
        Func::Coalesce => {
            for arg in args {
                let v = evaluate(arg, row)?;
                if !v.is_null() {
                    return Ok(v);
                }
            }
            Ok(Value::Null)
        }
        Func::Add | Func::Subtract | Func::Multiply | Func::Divide => {
            let [a, b] = arity::<2>(func, args)?;
            let left = evaluate(a, row)?;
            let right = evaluate(b, row)?;
            Ok(arithmetic(func, &left, &right))
        }
        Func::Abs | Func::Floor | Func::Ceil | Func::Round => {
            let [a] = arity::<1>(func, args)?;
            Ok(match evaluate(a, row)? {
                Value::Int64(i) if func == Func::Abs => Value::Int64(i.wrapping_abs()),
                Value::Int64(i) => Value::Int64(i),
                Value::Float64(f) => Value::Float64(match func {
                    Func::Abs => libm::fabs(f),
                    Func::Floor => libm::floor(f),
                    Func::Ceil => libm::ceil(f),
                    _ => libm::round(f),
                }),
                _ => Value::Null,
            })
        }
    }
}

fn arity<'a, const N: usize>(func: Func, args: &'a [Expr]) -> Result<&'a [Expr; N]> {
    args.try_into().map_err(|_| {
        Error::expression(alloc::format!(
            "`{}` expects {} argument(s), got {}",
            func.name(),
            N,
            args.len()
        ))
    })
}

fn compare(func: Func, left: &Value, right: &Value) -> Value {
    if func == Func::Eq {
        return left.sql_eq(right).map(Value::Boolean).unwrap_or(Value::Null);
    }
    match left.sql_cmp(right) {
        Some(ord) => Value::Boolean(match func {
            Func::Gt => ord == Ordering::Greater,
            Func::Gte => ord != Ordering::Less,
            Func::Lt => ord == Ordering::Less,
            _ => ord != Ordering::Greater,
        }),
        None => Value::Null,
    }
}

fn in_list(needle: &Value, list: &Value) -> Value {
    let Some(items) = list.as_array() else {
        return Value::Null;
    };
    if needle.is_null() {
        return Value::Null;
    }
    let mut unknown = false;
    for item in items {
        match needle.sql_eq(item) {
            Some(true) => return Value::Boolean(true),
            Some(false) => {}
            None => unknown = true,
        }
    }
    if unknown {
        Value::Null
    } else {
        Value::Boolean(false)
    }
}

fn arithmetic(func: Func, left: &Value, right: &Value) -> Value {
    if let (Value::Int64(a), Value::Int64(b)) = (left, right) {
        let exact = match func {
            Func::Add => a.checked_add(*b),
            Func::Subtract => a.checked_sub(*b),
            Func::Multiply => a.checked_mul(*b),
            _ => None,
        };
        if let Some(v) = exact {
            return Value::Int64(v);
        }
    }
    let (Some(a), Some(b)) = (left.to_f64(), right.to_f64()) else {
        return Value::Null;
    };
    match func {
        Func::Add => Value::Float64(a + b),
        Func::Subtract => Value::Float64(a - b),
        Func::Multiply => Value::Float64(a * b),
        _ if b == 0.0 => Value::Null,
        _ => Value::Float64(a / b),
    }
}

/// Evaluates every expression of a sort tuple.
pub fn sort_tuple(exprs: &[Expr], row: &Value) -> Result<Vec<Value>> {
    exprs.iter().map(|e| evaluate(e, row)).collect()
}
