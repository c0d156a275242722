//! Incremental aggregate operators.
//!
//! Each group keeps one running state per aggregate. States fold the
//! multiset of `(value, multiplicity)` pairs currently in the group:
//! `count`/`sum`/`avg` keep running totals, `min`/`max`/`median` keep an
//! ordered multiset, `mode` keeps a frequency table.

use crate::delta::{Delta, KeyedRow};
use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use hashbrown::{HashMap, HashSet};
use strand_core::{Error, Key, Result, Value};
use strand_query::ast::AggregateFunc;
use strand_query::eval::Evaluator;

/// Folds a group's multiset into a value.
pub type ReduceFn = Rc<dyn Fn(&[(Value, i32)]) -> Value>;

/// Derives the visible aggregate value from the reduced one.
pub type PostMapFn = Rc<dyn Fn(Value) -> Value>;

/// How an aggregate folds its inputs.
#[derive(Clone)]
pub enum Reducer {
    Builtin(AggregateFunc),
    Custom {
        reduce: ReduceFn,
        post_map: Option<PostMapFn>,
    },
}

impl fmt::Debug for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reducer::Builtin(func) => write!(f, "Builtin({})", func.name()),
            Reducer::Custom { post_map, .. } => f
                .debug_struct("Custom")
                .field("post_map", &post_map.is_some())
                .finish(),
        }
    }
}

/// One named aggregate of a group-by: `pre_map` projects a row to the
/// aggregated value, the reducer folds those values.
#[derive(Clone)]
pub struct Aggregate {
    pub pre_map: Evaluator,
    pub reducer: Reducer,
}

impl Aggregate {
    pub fn builtin(func: AggregateFunc, pre_map: Evaluator) -> Self {
        Self {
            pre_map,
            reducer: Reducer::Builtin(func),
        }
    }

    pub fn custom(pre_map: Evaluator, reduce: ReduceFn, post_map: Option<PostMapFn>) -> Self {
        Self {
            pre_map,
            reducer: Reducer::Custom { reduce, post_map },
        }
    }

    fn new_state(&self) -> AggregateState {
        match &self.reducer {
            Reducer::Builtin(func) => AggregateState::new(*func),
            Reducer::Custom { .. } => AggregateState::Custom {
                values: BTreeMap::new(),
            },
        }
    }

    fn output(&self, state: &AggregateState) -> Value {
        match (&self.reducer, state) {
            (Reducer::Custom { reduce, post_map }, AggregateState::Custom { values }) => {
                let items: Vec<(Value, i32)> =
                    values.iter().map(|(v, n)| (v.clone(), *n)).collect();
                let reduced = reduce(&items);
                match post_map {
                    Some(post_map) => post_map(reduced),
                    None => reduced,
                }
            }
            _ => state.get_value(),
        }
    }
}

/// Running state of one aggregate within one group.
#[derive(Clone, Debug, PartialEq)]
pub enum AggregateState {
    /// Non-null values seen
    Count { count: i64 },
    /// Integer and float parts are kept apart so integer sums stay exact
    Sum { ints: i128, floats: f64, float_count: i64 },
    Avg { sum: f64, count: i64 },
    /// Ordered multiset of orderable scalars
    Min { values: BTreeMap<Value, i32> },
    Max { values: BTreeMap<Value, i32> },
    /// Ordered multiset of numbers
    Median { values: BTreeMap<Value, i32> },
    /// Frequency table
    Mode { counts: BTreeMap<Value, i32> },
    Custom { values: BTreeMap<Value, i32> },
}

impl AggregateState {
    pub fn new(func: AggregateFunc) -> Self {
        match func {
            AggregateFunc::Count => AggregateState::Count { count: 0 },
            AggregateFunc::Sum => AggregateState::Sum {
                ints: 0,
                floats: 0.0,
                float_count: 0,
            },
            AggregateFunc::Avg => AggregateState::Avg { sum: 0.0, count: 0 },
            AggregateFunc::Min => AggregateState::Min {
                values: BTreeMap::new(),
            },
            AggregateFunc::Max => AggregateState::Max {
                values: BTreeMap::new(),
            },
            AggregateFunc::Median => AggregateState::Median {
                values: BTreeMap::new(),
            },
            AggregateFunc::Mode => AggregateState::Mode {
                counts: BTreeMap::new(),
            },
        }
    }

    /// Apply a single delta to this aggregate state.
    ///
    /// Null values are ignored by every built-in aggregate.
    pub fn apply(&mut self, value: &Value, diff: i32) {
        if value.is_null() && !matches!(self, AggregateState::Custom { .. }) {
            return;
        }
        match self {
            AggregateState::Count { count } => *count += diff as i64,
            AggregateState::Sum {
                ints,
                floats,
                float_count,
            } => match value {
                Value::Int64(i) => *ints += *i as i128 * diff as i128,
                Value::Float64(f) => {
                    *floats += f * diff as f64;
                    *float_count += diff as i64;
                }
                _ => {}
            },
            AggregateState::Avg { sum, count } => {
                if let Some(n) = value.to_f64() {
                    *sum += n * diff as f64;
                    *count += diff as i64;
                }
            }
            AggregateState::Min { values } | AggregateState::Max { values } => {
                if value.is_orderable_scalar() {
                    bump(values, value, diff);
                }
            }
            AggregateState::Median { values } => {
                if matches!(value, Value::Int64(_) | Value::Float64(_)) {
                    bump(values, value, diff);
                }
            }
            AggregateState::Mode { counts } => bump(counts, value, diff),
            AggregateState::Custom { values } => bump(values, value, diff),
        }
    }

    /// Get the current aggregate value.
    pub fn get_value(&self) -> Value {
        match self {
            AggregateState::Count { count } => Value::Int64(*count),
            AggregateState::Sum {
                ints,
                floats,
                float_count,
            } => {
                if *float_count == 0 {
                    match i64::try_from(*ints) {
                        Ok(i) => Value::Int64(i),
                        Err(_) => Value::Float64(*ints as f64),
                    }
                } else {
                    Value::Float64(*ints as f64 + *floats)
                }
            }
            AggregateState::Avg { sum, count } => {
                if *count == 0 {
                    Value::Null
                } else {
                    Value::Float64(*sum / *count as f64)
                }
            }
            AggregateState::Min { values } => values.keys().next().cloned().unwrap_or(Value::Null),
            AggregateState::Max { values } => {
                values.keys().next_back().cloned().unwrap_or(Value::Null)
            }
            AggregateState::Median { values } => median(values),
            AggregateState::Mode { counts } => {
                // Ties go to the smallest value
                let mut best: Option<(&Value, i32)> = None;
                for (value, n) in counts {
                    if best.map_or(true, |(_, m)| *n > m) {
                        best = Some((value, *n));
                    }
                }
                best.map(|(v, _)| v.clone()).unwrap_or(Value::Null)
            }
            AggregateState::Custom { .. } => Value::Null,
        }
    }
}

fn bump(values: &mut BTreeMap<Value, i32>, value: &Value, diff: i32) {
    let entry = values.entry(value.clone()).or_insert(0);
    *entry += diff;
    if *entry <= 0 {
        values.remove(value);
    }
}

fn median(values: &BTreeMap<Value, i32>) -> Value {
    let total: i64 = values.values().map(|n| *n as i64).sum();
    if total == 0 {
        return Value::Null;
    }
    // 0-based ranks of the middle element(s)
    let (lo, hi) = ((total - 1) / 2, total / 2);
    let mut seen = 0i64;
    let mut lo_value = None;
    for (value, n) in values {
        let next = seen + *n as i64;
        if lo_value.is_none() && lo < next {
            lo_value = value.to_f64();
        }
        if hi < next {
            let hi_value = value.to_f64().unwrap_or(0.0);
            return Value::Float64((lo_value.unwrap_or(hi_value) + hi_value) / 2.0);
        }
        seen = next;
    }
    Value::Null
}

struct Group {
    key: Value,
    rows: i64,
    states: Vec<AggregateState>,
    output: Option<Value>,
}

/// State for incremental GROUP BY aggregation.
///
/// The key function returns an object whose fields become the leading
/// fields of the group's output row; aggregate values follow under their
/// names. The output row is keyed by the rendering of the key object.
pub struct GroupAggregateState {
    key_fn: Evaluator,
    aggregates: Vec<(String, Aggregate)>,
    groups: HashMap<Key, Group>,
}

impl GroupAggregateState {
    pub fn new(key_fn: Evaluator, aggregates: Vec<(String, Aggregate)>) -> Self {
        Self {
            key_fn,
            aggregates,
            groups: HashMap::new(),
        }
    }

    /// Number of live groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Process a batch of input deltas and produce output deltas.
    ///
    /// For each affected group: a group whose last row left emits only
    /// `delete(old)`; a changed group emits `delete(old)` then
    /// `insert(new)`; a group whose output is unchanged emits nothing.
    pub fn process_deltas(&mut self, deltas: Vec<Delta<KeyedRow>>) -> Result<Vec<Delta<KeyedRow>>> {
        let mut touched: Vec<Key> = Vec::new();
        let mut seen: HashSet<Key> = HashSet::new();

        for delta in &deltas {
            if delta.is_noop() {
                continue;
            }
            let group_key = (self.key_fn)(&delta.data.value)?;
            if group_key.as_object().is_none() {
                return Err(Error::expression("group key must be an object"));
            }
            let id = Key::of_value(&group_key);
            let mut values = Vec::with_capacity(self.aggregates.len());
            for (_, aggregate) in &self.aggregates {
                values.push((aggregate.pre_map)(&delta.data.value)?);
            }

            let aggregates = &self.aggregates;
            let group = self.groups.entry(id.clone()).or_insert_with(|| Group {
                key: group_key,
                rows: 0,
                states: aggregates.iter().map(|(_, a)| a.new_state()).collect(),
                output: None,
            });
            group.rows += delta.diff as i64;
            for (state, value) in group.states.iter_mut().zip(&values) {
                state.apply(value, delta.diff);
            }
            if seen.insert(id.clone()) {
                touched.push(id);
            }
        }

        let mut output = Vec::new();
        for id in touched {
            let Some(group) = self.groups.get_mut(&id) else {
                continue;
            };
            if group.rows <= 0 {
                if let Some(old) = group.output.take() {
                    output.push(Delta::delete(KeyedRow::new(id.clone(), old)));
                }
                self.groups.remove(&id);
                continue;
            }

            let mut row = group.key.clone();
            if let Some(fields) = row.as_object_mut() {
                for ((name, aggregate), state) in self.aggregates.iter().zip(&group.states) {
                    fields.insert(name.clone(), aggregate.output(state));
                }
            }
            if group.output.as_ref() == Some(&row) {
                continue;
            }
            if let Some(old) = group.output.replace(row.clone()) {
                output.push(Delta::delete(KeyedRow::new(id.clone(), old)));
            }
            output.push(Delta::insert(KeyedRow::new(id, row)));
        }
        tracing::trace!(groups = self.groups.len(), emitted = output.len(), "group by processed");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use strand_query::ast::Expr;
    use strand_query::eval::compile;

    fn order(id: i64, customer: &str, amount: Value) -> KeyedRow {
        KeyedRow::new(
            Key::Int(id),
            Value::object([(
                "o",
                Value::object([("customer", Value::from(customer)), ("amount", amount)]),
            )]),
        )
    }

    fn key_fn() -> Evaluator {
        Rc::new(|row: &Value| -> Result<Value> {
            let customer = row.get_path(&["o", "customer"]).cloned().unwrap_or_default();
            Ok(Value::object([("customer", customer)]))
        })
    }

    fn amount() -> Evaluator {
        compile(&Expr::col("o.amount"))
    }

    fn state(aggregates: &[(&str, AggregateFunc)]) -> GroupAggregateState {
        GroupAggregateState::new(
            key_fn(),
            aggregates
                .iter()
                .map(|(name, func)| (String::from(*name), Aggregate::builtin(*func, amount())))
                .collect(),
        )
    }

    #[test]
    fn test_count_sum_avg() {
        let mut groups = state(&[
            ("count", AggregateFunc::Count),
            ("sum", AggregateFunc::Sum),
            ("avg", AggregateFunc::Avg),
        ]);
        let out = groups
            .process_deltas(vec![
                Delta::insert(order(1, "ann", Value::Int64(10))),
                Delta::insert(order(2, "ann", Value::Int64(20))),
                Delta::insert(order(3, "ann", Value::Null)),
            ])
            .unwrap();
        assert_eq!(out.len(), 1);
        let row = &out[0].data.value;
        assert_eq!(row.get("customer"), Some(&Value::from("ann")));
        assert_eq!(row.get("count"), Some(&Value::Int64(2)));
        assert_eq!(row.get("sum"), Some(&Value::Int64(30)));
        assert_eq!(row.get("avg"), Some(&Value::Float64(15.0)));
    }

    #[test]
    fn test_update_emits_delete_then_insert() {
        let mut groups = state(&[("sum", AggregateFunc::Sum)]);
        groups
            .process_deltas(vec![Delta::insert(order(1, "ann", Value::Int64(10)))])
            .unwrap();
        let out = groups
            .process_deltas(vec![Delta::insert(order(2, "ann", Value::Float64(0.5)))])
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out[0].is_delete());
        assert_eq!(out[0].data.value.get("sum"), Some(&Value::Int64(10)));
        assert!(out[1].is_insert());
        assert_eq!(out[1].data.value.get("sum"), Some(&Value::Float64(10.5)));
        assert_eq!(out[0].data.key, out[1].data.key);
    }

    #[test]
    fn test_emptied_group_disappears() {
        let mut groups = state(&[("count", AggregateFunc::Count)]);
        groups
            .process_deltas(vec![
                Delta::insert(order(1, "ann", Value::Int64(1))),
                Delta::insert(order(2, "bob", Value::Int64(1))),
            ])
            .unwrap();
        let out = groups
            .process_deltas(vec![Delta::delete(order(1, "ann", Value::Int64(1)))])
            .unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].is_delete());
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn test_unchanged_output_is_silent() {
        let mut groups = state(&[("max", AggregateFunc::Max)]);
        groups
            .process_deltas(vec![Delta::insert(order(1, "ann", Value::Int64(9)))])
            .unwrap();
        let out = groups
            .process_deltas(vec![Delta::insert(order(2, "ann", Value::Int64(3)))])
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_min_max_ignore_non_orderable() {
        let mut min = AggregateState::new(AggregateFunc::Min);
        let mut max = AggregateState::new(AggregateFunc::Max);
        for v in [Value::Int64(4), Value::from("zzz"), Value::Float64(2.5), Value::Int64(7)] {
            min.apply(&v, 1);
            max.apply(&v, 1);
        }
        assert_eq!(min.get_value(), Value::Float64(2.5));
        assert_eq!(max.get_value(), Value::Int64(7));
        min.apply(&Value::Float64(2.5), -1);
        assert_eq!(min.get_value(), Value::Int64(4));
    }

    #[test]
    fn test_median_and_mode() {
        let mut median = AggregateState::new(AggregateFunc::Median);
        let mut mode = AggregateState::new(AggregateFunc::Mode);
        for v in [3, 1, 4, 1, 5] {
            median.apply(&Value::Int64(v), 1);
            mode.apply(&Value::Int64(v), 1);
        }
        assert_eq!(median.get_value(), Value::Float64(3.0));
        assert_eq!(mode.get_value(), Value::Int64(1));
        median.apply(&Value::Int64(5), -1);
        assert_eq!(median.get_value(), Value::Float64(2.0));
        mode.apply(&Value::Int64(1), -1);
        // 1, 3 and 4 now tie
        assert_eq!(mode.get_value(), Value::Int64(1));
        mode.apply(&Value::Int64(1), -1);
        assert_eq!(mode.get_value(), Value::Int64(3));
    }

    #[test]
    fn test_custom_reducer() {
        let reduce: ReduceFn = Rc::new(|items: &[(Value, i32)]| {
            Value::Int64(items.iter().map(|(_, n)| *n as i64).sum())
        });
        let post_map: PostMapFn = Rc::new(|v: Value| Value::object([("n", v)]));
        let mut groups = GroupAggregateState::new(
            key_fn(),
            vec![(
                String::from("total"),
                Aggregate::custom(amount(), reduce, Some(post_map)),
            )],
        );
        let out = groups
            .process_deltas(vec![
                Delta::insert(order(1, "ann", Value::Int64(1))),
                Delta::insert(order(2, "ann", Value::Int64(1))),
                Delta::insert(order(3, "ann", Value::Int64(2))),
            ])
            .unwrap();
        assert_eq!(
            out[0].data.value.get_path(&["total", "n"]),
            Some(&Value::Int64(3))
        );
    }

    #[test]
    fn test_non_object_key_is_error() {
        let mut groups = GroupAggregateState::new(amount(), vec![]);
        let result = groups.process_deltas(vec![Delta::insert(order(1, "ann", Value::Int64(1)))]);
        assert!(result.is_err());
    }
}
