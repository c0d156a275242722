//! Incremental equi-join operator.

use crate::delta::{Delta, KeyedRow};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use hashbrown::HashMap;
use strand_core::{Key, Result, Value};
use strand_query::ast::JoinType;
use strand_query::eval::Evaluator;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

impl Side {
    fn slot(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

type Bucket = BTreeMap<Key, Value>;

/// Incremental hash join that maintains indexes for both sides.
///
/// Rows are namespaced objects; a joined row merges the fields of both
/// sides and is keyed `[left,right]`. A Null join key never matches.
/// Outer joins emit the unmatched row of the preserved side on its own and
/// retract it as soon as a match appears.
pub struct IncrementalHashJoin {
    join_type: JoinType,
    key_fns: [Evaluator; 2],
    /// join key -> rows of that side holding it
    index: [HashMap<Value, Bucket>; 2],
}

impl IncrementalHashJoin {
    pub fn new(join_type: JoinType, left_key: Evaluator, right_key: Evaluator) -> Self {
        Self {
            join_type,
            key_fns: [left_key, right_key],
            index: [HashMap::new(), HashMap::new()],
        }
    }

    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    /// Applies a batch of left-side deltas.
    pub fn on_left(&mut self, deltas: Vec<Delta<KeyedRow>>) -> Result<Vec<Delta<KeyedRow>>> {
        self.apply(Side::Left, deltas)
    }

    /// Applies a batch of right-side deltas.
    pub fn on_right(&mut self, deltas: Vec<Delta<KeyedRow>>) -> Result<Vec<Delta<KeyedRow>>> {
        self.apply(Side::Right, deltas)
    }

    /// Number of rows held for the left side.
    pub fn left_count(&self) -> usize {
        self.index[0].values().map(|b| b.len()).sum()
    }

    /// Number of rows held for the right side.
    pub fn right_count(&self) -> usize {
        self.index[1].values().map(|b| b.len()).sum()
    }

    fn preserves(&self, side: Side) -> bool {
        match (self.join_type, side) {
            (JoinType::Full, _) => true,
            (JoinType::Left, Side::Left) | (JoinType::Right, Side::Right) => true,
            _ => false,
        }
    }

    fn apply(&mut self, side: Side, deltas: Vec<Delta<KeyedRow>>) -> Result<Vec<Delta<KeyedRow>>> {
        let mut output = Vec::new();
        for delta in deltas {
            let join_key = normalize((self.key_fns[side.slot()])(&delta.data.value)?);
            if delta.is_insert() {
                self.insert(side, delta.data, join_key, &mut output);
            } else if delta.is_delete() {
                self.delete(side, delta.data, join_key, &mut output);
            }
        }
        Ok(output)
    }

    fn insert(&mut self, side: Side, row: KeyedRow, join_key: Value, output: &mut Vec<Delta<KeyedRow>>) {
        if join_key.is_null() {
            if self.preserves(side) {
                output.push(Delta::insert(unmatched(side, &row.key, &row.value)));
            }
            return;
        }
        let other = side.other();
        let had_peers = self.index[side.slot()]
            .get(&join_key)
            .is_some_and(|b| !b.is_empty());
        match self.index[other.slot()].get(&join_key) {
            Some(matches) if !matches.is_empty() => {
                if !had_peers && self.preserves(other) {
                    for (key, value) in matches {
                        output.push(Delta::delete(unmatched(other, key, value)));
                    }
                }
                for (key, value) in matches {
                    output.push(Delta::insert(pair(side, &row.key, &row.value, key, value)));
                }
            }
            _ => {
                if self.preserves(side) {
                    output.push(Delta::insert(unmatched(side, &row.key, &row.value)));
                }
            }
        }
        self.index[side.slot()]
            .entry(join_key)
            .or_default()
            .insert(row.key, row.value);
    }

    fn delete(&mut self, side: Side, row: KeyedRow, join_key: Value, output: &mut Vec<Delta<KeyedRow>>) {
        if join_key.is_null() {
            if self.preserves(side) {
                output.push(Delta::delete(unmatched(side, &row.key, &row.value)));
            }
            return;
        }
        let mut has_peers = false;
        if let Some(bucket) = self.index[side.slot()].get_mut(&join_key) {
            bucket.remove(&row.key);
            has_peers = !bucket.is_empty();
            if !has_peers {
                self.index[side.slot()].remove(&join_key);
            }
        }
        let other = side.other();
        match self.index[other.slot()].get(&join_key) {
            Some(matches) if !matches.is_empty() => {
                for (key, value) in matches {
                    output.push(Delta::delete(pair(side, &row.key, &row.value, key, value)));
                }
                if !has_peers && self.preserves(other) {
                    for (key, value) in matches {
                        output.push(Delta::insert(unmatched(other, key, value)));
                    }
                }
            }
            _ => {
                if self.preserves(side) {
                    output.push(Delta::delete(unmatched(side, &row.key, &row.value)));
                }
            }
        }
    }
}

/// Integral floats join with the equal integer.
fn normalize(key: Value) -> Value {
    match key {
        Value::Float64(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Value::Int64(f as i64),
        other => other,
    }
}

fn merge(left: &Value, right: &Value) -> Value {
    let mut merged = left.clone();
    if let (Some(target), Some(fields)) = (merged.as_object_mut(), right.as_object()) {
        for (name, value) in fields {
            target.insert(name.clone(), value.clone());
        }
    }
    merged
}

fn pair(side: Side, key: &Key, value: &Value, other_key: &Key, other_value: &Value) -> KeyedRow {
    let ((lk, lv), (rk, rv)) = match side {
        Side::Left => ((key, value), (other_key, other_value)),
        Side::Right => ((other_key, other_value), (key, value)),
    };
    KeyedRow::new(Key::composite(Some(lk), Some(rk)), merge(lv, rv))
}

fn unmatched(side: Side, key: &Key, value: &Value) -> KeyedRow {
    let key = match side {
        Side::Left => Key::composite(Some(key), None),
        Side::Right => Key::composite(None, Some(key)),
    };
    KeyedRow::new(key, value.clone())
}
