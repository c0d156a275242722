//! Incremental ordered window (top-K) operator.
//!
//! The operator keeps every row it has seen sorted by the comparator, with
//! ties broken by row key. Rows inside the window `[offset, offset+limit)`
//! carry a fractional index; an insert or delete moves at most one row out
//! of the window and one row into it, and only those rows get new indices.

use crate::delta::{Delta, KeyedRow};
use crate::fractional::{key_between, keys_between};
use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;
use hashbrown::HashMap;
use strand_core::{compare_tuples, CompareOptions, Key, Result, Value};

/// Extracts the sort tuple of a row.
pub type SortKeyFn = Rc<dyn Fn(&Value) -> Result<Vec<Value>>>;

/// Receives the total number of rows known to the operator.
pub type SizeCallback = Box<dyn FnMut(usize)>;

struct Entry {
    sort: Vec<Value>,
    row: KeyedRow,
}

pub struct TopK {
    sort_fn: SortKeyFn,
    options: Vec<CompareOptions>,
    offset: usize,
    limit: Option<usize>,
    entries: Vec<Entry>,
    sort_keys: HashMap<Key, Vec<Value>>,
    on_size: Option<SizeCallback>,
}

impl TopK {
    /// Creates an operator ordering rows by `sort_fn`, one option set per
    /// tuple column. A `limit` of `None` keeps every row from `offset` on.
    pub fn new(
        sort_fn: SortKeyFn,
        options: Vec<CompareOptions>,
        offset: usize,
        limit: Option<usize>,
    ) -> Self {
        Self {
            sort_fn,
            options,
            offset,
            limit,
            entries: Vec::new(),
            sort_keys: HashMap::new(),
            on_size: None,
        }
    }

    pub fn with_size_callback(mut self, callback: SizeCallback) -> Self {
        self.on_size = Some(callback);
        self
    }

    /// Total number of rows known to the operator.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn window(&self) -> (usize, Option<usize>) {
        (self.offset, self.limit)
    }

    /// Rows currently inside the window, in order.
    pub fn window_rows(&self) -> impl Iterator<Item = &KeyedRow> + '_ {
        let end = self.end().min(self.entries.len());
        let start = self.offset.min(end);
        self.entries[start..end].iter().map(|e| &e.row)
    }

    /// True when a bounded window has fewer rows than its limit.
    pub fn is_window_short(&self) -> bool {
        match self.limit {
            Some(limit) => self.entries.len().saturating_sub(self.offset) < limit,
            None => false,
        }
    }

    fn end(&self) -> usize {
        match self.limit {
            Some(limit) => self.offset.saturating_add(limit),
            None => usize::MAX,
        }
    }

    fn cmp_entry(&self, entry: &Entry, sort: &[Value], key: &Key) -> Ordering {
        compare_tuples(&self.options, &entry.sort, sort).then_with(|| entry.row.key.cmp(key))
    }

    fn position(&self, sort: &[Value], key: &Key) -> core::result::Result<usize, usize> {
        self.entries
            .binary_search_by(|entry| self.cmp_entry(entry, sort, key))
    }

    /// Index of the window row at `pos`, if `pos` is inside the window and
    /// the row has one.
    fn index_at(&self, pos: usize) -> Option<&str> {
        if pos < self.offset || pos >= self.end() {
            return None;
        }
        self.entries.get(pos)?.row.index.as_deref()
    }

    fn assign(&self, pos: usize, reuse: Option<String>) -> String {
        let prev = pos.checked_sub(1).and_then(|p| self.index_at(p));
        let next = pos.checked_add(1).and_then(|p| self.index_at(p));
        if let Some(candidate) = reuse {
            let after_prev = prev.map_or(true, |p| p < candidate.as_str());
            let before_next = next.map_or(true, |n| candidate.as_str() < n);
            if after_prev && before_next {
                return candidate;
            }
        }
        key_between(prev, next)
    }

    /// Applies a batch of deltas and returns the window moves.
    ///
    /// Moves out are emitted before moves in. A row deleted and re-inserted
    /// within one batch keeps its index when it still fits between its
    /// neighbors.
    pub fn process(&mut self, deltas: Vec<Delta<KeyedRow>>) -> Result<Vec<Delta<KeyedRow>>> {
        let mut output = Vec::new();
        let mut released: HashMap<Key, String> = HashMap::new();
        for delta in deltas {
            if delta.is_delete() {
                self.remove(&delta.data.key, &mut output, &mut released);
            } else if delta.is_insert() {
                let sort = (self.sort_fn)(&delta.data.value)?;
                if self.sort_keys.contains_key(&delta.data.key) {
                    tracing::trace!(key = %delta.data.key, "insert of a present key replaces it");
                    self.remove(&delta.data.key, &mut output, &mut released);
                }
                self.insert(sort, delta.data, &mut output, &mut released);
            }
        }
        Ok(output)
    }

    fn insert(
        &mut self,
        sort: Vec<Value>,
        mut row: KeyedRow,
        output: &mut Vec<Delta<KeyedRow>>,
        released: &mut HashMap<Key, String>,
    ) {
        let pos = match self.position(&sort, &row.key) {
            Ok(p) | Err(p) => p,
        };
        row.index = None;
        self.sort_keys.insert(row.key.clone(), sort.clone());
        self.entries.insert(pos, Entry { sort, row });

        let end = self.end();
        if pos >= end {
            return;
        }
        // The row pushed past the end leaves the window
        if let Some(entry) = self.entries.get_mut(end) {
            if let Some(index) = entry.row.index.take() {
                output.push(Delta::delete(entry.row.clone().with_index(index)));
            }
        }
        let target = pos.max(self.offset);
        if target < end && target < self.entries.len() {
            let reuse = released.remove(&self.entries[target].row.key);
            let index = self.assign(target, reuse);
            let entry = &mut self.entries[target];
            entry.row.index = Some(index);
            output.push(Delta::insert(entry.row.clone()));
        }
    }

    fn remove(
        &mut self,
        key: &Key,
        output: &mut Vec<Delta<KeyedRow>>,
        released: &mut HashMap<Key, String>,
    ) {
        let Some(sort) = self.sort_keys.remove(key) else {
            return;
        };
        let Ok(pos) = self.position(&sort, key) else {
            return;
        };
        let end = self.end();
        let entry = self.entries.remove(pos);
        if pos >= end {
            return;
        }

        if pos < self.offset {
            // The first window row slides out in front
            if let Some(first) = self.entries.get_mut(self.offset - 1) {
                if let Some(index) = first.row.index.take() {
                    output.push(Delta::delete(first.row.clone().with_index(index)));
                }
            }
        } else if let Some(index) = entry.row.index.clone() {
            released.insert(key.clone(), index);
            output.push(Delta::delete(entry.row));
        }

        // The row after the window slides in at the back
        let last = end - 1;
        if last >= self.offset
            && last < self.entries.len()
            && self.entries[last].row.index.is_none()
        {
            let reuse = released.remove(&self.entries[last].row.key);
            let index = self.assign(last, reuse);
            let entry = &mut self.entries[last];
            entry.row.index = Some(index);
            output.push(Delta::insert(entry.row.clone()));
        }
    }

    /// Moves the window to `[offset, offset+limit)`.
    ///
    /// Rows leaving the window are deleted, rows entering it are inserted
    /// with fresh indices, rows staying keep theirs. The size callback
    /// receives the total row count.
    pub fn set_window(&mut self, offset: usize, limit: Option<usize>) -> Vec<Delta<KeyedRow>> {
        let (old_start, old_end) = (self.offset, self.end());
        self.offset = offset;
        self.limit = limit;
        let new_end = self.end();
        let len = self.entries.len();
        let mut output = Vec::new();

        for pos in old_start..old_end.min(len) {
            if pos >= offset && pos < new_end {
                continue;
            }
            let entry = &mut self.entries[pos];
            if let Some(index) = entry.row.index.take() {
                output.push(Delta::delete(entry.row.clone().with_index(index)));
            }
        }

        let stop = new_end.min(len);
        let mut pos = offset;
        while pos < stop {
            if self.entries[pos].row.index.is_some() {
                pos += 1;
                continue;
            }
            let run_start = pos;
            while pos < stop && self.entries[pos].row.index.is_none() {
                pos += 1;
            }
            let prev = run_start
                .checked_sub(1)
                .filter(|p| *p >= offset)
                .and_then(|p| self.entries[p].row.index.clone());
            let next = self.entries.get(pos).filter(|_| pos < stop).and_then(|e| e.row.index.clone());
            let indices = keys_between(prev.as_deref(), next.as_deref(), pos - run_start);
            for (entry, index) in self.entries[run_start..pos].iter_mut().zip(indices) {
                entry.row.index = Some(index);
                output.push(Delta::insert(entry.row.clone()));
            }
        }

        tracing::debug!(offset, ?limit, moved = output.len(), total = len, "window moved");
        if let Some(callback) = self.on_size.as_mut() {
            callback(len);
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::consolidate;
    use alloc::vec;
    use core::cell::Cell;
    use strand_query::ast::Expr;

    fn row(id: i64, score: i64) -> KeyedRow {
        KeyedRow::new(Key::Int(id), Value::object([("score", Value::Int64(score))]))
    }

    fn by_score(offset: usize, limit: Option<usize>) -> TopK {
        let exprs = vec![Expr::col("score")];
        let sort_fn: SortKeyFn =
            Rc::new(move |v: &Value| strand_query::eval::sort_tuple(&exprs, v));
        TopK::new(sort_fn, vec![CompareOptions::asc()], offset, limit)
    }

    fn moves(deltas: &[Delta<KeyedRow>]) -> Vec<(i32, Key)> {
        deltas.iter().map(|d| (d.diff, d.data.key.clone())).collect()
    }

    fn window_keys(topk: &TopK) -> Vec<Key> {
        topk.window_rows().map(|r| r.key.clone()).collect()
    }

    fn assert_indices_ordered(topk: &TopK) {
        let indices: Vec<&str> = topk
            .window_rows()
            .map(|r| r.index.as_deref().unwrap())
            .collect();
        assert!(indices.windows(2).all(|w| w[0] < w[1]), "{:?}", indices);
    }

    #[test]
    fn test_first_row_gets_first_key() {
        let mut topk = by_score(0, Some(3));
        let out = topk.process(vec![Delta::insert(row(1, 10))]).unwrap();
        assert_eq!(out[0].data.index.as_deref(), Some("V"));
    }

    #[test]
    fn test_insert_pushes_last_row_out() {
        let mut topk = by_score(0, Some(2));
        topk.process(vec![Delta::insert(row(1, 10)), Delta::insert(row(2, 20))])
            .unwrap();
        let out = topk.process(vec![Delta::insert(row(3, 5))]).unwrap();
        assert_eq!(moves(&out), vec![(-1, Key::Int(2)), (1, Key::Int(3))]);
        assert_eq!(window_keys(&topk), vec![Key::Int(3), Key::Int(1)]);
        assert_indices_ordered(&topk);

        // Past the end: nothing moves
        assert!(topk.process(vec![Delta::insert(row(4, 50))]).unwrap().is_empty());
        assert_eq!(topk.len(), 4);
    }

    #[test]
    fn test_delete_pulls_next_row_in() {
        let mut topk = by_score(0, Some(1));
        topk.process(vec![Delta::insert(row(1, 1)), Delta::insert(row(2, 2))])
            .unwrap();
        let out = topk.process(vec![Delta::delete(row(1, 1))]).unwrap();
        assert_eq!(moves(&out), vec![(-1, Key::Int(1)), (1, Key::Int(2))]);
        assert_eq!(window_keys(&topk), vec![Key::Int(2)]);
    }

    #[test]
    fn test_offset_shifts() {
        let mut topk = by_score(1, Some(2));
        topk.process((1..=4).map(|i| Delta::insert(row(i, i * 10))).collect())
            .unwrap();
        assert_eq!(window_keys(&topk), vec![Key::Int(2), Key::Int(3)]);

        // Insert before the window: the old first row of the page is now
        // inside at offset, the last one leaves
        let out = topk.process(vec![Delta::insert(row(9, 0))]).unwrap();
        assert_eq!(moves(&out), vec![(-1, Key::Int(3)), (1, Key::Int(1))]);
        assert_eq!(window_keys(&topk), vec![Key::Int(1), Key::Int(2)]);

        // Delete before the window: the first row slides out, the next slides in
        let out = topk.process(vec![Delta::delete(row(9, 0))]).unwrap();
        assert_eq!(moves(&out), vec![(-1, Key::Int(1)), (1, Key::Int(3))]);
        assert_eq!(window_keys(&topk), vec![Key::Int(2), Key::Int(3)]);
        assert_indices_ordered(&topk);
    }

    #[test]
    fn test_update_in_place_keeps_index() {
        let mut topk = by_score(0, Some(3));
        topk.process((1..=3).map(|i| Delta::insert(row(i, i * 10))).collect())
            .unwrap();
        let before = topk.window_rows().nth(1).unwrap().index.clone();
        let out = topk
            .process(vec![Delta::delete(row(2, 20)), Delta::insert(row(2, 25))])
            .unwrap();
        let out = consolidate(out);
        assert_eq!(moves(&out), vec![(-1, Key::Int(2)), (1, Key::Int(2))]);
        assert_eq!(out[1].data.index, before);
    }

    #[test]
    fn test_ties_break_by_key() {
        let mut topk = by_score(0, None);
        topk.process(vec![Delta::insert(row(3, 1)), Delta::insert(row(1, 1)), Delta::insert(row(2, 1))])
            .unwrap();
        assert_eq!(window_keys(&topk), vec![Key::Int(1), Key::Int(2), Key::Int(3)]);
        assert_indices_ordered(&topk);
    }

    #[test]
    fn test_limit_zero_emits_nothing() {
        let mut topk = by_score(0, Some(0));
        assert!(topk.process(vec![Delta::insert(row(1, 1))]).unwrap().is_empty());
        assert!(topk.process(vec![Delta::delete(row(1, 1))]).unwrap().is_empty());
        assert!(!topk.is_window_short());
    }

    #[test]
    fn test_set_window_diffs_pages() {
        let mut topk = by_score(0, Some(2));
        topk.process((1..=5).map(|i| Delta::insert(row(i, i))).collect())
            .unwrap();
        let kept = topk.window_rows().nth(1).unwrap().index.clone();

        let out = topk.set_window(1, Some(3));
        assert_eq!(
            moves(&out),
            vec![(-1, Key::Int(1)), (1, Key::Int(3)), (1, Key::Int(4))]
        );
        assert_eq!(window_keys(&topk), vec![Key::Int(2), Key::Int(3), Key::Int(4)]);
        assert_eq!(topk.window_rows().next().unwrap().index, kept);
        assert_indices_ordered(&topk);

        let out = topk.set_window(0, Some(5));
        assert_eq!(moves(&out), vec![(1, Key::Int(1)), (1, Key::Int(5))]);
        assert_indices_ordered(&topk);
    }

    #[test]
    fn test_size_callback() {
        let seen = Rc::new(Cell::new(0));
        let sink = seen.clone();
        let mut topk = by_score(0, Some(1)).with_size_callback(Box::new(move |n| sink.set(n)));
        topk.process((1..=4).map(|i| Delta::insert(row(i, i))).collect())
            .unwrap();
        topk.set_window(2, Some(1));
        assert_eq!(seen.get(), 4);
    }

    #[test]
    fn test_descending_with_nulls_last() {
        let exprs = vec![Expr::col("score")];
        let sort_fn: SortKeyFn =
            Rc::new(move |v: &Value| strand_query::eval::sort_tuple(&exprs, v));
        let options = CompareOptions::desc().with_nulls(strand_core::Nulls::Last);
        let mut topk = TopK::new(sort_fn, vec![options], 0, None);
        let null_row = KeyedRow::new(Key::Int(9), Value::object([("score", Value::Null)]));
        topk.process(vec![
            Delta::insert(null_row),
            Delta::insert(row(1, 1)),
            Delta::insert(row(2, 2)),
        ])
        .unwrap();
        assert_eq!(window_keys(&topk), vec![Key::Int(2), Key::Int(1), Key::Int(9)]);
    }
}
