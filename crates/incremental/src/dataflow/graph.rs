//! Dataflow graph management.

use crate::dataflow::node::DataflowNode;
use crate::delta::{consolidate, Delta, KeyedRow};
use crate::operators::TopK;
use alloc::string::String;
use alloc::vec::Vec;
use strand_core::{Error, Result};

/// A compiled dataflow with per-alias input buffers.
///
/// Callers `push` the changes of each source alias, then `run` the graph
/// once to drain every buffer through the node tree. Buffers are drained
/// in the order their aliases were first pushed.
pub struct DataflowGraph {
    root: DataflowNode,
    sources: Vec<String>,
    /// Buffered input per alias, in first-push order
    pending: Vec<(String, Vec<Delta<KeyedRow>>)>,
}

impl DataflowGraph {
    /// Creates a graph around the node tree `root`.
    pub fn new(root: DataflowNode) -> Self {
        let sources = root.collect_sources();
        Self {
            root,
            sources,
            pending: Vec::new(),
        }
    }

    /// Aliases read by the graph.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Buffers changes for `alias`.
    pub fn push(&mut self, alias: &str, deltas: Vec<Delta<KeyedRow>>) -> Result<()> {
        if !self.sources.iter().any(|s| s == alias) {
            return Err(Error::unknown_alias(alias));
        }
        if deltas.is_empty() {
            return Ok(());
        }
        match self.pending.iter_mut().find(|(a, _)| a == alias) {
            Some((_, buffer)) => buffer.extend(deltas),
            None => self.pending.push((String::from(alias), deltas)),
        }
        Ok(())
    }

    /// Whether any input is buffered.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drains every buffered input through the graph.
    ///
    /// Returns the consolidated output changes. On error the remaining
    /// buffers are discarded.
    pub fn run(&mut self) -> Result<Vec<Delta<KeyedRow>>> {
        let pending = core::mem::take(&mut self.pending);
        let mut output = Vec::new();
        for (alias, deltas) in pending {
            tracing::trace!(alias = %alias, count = deltas.len(), "propagating source changes");
            output.extend(self.root.propagate(&alias, &deltas)?);
        }
        Ok(consolidate(output))
    }

    /// Moves the window of the graph's top-K operator.
    ///
    /// Returns the consolidated output changes, or `None` when the graph
    /// has no ordered window.
    pub fn set_window(&mut self, offset: usize, limit: Option<usize>) -> Result<Option<Vec<Delta<KeyedRow>>>> {
        Ok(self.root.set_window(offset, limit)?.map(consolidate))
    }

    /// The current `(offset, limit)` of the ordered window.
    pub fn window(&self) -> Option<(usize, Option<usize>)> {
        self.root.window_operator().map(TopK::window)
    }

    /// True when the ordered window holds fewer rows than its limit.
    pub fn is_window_short(&self) -> bool {
        self.root.window_operator().is_some_and(TopK::is_window_short)
    }

    /// The top-K operator, if the graph has one.
    pub fn top_k(&self) -> Option<&TopK> {
        self.root.window_operator()
    }

    pub fn top_k_mut(&mut self) -> Option<&mut TopK> {
        self.root.window_operator_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::SortKeyFn;
    use alloc::rc::Rc;
    use alloc::vec;
    use strand_core::{CompareOptions, Key, Value};
    use strand_query::ast::Expr;
    use strand_query::eval::{compile_predicate, sort_tuple};

    fn todo(id: i64, done: bool) -> KeyedRow {
        KeyedRow::new(
            Key::Int(id),
            Value::object([("id", Value::Int64(id)), ("done", Value::Boolean(done))]),
        )
    }

    fn open_todos(limit: usize) -> DataflowGraph {
        let exprs = vec![Expr::col("todo.id")];
        let sort_fn: SortKeyFn = Rc::new(move |row: &Value| sort_tuple(&exprs, row));
        let root = DataflowNode::top_k(
            DataflowNode::filter(
                DataflowNode::source("todo"),
                compile_predicate(&Expr::eq(Expr::col("todo.done"), Expr::val(false))),
            ),
            TopK::new(sort_fn, vec![CompareOptions::asc()], 0, Some(limit)),
        );
        DataflowGraph::new(root)
    }

    #[test]
    fn test_push_unknown_alias() {
        let mut graph = open_todos(1);
        assert_eq!(
            graph.push("user", vec![Delta::insert(todo(1, false))]),
            Err(Error::unknown_alias("user"))
        );
        assert!(!graph.has_pending());
    }

    #[test]
    fn test_update_moves_window() {
        let mut graph = open_todos(1);
        graph
            .push("todo", vec![Delta::insert(todo(1, false)), Delta::insert(todo(2, false))])
            .unwrap();
        assert!(graph.has_pending());
        let out = graph.run().unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data.key, Key::Int(1));
        assert!(!graph.has_pending());

        graph
            .push("todo", vec![Delta::delete(todo(1, false)), Delta::insert(todo(1, true))])
            .unwrap();
        let out = graph.run().unwrap();
        let moves: Vec<(i32, Key)> = out.iter().map(|d| (d.diff, d.data.key.clone())).collect();
        assert_eq!(moves, vec![(-1, Key::Int(1)), (1, Key::Int(2))]);
        assert_eq!(
            out[1].data.value.get_path(&["todo", "id"]),
            Some(&Value::Int64(2))
        );
    }

    #[test]
    fn test_set_window() {
        let mut graph = open_todos(1);
        graph
            .push("todo", (1..=3).map(|i| Delta::insert(todo(i, false))).collect())
            .unwrap();
        graph.run().unwrap();
        assert_eq!(graph.window(), Some((0, Some(1))));

        let out = graph.set_window(1, Some(2)).unwrap().unwrap();
        assert_eq!(out.iter().filter(|d| d.is_delete()).count(), 1);
        assert_eq!(out.iter().filter(|d| d.is_insert()).count(), 2);
        assert!(!graph.is_window_short());
        graph.set_window(2, Some(5)).unwrap();
        assert!(graph.is_window_short());
    }

    #[test]
    fn test_error_discards_buffers() {
        let root = DataflowNode::filter(
            DataflowNode::source("t"),
            Rc::new(|_: &Value| -> Result<bool> { Err(Error::expression("bad")) }),
        );
        let mut graph = DataflowGraph::new(root);
        graph.push("t", vec![Delta::insert(todo(1, false))]).unwrap();
        assert_eq!(graph.run(), Err(Error::expression("bad")));
        assert!(!graph.has_pending());
        assert!(graph.set_window(0, None).unwrap().is_none());
    }
}
