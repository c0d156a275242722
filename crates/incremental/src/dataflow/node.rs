//! Dataflow node definitions.

use crate::delta::{Delta, KeyedRow};
use crate::operators::{
    filter_rows, map_rows, Aggregate, GroupAggregateState, IncrementalDistinct,
    IncrementalHashJoin, TopK,
};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use strand_core::{Result, Value};
use strand_query::ast::JoinType;
use strand_query::eval::{Evaluator, Predicate};

/// A node in the dataflow tree.
///
/// Each node owns the state of its operator. Changes enter at `Source`
/// nodes, tagged with the alias they were pushed for, and flow up to the
/// root.
pub enum DataflowNode {
    /// Entry point for the changes of one alias. Row values are wrapped as
    /// `{alias: value}`.
    Source { alias: String },

    /// Passes through rows matching the predicate
    Filter {
        input: Box<DataflowNode>,
        predicate: Predicate,
    },

    /// Replaces each row value
    Map {
        input: Box<DataflowNode>,
        mapper: Evaluator,
    },

    /// Equi-join of two inputs
    Join {
        left: Box<DataflowNode>,
        right: Box<DataflowNode>,
        state: IncrementalHashJoin,
    },

    /// Grouped aggregation
    GroupBy {
        input: Box<DataflowNode>,
        state: GroupAggregateState,
    },

    /// Ordered window with fractional indices
    TopK {
        input: Box<DataflowNode>,
        state: TopK,
    },

    /// One row per distinct value
    Distinct {
        input: Box<DataflowNode>,
        state: IncrementalDistinct,
    },
}

impl DataflowNode {
    /// Creates a source node.
    pub fn source(alias: impl Into<String>) -> Self {
        DataflowNode::Source {
            alias: alias.into(),
        }
    }

    /// Creates a filter node.
    pub fn filter(input: DataflowNode, predicate: Predicate) -> Self {
        DataflowNode::Filter {
            input: Box::new(input),
            predicate,
        }
    }

    /// Creates a map node.
    pub fn map(input: DataflowNode, mapper: Evaluator) -> Self {
        DataflowNode::Map {
            input: Box::new(input),
            mapper,
        }
    }

    /// Creates a join node.
    pub fn join(
        left: DataflowNode,
        right: DataflowNode,
        join_type: JoinType,
        left_key: Evaluator,
        right_key: Evaluator,
    ) -> Self {
        DataflowNode::Join {
            left: Box::new(left),
            right: Box::new(right),
            state: IncrementalHashJoin::new(join_type, left_key, right_key),
        }
    }

    /// Creates a group-by node.
    pub fn group_by(input: DataflowNode, key_fn: Evaluator, aggregates: Vec<(String, Aggregate)>) -> Self {
        DataflowNode::GroupBy {
            input: Box::new(input),
            state: GroupAggregateState::new(key_fn, aggregates),
        }
    }

    /// Creates a top-K node.
    pub fn top_k(input: DataflowNode, state: TopK) -> Self {
        DataflowNode::TopK {
            input: Box::new(input),
            state,
        }
    }

    /// Creates a distinct node.
    pub fn distinct(input: DataflowNode, by: Evaluator) -> Self {
        DataflowNode::Distinct {
            input: Box::new(input),
            state: IncrementalDistinct::new(by),
        }
    }

    /// Returns the alias if this is a source node.
    pub fn source_alias(&self) -> Option<&str> {
        match self {
            DataflowNode::Source { alias } => Some(alias),
            _ => None,
        }
    }

    /// Collects all source aliases in this dataflow.
    pub fn collect_sources(&self) -> Vec<String> {
        let mut sources = Vec::new();
        self.collect_sources_inner(&mut sources);
        sources
    }

    fn collect_sources_inner(&self, sources: &mut Vec<String>) {
        match self {
            DataflowNode::Source { alias } => {
                if !sources.contains(alias) {
                    sources.push(alias.clone());
                }
            }
            DataflowNode::Filter { input, .. }
            | DataflowNode::Map { input, .. }
            | DataflowNode::GroupBy { input, .. }
            | DataflowNode::TopK { input, .. }
            | DataflowNode::Distinct { input, .. } => {
                input.collect_sources_inner(sources);
            }
            DataflowNode::Join { left, right, .. } => {
                left.collect_sources_inner(sources);
                right.collect_sources_inner(sources);
            }
        }
    }

    /// Pushes the changes of `alias` through this node.
    ///
    /// Branches that do not read `alias` produce nothing.
    pub fn propagate(&mut self, alias: &str, deltas: &[Delta<KeyedRow>]) -> Result<Vec<Delta<KeyedRow>>> {
        match self {
            DataflowNode::Source { alias: own } => {
                if own.as_str() != alias {
                    return Ok(Vec::new());
                }
                Ok(deltas
                    .iter()
                    .map(|d| {
                        let row = KeyedRow::new(
                            d.data.key.clone(),
                            Value::object([(own.as_str(), d.data.value.clone())]),
                        );
                        Delta::new(row, d.diff)
                    })
                    .collect())
            }
            DataflowNode::Filter { input, predicate } => {
                let rows = input.propagate(alias, deltas)?;
                filter_rows(rows, predicate)
            }
            DataflowNode::Map { input, mapper } => {
                let rows = input.propagate(alias, deltas)?;
                map_rows(rows, mapper)
            }
            DataflowNode::Join { left, right, state } => {
                let from_left = left.propagate(alias, deltas)?;
                let from_right = right.propagate(alias, deltas)?;
                let mut output = state.on_left(from_left)?;
                output.extend(state.on_right(from_right)?);
                Ok(output)
            }
            DataflowNode::GroupBy { input, state } => {
                let rows = input.propagate(alias, deltas)?;
                if rows.is_empty() {
                    return Ok(rows);
                }
                state.process_deltas(rows)
            }
            DataflowNode::TopK { input, state } => {
                let rows = input.propagate(alias, deltas)?;
                state.process(rows)
            }
            DataflowNode::Distinct { input, state } => {
                let rows = input.propagate(alias, deltas)?;
                state.process(rows)
            }
        }
    }

    /// The first top-K operator on the path to the sources.
    pub fn window_operator_mut(&mut self) -> Option<&mut TopK> {
        match self {
            DataflowNode::TopK { state, .. } => Some(state),
            DataflowNode::Source { .. } => None,
            DataflowNode::Filter { input, .. }
            | DataflowNode::Map { input, .. }
            | DataflowNode::GroupBy { input, .. }
            | DataflowNode::Distinct { input, .. } => input.window_operator_mut(),
            DataflowNode::Join { left, right, .. } => match left.window_operator_mut() {
                Some(state) => Some(state),
                None => right.window_operator_mut(),
            },
        }
    }

    pub fn window_operator(&self) -> Option<&TopK> {
        match self {
            DataflowNode::TopK { state, .. } => Some(state),
            DataflowNode::Source { .. } => None,
            DataflowNode::Filter { input, .. }
            | DataflowNode::Map { input, .. }
            | DataflowNode::GroupBy { input, .. }
            | DataflowNode::Distinct { input, .. } => input.window_operator(),
            DataflowNode::Join { left, right, .. } => left.window_operator().or_else(|| right.window_operator()),
        }
    }

    /// Applies a window change to the top-K operator and pushes its moves
    /// through the nodes above it.
    pub fn set_window(&mut self, offset: usize, limit: Option<usize>) -> Result<Option<Vec<Delta<KeyedRow>>>> {
        match self {
            DataflowNode::TopK { state, .. } => Ok(Some(state.set_window(offset, limit))),
            DataflowNode::Source { .. } => Ok(None),
            DataflowNode::Filter { input, predicate } => match input.set_window(offset, limit)? {
                Some(rows) => filter_rows(rows, predicate).map(Some),
                None => Ok(None),
            },
            DataflowNode::Map { input, mapper } => match input.set_window(offset, limit)? {
                Some(rows) => map_rows(rows, mapper).map(Some),
                None => Ok(None),
            },
            DataflowNode::Distinct { input, state } => match input.set_window(offset, limit)? {
                Some(rows) => state.process(rows).map(Some),
                None => Ok(None),
            },
            DataflowNode::GroupBy { input, state } => match input.set_window(offset, limit)? {
                Some(rows) => state.process_deltas(rows).map(Some),
                None => Ok(None),
            },
            DataflowNode::Join { left, right, state } => {
                if let Some(rows) = left.set_window(offset, limit)? {
                    return state.on_left(rows).map(Some);
                }
                match right.set_window(offset, limit)? {
                    Some(rows) => state.on_right(rows).map(Some),
                    None => Ok(None),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use alloc::vec;
    use strand_core::Key;
    use strand_query::ast::Expr;
    use strand_query::eval::{compile, compile_predicate};

    #[test]
    fn test_collect_sources() {
        let node = DataflowNode::filter(
            DataflowNode::join(
                DataflowNode::source("todo"),
                DataflowNode::source("user"),
                JoinType::Inner,
                compile(&Expr::col("todo.owner")),
                compile(&Expr::col("user.id")),
            ),
            compile_predicate(&Expr::val(true)),
        );
        assert_eq!(node.collect_sources(), vec![String::from("todo"), String::from("user")]);
        assert_eq!(DataflowNode::source("t").source_alias(), Some("t"));
    }

    #[test]
    fn test_source_wraps_and_ignores_other_aliases() {
        let mut node = DataflowNode::map(
            DataflowNode::source("todo"),
            Rc::new(|row: &Value| -> Result<Value> { Ok(row.get("todo").cloned().unwrap_or_default()) }),
        );
        let deltas = vec![Delta::insert(KeyedRow::new(Key::Int(1), Value::Int64(5)))];
        let out = node.propagate("todo", &deltas).unwrap();
        assert_eq!(out[0].data.value, Value::Int64(5));
        assert!(node.propagate("user", &deltas).unwrap().is_empty());
        assert!(node.window_operator().is_none());
    }
}
