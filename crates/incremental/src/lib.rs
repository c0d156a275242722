//! Strand Incremental - differential dataflow operators for strand live queries.
//!
//! This crate keeps query results up to date by pushing changes through
//! operators instead of recomputing from scratch.
//!
//! # Core Concepts
//!
//! - `Delta<T>`: Represents a change to data (+1 for insert, -1 for delete)
//! - `KeyedRow`: A keyed row value, with the fractional index it holds in
//!   an ordered window
//! - `DataflowNode`: Nodes of the operator tree a query compiles into
//! - `DataflowGraph`: Buffers per-alias input and runs the tree
//!
//! # Incremental Operators
//!
//! - `filter_incremental` / `map_incremental`: Stateless row operators
//! - `IncrementalHashJoin`: Inner, left, right and full equi-joins
//! - `GroupAggregateState`: Grouped `count/sum/avg/min/max/median/mode`
//!   and custom reducers
//! - `TopK`: Ordered window with fractional indices
//! - `IncrementalDistinct`: One row per distinct value
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use strand_core::{CompareOptions, Key, Value};
//! use strand_incremental::{DataflowGraph, DataflowNode, Delta, KeyedRow, SortKeyFn, TopK};
//! use strand_query::ast::Expr;
//! use strand_query::eval::{compile_predicate, sort_tuple};
//!
//! // todo where done = false order by id limit 1
//! let order = vec![Expr::col("todo.id")];
//! let sort_fn: SortKeyFn = Rc::new(move |row: &Value| sort_tuple(&order, row));
//! let root = DataflowNode::top_k(
//!     DataflowNode::filter(
//!         DataflowNode::source("todo"),
//!         compile_predicate(&Expr::eq(Expr::col("todo.done"), Expr::val(false))),
//!     ),
//!     TopK::new(sort_fn, vec![CompareOptions::asc()], 0, Some(1)),
//! );
//! let mut graph = DataflowGraph::new(root);
//!
//! let todo = |id: i64| Value::object([("id", Value::Int64(id)), ("done", Value::Boolean(false))]);
//! graph
//!     .push("todo", vec![
//!         Delta::insert(KeyedRow::new(Key::Int(1), todo(1))),
//!         Delta::insert(KeyedRow::new(Key::Int(2), todo(2))),
//!     ])
//!     .unwrap();
//! let output = graph.run().unwrap();
//! assert_eq!(output.len(), 1);
//! assert_eq!(output[0].data.key, Key::Int(1));
//! assert_eq!(output[0].data.index.as_deref(), Some("V"));
//! ```

#![no_std]

extern crate alloc;

pub mod dataflow;
pub mod delta;
pub mod fractional;
pub mod operators;

pub use dataflow::{DataflowGraph, DataflowNode};
pub use delta::{consolidate, Delta, DeltaBatch, DeltaBatchExt, KeyedRow, RowDelta};
pub use fractional::{key_between, keys_between};
pub use operators::{
    filter_incremental, filter_rows, map_incremental, map_rows, Aggregate, AggregateState,
    GroupAggregateState, IncrementalDistinct, IncrementalHashJoin, PostMapFn, ReduceFn, Reducer,
    SizeCallback, SortKeyFn, TopK,
};
