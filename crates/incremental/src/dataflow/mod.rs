//! Dataflow graph for incremental live queries.
//!
//! This module provides the node tree a live query compiles into and the
//! graph wrapper that buffers source changes between runs.

mod graph;
pub mod node;

pub use graph::DataflowGraph;
pub use node::DataflowNode;
