//! Strand Index - secondary indexes for strand collections.
//!
//! This crate provides:
//!
//! - `Index`: The contract every secondary index satisfies
//! - `BTreeIndex`: Ordered index supporting equality, range, pattern and
//!   cursor lookups
//! - `IndexHandle`: Lazily materialized index (pending or ready)
//! - `optimize_where`: Answers filters from ready indexes
//!
//! # Example
//!
//! ```rust
//! use strand_core::{Key, Value};
//! use strand_index::{BTreeIndex, Index, IndexMeta, IndexOperation, ValueRange};
//! use strand_query::ast::Expr;
//!
//! let mut index = BTreeIndex::new(IndexMeta::new(1, "by_priority", Expr::col("priority")));
//! for (id, priority) in [(1, 3), (2, 1), (3, 2)] {
//!     let row = Value::object([("priority", Value::Int64(priority))]);
//!     index.add(&Key::Int(id), &row).unwrap();
//! }
//!
//! // Point query
//! assert_eq!(index.lookup(IndexOperation::Eq, &Value::Int64(1)).len(), 1);
//!
//! // Range query in value order
//! let range = ValueRange::lower_bound(Value::Int64(2), false);
//! assert_eq!(index.range_query(&range), vec![Key::Int(3), Key::Int(1)]);
//! ```

#![no_std]

extern crate alloc;

pub mod btree;
pub mod lazy;
pub mod optimize;
pub mod traits;

pub use btree::BTreeIndex;
pub use lazy::{IndexHandle, IndexResolver, PendingIndex};
pub use optimize::optimize_where;
pub use traits::{Index, IndexMeta, IndexOperation, ValueRange};
