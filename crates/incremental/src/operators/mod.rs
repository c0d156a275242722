//! Incremental operators.
//!
//! Every operator consumes a batch of keyed row deltas and emits keyed row
//! deltas:
//! - Filter: passes through deltas matching a predicate
//! - Map: transforms row values
//! - Join: incrementally maintains inner and outer equi-join results
//! - Aggregate: maintains grouped aggregate rows
//! - TopK: maintains an ordered window with fractional indices
//! - Distinct: keeps one row per distinct value

mod aggregate;
mod distinct;
mod filter;
mod join;
mod map;
mod topk;

pub use aggregate::{Aggregate, AggregateState, GroupAggregateState, PostMapFn, ReduceFn, Reducer};
pub use distinct::IncrementalDistinct;
pub use filter::{filter_incremental, filter_rows};
pub use join::IncrementalHashJoin;
pub use map::{map_incremental, map_rows};
pub use topk::{SizeCallback, SortKeyFn, TopK};
