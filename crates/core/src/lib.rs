//! Strand Core - shared value, key and error types.
//!
//! This crate provides the foundational types for the strand live-query engine:
//!
//! - `Value`: Dynamically typed values (scalars, arrays, objects) stored in rows
//! - `Key`: Row identity inside a collection
//! - `CompareOptions`: Direction, null placement and string collation for ordering
//! - `pattern_match`: LIKE / ILIKE matching shared by evaluation and indexes
//! - `Error`: Error types for every strand crate
//!
//! # Example
//!
//! ```rust
//! use strand_core::{CompareOptions, Key, Value};
//!
//! let row = Value::object([("id", Value::Int64(1)), ("title", Value::from("write docs"))]);
//! let key = Key::from_value(row.get("id").unwrap()).unwrap();
//! assert_eq!(key, Key::Int(1));
//!
//! let desc = CompareOptions::desc();
//! assert!(desc.compare(&Value::Int64(2), &Value::Int64(1)).is_lt());
//! ```

#![no_std]

extern crate alloc;

mod compare;
mod error;
mod json;
mod key;
pub mod pattern_match;
mod value;

pub use compare::{compare_tuples, CompareOptions, Direction, Nulls, StringSort};
pub use error::{Error, Result};
pub use key::Key;
pub use value::Value;
