//! Strand Query - query IR, authoring and predicate reasoning.
//!
//! This crate provides:
//!
//! - `ast`: Expression trees and the `QueryIr` describing a live query
//! - `builder`: Fluent `Query` builder with validation
//! - `eval`: Expression evaluation with three-valued null logic
//! - `predicate`: Subset, union and difference reasoning over filters

#![no_std]

extern crate alloc;

pub mod ast;
pub mod builder;
pub mod eval;
pub mod predicate;

pub use builder::{Query, SELECTED_ALIAS};
