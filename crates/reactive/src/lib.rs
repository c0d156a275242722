//! Strand Reactive - change messages, observer lists and scheduling.
//!
//! This crate holds the plumbing that connects collections to their
//! consumers:
//!
//! - `ChangeMessage`: One keyed insert/update/delete as seen by a consumer
//! - `Listeners`: An explicit observer list owned by the emitting object
//! - `Scheduler`: Collapses and orders pipeline runs within a transaction
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use strand_reactive::Scheduler;
//!
//! let scheduler = Scheduler::new();
//! let runs = Rc::new(RefCell::new(Vec::new()));
//!
//! for _ in 0..3 {
//!     let runs = runs.clone();
//!     scheduler.schedule(1, 10, &[], Box::new(move || runs.borrow_mut().push(10)));
//! }
//! let runs_dep = runs.clone();
//! scheduler.schedule(1, 11, &[10], Box::new(move || runs_dep.borrow_mut().push(11)));
//!
//! scheduler.flush(1).unwrap();
//! assert_eq!(*runs.borrow(), vec![10, 11]);
//! ```

#![no_std]

extern crate alloc;

pub mod change;
pub mod listeners;
pub mod scheduler;

pub use change::{ChangeKind, ChangeMessage};
pub use listeners::{notify, Listener, ListenerId, Listeners};
pub use scheduler::{ContextId, Job, JobId, Scheduler};
