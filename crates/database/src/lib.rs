//! Strand DB - collections, optimistic transactions and live queries.
//!
//! This crate ties the lower layers together:
//!
//! - `collection`: Keyed rows fed by a sync source, with optimistic layers,
//!   indexes, subset loading and change subscriptions
//! - `transaction`: Optimistic mutations, commit through a mutation
//!   function, rollback cascades
//! - `live`: Live queries compiled to dataflow graphs, writing their result
//!   into an output collection
//! - `paced`: Debounced, throttled and queued persistence of writes
//! - `database`: The registry owning all of the above
//!
//! # Example
//!
//! ```
//! use strand_core::Value;
//! use strand_db::{CollectionConfig, Database};
//! use strand_query::{ast::Expr, Query};
//!
//! let db = Database::new();
//! let todos = db.create_collection(CollectionConfig::keyed_by("todos", "id")).unwrap();
//! todos
//!     .insert(Value::object([("id", Value::Int64(1)), ("done", Value::Boolean(false))]))
//!     .unwrap();
//!
//! let open = Query::from("todo", "todos")
//!     .where_(Expr::eq(Expr::col("todo.done"), Expr::val(false)))
//!     .build()
//!     .unwrap();
//! let query = db.live_query(open).unwrap();
//! assert_eq!(query.to_vec().len(), 1);
//!
//! todos.update(1, |row| row.set_path(&["done"], Value::Boolean(true))).unwrap();
//! assert!(query.to_vec().is_empty());
//! ```

pub mod collection;
pub mod database;
pub mod live;
pub mod paced;
pub mod transaction;

pub use collection::{
    AutoIndex, Collection, CollectionConfig, CollectionStatus, CollectionSubscription, IndexOptions,
    LimitedSnapshotOptions, LoadSubsetResult, RowUpdateMode, SnapshotOptions, StatusChange,
    SubscribeOptions, SubscriptionStatus, SubsetLoad, SyncConfig, SyncHandle, SyncMode, SyncWrite,
};
pub use database::{Clock, Database, DatabaseConfig};
pub use live::{LiveQuery, LiveQueryConfig};
pub use paced::{PacedConfig, PacedMutations, PacedStrategy};
pub use transaction::{
    mutation_fn, MutationFn, MutationKind, PendingMutation, Transaction, TransactionConfig, TransactionId,
    TransactionState,
};

pub use strand_core::{CompareOptions, Error, Key, Result, Value};
