//! Error types for strand.

use crate::key::Key;
use alloc::string::String;

/// Result type alias for strand operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error types shared by every strand crate.
///
/// Errors are `Clone` so a single failure can be handed to every waiter on
/// a transaction's completion signal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Lookup on an index that has not been materialized yet.
    #[error("index `{name}` is not ready")]
    IndexNotReady { name: String },

    /// A value has no representation in the target format.
    #[error("serialization failed: {message}")]
    Serialization { message: String },

    /// The user commit function of a transaction failed.
    #[error("transaction {id} failed to commit: {message}")]
    CommitFailed { id: u64, message: String },

    /// A transaction was rolled back because a conflicting one failed.
    #[error("transaction {id} was rolled back after transaction {cause} failed")]
    RolledBack { id: u64, cause: u64 },

    /// An operator pipeline failed while running.
    #[error("live query `{query}` failed: {message}")]
    Graph { query: String, message: String },

    /// Evaluating an expression failed.
    #[error("expression error: {message}")]
    Expression { message: String },

    /// A query could not be built.
    #[error("invalid query: {message}")]
    InvalidQuery { message: String },

    /// A query referenced an alias that is not in scope.
    #[error("unknown alias `{alias}`")]
    UnknownAlias { alias: String },

    /// The same alias was bound twice in one query.
    #[error("alias `{alias}` is bound more than once")]
    DuplicateAlias { alias: String },

    /// `limit`/`offset` without an ordering.
    #[error("limit and offset require an order by clause")]
    LimitRequiresOrderBy,

    /// `having` without grouping or aggregates.
    #[error("having requires group by or aggregate select")]
    HavingRequiresGroupBy,

    /// Insert of a key that is already present.
    #[error("key {key} already exists in collection `{collection}`")]
    DuplicateKey { collection: String, key: Key },

    /// Update or delete of a key that is not present.
    #[error("key {key} not found in collection `{collection}`")]
    KeyNotFound { collection: String, key: Key },

    /// An update changed the key of a row.
    #[error("update changed the key of row {key} in collection `{collection}`")]
    KeyChanged { collection: String, key: Key },

    /// The key function produced no key for a row.
    #[error("row has no key in collection `{collection}`")]
    MissingKey { collection: String },

    /// A sync write or commit outside of `begin`/`commit`.
    #[error("sync for collection `{collection}` is not inside begin/commit")]
    SyncNotInTransaction { collection: String },

    /// `begin` while a sync transaction is already open.
    #[error("sync for collection `{collection}` is already inside begin/commit")]
    SyncAlreadyInTransaction { collection: String },

    /// Disallowed collection status transition.
    #[error("collection `{collection}` cannot move from {from} to {to}")]
    InvalidStatusTransition {
        collection: String,
        from: String,
        to: String,
    },

    /// Operation on a collection that is in the error state.
    #[error("collection `{collection}` is in error state")]
    CollectionInError { collection: String },

    /// No handler is configured for a direct collection write.
    #[error("collection `{collection}` has no {operation} handler and no transaction is open")]
    MissingHandler {
        collection: String,
        operation: String,
    },

    /// Mutation or commit on a transaction that is no longer pending.
    #[error("transaction {id} is {state}, expected pending")]
    TransactionNotPending { id: u64, state: String },

    /// Operation that needs an open transaction outside of one.
    #[error("no pending transaction is active")]
    NoPendingTransaction,

    /// Scheduled jobs whose dependencies can never be satisfied.
    #[error("scheduler context {context} has jobs with unresolved dependencies: {jobs}")]
    SchedulerCycle { context: u64, jobs: String },

    /// Invalid operation.
    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },
}

impl Error {
    /// Creates an index-not-ready error.
    pub fn index_not_ready(name: impl Into<String>) -> Self {
        Error::IndexNotReady { name: name.into() }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Error::Serialization {
            message: message.into(),
        }
    }

    /// Creates a commit failure.
    pub fn commit_failed(id: u64, message: impl Into<String>) -> Self {
        Error::CommitFailed {
            id,
            message: message.into(),
        }
    }

    /// Creates a graph error for a live query.
    pub fn graph(query: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Graph {
            query: query.into(),
            message: message.into(),
        }
    }

    /// Creates an expression evaluation error.
    pub fn expression(message: impl Into<String>) -> Self {
        Error::Expression {
            message: message.into(),
        }
    }

    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Error::InvalidQuery {
            message: message.into(),
        }
    }

    pub fn unknown_alias(alias: impl Into<String>) -> Self {
        Error::UnknownAlias {
            alias: alias.into(),
        }
    }

    pub fn duplicate_alias(alias: impl Into<String>) -> Self {
        Error::DuplicateAlias {
            alias: alias.into(),
        }
    }

    pub fn duplicate_key(collection: impl Into<String>, key: Key) -> Self {
        Error::DuplicateKey {
            collection: collection.into(),
            key,
        }
    }

    pub fn key_not_found(collection: impl Into<String>, key: Key) -> Self {
        Error::KeyNotFound {
            collection: collection.into(),
            key,
        }
    }

    pub fn key_changed(collection: impl Into<String>, key: Key) -> Self {
        Error::KeyChanged {
            collection: collection.into(),
            key,
        }
    }

    pub fn missing_key(collection: impl Into<String>) -> Self {
        Error::MissingKey {
            collection: collection.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }
}
