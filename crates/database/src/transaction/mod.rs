//! Transactions and optimistic mutation tracking.
//!
//! A transaction collects mutations from collection writes made inside
//! `Transaction::mutate`. Each write is applied optimistically as a layer
//! over the affected collections right away. `commit` hands the merged
//! mutations to the transaction's mutation function once; success settles
//! the layers, failure removes them and rolls back every pending
//! transaction that wrote one of the same rows.

pub mod diff;
pub mod mutation;

pub use mutation::{MutationKind, PendingMutation};

use crate::collection::Collection;
use crate::database::{Database, DatabaseInner};
use futures::channel::oneshot;
use futures::future::{self, LocalBoxFuture, Shared};
use futures::FutureExt;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};
use strand_core::{Error, Key, Result, Value};

pub type TransactionId = u64;

/// Persists the mutations of a committing transaction.
pub type MutationFn = Rc<dyn Fn(Vec<PendingMutation>) -> LocalBoxFuture<'static, Result<()>>>;

/// The shared outcome of a commit. Every clone resolves to the same result.
pub type CommitFuture = Shared<LocalBoxFuture<'static, Result<()>>>;

/// Wraps an async closure as a `MutationFn`.
pub fn mutation_fn<F, Fut>(f: F) -> MutationFn
where
    F: Fn(Vec<PendingMutation>) -> Fut + 'static,
    Fut: Future<Output = Result<()>> + 'static,
{
    Rc::new(move |mutations| f(mutations).boxed_local())
}

#[derive(Clone, Default)]
pub struct TransactionConfig {
    pub mutation_fn: Option<MutationFn>,
    /// Commit as soon as `mutate` returns.
    pub auto_commit: bool,
    pub metadata: Value,
}

impl TransactionConfig {
    pub fn new(mutation_fn: MutationFn) -> Self {
        Self {
            mutation_fn: Some(mutation_fn),
            ..Self::default()
        }
    }

    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

impl fmt::Debug for TransactionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionConfig")
            .field("mutation_fn", &self.mutation_fn.is_some())
            .field("auto_commit", &self.auto_commit)
            .field("metadata", &self.metadata)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransactionState {
    Pending,
    Committing,
    Completed,
    Failed,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Pending => "pending",
            TransactionState::Committing => "committing",
            TransactionState::Completed => "completed",
            TransactionState::Failed => "failed",
        }
    }

    /// Pending or committing.
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Pending | TransactionState::Committing)
    }
}

pub(crate) struct TransactionInner {
    id: TransactionId,
    config: TransactionConfig,
    db: Weak<DatabaseInner>,
    state: Cell<TransactionState>,
    mutations: RefCell<Vec<PendingMutation>>,
    collections: RefCell<Vec<Collection>>,
    commit: RefCell<Option<CommitFuture>>,
    error: RefCell<Option<Error>>,
    done_tx: RefCell<Option<oneshot::Sender<Result<()>>>>,
    done_rx: Shared<oneshot::Receiver<Result<()>>>,
}

/// A unit of optimistic writes.
#[derive(Clone)]
pub struct Transaction {
    inner: Rc<TransactionInner>,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, config: TransactionConfig, db: Weak<DatabaseInner>) -> Self {
        let (done_tx, done_rx) = oneshot::channel();
        Self {
            inner: Rc::new(TransactionInner {
                id,
                config,
                db,
                state: Cell::new(TransactionState::Pending),
                mutations: RefCell::new(Vec::new()),
                collections: RefCell::new(Vec::new()),
                commit: RefCell::new(None),
                error: RefCell::new(None),
                done_tx: RefCell::new(Some(done_tx)),
                done_rx: done_rx.shared(),
            }),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.inner.id
    }

    pub fn state(&self) -> TransactionState {
        self.inner.state.get()
    }

    pub fn metadata(&self) -> &Value {
        &self.inner.config.metadata
    }

    pub fn is_auto_commit(&self) -> bool {
        self.inner.config.auto_commit
    }

    /// The merged mutations, in first-write order.
    pub fn mutations(&self) -> Vec<PendingMutation> {
        self.inner.mutations.borrow().clone()
    }

    /// The error that failed the transaction.
    pub fn error(&self) -> Option<Error> {
        self.inner.error.borrow().clone()
    }

    /// Whether the transaction has a pending write to `key` of `collection`.
    pub fn touches(&self, collection: &str, key: &Key) -> bool {
        self.inner
            .mutations
            .borrow()
            .iter()
            .any(|m| m.collection == collection && m.key == *key)
    }

    fn database(&self) -> Result<Database> {
        self.inner
            .db
            .upgrade()
            .map(Database::from_inner)
            .ok_or_else(|| Error::invalid_operation("database was dropped"))
    }

    fn not_pending(&self) -> Error {
        Error::TransactionNotPending {
            id: self.id(),
            state: self.state().as_str().into(),
        }
    }

    fn ensure_pending(&self) -> Result<()> {
        if self.state() == TransactionState::Pending {
            Ok(())
        } else {
            Err(self.not_pending())
        }
    }

    /// Runs `f` with this transaction as the ambient transaction.
    ///
    /// Collection writes made by `f` join this transaction. Live queries
    /// touched by them run once, in dependency order, before `mutate`
    /// returns. Auto-commit transactions start committing afterwards.
    pub fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        self.ensure_pending()?;
        let db = self.database()?;
        db.push_transaction(self.clone());
        let result = f();
        let flushed = db.scheduler().flush(self.id());
        db.pop_transaction();
        result?;
        flushed?;
        if self.inner.config.auto_commit {
            drop(self.commit());
        }
        Ok(())
    }

    /// Merges `mutations` into the transaction and republishes its
    /// optimistic rows on every collection they touch.
    pub fn apply_mutations(&self, mutations: Vec<PendingMutation>) -> Result<()> {
        self.ensure_pending()?;
        if mutations.is_empty() {
            return Ok(());
        }
        let db = self.database()?;
        let touched: BTreeSet<String> = mutations.iter().map(|m| m.collection.clone()).collect();
        {
            let mut list = self.inner.mutations.borrow_mut();
            for next in mutations {
                mutation::apply(&mut list, next);
            }
        }
        tracing::trace!(transaction = self.id(), collections = touched.len(), "mutations applied");

        for id in touched {
            let collection = self.track(&db, &id)?;
            let layer: BTreeMap<Key, Option<Value>> = self
                .inner
                .mutations
                .borrow()
                .iter()
                .filter(|m| m.collection == id)
                .map(|m| (m.key.clone(), m.visible_row().cloned()))
                .collect();
            collection.inner.set_layer(self.id(), layer);
        }
        Ok(())
    }

    fn track(&self, db: &Database, id: &str) -> Result<Collection> {
        if let Some(collection) = self.inner.collections.borrow().iter().find(|c| c.id() == id) {
            return Ok(collection.clone());
        }
        let collection = db
            .collection(id)
            .ok_or_else(|| Error::invalid_operation(format!("unknown collection `{id}`")))?;
        self.inner.collections.borrow_mut().push(collection.clone());
        Ok(collection)
    }

    fn collections(&self) -> Vec<Collection> {
        self.inner.collections.borrow().clone()
    }

    /// Starts committing.
    ///
    /// The mutation function is called once with the merged mutations.
    /// Calling `commit` again returns the same future. A transaction with
    /// no mutations or no mutation function completes immediately.
    pub fn commit(&self) -> CommitFuture {
        if let Some(existing) = self.inner.commit.borrow().clone() {
            return existing;
        }
        if self.state() != TransactionState::Pending {
            let error = self.error().unwrap_or_else(|| self.not_pending());
            return future::ready(Err(error)).boxed_local().shared();
        }

        self.inner.state.set(TransactionState::Committing);
        let mutations = self.mutations();
        tracing::debug!(transaction = self.id(), mutations = mutations.len(), "committing transaction");
        let persist = match &self.inner.config.mutation_fn {
            Some(persist) if !mutations.is_empty() => Some(persist(mutations)),
            _ => None,
        };

        let commit = match persist {
            None => future::ready(self.finish(Ok(()))).boxed_local().shared(),
            Some(persist) => {
                let this = Rc::downgrade(&self.inner);
                async move {
                    let result = persist.await;
                    match this.upgrade() {
                        Some(inner) => Transaction { inner }.finish(result),
                        None => result,
                    }
                }
                .boxed_local()
                .shared()
            }
        };
        *self.inner.commit.borrow_mut() = Some(commit.clone());
        commit
    }

    /// Rolls back the transaction and every pending transaction writing
    /// one of its rows.
    pub fn rollback(&self) -> Result<()> {
        if !self.state().is_active() {
            return Err(self.not_pending());
        }
        tracing::debug!(transaction = self.id(), "rolling back transaction");
        self.fail(Error::RolledBack {
            id: self.id(),
            cause: self.id(),
        });
        self.cascade();
        Ok(())
    }

    /// Resolves once the transaction has completed or failed.
    pub fn is_persisted(&self) -> impl Future<Output = Result<()>> + 'static {
        let commit = self.inner.commit.borrow().clone();
        let done = self.inner.done_rx.clone();
        async move {
            if let Some(commit) = commit {
                // Drives the mutation function; the outcome arrives on `done`.
                let _ = commit.await;
            }
            done.await
                .unwrap_or_else(|_| Err(Error::invalid_operation("transaction dropped before settling")))
        }
    }

    fn finish(&self, result: Result<()>) -> Result<()> {
        if self.state() == TransactionState::Failed {
            return Err(self.error().unwrap_or_else(|| self.not_pending()));
        }
        match result {
            Ok(()) => {
                self.inner.state.set(TransactionState::Completed);
                tracing::debug!(transaction = self.id(), "transaction completed");
                for collection in self.collections() {
                    collection.inner.confirm_layer(self.id());
                }
                self.settle(Ok(()));
                Ok(())
            }
            Err(error) => {
                let error = match error {
                    failed @ Error::CommitFailed { .. } => failed,
                    other => Error::commit_failed(self.id(), other.to_string()),
                };
                tracing::warn!(transaction = self.id(), %error, "transaction commit failed");
                self.fail(error.clone());
                self.cascade();
                Err(error)
            }
        }
    }

    fn fail(&self, error: Error) {
        self.inner.state.set(TransactionState::Failed);
        *self.inner.error.borrow_mut() = Some(error.clone());
        if let Ok(db) = self.database() {
            db.scheduler().clear(self.id());
        }
        for collection in self.collections() {
            collection.inner.remove_layer(self.id());
        }
        self.settle(Err(error));
    }

    fn settle(&self, result: Result<()>) {
        if let Some(done) = self.inner.done_tx.borrow_mut().take() {
            let _ = done.send(result);
        }
        if let Ok(db) = self.database() {
            db.forget_transaction(self.id());
        }
    }

    /// Rolls back active transactions conflicting with this one, and
    /// transitively those conflicting with them.
    fn cascade(&self) {
        let Ok(db) = self.database() else {
            return;
        };
        let mut queue = vec![self.clone()];
        while let Some(failed) = queue.pop() {
            for other in db.active_transactions() {
                if other.id() == self.id() || !other.state().is_active() || !other.conflicts_with(&failed) {
                    continue;
                }
                tracing::debug!(transaction = other.id(), cause = self.id(), "rolling back conflicting transaction");
                other.fail(Error::RolledBack {
                    id: other.id(),
                    cause: self.id(),
                });
                queue.push(other);
            }
        }
    }

    fn conflicts_with(&self, other: &Transaction) -> bool {
        let mine = self.inner.mutations.borrow();
        let theirs = other.inner.mutations.borrow();
        mine.iter().any(|m| theirs.iter().any(|t| m.same_row(t)))
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("mutations", &self.inner.mutations.borrow().len())
            .finish()
    }
}
