//! Database - the registry tying collections, transactions and live
//! queries together.
//!
//! A `Database` owns every collection it creates, the scheduler that
//! orders live query runs, the stack of ambient transactions and the
//! clock used for garbage collection. Cloning is cheap; clones share the
//! same registry.

use crate::collection::{Collection, CollectionConfig};
use crate::live::{LiveQuery, LiveQueryConfig};
use crate::transaction::{Transaction, TransactionConfig, TransactionId};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Instant;
use strand_core::{Error, Result};
use strand_query::ast::QueryIr;
use strand_reactive::Scheduler;

/// Source of the current time.
pub type Clock = Rc<dyn Fn() -> Instant>;

/// Configuration of a database.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub clock: Clock,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            clock: Rc::new(Instant::now),
        }
    }
}

impl DatabaseConfig {
    /// Replaces the clock used to timestamp idle collections.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> Instant + 'static,
    {
        self.clock = Rc::new(clock);
        self
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig").finish_non_exhaustive()
    }
}

pub(crate) struct DatabaseInner {
    config: DatabaseConfig,
    this: Weak<DatabaseInner>,
    collections: RefCell<BTreeMap<String, Collection>>,
    /// Output collection id -> job id of the live query writing it
    live_owners: RefCell<BTreeMap<String, u64>>,
    transactions: RefCell<BTreeMap<TransactionId, Transaction>>,
    ambient: RefCell<Vec<Transaction>>,
    scheduler: Rc<Scheduler>,
    next_id: Cell<u64>,
}

impl DatabaseInner {
    pub(crate) fn now(&self) -> Instant {
        (self.config.clock)()
    }
}

/// An in-memory database of collections and live queries.
#[derive(Clone)]
pub struct Database {
    inner: Rc<DatabaseInner>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    pub fn new() -> Self {
        Self::with_config(DatabaseConfig::default())
    }

    pub fn with_config(config: DatabaseConfig) -> Self {
        let inner = Rc::new_cyclic(|this| DatabaseInner {
            config,
            this: this.clone(),
            collections: RefCell::new(BTreeMap::new()),
            live_owners: RefCell::new(BTreeMap::new()),
            transactions: RefCell::new(BTreeMap::new()),
            ambient: RefCell::new(Vec::new()),
            scheduler: Rc::new(Scheduler::new()),
            next_id: Cell::new(1),
        });
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Rc<DatabaseInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<DatabaseInner> {
        self.inner.this.clone()
    }

    /// The current time according to the configured clock.
    pub fn now(&self) -> Instant {
        self.inner.now()
    }

    /// Allocates an id unique within this database.
    pub fn next_id(&self) -> u64 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }

    // --- collections ---

    /// Creates and registers a collection.
    ///
    /// Collections configured with `start_sync` start their sync source
    /// right away; the others start it on their first subscriber.
    pub fn create_collection(&self, config: CollectionConfig) -> Result<Collection> {
        if self.inner.collections.borrow().contains_key(&config.id) {
            return Err(Error::invalid_operation(format!(
                "collection `{}` already exists",
                config.id
            )));
        }
        let start = config.start_sync;
        let collection = Collection::new(config, self.downgrade(), self.now());
        self.inner
            .collections
            .borrow_mut()
            .insert(collection.id().to_string(), collection.clone());
        tracing::debug!(collection = %collection.id(), "collection created");
        if start {
            collection.start_sync()?;
        }
        Ok(collection)
    }

    pub fn collection(&self, id: &str) -> Option<Collection> {
        self.inner.collections.borrow().get(id).cloned()
    }

    pub fn collection_ids(&self) -> Vec<String> {
        self.inner.collections.borrow().keys().cloned().collect()
    }

    /// Unregisters a collection after cleaning it up.
    pub fn drop_collection(&self, id: &str) -> Result<()> {
        let collection = self
            .inner
            .collections
            .borrow_mut()
            .remove(id)
            .ok_or_else(|| Error::invalid_operation(format!("unknown collection `{id}`")))?;
        self.inner.live_owners.borrow_mut().remove(id);
        collection.cleanup()
    }

    /// Cleans up every collection that has had no subscribers for its gc
    /// time. Returns the ids of the collections cleaned up.
    pub fn collect_garbage(&self, now: Instant) -> Vec<String> {
        let collections: Vec<Collection> = self.inner.collections.borrow().values().cloned().collect();
        let mut collected = Vec::new();
        for collection in collections {
            match collection.inner.collect_if_idle(now) {
                Ok(true) => collected.push(collection.id().to_string()),
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(collection = %collection.id(), %error, "garbage collection failed")
                }
            }
        }
        if !collected.is_empty() {
            tracing::debug!(count = collected.len(), "collections garbage collected");
        }
        collected
    }

    // --- transactions ---

    /// Creates a pending transaction.
    pub fn transaction(&self, config: TransactionConfig) -> Transaction {
        let id = self.next_id();
        let transaction = Transaction::new(id, config, self.downgrade());
        self.inner
            .transactions
            .borrow_mut()
            .insert(id, transaction.clone());
        tracing::trace!(transaction = id, "transaction created");
        transaction
    }

    /// The innermost transaction whose `mutate` is running.
    pub fn current_transaction(&self) -> Option<Transaction> {
        self.inner.ambient.borrow().last().cloned()
    }

    /// Transactions that have neither completed nor failed.
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.inner.transactions.borrow().values().cloned().collect()
    }

    pub(crate) fn active_transactions(&self) -> Vec<Transaction> {
        self.pending_transactions()
    }

    pub(crate) fn forget_transaction(&self, id: TransactionId) {
        self.inner.transactions.borrow_mut().remove(&id);
    }

    pub(crate) fn push_transaction(&self, transaction: Transaction) {
        self.inner.ambient.borrow_mut().push(transaction);
    }

    pub(crate) fn pop_transaction(&self) {
        self.inner.ambient.borrow_mut().pop();
    }

    pub fn scheduler(&self) -> Rc<Scheduler> {
        self.inner.scheduler.clone()
    }

    /// Awaits the commits of every pending transaction that started
    /// committing. Failures are reported by the transactions themselves.
    pub async fn settle(&self) {
        let commits: Vec<_> = self
            .pending_transactions()
            .into_iter()
            .filter(|t| t.state() == crate::transaction::TransactionState::Committing)
            .map(|t| t.commit())
            .collect();
        for commit in commits {
            let _ = commit.await;
        }
    }

    // --- live queries ---

    /// Creates a live query over `ir` with the default configuration.
    pub fn live_query(&self, ir: QueryIr) -> Result<LiveQuery> {
        self.live_query_with(ir, LiveQueryConfig::default())
    }

    pub fn live_query_with(&self, ir: QueryIr, config: LiveQueryConfig) -> Result<LiveQuery> {
        LiveQuery::create(self, ir, config)
    }

    pub(crate) fn register_live_owner(&self, collection: &str, job: u64) {
        self.inner
            .live_owners
            .borrow_mut()
            .insert(collection.to_string(), job);
    }

    /// Job id of the live query writing `collection`, if any.
    pub(crate) fn live_owner(&self, collection: &str) -> Option<u64> {
        self.inner.live_owners.borrow().get(collection).copied()
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("collections", &self.collection_ids())
            .field("transactions", &self.inner.transactions.borrow().len())
            .finish()
    }
}
