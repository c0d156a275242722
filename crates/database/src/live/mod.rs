//! Live queries.
//!
//! A live query keeps the result of a `QueryIr` in an output collection of
//! its own. The output collection's sync source is the query runtime:
//! starting it subscribes to every aliased source with the where clauses
//! pushed down to that alias, and every source change is pushed through
//! the compiled dataflow graph. Results are written back through the
//! output collection's `SyncHandle`, so anything that can consume a
//! collection (subscriptions, other live queries) can consume a live
//! query.
//!
//! Inside a transaction, runs are deferred to the scheduler under the
//! transaction's context: many source changes collapse into one run, and
//! a live query reading another live query's output runs after it.

mod compiler;

use crate::collection::{
    Collection, CollectionConfig, CollectionStatus, CollectionSubscription, LimitedSnapshotOptions,
    RowUpdateMode, SnapshotOptions, SubscribeOptions, SyncCleanup, SyncConfig, SyncHandle, SyncWrite,
};
use crate::database::{Database, DatabaseInner};
use compiler::{compile_query, LazyWindow};
use futures::channel::oneshot;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;
use strand_core::{Error, Key, Result, Value};
use strand_incremental::{DataflowGraph, Delta, KeyedRow};
use strand_query::ast::{Expr, QueryIr, Source, SourceTarget};
use strand_reactive::{ChangeMessage, ListenerId};

/// Configuration of a live query.
#[derive(Clone, Debug)]
pub struct LiveQueryConfig {
    /// Id of the output collection. Generated when `None`.
    pub id: Option<String>,
    /// Run the query on creation instead of on first subscriber.
    pub start_sync: bool,
    pub gc_time: Option<Duration>,
}

impl Default for LiveQueryConfig {
    fn default() -> Self {
        Self {
            id: None,
            start_sync: true,
            gc_time: Some(CollectionConfig::DEFAULT_GC_TIME),
        }
    }
}

impl LiveQueryConfig {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_start_sync(mut self, start: bool) -> Self {
        self.start_sync = start;
        self
    }

    pub fn with_gc_time(mut self, gc_time: Option<Duration>) -> Self {
        self.gc_time = gc_time;
        self
    }
}

/// An alias bound to the collection it reads.
struct SourceBinding {
    alias: String,
    collection: Collection,
    filter: Option<Expr>,
}

struct Running {
    subscriptions: Vec<(String, CollectionSubscription)>,
    status_listeners: Vec<(Collection, ListenerId)>,
}

pub(crate) struct LiveRuntime {
    job: u64,
    name: String,
    ir: QueryIr,
    this: Weak<LiveRuntime>,
    db: Weak<DatabaseInner>,
    bindings: Vec<SourceBinding>,
    /// Jobs of the live queries this one reads from
    dependencies: Vec<u64>,
    lazy: Option<LazyWindow>,
    graph: RefCell<Option<DataflowGraph>>,
    sync: RefCell<Option<SyncHandle>>,
    running: RefCell<Option<Running>>,
    /// Fractional index of every ordered output row
    indices: RefCell<BTreeMap<Key, String>>,
    error: RefCell<Option<Error>>,
    starting: Cell<bool>,
    window: Cell<Option<(usize, Option<usize>)>>,
}

impl LiveRuntime {
    fn database(&self) -> Option<Database> {
        self.db.upgrade().map(Database::from_inner)
    }

    fn sync_handle(&self) -> Option<SyncHandle> {
        self.sync.borrow().clone()
    }

    fn output(&self) -> Option<Collection> {
        let sync = self.sync.borrow();
        let inner = sync.as_ref()?.collection.upgrade()?;
        Some(Collection { inner })
    }

    fn subscription(&self, alias: &str) -> Option<CollectionSubscription> {
        self.running
            .borrow()
            .as_ref()?
            .subscriptions
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, s)| s.clone())
    }

    /// Starts the query: compiles a fresh graph, subscribes to every
    /// source and loads the initial rows.
    fn start(&self, sync: SyncHandle) -> Result<()> {
        tracing::debug!(query = %self.name, sources = self.bindings.len(), "starting live query");
        *self.sync.borrow_mut() = Some(sync.clone());
        *self.error.borrow_mut() = None;
        self.indices.borrow_mut().clear();

        let compiled = compile_query(&self.ir)?;
        let mut graph = DataflowGraph::new(compiled.root);
        if let Some((offset, limit)) = self.window.get() {
            graph.set_window(offset, limit)?;
        }
        *self.graph.borrow_mut() = Some(graph);

        if self.output().is_some_and(|o| o.size() > 0) {
            sync.begin()?;
            sync.truncate()?;
            sync.commit()?;
        }

        self.starting.set(true);
        let subscribed = self.subscribe_sources();
        self.starting.set(false);
        subscribed?;

        self.schedule();
        self.check_ready();
        Ok(())
    }

    fn subscribe_sources(&self) -> Result<()> {
        let mut running = Running {
            subscriptions: Vec::new(),
            status_listeners: Vec::new(),
        };
        for binding in &self.bindings {
            let this = self.this.clone();
            let alias = binding.alias.clone();
            let subscription = binding.collection.subscribe_changes(
                move |changes: &[ChangeMessage]| {
                    if let Some(runtime) = this.upgrade() {
                        runtime.on_source_changes(&alias, changes);
                    }
                },
                SubscribeOptions {
                    where_: binding.filter.clone(),
                    include_initial_state: false,
                },
            )?;
            let this = self.this.clone();
            let source = binding.collection.id().to_string();
            let listener = binding.collection.on_status_change(move |change| {
                let Some(runtime) = this.upgrade() else {
                    return;
                };
                match change.to {
                    CollectionStatus::Ready => runtime.check_ready(),
                    CollectionStatus::Error => {
                        runtime.fail(Error::graph(runtime.name.clone(), format!("source `{source}` failed")))
                    }
                    _ => {}
                }
            });
            running.subscriptions.push((binding.alias.clone(), subscription));
            running.status_listeners.push((binding.collection.clone(), listener));
        }
        let subscriptions: Vec<(String, CollectionSubscription)> = running.subscriptions.clone();
        *self.running.borrow_mut() = Some(running);

        for (alias, subscription) in subscriptions {
            match self.lazy.as_ref().filter(|lazy| lazy.alias == alias) {
                Some(lazy) => {
                    let wanted = rows_wanted(self.current_window(), 0, subscription.collection().size());
                    subscription.request_limited_snapshot(LimitedSnapshotOptions {
                        order_by: lazy.order_by.clone(),
                        limit: wanted,
                        min_values: None,
                    })?;
                }
                None => {
                    subscription.request_snapshot(SnapshotOptions::default())?;
                }
            }
        }
        Ok(())
    }

    fn stop(&self) {
        let running = self.running.borrow_mut().take();
        if let Some(running) = running {
            for (collection, listener) in running.status_listeners {
                collection.off_status_change(listener);
            }
            for (_, subscription) in running.subscriptions {
                subscription.unsubscribe();
            }
        }
        *self.graph.borrow_mut() = None;
        self.indices.borrow_mut().clear();
        tracing::debug!(query = %self.name, "live query stopped");
    }

    fn current_window(&self) -> (usize, Option<usize>) {
        self.window
            .get()
            .unwrap_or((self.ir.offset.unwrap_or(0), self.ir.limit))
    }

    fn on_source_changes(&self, alias: &str, changes: &[ChangeMessage]) {
        let deltas = ChangeMessage::to_deltas(changes);
        let pushed = match self.graph.borrow_mut().as_mut() {
            Some(graph) => graph.push(alias, deltas),
            None => return,
        };
        match pushed {
            Ok(()) => self.schedule(),
            Err(error) => self.fail(error),
        }
    }

    /// Runs the graph now, or once per flush of the ambient transaction.
    fn schedule(&self) {
        if self.starting.get() {
            return;
        }
        let Some(db) = self.database() else {
            return;
        };
        match db.current_transaction() {
            Some(transaction) => {
                let this = self.this.clone();
                db.scheduler().schedule(
                    transaction.id(),
                    self.job,
                    &self.dependencies,
                    Box::new(move || {
                        if let Some(runtime) = this.upgrade() {
                            runtime.run();
                        }
                    }),
                );
            }
            None => self.run(),
        }
    }

    fn run(&self) {
        if self.error.borrow().is_some() {
            tracing::warn!(query = %self.name, "run suppressed until reset");
            return;
        }
        let result = match self.graph.borrow_mut().as_mut() {
            Some(graph) => graph.run(),
            None => return,
        };
        tracing::trace!(query = %self.name, "graph run");
        match result.and_then(|deltas| self.apply_output(deltas)) {
            Ok(()) => self.fill_window(),
            Err(error) => self.fail(error),
        }
    }

    /// Writes consolidated graph output to the output collection as one
    /// sync commit.
    fn apply_output(&self, deltas: Vec<Delta<KeyedRow>>) -> Result<()> {
        if deltas.is_empty() {
            return Ok(());
        }
        let Some(sync) = self.sync_handle() else {
            return Ok(());
        };
        let mut rows: BTreeMap<Key, Option<KeyedRow>> = BTreeMap::new();
        for delta in deltas {
            if delta.is_insert() {
                rows.insert(delta.data.key.clone(), Some(delta.data));
            } else if delta.is_delete() {
                rows.entry(delta.data.key.clone()).or_insert(None);
            }
        }
        tracing::trace!(query = %self.name, rows = rows.len(), "writing live query output");

        sync.begin()?;
        match write_rows(&sync, rows) {
            Ok(indices) => {
                let mut known = self.indices.borrow_mut();
                for (key, index) in indices {
                    match index {
                        Some(index) => known.insert(key, index),
                        None => known.remove(&key),
                    };
                }
                drop(known);
                sync.commit()
            }
            Err(error) => {
                sync.rollback()?;
                Err(error)
            }
        }
    }

    /// Asks the lazy source for more rows when the window is short.
    fn fill_window(&self) {
        let Some(lazy) = &self.lazy else {
            return;
        };
        let (window, known) = {
            let graph = self.graph.borrow();
            let Some(graph) = graph.as_ref() else {
                return;
            };
            let window = graph.window().unwrap_or_default();
            if window.1.is_some() && !graph.is_window_short() {
                return;
            }
            (window, graph.top_k().map_or(0, |t| t.len()))
        };
        let Some(subscription) = self.subscription(&lazy.alias) else {
            return;
        };
        if subscription.is_exhausted() {
            return;
        }
        let missing = rows_wanted(window, known, subscription.collection().size());
        tracing::trace!(query = %self.name, missing, "window short, loading more rows");
        let request = LimitedSnapshotOptions {
            order_by: lazy.order_by.clone(),
            limit: missing,
            min_values: subscription.cursor(),
        };
        if let Err(error) = subscription.request_limited_snapshot(request) {
            self.fail(error);
        }
    }

    fn check_ready(&self) {
        if self.error.borrow().is_some() || !self.bindings.iter().all(|b| b.collection.is_ready()) {
            return;
        }
        let loading = self.output().is_some_and(|o| o.status() == CollectionStatus::Loading);
        if !loading {
            return;
        }
        if let Some(sync) = self.sync_handle() {
            if let Err(error) = sync.mark_ready() {
                tracing::warn!(query = %self.name, %error, "could not mark live query ready");
            }
        }
    }

    /// Marks the output collection as failed and suppresses further runs.
    fn fail(&self, error: Error) {
        let error = match error {
            graph @ Error::Graph { .. } => graph,
            other => Error::graph(self.name.clone(), other.to_string()),
        };
        tracing::warn!(query = %self.name, %error, "live query failed");
        *self.error.borrow_mut() = Some(error);
        if let Some(db) = self.database() {
            if let Some(transaction) = db.current_transaction() {
                if db.scheduler().unschedule(transaction.id(), self.job) {
                    tracing::debug!(query = %self.name, "dropped scheduled run");
                }
            }
        }
        if let Some(output) = self.output() {
            if let Err(error) = output.mark_error() {
                tracing::warn!(query = %self.name, %error, "could not mark live query failed");
            }
        }
    }
}

/// Buffers output rows in the open sync batch and returns the fractional
/// index each written key ends up with.
fn write_rows(sync: &SyncHandle, rows: BTreeMap<Key, Option<KeyedRow>>) -> Result<Vec<(Key, Option<String>)>> {
    let mut indices = Vec::with_capacity(rows.len());
    for (key, row) in rows {
        match row {
            Some(row) => {
                sync.write(SyncWrite::insert(row.value).keyed(key.clone()))?;
                indices.push((key, row.index));
            }
            None => {
                sync.write(SyncWrite::delete(key.clone()))?;
                indices.push((key, None));
            }
        }
    }
    Ok(indices)
}

/// Rows to ask a lazy source for so that the window holds enough rows.
fn rows_wanted(window: (usize, Option<usize>), known: usize, source_size: usize) -> usize {
    match window.1 {
        Some(limit) => (window.0 + limit).saturating_sub(known).max(1),
        // an unbounded window takes every row
        None => source_size + 1,
    }
}

/// Resolves the collection an alias reads, and the job of the live query
/// writing it.
fn resolve(db: &Database, source: &Source) -> Result<(Collection, Option<u64>)> {
    match &source.target {
        SourceTarget::Collection(r) => {
            let collection = db
                .collection(&r.id)
                .ok_or_else(|| Error::invalid_query(format!("unknown collection `{}`", r.id)))?;
            Ok((collection, db.live_owner(&r.id)))
        }
        SourceTarget::Query(query) => {
            let nested = db.live_query_with((**query).clone(), LiveQueryConfig::default())?;
            let job = nested.runtime.job;
            Ok((nested.collection, Some(job)))
        }
    }
}

/// A query whose result is kept up to date.
///
/// Cloning is cheap; clones refer to the same query.
#[derive(Clone)]
pub struct LiveQuery {
    runtime: Rc<LiveRuntime>,
    collection: Collection,
}

impl LiveQuery {
    pub(crate) fn create(db: &Database, ir: QueryIr, config: LiveQueryConfig) -> Result<Self> {
        let compiled = compile_query(&ir)?;
        let job = db.next_id();
        let name = config.id.clone().unwrap_or_else(|| format!("live:{job}"));
        if db.collection(&name).is_some() {
            return Err(Error::invalid_operation(format!("collection `{name}` already exists")));
        }

        let mut bindings = Vec::with_capacity(compiled.sources.len());
        let mut dependencies = Vec::new();
        for plan in compiled.sources {
            let (collection, owner) = resolve(db, &plan.source)?;
            if let Some(owner) = owner.filter(|o| !dependencies.contains(o)) {
                dependencies.push(owner);
            }
            bindings.push(SourceBinding {
                alias: plan.source.alias,
                collection,
                filter: plan.filter,
            });
        }

        let runtime = Rc::new_cyclic(|this| LiveRuntime {
            job,
            name: name.clone(),
            ir,
            this: this.clone(),
            db: db.downgrade(),
            bindings,
            dependencies,
            lazy: compiled.lazy,
            graph: RefCell::new(None),
            sync: RefCell::new(None),
            running: RefCell::new(None),
            indices: RefCell::new(BTreeMap::new()),
            error: RefCell::new(None),
            starting: Cell::new(false),
            window: Cell::new(None),
        });

        let owner = runtime.clone();
        let sync = SyncConfig::new(move |handle| {
            if let Err(error) = owner.start(handle) {
                owner.fail(error);
            }
            let stopping = owner.clone();
            let cleanup: SyncCleanup = Box::new(move || stopping.stop());
            Some(cleanup)
        })
        .with_row_update_mode(RowUpdateMode::Full);
        let collection_config = CollectionConfig::new(name.clone(), |_| None)
            .with_sync(sync)
            .with_start_sync(config.start_sync)
            .with_gc_time(config.gc_time);

        db.register_live_owner(&name, job);
        let collection = match db.create_collection(collection_config) {
            Ok(collection) => collection,
            Err(error) => {
                db.drop_collection(&name).ok();
                return Err(error);
            }
        };
        tracing::debug!(query = %name, job, dependencies = ?runtime.dependencies, "live query created");
        Ok(Self { runtime, collection })
    }

    /// Id of the output collection.
    pub fn id(&self) -> &str {
        self.collection.id()
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn ir(&self) -> &QueryIr {
        &self.runtime.ir
    }

    pub fn status(&self) -> CollectionStatus {
        self.collection.status()
    }

    pub fn is_ready(&self) -> bool {
        self.collection.is_ready()
    }

    /// The graph error that stopped the query.
    pub fn error(&self) -> Option<Error> {
        self.runtime.error.borrow().clone()
    }

    /// Result rows in order.
    pub fn to_vec(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(_, v)| v).collect()
    }

    /// Result rows with their keys, ordered by fractional index, then key.
    pub fn entries(&self) -> Vec<(Key, Value)> {
        let indices = self.runtime.indices.borrow();
        let mut entries = self.collection.entries();
        entries.sort_by(|(a, _), (b, _)| indices.get(a).cmp(&indices.get(b)).then_with(|| a.cmp(b)));
        entries
    }

    /// Fractional index of a row in an ordered query.
    pub fn index_of(&self, key: &Key) -> Option<String> {
        self.runtime.indices.borrow().get(key).cloned()
    }

    /// The `(offset, limit)` of an ordered query.
    pub fn window(&self) -> Option<(usize, Option<usize>)> {
        if self.runtime.ir.order_by.is_empty() {
            return None;
        }
        Some(self.runtime.current_window())
    }

    /// Moves the window of an ordered query.
    ///
    /// Rows leaving the window are deleted from the output and rows
    /// entering it inserted; a short window loads more rows from a lazily
    /// filled source.
    pub fn set_window(&self, offset: usize, limit: Option<usize>) -> Result<()> {
        if self.runtime.ir.order_by.is_empty() {
            return Err(Error::invalid_operation("set_window requires an ordered live query"));
        }
        self.runtime.window.set(Some((offset, limit)));
        let moved = match self.runtime.graph.borrow_mut().as_mut() {
            Some(graph) => graph.set_window(offset, limit)?,
            None => return Ok(()),
        };
        tracing::debug!(query = %self.id(), offset, ?limit, "window moved");
        if let Some(moved) = moved {
            self.runtime.apply_output(moved)?;
        }
        self.runtime.fill_window();
        Ok(())
    }

    /// Subscribes to the changes of the result rows.
    pub fn subscribe_changes<F>(&self, callback: F, options: SubscribeOptions) -> Result<CollectionSubscription>
    where
        F: Fn(&[ChangeMessage]) + 'static,
    {
        self.collection.subscribe_changes(callback, options)
    }

    /// Recovers a failed query: the output is cleared and the query
    /// restarted from its sources.
    pub fn reset(&self) -> Result<()> {
        tracing::debug!(query = %self.id(), "resetting live query");
        if let Some(sync) = self.runtime.sync_handle() {
            sync.begin()?;
            sync.truncate()?;
            sync.commit()?;
        }
        *self.runtime.error.borrow_mut() = None;
        self.collection.cleanup()?;
        self.collection.start_sync()
    }

    /// Resolves once the query is ready, after the pending subset loads of
    /// its sources have finished.
    pub async fn ready(&self) -> Result<()> {
        loop {
            let loads: Vec<_> = self
                .runtime
                .bindings
                .iter()
                .flat_map(|b| b.collection.pending_loads())
                .collect();
            if loads.is_empty() {
                break;
            }
            for load in loads {
                load.await?;
            }
            self.runtime.fill_window();
        }

        match self.status() {
            CollectionStatus::Ready => return Ok(()),
            CollectionStatus::Error => return Err(self.failure()),
            _ => {}
        }
        let (done_tx, done_rx) = oneshot::channel();
        let done_tx = RefCell::new(Some(done_tx));
        let listener = self.collection.on_status_change(move |change| {
            if matches!(change.to, CollectionStatus::Ready | CollectionStatus::Error) {
                if let Some(done) = done_tx.borrow_mut().take() {
                    let _ = done.send(change.to);
                }
            }
        });
        if matches!(self.status(), CollectionStatus::Idle | CollectionStatus::CleanedUp) {
            self.collection.start_sync()?;
        }
        let status = if self.is_ready() { Ok(CollectionStatus::Ready) } else { done_rx.await };
        self.collection.off_status_change(listener);
        match status {
            Ok(CollectionStatus::Ready) => Ok(()),
            Ok(_) => Err(self.failure()),
            Err(_) => Err(Error::invalid_operation("live query dropped before ready")),
        }
    }

    fn failure(&self) -> Error {
        self.error().unwrap_or_else(|| Error::CollectionInError {
            collection: self.id().to_string(),
        })
    }
}

impl fmt::Debug for LiveQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveQuery")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("rows", &self.collection.size())
            .finish()
    }
}
