//! Collections.
//!
//! A collection maps keys to rows. Its visible state is the synced state
//! written by the sync source, overlaid with one optimistic layer per
//! pending transaction that touched it. Every visible change is reported
//! once to the collection's change listeners as a batch of
//! `ChangeMessage`s; subscriptions and live queries build on those.

pub mod config;
pub mod status;
pub mod subscription;
pub mod sync;

pub use config::{
    AutoIndex, CollectionConfig, CompareFn, GetKeyFn, LoadSubsetFn, RowUpdateMode, SyncCleanup,
    SyncConfig, SyncFn, SyncMode,
};
pub use status::{CollectionStatus, StatusChange};
pub use subscription::{
    CollectionSubscription, LimitedSnapshotOptions, SnapshotOptions, SubscribeOptions,
    SubscriptionStatus,
};
pub use sync::{LoadSubsetResult, SubsetLoad, SyncHandle, SyncWrite};

use crate::database::{Database, DatabaseInner};
use crate::transaction::{MutationKind, PendingMutation, Transaction, TransactionConfig, TransactionId};
use futures::FutureExt;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Instant;
use strand_core::{CompareOptions, Error, Key, Result, StringSort, Value};
use strand_index::{BTreeIndex, Index, IndexHandle, IndexMeta, IndexOperation, IndexResolver};
use strand_query::ast::{Expr, Func, OrderByClause, PropRef};
use strand_query::eval::{compile_predicate, Predicate};
use strand_query::predicate::{is_predicate_subset, LoadSubsetOptions};
use strand_reactive::{notify, ChangeMessage, ListenerId, Listeners};

/// Events delivered to a collection's change listeners.
#[derive(Clone, Debug)]
pub(crate) enum CollectionEvent {
    /// Visible rows changed.
    Changes(Vec<ChangeMessage>),
    /// A sync commit discarded the synced state. Carries the visible
    /// changes of that commit.
    Truncated(Vec<ChangeMessage>),
    /// The subset load with this id finished.
    SubsetLoaded(u64),
}

/// Options for `Collection::create_index`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexOptions {
    pub name: Option<String>,
    pub compare: CompareOptions,
}

impl IndexOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_compare(mut self, compare: CompareOptions) -> Self {
        self.compare = compare;
        self
    }
}

struct Layer {
    transaction: TransactionId,
    /// `None` marks a deleted row.
    rows: BTreeMap<Key, Option<Value>>,
}

#[derive(Default)]
struct SyncBatch {
    writes: Vec<SyncWrite>,
    truncate: bool,
}

struct InFlightLoad {
    options: LoadSubsetOptions,
    load: SubsetLoad,
}

pub(crate) struct CollectionState {
    status: CollectionStatus,
    synced: BTreeMap<Key, Value>,
    layers: Vec<Layer>,
    batch: Option<SyncBatch>,
    indexes: Vec<IndexHandle>,
    next_index_id: u64,
    subscribers: usize,
    idle_since: Option<Instant>,
    version: u64,
    cleanup: Option<SyncCleanup>,
    generation: u64,
    loaded: Vec<LoadSubsetOptions>,
    in_flight: Vec<InFlightLoad>,
    next_load_id: u64,
}

impl CollectionState {
    fn new(idle_since: Instant) -> Self {
        Self {
            status: CollectionStatus::Idle,
            synced: BTreeMap::new(),
            layers: Vec::new(),
            batch: None,
            indexes: Vec::new(),
            next_index_id: 1,
            subscribers: 0,
            idle_since: Some(idle_since),
            version: 0,
            cleanup: None,
            generation: 0,
            loaded: Vec::new(),
            in_flight: Vec::new(),
            next_load_id: 1,
        }
    }

    /// The visible value of `key`: the newest layer holding it, else the
    /// synced row.
    pub(crate) fn visible(&self, key: &Key) -> Option<&Value> {
        for layer in self.layers.iter().rev() {
            if let Some(entry) = layer.rows.get(key) {
                return entry.as_ref();
            }
        }
        self.synced.get(key)
    }

    fn visible_keys(&self) -> BTreeSet<Key> {
        let mut keys: BTreeSet<Key> = self.synced.keys().cloned().collect();
        for layer in &self.layers {
            keys.extend(layer.rows.keys().cloned());
        }
        keys.retain(|k| self.visible(k).is_some());
        keys
    }

    fn visible_entries(&self) -> Vec<(Key, Value)> {
        self.visible_keys()
            .into_iter()
            .filter_map(|k| {
                let value = self.visible(&k).cloned()?;
                Some((k, value))
            })
            .collect()
    }

    fn rebuild_indexes(&mut self, collection: &str) {
        let entries = self.visible_entries();
        for handle in &mut self.indexes {
            if let Ok(index) = handle.ready_mut() {
                if let Err(error) = index.build(&mut entries.iter().map(|(k, v)| (k, v))) {
                    tracing::warn!(collection, index = %index.meta().name, %error, "index rebuild failed");
                }
            }
        }
    }
}

pub(crate) struct CollectionInner {
    pub(crate) id: String,
    pub(crate) config: CollectionConfig,
    this: Weak<CollectionInner>,
    db: Weak<DatabaseInner>,
    pub(crate) state: RefCell<CollectionState>,
    events: RefCell<Listeners<CollectionEvent>>,
    status_listeners: RefCell<Listeners<StatusChange>>,
    subscriber_listeners: RefCell<Listeners<usize>>,
}

impl CollectionInner {
    pub(crate) fn database(&self) -> Result<Database> {
        self.db
            .upgrade()
            .map(Database::from_inner)
            .ok_or_else(|| Error::invalid_operation("database was dropped"))
    }

    pub(crate) fn key_of(&self, row: &Value) -> Result<Key> {
        (self.config.get_key)(row).ok_or_else(|| Error::missing_key(self.id.as_str()))
    }

    pub(crate) fn status(&self) -> CollectionStatus {
        self.state.borrow().status
    }

    pub(crate) fn set_status(&self, to: CollectionStatus) -> Result<()> {
        let from = {
            let mut state = self.state.borrow_mut();
            state.status.check_transition(&self.id, to)?;
            if state.status == to {
                return Ok(());
            }
            let from = state.status;
            state.status = to;
            from
        };
        tracing::debug!(collection = %self.id, %from, %to, "collection status changed");
        let listeners = self.status_listeners.borrow().snapshot();
        notify(&listeners, &StatusChange { from, to });
        Ok(())
    }

    pub(crate) fn emit(&self, event: CollectionEvent) {
        let listeners = self.events.borrow().snapshot();
        notify(&listeners, &event);
    }

    pub(crate) fn listen<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&CollectionEvent) + 'static,
    {
        self.events.borrow_mut().subscribe(callback)
    }

    pub(crate) fn unlisten(&self, id: ListenerId) {
        self.events.borrow_mut().unsubscribe(id);
    }

    /// Runs `mutate` over the state and returns the visible changes of
    /// `keys`. Indexes are kept in step. No listener is called.
    fn change_visible<F>(&self, keys: BTreeSet<Key>, mutate: F) -> Vec<ChangeMessage>
    where
        F: FnOnce(&mut CollectionState),
    {
        let mut state = self.state.borrow_mut();
        let before: Vec<(Key, Option<Value>)> = keys
            .into_iter()
            .map(|k| {
                let old = state.visible(&k).cloned();
                (k, old)
            })
            .collect();
        mutate(&mut state);

        let mut changes = Vec::new();
        for (key, old) in before {
            let new = state.visible(&key).cloned();
            let change = match (old, new) {
                (None, Some(value)) => ChangeMessage::insert(key, value),
                (Some(old), None) => ChangeMessage::delete(key, old),
                (Some(old), Some(value)) if old != value => ChangeMessage::update(key, old, value),
                _ => continue,
            };
            changes.push(change);
        }

        let state = &mut *state;
        for handle in &mut state.indexes {
            let Ok(index) = handle.ready_mut() else {
                continue;
            };
            for change in &changes {
                let result = match (&change.previous_value, change.is_delete()) {
                    (_, true) => index.remove(&change.key, &change.value),
                    (Some(old), false) => index.update(&change.key, old, &change.value),
                    (None, false) => index.add(&change.key, &change.value),
                };
                if let Err(error) = result {
                    tracing::warn!(collection = %self.id, index = %index.meta().name, %error, "index update failed");
                }
            }
        }
        if !changes.is_empty() {
            state.version += 1;
        }
        changes
    }

    fn emit_changes(&self, changes: Vec<ChangeMessage>) {
        if !changes.is_empty() {
            tracing::trace!(collection = %self.id, count = changes.len(), "emitting changes");
            self.emit(CollectionEvent::Changes(changes));
        }
    }

    // --- optimistic layers ---

    /// Replaces the optimistic rows of `transaction`.
    pub(crate) fn set_layer(&self, transaction: TransactionId, rows: BTreeMap<Key, Option<Value>>) {
        let mut keys: BTreeSet<Key> = rows.keys().cloned().collect();
        if let Some(layer) = self.state.borrow().layers.iter().find(|l| l.transaction == transaction) {
            keys.extend(layer.rows.keys().cloned());
        }
        let changes = self.change_visible(keys, |state| {
            match state.layers.iter().position(|l| l.transaction == transaction) {
                Some(pos) if rows.is_empty() => {
                    state.layers.remove(pos);
                }
                Some(pos) => state.layers[pos].rows = rows,
                None if rows.is_empty() => {}
                None => state.layers.push(Layer { transaction, rows }),
            }
        });
        self.emit_changes(changes);
    }

    /// Drops the optimistic rows of a rolled back transaction.
    pub(crate) fn remove_layer(&self, transaction: TransactionId) {
        self.set_layer(transaction, BTreeMap::new());
    }

    /// Settles the optimistic rows of a completed transaction.
    ///
    /// Local-only collections keep them as their own state. Synced
    /// collections drop them: the sync source is the source of truth.
    pub(crate) fn confirm_layer(&self, transaction: TransactionId) {
        if self.config.sync.is_some() {
            self.remove_layer(transaction);
            return;
        }
        let keys: BTreeSet<Key> = match self.state.borrow().layers.iter().find(|l| l.transaction == transaction) {
            Some(layer) => layer.rows.keys().cloned().collect(),
            None => return,
        };
        let changes = self.change_visible(keys, |state| {
            let Some(pos) = state.layers.iter().position(|l| l.transaction == transaction) else {
                return;
            };
            let layer = state.layers.remove(pos);
            for (key, row) in layer.rows {
                match row {
                    Some(value) => {
                        state.synced.insert(key, value);
                    }
                    None => {
                        state.synced.remove(&key);
                    }
                }
            }
        });
        self.emit_changes(changes);
    }

    // --- sync ---

    pub(crate) fn start_sync(&self) -> Result<()> {
        if !matches!(self.status(), CollectionStatus::Idle | CollectionStatus::CleanedUp) {
            return Ok(());
        }
        self.set_status(CollectionStatus::Loading)?;
        let Some(sync) = self.config.sync.as_ref() else {
            return self.set_status(CollectionStatus::Ready);
        };
        tracing::debug!(collection = %self.id, mode = ?self.config.sync_mode, "starting sync");
        let cleanup = (sync.sync)(SyncHandle {
            collection: self.this.clone(),
        });
        self.state.borrow_mut().cleanup = cleanup;
        Ok(())
    }

    pub(crate) fn begin_sync(&self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.batch.is_some() {
            return Err(Error::SyncAlreadyInTransaction {
                collection: self.id.clone(),
            });
        }
        state.batch = Some(SyncBatch::default());
        Ok(())
    }

    pub(crate) fn write_sync(&self, write: SyncWrite) -> Result<()> {
        let write = match write {
            SyncWrite::Insert { key: None, value } => {
                let key = self.key_of(&value)?;
                SyncWrite::Insert { key: Some(key), value }
            }
            SyncWrite::Update { key: None, value } => {
                let key = self.key_of(&value)?;
                SyncWrite::Update { key: Some(key), value }
            }
            keyed => keyed,
        };
        if let SyncWrite::Insert { value, .. } | SyncWrite::Update { value, .. } = &write {
            value.to_json()?;
        }
        let mut state = self.state.borrow_mut();
        let batch = state.batch.as_mut().ok_or_else(|| Error::SyncNotInTransaction {
            collection: self.id.clone(),
        })?;
        batch.writes.push(write);
        Ok(())
    }

    pub(crate) fn rollback_sync(&self) -> Result<()> {
        let batch = self.state.borrow_mut().batch.take();
        match batch {
            Some(batch) => {
                tracing::debug!(collection = %self.id, writes = batch.writes.len(), "sync batch discarded");
                Ok(())
            }
            None => Err(Error::SyncNotInTransaction {
                collection: self.id.clone(),
            }),
        }
    }

    pub(crate) fn truncate_sync(&self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let batch = state.batch.as_mut().ok_or_else(|| Error::SyncNotInTransaction {
            collection: self.id.clone(),
        })?;
        batch.writes.clear();
        batch.truncate = true;
        Ok(())
    }

    pub(crate) fn commit_sync(&self) -> Result<()> {
        let batch = self
            .state
            .borrow_mut()
            .batch
            .take()
            .ok_or_else(|| Error::SyncNotInTransaction {
                collection: self.id.clone(),
            })?;

        let mut keys: BTreeSet<Key> = batch
            .writes
            .iter()
            .filter_map(|w| match w {
                SyncWrite::Insert { key, .. } | SyncWrite::Update { key, .. } => key.clone(),
                SyncWrite::Delete { key } => Some(key.clone()),
            })
            .collect();
        if batch.truncate {
            keys.extend(self.state.borrow().synced.keys().cloned());
        }

        let mode = self
            .config
            .sync
            .as_ref()
            .map(|s| s.row_update_mode)
            .unwrap_or_default();
        let count = batch.writes.len();
        let truncate = batch.truncate;
        let changes = self.change_visible(keys, move |state| {
            if truncate {
                state.synced.clear();
                state.generation += 1;
                state.loaded.clear();
                state.in_flight.clear();
            }
            for write in batch.writes {
                apply_sync_write(&mut state.synced, write, mode);
            }
        });
        tracing::debug!(collection = %self.id, writes = count, truncate, changed = changes.len(), "sync commit");

        if truncate {
            self.emit(CollectionEvent::Truncated(changes));
        } else {
            self.emit_changes(changes);
        }
        Ok(())
    }

    pub(crate) fn mark_ready(&self) -> Result<()> {
        self.set_status(CollectionStatus::Ready)
    }

    // --- subset loading ---

    pub(crate) fn load_subset(&self, options: &LoadSubsetOptions) -> Result<Option<SubsetLoad>> {
        let Some(load) = self.config.sync.as_ref().and_then(|s| s.load_subset.clone()) else {
            return Ok(None);
        };
        let generation = {
            let state = self.state.borrow();
            if state.loaded.iter().any(|l| is_predicate_subset(options, l)) {
                tracing::trace!(collection = %self.id, "subset already loaded");
                return Ok(None);
            }
            if let Some(in_flight) = state.in_flight.iter().find(|l| is_predicate_subset(options, &l.options)) {
                tracing::trace!(collection = %self.id, load = in_flight.load.id, "subset already loading");
                return Ok(Some(in_flight.load.clone()));
            }
            state.generation
        };

        tracing::debug!(collection = %self.id, limit = ?options.limit, "loading subset");
        match load(options) {
            LoadSubsetResult::Satisfied => {
                self.state.borrow_mut().loaded.push(options.clone());
                Ok(None)
            }
            LoadSubsetResult::Pending(future) => {
                let id = {
                    let mut state = self.state.borrow_mut();
                    let id = state.next_load_id;
                    state.next_load_id += 1;
                    id
                };
                let this = self.this.clone();
                let finished = options.clone();
                let future = async move {
                    let result = future.await;
                    if let Some(inner) = this.upgrade() {
                        inner.finish_load(id, generation, finished, &result);
                    }
                    result
                }
                .boxed_local()
                .shared();
                let load = SubsetLoad { id, future };
                self.state.borrow_mut().in_flight.push(InFlightLoad {
                    options: options.clone(),
                    load: load.clone(),
                });
                Ok(Some(load))
            }
        }
    }

    fn finish_load(&self, id: u64, generation: u64, options: LoadSubsetOptions, result: &Result<()>) {
        let stale = {
            let mut state = self.state.borrow_mut();
            state.in_flight.retain(|l| l.load.id != id);
            let stale = state.generation != generation;
            if !stale && result.is_ok() {
                state.loaded.push(options);
            }
            stale
        };
        if stale {
            tracing::warn!(collection = %self.id, load = id, "dropping subset load from a previous generation");
        } else if let Err(error) = result {
            tracing::warn!(collection = %self.id, load = id, %error, "subset load failed");
        }
        self.emit(CollectionEvent::SubsetLoaded(id));
    }

    // --- subscribers and garbage collection ---

    pub(crate) fn add_subscriber(&self) -> Result<()> {
        let count = {
            let mut state = self.state.borrow_mut();
            state.subscribers += 1;
            state.idle_since = None;
            state.subscribers
        };
        let listeners = self.subscriber_listeners.borrow().snapshot();
        notify(&listeners, &count);
        self.start_sync()
    }

    pub(crate) fn remove_subscriber(&self) {
        let now = self.db.upgrade().map(|db| db.now());
        let count = {
            let mut state = self.state.borrow_mut();
            state.subscribers = state.subscribers.saturating_sub(1);
            if state.subscribers == 0 {
                state.idle_since = now;
            }
            state.subscribers
        };
        let listeners = self.subscriber_listeners.borrow().snapshot();
        notify(&listeners, &count);
    }

    /// Cleans up the collection when it has been idle for its gc time.
    pub(crate) fn collect_if_idle(&self, now: Instant) -> Result<bool> {
        let Some(gc_time) = self.config.gc_time else {
            return Ok(false);
        };
        let expired = {
            let state = self.state.borrow();
            state.subscribers == 0
                && state.status != CollectionStatus::CleanedUp
                && state
                    .idle_since
                    .is_some_and(|since| now.saturating_duration_since(since) >= gc_time)
        };
        if expired {
            self.cleanup()?;
        }
        Ok(expired)
    }

    pub(crate) fn cleanup(&self) -> Result<()> {
        self.set_status(CollectionStatus::CleanedUp)?;
        let cleanup = self.state.borrow_mut().cleanup.take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
        let mut state = self.state.borrow_mut();
        state.synced.clear();
        state.batch = None;
        state.generation += 1;
        state.loaded.clear();
        state.in_flight.clear();
        state.version += 1;
        state.rebuild_indexes(&self.id);
        tracing::debug!(collection = %self.id, "collection cleaned up");
        Ok(())
    }

    // --- reads used by subscriptions ---

    /// Rows matching `filter`, answered from indexes where possible.
    pub(crate) fn matching_entries(&self, filter: Option<&Expr>) -> Result<Vec<(Key, Value)>> {
        let predicate = filter.map(compile_predicate);
        let state = self.state.borrow();
        let candidates = match filter.and_then(|f| strand_index::optimize_where(f, &state.indexes)) {
            Some(keys) => keys,
            None => state.visible_keys(),
        };
        let mut out = Vec::new();
        for key in candidates {
            let Some(row) = state.visible(&key) else {
                continue;
            };
            if let Some(predicate) = &predicate {
                if !predicate(row)? {
                    continue;
                }
            }
            out.push((key, row.clone()));
        }
        Ok(out)
    }

    /// Up to `n` rows after `from` in the order of `clause`, read from an
    /// index ordered the same way. Rows tied with the last one on the
    /// ordered value are included. `None` when no index matches.
    pub(crate) fn take_ordered(
        &self,
        clause: &OrderByClause,
        n: usize,
        from: Option<&Value>,
        predicate: Option<&Predicate>,
    ) -> Option<Vec<(Key, Value)>> {
        let Expr::Ref(field) = &clause.expr else {
            return None;
        };
        if clause.options.string_sort != StringSort::Lexical {
            return None;
        }
        let state = self.state.borrow();
        let (index, reversed) = state
            .indexes
            .iter()
            .filter(|h| h.matches_field(&field.path))
            .find_map(|h| {
                let index = h.ready().ok()?;
                let options = index.meta().options;
                if options == clause.options {
                    Some((index, false))
                } else if is_reversed(options, clause.options) {
                    Some((index, true))
                } else {
                    None
                }
            })?;

        let accept = |key: &Key| {
            state.visible(key).is_some_and(|row| match predicate {
                Some(predicate) => predicate(row).unwrap_or(false),
                None => true,
            })
        };
        let mut keys = if reversed {
            index.take_reversed(n, from, &accept)
        } else {
            index.take(n, from, &accept)
        };
        tracing::trace!(collection = %self.id, index = %index.meta().name, taken = keys.len(), "ordered take from index");

        if keys.len() == n {
            let last = keys
                .last()
                .and_then(|k| state.visible(k))
                .and_then(|row| row.get_path(&field.path))
                .cloned();
            if let Some(last) = last.filter(|v| !v.is_null()) {
                let taken: BTreeSet<Key> = keys.iter().cloned().collect();
                let ties = index.lookup(IndexOperation::Eq, &last);
                keys.extend(ties.into_iter().filter(|k| !taken.contains(k) && accept(k)));
            }
        }

        Some(
            keys.into_iter()
                .filter_map(|k| {
                    let row = state.visible(&k).cloned()?;
                    Some((k, row))
                })
                .collect(),
        )
    }

    fn create_index(&self, expression: Expr, options: IndexOptions) -> Result<u64> {
        let mut state = self.state.borrow_mut();
        let id = state.next_index_id;
        state.next_index_id += 1;
        let name = options
            .name
            .unwrap_or_else(|| format!("{}:{}", self.id, expression));
        let meta = IndexMeta::new(id, name, expression).with_options(options.compare);
        let mut index = BTreeIndex::new(meta);
        let entries = state.visible_entries();
        index.build(&mut entries.iter().map(|(k, v)| (k, v)))?;
        tracing::debug!(collection = %self.id, index = %index.meta().name, rows = entries.len(), "index created");
        state.indexes.push(IndexHandle::ready_index(Box::new(index)));
        Ok(id)
    }

    /// Creates ordered indexes for the simple fields `filter` and the first
    /// column of `order_by` reference.
    pub(crate) fn ensure_indexes(&self, filter: Option<&Expr>, order_by: &[OrderByClause]) {
        if self.config.auto_index != AutoIndex::Eager {
            return;
        }
        let mut wanted: Vec<(Vec<String>, Option<CompareOptions>)> = Vec::new();
        if let Some(filter) = filter {
            indexable_fields(filter, &mut wanted);
        }
        if let Some(first) = order_by.first() {
            if let Expr::Ref(field) = &first.expr {
                if first.options.string_sort == StringSort::Lexical {
                    wanted.push((field.path.clone(), Some(first.options)));
                }
            }
        }
        for (path, options) in wanted {
            let exists = self.state.borrow().indexes.iter().any(|h| {
                h.matches_field(&path)
                    && options.map_or(true, |o| {
                        let existing = h.meta().options;
                        existing == o || is_reversed(existing, o)
                    })
            });
            if exists {
                continue;
            }
            let options = IndexOptions::default().with_compare(options.unwrap_or_default());
            if let Err(error) = self.create_index(Expr::Ref(PropRef::new(path)), options) {
                tracing::warn!(collection = %self.id, %error, "auto index failed");
            }
        }
    }
}

fn apply_sync_write(synced: &mut BTreeMap<Key, Value>, write: SyncWrite, mode: RowUpdateMode) {
    match write {
        SyncWrite::Insert { key: Some(key), value } => {
            synced.insert(key, value);
        }
        SyncWrite::Update { key: Some(key), value } => match (mode, synced.get_mut(&key)) {
            (RowUpdateMode::Partial, Some(existing)) => match (existing.as_object_mut(), value) {
                (Some(fields), Value::Object(update)) => fields.extend(update),
                (_, value) => *existing = value,
            },
            _ => {
                synced.insert(key, value);
            }
        },
        SyncWrite::Delete { key } => {
            synced.remove(&key);
        }
        SyncWrite::Insert { key: None, .. } | SyncWrite::Update { key: None, .. } => {}
    }
}

fn is_reversed(index: CompareOptions, wanted: CompareOptions) -> bool {
    index.string_sort == wanted.string_sort
        && index.direction != wanted.direction
        && index.nulls != wanted.nulls
}

fn indexable_fields(expr: &Expr, out: &mut Vec<(Vec<String>, Option<CompareOptions>)>) {
    let Some((func, args)) = expr.as_func() else {
        return;
    };
    match func {
        Func::And | Func::Or => {
            for arg in args {
                indexable_fields(arg, out);
            }
        }
        Func::Eq | Func::Gt | Func::Gte | Func::Lt | Func::Lte | Func::In => {
            let field = match args {
                [Expr::Ref(r), Expr::Val(_)] => r,
                [Expr::Val(_), Expr::Ref(r)] if func != Func::In => r,
                _ => return,
            };
            if !out.iter().any(|(p, _)| *p == field.path) {
                out.push((field.path.clone(), None));
            }
        }
        _ => {}
    }
}

/// A keyed set of rows.
///
/// Cloning is cheap; clones refer to the same collection.
#[derive(Clone)]
pub struct Collection {
    pub(crate) inner: Rc<CollectionInner>,
}

impl Collection {
    pub(crate) fn new(config: CollectionConfig, db: Weak<DatabaseInner>, now: Instant) -> Self {
        let inner = Rc::new_cyclic(|this| CollectionInner {
            id: config.id.clone(),
            config,
            this: this.clone(),
            db,
            state: RefCell::new(CollectionState::new(now)),
            events: RefCell::new(Listeners::new()),
            status_listeners: RefCell::new(Listeners::new()),
            subscriber_listeners: RefCell::new(Listeners::new()),
        });
        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.inner.config
    }

    pub fn status(&self) -> CollectionStatus {
        self.inner.status()
    }

    pub fn is_ready(&self) -> bool {
        self.status() == CollectionStatus::Ready
    }

    /// Incremented on every visible change.
    pub fn version(&self) -> u64 {
        self.inner.state.borrow().version
    }

    pub fn get(&self, key: &Key) -> Option<Value> {
        self.inner.state.borrow().visible(key).cloned()
    }

    pub fn has(&self, key: &Key) -> bool {
        self.inner.state.borrow().visible(key).is_some()
    }

    pub fn size(&self) -> usize {
        self.inner.state.borrow().visible_keys().len()
    }

    pub fn keys(&self) -> Vec<Key> {
        self.inner.state.borrow().visible_keys().into_iter().collect()
    }

    pub fn entries(&self) -> Vec<(Key, Value)> {
        self.inner.state.borrow().visible_entries()
    }

    /// Visible rows, ordered by the configured comparator or else by key.
    pub fn to_vec(&self) -> Vec<Value> {
        let mut rows: Vec<Value> = self.entries().into_iter().map(|(_, v)| v).collect();
        if let Some(compare) = &self.inner.config.compare {
            rows.sort_by(|a, b| compare(a, b));
        }
        rows
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.state.borrow().subscribers
    }

    /// Starts the sync source if it is not running.
    pub fn start_sync(&self) -> Result<()> {
        self.inner.start_sync()
    }

    /// Stops the sync source and releases the synced rows.
    pub fn cleanup(&self) -> Result<()> {
        self.inner.cleanup()
    }

    /// Moves the collection to the error state.
    pub fn mark_error(&self) -> Result<()> {
        self.inner.set_status(CollectionStatus::Error)
    }

    pub fn on_status_change<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&StatusChange) + 'static,
    {
        self.inner.status_listeners.borrow_mut().subscribe(callback)
    }

    pub fn off_status_change(&self, id: ListenerId) -> bool {
        self.inner.status_listeners.borrow_mut().unsubscribe(id)
    }

    pub fn on_subscribers_change<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&usize) + 'static,
    {
        self.inner.subscriber_listeners.borrow_mut().subscribe(callback)
    }

    pub fn off_subscribers_change(&self, id: ListenerId) -> bool {
        self.inner.subscriber_listeners.borrow_mut().unsubscribe(id)
    }

    // --- writes ---

    fn ensure_writable(&self) -> Result<()> {
        if self.status() == CollectionStatus::Error {
            return Err(Error::CollectionInError {
                collection: self.inner.id.clone(),
            });
        }
        Ok(())
    }

    pub fn insert(&self, row: Value) -> Result<Transaction> {
        self.insert_many(vec![row])
    }

    /// Inserts rows optimistically.
    ///
    /// Inside `Transaction::mutate` the rows join the ambient transaction.
    /// Otherwise an auto-committing transaction is created around the
    /// collection's `on_insert` handler.
    pub fn insert_many(&self, rows: Vec<Value>) -> Result<Transaction> {
        self.ensure_writable()?;
        let db = self.inner.database()?;
        let mut seen = BTreeSet::new();
        let mut mutations = Vec::with_capacity(rows.len());
        for row in rows {
            let key = self.inner.key_of(&row)?;
            row.to_json()?;
            if self.has(&key) || !seen.insert(key.clone()) {
                return Err(Error::duplicate_key(self.inner.id.as_str(), key));
            }
            mutations.push(PendingMutation::insert(db.next_id(), self.id(), key, row));
        }
        self.write(&db, MutationKind::Insert, mutations)
    }

    /// Updates a row through a draft.
    ///
    /// The draft starts as a copy of the visible row; the recorded changes
    /// are the structural difference after `f` returns.
    pub fn update<F>(&self, key: impl Into<Key>, f: F) -> Result<Transaction>
    where
        F: FnOnce(&mut Value),
    {
        let mut f = Some(f);
        self.update_many([key.into()], move |draft| {
            if let Some(f) = f.take() {
                f(draft)
            }
        })
    }

    pub fn update_many<I, F>(&self, keys: I, mut f: F) -> Result<Transaction>
    where
        I: IntoIterator<Item = Key>,
        F: FnMut(&mut Value),
    {
        self.ensure_writable()?;
        let db = self.inner.database()?;
        let mut mutations = Vec::new();
        for key in keys {
            let original = self
                .get(&key)
                .ok_or_else(|| Error::key_not_found(self.inner.id.as_str(), key.clone()))?;
            let mut draft = original.clone();
            f(&mut draft);
            if self.inner.key_of(&draft)? != key {
                return Err(Error::key_changed(self.inner.id.as_str(), key));
            }
            draft.to_json()?;
            let mutation = PendingMutation::update(db.next_id(), self.id(), key, original, draft);
            if mutation.has_changes() {
                mutations.push(mutation);
            }
        }
        self.write(&db, MutationKind::Update, mutations)
    }

    pub fn delete(&self, key: impl Into<Key>) -> Result<Transaction> {
        self.delete_many([key.into()])
    }

    pub fn delete_many<I>(&self, keys: I) -> Result<Transaction>
    where
        I: IntoIterator<Item = Key>,
    {
        self.ensure_writable()?;
        let db = self.inner.database()?;
        let mut mutations = Vec::new();
        for key in keys {
            let original = self
                .get(&key)
                .ok_or_else(|| Error::key_not_found(self.inner.id.as_str(), key.clone()))?;
            mutations.push(PendingMutation::delete(db.next_id(), self.id(), key, original));
        }
        self.write(&db, MutationKind::Delete, mutations)
    }

    fn write(&self, db: &Database, kind: MutationKind, mutations: Vec<PendingMutation>) -> Result<Transaction> {
        if let Some(transaction) = db.current_transaction() {
            transaction.apply_mutations(mutations)?;
            return Ok(transaction);
        }

        let handler = match kind {
            MutationKind::Insert => self.inner.config.on_insert.clone(),
            MutationKind::Update => self.inner.config.on_update.clone(),
            MutationKind::Delete => self.inner.config.on_delete.clone(),
        };
        if handler.is_none() && self.inner.config.sync.is_some() {
            return Err(Error::MissingHandler {
                collection: self.inner.id.clone(),
                operation: kind.as_str().into(),
            });
        }

        let mut config = TransactionConfig::default().with_auto_commit(true);
        config.mutation_fn = handler;
        let transaction = db.transaction(config);
        let target = transaction.clone();
        transaction.mutate(move || target.apply_mutations(mutations))?;
        Ok(transaction)
    }

    // --- indexes ---

    /// Builds an ordered index over `expression` from the visible rows.
    pub fn create_index(&self, expression: Expr, options: IndexOptions) -> Result<u64> {
        self.inner.create_index(expression, options)
    }

    /// Registers an index built elsewhere. It answers lookups once
    /// `resolve_indexes` has installed it.
    pub fn create_lazy_index(&self, expression: Expr, options: IndexOptions, resolver: IndexResolver) -> u64 {
        let mut state = self.inner.state.borrow_mut();
        let id = state.next_index_id;
        state.next_index_id += 1;
        let name = options
            .name
            .unwrap_or_else(|| format!("{}:{}", self.inner.id, expression));
        let meta = IndexMeta::new(id, name, expression).with_options(options.compare);
        state.indexes.push(IndexHandle::pending(meta, resolver));
        id
    }

    /// Awaits every pending index, then brings it up to date with the
    /// visible rows.
    pub async fn resolve_indexes(&self) -> Result<()> {
        let resolvers: Vec<(u64, IndexResolver)> = self
            .inner
            .state
            .borrow_mut()
            .indexes
            .iter_mut()
            .filter_map(|h| {
                let id = h.meta().id;
                h.take_resolver().map(|r| (id, r))
            })
            .collect();
        for (id, resolver) in resolvers {
            let mut index = resolver.await?;
            let mut state = self.inner.state.borrow_mut();
            let entries = state.visible_entries();
            index.build(&mut entries.iter().map(|(k, v)| (k, v)))?;
            if let Some(handle) = state.indexes.iter_mut().find(|h| h.meta().id == id) {
                handle.install(index);
            }
        }
        Ok(())
    }

    pub fn indexes(&self) -> Vec<IndexMeta> {
        self.inner
            .state
            .borrow()
            .indexes
            .iter()
            .map(|h| h.meta().clone())
            .collect()
    }

    /// Keys of rows matching `filter` (a single-row expression).
    pub fn find(&self, filter: &Expr) -> Result<Vec<Key>> {
        Ok(self
            .inner
            .matching_entries(Some(filter))?
            .into_iter()
            .map(|(k, _)| k)
            .collect())
    }

    // --- on-demand loading ---

    /// Asks the sync source for the rows described by `options`.
    ///
    /// Requests covered by an earlier or in-flight request are not sent
    /// again. Returns the in-flight load to await, if any.
    pub fn load_subset(&self, options: &LoadSubsetOptions) -> Result<Option<SubsetLoad>> {
        self.inner.load_subset(options)
    }

    pub fn pending_loads(&self) -> Vec<SubsetLoad> {
        self.inner
            .state
            .borrow()
            .in_flight
            .iter()
            .map(|l| l.load.clone())
            .collect()
    }

    pub fn has_pending_loads(&self) -> bool {
        !self.inner.state.borrow().in_flight.is_empty()
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .field("size", &self.size())
            .finish()
    }
}
