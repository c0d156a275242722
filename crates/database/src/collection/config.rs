//! Collection configuration.

use crate::collection::sync::{LoadSubsetResult, SyncHandle};
use crate::transaction::MutationFn;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use strand_core::{Key, Value};
use strand_query::predicate::LoadSubsetOptions;

/// Extracts the key of a row.
pub type GetKeyFn = Rc<dyn Fn(&Value) -> Option<Key>>;

/// Orders rows returned by `Collection::to_vec`.
pub type CompareFn = Rc<dyn Fn(&Value, &Value) -> Ordering>;

/// Stops a running sync.
pub type SyncCleanup = Box<dyn FnOnce()>;

/// Starts syncing a collection. Returns an optional cleanup.
pub type SyncFn = Rc<dyn Fn(SyncHandle) -> Option<SyncCleanup>>;

/// Asks the sync source for the rows of a subset.
pub type LoadSubsetFn = Rc<dyn Fn(&LoadSubsetOptions) -> LoadSubsetResult>;

/// When the sync source delivers rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// The source pushes the whole collection on start.
    #[default]
    Eager,
    /// The source delivers rows through `load_subset` as subscriptions ask
    /// for them.
    OnDemand,
}

/// How a synced update is applied to the stored row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RowUpdateMode {
    /// Top-level fields of the update are merged into the stored row.
    #[default]
    Partial,
    /// The update replaces the stored row.
    Full,
}

/// Automatic index creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AutoIndex {
    Off,
    /// An ordered index is created for every simple field a subscription
    /// filters or orders on.
    #[default]
    Eager,
}

/// Connection between a collection and its source of truth.
#[derive(Clone)]
pub struct SyncConfig {
    pub sync: SyncFn,
    pub load_subset: Option<LoadSubsetFn>,
    pub row_update_mode: RowUpdateMode,
}

impl SyncConfig {
    pub fn new<F>(sync: F) -> Self
    where
        F: Fn(SyncHandle) -> Option<SyncCleanup> + 'static,
    {
        Self {
            sync: Rc::new(sync),
            load_subset: None,
            row_update_mode: RowUpdateMode::default(),
        }
    }

    pub fn with_load_subset<F>(mut self, load_subset: F) -> Self
    where
        F: Fn(&LoadSubsetOptions) -> LoadSubsetResult + 'static,
    {
        self.load_subset = Some(Rc::new(load_subset));
        self
    }

    pub fn with_row_update_mode(mut self, mode: RowUpdateMode) -> Self {
        self.row_update_mode = mode;
        self
    }
}

/// Configuration of a collection.
#[derive(Clone)]
pub struct CollectionConfig {
    pub id: String,
    pub get_key: GetKeyFn,
    /// `None` makes a local-only collection: confirmed writes are kept
    /// in the collection itself.
    pub sync: Option<SyncConfig>,
    pub sync_mode: SyncMode,
    /// Start syncing on creation instead of on first subscriber.
    pub start_sync: bool,
    /// How long a collection without subscribers is kept before
    /// `collect_garbage` cleans it up. `None` keeps it forever.
    pub gc_time: Option<Duration>,
    pub auto_index: AutoIndex,
    pub compare: Option<CompareFn>,
    pub on_insert: Option<MutationFn>,
    pub on_update: Option<MutationFn>,
    pub on_delete: Option<MutationFn>,
}

impl CollectionConfig {
    pub const DEFAULT_GC_TIME: Duration = Duration::from_secs(5 * 60);

    pub fn new<F>(id: impl Into<String>, get_key: F) -> Self
    where
        F: Fn(&Value) -> Option<Key> + 'static,
    {
        Self {
            id: id.into(),
            get_key: Rc::new(get_key),
            sync: None,
            sync_mode: SyncMode::default(),
            start_sync: false,
            gc_time: Some(Self::DEFAULT_GC_TIME),
            auto_index: AutoIndex::default(),
            compare: None,
            on_insert: None,
            on_update: None,
            on_delete: None,
        }
    }

    /// Keys rows by the value of `field`.
    pub fn keyed_by(id: impl Into<String>, field: &str) -> Self {
        let field = field.to_string();
        Self::new(id, move |row| row.get(&field).and_then(Key::from_value))
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
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

    pub fn with_auto_index(mut self, auto_index: AutoIndex) -> Self {
        self.auto_index = auto_index;
        self
    }

    pub fn with_compare<F>(mut self, compare: F) -> Self
    where
        F: Fn(&Value, &Value) -> Ordering + 'static,
    {
        self.compare = Some(Rc::new(compare));
        self
    }

    pub fn on_insert(mut self, handler: MutationFn) -> Self {
        self.on_insert = Some(handler);
        self
    }

    pub fn on_update(mut self, handler: MutationFn) -> Self {
        self.on_update = Some(handler);
        self
    }

    pub fn on_delete(mut self, handler: MutationFn) -> Self {
        self.on_delete = Some(handler);
        self
    }
}

impl fmt::Debug for CollectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionConfig")
            .field("id", &self.id)
            .field("synced", &self.sync.is_some())
            .field("sync_mode", &self.sync_mode)
            .field("start_sync", &self.start_sync)
            .field("gc_time", &self.gc_time)
            .field("auto_index", &self.auto_index)
            .finish()
    }
}
