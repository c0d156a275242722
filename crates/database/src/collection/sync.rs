//! The boundary between a collection and its sync source.
//!
//! A sync source receives a `SyncHandle` when the collection starts
//! syncing. It writes rows in `begin` / `write` / `commit` batches and
//! calls `mark_ready` once the collection holds its initial data. Sources
//! of on-demand collections also answer `load_subset` requests.

use crate::collection::CollectionInner;
use futures::future::{LocalBoxFuture, Shared};
use std::future::Future;
use std::pin::Pin;
use std::rc::Weak;
use std::task::{Context, Poll};
use strand_core::{Error, Key, Result, Value};

/// One row write from the sync source.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncWrite {
    /// Adds a row. The key is taken from the row unless given.
    Insert { key: Option<Key>, value: Value },
    /// Changes a row. Applied according to the collection's row update mode.
    Update { key: Option<Key>, value: Value },
    Delete { key: Key },
}

impl SyncWrite {
    pub fn insert(value: Value) -> Self {
        SyncWrite::Insert { key: None, value }
    }

    pub fn update(value: Value) -> Self {
        SyncWrite::Update { key: None, value }
    }

    pub fn delete(key: impl Into<Key>) -> Self {
        SyncWrite::Delete { key: key.into() }
    }

    /// Sets an explicit key on an insert or update.
    pub fn keyed(self, key: impl Into<Key>) -> Self {
        let key = Some(key.into());
        match self {
            SyncWrite::Insert { value, .. } => SyncWrite::Insert { key, value },
            SyncWrite::Update { value, .. } => SyncWrite::Update { key, value },
            delete => delete,
        }
    }
}

/// Outcome of a `load_subset` request.
pub enum LoadSubsetResult {
    /// The rows are already in the collection.
    Satisfied,
    /// The rows arrive when the future completes. The source writes them
    /// through its `SyncHandle` before resolving.
    Pending(LocalBoxFuture<'static, Result<()>>),
}

/// An in-flight subset load.
///
/// Clones share the same underlying request; awaiting any of them drives
/// it.
#[derive(Clone)]
pub struct SubsetLoad {
    pub(crate) id: u64,
    pub(crate) future: Shared<LocalBoxFuture<'static, Result<()>>>,
}

impl SubsetLoad {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for SubsetLoad {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.future).poll(cx)
    }
}

/// Write access for a collection's sync source.
#[derive(Clone)]
pub struct SyncHandle {
    pub(crate) collection: Weak<CollectionInner>,
}

impl SyncHandle {
    fn target(&self) -> Result<std::rc::Rc<CollectionInner>> {
        self.collection
            .upgrade()
            .ok_or_else(|| Error::invalid_operation("collection was dropped"))
    }

    /// Opens a write batch.
    pub fn begin(&self) -> Result<()> {
        self.target()?.begin_sync()
    }

    /// Buffers a write in the open batch.
    pub fn write(&self, write: SyncWrite) -> Result<()> {
        self.target()?.write_sync(write)
    }

    /// Applies the open batch.
    pub fn commit(&self) -> Result<()> {
        self.target()?.commit_sync()
    }

    /// Discards the open batch without applying it.
    pub fn rollback(&self) -> Result<()> {
        self.target()?.rollback_sync()
    }

    /// Discards every synced row when the open batch commits.
    pub fn truncate(&self) -> Result<()> {
        self.target()?.truncate_sync()
    }

    /// Marks the initial data as delivered.
    pub fn mark_ready(&self) -> Result<()> {
        self.target()?.mark_ready()
    }

    /// Writes `writes` in one batch.
    pub fn write_batch(&self, writes: impl IntoIterator<Item = SyncWrite>) -> Result<()> {
        let target = self.target()?;
        target.begin_sync()?;
        for write in writes {
            target.write_sync(write)?;
        }
        target.commit_sync()
    }
}
