//! Lazily materialized indexes.
//!
//! An index registered before its data is available starts out as
//! `IndexHandle::Pending`: only its metadata can be inspected. Lookups are
//! reachable through `IndexHandle::Ready` alone, so resolution must happen
//! before an index can be queried.

use crate::traits::{Index, IndexMeta};
use alloc::boxed::Box;
use alloc::string::String;
use core::fmt;
use futures::future::LocalBoxFuture;
use strand_core::{Error, Result};

/// Future producing a built index.
pub type IndexResolver = LocalBoxFuture<'static, Result<Box<dyn Index>>>;

/// An index whose contents are still being produced.
pub struct PendingIndex {
    pub meta: IndexMeta,
    resolver: Option<IndexResolver>,
}

impl PendingIndex {
    pub fn new(meta: IndexMeta, resolver: IndexResolver) -> Self {
        Self {
            meta,
            resolver: Some(resolver),
        }
    }
}

/// A secondary index that is either pending or ready for lookups.
pub enum IndexHandle {
    Pending(PendingIndex),
    Ready(Box<dyn Index>),
}

impl IndexHandle {
    pub fn ready_index(index: Box<dyn Index>) -> Self {
        IndexHandle::Ready(index)
    }

    pub fn pending(meta: IndexMeta, resolver: IndexResolver) -> Self {
        IndexHandle::Pending(PendingIndex::new(meta, resolver))
    }

    pub fn meta(&self) -> &IndexMeta {
        match self {
            IndexHandle::Pending(p) => &p.meta,
            IndexHandle::Ready(index) => index.meta(),
        }
    }

    pub fn matches_field(&self, path: &[String]) -> bool {
        self.meta().matches_field(path)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, IndexHandle::Ready(_))
    }

    /// The index, or `IndexNotReady` while pending.
    pub fn ready(&self) -> Result<&dyn Index> {
        match self {
            IndexHandle::Ready(index) => Ok(index.as_ref()),
            IndexHandle::Pending(p) => Err(Error::index_not_ready(p.meta.name.clone())),
        }
    }

    pub fn ready_mut(&mut self) -> Result<&mut dyn Index> {
        match self {
            IndexHandle::Ready(index) => Ok(index.as_mut()),
            IndexHandle::Pending(p) => Err(Error::index_not_ready(p.meta.name.clone())),
        }
    }

    /// Takes the resolver out of a pending handle.
    ///
    /// Owners that keep the handle behind a `RefCell` take the resolver,
    /// await it without holding the borrow, then `install` the result.
    pub fn take_resolver(&mut self) -> Option<IndexResolver> {
        match self {
            IndexHandle::Pending(p) => p.resolver.take(),
            IndexHandle::Ready(_) => None,
        }
    }

    /// Replaces a pending handle with its built index.
    pub fn install(&mut self, index: Box<dyn Index>) {
        tracing::debug!(index = %index.meta().name, "index ready");
        *self = IndexHandle::Ready(index);
    }

    /// Drives a pending handle to ready.
    pub async fn resolve(&mut self) -> Result<()> {
        let Some(resolver) = self.take_resolver() else {
            return match self {
                IndexHandle::Ready(_) => Ok(()),
                IndexHandle::Pending(p) => Err(Error::index_not_ready(p.meta.name.clone())),
            };
        };
        let index = resolver.await?;
        self.install(index);
        Ok(())
    }
}

impl fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_ready() { "ready" } else { "pending" };
        f.debug_struct("IndexHandle")
            .field("name", &self.meta().name)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::BTreeIndex;
    use crate::traits::IndexOperation;
    use futures::executor::block_on;
    use futures::FutureExt;
    use strand_core::{Key, Value};
    use strand_query::ast::Expr;

    fn meta() -> IndexMeta {
        IndexMeta::new(7, "by_done", Expr::col("done"))
    }

    #[test]
    fn test_pending_exposes_meta_only() {
        let handle = IndexHandle::pending(meta(), futures::future::pending().boxed_local());
        assert!(!handle.is_ready());
        assert_eq!(handle.meta().name, "by_done");
        assert!(handle.matches_field(&[String::from("done")]));
        assert_eq!(handle.ready().err(), Some(Error::index_not_ready("by_done")));
    }

    #[test]
    fn test_resolve_installs_index() {
        let resolver = async {
            let mut index = BTreeIndex::new(meta());
            let row = Value::object([("done", Value::Boolean(true))]);
            index.add(&Key::Int(1), &row)?;
            Ok::<_, Error>(Box::new(index) as Box<dyn Index>)
        }
        .boxed_local();
        let mut handle = IndexHandle::pending(meta(), resolver);
        block_on(handle.resolve()).unwrap();
        assert!(handle.is_ready());
        let hits = handle
            .ready()
            .unwrap()
            .lookup(IndexOperation::Eq, &Value::Boolean(true));
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_failed_resolution_stays_pending() {
        let resolver = async { Err::<Box<dyn Index>, _>(Error::invalid_operation("source offline")) }.boxed_local();
        let mut handle = IndexHandle::pending(meta(), resolver);
        assert!(block_on(handle.resolve()).is_err());
        assert!(!handle.is_ready());
        // The resolver is consumed, so a second attempt reports not-ready
        assert_eq!(block_on(handle.resolve()), Err(Error::index_not_ready("by_done")));
    }
}
