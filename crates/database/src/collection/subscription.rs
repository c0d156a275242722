//! Per-consumer change subscriptions.
//!
//! A subscription tracks which rows its consumer has seen. Live changes
//! are rewritten against that view: a row entering the filter arrives as
//! an insert, a row leaving it as a delete, and a key is never inserted
//! twice without a delete in between.

use super::{Collection, CollectionEvent};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use strand_core::{compare_tuples, CompareOptions, Error, Key, Result, Value};
use strand_query::ast::{Expr, OrderByClause};
use strand_query::eval::{compile_predicate, sort_tuple, Predicate};
use strand_query::predicate::LoadSubsetOptions;
use strand_reactive::{ChangeKind, ChangeMessage, ListenerId};

/// Options for `Collection::subscribe_changes`.
#[derive(Clone, Debug, Default)]
pub struct SubscribeOptions {
    /// Row filter over a single row.
    pub where_: Option<Expr>,
    /// Deliver the current matching rows right away.
    pub include_initial_state: bool,
}

impl SubscribeOptions {
    pub fn filtered(mut self, filter: Expr) -> Self {
        self.where_ = Some(filter);
        self
    }

    pub fn with_initial_state(mut self) -> Self {
        self.include_initial_state = true;
        self
    }
}

/// A one-off request for the current rows.
#[derive(Clone, Debug, Default)]
pub struct SnapshotOptions {
    /// Narrows the subscription filter for this snapshot.
    pub where_: Option<Expr>,
    pub order_by: Vec<OrderByClause>,
    pub limit: Option<usize>,
}

/// A request for the next rows in an ordering.
#[derive(Clone, Debug)]
pub struct LimitedSnapshotOptions {
    pub order_by: Vec<OrderByClause>,
    pub limit: usize,
    /// Sort tuple to continue after. `None` starts from the first row.
    pub min_values: Option<Vec<Value>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Ready,
    /// Waiting on at least one subset load.
    LoadingSubset,
}

#[derive(Clone)]
enum SnapshotRequest {
    Full(SnapshotOptions),
    Limited(LimitedSnapshotOptions),
}

struct LimitedState {
    order_by: Vec<OrderByClause>,
    cursor: Option<Vec<Value>>,
    /// Every matching row has been sent.
    exhausted: bool,
}

impl LimitedState {
    fn options(&self) -> Vec<CompareOptions> {
        self.order_by.iter().map(|c| c.options).collect()
    }
}

struct SubscriptionState {
    sent: BTreeMap<Key, Value>,
    snapshot_sent: bool,
    requests: Vec<SnapshotRequest>,
    limited: Option<LimitedState>,
    pending_loads: BTreeSet<u64>,
    /// Collects output while a truncate is being refetched.
    buffer: Option<Vec<ChangeMessage>>,
    closed: bool,
}

struct SubscriptionInner {
    collection: Collection,
    filter: Option<Expr>,
    predicate: Option<Predicate>,
    callback: Box<dyn Fn(&[ChangeMessage])>,
    listener: Cell<Option<ListenerId>>,
    state: RefCell<SubscriptionState>,
}

impl SubscriptionInner {
    fn matches(&self, row: &Value) -> bool {
        match &self.predicate {
            Some(predicate) => predicate(row).unwrap_or_else(|error| {
                tracing::warn!(collection = %self.collection.id(), %error, "subscription filter failed");
                false
            }),
            None => true,
        }
    }

    fn deliver(&self, changes: Vec<ChangeMessage>) {
        if changes.is_empty() {
            return;
        }
        {
            let mut state = self.state.borrow_mut();
            if state.closed {
                return;
            }
            if let Some(buffer) = state.buffer.as_mut() {
                buffer.extend(changes);
                return;
            }
        }
        (self.callback)(&changes);
    }

    fn on_event(&self, event: &CollectionEvent) {
        match event {
            CollectionEvent::Changes(changes) => {
                let out = self.filter_changes(changes);
                self.deliver(out);
            }
            CollectionEvent::Truncated(changes) => self.on_truncate(changes),
            CollectionEvent::SubsetLoaded(id) => self.on_loaded(*id),
        }
    }

    /// Rewrites collection changes against what the consumer has seen.
    ///
    /// Before any snapshot the consumer is assumed to hold every matching
    /// row, so a change is judged by the row it replaces.
    fn filter_changes(&self, changes: &[ChangeMessage]) -> Vec<ChangeMessage> {
        let mut state = self.state.borrow_mut();
        let untracked = !state.snapshot_sent;
        let mut out = Vec::new();
        for change in changes {
            let key = &change.key;
            let sent = match state.sent.get(key) {
                Some(previous) => Some(previous.clone()),
                None if untracked => self.held_before(change),
                None => None,
            };
            let message = match (change.kind, sent) {
                (ChangeKind::Delete, Some(previous)) => {
                    state.sent.remove(key);
                    ChangeMessage::delete(key.clone(), previous)
                }
                (ChangeKind::Delete, None) => continue,
                (_, Some(previous)) => {
                    if self.matches(&change.value) {
                        state.sent.insert(key.clone(), change.value.clone());
                        ChangeMessage::update(key.clone(), previous, change.value.clone())
                    } else {
                        state.sent.remove(key);
                        ChangeMessage::delete(key.clone(), previous)
                    }
                }
                (_, None) => {
                    if !self.matches(&change.value) || !admits(&state, &change.value) {
                        continue;
                    }
                    state.sent.insert(key.clone(), change.value.clone());
                    ChangeMessage::insert(key.clone(), change.value.clone())
                }
            };
            out.push(message);
        }
        out
    }

    /// The row a consumer without a snapshot holds before `change`.
    fn held_before(&self, change: &ChangeMessage) -> Option<Value> {
        let previous = match change.kind {
            ChangeKind::Insert => return None,
            ChangeKind::Update => change.previous_value.as_ref()?,
            ChangeKind::Delete => &change.value,
        };
        self.matches(previous).then(|| previous.clone())
    }

    fn on_truncate(&self, changes: &[ChangeMessage]) {
        let requests = {
            let mut state = self.state.borrow_mut();
            if state.requests.is_empty() {
                None
            } else {
                let deletes = std::mem::take(&mut state.sent)
                    .into_iter()
                    .map(|(key, value)| ChangeMessage::delete(key, value))
                    .collect();
                state.snapshot_sent = false;
                state.limited = None;
                state.pending_loads.clear();
                state.buffer = Some(deletes);
                Some(std::mem::take(&mut state.requests))
            }
        };
        let Some(requests) = requests else {
            let out = self.filter_changes(changes);
            self.deliver(out);
            return;
        };

        tracing::debug!(collection = %self.collection.id(), requests = requests.len(), "refetching after truncate");
        for request in requests {
            let result = match request {
                SnapshotRequest::Full(options) => self.snapshot(options),
                SnapshotRequest::Limited(options) => self.limited_snapshot(options),
            };
            if let Err(error) = result {
                tracing::warn!(collection = %self.collection.id(), %error, "snapshot after truncate failed");
            }
        }
        if self.state.borrow().pending_loads.is_empty() {
            self.flush_buffer();
        }
    }

    fn on_loaded(&self, id: u64) {
        let flush = {
            let mut state = self.state.borrow_mut();
            if !state.pending_loads.remove(&id) {
                return;
            }
            state.pending_loads.is_empty() && state.buffer.is_some()
        };
        if flush {
            self.flush_buffer();
        }
    }

    fn flush_buffer(&self) {
        let buffered = self.state.borrow_mut().buffer.take();
        if let Some(buffered) = buffered {
            self.deliver(ChangeMessage::fold(buffered));
        }
    }

    fn combined_filter(&self, extra: Option<&Expr>) -> Option<Expr> {
        match (&self.filter, extra) {
            (Some(a), Some(b)) => Some(Expr::and(vec![a.clone(), b.clone()])),
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (None, None) => None,
        }
    }

    fn request_load(&self, options: &LoadSubsetOptions) -> Result<bool> {
        match self.collection.load_subset(options)? {
            Some(load) => {
                self.state.borrow_mut().pending_loads.insert(load.id());
                Ok(false)
            }
            None => Ok(true),
        }
    }

    /// Turns current rows into messages against the sent set.
    fn send_rows(&self, rows: Vec<(Key, Value)>) -> Vec<ChangeMessage> {
        let mut state = self.state.borrow_mut();
        let mut out = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            match state.sent.insert(key.clone(), value.clone()) {
                Some(previous) if previous == value => {}
                Some(previous) => out.push(ChangeMessage::update(key, previous, value)),
                None => out.push(ChangeMessage::insert(key, value)),
            }
        }
        out
    }

    fn snapshot(&self, options: SnapshotOptions) -> Result<bool> {
        let filter = self.combined_filter(options.where_.as_ref());
        self.collection.inner.ensure_indexes(filter.as_ref(), &options.order_by);
        let complete = self.request_load(&LoadSubsetOptions {
            filter: filter.clone(),
            order_by: options.order_by.clone(),
            limit: options.limit,
            offset: None,
        })?;

        let mut rows = self.collection.inner.matching_entries(filter.as_ref())?;
        if !options.order_by.is_empty() {
            sort_rows(&mut rows, &options.order_by)?;
        }
        if let Some(limit) = options.limit {
            rows.truncate(limit);
        }
        tracing::trace!(collection = %self.collection.id(), rows = rows.len(), "snapshot");

        let out = self.send_rows(rows);
        {
            let mut state = self.state.borrow_mut();
            state.snapshot_sent = true;
            state.requests.push(SnapshotRequest::Full(options));
        }
        self.deliver(out);
        Ok(complete)
    }

    fn limited_snapshot(&self, options: LimitedSnapshotOptions) -> Result<bool> {
        let Some(first) = options.order_by.first() else {
            return Err(Error::invalid_operation("limited snapshot requires an order by"));
        };
        self.collection.inner.ensure_indexes(self.filter.as_ref(), &options.order_by);

        let cursor_filter = match (&options.min_values, &first.expr) {
            (Some(min), Expr::Ref(_)) => min.first().filter(|v| !v.is_null()).map(|v| {
                let bound = Expr::val(v.clone());
                match first.options.direction {
                    strand_core::Direction::Asc => Expr::gte(first.expr.clone(), bound),
                    strand_core::Direction::Desc => Expr::lte(first.expr.clone(), bound),
                }
            }),
            _ => None,
        };
        let complete = self.request_load(&LoadSubsetOptions {
            filter: self.combined_filter(cursor_filter.as_ref()),
            order_by: options.order_by.clone(),
            limit: Some(options.limit),
            offset: None,
        })?;

        let indexed = if options.order_by.len() == 1 {
            let from = options.min_values.as_ref().and_then(|m| m.first());
            self.collection
                .inner
                .take_ordered(first, options.limit, from, self.predicate.as_ref())
        } else {
            None
        };
        let rows = match indexed {
            Some(rows) => rows,
            None => self.scan_after(&options)?,
        };

        let exprs: Vec<Expr> = options.order_by.iter().map(|c| c.expr.clone()).collect();
        let last = match rows.last() {
            Some((_, row)) => Some(sort_tuple(&exprs, row)?),
            None => None,
        };
        let exhausted = complete && rows.len() < options.limit;
        tracing::trace!(collection = %self.collection.id(), rows = rows.len(), exhausted, "limited snapshot");

        let out = self.send_rows(rows);
        {
            let mut state = self.state.borrow_mut();
            let limited = state.limited.get_or_insert_with(|| LimitedState {
                order_by: options.order_by.clone(),
                cursor: None,
                exhausted: false,
            });
            if last.is_some() {
                limited.cursor = last;
            }
            limited.exhausted = exhausted;
            state.snapshot_sent = true;
            state.requests.push(SnapshotRequest::Limited(options));
        }
        self.deliver(out);
        Ok(complete)
    }

    /// Full scan fallback for `limited_snapshot`: rows after the cursor in
    /// tuple order, plus rows tied with the last one.
    fn scan_after(&self, options: &LimitedSnapshotOptions) -> Result<Vec<(Key, Value)>> {
        let compare: Vec<CompareOptions> = options.order_by.iter().map(|c| c.options).collect();
        let exprs: Vec<Expr> = options.order_by.iter().map(|c| c.expr.clone()).collect();
        let mut rows = Vec::new();
        for (key, row) in self.collection.inner.matching_entries(self.filter.as_ref())? {
            let tuple = sort_tuple(&exprs, &row)?;
            if let Some(min) = &options.min_values {
                if compare_tuples(&compare, &tuple, min).is_le() {
                    continue;
                }
            }
            rows.push((tuple, key, row));
        }
        rows.sort_by(|a, b| compare_tuples(&compare, &a.0, &b.0).then_with(|| a.1.cmp(&b.1)));
        if rows.len() > options.limit {
            let tail = options.limit.checked_sub(1).map(|i| rows[i].0.clone());
            let keep = match tail {
                Some(tail) => rows
                    .iter()
                    .position(|r| compare_tuples(&compare, &r.0, &tail).is_gt())
                    .unwrap_or(rows.len()),
                None => 0,
            };
            rows.truncate(keep);
        }
        Ok(rows.into_iter().map(|(_, key, row)| (key, row)).collect())
    }

    fn close(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        if let Some(id) = self.listener.take() {
            self.collection.inner.unlisten(id);
        }
        self.collection.inner.remove_subscriber();
        tracing::debug!(collection = %self.collection.id(), "subscription closed");
    }
}

impl Drop for SubscriptionInner {
    fn drop(&mut self) {
        self.close();
    }
}

/// Whether a limited subscription takes a row it has not sent yet.
fn admits(state: &SubscriptionState, row: &Value) -> bool {
    let Some(limited) = &state.limited else {
        return true;
    };
    if limited.exhausted {
        return true;
    }
    let Some(cursor) = &limited.cursor else {
        return false;
    };
    let exprs: Vec<Expr> = limited.order_by.iter().map(|c| c.expr.clone()).collect();
    match sort_tuple(&exprs, row) {
        Ok(tuple) => compare_tuples(&limited.options(), &tuple, cursor).is_le(),
        Err(_) => false,
    }
}

fn sort_rows(rows: &mut Vec<(Key, Value)>, order_by: &[OrderByClause]) -> Result<()> {
    let compare: Vec<CompareOptions> = order_by.iter().map(|c| c.options).collect();
    let exprs: Vec<Expr> = order_by.iter().map(|c| c.expr.clone()).collect();
    let mut keyed = Vec::with_capacity(rows.len());
    for (key, row) in rows.drain(..) {
        let tuple = sort_tuple(&exprs, &row)?;
        keyed.push((tuple, key, row));
    }
    keyed.sort_by(|a, b| compare_tuples(&compare, &a.0, &b.0).then_with(|| a.1.cmp(&b.1)));
    rows.extend(keyed.into_iter().map(|(_, key, row)| (key, row)));
    Ok(())
}

/// A consumer's view of a collection's changes.
///
/// Dropping the last handle unsubscribes.
#[derive(Clone)]
pub struct CollectionSubscription {
    inner: Rc<SubscriptionInner>,
}

impl CollectionSubscription {
    pub fn collection(&self) -> &Collection {
        &self.inner.collection
    }

    pub fn status(&self) -> SubscriptionStatus {
        if self.inner.state.borrow().pending_loads.is_empty() {
            SubscriptionStatus::Ready
        } else {
            SubscriptionStatus::LoadingSubset
        }
    }

    /// Whether a snapshot has been delivered since the last truncate.
    pub fn snapshot_sent(&self) -> bool {
        self.inner.state.borrow().snapshot_sent
    }

    /// Whether a limited subscription has delivered every matching row.
    pub fn is_exhausted(&self) -> bool {
        self.inner
            .state
            .borrow()
            .limited
            .as_ref()
            .map_or(true, |l| l.exhausted)
    }

    /// Sort tuple of the last row delivered by a limited snapshot.
    pub fn cursor(&self) -> Option<Vec<Value>> {
        self.inner
            .state
            .borrow()
            .limited
            .as_ref()
            .and_then(|l| l.cursor.clone())
    }

    /// Keys currently delivered to the consumer.
    pub fn sent_keys(&self) -> Vec<Key> {
        self.inner.state.borrow().sent.keys().cloned().collect()
    }

    /// Delivers the current matching rows. Rows the consumer already has
    /// arrive as updates, unchanged ones not at all.
    ///
    /// Returns `false` while a subset load for the request is in flight.
    pub fn request_snapshot(&self, options: SnapshotOptions) -> Result<bool> {
        self.inner.snapshot(options)
    }

    /// Delivers up to `limit` rows after `min_values` in the given order.
    ///
    /// Rows tied with the last delivered row are included. Afterwards,
    /// live inserts are only forwarded when they sort at or before the
    /// cursor, unless every row has been delivered.
    pub fn request_limited_snapshot(&self, options: LimitedSnapshotOptions) -> Result<bool> {
        self.inner.limited_snapshot(options)
    }

    pub fn unsubscribe(&self) {
        self.inner.close();
    }
}

impl Collection {
    /// Subscribes `callback` to the changes of rows matching
    /// `options.where_`.
    ///
    /// The first subscriber starts the sync source.
    pub fn subscribe_changes<F>(&self, callback: F, options: SubscribeOptions) -> Result<CollectionSubscription>
    where
        F: Fn(&[ChangeMessage]) + 'static,
    {
        let inner = Rc::new(SubscriptionInner {
            collection: self.clone(),
            predicate: options.where_.as_ref().map(compile_predicate),
            filter: options.where_,
            callback: Box::new(callback),
            listener: Cell::new(None),
            state: RefCell::new(SubscriptionState {
                sent: BTreeMap::new(),
                snapshot_sent: false,
                requests: Vec::new(),
                limited: None,
                pending_loads: BTreeSet::new(),
                buffer: None,
                closed: false,
            }),
        });
        let weak = Rc::downgrade(&inner);
        let listener = self.inner.listen(move |event| {
            if let Some(subscription) = weak.upgrade() {
                subscription.on_event(event);
            }
        });
        inner.listener.set(Some(listener));
        let subscription = CollectionSubscription { inner };

        self.inner.add_subscriber()?;
        if options.include_initial_state {
            subscription.request_snapshot(SnapshotOptions::default())?;
        }
        Ok(subscription)
    }
}
