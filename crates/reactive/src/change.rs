//! Keyed change messages.
//!
//! A `ChangeMessage` is what consumers of a collection see: one message per
//! key per batch, with updates carrying the value they replaced.

use alloc::vec::Vec;
use hashbrown::HashMap;
use strand_core::{Key, Value};
use strand_incremental::{Delta, KeyedRow};

/// The kind of change applied to a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A change to one row of a collection.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeMessage {
    pub key: Key,
    pub kind: ChangeKind,
    /// The row after the change. For deletes, the removed row.
    pub value: Value,
    /// The row before an update.
    pub previous_value: Option<Value>,
}

impl ChangeMessage {
    pub fn insert(key: Key, value: Value) -> Self {
        Self {
            key,
            kind: ChangeKind::Insert,
            value,
            previous_value: None,
        }
    }

    pub fn update(key: Key, previous: Value, value: Value) -> Self {
        Self {
            key,
            kind: ChangeKind::Update,
            value,
            previous_value: Some(previous),
        }
    }

    pub fn delete(key: Key, value: Value) -> Self {
        Self {
            key,
            kind: ChangeKind::Delete,
            value,
            previous_value: None,
        }
    }

    #[inline]
    pub fn is_insert(&self) -> bool {
        self.kind == ChangeKind::Insert
    }

    #[inline]
    pub fn is_update(&self) -> bool {
        self.kind == ChangeKind::Update
    }

    #[inline]
    pub fn is_delete(&self) -> bool {
        self.kind == ChangeKind::Delete
    }

    /// Folds a batch of row deltas into one message per key.
    ///
    /// A delete and an insert of the same key become an update. Messages keep
    /// the order in which their keys first appear.
    pub fn from_deltas(deltas: &[Delta<KeyedRow>]) -> Vec<ChangeMessage> {
        let mut messages: Vec<Option<ChangeMessage>> = Vec::new();
        let mut slots: HashMap<Key, usize> = HashMap::new();

        for delta in deltas {
            if delta.is_noop() {
                continue;
            }
            let key = delta.data.key.clone();
            let value = delta.data.value.clone();
            let Some(&slot) = slots.get(&key) else {
                slots.insert(key.clone(), messages.len());
                messages.push(Some(if delta.is_insert() {
                    ChangeMessage::insert(key, value)
                } else {
                    ChangeMessage::delete(key, value)
                }));
                continue;
            };
            let merged = match (messages[slot].take(), delta.is_insert()) {
                (Some(prev), true) => match prev.kind {
                    ChangeKind::Delete => Some(ChangeMessage::update(key, prev.value, value)),
                    ChangeKind::Insert => Some(ChangeMessage::insert(key, value)),
                    ChangeKind::Update => Some(ChangeMessage {
                        value,
                        ..prev
                    }),
                },
                (Some(prev), false) => match prev.kind {
                    // Inserted and removed in one batch: nothing to report
                    ChangeKind::Insert => None,
                    ChangeKind::Update => prev
                        .previous_value
                        .map(|old| ChangeMessage::delete(key, old)),
                    ChangeKind::Delete => Some(prev),
                },
                (None, true) => Some(ChangeMessage::insert(key, value)),
                (None, false) => Some(ChangeMessage::delete(key, value)),
            };
            messages[slot] = merged;
        }

        messages
            .into_iter()
            .flatten()
            .filter(|m| !(m.is_update() && m.previous_value.as_ref() == Some(&m.value)))
            .collect()
    }

    /// Folds a sequence of messages into one message per key, using the same
    /// rules as `from_deltas`.
    pub fn fold(messages: Vec<ChangeMessage>) -> Vec<ChangeMessage> {
        Self::from_deltas(&Self::to_deltas(&messages))
    }

    /// Expands messages into row deltas. An update becomes a delete of the
    /// previous value followed by an insert of the new one.
    pub fn to_deltas(messages: &[ChangeMessage]) -> Vec<Delta<KeyedRow>> {
        let mut deltas = Vec::with_capacity(messages.len());
        for message in messages {
            let key = message.key.clone();
            match message.kind {
                ChangeKind::Insert => deltas.push(Delta::insert(KeyedRow::new(key, message.value.clone()))),
                ChangeKind::Delete => deltas.push(Delta::delete(KeyedRow::new(key, message.value.clone()))),
                ChangeKind::Update => {
                    let previous = message.previous_value.clone().unwrap_or(Value::Null);
                    deltas.push(Delta::delete(KeyedRow::new(key.clone(), previous)));
                    deltas.push(Delta::insert(KeyedRow::new(key, message.value.clone())));
                }
            }
        }
        deltas
    }
}
