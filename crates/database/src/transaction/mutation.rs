//! Pending mutations and how they merge.

use super::diff;
use std::collections::BTreeMap;
use std::fmt;
use strand_core::{Key, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Insert => "insert",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One optimistic write waiting for its transaction to commit.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingMutation {
    pub mutation_id: u64,
    pub collection: String,
    pub key: Key,
    pub kind: MutationKind,
    /// The visible row before the transaction first touched it.
    pub original: Option<Value>,
    /// The row as the transaction leaves it. For deletes, the removed row.
    pub modified: Value,
    /// Inserts: the whole row. Updates: the changed fields. Deletes: `Null`.
    pub changes: Value,
    pub metadata: Value,
}

impl PendingMutation {
    pub fn insert(mutation_id: u64, collection: &str, key: Key, row: Value) -> Self {
        Self {
            mutation_id,
            collection: collection.into(),
            key,
            kind: MutationKind::Insert,
            original: None,
            changes: row.clone(),
            modified: row,
            metadata: Value::Null,
        }
    }

    pub fn update(mutation_id: u64, collection: &str, key: Key, original: Value, modified: Value) -> Self {
        let changes = diff::diff(&original, &modified).unwrap_or_else(|| Value::Object(BTreeMap::new()));
        Self {
            mutation_id,
            collection: collection.into(),
            key,
            kind: MutationKind::Update,
            original: Some(original),
            modified,
            changes,
            metadata: Value::Null,
        }
    }

    pub fn delete(mutation_id: u64, collection: &str, key: Key, original: Value) -> Self {
        Self {
            mutation_id,
            collection: collection.into(),
            key,
            kind: MutationKind::Delete,
            original: Some(original.clone()),
            modified: original,
            changes: Value::Null,
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// False for an update that changed nothing.
    pub fn has_changes(&self) -> bool {
        self.kind != MutationKind::Update || !diff::is_empty(&self.changes)
    }

    /// Whether both mutations write the same row.
    pub fn same_row(&self, other: &PendingMutation) -> bool {
        self.collection == other.collection && self.key == other.key
    }

    /// The optimistic row this mutation leaves behind. `None` for deletes.
    pub fn visible_row(&self) -> Option<&Value> {
        match self.kind {
            MutationKind::Delete => None,
            MutationKind::Insert | MutationKind::Update => Some(&self.modified),
        }
    }
}

/// Combines two mutations of the same row, `existing` first.
///
/// Returns `None` when they cancel out.
pub fn merge(existing: PendingMutation, next: PendingMutation) -> Option<PendingMutation> {
    use MutationKind::*;
    let merged = match (existing.kind, next.kind) {
        (Insert, Update) => PendingMutation {
            changes: next.modified.clone(),
            modified: next.modified,
            mutation_id: next.mutation_id,
            ..existing
        },
        (Insert, Delete) => return None,
        (Update, Update) => PendingMutation {
            changes: diff::merge_changes(&existing.changes, &next.changes),
            modified: next.modified,
            mutation_id: next.mutation_id,
            ..existing
        },
        (Update, Delete) => PendingMutation {
            original: existing.original,
            ..next
        },
        (Delete, Insert) => {
            let original = existing.original.unwrap_or(Value::Null);
            let mut update = PendingMutation::update(next.mutation_id, &next.collection, next.key, original, next.modified);
            update.metadata = next.metadata;
            update
        }
        _ => PendingMutation {
            original: existing.original,
            ..next
        },
    };
    Some(merged)
}

/// Appends `next` to `mutations`, merging it with an earlier mutation of
/// the same row in place.
pub fn apply(mutations: &mut Vec<PendingMutation>, next: PendingMutation) {
    match mutations.iter().position(|m| m.same_row(&next)) {
        Some(pos) => {
            let existing = mutations.remove(pos);
            if let Some(merged) = merge(existing, next) {
                mutations.insert(pos, merged);
            }
        }
        None => mutations.push(next),
    }
}
