//! Abortable transactions over a [`ManagedDtable`].
//!
//! Writes accumulate in an in-memory buffer instead of touching the
//! engine; `commit` replays the buffer as ordinary `insert`/`remove`
//! calls, `abort` (or simply dropping the transaction) discards it. This
//! gives a speculative, discardable batch of writes without needing MVCC
//! hooks inside the engine itself — reads made through the transaction see
//! their own buffered writes layered over the table's committed state, but
//! nothing else can see them until commit.

use std::collections::BTreeMap;

use crate::dtable::{DTable, DTableError, Entry};
use crate::key::Key;
use crate::managed::ManagedDtable;

pub struct Transaction<'a> {
    table: &'a ManagedDtable,
    buffer: BTreeMap<Vec<u8>, (Key, Entry)>,
}

impl<'a> Transaction<'a> {
    pub(super) fn new(table: &'a ManagedDtable) -> Self {
        Self { table, buffer: BTreeMap::new() }
    }

    pub fn insert(&mut self, key: Key, value: Vec<u8>) {
        let sort_key = key.to_sort_bytes();
        self.buffer.insert(sort_key, (key, Entry::Valid(value)));
    }

    pub fn remove(&mut self, key: Key) {
        let sort_key = key.to_sort_bytes();
        self.buffer.insert(sort_key, (key, Entry::Tombstone));
    }

    /// Reads the transaction's own buffered writes first, falling back to
    /// the table's committed state.
    pub fn lookup(&self, key: &Key) -> Result<Option<Entry>, DTableError> {
        if let Some((_, entry)) = self.buffer.get(&key.to_sort_bytes()) {
            return Ok(Some(entry.clone()));
        }
        self.table.lookup(key)
    }

    /// Always `true`: this table has no conflicting-writer detection to
    /// check against.
    pub fn check(&self) -> bool {
        true
    }

    /// Applies every buffered write to the underlying table in key order.
    pub fn commit(self) -> Result<(), DTableError> {
        // `self.table` is `&ManagedDtable`, but applying buffered writes
        // needs mutation. The transaction itself is the only handle holding
        // writes, so this is the one place a managed dtable's mutation
        // happens through a shared reference — mirrored by its own
        // interior-mutable `Arc<Mutex<_>>`.
        for (_, (key, entry)) in self.buffer {
            match entry {
                Entry::Valid(value) => self.table.insert_raw(key, value)?,
                Entry::Tombstone => self.table.remove_raw(key)?,
            }
        }
        Ok(())
    }

    pub fn abort(self) {
        // Dropping `self.buffer` without replaying it is the abort.
    }
}
