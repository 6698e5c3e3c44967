//! The `dtable` capability interface.
//!
//! Every table kind (`sorted_run`, `array`, `cache`, `overlay`, `managed`,
//! …) implements the same contract as a trait rather than a class
//! hierarchy: [`DTable`] for point operations, [`DTableIter`] for
//! bidirectional iteration. `overlay`, `cache`, and `managed` (in sibling
//! modules) are all implementations of [`DTable`] composing others.
//!
//! The overlay borrows its sub-dtables (`&dyn DTable`); the managed dtable
//! owns its runs and rebuilds the overlay whenever the run list changes,
//! which avoids any cyclic-ownership concerns entirely.

pub mod array;
pub mod cache;
mod encoding_impls;
pub mod overlay;
pub mod sorted_run;

use std::cmp::Ordering;
use thiserror::Error;

use crate::key::{BlobComparator, Key, KeyType};

/// The error taxonomy shared by every dtable implementation.
#[derive(Debug, Error)]
pub enum DTableError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

/// The three states a stored slot may be in.
///
/// `HOLE` is represented by the *absence* of an `Entry` — `DTable::lookup`
/// returns `Ok(None)` for a hole, `Ok(Some(Entry::Tombstone))` for an
/// explicit deletion, and `Ok(Some(Entry::Valid(bytes)))` for a live value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Valid(Vec<u8>),
    Tombstone,
}

impl Entry {
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Entry::Tombstone)
    }

    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Entry::Valid(v) => Some(v),
            Entry::Tombstone => None,
        }
    }
}

/// A predicate used by [`DTableIter::seek_pred`]. The table must already be
/// ordered consistently with the predicate's monotone `Ordering`.
pub type SeekPredicate<'a> = dyn Fn(&Key) -> Ordering + 'a;

/// Bidirectional iteration over a dtable's entries, in ascending key order.
///
/// All positioning methods return `Ok(true)` iff the iterator lands on a
/// valid entry (i.e. `valid()` becomes true); `Ok(false)` leaves the
/// iterator invalid (equivalent to one-past-the-end or one-before-the-start).
/// Holes are never surfaced — positioning methods skip over them.
pub trait DTableIter {
    fn valid(&self) -> bool;

    fn first(&mut self) -> Result<bool, DTableError>;
    fn last(&mut self) -> Result<bool, DTableError>;
    fn next(&mut self) -> Result<bool, DTableError>;
    fn prev(&mut self) -> Result<bool, DTableError>;

    /// Lower-bound seek: positions at the first entry with key ≥ `key`.
    /// Returns `Ok(true)` if that entry's key is exactly `key`.
    fn seek(&mut self, key: &Key) -> Result<bool, DTableError>;

    /// Lower-bound seek under an arbitrary monotone ordering.
    fn seek_pred(&mut self, pred: &SeekPredicate<'_>) -> Result<bool, DTableError>;

    /// The key at the current position, or `None` if not `valid()`.
    fn key(&self) -> Option<Key>;

    /// The entry at the current position. `Ok(None)` only if not `valid()`.
    fn entry(&self) -> Result<Option<Entry>, DTableError>;

    /// Positional index within the table, if the variant supports O(1)
    /// positional access (the dense-array variant). `None` otherwise.
    fn get_index(&self) -> Option<u64> {
        None
    }
}

/// The capability interface every table kind implements.
pub trait DTable {
    fn key_type(&self) -> KeyType;

    /// Point lookup. See [`Entry`] for the exists/tombstone/hole mapping.
    fn lookup(&self, key: &Key) -> Result<Option<Entry>, DTableError>;

    fn present(&self, key: &Key) -> Result<bool, DTableError> {
        Ok(matches!(self.lookup(key)?, Some(_)))
    }

    fn iter(&self) -> Box<dyn DTableIter + '_>;

    /// Number of stored keys (including tombstones, excluding holes).
    fn size(&self) -> u64;

    fn writable(&self) -> bool {
        false
    }

    /// Inserts (or overwrites) a value. `append` hints that the key is
    /// known to be monotonically increasing relative to prior inserts,
    /// allowing implementations to skip an ordering check.
    fn insert(&mut self, key: Key, value: Vec<u8>, append: bool) -> Result<(), DTableError> {
        let _ = (key, value, append);
        Err(DTableError::Unsupported("insert on read-only dtable".into()))
    }

    /// Equivalent to `insert(key, tombstone)`.
    fn remove(&mut self, key: Key) -> Result<(), DTableError> {
        let _ = key;
        Err(DTableError::Unsupported("remove on read-only dtable".into()))
    }

    /// Runs whatever background maintenance this table kind defines
    /// (digest/combine for a managed dtable; a no-op for immutable runs).
    fn maintain(&mut self) -> Result<(), DTableError> {
        Ok(())
    }

    /// Installs a named comparator for blob keys. Fails with
    /// `InvalidArgument` if the table already has entries under a
    /// different-named comparator.
    fn set_blob_cmp(&mut self, cmp: BlobComparator) -> Result<(), DTableError> {
        let _ = cmp;
        Err(DTableError::Unsupported("this dtable has no blob comparator".into()))
    }
}

/// Lets a boxed trait object stand in anywhere a generic `T: DTable` is
/// expected — e.g. [`cache::CacheDTable`] wrapping whatever concrete table
/// a [`crate::registry::Registry`] factory just opened.
impl DTable for Box<dyn DTable> {
    fn key_type(&self) -> KeyType {
        (**self).key_type()
    }

    fn lookup(&self, key: &Key) -> Result<Option<Entry>, DTableError> {
        (**self).lookup(key)
    }

    fn present(&self, key: &Key) -> Result<bool, DTableError> {
        (**self).present(key)
    }

    fn iter(&self) -> Box<dyn DTableIter + '_> {
        (**self).iter()
    }

    fn size(&self) -> u64 {
        (**self).size()
    }

    fn writable(&self) -> bool {
        (**self).writable()
    }

    fn insert(&mut self, key: Key, value: Vec<u8>, append: bool) -> Result<(), DTableError> {
        (**self).insert(key, value, append)
    }

    fn remove(&mut self, key: Key) -> Result<(), DTableError> {
        (**self).remove(key)
    }

    fn maintain(&mut self) -> Result<(), DTableError> {
        (**self).maintain()
    }

    fn set_blob_cmp(&mut self, cmp: BlobComparator) -> Result<(), DTableError> {
        (**self).set_blob_cmp(cmp)
    }
}

/// An index-based bidirectional cursor over an owned or borrowed slice of
/// `(Key, Entry)` pairs, already in ascending key order. Shared by every
/// dtable variant that materializes its contents into a flat `Vec` rather
/// than keeping an on-disk or composed cursor (the managed dtable's live
/// snapshot, a registry-assembled overlay, …).
pub(crate) struct SliceCursor<'a> {
    entries: &'a [(Key, Entry)],
    pos: Option<usize>,
}

impl<'a> SliceCursor<'a> {
    pub(crate) fn new(entries: &'a [(Key, Entry)]) -> Self {
        Self { entries, pos: None }
    }
}

impl<'a> DTableIter for SliceCursor<'a> {
    fn valid(&self) -> bool {
        self.pos.is_some_and(|i| i < self.entries.len())
    }

    fn first(&mut self) -> Result<bool, DTableError> {
        self.pos = if self.entries.is_empty() { None } else { Some(0) };
        Ok(self.valid())
    }

    fn last(&mut self) -> Result<bool, DTableError> {
        self.pos = self.entries.len().checked_sub(1);
        Ok(self.valid())
    }

    fn next(&mut self) -> Result<bool, DTableError> {
        self.pos = match self.pos {
            Some(i) if i + 1 < self.entries.len() => Some(i + 1),
            _ => None,
        };
        Ok(self.valid())
    }

    fn prev(&mut self) -> Result<bool, DTableError> {
        self.pos = match self.pos {
            Some(i) if i > 0 => Some(i - 1),
            _ => None,
        };
        Ok(self.valid())
    }

    fn seek(&mut self, key: &Key) -> Result<bool, DTableError> {
        let target = key.to_sort_bytes();
        match self.entries.binary_search_by(|(k, _)| k.to_sort_bytes().cmp(&target)) {
            Ok(idx) => {
                self.pos = Some(idx);
                Ok(true)
            }
            Err(idx) => {
                self.pos = if idx < self.entries.len() { Some(idx) } else { None };
                Ok(false)
            }
        }
    }

    fn seek_pred(&mut self, pred: &SeekPredicate<'_>) -> Result<bool, DTableError> {
        let idx = self.entries.partition_point(|(k, _)| pred(k) == Ordering::Less);
        let exact = idx < self.entries.len() && pred(&self.entries[idx].0) == Ordering::Equal;
        self.pos = if idx < self.entries.len() { Some(idx) } else { None };
        Ok(exact)
    }

    fn key(&self) -> Option<Key> {
        self.pos.map(|i| self.entries[i].0.clone())
    }

    fn entry(&self) -> Result<Option<Entry>, DTableError> {
        Ok(self.pos.map(|i| self.entries[i].1.clone()))
    }
}
