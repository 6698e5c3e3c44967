//! The overlay dtable: a bidirectional k-way merge over an ordered stack of
//! sub-tables.
//!
//! Sub-tables are ordered youngest-first (index 0 shadows every later
//! index). On a shared key the youngest sub's [`Entry`] wins, tombstone
//! included — the overlay does not itself turn a tombstone into "absent";
//! that translation happens at whichever layer presents results to an
//! external caller (the managed dtable's `lookup`).

use std::cmp::Ordering;

use crate::dtable::{DTable, DTableError, DTableIter, Entry, SeekPredicate};
use crate::key::{Key, KeyType};

/// Composes `tables` (youngest first) into a single logical view.
pub struct OverlayDTable<'a> {
    tables: Vec<&'a dyn DTable>,
}

impl<'a> OverlayDTable<'a> {
    pub fn new(tables: Vec<&'a dyn DTable>) -> Result<Self, DTableError> {
        if tables.is_empty() {
            return Err(DTableError::InvalidArgument(
                "overlay dtable requires at least one sub-table".into(),
            ));
        }
        let key_type = tables[0].key_type();
        if tables.iter().any(|t| t.key_type() != key_type) {
            return Err(DTableError::InvalidArgument(
                "all sub-tables in an overlay must share a key type".into(),
            ));
        }
        Ok(Self { tables })
    }
}

impl<'a> DTable for OverlayDTable<'a> {
    fn key_type(&self) -> KeyType {
        self.tables[0].key_type()
    }

    fn lookup(&self, key: &Key) -> Result<Option<Entry>, DTableError> {
        for table in &self.tables {
            if let Some(entry) = table.lookup(key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    fn iter(&self) -> Box<dyn DTableIter + '_> {
        Box::new(OverlayIter {
            subs: self.tables.iter().map(|t| t.iter()).collect(),
            dir: None,
            current: None,
        })
    }

    fn size(&self) -> u64 {
        let mut it = self.iter();
        let mut count = 0u64;
        let mut valid = it.first().unwrap_or(false);
        while valid {
            count += 1;
            valid = it.next().unwrap_or(false);
        }
        count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

struct OverlayIter<'a> {
    subs: Vec<Box<dyn DTableIter + 'a>>,
    dir: Option<Direction>,
    current: Option<Key>,
}

impl<'a> OverlayIter<'a> {
    fn sync_min(&mut self) -> Result<(), DTableError> {
        let mut min: Option<Key> = None;
        for sub in &self.subs {
            if sub.valid() {
                if let Some(k) = sub.key() {
                    if min.as_ref().is_none_or(|m| k < *m) {
                        min = Some(k);
                    }
                }
            }
        }
        self.current = min;
        Ok(())
    }

    fn sync_max(&mut self) -> Result<(), DTableError> {
        let mut max: Option<Key> = None;
        for sub in &self.subs {
            if sub.valid() {
                if let Some(k) = sub.key() {
                    if max.as_ref().is_none_or(|m| k > *m) {
                        max = Some(k);
                    }
                }
            }
        }
        self.current = max;
        Ok(())
    }

    /// Youngest sub-table currently positioned on `self.current`.
    fn youngest_at_current(&self) -> Option<usize> {
        let current = self.current.as_ref()?;
        self.subs.iter().position(|sub| sub.valid() && sub.key().as_ref() == Some(current))
    }

    fn advance_matching(&mut self, forward: bool) -> Result<(), DTableError> {
        let Some(current) = self.current.clone() else { return Ok(()) };
        for sub in &mut self.subs {
            if sub.valid() && sub.key().as_ref() == Some(&current) {
                if forward {
                    sub.next()?;
                } else {
                    sub.prev()?;
                }
            }
        }
        Ok(())
    }

    /// Re-synchronizes every sub-iterator's position after the iteration
    /// direction reverses.
    fn reseed(&mut self, forward: bool) -> Result<(), DTableError> {
        let Some(current) = self.current.clone() else {
            for sub in &mut self.subs {
                if forward { sub.first()?; } else { sub.last()?; }
            }
            return Ok(());
        };
        for sub in &mut self.subs {
            let exact = sub.seek(&current)?;
            if forward {
                if exact {
                    sub.next()?;
                }
                // else: seek's lower bound already landed strictly past `current`.
            } else if sub.valid() {
                sub.prev()?;
            } else {
                sub.last()?;
            }
        }
        Ok(())
    }

    /// Advances past any run of distinct keys whose youngest entry is a
    /// tombstone, so callers never observe one directly.
    fn skip_tombstones(&mut self, forward: bool) -> Result<(), DTableError> {
        while self.current.is_some() {
            match self.youngest_at_current() {
                Some(idx) if self.subs[idx].entry()?.as_ref().is_some_and(Entry::is_tombstone) => {
                    self.advance_matching(forward)?;
                    if forward {
                        self.sync_min()?;
                    } else {
                        self.sync_max()?;
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }
}

impl<'a> DTableIter for OverlayIter<'a> {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn first(&mut self) -> Result<bool, DTableError> {
        for sub in &mut self.subs {
            sub.first()?;
        }
        self.dir = Some(Direction::Forward);
        self.sync_min()?;
        self.skip_tombstones(true)?;
        Ok(self.valid())
    }

    fn last(&mut self) -> Result<bool, DTableError> {
        for sub in &mut self.subs {
            sub.last()?;
        }
        self.dir = Some(Direction::Backward);
        self.sync_max()?;
        self.skip_tombstones(false)?;
        Ok(self.valid())
    }

    fn next(&mut self) -> Result<bool, DTableError> {
        match self.dir {
            Some(Direction::Forward) => self.advance_matching(true)?,
            _ => self.reseed(true)?,
        }
        self.dir = Some(Direction::Forward);
        self.sync_min()?;
        self.skip_tombstones(true)?;
        Ok(self.valid())
    }

    fn prev(&mut self) -> Result<bool, DTableError> {
        match self.dir {
            Some(Direction::Backward) => self.advance_matching(false)?,
            _ => self.reseed(false)?,
        }
        self.dir = Some(Direction::Backward);
        self.sync_max()?;
        self.skip_tombstones(false)?;
        Ok(self.valid())
    }

    fn seek(&mut self, key: &Key) -> Result<bool, DTableError> {
        for sub in &mut self.subs {
            sub.seek(key)?;
        }
        self.dir = Some(Direction::Forward);
        self.sync_min()?;
        let exact = self.current.as_ref() == Some(key);
        self.skip_tombstones(true)?;
        Ok(exact)
    }

    fn seek_pred(&mut self, pred: &SeekPredicate<'_>) -> Result<bool, DTableError> {
        for sub in &mut self.subs {
            sub.seek_pred(pred)?;
        }
        self.dir = Some(Direction::Forward);
        self.sync_min()?;
        let exact = self.current.as_ref().is_some_and(|k| pred(k) == Ordering::Equal);
        self.skip_tombstones(true)?;
        Ok(exact)
    }

    fn key(&self) -> Option<Key> {
        self.current.clone()
    }

    fn entry(&self) -> Result<Option<Entry>, DTableError> {
        match self.youngest_at_current() {
            Some(idx) => self.subs[idx].entry(),
            None => Ok(None),
        }
    }
}
