//! The managed dtable: a mutable, crash-safe dtable that owns the ordered
//! list of on-disk runs for one column, plus the live write buffer sitting
//! on top of them.
//!
//! Reads and iteration are served by composing `[live, runs…]` (youngest
//! first) through [`crate::dtable::overlay::OverlayDTable`]. `digest` flushes
//! the live buffer into a new [`crate::dtable::sorted_run::SortedRunDTable`]
//! and rotates the WAL; `combine` merges every on-disk run into one, dropping
//! spent tombstones. The background worker runs `digest`/`combine` on a
//! dedicated thread driven by `crossbeam`'s channel, holding the same lock a
//! foreground `maintain()` call would.

mod worker;
mod tx;

pub use tx::Transaction;
pub use worker::Worker;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::dtable::overlay::OverlayDTable;
use crate::dtable::sorted_run::SortedRunDTable;
use crate::dtable::{DTable, DTableError, DTableIter, Entry, SliceCursor};
use crate::key::{Key, KeyType};
use crate::memtable::{Memtable, MemtableError, MemtableGetResult, MemtableRecord};

impl From<MemtableError> for DTableError {
    fn from(e: MemtableError) -> Self {
        match e {
            MemtableError::FlushRequired => DTableError::Conflict("write buffer full; flush required".into()),
            other => DTableError::Corrupt(other.to_string()),
        }
    }
}

/// Maintenance policy for one managed dtable: how often `digest`/`combine`
/// run on their own, and when a background worker tick actually does
/// anything.
#[derive(Debug, Clone)]
pub struct ManagedDtableConfig {
    /// Max live-buffer size (bytes) before a write forces a digest.
    pub write_buffer_size: usize,

    /// Max size of a single WAL record; `None` uses the WAL's own default.
    pub max_wal_record_size: Option<u32>,

    /// Minimum time between automatic digests run by `run_maintenance`.
    pub digest_interval: Duration,

    /// Minimum time between automatic combines, once `combine_count` is met.
    pub combine_interval: Duration,

    /// Minimum number of on-disk runs before a combine is considered.
    pub combine_count: usize,

    /// Whether `run_maintenance` may trigger combine at all.
    pub autocombine: bool,

    /// Force a combine after this many digests even if `combine_interval`
    /// hasn't elapsed, as long as `combine_count` is also met.
    pub autocombine_digests: usize,
}

impl Default for ManagedDtableConfig {
    fn default() -> Self {
        Self {
            write_buffer_size: 4 * 1024 * 1024,
            max_wal_record_size: None,
            digest_interval: Duration::from_secs(60),
            combine_interval: Duration::from_secs(3600),
            combine_count: 4,
            autocombine: true,
            autocombine_digests: 4,
        }
    }
}

struct MaintenanceState {
    last_digest: Instant,
    last_combine: Instant,
    digests_since_combine: usize,
}

impl MaintenanceState {
    fn new() -> Self {
        let now = Instant::now();
        Self { last_digest: now, last_combine: now, digests_since_combine: 0 }
    }
}

struct Inner {
    dir: PathBuf,
    key_type: KeyType,
    config: ManagedDtableConfig,
    live: Memtable,
    /// On-disk runs, oldest first. The live buffer is always the youngest
    /// generation and is not in this list.
    runs: Vec<SortedRunDTable>,
    next_run_id: u64,
    maintenance: MaintenanceState,
}

/// A mutable dtable backed by a live [`Memtable`] plus an ordered stack of
/// immutable [`SortedRunDTable`] runs. Keys are encoded with
/// [`Key::to_sort_bytes`] before reaching either.
///
/// `lookup`/`iter` collapse an explicit [`Entry::Tombstone`] into `Ok(None)`
/// (resp. simply never surface it) — this is the one layer where an
/// external caller stops being able to tell "deleted" from "never written".
pub struct ManagedDtable {
    inner: Arc<Mutex<Inner>>,
    key_type: KeyType,
    worker: Option<Worker>,
}

impl ManagedDtable {
    pub fn open(path: impl AsRef<Path>, key_type: KeyType, config: ManagedDtableConfig) -> Result<Self, DTableError> {
        let dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let (runs, next_run_id) = Self::scan_runs(&dir, key_type)?;
        let wal_seq = Self::scan_wal_seq(&dir).max(1);
        let wal_path = dir.join(format!("wal-{wal_seq:06}.log"));
        let live = Memtable::new(&wal_path, config.max_wal_record_size, config.write_buffer_size)?;

        let inner = Inner {
            dir,
            key_type,
            config,
            live,
            runs,
            next_run_id,
            maintenance: MaintenanceState::new(),
        };
        Ok(Self { inner: Arc::new(Mutex::new(inner)), key_type, worker: None })
    }

    fn scan_runs(dir: &Path, key_type: KeyType) -> Result<(Vec<SortedRunDTable>, u64), DTableError> {
        let mut found: Vec<(u64, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            let Some(id_str) = name.strip_prefix("run-").and_then(|s| s.strip_suffix(".sst")) else { continue };
            if let Ok(id) = id_str.parse::<u64>() {
                found.push((id, path));
            }
        }
        found.sort_by_key(|(id, _)| *id);
        let next_run_id = found.last().map(|(id, _)| id + 1).unwrap_or(0);
        let mut runs = Vec::with_capacity(found.len());
        for (_, path) in found {
            let run = SortedRunDTable::open(path)?;
            if run.key_type() != key_type {
                return Err(DTableError::Corrupt("on-disk run key type does not match table key type".into()));
            }
            runs.push(run);
        }
        Ok((runs, next_run_id))
    }

    fn scan_wal_seq(dir: &Path) -> u64 {
        let Ok(read_dir) = std::fs::read_dir(dir) else { return 0 };
        let mut max_seq = 0u64;
        for entry in read_dir.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            let Some(seq_str) = name.strip_prefix("wal-").and_then(|s| s.strip_suffix(".log")) else { continue };
            if let Ok(seq) = seq_str.parse::<u64>() {
                max_seq = max_seq.max(seq);
            }
        }
        max_seq
    }

    fn decode_key(key_type: KeyType, raw: &[u8]) -> Key {
        match key_type {
            KeyType::UInt32 => {
                let mut b = [0u8; 4];
                b.copy_from_slice(&raw[..4]);
                Key::UInt32(u32::from_be_bytes(b))
            }
            KeyType::Double => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&raw[..8]);
                let bits = u64::from_be_bytes(b);
                let bits = if bits & (1 << 63) != 0 { bits & !(1 << 63) } else { !bits };
                Key::Double(f64::from_bits(bits))
            }
            KeyType::String => Key::String(String::from_utf8_lossy(raw).into_owned()),
            KeyType::Blob => Key::Blob(raw.to_vec()),
        }
    }

    /// Flushes the live buffer into a new on-disk run and rotates the WAL.
    /// Returns `false` if the live buffer had nothing to flush.
    fn digest_locked(inner: &mut Inner) -> Result<bool, DTableError> {
        let records: Vec<_> = inner.live.iter_for_flush()?.collect();
        if records.is_empty() {
            return Ok(false);
        }

        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            match record {
                MemtableRecord::Put { key, value, .. } => {
                    entries.push((Self::decode_key(inner.key_type, &key), Entry::Valid(value)));
                }
                MemtableRecord::Delete { key, .. } => {
                    entries.push((Self::decode_key(inner.key_type, &key), Entry::Tombstone));
                }
                MemtableRecord::RangeDelete { .. } => {
                    return Err(DTableError::Unsupported(
                        "range deletes are not supported by a managed dtable's digest".into(),
                    ));
                }
            }
        }
        entries.sort_by(|a, b| a.0.to_sort_bytes().cmp(&b.0.to_sort_bytes()));

        let run_id = inner.next_run_id;
        inner.next_run_id += 1;
        let run_path = inner.dir.join(format!("run-{run_id:06}.sst"));
        SortedRunDTable::create(&run_path, inner.key_type, entries, Vec::new())?;
        inner.runs.push(SortedRunDTable::open(&run_path)?);

        let old_wal_path = inner.live.wal.path().to_path_buf();
        let new_seq = inner.live.wal.wal_seq() + 1;
        let new_wal_path = inner.dir.join(format!("wal-{new_seq:06}.log"));
        inner.live = Memtable::new(&new_wal_path, inner.config.max_wal_record_size, inner.config.write_buffer_size)?;
        let _ = std::fs::remove_file(&old_wal_path);

        Ok(true)
    }

    /// Merges every on-disk run into one, dropping tombstones (nothing
    /// older is left below the merged run to shadow). Returns `false` if
    /// there were fewer than two runs to merge.
    fn combine_locked(inner: &mut Inner) -> Result<bool, DTableError> {
        if inner.runs.len() < 2 {
            return Ok(false);
        }

        let merged = {
            let tables: Vec<&dyn DTable> = inner.runs.iter().rev().map(|r| r as &dyn DTable).collect();
            let overlay = OverlayDTable::new(tables)?;
            let mut it = overlay.iter();
            let mut merged = Vec::new();
            let mut valid = it.first()?;
            while valid {
                let key = it.key().expect("valid overlay position has a key");
                let entry = it.entry()?.expect("valid overlay position has an entry");
                merged.push((key, entry));
                valid = it.next()?;
            }
            merged
        };

        let run_id = inner.next_run_id;
        inner.next_run_id += 1;
        let run_path = inner.dir.join(format!("run-{run_id:06}.sst"));
        SortedRunDTable::create(&run_path, inner.key_type, merged, Vec::new())?;
        let merged_run = SortedRunDTable::open(&run_path)?;

        let old_paths: Vec<PathBuf> = inner.runs.iter().map(|r| r.path().to_path_buf()).collect();
        inner.runs = vec![merged_run];
        for path in old_paths {
            let _ = std::fs::remove_file(path);
        }

        Ok(true)
    }

    fn run_maintenance_locked(inner: &mut Inner) -> Result<(), DTableError> {
        let now = Instant::now();
        if now.duration_since(inner.maintenance.last_digest) >= inner.config.digest_interval {
            Self::digest_locked(inner)?;
            inner.maintenance.last_digest = now;
            inner.maintenance.digests_since_combine += 1;
        }
        if inner.config.autocombine
            && inner.runs.len() >= inner.config.combine_count
            && (now.duration_since(inner.maintenance.last_combine) >= inner.config.combine_interval
                || inner.maintenance.digests_since_combine >= inner.config.autocombine_digests)
        {
            Self::combine_locked(inner)?;
            inner.maintenance.last_combine = now;
            inner.maintenance.digests_since_combine = 0;
        }
        Ok(())
    }

    /// Flushes the live buffer into a new on-disk run right now, regardless
    /// of `digest_interval`.
    pub fn digest(&self) -> Result<bool, DTableError> {
        let mut inner = self.inner.lock().expect("managed dtable mutex poisoned");
        Self::digest_locked(&mut inner)
    }

    /// Merges every on-disk run into one right now, regardless of
    /// `combine_interval`/`combine_count`.
    pub fn combine(&self) -> Result<bool, DTableError> {
        let mut inner = self.inner.lock().expect("managed dtable mutex poisoned");
        Self::combine_locked(&mut inner)
    }

    /// Runs whatever maintenance is currently due per [`ManagedDtableConfig`].
    /// Called directly by [`DTable::maintain`] and periodically by the
    /// background worker.
    pub fn run_maintenance(&self) -> Result<(), DTableError> {
        let mut inner = self.inner.lock().expect("managed dtable mutex poisoned");
        Self::run_maintenance_locked(&mut inner)
    }

    /// Spawns a background thread that runs [`Self::run_maintenance`] on
    /// every tick of `interval`, sharing the same lock a foreground
    /// `digest`/`combine`/`maintain` call would take — this hands the
    /// worker exclusive mutation rights for the duration of each tick.
    pub fn background_loan(&mut self, interval: Duration) -> Result<(), DTableError> {
        if self.worker.is_some() {
            return Err(DTableError::AlreadyExists("background worker already running".into()));
        }
        let inner = Arc::clone(&self.inner);
        self.worker = Some(Worker::spawn(interval, move || {
            let mut guard = inner.lock().expect("managed dtable mutex poisoned");
            Self::run_maintenance_locked(&mut guard)
        }));
        Ok(())
    }

    /// Signals the background worker to stop, blocks until its in-flight
    /// tick (if any) finishes, and returns that tick's actual result.
    pub fn background_join(&mut self) -> Result<(), DTableError> {
        match self.worker.take() {
            Some(worker) => worker.join(),
            None => Ok(()),
        }
    }

    /// Starts an abortable transaction: writes accumulate in memory and
    /// are only applied to the table on [`Transaction::commit`]; dropping
    /// or calling [`Transaction::abort`] discards them untouched.
    pub fn create_tx(&self) -> Transaction<'_> {
        Transaction::new(self)
    }

    fn encode(&self, key: &Key) -> Result<Vec<u8>, DTableError> {
        if key.key_type() != self.key_type {
            return Err(DTableError::InvalidArgument(format!(
                "key type mismatch: table expects {:?}, got {:?}",
                self.key_type,
                key.key_type()
            )));
        }
        Ok(key.to_sort_bytes())
    }

    pub(crate) fn insert_raw(&self, key: Key, value: Vec<u8>) -> Result<(), DTableError> {
        let raw = self.encode(&key)?;
        let mut inner = self.inner.lock().expect("managed dtable mutex poisoned");
        match inner.live.put(raw.clone(), value.clone()) {
            Ok(()) => Ok(()),
            Err(MemtableError::FlushRequired) => {
                Self::digest_locked(&mut inner)?;
                inner.live.put(raw, value).map_err(DTableError::from)
            }
            Err(e) => Err(DTableError::from(e)),
        }
    }

    pub(crate) fn remove_raw(&self, key: Key) -> Result<(), DTableError> {
        let raw = self.encode(&key)?;
        let mut inner = self.inner.lock().expect("managed dtable mutex poisoned");
        match inner.live.delete(raw.clone()) {
            Ok(()) => Ok(()),
            Err(MemtableError::FlushRequired) => {
                Self::digest_locked(&mut inner)?;
                inner.live.delete(raw).map_err(DTableError::from)
            }
            Err(e) => Err(DTableError::from(e)),
        }
    }

    /// Materializes `[live, runs…]` into one ordered, tombstone-free
    /// snapshot (the overlay never surfaces a key whose youngest entry is
    /// a tombstone, once item a's fix lands, so this needs no filtering).
    fn entries_snapshot(&self) -> Result<Vec<(Key, Entry)>, DTableError> {
        let inner = self.inner.lock().expect("managed dtable mutex poisoned");
        let live = LiveSnapshot::capture(&inner)?;
        let tables: Vec<&dyn DTable> =
            std::iter::once(&live as &dyn DTable).chain(inner.runs.iter().rev().map(|r| r as &dyn DTable)).collect();
        let overlay = OverlayDTable::new(tables)?;
        let mut it = overlay.iter();
        let mut out = Vec::new();
        let mut valid = it.first()?;
        while valid {
            let key = it.key().expect("valid overlay position has a key");
            let entry = it.entry()?.expect("valid overlay position has an entry");
            out.push((key, entry));
            valid = it.next()?;
        }
        Ok(out)
    }
}

impl DTable for ManagedDtable {
    fn key_type(&self) -> KeyType {
        self.key_type
    }

    fn lookup(&self, key: &Key) -> Result<Option<Entry>, DTableError> {
        let raw = self.encode(key)?;
        let inner = self.inner.lock().expect("managed dtable mutex poisoned");
        match inner.live.get(&raw)? {
            MemtableGetResult::Put(v) => return Ok(Some(Entry::Valid(v))),
            MemtableGetResult::Delete | MemtableGetResult::RangeDelete => return Ok(None),
            MemtableGetResult::NotFound => {}
        }
        for run in inner.runs.iter().rev() {
            if let Some(entry) = run.lookup(key)? {
                return Ok(entry.value().map(|v| Entry::Valid(v.to_vec())));
            }
        }
        Ok(None)
    }

    fn iter(&self) -> Box<dyn DTableIter + '_> {
        match self.entries_snapshot() {
            Ok(entries) => Box::new(ManagedIter { entries, pos: None, failed: None }),
            Err(e) => Box::new(ManagedIter { entries: Vec::new(), pos: None, failed: Some(e.to_string()) }),
        }
    }

    fn size(&self) -> u64 {
        self.entries_snapshot().map(|v| v.len() as u64).unwrap_or(0)
    }

    fn writable(&self) -> bool {
        true
    }

    fn insert(&mut self, key: Key, value: Vec<u8>, _append: bool) -> Result<(), DTableError> {
        self.insert_raw(key, value)
    }

    fn remove(&mut self, key: Key) -> Result<(), DTableError> {
        self.remove_raw(key)
    }

    fn maintain(&mut self) -> Result<(), DTableError> {
        self.run_maintenance()
    }
}

/// A point-in-time, fully materialized copy of the live buffer's contents,
/// so it can sit alongside the on-disk runs as an ordinary `&dyn DTable` in
/// a transient overlay without holding the memtable lock for the overlay's
/// lifetime.
struct LiveSnapshot {
    key_type: KeyType,
    entries: Vec<(Key, Entry)>,
}

impl LiveSnapshot {
    fn capture(inner: &Inner) -> Result<Self, DTableError> {
        let mut entries = Vec::new();
        for record in inner.live.iter_for_flush()? {
            match record {
                MemtableRecord::Put { key, value, .. } => {
                    entries.push((Self::decode(inner.key_type, &key), Entry::Valid(value)))
                }
                MemtableRecord::Delete { key, .. } => entries.push((Self::decode(inner.key_type, &key), Entry::Tombstone)),
                MemtableRecord::RangeDelete { .. } => {
                    return Err(DTableError::Unsupported(
                        "range deletes are not supported by a managed dtable's iteration".into(),
                    ));
                }
            }
        }
        entries.sort_by(|a, b| a.0.to_sort_bytes().cmp(&b.0.to_sort_bytes()));
        Ok(Self { key_type: inner.key_type, entries })
    }

    fn decode(key_type: KeyType, raw: &[u8]) -> Key {
        ManagedDtable::decode_key(key_type, raw)
    }
}

impl DTable for LiveSnapshot {
    fn key_type(&self) -> KeyType {
        self.key_type
    }

    fn lookup(&self, key: &Key) -> Result<Option<Entry>, DTableError> {
        let target = key.to_sort_bytes();
        Ok(self
            .entries
            .binary_search_by(|(k, _)| k.to_sort_bytes().cmp(&target))
            .ok()
            .map(|idx| self.entries[idx].1.clone()))
    }

    fn iter(&self) -> Box<dyn DTableIter + '_> {
        Box::new(SliceCursor::new(&self.entries))
    }

    fn size(&self) -> u64 {
        self.entries.len() as u64
    }
}

/// Bidirectional cursor over a fully materialized `[live, runs…]` snapshot.
/// `failed` carries a construction-time error forward so `first`/`next`/…
/// still return it instead of silently reporting an empty table.
struct ManagedIter {
    entries: Vec<(Key, Entry)>,
    pos: Option<usize>,
    failed: Option<String>,
}

impl ManagedIter {
    fn check(&self) -> Result<(), DTableError> {
        match &self.failed {
            Some(msg) => Err(DTableError::Corrupt(msg.clone())),
            None => Ok(()),
        }
    }
}

impl DTableIter for ManagedIter {
    fn valid(&self) -> bool {
        self.pos.is_some_and(|i| i < self.entries.len())
    }

    fn first(&mut self) -> Result<bool, DTableError> {
        self.check()?;
        self.pos = if self.entries.is_empty() { None } else { Some(0) };
        Ok(self.valid())
    }

    fn last(&mut self) -> Result<bool, DTableError> {
        self.check()?;
        self.pos = self.entries.len().checked_sub(1);
        Ok(self.valid())
    }

    fn next(&mut self) -> Result<bool, DTableError> {
        self.check()?;
        self.pos = match self.pos {
            Some(i) if i + 1 < self.entries.len() => Some(i + 1),
            _ => None,
        };
        Ok(self.valid())
    }

    fn prev(&mut self) -> Result<bool, DTableError> {
        self.check()?;
        self.pos = match self.pos {
            Some(i) if i > 0 => Some(i - 1),
            _ => None,
        };
        Ok(self.valid())
    }

    fn seek(&mut self, key: &Key) -> Result<bool, DTableError> {
        self.check()?;
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

    fn seek_pred(&mut self, pred: &crate::dtable::SeekPredicate<'_>) -> Result<bool, DTableError> {
        self.check()?;
        let idx = self.entries.partition_point(|(k, _)| pred(k) == std::cmp::Ordering::Less);
        let exact = idx < self.entries.len() && pred(&self.entries[idx].0) == std::cmp::Ordering::Equal;
        self.pos = if idx < self.entries.len() { Some(idx) } else { None };
        Ok(exact)
    }

    fn key(&self) -> Option<Key> {
        self.pos.map(|i| self.entries[i].0.clone())
    }

    fn entry(&self) -> Result<Option<Entry>, DTableError> {
        self.check()?;
        Ok(self.pos.map(|i| self.entries[i].1.clone()))
    }
}
