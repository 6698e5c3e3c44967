//! The generic sorted-run dtable: an immutable, on-disk, ascending-key map
//! of `key -> Entry`.
//!
//! Unlike `sstable::SSTable` (which carries the engine's multi-version LSN
//! history for MVCC reads), a sorted-run file stores exactly one entry per
//! key — the merge/combine algorithms in `managed` are the only place
//! multiple versions of a key are ever in flight, and they resolve to a
//! single winner before writing a run. The on-disk layout follows the same
//! idiom as `wal`/`sstable`: a packed header via [`crate::encoding`],
//! then a flat record stream, then a trailing CRC32.
//!
//! Bidirectional iteration (`first/last/next/prev/seek`) is provided by
//! materializing the run into memory on open — sorted-run files in this
//! crate are digest/combine outputs sized for a single managed dtable, not
//! the whole engine's SSTable set, so this is the simplest faithful
//! implementation of the §4.1 contract.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32;

use crate::dtable::{DTable, DTableError, DTableIter, Entry, SeekPredicate};
use crate::encoding::{self, decode_from_slice, encode_to_vec, Decode, Encode};
use crate::key::{Key, KeyType};

const MAGIC: u32 = 0x5254_4253; // "SBTR" little-endian-ish tag
const VERSION: u32 = 1;

#[derive(Debug)]
struct Header {
    magic: u32,
    version: u32,
    key_type: KeyType,
    key_count: u64,
}

impl encoding::Encode for Header {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), encoding::EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.key_type.encode_to(buf)?;
        self.key_count.encode_to(buf)
    }
}

impl encoding::Decode for Header {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), encoding::EncodingError> {
        let (magic, mut offset) = u32::decode_from(buf)?;
        let (version, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (key_type, n) = KeyType::decode_from(&buf[offset..])?;
        offset += n;
        let (key_count, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Header { magic, version, key_type, key_count },
            offset,
        ))
    }
}

#[derive(Debug, Clone)]
struct Record {
    key: Key,
    entry: Entry,
}

impl encoding::Encode for Record {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), encoding::EncodingError> {
        self.key.encode_to(buf)?;
        match &self.entry {
            Entry::Valid(v) => {
                0u8.encode_to(buf)?;
                v.encode_to(buf)?;
            }
            Entry::Tombstone => {
                1u8.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl encoding::Decode for Record {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), encoding::EncodingError> {
        let (key, mut offset) = Key::decode_from(buf)?;
        let (tag, n) = u8::decode_from(&buf[offset..])?;
        offset += n;
        let entry = match tag {
            0 => {
                let (v, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                Entry::Valid(v)
            }
            1 => Entry::Tombstone,
            _ => {
                return Err(encoding::EncodingError::InvalidTag {
                    tag: tag as u32,
                    type_name: "sorted_run::Record",
                });
            }
        };
        Ok((Record { key, entry }, offset))
    }
}

/// A generic sorted-run dtable, fully loaded into memory.
pub struct SortedRunDTable {
    path: PathBuf,
    key_type: KeyType,
    entries: Vec<Record>,
}

impl SortedRunDTable {
    /// Writes a new sorted-run file.
    ///
    /// For each key from `source` (assumed already in ascending key order,
    /// deduplicated to its winning version), writes the entry as-is. Any
    /// key present as [`Entry::Tombstone`] in `shadow` but absent from
    /// `source` is also written as a tombstone — this preserves delete
    /// semantics across a combine when an older run still holds a value
    /// for that key.
    pub fn create(
        dst: impl AsRef<Path>,
        key_type: KeyType,
        source: impl IntoIterator<Item = (Key, Entry)>,
        shadow_tombstones: impl IntoIterator<Item = Key>,
    ) -> Result<(), DTableError> {
        let mut source_iter = source.into_iter().peekable();
        let mut merged: Vec<Record> = Vec::new();
        let mut source_keys: std::collections::BTreeSet<Vec<u8>> = std::collections::BTreeSet::new();

        while let Some((key, entry)) = source_iter.next() {
            source_keys.insert(key.to_sort_bytes());
            merged.push(Record { key, entry });
        }

        for key in shadow_tombstones {
            if !source_keys.contains(&key.to_sort_bytes()) {
                merged.push(Record { key, entry: Entry::Tombstone });
            }
        }

        merged.sort_by(|a, b| a.key.to_sort_bytes().cmp(&b.key.to_sort_bytes()));

        let header = Header {
            magic: MAGIC,
            version: VERSION,
            key_type,
            key_count: merged.len() as u64,
        };

        let file = File::create(dst.as_ref())?;
        let mut writer = BufWriter::new(file);
        let mut payload = Vec::new();

        let header_bytes = encode_to_vec(&header).map_err(to_corrupt)?;
        payload.extend_from_slice(&header_bytes);
        for record in &merged {
            let record_bytes = encode_to_vec(record).map_err(to_corrupt)?;
            payload.extend_from_slice(&record_bytes);
        }

        let mut hasher = Crc32::new();
        hasher.update(&payload);
        let checksum = hasher.finalize();

        writer.write_all(&payload)?;
        writer.write_all(&checksum.to_le_bytes())?;
        writer.flush()?;

        Ok(())
    }

    /// Opens an existing sorted-run file, validating magic/version/checksum
    /// and materializing every entry into memory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DTableError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        if bytes.len() < 4 {
            return Err(DTableError::Corrupt("sorted-run file too short".into()));
        }
        let (payload, checksum_bytes) = bytes.split_at(bytes.len() - 4);
        let expected = u32::from_le_bytes(checksum_bytes.try_into().unwrap());

        let mut hasher = Crc32::new();
        hasher.update(payload);
        if hasher.finalize() != expected {
            return Err(DTableError::Corrupt("sorted-run checksum mismatch".into()));
        }

        let (header, mut offset): (Header, usize) =
            decode_from_slice(payload).map_err(|e| DTableError::Corrupt(e.to_string()))?;

        if header.magic != MAGIC {
            return Err(DTableError::Corrupt("bad sorted-run magic".into()));
        }
        if header.version != VERSION {
            return Err(DTableError::Corrupt(format!(
                "unsupported sorted-run version {}",
                header.version
            )));
        }

        let mut entries = Vec::with_capacity(header.key_count as usize);
        for _ in 0..header.key_count {
            let (record, n): (Record, usize) = decode_from_slice(&payload[offset..])
                .map_err(|e| DTableError::Corrupt(e.to_string()))?;
            offset += n;
            entries.push(record);
        }

        Ok(Self { path, key_type: header.key_type, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn binary_search(&self, key: &Key) -> Result<usize, usize> {
        let target = key.to_sort_bytes();
        self.entries.binary_search_by(|r| r.key.to_sort_bytes().cmp(&target))
    }
}

impl DTable for SortedRunDTable {
    fn key_type(&self) -> KeyType {
        self.key_type
    }

    fn lookup(&self, key: &Key) -> Result<Option<Entry>, DTableError> {
        match self.binary_search(key) {
            Ok(idx) => Ok(Some(self.entries[idx].entry.clone())),
            Err(_) => Ok(None),
        }
    }

    fn iter(&self) -> Box<dyn DTableIter + '_> {
        Box::new(SortedRunIter { entries: &self.entries, pos: None })
    }

    fn size(&self) -> u64 {
        self.entries.len() as u64
    }
}

fn to_corrupt(e: encoding::EncodingError) -> DTableError {
    DTableError::Corrupt(e.to_string())
}

/// Index-based bidirectional cursor over a materialized run.
pub struct SortedRunIter<'a> {
    entries: &'a [Record],
    /// `None` = invalid (before-the-start or past-the-end). `Some(i)` = at `entries[i]`.
    pos: Option<usize>,
}

impl<'a> DTableIter for SortedRunIter<'a> {
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
        match self.entries.binary_search_by(|r| r.key.to_sort_bytes().cmp(&target)) {
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
        // Lower-bound under `pred`: first entry where pred(key) != Less.
        let idx = self.entries.partition_point(|r| pred(&r.key) == std::cmp::Ordering::Less);
        let exact = idx < self.entries.len() && pred(&self.entries[idx].key) == std::cmp::Ordering::Equal;
        self.pos = if idx < self.entries.len() { Some(idx) } else { None };
        Ok(exact)
    }

    fn key(&self) -> Option<Key> {
        self.pos.map(|i| self.entries[i].key.clone())
    }

    fn entry(&self) -> Result<Option<Entry>, DTableError> {
        Ok(self.pos.map(|i| self.entries[i].entry.clone()))
    }

    fn get_index(&self) -> Option<u64> {
        self.pos.map(|i| i as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn kv(k: u32, v: &str) -> (Key, Entry) {
        (Key::UInt32(k), Entry::Valid(v.as_bytes().to_vec()))
    }

    #[test]
    fn create_open_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.sst");

        SortedRunDTable::create(
            &path,
            KeyType::UInt32,
            vec![kv(2, "world"), kv(4, "hello")],
            vec![],
        )
        .unwrap();

        let run = SortedRunDTable::open(&path).unwrap();
        assert_eq!(run.size(), 2);
        assert_eq!(
            run.lookup(&Key::UInt32(2)).unwrap(),
            Some(Entry::Valid(b"world".to_vec()))
        );
        assert_eq!(run.lookup(&Key::UInt32(99)).unwrap(), None);
    }

    #[test]
    fn shadow_tombstone_preserved_when_absent_from_source() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.sst");

        SortedRunDTable::create(
            &path,
            KeyType::UInt32,
            vec![kv(1, "a")],
            vec![Key::UInt32(5)],
        )
        .unwrap();

        let run = SortedRunDTable::open(&path).unwrap();
        assert_eq!(run.size(), 2);
        assert_eq!(run.lookup(&Key::UInt32(5)).unwrap(), Some(Entry::Tombstone));
    }

    #[test]
    fn iterator_is_bidirectional() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.sst");
        SortedRunDTable::create(
            &path,
            KeyType::UInt32,
            vec![kv(1, "a"), kv(2, "b"), kv(3, "c")],
            vec![],
        )
        .unwrap();
        let run = SortedRunDTable::open(&path).unwrap();
        let mut it = run.iter();

        assert!(it.first().unwrap());
        assert_eq!(it.key(), Some(Key::UInt32(1)));
        assert!(it.next().unwrap());
        assert_eq!(it.key(), Some(Key::UInt32(2)));
        assert!(it.last().unwrap());
        assert_eq!(it.key(), Some(Key::UInt32(3)));
        assert!(it.prev().unwrap());
        assert_eq!(it.key(), Some(Key::UInt32(2)));
    }

    #[test]
    fn seek_lower_bounds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.sst");
        SortedRunDTable::create(
            &path,
            KeyType::UInt32,
            vec![kv(1, "a"), kv(3, "c"), kv(5, "e")],
            vec![],
        )
        .unwrap();
        let run = SortedRunDTable::open(&path).unwrap();
        let mut it = run.iter();

        assert!(!it.seek(&Key::UInt32(2)).unwrap());
        assert_eq!(it.key(), Some(Key::UInt32(3)));
        assert!(it.seek(&Key::UInt32(5)).unwrap());
    }
}
