//! A dense-array dtable variant for `u32` keys over a contiguous-ish range.
//!
//! Each slot holds only a tag (see [`Slot`]) and the value, indexed by
//! `key - min_key`. `lookup`/`get_index` are O(1).

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32;

use crate::dtable::{DTable, DTableError, DTableIter, Entry, SeekPredicate};
use crate::encoding::{self, decode_from_slice, encode_to_vec, Decode, Encode};
use crate::key::{Key, KeyType};

const MAGIC: u32 = 0x5254_4241; // "ABTR"
const VERSION: u32 = 1;

/// Per-slot tag. `Hole` means "never written" (absent, not a tombstone);
/// `Tombstone` means "explicitly removed"; `Valid` holds real bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Hole,
    Tombstone,
    Valid,
}

impl encoding::Encode for Slot {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), encoding::EncodingError> {
        let tag: u8 = match self {
            Slot::Hole => 0,
            Slot::Tombstone => 1,
            Slot::Valid => 2,
        };
        tag.encode_to(buf)
    }
}

impl encoding::Decode for Slot {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), encoding::EncodingError> {
        let (tag, n) = u8::decode_from(buf)?;
        let slot = match tag {
            0 => Slot::Hole,
            1 => Slot::Tombstone,
            2 => Slot::Valid,
            _ => {
                return Err(encoding::EncodingError::InvalidTag {
                    tag: tag as u32,
                    type_name: "array::Slot",
                });
            }
        };
        Ok((slot, n))
    }
}

#[derive(Debug)]
struct Header {
    magic: u32,
    version: u32,
    min_key: u32,
    key_count: u64,
    array_size: u32,
}

impl encoding::Encode for Header {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), encoding::EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.min_key.encode_to(buf)?;
        self.key_count.encode_to(buf)?;
        self.array_size.encode_to(buf)
    }
}

impl encoding::Decode for Header {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), encoding::EncodingError> {
        let (magic, mut offset) = u32::decode_from(buf)?;
        let (version, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (min_key, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (key_count, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (array_size, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        Ok((Header { magic, version, min_key, key_count, array_size }, offset))
    }
}

/// The dense-array dtable: one `Slot` + optional value per key in
/// `[min_key, min_key + array_size)`.
pub struct ArrayDTable {
    path: PathBuf,
    min_key: u32,
    slots: Vec<Slot>,
    values: Vec<Option<Vec<u8>>>,
}

impl ArrayDTable {
    /// Density threshold (fraction of slots that must be non-`Hole`) above
    /// which a caller should prefer the array variant over the generic
    /// sorted-run layout. Exposed so `managed::digest` can choose a base.
    pub const DENSITY_THRESHOLD: f64 = 0.5;

    /// Whether `(min_key, max_key)` over `key_count` present keys is dense
    /// enough to be worth the array layout.
    pub fn is_dense_enough(min_key: u32, max_key: u32, key_count: u64) -> bool {
        let span = (max_key - min_key) as u64 + 1;
        span > 0 && (key_count as f64 / span as f64) >= Self::DENSITY_THRESHOLD
    }

    /// Builds a new dense-array run from `source` (must be `Key::UInt32`
    /// keys) plus shadow tombstones, exactly like
    /// [`super::sorted_run::SortedRunDTable::create`].
    pub fn create(
        dst: impl AsRef<Path>,
        source: impl IntoIterator<Item = (Key, Entry)>,
        shadow_tombstones: impl IntoIterator<Item = Key>,
    ) -> Result<(), DTableError> {
        let mut by_key: std::collections::BTreeMap<u32, Entry> = std::collections::BTreeMap::new();

        for (key, entry) in source {
            let k = as_u32(&key)?;
            by_key.insert(k, entry);
        }
        for key in shadow_tombstones {
            let k = as_u32(&key)?;
            by_key.entry(k).or_insert(Entry::Tombstone);
        }

        if by_key.is_empty() {
            return Err(DTableError::InvalidArgument(
                "array dtable requires at least one key".into(),
            ));
        }

        let min_key = *by_key.keys().next().unwrap();
        let max_key = *by_key.keys().next_back().unwrap();
        let array_size = max_key - min_key + 1;

        let mut slots = vec![Slot::Hole; array_size as usize];
        let mut values: Vec<Option<Vec<u8>>> = vec![None; array_size as usize];

        for (k, entry) in &by_key {
            let idx = (k - min_key) as usize;
            match entry {
                Entry::Valid(v) => {
                    slots[idx] = Slot::Valid;
                    values[idx] = Some(v.clone());
                }
                Entry::Tombstone => {
                    slots[idx] = Slot::Tombstone;
                }
            }
        }

        let header = Header {
            magic: MAGIC,
            version: VERSION,
            min_key,
            key_count: by_key.len() as u64,
            array_size,
        };

        let file = File::create(dst.as_ref())?;
        let mut writer = BufWriter::new(file);
        let mut payload = encode_to_vec(&header).map_err(to_corrupt)?;

        for i in 0..array_size as usize {
            let slot_bytes = encode_to_vec(&slots[i]).map_err(to_corrupt)?;
            payload.extend_from_slice(&slot_bytes);
            if slots[i] == Slot::Valid {
                let value_bytes =
                    encode_to_vec(values[i].as_ref().unwrap()).map_err(to_corrupt)?;
                payload.extend_from_slice(&value_bytes);
            }
        }

        let mut hasher = Crc32::new();
        hasher.update(&payload);
        let checksum = hasher.finalize();

        writer.write_all(&payload)?;
        writer.write_all(&checksum.to_le_bytes())?;
        writer.flush()?;

        Ok(())
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, DTableError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        if bytes.len() < 4 {
            return Err(DTableError::Corrupt("array dtable file too short".into()));
        }
        let (payload, checksum_bytes) = bytes.split_at(bytes.len() - 4);
        let expected = u32::from_le_bytes(checksum_bytes.try_into().unwrap());
        let mut hasher = Crc32::new();
        hasher.update(payload);
        if hasher.finalize() != expected {
            return Err(DTableError::Corrupt("array dtable checksum mismatch".into()));
        }

        let (header, mut offset): (Header, usize) =
            decode_from_slice(payload).map_err(|e| DTableError::Corrupt(e.to_string()))?;

        if header.magic != MAGIC {
            return Err(DTableError::Corrupt("bad array dtable magic".into()));
        }
        if header.version != VERSION {
            return Err(DTableError::Corrupt(format!(
                "unsupported array dtable version {}",
                header.version
            )));
        }

        let mut slots = Vec::with_capacity(header.array_size as usize);
        let mut values = Vec::with_capacity(header.array_size as usize);

        for _ in 0..header.array_size {
            let (slot, n): (Slot, usize) =
                decode_from_slice(&payload[offset..]).map_err(|e| DTableError::Corrupt(e.to_string()))?;
            offset += n;
            if slot == Slot::Valid {
                let (value, n): (Vec<u8>, usize) = decode_from_slice(&payload[offset..])
                    .map_err(|e| DTableError::Corrupt(e.to_string()))?;
                offset += n;
                values.push(Some(value));
            } else {
                values.push(None);
            }
            slots.push(slot);
        }

        Ok(Self { path, min_key: header.min_key, slots, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn index_of(&self, key: u32) -> Option<usize> {
        if key < self.min_key {
            return None;
        }
        let idx = (key - self.min_key) as usize;
        if idx < self.slots.len() { Some(idx) } else { None }
    }

    /// O(1) lookup by positional index within the array.
    pub fn get_by_index(&self, idx: u64) -> Option<(u32, Entry)> {
        let idx = idx as usize;
        let slot = *self.slots.get(idx)?;
        let key = self.min_key + idx as u32;
        match slot {
            Slot::Hole => None,
            Slot::Tombstone => Some((key, Entry::Tombstone)),
            Slot::Valid => Some((key, Entry::Valid(self.values[idx].clone().unwrap_or_default()))),
        }
    }
}

fn as_u32(key: &Key) -> Result<u32, DTableError> {
    match key {
        Key::UInt32(v) => Ok(*v),
        _ => Err(DTableError::InvalidArgument(
            "array dtable requires UInt32 keys; no fallback for non-integer keys".into(),
        )),
    }
}

fn to_corrupt(e: encoding::EncodingError) -> DTableError {
    DTableError::Corrupt(e.to_string())
}

impl DTable for ArrayDTable {
    fn key_type(&self) -> KeyType {
        KeyType::UInt32
    }

    fn lookup(&self, key: &Key) -> Result<Option<Entry>, DTableError> {
        let k = as_u32(key)?;
        let Some(idx) = self.index_of(k) else {
            return Ok(None);
        };
        Ok(match self.slots[idx] {
            Slot::Hole => None,
            Slot::Tombstone => Some(Entry::Tombstone),
            Slot::Valid => Some(Entry::Valid(self.values[idx].clone().unwrap_or_default())),
        })
    }

    fn iter(&self) -> Box<dyn DTableIter + '_> {
        Box::new(ArrayIter { table: self, pos: None })
    }

    fn size(&self) -> u64 {
        self.slots.iter().filter(|s| **s != Slot::Hole).count() as u64
    }
}

pub struct ArrayIter<'a> {
    table: &'a ArrayDTable,
    pos: Option<usize>,
}

impl<'a> ArrayIter<'a> {
    fn next_present(&self, mut idx: usize, forward: bool) -> Option<usize> {
        loop {
            if idx >= self.table.slots.len() {
                return None;
            }
            if self.table.slots[idx] != Slot::Hole {
                return Some(idx);
            }
            if forward {
                idx = idx.checked_add(1)?;
            } else {
                idx = idx.checked_sub(1)?;
            }
        }
    }
}

impl<'a> DTableIter for ArrayIter<'a> {
    fn valid(&self) -> bool {
        self.pos.is_some_and(|i| i < self.table.slots.len() && self.table.slots[i] != Slot::Hole)
    }

    fn first(&mut self) -> Result<bool, DTableError> {
        self.pos = if self.table.slots.is_empty() { None } else { self.next_present(0, true) };
        Ok(self.valid())
    }

    fn last(&mut self) -> Result<bool, DTableError> {
        self.pos = self
            .table
            .slots
            .len()
            .checked_sub(1)
            .and_then(|last| self.next_present(last, false));
        Ok(self.valid())
    }

    fn next(&mut self) -> Result<bool, DTableError> {
        self.pos = match self.pos {
            Some(i) if i + 1 < self.table.slots.len() => self.next_present(i + 1, true),
            _ => None,
        };
        Ok(self.valid())
    }

    fn prev(&mut self) -> Result<bool, DTableError> {
        self.pos = match self.pos {
            Some(i) if i > 0 => self.next_present(i - 1, false),
            _ => None,
        };
        Ok(self.valid())
    }

    fn seek(&mut self, key: &Key) -> Result<bool, DTableError> {
        let k = as_u32(key)?;
        if k < self.table.min_key {
            self.pos = self.next_present(0, true);
            return Ok(false);
        }
        let idx = (k - self.table.min_key) as usize;
        if idx >= self.table.slots.len() {
            self.pos = None;
            return Ok(false);
        }
        let exact = self.table.slots[idx] != Slot::Hole;
        self.pos = if exact { Some(idx) } else { self.next_present(idx, true) };
        Ok(exact)
    }

    fn seek_pred(&mut self, pred: &SeekPredicate<'_>) -> Result<bool, DTableError> {
        let idx = (0..self.table.slots.len())
            .find(|&i| self.table.slots[i] != Slot::Hole
                && pred(&Key::UInt32(self.table.min_key + i as u32)) != std::cmp::Ordering::Less);
        self.pos = idx;
        Ok(idx.is_some_and(|i| {
            pred(&Key::UInt32(self.table.min_key + i as u32)) == std::cmp::Ordering::Equal
        }))
    }

    fn key(&self) -> Option<Key> {
        self.pos.map(|i| Key::UInt32(self.table.min_key + i as u32))
    }

    fn entry(&self) -> Result<Option<Entry>, DTableError> {
        Ok(self.pos.and_then(|i| match self.table.slots[i] {
            Slot::Hole => None,
            Slot::Tombstone => Some(Entry::Tombstone),
            Slot::Valid => Some(Entry::Valid(self.table.values[i].clone().unwrap_or_default())),
        }))
    }

    fn get_index(&self) -> Option<u64> {
        self.pos.map(|i| i as u64)
    }
}
