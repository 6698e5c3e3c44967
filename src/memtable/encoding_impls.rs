//! Encode / Decode implementations for memtable WAL record types.
//!
//! Extracted from `mod.rs` for readability, mirroring
//! `engine::encoding_impls` — these are the payloads the memtable's own
//! WAL persists, decoded via [`crate::encoding`] rather than an external
//! serialization crate.

use super::{MemtableRangeTombstone, MemtableRecord, MemtableSingleEntry};
use crate::encoding::{Decode, Encode, EncodingError};

// ------------------------------------------------------------------------------------------------
// Encode / Decode — MemtableSingleEntry
// ------------------------------------------------------------------------------------------------

impl Encode for MemtableSingleEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.value.encode_to(buf)?;
        self.timestamp.encode_to(buf)?;
        self.is_delete.encode_to(buf)?;
        self.lsn.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for MemtableSingleEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (value, mut offset) = Option::<Vec<u8>>::decode_from(buf)?;
        let (timestamp, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (is_delete, n) = bool::decode_from(&buf[offset..])?;
        offset += n;
        let (lsn, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            MemtableSingleEntry {
                value,
                timestamp,
                is_delete,
                lsn,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Encode / Decode — MemtableRangeTombstone
// ------------------------------------------------------------------------------------------------

impl Encode for MemtableRangeTombstone {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.start.encode_to(buf)?;
        self.end.encode_to(buf)?;
        self.lsn.encode_to(buf)?;
        self.timestamp.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for MemtableRangeTombstone {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (start, mut offset) = Vec::<u8>::decode_from(buf)?;
        let (end, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (lsn, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (timestamp, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            MemtableRangeTombstone {
                start,
                end,
                lsn,
                timestamp,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Encode / Decode — MemtableRecord
// ------------------------------------------------------------------------------------------------

impl Encode for MemtableRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            MemtableRecord::Put {
                key,
                value,
                lsn,
                timestamp,
            } => {
                0u32.encode_to(buf)?;
                key.encode_to(buf)?;
                value.encode_to(buf)?;
                lsn.encode_to(buf)?;
                timestamp.encode_to(buf)?;
            }
            MemtableRecord::Delete { key, lsn, timestamp } => {
                1u32.encode_to(buf)?;
                key.encode_to(buf)?;
                lsn.encode_to(buf)?;
                timestamp.encode_to(buf)?;
            }
            MemtableRecord::RangeDelete {
                start,
                end,
                lsn,
                timestamp,
            } => {
                2u32.encode_to(buf)?;
                start.encode_to(buf)?;
                end.encode_to(buf)?;
                lsn.encode_to(buf)?;
                timestamp.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for MemtableRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, mut offset) = u32::decode_from(buf)?;
        match tag {
            0 => {
                let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                let (value, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                let (lsn, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (timestamp, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((
                    MemtableRecord::Put {
                        key,
                        value,
                        lsn,
                        timestamp,
                    },
                    offset,
                ))
            }
            1 => {
                let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                let (lsn, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (timestamp, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((
                    MemtableRecord::Delete {
                        key,
                        lsn,
                        timestamp,
                    },
                    offset,
                ))
            }
            2 => {
                let (start, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                let (end, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                let (lsn, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (timestamp, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((
                    MemtableRecord::RangeDelete {
                        start,
                        end,
                        lsn,
                        timestamp,
                    },
                    offset,
                ))
            }
            _ => Err(EncodingError::InvalidTag {
                tag,
                type_name: "MemtableRecord",
            }),
        }
    }
}
