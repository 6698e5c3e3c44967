//! Encode / Decode for [`Key`] and [`KeyType`], used by every dtable
//! variant's on-disk format. Mirrors `sstable::encoding_impls`' style.

use crate::encoding::{Decode, Encode, EncodingError};
use crate::key::{Key, KeyType};

impl Encode for KeyType {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let tag: u8 = match self {
            KeyType::UInt32 => 0,
            KeyType::Double => 1,
            KeyType::String => 2,
            KeyType::Blob => 3,
        };
        tag.encode_to(buf)
    }
}

impl Decode for KeyType {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, n) = u8::decode_from(buf)?;
        let kt = match tag {
            0 => KeyType::UInt32,
            1 => KeyType::Double,
            2 => KeyType::String,
            3 => KeyType::Blob,
            _ => {
                return Err(EncodingError::InvalidTag {
                    tag: tag as u32,
                    type_name: "KeyType",
                });
            }
        };
        Ok((kt, n))
    }
}

impl Encode for Key {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.key_type().encode_to(buf)?;
        match self {
            Key::UInt32(v) => v.encode_to(buf)?,
            Key::Double(v) => v.to_bits().encode_to(buf)?,
            Key::String(v) => v.encode_to(buf)?,
            Key::Blob(v) => v.encode_to(buf)?,
        }
        Ok(())
    }
}

impl Decode for Key {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (key_type, mut offset) = KeyType::decode_from(buf)?;
        let (key, n) = match key_type {
            KeyType::UInt32 => {
                let (v, n) = u32::decode_from(&buf[offset..])?;
                (Key::UInt32(v), n)
            }
            KeyType::Double => {
                let (bits, n) = u64::decode_from(&buf[offset..])?;
                (Key::Double(f64::from_bits(bits)), n)
            }
            KeyType::String => {
                let (v, n) = String::decode_from(&buf[offset..])?;
                (Key::String(v), n)
            }
            KeyType::Blob => {
                let (v, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                (Key::Blob(v), n)
            }
        };
        offset += n;
        Ok((key, offset))
    }
}
