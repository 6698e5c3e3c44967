//! Typed keys.
//!
//! A table's keys are all of one [`KeyType`]; mixing types within a table
//! is rejected at the call site that would otherwise compare them (see
//! `dtable::DTableError::InvalidArgument`). Blob keys may additionally
//! install a named comparator — the name is persisted so that reopening a
//! table with a different-named comparator is refused rather than silently
//! mis-ordered.

use std::cmp::Ordering;
use std::sync::Arc;

/// The tag identifying which variant a table's keys use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    UInt32,
    Double,
    String,
    Blob,
}

/// A single typed key value.
///
/// `Double` does not implement `Eq`/`Hash` at the language level (NaN), but
/// this type treats all keys as totally ordered within their own table —
/// `Ord`/`Eq` here use [`Key::cmp`], which never compares across variants
/// (callers are responsible for only ever constructing one variant per
/// table; see [`KeyType`]).
#[derive(Debug, Clone)]
pub enum Key {
    UInt32(u32),
    Double(f64),
    String(String),
    Blob(Vec<u8>),
}

impl Key {
    pub fn key_type(&self) -> KeyType {
        match self {
            Key::UInt32(_) => KeyType::UInt32,
            Key::Double(_) => KeyType::Double,
            Key::String(_) => KeyType::String,
            Key::Blob(_) => KeyType::Blob,
        }
    }

    /// Encodes this key into the byte order used for on-disk comparison
    /// and storage. Numeric types use a big-endian encoding so that
    /// unsigned byte-wise comparison matches numeric order.
    pub fn to_sort_bytes(&self) -> Vec<u8> {
        match self {
            Key::UInt32(v) => v.to_be_bytes().to_vec(),
            Key::Double(v) => {
                // Flip the sign bit (and invert the rest for negatives) so
                // big-endian byte comparison matches IEEE-754 total order
                // for the finite, non-NaN range this store supports.
                let bits = v.to_bits();
                let mapped = if bits & (1 << 63) != 0 {
                    !bits
                } else {
                    bits | (1 << 63)
                };
                mapped.to_be_bytes().to_vec()
            }
            Key::String(v) => v.as_bytes().to_vec(),
            Key::Blob(v) => v.clone(),
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::UInt32(a), Key::UInt32(b)) => a.cmp(b),
            (Key::Double(a), Key::Double(b)) => a.total_cmp(b),
            (Key::String(a), Key::String(b)) => a.cmp(b),
            (Key::Blob(a), Key::Blob(b)) => a.cmp(b),
            // Cross-type comparisons never occur within a well-formed
            // table; fall back to comparing the sort-byte encoding so the
            // method stays total rather than panicking.
            _ => self.to_sort_bytes().cmp(&other.to_sort_bytes()),
        }
    }
}

/// A named total-order comparator for [`Key::Blob`] keys.
///
/// The name is what gets persisted and checked on reopen; the function
/// itself is never serialized.
#[derive(Clone)]
pub struct BlobComparator {
    pub name: String,
    cmp: Arc<dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync>,
}

impl BlobComparator {
    pub fn new(
        name: impl Into<String>,
        cmp: impl Fn(&[u8], &[u8]) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            cmp: Arc::new(cmp),
        }
    }

    /// The default byte-lexicographic comparator, named `"default"`.
    pub fn default_lexicographic() -> Self {
        Self::new("default", |a, b| a.cmp(b))
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        (self.cmp)(a, b)
    }
}

impl std::fmt::Debug for BlobComparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobComparator").field("name", &self.name).finish()
    }
}

/// A light descriptor of a value: whether it exists, and (if so) its size.
///
/// Iterators may yield a `Metablob` cheaply during a scan and only fetch
/// the full value bytes on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metablob {
    pub exists: bool,
    pub size: usize,
}

impl Metablob {
    pub fn missing() -> Self {
        Self { exists: false, size: 0 }
    }

    pub fn of(bytes: &[u8]) -> Self {
        Self { exists: true, size: bytes.len() }
    }
}
