//! Core data types shared across the engine and its collaborators.

use bytes::Bytes;

/// A single record in a hash-partitioned namespace.
///
/// `hash` is computed by the caller from the record's natural key and must be
/// stable: it is the partitioning key for bucket placement and the equality
/// key for [`Hash::select_entries`](crate::Hash::select_entries). `data` is an
/// opaque marshalled record the engine never inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub hash: u32,
    pub data: Bytes,
}

impl Entry {
    pub fn new(hash: u32, data: impl Into<Bytes>) -> Entry {
        Entry {
            hash,
            data: data.into(),
        }
    }
}

/// Half-open hash range `[begin, end)` requested from the backing store.
///
/// `end == None` means the range is unbounded above, i.e. `[begin, 2^32)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashRange {
    pub begin: u32,
    pub end: Option<u32>,
}

impl HashRange {
    /// Whether `hash` falls inside this range.
    pub fn contains(&self, hash: u32) -> bool {
        hash >= self.begin && self.end.map_or(true, |end| hash < end)
    }
}

/// Outcome of a `lease_get` against the remote cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseGetResult {
    /// A valid value exists.
    Found(Bytes),
    /// The value is absent and this caller now holds the build lease.
    /// `lease_id` is the CAS token for the subsequent `lease_set`.
    Granted { lease_id: u64 },
    /// The value is absent and another builder holds the lease.
    Rejected,
}
