//! Collaborator interfaces.
//!
//! The engine owns no connections: the remote cache, the process-local
//! memtable, and the backing store are all supplied by the caller behind
//! these traits. Deadlines and cancellation belong to the implementations;
//! a timed-out or canceled backing-store call surfaces as a thunk error.

use bytes::Bytes;

use crate::thunk::Thunk;
use crate::types::{Entry, HashRange, LeaseGetResult};

/// Process-local counter cache used to memoize per-namespace size-logs.
///
/// The contract is deliberately weak: an implementation may evict at any time
/// and may not return an entry that it just set. The engine tolerates both —
/// a stale or missing size-log only costs an extra cache round trip.
pub trait MemTable: Send + Sync {
    fn get_num(&self, key: &str) -> Option<u64>;
    fn set_num(&self, key: &str, num: u64);
}

/// Factory for cache pipelines. Shared across sessions and threads.
pub trait CacheClient: Send + Sync {
    /// A fresh pipeline. Pipelines are single-owner and must not be shared
    /// between threads.
    fn pipeline(&self) -> Box<dyn CachePipeline>;
}

/// Batching abstraction over a memcached-style remote cache.
///
/// Each operation records the intent and returns a thunk; thunks become ready
/// only after the pipeline flushes. Implementations must flush the pending
/// batch no later than the first resolve of any thunk from that batch.
pub trait CachePipeline {
    /// Plain read. `None` when the key is absent or held under a lease.
    fn get(&mut self, key: &str) -> Thunk<Option<Bytes>>;

    /// Read that takes a build lease on miss. See [`LeaseGetResult`].
    fn lease_get(&mut self, key: &str) -> Thunk<LeaseGetResult>;

    /// CAS write proving the caller holds the lease from a prior grant.
    /// A stale `lease_id` is a silent no-op on the server. `ttl` is in
    /// seconds, 0 meaning no expiry.
    fn lease_set(&mut self, key: &str, value: Bytes, lease_id: u64, ttl: u32) -> Thunk<()>;

    /// Unconditional delete.
    fn delete(&mut self, key: &str) -> Thunk<()>;

    /// Flush anything still pending and release the pipeline. Idempotent.
    fn finish(&mut self);
}

/// Backing store for one hash-partitioned namespace.
///
/// Implementations typically batch: thunks issued in one scheduler round are
/// answered from a single combined query (see `promo-repository`). The thunk
/// closures outlive the `&self` borrow, so implementations hand out handles
/// to shared interior state.
pub trait HashDatabase {
    /// Current size-log, authoritative over cache and memtable.
    fn get_size_log(&self) -> Thunk<u64>;

    /// All entries whose hash falls in `range`.
    fn select_entries(&self, range: HashRange) -> Thunk<Vec<Entry>>;
}

/// Backing store for a plain key/value namespace.
pub trait StoreDatabase {
    fn get(&self, key: &str) -> Thunk<Bytes>;
}
