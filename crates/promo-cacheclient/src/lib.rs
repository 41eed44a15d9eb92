//! promo-cacheclient — in-memory memcached-style cache client.
//!
//! Implements the engine's `CacheClient`/`CachePipeline` traits with the
//! full lease protocol: a `lease_get` on a missing key installs a hold and
//! grants the caller a lease id, later readers are rejected while the hold
//! stands, and a `lease_set` is a CAS against the held id. Pipelines batch
//! for real — operations are recorded and applied, in issue order, when the
//! first thunk from the batch resolves.
//!
//! A production deployment substitutes an adapter over a real memcached
//! connection with the same trait surface; this client backs integration
//! tests and local development.

mod memory;

pub use memory::{MemoryCacheClient, OpStats};
