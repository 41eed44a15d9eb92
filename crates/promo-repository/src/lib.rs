//! promo-repository — request-scoped glue between the dhash engine and a
//! backing store.
//!
//! [`BatchedHashDatabase`] collapses the many `get_size_log`/`select_entries`
//! thunks a scheduler round produces into one combined backing-store fetch.
//! [`hash_func`] is the caller-side stable hash that turns a natural key
//! (phone number, merchant code, voucher code) into the engine's 32-bit
//! partitioning hash.

mod batch;

pub use batch::BatchedHashDatabase;

/// Stable 32-bit hash of a natural key. Must never change for a deployed
/// dataset: it determines bucket placement in the shared cache.
pub fn hash_func(key: &str) -> u32 {
    fxhash::hash32(key)
}
