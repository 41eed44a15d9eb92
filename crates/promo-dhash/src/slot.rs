//! Hash-slot math and cache key rendering.
//!
//! A namespace with size-log `s` partitions the 32-bit hash space into `2^s`
//! slots of width `2^(32-s)`. A slot is named by its prefix: the top `s` bits
//! of a hash, zero-extended to 32 bits.
//!
//! `size_log` is signed because the engine probes the previous partitioning
//! at `size_log - 1`, which is `-1` when the current size-log is 0. The `-1`
//! sentinel renders into a key that can never have been written, so the probe
//! is a guaranteed miss.

/// Inclusive lower bound of the slot containing `hash`.
pub fn start_of_slot(hash: u32, size_log: i64) -> u32 {
    if size_log <= 0 {
        0
    } else if size_log >= 32 {
        hash
    } else {
        hash & (u32::MAX << (32 - size_log as u32))
    }
}

/// Exclusive upper bound of the slot containing `hash`, or `None` when the
/// bound does not fit in 32 bits (the slot is unbounded above).
pub fn next_slot(hash: u32, size_log: i64) -> Option<u32> {
    let width = 1u64 << (32 - size_log.clamp(0, 32)) as u32;
    let end = u64::from(start_of_slot(hash, size_log)) + width;
    u32::try_from(end).ok()
}

/// Cache key of the bucket holding `hash` under the given partitioning:
/// `"{ns}:{size_log}:{slot_prefix}"` with the prefix as 8 lowercase hex
/// digits.
pub fn bucket_key(namespace: &str, size_log: i64, hash: u32) -> String {
    let slot = start_of_slot(hash, size_log);
    format!("{namespace}:{size_log}:{slot:08x}")
}

/// Cache key of the namespace's size-log value (decimal ASCII).
pub fn size_log_key(namespace: &str) -> String {
    format!("{namespace}:size-log")
}
