//! promo-memtable — process-local size-log memoization cache.
//!
//! A capacity-bounded LRU of `namespace → u64` shared by every session in
//! the process. The engine's [`MemTable`] contract is deliberately weak
//! (entries may vanish at any time), so a plain LRU under a mutex more than
//! satisfies it.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use promo_dhash::MemTable;

pub struct LruMemTable {
    cache: Mutex<LruCache<String, u64>>,
}

impl LruMemTable {
    /// A memtable holding at most `capacity` namespaces. A zero capacity is
    /// clamped to one.
    pub fn new(capacity: usize) -> LruMemTable {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("clamped to at least one");
        LruMemTable {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl MemTable for LruMemTable {
    fn get_num(&self, key: &str) -> Option<u64> {
        self.cache.lock().get(key).copied()
    }

    fn set_num(&self, key: &str, num: u64) {
        self.cache.lock().put(key.to_owned(), num);
    }
}
