//! Promo integration harness.
//!
//! End-to-end in one process: the real engine driving the in-memory cache
//! client and fake backing-store tables. Every test builds its own provider,
//! cache, and memtable so tests never share state.
//!
//!   cargo test --test integration

mod contention;
mod scenarios;

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};

use bytes::Bytes;

use promo_cacheclient::MemoryCacheClient;
use promo_dhash::{Entry, Error, HashDatabase, Provider, StoreDatabase, Thunk};
use promo_memtable::LruMemTable;
use promo_repository::BatchedHashDatabase;

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ── Fixture ───────────────────────────────────────────────────────────────────

pub struct Fixture {
    pub client: MemoryCacheClient,
    pub mem: Arc<LruMemTable>,
    pub provider: Provider,
}

pub fn fixture() -> Fixture {
    init_tracing();
    let client = MemoryCacheClient::new();
    let mem = Arc::new(LruMemTable::new(1024));
    let provider = Provider::new(mem.clone(), Arc::new(client.clone()));
    Fixture {
        client,
        mem,
        provider,
    }
}

// ── Fake blacklist table ──────────────────────────────────────────────────────

/// Stand-in for the SQL side of a hash-partitioned blacklist: rows keyed by
/// hash plus the dataset's current size-log, with query counters so tests
/// can assert how often the "database" was actually hit.
#[derive(Default)]
pub struct BlacklistTable {
    rows: Mutex<Vec<Entry>>,
    size_log: AtomicU64,
    size_log_queries: AtomicU64,
    select_queries: AtomicU64,
}

impl BlacklistTable {
    pub fn new(size_log: u64) -> Arc<BlacklistTable> {
        let table = BlacklistTable::default();
        table.size_log.store(size_log, Ordering::Relaxed);
        Arc::new(table)
    }

    pub fn insert(&self, hash: u32, data: impl Into<Bytes>) {
        self.rows.lock().unwrap().push(Entry::new(hash, data));
    }

    pub fn update(&self, hash: u32, data: impl Into<Bytes>) {
        let data = data.into();
        let mut rows = self.rows.lock().unwrap();
        for row in rows.iter_mut().filter(|row| row.hash == hash) {
            row.data = data.clone();
        }
    }

    pub fn set_size_log(&self, size_log: u64) {
        self.size_log.store(size_log, Ordering::Relaxed);
    }

    pub fn size_log_query_count(&self) -> u64 {
        self.size_log_queries.load(Ordering::Relaxed)
    }

    pub fn select_query_count(&self) -> u64 {
        self.select_queries.load(Ordering::Relaxed)
    }

    /// A fresh request-scoped batcher over this table. One per session, the
    /// way a service builds one per request.
    pub fn hash_db(self: &Arc<BlacklistTable>) -> Rc<dyn HashDatabase> {
        let for_size_log = self.clone();
        let for_select = self.clone();
        Rc::new(BatchedHashDatabase::new(
            move || {
                for_size_log
                    .size_log_queries
                    .fetch_add(1, Ordering::Relaxed);
                Ok(for_size_log.size_log.load(Ordering::Relaxed))
            },
            move |ranges| {
                for_select.select_queries.fetch_add(1, Ordering::Relaxed);
                let rows = for_select.rows.lock().unwrap();
                Ok(rows
                    .iter()
                    .filter(|row| ranges.iter().any(|range| range.contains(row.hash)))
                    .cloned()
                    .collect())
            },
        ))
    }
}

// ── Fake key/value table ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct KvTable {
    rows: Mutex<HashMap<String, Bytes>>,
    queries: AtomicU64,
}

impl KvTable {
    pub fn new() -> Arc<KvTable> {
        Arc::new(KvTable::default())
    }

    pub fn insert(&self, key: &str, data: impl Into<Bytes>) {
        self.rows
            .lock()
            .unwrap()
            .insert(key.to_owned(), data.into());
    }

    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    pub fn store_db(self: &Arc<KvTable>) -> Rc<dyn StoreDatabase> {
        Rc::new(KvDatabase {
            table: self.clone(),
        })
    }
}

pub struct KvDatabase {
    table: Arc<KvTable>,
}

impl StoreDatabase for KvDatabase {
    fn get(&self, key: &str) -> Thunk<Bytes> {
        let table = self.table.clone();
        let key = key.to_owned();
        Thunk::new(move || {
            table.queries.fetch_add(1, Ordering::Relaxed);
            table
                .rows
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .ok_or_else(|| Error::upstream(anyhow::anyhow!("key not found: {key}")))
        })
    }
}
