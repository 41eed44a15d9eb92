//! End-to-end read-path scenarios: cache population, growth, invalidation,
//! and cross-request deduplication.

use bytes::Bytes;
use promo_dhash::{Entry, MemTable};

use crate::{fixture, BlacklistTable, KvTable};

#[test]
fn populate_then_serve_from_cache() {
    let f = fixture();
    let table = BlacklistTable::new(4);
    let hash = 0xfc345678;
    table.insert(hash, "blocked customer");

    // first request: nothing cached, everything built from the database
    let session = f.provider.new_session();
    let entries = session
        .new_hash("bl:cst", table.hash_db())
        .select_entries(hash)
        .resolve()
        .unwrap();
    session.finish();

    assert_eq!(entries, vec![Entry::new(hash, "blocked customer")]);
    assert_eq!(table.size_log_query_count(), 1);
    assert_eq!(table.select_query_count(), 1);

    // second request on a fresh session: memtable and bucket cache answer
    let session = f.provider.new_session();
    let entries = session
        .new_hash("bl:cst", table.hash_db())
        .select_entries(hash)
        .resolve()
        .unwrap();
    session.finish();

    assert_eq!(entries, vec![Entry::new(hash, "blocked customer")]);
    assert_eq!(table.size_log_query_count(), 1);
    assert_eq!(table.select_query_count(), 1);

    let stats = f.provider.stats();
    assert!(stats.hash_size_log_access >= stats.hash_size_log_miss);
    assert!(stats.hash_bucket_access >= stats.hash_bucket_miss);
}

#[test]
fn absent_hash_resolves_empty() {
    let f = fixture();
    let table = BlacklistTable::new(3);

    let session = f.provider.new_session();
    let entries = session
        .new_hash("bl:cst", table.hash_db())
        .select_entries(0x11223344)
        .resolve()
        .unwrap();
    session.finish();

    assert_eq!(entries, Vec::new());
}

// After the dataset grows, a reader holding the stale size-log heals through
// the dual-bucket read: the size-log refreshes from the database and the old
// bucket still serves the data.
#[test]
fn size_log_growth_heals_via_dual_read() {
    let f = fixture();
    let table = BlacklistTable::new(2);
    let hash = 0xdc345678;
    table.insert(hash, "merchant");

    // populate buckets and memtable at size-log 2
    let session = f.provider.new_session();
    let hash_handle = session.new_hash("bl:mch", table.hash_db());
    hash_handle.select_entries(hash).resolve().unwrap();
    session.finish();
    let selects_after_populate = table.select_query_count();

    // the dataset grows: new size-log in the database, cached size-log
    // dropped, buckets left alone
    table.set_size_log(3);
    let session = f.provider.new_session();
    let hash_handle = session.new_hash("bl:mch", table.hash_db());
    hash_handle.invalidate_size_log().resolve().unwrap();
    session.finish();

    // a reader with the stale memtable value still finds the entry, served
    // from the old bucket without a rebuild
    let session = f.provider.new_session();
    let entries = session
        .new_hash("bl:mch", table.hash_db())
        .select_entries(hash)
        .resolve()
        .unwrap();
    session.finish();

    assert_eq!(entries, vec![Entry::new(hash, "merchant")]);
    assert_eq!(table.select_query_count(), selects_after_populate);
    // the refreshed size-log reached the memtable
    assert_eq!(f.mem.get_num("bl:mch"), Some(3));
}

#[test]
fn invalidate_entry_rebuilds_from_database() {
    let f = fixture();
    let table = BlacklistTable::new(4);
    let hash = 0xfc345678;
    table.insert(hash, "old status");

    let session = f.provider.new_session();
    let hash_handle = session.new_hash("bl:trm", table.hash_db());
    hash_handle.select_entries(hash).resolve().unwrap();
    session.finish();

    // the row changes and the buckets holding it are invalidated
    table.update(hash, "new status");
    let session = f.provider.new_session();
    let hash_handle = session.new_hash("bl:trm", table.hash_db());
    hash_handle.invalidate_entry(4, hash).resolve().unwrap();
    session.finish();

    let selects_before = table.select_query_count();
    let session = f.provider.new_session();
    let entries = session
        .new_hash("bl:trm", table.hash_db())
        .select_entries(hash)
        .resolve()
        .unwrap();
    session.finish();

    assert_eq!(entries, vec![Entry::new(hash, "new status")]);
    assert_eq!(table.select_query_count(), selects_before + 1);
}

// Two requests for the same key in one session, issued before either thunk
// resolves: one underlying lease-get, one backing-store fetch of each kind,
// one lease-set of each key.
#[test]
fn concurrent_requests_collapse() {
    let f = fixture();
    let table = BlacklistTable::new(5);
    let hash = 0xdc345678;
    table.insert(hash, "entry");

    // prime the memtable, then empty the cache so both requests start cold
    let session = f.provider.new_session();
    let hash_handle = session.new_hash("bl:cst", table.hash_db());
    hash_handle.select_entries(hash).resolve().unwrap();
    session.finish();
    f.client.unsafe_flush_all();

    let ops_before = f.client.op_stats();
    let size_log_queries_before = table.size_log_query_count();
    let select_queries_before = table.select_query_count();

    let session = f.provider.new_session();
    let hash_handle = session.new_hash("bl:cst", table.hash_db());
    let first = hash_handle.select_entries(hash);
    let second = hash_handle.select_entries(hash);

    let first = first.resolve().unwrap();
    let second = second.resolve().unwrap();
    session.finish();

    assert_eq!(first, vec![Entry::new(hash, "entry")]);
    assert_eq!(first, second);

    // one size-log lease-get and one bucket lease-get hit the cache
    let ops = f.client.op_stats();
    assert_eq!(ops.lease_gets - ops_before.lease_gets, 2);
    assert_eq!(ops.gets - ops_before.gets, 2);
    assert_eq!(ops.lease_sets - ops_before.lease_sets, 2);

    // the batcher collapsed both requests into single backing-store queries
    assert_eq!(table.size_log_query_count(), size_log_queries_before + 1);
    assert_eq!(table.select_query_count(), select_queries_before + 1);
}

#[test]
fn store_round_trip_and_invalidate() {
    let f = fixture();
    let table = KvTable::new();
    table.insert("campaign:summer", "ten percent off");

    let session = f.provider.new_session();
    let store = session.new_store(table.store_db());
    let data = store.get("campaign:summer").resolve().unwrap();
    session.finish();

    assert_eq!(data, Bytes::from_static(b"ten percent off"));
    assert_eq!(table.query_count(), 1);

    // cached now: a new session reads without touching the table
    let session = f.provider.new_session();
    let store = session.new_store(table.store_db());
    let data = store.get("campaign:summer").resolve().unwrap();
    session.finish();

    assert_eq!(data, Bytes::from_static(b"ten percent off"));
    assert_eq!(table.query_count(), 1);

    // invalidation forces the next read back to the table
    table.insert("campaign:summer", "twenty percent off");
    let session = f.provider.new_session();
    let store = session.new_store(table.store_db());
    store.invalidate("campaign:summer").resolve().unwrap();
    let data = store.get("campaign:summer").resolve().unwrap();
    session.finish();

    assert_eq!(data, Bytes::from_static(b"twenty percent off"));
    assert_eq!(table.query_count(), 2);

    let stats = f.provider.stats();
    assert_eq!(stats.store_access, 3);
    assert_eq!(stats.store_miss, 2);
}
