//! The in-memory cache store and its pipelined client.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;

use promo_dhash::{CacheClient, CachePipeline, LeaseGetResult, Thunk};

/// Counts of operations actually applied to the store, i.e. after per-round
/// deduplication upstream. Useful for asserting cache traffic in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpStats {
    pub gets: u64,
    pub lease_gets: u64,
    pub lease_sets: u64,
    pub deletes: u64,
}

#[derive(Clone)]
enum Slot {
    Value(Bytes),
    Leased { lease_id: u64 },
}

#[derive(Default)]
struct CacheState {
    slots: DashMap<String, Slot>,
    lease_counter: AtomicU64,
    gets: AtomicU64,
    lease_gets: AtomicU64,
    lease_sets: AtomicU64,
    deletes: AtomicU64,
}

/// Shared in-memory cache. Clones share the same store; safe to use from
/// many sessions and threads at once.
#[derive(Default, Clone)]
pub struct MemoryCacheClient {
    state: Arc<CacheState>,
}

impl MemoryCacheClient {
    pub fn new() -> MemoryCacheClient {
        MemoryCacheClient::default()
    }

    /// Drop every key and lease. Test hook.
    pub fn unsafe_flush_all(&self) {
        self.state.slots.clear();
    }

    pub fn op_stats(&self) -> OpStats {
        OpStats {
            gets: self.state.gets.load(Ordering::Relaxed),
            lease_gets: self.state.lease_gets.load(Ordering::Relaxed),
            lease_sets: self.state.lease_sets.load(Ordering::Relaxed),
            deletes: self.state.deletes.load(Ordering::Relaxed),
        }
    }
}

impl CacheClient for MemoryCacheClient {
    fn pipeline(&self) -> Box<dyn CachePipeline> {
        Box::new(MemoryPipeline {
            state: self.state.clone(),
            pending: Rc::new(RefCell::new(Vec::new())),
            finished: false,
        })
    }
}

enum Op {
    Get { key: String },
    LeaseGet { key: String },
    LeaseSet { key: String, value: Bytes, lease_id: u64 },
    Delete { key: String },
}

enum OpResult {
    Get(Option<Bytes>),
    LeaseGet(LeaseGetResult),
    Done,
}

struct PendingOp {
    op: Op,
    slot: Rc<RefCell<Option<OpResult>>>,
}

struct MemoryPipeline {
    state: Arc<CacheState>,
    pending: Rc<RefCell<Vec<PendingOp>>>,
    finished: bool,
}

impl MemoryPipeline {
    fn push(&mut self, op: Op) -> Rc<RefCell<Option<OpResult>>> {
        let slot = Rc::new(RefCell::new(None));
        self.pending.borrow_mut().push(PendingOp {
            op,
            slot: slot.clone(),
        });
        slot
    }
}

/// Apply every recorded operation, in issue order. Called by the first thunk
/// of a batch to resolve; later thunks find their slot already filled.
fn flush(state: &CacheState, pending: &RefCell<Vec<PendingOp>>) {
    let ops = std::mem::take(&mut *pending.borrow_mut());
    if ops.is_empty() {
        return;
    }
    tracing::trace!(ops = ops.len(), "flushing pipeline batch");
    for PendingOp { op, slot } in ops {
        let result = apply(state, op);
        *slot.borrow_mut() = Some(result);
    }
}

fn apply(state: &CacheState, op: Op) -> OpResult {
    match op {
        Op::Get { key } => {
            state.gets.fetch_add(1, Ordering::Relaxed);
            let value = match state.slots.get(&key).as_deref() {
                Some(Slot::Value(data)) => Some(data.clone()),
                // a leased key has no readable value yet
                _ => None,
            };
            OpResult::Get(value)
        }
        Op::LeaseGet { key } => {
            state.lease_gets.fetch_add(1, Ordering::Relaxed);
            let outcome = match state.slots.entry(key) {
                MapEntry::Occupied(occupied) => match occupied.get() {
                    Slot::Value(data) => LeaseGetResult::Found(data.clone()),
                    Slot::Leased { .. } => LeaseGetResult::Rejected,
                },
                MapEntry::Vacant(vacant) => {
                    let lease_id = state.lease_counter.fetch_add(1, Ordering::Relaxed) + 1;
                    vacant.insert(Slot::Leased { lease_id });
                    LeaseGetResult::Granted { lease_id }
                }
            };
            OpResult::LeaseGet(outcome)
        }
        Op::LeaseSet { key, value, lease_id } => {
            state.lease_sets.fetch_add(1, Ordering::Relaxed);
            if let MapEntry::Occupied(mut occupied) = state.slots.entry(key) {
                if matches!(occupied.get(), Slot::Leased { lease_id: held } if *held == lease_id) {
                    occupied.insert(Slot::Value(value));
                }
                // stale lease id: silent no-op, exactly like memcached CAS
            }
            OpResult::Done
        }
        Op::Delete { key } => {
            state.deletes.fetch_add(1, Ordering::Relaxed);
            state.slots.remove(&key);
            OpResult::Done
        }
    }
}

impl CachePipeline for MemoryPipeline {
    fn get(&mut self, key: &str) -> Thunk<Option<Bytes>> {
        let slot = self.push(Op::Get { key: key.to_owned() });
        let state = self.state.clone();
        let pending = self.pending.clone();
        Thunk::new(move || {
            flush(&state, &pending);
            match slot.borrow_mut().take() {
                Some(OpResult::Get(value)) => Ok(value),
                _ => unreachable!("get slot filled with a foreign result"),
            }
        })
    }

    fn lease_get(&mut self, key: &str) -> Thunk<LeaseGetResult> {
        let slot = self.push(Op::LeaseGet { key: key.to_owned() });
        let state = self.state.clone();
        let pending = self.pending.clone();
        Thunk::new(move || {
            flush(&state, &pending);
            match slot.borrow_mut().take() {
                Some(OpResult::LeaseGet(outcome)) => Ok(outcome),
                _ => unreachable!("lease_get slot filled with a foreign result"),
            }
        })
    }

    fn lease_set(&mut self, key: &str, value: Bytes, lease_id: u64, _ttl: u32) -> Thunk<()> {
        // TTL is accepted for interface parity; the in-memory store does not
        // expire values
        let slot = self.push(Op::LeaseSet {
            key: key.to_owned(),
            value,
            lease_id,
        });
        let state = self.state.clone();
        let pending = self.pending.clone();
        Thunk::new(move || {
            flush(&state, &pending);
            slot.borrow_mut().take();
            Ok(())
        })
    }

    fn delete(&mut self, key: &str) -> Thunk<()> {
        let slot = self.push(Op::Delete { key: key.to_owned() });
        let state = self.state.clone();
        let pending = self.pending.clone();
        Thunk::new(move || {
            flush(&state, &pending);
            slot.borrow_mut().take();
            Ok(())
        })
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        flush(&self.state, &self.pending);
    }
}
