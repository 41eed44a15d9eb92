//! Provider/session lifecycle and the cooperative session scheduler.
//!
//! A session is single-threaded: one caller-owned thread drives it to
//! quiescence whenever it resolves a thunk. The scheduler runs in *rounds*.
//! Each round starts with a dedup-pipeline reset, then runs every
//! continuation queued so far; continuations typically record batched cache
//! operations and queue follow-up continuations for the next round, so all
//! operations of one round flush together on the first resolve. Once the
//! immediate queue drains, the scheduler sleeps until the earliest delayed
//! continuation (lease-retry backoffs) and coalesces any other delayed
//! continuations due within a small slack into the same round.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::dedup::DedupPipeline;
use crate::delay::{Continuation, DelayQueue};
use crate::hash::Hash;
use crate::options::SessionOptions;
use crate::store::Store;
use crate::traits::{CacheClient, HashDatabase, MemTable, StoreDatabase};

/// Delayed continuations due within this window of the one just slept for
/// join its round instead of sleeping again.
const SCHEDULE_SLACK: Duration = Duration::from_micros(200);

/// Clock and sleep source for the scheduler. Injectable so tests can observe
/// the exact backoff sequence.
pub trait Timer: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Timer backed by the system clock.
pub struct SystemTimer;

impl Timer for SystemTimer {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

// ── Counters ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SharedStats {
    hash_size_log_access: AtomicU64,
    hash_size_log_miss: AtomicU64,
    hash_bucket_access: AtomicU64,
    hash_bucket_miss: AtomicU64,
    store_access: AtomicU64,
    store_miss: AtomicU64,
}

/// Snapshot of the provider-wide access counters. All counters are
/// monotonically non-decreasing and each access counter dominates its miss
/// counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hash_size_log_access: u64,
    pub hash_size_log_miss: u64,
    pub hash_bucket_access: u64,
    pub hash_bucket_miss: u64,
    pub store_access: u64,
    pub store_miss: u64,
}

/// Session-local counters, accumulated without atomics and flushed into the
/// provider on finish.
#[derive(Default)]
pub(crate) struct LocalStats {
    size_log_access: Cell<u64>,
    size_log_miss: Cell<u64>,
    bucket_access: Cell<u64>,
    bucket_miss: Cell<u64>,
    store_access: Cell<u64>,
    store_miss: Cell<u64>,
}

impl LocalStats {
    pub(crate) fn inc_size_log_access(&self) {
        self.size_log_access.set(self.size_log_access.get() + 1);
    }

    pub(crate) fn inc_size_log_miss(&self) {
        self.size_log_miss.set(self.size_log_miss.get() + 1);
    }

    pub(crate) fn add_bucket_access(&self, n: u64) {
        self.bucket_access.set(self.bucket_access.get() + n);
    }

    pub(crate) fn inc_bucket_miss(&self) {
        self.bucket_miss.set(self.bucket_miss.get() + 1);
    }

    pub(crate) fn inc_store_access(&self) {
        self.store_access.set(self.store_access.get() + 1);
    }

    pub(crate) fn inc_store_miss(&self) {
        self.store_miss.set(self.store_miss.get() + 1);
    }

    fn flush_into(&self, shared: &SharedStats) {
        shared
            .hash_size_log_access
            .fetch_add(self.size_log_access.take(), Ordering::Relaxed);
        shared
            .hash_size_log_miss
            .fetch_add(self.size_log_miss.take(), Ordering::Relaxed);
        shared
            .hash_bucket_access
            .fetch_add(self.bucket_access.take(), Ordering::Relaxed);
        shared
            .hash_bucket_miss
            .fetch_add(self.bucket_miss.take(), Ordering::Relaxed);
        shared
            .store_access
            .fetch_add(self.store_access.take(), Ordering::Relaxed);
        shared
            .store_miss
            .fetch_add(self.store_miss.take(), Ordering::Relaxed);
    }
}

// ── Provider ─────────────────────────────────────────────────────────────────

/// Shared entry point: holds the memtable, the cache-client factory, the
/// timer, and the provider-wide counters. Safe to share across threads;
/// sessions created from it are not.
pub struct Provider {
    mem: Arc<dyn MemTable>,
    client: Arc<dyn CacheClient>,
    timer: Arc<dyn Timer>,
    options: SessionOptions,
    stats: Arc<SharedStats>,
}

impl Provider {
    pub fn new(mem: Arc<dyn MemTable>, client: Arc<dyn CacheClient>) -> Provider {
        Provider {
            mem,
            client,
            timer: Arc::new(SystemTimer),
            options: SessionOptions::default(),
            stats: Arc::new(SharedStats::default()),
        }
    }

    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Provider {
        self.timer = timer;
        self
    }

    pub fn with_options(mut self, options: SessionOptions) -> Provider {
        self.options = options;
        self
    }

    pub fn new_session(&self) -> Session {
        Session {
            core: Rc::new(SessionCore {
                mem: self.mem.clone(),
                timer: self.timer.clone(),
                options: self.options.clone(),
                local: LocalStats::default(),
                pipeline: RefCell::new(DedupPipeline::new(self.client.pipeline())),
                next_calls: RefCell::new(Vec::new()),
                delayed: RefCell::new(DelayQueue::new()),
                shared: self.stats.clone(),
                finished: Cell::new(false),
            }),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hash_size_log_access: self.stats.hash_size_log_access.load(Ordering::Relaxed),
            hash_size_log_miss: self.stats.hash_size_log_miss.load(Ordering::Relaxed),
            hash_bucket_access: self.stats.hash_bucket_access.load(Ordering::Relaxed),
            hash_bucket_miss: self.stats.hash_bucket_miss.load(Ordering::Relaxed),
            store_access: self.stats.store_access.load(Ordering::Relaxed),
            store_miss: self.stats.store_miss.load(Ordering::Relaxed),
        }
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

/// One unit of request-scoped work. Hands out [`Hash`] and [`Store`] handles
/// bound to it; resolving any thunk from those handles drives the whole
/// session to quiescence. Must be finished; dropping an unfinished session
/// finishes it.
pub struct Session {
    core: Rc<SessionCore>,
}

impl Session {
    pub fn new_hash(&self, namespace: &str, db: Rc<dyn HashDatabase>) -> Hash {
        Hash::new(self.core.clone(), namespace, db)
    }

    pub fn new_store(&self, db: Rc<dyn StoreDatabase>) -> Store {
        Store::new(self.core.clone(), db)
    }

    /// Flushes counters into the provider and flushes the underlying
    /// pipeline.
    pub fn finish(self) {
        self.core.finish();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.core.finish();
    }
}

pub(crate) struct SessionCore {
    pub(crate) mem: Arc<dyn MemTable>,
    pub(crate) timer: Arc<dyn Timer>,
    pub(crate) options: SessionOptions,
    pub(crate) local: LocalStats,
    pipeline: RefCell<DedupPipeline>,
    next_calls: RefCell<Vec<Continuation>>,
    delayed: RefCell<DelayQueue>,
    shared: Arc<SharedStats>,
    finished: Cell<bool>,
}

impl SessionCore {
    /// Queue a continuation for the next round.
    pub(crate) fn add_next_call(&self, call: impl FnOnce() + 'static) {
        self.next_calls.borrow_mut().push(Box::new(call));
    }

    /// Queue a continuation to run `delay` from now.
    pub(crate) fn add_delayed_call(&self, delay: Duration, call: impl FnOnce() + 'static) {
        let due = self.timer.now() + delay;
        self.delayed.borrow_mut().push(due, Box::new(call));
    }

    /// Run a pipeline operation. The borrow is scoped to the operation so
    /// continuations invoked by the scheduler can issue their own.
    pub(crate) fn with_pipeline<R>(&self, op: impl FnOnce(&mut DedupPipeline) -> R) -> R {
        op(&mut self.pipeline.borrow_mut())
    }

    /// The drain loop. Runs immediate rounds to exhaustion, then advances
    /// time to the earliest delayed continuation, until both queues are
    /// empty.
    pub(crate) fn process_all_calls(&self) {
        loop {
            loop {
                let batch = std::mem::take(&mut *self.next_calls.borrow_mut());
                if batch.is_empty() {
                    break;
                }
                self.pipeline.borrow_mut().reset();
                for call in batch {
                    call();
                }
            }

            let next = self.delayed.borrow_mut().pop();
            let Some((due, call)) = next else {
                return;
            };
            let now = self.timer.now();
            if due > now {
                self.timer.sleep(due - now);
            }
            self.pipeline.borrow_mut().reset();
            call();

            // Delayed continuations due within the slack belong to the same
            // round: run them now, with no reset in between.
            let horizon = self.timer.now() + SCHEDULE_SLACK;
            loop {
                let next = {
                    let mut delayed = self.delayed.borrow_mut();
                    match delayed.next_due() {
                        Some(due) if due <= horizon => delayed.pop(),
                        _ => None,
                    }
                };
                let Some((_, call)) = next else {
                    break;
                };
                call();
            }
        }
    }

    pub(crate) fn finish(&self) {
        if self.finished.replace(true) {
            return;
        }
        self.local.flush_into(&self.shared);
        self.pipeline.borrow_mut().finish();
        tracing::trace!("session finished");
    }
}
