//! Hash handle: lease-protected reads over one hash-partitioned namespace.
//!
//! `select_entries` resolves in up to three legs, each one scheduler round:
//! learn the namespace's size-log (memtable guess, cache, or database under a
//! lease), read the two candidate buckets (previous and current partitioning,
//! so a size-log transition never loses reads), and on a double miss build
//! the bucket from the database under a per-bucket lease. Rejected leases
//! back off on the session's configured duration list.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;

use crate::codec;
use crate::error::Error;
use crate::options::LeaseWait;
use crate::session::SessionCore;
use crate::slot::{bucket_key, next_slot, size_log_key, start_of_slot};
use crate::thunk::Thunk;
use crate::traits::HashDatabase;
use crate::types::{Entry, HashRange, LeaseGetResult};

/// Read handle for one namespace, bound to one session and one backing
/// store.
pub struct Hash {
    core: Rc<SessionCore>,
    db: Rc<dyn HashDatabase>,
    namespace: Rc<str>,
    size_log_key: Rc<str>,
}

impl Hash {
    pub(crate) fn new(core: Rc<SessionCore>, namespace: &str, db: Rc<dyn HashDatabase>) -> Hash {
        Hash {
            core,
            db,
            namespace: Rc::from(namespace),
            size_log_key: Rc::from(size_log_key(namespace).as_str()),
        }
    }

    /// All backing-store entries whose hash equals `hash`, served from the
    /// bucket cache when possible.
    pub fn select_entries(&self, hash: u32) -> Thunk<Vec<Entry>> {
        let action = Rc::new(SelectAction {
            core: self.core.clone(),
            db: self.db.clone(),
            namespace: self.namespace.clone(),
            size_log_key: self.size_log_key.clone(),
            hash,
            state: RefCell::new(SelectState::default()),
        });

        match self.core.mem.get_num(&self.namespace) {
            None => {
                action.issue_size_log_lease_get();
                let next = action.clone();
                self.core
                    .add_next_call(move || next.handle_size_log(AfterSizeLog::IssueBuckets));
            }
            Some(size_log) => {
                // speculate on the memtable value: read the buckets in the
                // same round as the size-log check
                action.state.borrow_mut().size_log = Some(size_log);
                action.issue_size_log_lease_get();
                action.issue_bucket_gets();
                let next = action.clone();
                self.core
                    .add_next_call(move || next.handle_size_log(AfterSizeLog::BucketsIssued));
            }
        }

        let core = self.core.clone();
        Thunk::new(move || {
            core.process_all_calls();
            action.output()
        })
    }

    /// Drop the cached size-log so the next read re-learns it from the
    /// database.
    pub fn invalidate_size_log(&self) -> Thunk<()> {
        self.core.with_pipeline(|p| p.delete(&self.size_log_key))
    }

    /// Drop the two buckets that may hold `hash` under the given size-log
    /// (previous and current partitioning). The first delete error
    /// short-circuits.
    pub fn invalidate_entry(&self, size_log: u64, hash: u32) -> Thunk<()> {
        let size_log = size_log as i64;
        let (first, second) = self.core.with_pipeline(|p| {
            (
                p.delete(&bucket_key(&self.namespace, size_log - 1, hash)),
                p.delete(&bucket_key(&self.namespace, size_log, hash)),
            )
        });
        Thunk::new(move || {
            first.resolve()?;
            second.resolve()
        })
    }
}

/// What to do once the authoritative size-log is in hand.
#[derive(Clone, Copy, PartialEq, Eq)]
enum AfterSizeLog {
    /// Bucket reads were issued speculatively from the memtable value; reuse
    /// them unless the size-log turned out different.
    BucketsIssued,
    /// Bucket reads still need to be issued.
    IssueBuckets,
}

#[derive(Default)]
struct SelectState {
    size_log: Option<u64>,
    size_log_lease: Option<u64>,
    bucket_lease: Option<u64>,
    size_log_wait: LeaseWait,
    bucket_wait: LeaseWait,
    size_log_thunk: Option<Thunk<LeaseGetResult>>,
    bucket_thunks: Option<(Thunk<Option<Bytes>>, Thunk<Option<Bytes>>)>,
    bucket_lease_thunk: Option<Thunk<LeaseGetResult>>,
    size_log_db_thunk: Option<Thunk<u64>>,
    entries_db_thunk: Option<Thunk<Vec<Entry>>>,
    results: Vec<Entry>,
    err: Option<Error>,
}

struct SelectAction {
    core: Rc<SessionCore>,
    db: Rc<dyn HashDatabase>,
    namespace: Rc<str>,
    size_log_key: Rc<str>,
    hash: u32,
    state: RefCell<SelectState>,
}

impl SelectAction {
    fn output(&self) -> Result<Vec<Entry>, Error> {
        let state = self.state.borrow();
        match &state.err {
            Some(err) => Err(err.clone()),
            None => Ok(state.results.clone()),
        }
    }

    fn fail(&self, err: Error) {
        self.state.borrow_mut().err = Some(err);
    }

    /// The first error freezes the action: later stages skip.
    fn frozen(&self) -> bool {
        self.state.borrow().err.is_some()
    }

    fn current_size_log(&self) -> i64 {
        self.state
            .borrow()
            .size_log
            .expect("size log not resolved yet") as i64
    }

    fn issue_size_log_lease_get(&self) {
        self.core.local.inc_size_log_access();
        let thunk = self.core.with_pipeline(|p| p.lease_get(&self.size_log_key));
        self.state.borrow_mut().size_log_thunk = Some(thunk);
    }

    fn issue_bucket_gets(&self) {
        let size_log = self.current_size_log();
        self.core.local.add_bucket_access(2);
        let previous = bucket_key(&self.namespace, size_log - 1, self.hash);
        let current = bucket_key(&self.namespace, size_log, self.hash);
        let thunks = self
            .core
            .with_pipeline(|p| (p.get(&previous), p.get(&current)));
        self.state.borrow_mut().bucket_thunks = Some(thunks);
    }

    // ── size-log leg ─────────────────────────────────────────────────────────

    fn handle_size_log(self: &Rc<Self>, after: AfterSizeLog) {
        if self.frozen() {
            return;
        }
        let thunk = self
            .state
            .borrow_mut()
            .size_log_thunk
            .take()
            .expect("size-log lease get not issued");
        let output = match thunk.resolve() {
            Ok(output) => output,
            Err(err) => return self.fail(err),
        };

        match output {
            LeaseGetResult::Found(data) => match parse_size_log(&data) {
                Some(value) => self.proceed_to_buckets(self.record_size_log(value), after),
                None => self.fail(Error::InvalidSizeLog),
            },
            LeaseGetResult::Granted { lease_id } => {
                self.core.local.inc_size_log_miss();
                tracing::debug!(
                    namespace = %self.namespace,
                    lease_id,
                    "size-log lease granted, loading from database"
                );
                {
                    let mut state = self.state.borrow_mut();
                    state.size_log_lease = Some(lease_id);
                    state.size_log_db_thunk = Some(self.db.get_size_log());
                }
                let next = self.clone();
                self.core
                    .add_next_call(move || next.handle_size_log_from_db(after));
            }
            LeaseGetResult::Rejected => {
                self.core.local.inc_size_log_miss();
                let backoff = self
                    .state
                    .borrow_mut()
                    .size_log_wait
                    .next_backoff(&self.core.options);
                match backoff {
                    Some(duration) => {
                        tracing::trace!(
                            key = %self.size_log_key,
                            ?duration,
                            "size-log lease rejected, backing off"
                        );
                        let retry = self.clone();
                        self.core.add_delayed_call(duration, move || {
                            if retry.frozen() {
                                return;
                            }
                            retry.issue_size_log_lease_get();
                            retry.handle_size_log(after);
                        });
                    }
                    None if self.core.options.failed_on_wait_finished => {
                        self.fail(Error::LeaseNotGranted)
                    }
                    None => {
                        // wait exhausted: drop the contended key and serve
                        // from the database without writing the cache
                        self.core.with_pipeline(|p| p.delete(&self.size_log_key));
                        self.state.borrow_mut().size_log_db_thunk = Some(self.db.get_size_log());
                        let next = self.clone();
                        self.core
                            .add_next_call(move || next.handle_size_log_from_db(after));
                    }
                }
            }
        }
    }

    fn handle_size_log_from_db(self: &Rc<Self>, after: AfterSizeLog) {
        if self.frozen() {
            return;
        }
        let thunk = self
            .state
            .borrow_mut()
            .size_log_db_thunk
            .take()
            .expect("size-log database thunk not issued");
        let value = match thunk.resolve() {
            Ok(value) => value,
            Err(err) => return self.fail(err),
        };

        let changed = self.record_size_log(value);
        let lease = self.state.borrow_mut().size_log_lease.take();
        if let Some(lease_id) = lease {
            let ttl = self.core.options.lease_set_ttl;
            self.core.with_pipeline(|p| {
                p.lease_set(
                    &self.size_log_key,
                    Bytes::from(value.to_string()),
                    lease_id,
                    ttl,
                )
            });
        }
        self.proceed_to_buckets(changed, after);
    }

    /// Store the authoritative size-log, refreshing the memtable when it
    /// moved. Returns whether it differed from the prior belief.
    fn record_size_log(&self, value: u64) -> bool {
        let changed = {
            let mut state = self.state.borrow_mut();
            let changed = state.size_log != Some(value);
            if changed {
                state.size_log = Some(value);
            }
            changed
        };
        if changed {
            tracing::debug!(namespace = %self.namespace, size_log = value, "size-log refreshed");
            self.core.mem.set_num(&self.namespace, value);
        }
        changed
    }

    fn proceed_to_buckets(self: &Rc<Self>, changed: bool, after: AfterSizeLog) {
        if !changed && after == AfterSizeLog::BucketsIssued {
            // the speculative reads were for the right partitioning
            self.handle_buckets();
        } else {
            self.issue_bucket_gets();
            let next = self.clone();
            self.core.add_next_call(move || next.handle_buckets());
        }
    }

    // ── bucket leg ───────────────────────────────────────────────────────────

    fn handle_buckets(self: &Rc<Self>) {
        if self.frozen() {
            return;
        }
        let (previous, current) = self
            .state
            .borrow_mut()
            .bucket_thunks
            .take()
            .expect("bucket gets not issued");
        let previous = match previous.resolve() {
            Ok(output) => output,
            Err(err) => return self.fail(err),
        };
        let current = match current.resolve() {
            Ok(output) => output,
            Err(err) => return self.fail(err),
        };

        let Some(data) = current.or(previous) else {
            self.core.local.inc_bucket_miss();
            self.issue_bucket_lease_get();
            let next = self.clone();
            self.core.add_next_call(move || next.handle_bucket_lease());
            return;
        };

        match codec::decode_entries(&data) {
            Ok(entries) => {
                let hash = self.hash;
                self.state.borrow_mut().results =
                    entries.into_iter().filter(|e| e.hash == hash).collect();
            }
            Err(err) => self.fail(err.into()),
        }
    }

    fn issue_bucket_lease_get(&self) {
        let key = bucket_key(&self.namespace, self.current_size_log(), self.hash);
        let thunk = self.core.with_pipeline(|p| p.lease_get(&key));
        self.state.borrow_mut().bucket_lease_thunk = Some(thunk);
    }

    fn handle_bucket_lease(self: &Rc<Self>) {
        if self.frozen() {
            return;
        }
        let thunk = self
            .state
            .borrow_mut()
            .bucket_lease_thunk
            .take()
            .expect("bucket lease get not issued");
        let output = match thunk.resolve() {
            Ok(output) => output,
            Err(err) => return self.fail(err),
        };

        match output {
            // bucket data in the cache is already scoped to the slot: no
            // per-hash filter on this path
            LeaseGetResult::Found(data) => match codec::decode_entries(&data) {
                Ok(entries) => self.state.borrow_mut().results = entries,
                Err(err) => self.fail(err.into()),
            },
            LeaseGetResult::Granted { lease_id } => {
                self.state.borrow_mut().bucket_lease = Some(lease_id);
                self.issue_entries_db_select();
                let next = self.clone();
                self.core.add_next_call(move || next.handle_bucket_from_db());
            }
            LeaseGetResult::Rejected => {
                let backoff = self
                    .state
                    .borrow_mut()
                    .bucket_wait
                    .next_backoff(&self.core.options);
                match backoff {
                    Some(duration) => {
                        let retry = self.clone();
                        self.core.add_delayed_call(duration, move || {
                            if retry.frozen() {
                                return;
                            }
                            retry.issue_bucket_lease_get();
                            retry.handle_bucket_lease();
                        });
                    }
                    None if self.core.options.failed_on_wait_finished => {
                        self.fail(Error::LeaseNotGranted)
                    }
                    None => {
                        let key = bucket_key(&self.namespace, self.current_size_log(), self.hash);
                        self.core.with_pipeline(|p| p.delete(&key));
                        self.issue_entries_db_select();
                        let next = self.clone();
                        self.core.add_next_call(move || next.handle_bucket_from_db());
                    }
                }
            }
        }
    }

    fn issue_entries_db_select(&self) {
        let size_log = self.current_size_log();
        let range = HashRange {
            begin: start_of_slot(self.hash, size_log),
            end: next_slot(self.hash, size_log),
        };
        self.state.borrow_mut().entries_db_thunk = Some(self.db.select_entries(range));
    }

    fn handle_bucket_from_db(self: &Rc<Self>) {
        if self.frozen() {
            return;
        }
        let thunk = self
            .state
            .borrow_mut()
            .entries_db_thunk
            .take()
            .expect("entries database thunk not issued");
        let entries = match thunk.resolve() {
            Ok(entries) => entries,
            Err(err) => return self.fail(err),
        };

        let lease = self.state.borrow_mut().bucket_lease.take();
        if let Some(lease_id) = lease {
            let key = bucket_key(&self.namespace, self.current_size_log(), self.hash);
            let ttl = self.core.options.lease_set_ttl;
            self.core
                .with_pipeline(|p| p.lease_set(&key, codec::encode_entries(&entries), lease_id, ttl));
        }
        self.state.borrow_mut().results = entries;
    }
}

fn parse_size_log(data: &[u8]) -> Option<u64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}
