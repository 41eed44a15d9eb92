//! Hand-rolled scripted doubles for the collaborator traits. Keyed scripts
//! plus recorded call logs; the default lease-get outcome is `Rejected` and
//! the default get outcome is a miss, so tests only script the interesting
//! paths.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::Error;
use crate::thunk::Thunk;
use crate::traits::{CacheClient, CachePipeline, HashDatabase, MemTable, StoreDatabase};
use crate::types::{Entry, HashRange, LeaseGetResult};

pub(crate) fn found(data: &'static str) -> LeaseGetResult {
    LeaseGetResult::Found(Bytes::from_static(data.as_bytes()))
}

pub(crate) fn granted(lease_id: u64) -> LeaseGetResult {
    LeaseGetResult::Granted { lease_id }
}

pub(crate) fn rejected() -> LeaseGetResult {
    LeaseGetResult::Rejected
}

// ── Cache ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct LeaseSetCall {
    pub(crate) key: String,
    pub(crate) value: Bytes,
    pub(crate) lease_id: u64,
    pub(crate) ttl: u32,
}

#[derive(Default)]
pub(crate) struct MockCacheState {
    pub(crate) get_data: Mutex<HashMap<String, Bytes>>,
    pub(crate) lease_get_scripts: Mutex<HashMap<String, VecDeque<LeaseGetResult>>>,
    pub(crate) get_calls: Mutex<Vec<String>>,
    pub(crate) lease_get_calls: Mutex<Vec<String>>,
    pub(crate) lease_set_calls: Mutex<Vec<LeaseSetCall>>,
    pub(crate) delete_calls: Mutex<Vec<String>>,
    pub(crate) finish_calls: Mutex<u32>,
}

#[derive(Default, Clone)]
pub(crate) struct MockCache {
    pub(crate) state: Arc<MockCacheState>,
}

impl MockCache {
    /// Value returned (as found) by plain `get`s on `key`.
    pub(crate) fn put_get_data(&self, key: &str, data: Bytes) {
        self.state
            .get_data
            .lock()
            .unwrap()
            .insert(key.to_owned(), data);
    }

    /// Outcomes returned by successive `lease_get`s on `key`. Running past
    /// the script is a test bug and panics.
    pub(crate) fn script_lease_get(&self, key: &str, outcomes: Vec<LeaseGetResult>) {
        self.state
            .lease_get_scripts
            .lock()
            .unwrap()
            .insert(key.to_owned(), outcomes.into());
    }
}

impl CacheClient for MockCache {
    fn pipeline(&self) -> Box<dyn CachePipeline> {
        Box::new(MockPipeline {
            state: self.state.clone(),
        })
    }
}

struct MockPipeline {
    state: Arc<MockCacheState>,
}

impl CachePipeline for MockPipeline {
    fn get(&mut self, key: &str) -> Thunk<Option<Bytes>> {
        self.state.get_calls.lock().unwrap().push(key.to_owned());
        let value = self.state.get_data.lock().unwrap().get(key).cloned();
        Thunk::new(move || Ok(value))
    }

    fn lease_get(&mut self, key: &str) -> Thunk<LeaseGetResult> {
        self.state
            .lease_get_calls
            .lock()
            .unwrap()
            .push(key.to_owned());
        let outcome = match self.state.lease_get_scripts.lock().unwrap().get_mut(key) {
            None => LeaseGetResult::Rejected,
            Some(script) => script
                .pop_front()
                .unwrap_or_else(|| panic!("lease_get script for {key} exhausted")),
        };
        Thunk::new(move || Ok(outcome))
    }

    fn lease_set(&mut self, key: &str, value: Bytes, lease_id: u64, ttl: u32) -> Thunk<()> {
        self.state.lease_set_calls.lock().unwrap().push(LeaseSetCall {
            key: key.to_owned(),
            value,
            lease_id,
            ttl,
        });
        Thunk::ready(Ok(()))
    }

    fn delete(&mut self, key: &str) -> Thunk<()> {
        self.state.delete_calls.lock().unwrap().push(key.to_owned());
        Thunk::ready(Ok(()))
    }

    fn finish(&mut self) {
        *self.state.finish_calls.lock().unwrap() += 1;
    }
}

// ── Memtable ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct MockMemTable {
    values: Mutex<HashMap<String, u64>>,
    pub(crate) get_calls: Mutex<Vec<String>>,
    pub(crate) set_calls: Mutex<Vec<(String, u64)>>,
}

impl MockMemTable {
    /// Seed a value without recording a set call.
    pub(crate) fn preload(&self, key: &str, num: u64) {
        self.values.lock().unwrap().insert(key.to_owned(), num);
    }
}

impl MemTable for MockMemTable {
    fn get_num(&self, key: &str) -> Option<u64> {
        self.get_calls.lock().unwrap().push(key.to_owned());
        self.values.lock().unwrap().get(key).copied()
    }

    fn set_num(&self, key: &str, num: u64) {
        self.set_calls.lock().unwrap().push((key.to_owned(), num));
        self.values.lock().unwrap().insert(key.to_owned(), num);
    }
}

// ── Timer ────────────────────────────────────────────────────────────────────

/// Virtual clock: `sleep` advances `now` instantly and records the duration.
pub(crate) struct MockTimer {
    state: Mutex<(Instant, Vec<Duration>)>,
}

impl MockTimer {
    pub(crate) fn new() -> MockTimer {
        MockTimer {
            state: Mutex::new((Instant::now(), Vec::new())),
        }
    }

    pub(crate) fn sleep_calls(&self) -> Vec<Duration> {
        self.state.lock().unwrap().1.clone()
    }
}

impl crate::session::Timer for MockTimer {
    fn now(&self) -> Instant {
        self.state.lock().unwrap().0
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap();
        state.0 += duration;
        state.1.push(duration);
    }
}

// ── Databases ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct MockHashDatabase {
    size_log: Cell<u64>,
    size_log_err: RefCell<Option<String>>,
    entries: RefCell<Vec<Entry>>,
    pub(crate) size_log_calls: Cell<u32>,
    pub(crate) select_calls: RefCell<Vec<HashRange>>,
}

impl MockHashDatabase {
    pub(crate) fn set_size_log(&self, value: u64) {
        self.size_log.set(value);
    }

    pub(crate) fn fail_size_log(&self, message: &str) {
        *self.size_log_err.borrow_mut() = Some(message.to_owned());
    }

    pub(crate) fn set_entries(&self, entries: Vec<Entry>) {
        *self.entries.borrow_mut() = entries;
    }
}

impl HashDatabase for MockHashDatabase {
    fn get_size_log(&self) -> Thunk<u64> {
        self.size_log_calls.set(self.size_log_calls.get() + 1);
        let err = self.size_log_err.borrow().clone();
        let value = self.size_log.get();
        Thunk::new(move || match err {
            Some(message) => Err(Error::upstream(anyhow::anyhow!(message))),
            None => Ok(value),
        })
    }

    fn select_entries(&self, range: HashRange) -> Thunk<Vec<Entry>> {
        self.select_calls.borrow_mut().push(range);
        let entries = self.entries.borrow().clone();
        Thunk::new(move || Ok(entries))
    }
}

pub(crate) struct MockStoreDatabase {
    default_data: RefCell<Bytes>,
    data_list: RefCell<VecDeque<Bytes>>,
    err: RefCell<Option<String>>,
    pub(crate) get_calls: RefCell<Vec<String>>,
}

impl MockStoreDatabase {
    pub(crate) fn new(default_data: &'static str) -> MockStoreDatabase {
        MockStoreDatabase {
            default_data: RefCell::new(Bytes::from_static(default_data.as_bytes())),
            data_list: RefCell::new(VecDeque::new()),
            err: RefCell::new(None),
            get_calls: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn set_data(&self, data: &'static str) {
        *self.default_data.borrow_mut() = Bytes::from_static(data.as_bytes());
    }

    pub(crate) fn set_data_list(&self, data: Vec<&'static str>) {
        *self.data_list.borrow_mut() = data
            .into_iter()
            .map(|d| Bytes::from_static(d.as_bytes()))
            .collect();
    }

    pub(crate) fn fail_with(&self, message: &str) {
        *self.err.borrow_mut() = Some(message.to_owned());
    }
}

impl StoreDatabase for MockStoreDatabase {
    fn get(&self, key: &str) -> Thunk<Bytes> {
        self.get_calls.borrow_mut().push(key.to_owned());
        let err = self.err.borrow().clone();
        let data = self
            .data_list
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| self.default_data.borrow().clone());
        Thunk::new(move || match err {
            Some(message) => Err(Error::upstream(anyhow::anyhow!(message))),
            None => Ok(data),
        })
    }
}
