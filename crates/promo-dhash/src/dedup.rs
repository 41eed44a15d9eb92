//! Per-round deduplicating pipeline wrapper.
//!
//! For the lifetime of one scheduler round this wrapper collapses identical
//! cache operations: a second `get` or `lease_get` on the same key returns
//! the first call's thunk, and a `lease_set` repeated under the same lease id
//! short-circuits to an already-successful thunk. `delete` always passes
//! through. The scheduler resets the maps at every round boundary.

use std::collections::HashMap;

use bytes::Bytes;

use crate::thunk::Thunk;
use crate::traits::CachePipeline;
use crate::types::LeaseGetResult;

pub(crate) struct DedupPipeline {
    inner: Box<dyn CachePipeline>,
    get_thunks: HashMap<String, Thunk<Option<Bytes>>>,
    lease_get_thunks: HashMap<String, Thunk<LeaseGetResult>>,
    lease_set_ids: HashMap<String, u64>,
}

impl DedupPipeline {
    pub(crate) fn new(inner: Box<dyn CachePipeline>) -> DedupPipeline {
        DedupPipeline {
            inner,
            get_thunks: HashMap::new(),
            lease_get_thunks: HashMap::new(),
            lease_set_ids: HashMap::new(),
        }
    }

    pub(crate) fn get(&mut self, key: &str) -> Thunk<Option<Bytes>> {
        if let Some(thunk) = self.get_thunks.get(key) {
            return thunk.clone();
        }
        let thunk = self.inner.get(key);
        self.get_thunks.insert(key.to_owned(), thunk.clone());
        thunk
    }

    pub(crate) fn lease_get(&mut self, key: &str) -> Thunk<LeaseGetResult> {
        if let Some(thunk) = self.lease_get_thunks.get(key) {
            return thunk.clone();
        }
        let thunk = self.inner.lease_get(key);
        self.lease_get_thunks.insert(key.to_owned(), thunk.clone());
        thunk
    }

    pub(crate) fn lease_set(
        &mut self,
        key: &str,
        value: Bytes,
        lease_id: u64,
        ttl: u32,
    ) -> Thunk<()> {
        if self.lease_set_ids.get(key) == Some(&lease_id) {
            return Thunk::ready(Ok(()));
        }
        self.lease_set_ids.insert(key.to_owned(), lease_id);
        self.inner.lease_set(key, value, lease_id, ttl)
    }

    pub(crate) fn delete(&mut self, key: &str) -> Thunk<()> {
        self.inner.delete(key)
    }

    /// Round boundary: forget everything collapsed so far.
    pub(crate) fn reset(&mut self) {
        self.get_thunks.clear();
        self.lease_get_thunks.clear();
        self.lease_set_ids.clear();
    }

    pub(crate) fn finish(&mut self) {
        self.inner.finish();
    }
}
