//! Request-local batching wrapper implementing [`HashDatabase`].
//!
//! Issuing a thunk only records what the fetch will need (the size-log flag,
//! the set of hash ranges). The first thunk to resolve performs one combined
//! fetch — at most one size-log query and one multi-range entry query — and
//! every thunk answers from the memoized result. Errors are sticky: once a
//! fetch fails, every thunk of that generation fails with the same error.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use promo_dhash::{Entry, Error, HashDatabase, HashRange, Thunk};

type SizeLogFn = Box<dyn Fn() -> anyhow::Result<u64>>;
type SelectFn = Box<dyn Fn(&[HashRange]) -> anyhow::Result<Vec<Entry>>>;

/// A per-request [`HashDatabase`] built from two fetch closures, typically
/// one SQL query each. Create a fresh one per session.
pub struct BatchedHashDatabase {
    inner: Rc<Inner>,
}

struct Inner {
    fetch_size_log: SizeLogFn,
    select_entries: SelectFn,
    state: RefCell<BatchState>,
}

#[derive(Default)]
struct BatchState {
    fetch_new: bool,
    need_size_log: bool,
    size_log: u64,
    inputs: Vec<HashRange>,
    input_set: HashSet<HashRange>,
    entries: Vec<Entry>,
    err: Option<Error>,
}

impl BatchedHashDatabase {
    pub fn new(
        fetch_size_log: impl Fn() -> anyhow::Result<u64> + 'static,
        select_entries: impl Fn(&[HashRange]) -> anyhow::Result<Vec<Entry>> + 'static,
    ) -> BatchedHashDatabase {
        BatchedHashDatabase {
            inner: Rc::new(Inner {
                fetch_size_log: Box::new(fetch_size_log),
                select_entries: Box::new(select_entries),
                state: RefCell::new(BatchState::default()),
            }),
        }
    }
}

impl Inner {
    fn fetch_data(&self) -> Result<(), Error> {
        if let Some(err) = &self.state.borrow().err {
            return Err(err.clone());
        }
        if let Err(err) = self.fetch_data_inner() {
            self.state.borrow_mut().err = Some(err.clone());
            return Err(err);
        }
        Ok(())
    }

    fn fetch_data_inner(&self) -> Result<(), Error> {
        let (need_size_log, inputs) = {
            let mut state = self.state.borrow_mut();
            if !state.fetch_new {
                return Ok(());
            }
            state.fetch_new = false;
            let need_size_log = std::mem::take(&mut state.need_size_log);
            let inputs = std::mem::take(&mut state.inputs);
            state.input_set.clear();
            (need_size_log, inputs)
        };

        if need_size_log {
            let size_log = (self.fetch_size_log)().map_err(Error::upstream)?;
            self.state.borrow_mut().size_log = size_log;
        }
        if !inputs.is_empty() {
            let mut entries = (self.select_entries)(&inputs).map_err(Error::upstream)?;
            entries.sort_by_key(|entry| entry.hash);
            self.state.borrow_mut().entries = entries;
        }
        Ok(())
    }
}

impl HashDatabase for BatchedHashDatabase {
    fn get_size_log(&self) -> Thunk<u64> {
        {
            let mut state = self.inner.state.borrow_mut();
            state.fetch_new = true;
            state.need_size_log = true;
        }
        let inner = self.inner.clone();
        Thunk::new(move || {
            inner.fetch_data()?;
            Ok(inner.state.borrow().size_log)
        })
    }

    fn select_entries(&self, range: HashRange) -> Thunk<Vec<Entry>> {
        {
            let mut state = self.inner.state.borrow_mut();
            state.fetch_new = true;
            if state.input_set.insert(range) {
                state.inputs.push(range);
            }
        }
        let inner = self.inner.clone();
        Thunk::new(move || {
            inner.fetch_data()?;
            let state = inner.state.borrow();
            Ok(state
                .entries
                .iter()
                .filter(|entry| range.contains(entry.hash))
                .cloned()
                .collect())
        })
    }
}
