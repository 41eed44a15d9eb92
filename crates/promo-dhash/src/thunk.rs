//! Memoized resolvers.
//!
//! Every batched operation returns a [`Thunk`]: a shared handle whose first
//! `resolve` runs the underlying computation and whose later resolves return
//! the cached outcome. Pipeline implementations flush their pending batch on
//! the first resolve, so a thunk doubles as the "this round has been sent"
//! trigger.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Error;

type Compute<T> = Box<dyn FnOnce() -> Result<T, Error>>;

/// A shared, memoizing resolver. Cloning yields another handle to the same
/// underlying computation; the computation runs at most once.
pub struct Thunk<T> {
    inner: Rc<ThunkInner<T>>,
}

struct ThunkInner<T> {
    compute: RefCell<Option<Compute<T>>>,
    outcome: RefCell<Option<Result<T, Error>>>,
}

impl<T: Clone> Thunk<T> {
    pub fn new(compute: impl FnOnce() -> Result<T, Error> + 'static) -> Thunk<T> {
        Thunk {
            inner: Rc::new(ThunkInner {
                compute: RefCell::new(Some(Box::new(compute))),
                outcome: RefCell::new(None),
            }),
        }
    }

    /// A thunk that is already resolved. Used where the engine can answer
    /// without touching the underlying pipeline.
    pub fn ready(outcome: Result<T, Error>) -> Thunk<T> {
        Thunk {
            inner: Rc::new(ThunkInner {
                compute: RefCell::new(None),
                outcome: RefCell::new(Some(outcome)),
            }),
        }
    }

    /// Runs the computation on first call, returns the memoized outcome on
    /// every call. Panics if the computation resolves its own thunk.
    pub fn resolve(&self) -> Result<T, Error> {
        if let Some(outcome) = &*self.inner.outcome.borrow() {
            return outcome.clone();
        }
        let compute = self
            .inner
            .compute
            .borrow_mut()
            .take()
            .expect("thunk resolved recursively");
        let outcome = compute();
        *self.inner.outcome.borrow_mut() = Some(outcome.clone());
        outcome
    }
}

impl<T> Clone for Thunk<T> {
    fn clone(&self) -> Thunk<T> {
        Thunk {
            inner: self.inner.clone(),
        }
    }
}
