//! Store handle: the lease protocol over a plain key/value namespace, with
//! no size-log or bucket machinery.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;

use crate::error::Error;
use crate::options::LeaseWait;
use crate::session::SessionCore;
use crate::thunk::Thunk;
use crate::traits::StoreDatabase;
use crate::types::LeaseGetResult;

/// Read handle for a key/value namespace, bound to one session and one
/// backing store.
pub struct Store {
    core: Rc<SessionCore>,
    db: Rc<dyn StoreDatabase>,
}

impl Store {
    pub(crate) fn new(core: Rc<SessionCore>, db: Rc<dyn StoreDatabase>) -> Store {
        Store { core, db }
    }

    /// The value for `key`, served from the cache under lease discipline and
    /// built from the backing store on miss.
    pub fn get(&self, key: &str) -> Thunk<Bytes> {
        self.core.local.inc_store_access();

        let action = Rc::new(GetAction {
            core: self.core.clone(),
            db: self.db.clone(),
            key: Rc::from(key),
            state: RefCell::new(GetState::default()),
        });
        action.issue_lease_get();
        let next = action.clone();
        self.core.add_next_call(move || next.handle_lease_get());

        let core = self.core.clone();
        Thunk::new(move || {
            core.process_all_calls();
            action.output()
        })
    }

    pub fn invalidate(&self, key: &str) -> Thunk<()> {
        self.core.with_pipeline(|p| p.delete(key))
    }
}

#[derive(Default)]
struct GetState {
    lease_get_thunk: Option<Thunk<LeaseGetResult>>,
    db_thunk: Option<Thunk<Bytes>>,
    wait: LeaseWait,
    data: Bytes,
    err: Option<Error>,
}

struct GetAction {
    core: Rc<SessionCore>,
    db: Rc<dyn StoreDatabase>,
    key: Rc<str>,
    state: RefCell<GetState>,
}

impl GetAction {
    fn output(&self) -> Result<Bytes, Error> {
        let state = self.state.borrow();
        match &state.err {
            Some(err) => Err(err.clone()),
            None => Ok(state.data.clone()),
        }
    }

    fn fail(&self, err: Error) {
        self.state.borrow_mut().err = Some(err);
    }

    fn frozen(&self) -> bool {
        self.state.borrow().err.is_some()
    }

    fn issue_lease_get(&self) {
        let thunk = self.core.with_pipeline(|p| p.lease_get(&self.key));
        self.state.borrow_mut().lease_get_thunk = Some(thunk);
    }

    fn handle_lease_get(self: &Rc<Self>) {
        if self.frozen() {
            return;
        }
        let thunk = self
            .state
            .borrow_mut()
            .lease_get_thunk
            .take()
            .expect("lease get not issued");
        let output = match thunk.resolve() {
            Ok(output) => output,
            Err(err) => return self.fail(err),
        };

        match output {
            LeaseGetResult::Found(data) => self.state.borrow_mut().data = data,
            LeaseGetResult::Granted { lease_id } => {
                self.core.local.inc_store_miss();
                tracing::trace!(key = %self.key, lease_id, "store lease granted, loading from database");
                self.state.borrow_mut().db_thunk = Some(self.db.get(&self.key));
                let next = self.clone();
                self.core
                    .add_next_call(move || next.handle_db(Some(lease_id)));
            }
            LeaseGetResult::Rejected => {
                self.core.local.inc_store_miss();
                let backoff = self.state.borrow_mut().wait.next_backoff(&self.core.options);
                match backoff {
                    Some(duration) => {
                        let retry = self.clone();
                        self.core.add_delayed_call(duration, move || {
                            if retry.frozen() {
                                return;
                            }
                            retry.issue_lease_get();
                            retry.handle_lease_get();
                        });
                    }
                    None if self.core.options.failed_on_wait_finished => {
                        self.fail(Error::LeaseNotGranted)
                    }
                    None => {
                        self.core.with_pipeline(|p| p.delete(&self.key));
                        self.state.borrow_mut().db_thunk = Some(self.db.get(&self.key));
                        let next = self.clone();
                        self.core.add_next_call(move || next.handle_db(None));
                    }
                }
            }
        }
    }

    fn handle_db(self: &Rc<Self>, lease: Option<u64>) {
        if self.frozen() {
            return;
        }
        let thunk = self
            .state
            .borrow_mut()
            .db_thunk
            .take()
            .expect("database thunk not issued");
        match thunk.resolve() {
            Err(err) => {
                // release the lease so other readers are not stuck waiting
                // on a value that will never arrive
                if lease.is_some() {
                    self.core.with_pipeline(|p| p.delete(&self.key));
                }
                self.fail(err);
            }
            Ok(data) => {
                self.state.borrow_mut().data = data.clone();
                if let Some(lease_id) = lease {
                    let ttl = self.core.options.lease_set_ttl;
                    self.core
                        .with_pipeline(|p| p.lease_set(&self.key, data, lease_id, ttl));
                }
            }
        }
    }
}
