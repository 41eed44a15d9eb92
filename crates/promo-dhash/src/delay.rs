//! Delayed-call min-heap used by the session scheduler for lease-retry
//! backoffs. Ordered by due time; ties break by insertion order, which is
//! observable when several retries land on the same deadline.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

pub(crate) type Continuation = Box<dyn FnOnce()>;

pub(crate) struct DelayQueue {
    heap: BinaryHeap<DelayedCall>,
    next_seq: u64,
}

struct DelayedCall {
    due: Instant,
    seq: u64,
    call: Continuation,
}

impl PartialEq for DelayedCall {
    fn eq(&self, other: &DelayedCall) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for DelayedCall {}

impl PartialOrd for DelayedCall {
    fn partial_cmp(&self, other: &DelayedCall) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedCall {
    // BinaryHeap is a max-heap; reverse so the earliest due time, then the
    // earliest insertion, sits on top
    fn cmp(&self, other: &DelayedCall) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl DelayQueue {
    pub(crate) fn new() -> DelayQueue {
        DelayQueue {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn push(&mut self, due: Instant, call: Continuation) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(DelayedCall { due, seq, call });
    }

    pub(crate) fn next_due(&self) -> Option<Instant> {
        self.heap.peek().map(|call| call.due)
    }

    pub(crate) fn pop(&mut self) -> Option<(Instant, Continuation)> {
        self.heap.pop().map(|call| (call.due, call.call))
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    fn recorder(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> Continuation {
        let log = log.clone();
        Box::new(move || log.borrow_mut().push(name))
    }

    #[test]
    fn pops_in_due_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let base = Instant::now();
        let mut queue = DelayQueue::new();

        queue.push(base + Duration::from_millis(20), recorder(&log, "later"));
        queue.push(base + Duration::from_millis(10), recorder(&log, "sooner"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next_due(), Some(base + Duration::from_millis(10)));

        while let Some((_, call)) = queue.pop() {
            call();
        }
        assert_eq!(*log.borrow(), vec!["sooner", "later"]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn equal_deadlines_keep_insertion_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let due = Instant::now() + Duration::from_millis(10);
        let mut queue = DelayQueue::new();

        queue.push(due, recorder(&log, "first"));
        queue.push(due, recorder(&log, "second"));
        queue.push(due, recorder(&log, "third"));

        while let Some((_, call)) = queue.pop() {
            call();
        }
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }
}
