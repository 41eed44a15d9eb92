//! Session-level tuning knobs.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Behavior of a session's lease protocol. Serde-friendly so services can
/// embed it in their own configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Ordered backoff list applied when a `lease_get` is rejected. One sleep
    /// per element; a rejection after the last element exhausts the wait.
    pub wait_lease_durations: Vec<Duration>,

    /// When the backoff list is exhausted: `true` fails the call with
    /// [`Error::LeaseNotGranted`](crate::Error::LeaseNotGranted); `false`
    /// deletes the contended key and serves from the backing store without
    /// writing the cache.
    pub failed_on_wait_finished: bool,

    /// TTL in seconds applied to every `lease_set`. 0 means no expiry.
    pub lease_set_ttl: u32,
}

impl Default for SessionOptions {
    fn default() -> SessionOptions {
        SessionOptions {
            wait_lease_durations: vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(50),
            ],
            failed_on_wait_finished: true,
            lease_set_ttl: 0,
        }
    }
}

/// Per-call cursor over the configured backoff list. Each lease-protected
/// read (size-log, bucket, store key) carries its own.
#[derive(Default)]
pub(crate) struct LeaseWait {
    started: bool,
    remaining: VecDeque<Duration>,
}

impl LeaseWait {
    /// The next backoff to sleep, or `None` once the list is exhausted.
    pub(crate) fn next_backoff(&mut self, options: &SessionOptions) -> Option<Duration> {
        if !self.started {
            self.started = true;
            self.remaining = options.wait_lease_durations.iter().copied().collect();
        }
        self.remaining.pop_front()
    }
}
