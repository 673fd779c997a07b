//! Single-slot hand-off of completed runs from the worker to the consumer
//!
//! The slot holds only the most recent result. A new publication overwrites an
//! unread one: a live view only ever wants the latest frame, so there is no
//! queue and no backpressure.
//!
//! The slot also carries the publication gate. The consumer closes the gate
//! (under the slot lock) when it requests cancellation, and the worker checks
//! the gate under the same lock before publishing, so "cancel requested" and
//! "snapshot published" can never interleave. The gate counts outstanding
//! cancellations and only reopens once the worker has handled every request
//! that closed it.

use crate::error::{Result, SpectroError};
use crate::types::Snapshot;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// What a run hands to the consumer: a snapshot or the failure that aborted it
pub type Published = Result<Snapshot>;

#[derive(Debug, Default)]
struct Slot {
    latest: Option<Published>,
    unread: bool,
    sequence: u64,
    closed: bool,
}

/// Overwriting single-slot channel with a publication gate
#[derive(Debug, Default)]
pub struct SnapshotChannel {
    slot: Mutex<Slot>,
    ready: Condvar,
    suppressed: AtomicUsize,
}

impl SnapshotChannel {
    /// Create an empty, open channel
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a run result, replacing any unread one
    ///
    /// Returns the sequence number assigned, or `None` if the gate is closed
    /// (the result is discarded) or the channel has been closed.
    pub fn publish(&self, item: Published) -> Option<u64> {
        let mut slot = self.lock();
        if slot.closed || self.is_suppressed() {
            return None;
        }

        slot.sequence += 1;
        let sequence = slot.sequence;
        let item = item.map(|mut snapshot| {
            snapshot.sequence = sequence;
            snapshot
        });
        slot.latest = Some(item);
        slot.unread = true;
        drop(slot);

        self.ready.notify_all();
        Some(sequence)
    }

    /// Close the publication gate for one pending cancellation
    ///
    /// With `discard_unread`, an unread result is dropped as well so the
    /// consumer cannot observe a reading taken with a superseded configuration.
    pub fn suppress(&self, discard_unread: bool) {
        let mut slot = self.lock();
        self.suppressed.fetch_add(1, Ordering::SeqCst);
        if discard_unread {
            slot.latest = None;
            slot.unread = false;
        }
    }

    /// Release one pending cancellation, reopening the gate after the last
    pub fn reopen(&self) {
        let _slot = self.lock();
        let _ = self
            .suppressed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Whether the gate is currently closed
    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst) > 0
    }

    /// Take the unread result, if any, without blocking
    pub fn try_take(&self) -> Option<Published> {
        let mut slot = self.lock();
        if !slot.unread {
            return None;
        }
        slot.unread = false;
        slot.latest.clone()
    }

    /// Peek at the most recent result without marking it read
    pub fn latest(&self) -> Option<Published> {
        self.lock().latest.clone()
    }

    /// Sequence number of the most recent publication (0 before the first)
    pub fn sequence(&self) -> u64 {
        self.lock().sequence
    }

    /// Block until an unread result is available or `timeout` elapses
    pub fn wait(&self, timeout: Duration) -> Published {
        self.wait_until(Some(Instant::now() + timeout))
    }

    /// Block until an unread result is available
    pub fn wait_forever(&self) -> Published {
        self.wait_until(None)
    }

    fn wait_until(&self, deadline: Option<Instant>) -> Published {
        let mut slot = self.lock();
        loop {
            if slot.unread {
                if let Some(item) = slot.latest.clone() {
                    slot.unread = false;
                    return item;
                }
            }
            if slot.closed {
                return Err(SpectroError::WorkerUnavailable(
                    "snapshot channel closed".to_string(),
                ));
            }

            slot = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(SpectroError::Timeout(
                            "no snapshot published in time".to_string(),
                        ));
                    }
                    self.ready
                        .wait_timeout(slot, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .ready
                    .wait(slot)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Close the channel, waking every blocked consumer
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }
}
