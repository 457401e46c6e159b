/*!
 * FIFO Wait Queue
 *
 * The foundation every primitive in this crate builds on: an ordered queue of
 * pending waiters, each backed by a single-assignment oneshot slot that is
 * completed exactly once, by a grant or by cancellation, whichever comes
 * first.
 *
 * # Locking Contract
 *
 * A `WaitQueue` has no lock of its own. It is embedded in the owning
 * primitive's `parking_lot::Mutex`-guarded state, and every method here must
 * be called while that mutex is held. The queue never blocks and never
 * suspends while the mutex is held.
 *
 * Delivery that can run arbitrary destructors (sending a release guard to a
 * waiter whose receiver may be gone) is split out: `dequeue_next` and
 * `dequeue_all_senders` hand the raw senders back so the owner can complete
 * them *after* dropping its state mutex. Payload-free signals that cannot
 * re-enter the owner go through `signal_one`/`signal_all` directly.
 *
 * # Fairness
 *
 * Strictly FIFO. A cancelled waiter is removed without disturbing the
 * relative order of the remainder. Fairness caps worst-case wait time and
 * makes interleavings deterministic enough to test.
 */

use std::collections::VecDeque;
use tokio::sync::oneshot;

/// Identity of a queued waiter, used to remove it on cancellation
///
/// Keys are monotonically increasing per queue and never reused, so a stale
/// key (already granted) simply fails to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WaiterKey(u64);

/// One pending request for a grant
struct Waiter<T> {
    key: WaiterKey,
    tx: oneshot::Sender<T>,
}

/// FIFO queue of pending waiters
pub(crate) struct WaitQueue<T> {
    waiters: VecDeque<Waiter<T>>,
    next_key: u64,
}

impl<T> WaitQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            waiters: VecDeque::new(),
            next_key: 0,
        }
    }

    /// True iff no waiter is currently queued
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Approximate queued-waiter count (for diagnostics)
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Register a new waiter at the tail
    ///
    /// Returns the removal key and the receiver the caller suspends on.
    pub(crate) fn enqueue(&mut self) -> (WaiterKey, oneshot::Receiver<T>) {
        let key = WaiterKey(self.next_key);
        self.next_key += 1;
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(Waiter { key, tx });
        (key, rx)
    }

    /// Remove a waiter on cancellation
    ///
    /// Returns true if the waiter was still queued and has been removed; false
    /// if it already left the queue (its grant is committed, possibly still in
    /// flight). Removal preserves the order of the remaining waiters.
    pub(crate) fn cancel(&mut self, key: WaiterKey) -> bool {
        match self.waiters.iter().position(|w| w.key == key) {
            Some(idx) => {
                self.waiters.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Pop the head waiter's sender, if any
    ///
    /// The caller completes it after releasing its state mutex; the send may
    /// fail if the waiter abandoned its receiver, and the caller is
    /// responsible for re-routing the unclaimed grant.
    pub(crate) fn dequeue_next(&mut self) -> Option<oneshot::Sender<T>> {
        self.waiters.pop_front().map(|w| w.tx)
    }

    /// Pop every queued waiter's sender, in FIFO order
    pub(crate) fn dequeue_all_senders(&mut self) -> Vec<oneshot::Sender<T>> {
        self.waiters.drain(..).map(|w| w.tx).collect()
    }

    /// Deliver `value` to the first live waiter
    ///
    /// Waiters whose receiver has been dropped are discarded so a dead waiter
    /// can never swallow a signal. Returns true if a delivery succeeded.
    /// Only for payload types whose drop cannot re-enter the owner.
    pub(crate) fn signal_one(&mut self, mut value: T) -> bool {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.tx.send(value) {
                Ok(()) => return true,
                Err(unclaimed) => value = unclaimed,
            }
        }
        false
    }

    /// Deliver a clone of `value` to every queued waiter, in order
    pub(crate) fn signal_all(&mut self, value: T)
    where
        T: Clone,
    {
        for waiter in self.waiters.drain(..) {
            // Dead receivers just drop the clone.
            let _ = waiter.tx.send(value.clone());
        }
    }
}

impl<T> Default for WaitQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
