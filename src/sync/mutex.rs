/*!
 * Async Mutex
 *
 * FIFO-fair asynchronous mutual exclusion with cancellable waits and dual
 * blocking/suspending entry points sharing one state machine.
 *
 * # Design
 *
 * All lock state (the `locked` flag and the wait queue) lives under a short-
 * held `parking_lot::Mutex` that is never held across a suspension point.
 * The fast path flips the flag and returns a guard with no allocation beyond
 * the guard's `Arc` clone. The slow path enqueues a oneshot waiter; the
 * releasing side pops the queue and hands the next waiter a freshly built
 * guard, so ownership transfers directly and FIFO order is exact.
 *
 * Grant delivery happens *outside* the state mutex: completing a waiter can
 * drop a guard (the waiter may have abandoned its receiver), and guard drops
 * re-enter the release path. An unclaimed grant is re-routed to the next
 * waiter, so an abandoned future can never strand the lock.
 *
 * # Not Reentrant
 *
 * A second acquisition by a task or thread that already holds the lock
 * queues behind itself and deadlocks. This is an accepted, documented
 * limitation, not something the lock detects or works around.
 */

use crate::core::errors::AcquireError;
use crate::core::id::InstanceId;
use crate::sync::acquire::GuardFuture;
use crate::sync::wait_queue::WaitQueue;
use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

struct LockState<T> {
    locked: bool,
    queue: WaitQueue<AsyncMutexGuard<T>>,
}

pub(crate) struct MutexInner<T> {
    state: Mutex<LockState<T>>,
    data: UnsafeCell<T>,
    id: InstanceId,
}

// SAFETY: the data in the UnsafeCell is only reachable through a live guard,
// and guard issuance is serialized by the lock protocol. Same bounds as the
// ecosystem async mutexes: holding the mutex across threads only requires
// the payload to be Send.
unsafe impl<T: Send> Send for MutexInner<T> {}
unsafe impl<T: Send> Sync for MutexInner<T> {}

/// Asynchronous FIFO mutex protecting a value of type `T`
///
/// Clones are handles to the same lock. Waiters are granted strictly in
/// arrival order; a cancelled waiter leaves the queue without disturbing the
/// order of the rest.
pub struct AsyncMutex<T> {
    inner: Arc<MutexInner<T>>,
}

impl<T> Clone for AsyncMutex<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send> AsyncMutex<T> {
    pub fn new(data: T) -> Self {
        Self {
            inner: Arc::new(MutexInner {
                state: Mutex::new(LockState {
                    locked: false,
                    queue: WaitQueue::new(),
                }),
                data: UnsafeCell::new(data),
                id: InstanceId::next(),
            }),
        }
    }

    /// Diagnostic instance id
    #[inline]
    pub fn id(&self) -> InstanceId {
        self.inner.id
    }

    /// Acquire the lock, suspending until it is granted or `cancel` fires
    ///
    /// Fast path: if the lock is free, the returned future resolves on first
    /// poll without ever enqueueing. A token that is already cancelled fails
    /// immediately without acquiring. First of {grant, cancel} wins: once the
    /// grant has left the queue, cancellation has no effect and the guard is
    /// returned.
    pub fn lock(&self, cancel: CancellationToken) -> GuardFuture<'_, AsyncMutexGuard<T>> {
        let inner = Arc::clone(&self.inner);
        GuardFuture::new(async move {
            if cancel.is_cancelled() {
                return Err(AcquireError::Cancelled);
            }
            let (key, mut rx) = {
                let mut state = inner.state.lock();
                if !state.locked {
                    debug_assert!(state.queue.is_empty());
                    state.locked = true;
                    return Ok(AsyncMutexGuard::new(Arc::clone(&inner)));
                }
                state.queue.enqueue()
            };
            trace!(mutex = %inner.id, "mutex contended, waiter queued");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let removed = inner.state.lock().queue.cancel(key);
                    if removed {
                        trace!(mutex = %inner.id, "mutex wait cancelled");
                        return Err(AcquireError::Cancelled);
                    }
                    // The grant already left the queue; claim it.
                    (&mut rx).await.map_err(|_| AcquireError::Cancelled)
                }
                res = &mut rx => res.map_err(|_| AcquireError::Cancelled),
            }
        })
    }

    /// Acquire the lock, blocking the calling thread
    ///
    /// Drives the same state machine as [`lock`](Self::lock) to completion on
    /// this thread. Must not be called from within an async context.
    pub fn blocking_lock(
        &self,
        cancel: CancellationToken,
    ) -> Result<AsyncMutexGuard<T>, AcquireError> {
        futures::executor::block_on(self.lock(cancel))
    }

    /// Fast path only: acquire if free, never enqueue
    pub fn try_lock(&self) -> Option<AsyncMutexGuard<T>> {
        let mut state = self.inner.state.lock();
        if state.locked {
            None
        } else {
            state.locked = true;
            Some(AsyncMutexGuard::new(Arc::clone(&self.inner)))
        }
    }

    /// Uncancellable acquisition, used where the caller must end up holding
    /// the lock no matter what (condition-variable reacquisition).
    pub(crate) async fn acquire(&self) -> AsyncMutexGuard<T> {
        loop {
            let rx = {
                let mut state = self.inner.state.lock();
                if !state.locked {
                    state.locked = true;
                    return AsyncMutexGuard::new(Arc::clone(&self.inner));
                }
                state.queue.enqueue().1
            };
            if let Ok(guard) = rx.await {
                return guard;
            }
            // A grant-less sender drop means the queue was torn down, which
            // cannot happen while we hold the Arc; loop keeps this total.
        }
    }

    /// True iff the lock is currently held (advisory snapshot)
    pub fn is_locked(&self) -> bool {
        self.inner.state.lock().locked
    }

    /// Queued-waiter count (advisory, for diagnostics)
    pub fn waiters(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub(crate) fn same_lock(&self, guard: &AsyncMutexGuard<T>) -> bool {
        match &guard.inner {
            Some(inner) => Arc::ptr_eq(&self.inner, inner),
            None => false,
        }
    }
}

impl<T> MutexInner<T> {
    /// Release the lock, handing ownership to the next live waiter
    ///
    /// The low-level release: not tied to any particular guard value, called
    /// by guard drop. Pops under the state mutex, delivers outside it.
    fn release(self: &Arc<Self>) {
        let mut unclaimed: Option<AsyncMutexGuard<T>> = None;
        loop {
            let tx = {
                let mut state = self.state.lock();
                debug_assert!(state.locked, "release of an unheld mutex");
                match state.queue.dequeue_next() {
                    Some(tx) => tx,
                    None => {
                        state.locked = false;
                        // The in-flight grant nobody claimed must not
                        // re-release on drop.
                        if let Some(guard) = unclaimed.take() {
                            guard.defuse();
                        }
                        return;
                    }
                }
            };
            let guard =
                unclaimed.take().unwrap_or_else(|| AsyncMutexGuard::new(Arc::clone(self)));
            match tx.send(guard) {
                Ok(()) => return,
                // Waiter abandoned its receiver; re-route to the next one.
                Err(guard) => unclaimed = Some(guard),
            }
        }
    }
}

impl<T> fmt::Debug for AsyncMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncMutex")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

/// Scoped ownership of an [`AsyncMutex`]
///
/// Dereferences to the protected data; dropping releases the lock exactly
/// once and wakes the next waiter.
pub struct AsyncMutexGuard<T> {
    // Some until the guard is dropped or defused.
    inner: Option<Arc<MutexInner<T>>>,
}

impl<T> AsyncMutexGuard<T> {
    fn new(inner: Arc<MutexInner<T>>) -> Self {
        Self { inner: Some(inner) }
    }

    /// Disarm without releasing; only for grants that were never claimed
    fn defuse(mut self) {
        self.inner = None;
    }

    fn owner(&self) -> &Arc<MutexInner<T>> {
        match &self.inner {
            Some(inner) => inner,
            // A guard value exists only between new() and drop()/defuse().
            None => unreachable!("guard accessed after release"),
        }
    }

    /// Diagnostic id of the owning mutex
    pub fn mutex_id(&self) -> InstanceId {
        self.owner().id
    }
}

unsafe impl<T: Send> Send for AsyncMutexGuard<T> {}
unsafe impl<T: Send + Sync> Sync for AsyncMutexGuard<T> {}

impl<T> Deref for AsyncMutexGuard<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: a live guard is the unique owner of the lock.
        unsafe { &*self.owner().data.get() }
    }
}

impl<T> DerefMut for AsyncMutexGuard<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above; &mut self gives exclusive access to the guard.
        unsafe { &mut *self.owner().data.get() }
    }
}

impl<T> Drop for AsyncMutexGuard<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.release();
        }
    }
}

// Debug shows the owning lock's id only, never the payload, so no `T: Debug`
// bound leaks to users.
impl<T> fmt::Debug for AsyncMutexGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncMutexGuard")
            .field("lock", &self.owner().id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fast_path_uncontended() {
        let mutex = AsyncMutex::new(5u32);
        let mut guard = mutex.lock(CancellationToken::new()).await.unwrap();
        *guard += 1;
        drop(guard);
        assert_eq!(*mutex.lock(CancellationToken::new()).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_try_lock_contended() {
        let mutex = AsyncMutex::new(());
        let guard = mutex.try_lock().unwrap();
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert!(mutex.try_lock().is_some());
    }

    #[tokio::test]
    async fn test_precancelled_token_fails_fast() {
        let mutex = AsyncMutex::new(());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = mutex.lock(cancel).await;
        assert_eq!(result.err(), Some(AcquireError::Cancelled));
        // Nothing was acquired.
        assert!(!mutex.is_locked());
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_queue() {
        let mutex = AsyncMutex::new(());
        let held = mutex.lock(CancellationToken::new()).await.unwrap();

        let cancel = CancellationToken::new();
        let contender = tokio::spawn({
            let mutex = mutex.clone();
            let cancel = cancel.clone();
            async move { mutex.lock(cancel).await }
        });
        // Let the contender queue, then cancel it.
        while mutex.waiters() == 0 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();
        let result = contender.await.unwrap();
        assert_eq!(result.err(), Some(AcquireError::Cancelled));
        assert_eq!(mutex.waiters(), 0);

        drop(held);
        assert!(!mutex.is_locked());
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_strand_lock() {
        let mutex = AsyncMutex::new(());
        let held = mutex.lock(CancellationToken::new()).await.unwrap();

        // Queue a waiter, then drop its future without cancelling.
        let mut fut = Box::pin(mutex.lock(CancellationToken::new()));
        assert!(futures::future::poll_immediate(fut.as_mut()).await.is_none());
        assert_eq!(mutex.waiters(), 1);
        drop(fut);

        drop(held);
        // The unclaimed grant fell through to "unlocked".
        assert!(!mutex.is_locked());
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn test_blocking_lock_roundtrip() {
        let mutex = AsyncMutex::new(1u32);
        {
            let mut guard = mutex.blocking_lock(CancellationToken::new()).unwrap();
            *guard = 2;
        }
        assert_eq!(*mutex.blocking_lock(CancellationToken::new()).unwrap(), 2);
    }
}
