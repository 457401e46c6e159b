/*!
 * Async Condition Variable
 *
 * Mesa-semantics wait/notify bound at construction to exactly one
 * [`AsyncMutex`]. A notification wakes a waiter but does not hand it the lock
 * inline: the woken side reacquires the mutex itself and must re-check its
 * predicate, because the state may have changed in between. Callers therefore
 * always wrap `wait` in a loop:
 *
 * ```ignore
 * let mut guard = mutex.lock(cancel.clone()).await?;
 * while !predicate(&guard) {
 *     guard = condvar.wait(guard, cancel.clone()).await?;
 * }
 * ```
 *
 * # Lock-Held Postcondition
 *
 * `wait` returns the mutex guard on every path. Cancellation is surfaced
 * only *after* the mutex has been reacquired, and the error carries the
 * reacquired guard (the `std::sync::Condvar`/`PoisonError` shape), so "the
 * lock is held on every return from wait" is enforced by the types.
 */

use crate::core::id::InstanceId;
use crate::sync::mutex::{AsyncMutex, AsyncMutexGuard};
use crate::sync::wait_queue::WaitQueue;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// A wait ended by cancellation, carrying the reacquired mutex guard
pub struct WaitCanceled<T> {
    guard: AsyncMutexGuard<T>,
}

impl<T> WaitCanceled<T> {
    /// Recover the guard; the associated mutex is held
    pub fn into_guard(self) -> AsyncMutexGuard<T> {
        self.guard
    }
}

impl<T> fmt::Debug for WaitCanceled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitCanceled").finish_non_exhaustive()
    }
}

impl<T> fmt::Display for WaitCanceled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "condition wait was cancelled; the mutex was reacquired")
    }
}

impl<T> std::error::Error for WaitCanceled<T> {}

/// Mesa-style condition variable for an [`AsyncMutex`]
///
/// Waiters are notified in strict FIFO order. Clones share the same signal
/// queue and the same bound mutex.
pub struct AsyncCondvar<T> {
    mutex: AsyncMutex<T>,
    queue: Arc<Mutex<WaitQueue<()>>>,
    id: InstanceId,
}

impl<T> Clone for AsyncCondvar<T> {
    fn clone(&self) -> Self {
        Self {
            mutex: self.mutex.clone(),
            queue: Arc::clone(&self.queue),
            id: self.id,
        }
    }
}

impl<T: Send> AsyncCondvar<T> {
    /// Bind a new condition variable to `mutex`
    ///
    /// Using it with guards of any other mutex is a contract violation and
    /// panics.
    pub fn new(mutex: &AsyncMutex<T>) -> Self {
        Self {
            mutex: mutex.clone(),
            queue: Arc::new(Mutex::new(WaitQueue::new())),
            id: InstanceId::next(),
        }
    }

    /// Diagnostic instance id
    #[inline]
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Wake the first queued waiter, if any
    ///
    /// The caller keeps the lock; the woken waiter queues for it behind any
    /// other contenders. No-op when nobody is waiting.
    pub fn notify_one(&self, guard: &AsyncMutexGuard<T>) {
        self.assert_owned(guard);
        self.queue.lock().signal_one(());
    }

    /// Wake every currently queued waiter, in order
    pub fn notify_all(&self, guard: &AsyncMutexGuard<T>) {
        self.assert_owned(guard);
        self.queue.lock().signal_all(());
    }

    /// Release the mutex, suspend until notified or cancelled, reacquire
    ///
    /// The waiter is queued *before* the guard is released, so a
    /// `notify_one` issued under the lock can never slip between the two.
    /// On the cancellation path the mutex is still reacquired first; only
    /// then is the cancellation surfaced, with the guard inside the error.
    pub async fn wait(
        &self,
        guard: AsyncMutexGuard<T>,
        cancel: CancellationToken,
    ) -> Result<AsyncMutexGuard<T>, WaitCanceled<T>> {
        self.assert_owned(&guard);
        if cancel.is_cancelled() {
            return Err(WaitCanceled { guard });
        }

        let (key, mut rx) = self.queue.lock().enqueue();
        trace!(condvar = %self.id, "condition waiter queued");
        drop(guard); // releases the mutex; logical ownership is suspended, not ended

        let signaled = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let removed = self.queue.lock().cancel(key);
                if removed {
                    false
                } else {
                    // Already notified: consume the signal and report success.
                    let _ = (&mut rx).await;
                    true
                }
            }
            _ = &mut rx => true,
        };

        let guard = self.mutex.acquire().await;
        if signaled {
            Ok(guard)
        } else {
            trace!(condvar = %self.id, "condition wait cancelled, mutex reacquired");
            Err(WaitCanceled { guard })
        }
    }

    /// Thread-blocking variant of [`wait`](Self::wait)
    ///
    /// Must not be called from within an async context.
    pub fn blocking_wait(
        &self,
        guard: AsyncMutexGuard<T>,
        cancel: CancellationToken,
    ) -> Result<AsyncMutexGuard<T>, WaitCanceled<T>> {
        futures::executor::block_on(self.wait(guard, cancel))
    }

    /// Queued-waiter count (advisory, for diagnostics)
    pub fn waiters(&self) -> usize {
        self.queue.lock().len()
    }

    fn assert_owned(&self, guard: &AsyncMutexGuard<T>) {
        assert!(
            self.mutex.same_lock(guard),
            "condvar {} used with a guard of a different mutex",
            self.id
        );
    }
}

impl<T> fmt::Debug for AsyncCondvar<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCondvar")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notify_without_waiters_is_noop() {
        let mutex = AsyncMutex::new(());
        let condvar = AsyncCondvar::new(&mutex);
        let guard = mutex.lock(CancellationToken::new()).await.unwrap();
        condvar.notify_one(&guard);
        condvar.notify_all(&guard);
        assert_eq!(condvar.waiters(), 0);
    }

    #[tokio::test]
    async fn test_wait_notify_handoff() {
        let mutex = AsyncMutex::new(false);
        let condvar = AsyncCondvar::new(&mutex);

        let waiter = tokio::spawn({
            let mutex = mutex.clone();
            let condvar = condvar.clone();
            async move {
                let mut guard = mutex.lock(CancellationToken::new()).await.unwrap();
                while !*guard {
                    guard = condvar.wait(guard, CancellationToken::new()).await.unwrap();
                }
                *guard
            }
        });

        while condvar.waiters() == 0 {
            tokio::task::yield_now().await;
        }
        let mut guard = mutex.lock(CancellationToken::new()).await.unwrap();
        *guard = true;
        condvar.notify_one(&guard);
        drop(guard);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_wait_reacquires_mutex() {
        let mutex = AsyncMutex::new(0u32);
        let condvar = AsyncCondvar::new(&mutex);
        let cancel = CancellationToken::new();

        let waiter = tokio::spawn({
            let mutex = mutex.clone();
            let condvar = condvar.clone();
            let cancel = cancel.clone();
            async move {
                let guard = mutex.lock(CancellationToken::new()).await.unwrap();
                match condvar.wait(guard, cancel).await {
                    Ok(_) => panic!("wait should have been cancelled"),
                    Err(cancelled) => {
                        // Postcondition: the mutex is held again.
                        let guard = cancelled.into_guard();
                        *guard
                    }
                }
            }
        });

        while condvar.waiters() == 0 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();
        assert_eq!(waiter.await.unwrap(), 0);
        // And it was released again when the guard dropped.
        assert!(!mutex.is_locked());
    }

    #[tokio::test]
    #[should_panic(expected = "different mutex")]
    async fn test_foreign_guard_panics() {
        let mutex = AsyncMutex::new(());
        let other = AsyncMutex::new(());
        let condvar = AsyncCondvar::new(&mutex);
        let guard = other.lock(CancellationToken::new()).await.unwrap();
        condvar.notify_one(&guard);
    }
}
