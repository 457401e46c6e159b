/*!
 * Async Reader/Writer Lock
 *
 * Writer-priority, non-reentrant reader/writer lock with FIFO fairness
 * within each role.
 *
 * # State
 *
 * One signed counter `locks_held`: `0` free, `-1` write-held, `N > 0` held
 * by N concurrent readers. Two independent wait queues, one per role, under
 * the same short-held `parking_lot::Mutex`.
 *
 * # Policy
 *
 * A queued writer blocks *new* readers even before it holds the lock, which
 * prevents writer starvation under a steady reader stream. The granting step
 * runs only when `locks_held` returns to 0: one writer if any is queued,
 * otherwise the entire reader queue at once. Already-queued readers keep
 * their mutual FIFO order.
 *
 * Guards are plain values identifying {lock instance, role}: an `Arc` handle
 * with the role fixed by the guard's type. No per-acquisition heap state
 * beyond the slow path's oneshot slot.
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

struct RwState<T> {
    /// 0 free, -1 write-held, N > 0 reader-held
    locks_held: i64,
    writer_queue: WaitQueue<RwLockWriteGuard<T>>,
    reader_queue: WaitQueue<RwLockReadGuard<T>>,
}

struct RwLockInner<T> {
    state: Mutex<RwState<T>>,
    data: UnsafeCell<T>,
    id: InstanceId,
}

// SAFETY: shared read access is handed out concurrently, so the payload must
// be Sync as well as Send; exclusive access is serialized by locks_held.
unsafe impl<T: Send> Send for RwLockInner<T> {}
unsafe impl<T: Send + Sync> Sync for RwLockInner<T> {}

/// What the granting step decided to hand out (delivered outside the mutex)
enum Grant<T> {
    Writer(tokio::sync::oneshot::Sender<RwLockWriteGuard<T>>),
    Readers(Vec<tokio::sync::oneshot::Sender<RwLockReadGuard<T>>>),
}

/// Writer-priority async reader/writer lock protecting a value of type `T`
///
/// Clones are handles to the same lock. Not reentrant: upgrading, downgrading
/// or re-locking from a holder deadlocks by design.
pub struct AsyncRwLock<T> {
    inner: Arc<RwLockInner<T>>,
}

impl<T> Clone for AsyncRwLock<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync> AsyncRwLock<T> {
    pub fn new(data: T) -> Self {
        Self {
            inner: Arc::new(RwLockInner {
                state: Mutex::new(RwState {
                    locks_held: 0,
                    writer_queue: WaitQueue::new(),
                    reader_queue: WaitQueue::new(),
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

    /// Acquire a reader lock
    ///
    /// Fast path iff no writer holds the lock *and* no writer is queued;
    /// otherwise the request queues behind the pending writer.
    pub fn read(&self, cancel: CancellationToken) -> GuardFuture<'_, RwLockReadGuard<T>> {
        let inner = Arc::clone(&self.inner);
        GuardFuture::new(async move {
            if cancel.is_cancelled() {
                return Err(AcquireError::Cancelled);
            }
            let (key, mut rx) = {
                let mut state = inner.state.lock();
                if state.locks_held >= 0 && state.writer_queue.is_empty() {
                    state.locks_held += 1;
                    return Ok(RwLockReadGuard::new(Arc::clone(&inner)));
                }
                state.reader_queue.enqueue()
            };
            trace!(rwlock = %inner.id, "reader queued");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let removed = inner.state.lock().reader_queue.cancel(key);
                    if removed {
                        return Err(AcquireError::Cancelled);
                    }
                    (&mut rx).await.map_err(|_| AcquireError::Cancelled)
                }
                res = &mut rx => res.map_err(|_| AcquireError::Cancelled),
            }
        })
    }

    /// Acquire the writer lock
    ///
    /// Fast path iff the lock is completely free. Cancelling a queued writer
    /// eagerly re-runs the granting step: the cancelled writer may have been
    /// the only thing holding back queued readers, and no release would
    /// otherwise notice.
    pub fn write(&self, cancel: CancellationToken) -> GuardFuture<'_, RwLockWriteGuard<T>> {
        let inner = Arc::clone(&self.inner);
        GuardFuture::new(async move {
            if cancel.is_cancelled() {
                return Err(AcquireError::Cancelled);
            }
            let (key, mut rx) = {
                let mut state = inner.state.lock();
                if state.locks_held == 0 {
                    state.locks_held = -1;
                    return Ok(RwLockWriteGuard::new(Arc::clone(&inner)));
                }
                state.writer_queue.enqueue()
            };
            trace!(rwlock = %inner.id, "writer queued");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let removed = inner.state.lock().writer_queue.cancel(key);
                    if removed {
                        inner.release_waiters();
                        return Err(AcquireError::Cancelled);
                    }
                    (&mut rx).await.map_err(|_| AcquireError::Cancelled)
                }
                res = &mut rx => res.map_err(|_| AcquireError::Cancelled),
            }
        })
    }

    /// Thread-blocking variant of [`read`](Self::read)
    pub fn blocking_read(
        &self,
        cancel: CancellationToken,
    ) -> Result<RwLockReadGuard<T>, AcquireError> {
        futures::executor::block_on(self.read(cancel))
    }

    /// Thread-blocking variant of [`write`](Self::write)
    pub fn blocking_write(
        &self,
        cancel: CancellationToken,
    ) -> Result<RwLockWriteGuard<T>, AcquireError> {
        futures::executor::block_on(self.write(cancel))
    }

    /// Fast path only: reader grant if free of writers, queued or holding
    pub fn try_read(&self) -> Option<RwLockReadGuard<T>> {
        let mut state = self.inner.state.lock();
        if state.locks_held >= 0 && state.writer_queue.is_empty() {
            state.locks_held += 1;
            Some(RwLockReadGuard::new(Arc::clone(&self.inner)))
        } else {
            None
        }
    }

    /// Fast path only: writer grant if completely free
    pub fn try_write(&self) -> Option<RwLockWriteGuard<T>> {
        let mut state = self.inner.state.lock();
        if state.locks_held == 0 {
            state.locks_held = -1;
            Some(RwLockWriteGuard::new(Arc::clone(&self.inner)))
        } else {
            None
        }
    }

    /// Advisory snapshot of the role counter: 0 free, -1 writer, N readers
    pub fn locks_held(&self) -> i64 {
        self.inner.state.lock().locks_held
    }

    /// Queued-writer count (advisory, for diagnostics)
    pub fn writer_waiters(&self) -> usize {
        self.inner.state.lock().writer_queue.len()
    }

    /// Queued-reader count (advisory, for diagnostics)
    pub fn reader_waiters(&self) -> usize {
        self.inner.state.lock().reader_queue.len()
    }
}

impl<T> RwLockInner<T> {
    fn release_reader(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            debug_assert!(state.locks_held > 0, "reader release without readers");
            state.locks_held -= 1;
            if state.locks_held != 0 {
                return;
            }
        }
        self.release_waiters();
    }

    fn release_writer(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            debug_assert!(state.locks_held == -1, "writer release without a writer");
            state.locks_held = 0;
        }
        self.release_waiters();
    }

    /// The granting step: runs only when `locks_held` is 0
    ///
    /// One writer if any is queued, otherwise the whole reader queue. The
    /// counter is updated under the mutex; guards are delivered after it is
    /// dropped, and unclaimed grants are rolled back and re-granted.
    fn release_waiters(self: &Arc<Self>) {
        loop {
            let grant = {
                let mut state = self.state.lock();
                if state.locks_held != 0 {
                    return;
                }
                if let Some(tx) = state.writer_queue.dequeue_next() {
                    state.locks_held = -1;
                    Grant::Writer(tx)
                } else {
                    let txs = state.reader_queue.dequeue_all_senders();
                    if txs.is_empty() {
                        return;
                    }
                    state.locks_held = txs.len() as i64;
                    Grant::Readers(txs)
                }
            };
            match grant {
                Grant::Writer(tx) => {
                    let guard = RwLockWriteGuard::new(Arc::clone(self));
                    match tx.send(guard) {
                        Ok(()) => return,
                        Err(guard) => {
                            // Writer abandoned its receiver: roll back and
                            // grant whoever is next.
                            guard.defuse();
                            self.state.lock().locks_held = 0;
                        }
                    }
                }
                Grant::Readers(txs) => {
                    let mut abandoned = 0i64;
                    for tx in txs {
                        let guard = RwLockReadGuard::new(Arc::clone(self));
                        if let Err(guard) = tx.send(guard) {
                            guard.defuse();
                            abandoned += 1;
                        }
                    }
                    if abandoned == 0 {
                        return;
                    }
                    let mut state = self.state.lock();
                    state.locks_held -= abandoned;
                    if state.locks_held != 0 {
                        return;
                    }
                    // Every granted reader was abandoned; grant again.
                }
            }
        }
    }
}

impl<T> fmt::Debug for AsyncRwLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncRwLock")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

/// Shared (reader) ownership of an [`AsyncRwLock`]
pub struct RwLockReadGuard<T> {
    inner: Option<Arc<RwLockInner<T>>>,
}

/// Exclusive (writer) ownership of an [`AsyncRwLock`]
pub struct RwLockWriteGuard<T> {
    inner: Option<Arc<RwLockInner<T>>>,
}

impl<T> RwLockReadGuard<T> {
    fn new(inner: Arc<RwLockInner<T>>) -> Self {
        Self { inner: Some(inner) }
    }

    fn defuse(mut self) {
        self.inner = None;
    }

    fn owner(&self) -> &Arc<RwLockInner<T>> {
        match &self.inner {
            Some(inner) => inner,
            None => unreachable!("guard accessed after release"),
        }
    }
}

impl<T> RwLockWriteGuard<T> {
    fn new(inner: Arc<RwLockInner<T>>) -> Self {
        Self { inner: Some(inner) }
    }

    fn defuse(mut self) {
        self.inner = None;
    }

    fn owner(&self) -> &Arc<RwLockInner<T>> {
        match &self.inner {
            Some(inner) => inner,
            None => unreachable!("guard accessed after release"),
        }
    }
}

unsafe impl<T: Send + Sync> Send for RwLockReadGuard<T> {}
unsafe impl<T: Send + Sync> Sync for RwLockReadGuard<T> {}
unsafe impl<T: Send> Send for RwLockWriteGuard<T> {}
unsafe impl<T: Send + Sync> Sync for RwLockWriteGuard<T> {}

impl<T> Deref for RwLockReadGuard<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: readers only exist while locks_held > 0, excluding writers.
        unsafe { &*self.owner().data.get() }
    }
}

impl<T> Deref for RwLockWriteGuard<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the writer guard is the unique owner while locks_held == -1.
        unsafe { &*self.owner().data.get() }
    }
}

impl<T> DerefMut for RwLockWriteGuard<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above.
        unsafe { &mut *self.owner().data.get() }
    }
}

impl<T> Drop for RwLockReadGuard<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.release_reader();
        }
    }
}

impl<T> Drop for RwLockWriteGuard<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.release_writer();
        }
    }
}

impl<T> fmt::Debug for RwLockReadGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwLockReadGuard")
            .field("lock", &self.owner().id)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Debug for RwLockWriteGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwLockWriteGuard")
            .field("lock", &self.owner().id)
            .finish_non_exhaustive()
    }
}
