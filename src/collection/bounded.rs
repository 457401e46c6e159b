/*!
 * Bounded Producer/Consumer Collection
 *
 * Capacity-bounded producer/consumer semantics over a pluggable backing
 * store, composed from one `AsyncMutex` and two `AsyncCondvar`s (one per
 * direction), all scoped to the single collection instance.
 *
 * # Protocol
 *
 * Producers hold the lock, wait on `not_full` while the store is at
 * capacity, then add and notify `not_empty`. Consumers mirror that on the
 * other condition. `complete_adding` flips a monotonic latch and wakes both
 * sides: blocked producers observe the completed failure, blocked consumers
 * drain the remaining items and then observe completed-and-empty. Both
 * conditions are Mesa-style, so every wait sits in a predicate re-check
 * loop.
 *
 * Each public entry point exists once as an async state machine; the
 * blocking variant drives the same machine on the calling thread, so the
 * two cannot drift in behavior.
 */

use crate::collection::store::{FifoStore, Store};
use crate::core::errors::{AcquireError, AddError, TakeError};
use crate::core::id::InstanceId;
use crate::sync::{AsyncCondvar, AsyncMutex};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// State behind the collection's lock
struct Slots<S> {
    store: S,
    completed: bool,
}

struct Shared<S> {
    lock: AsyncMutex<Slots<S>>,
    not_full: AsyncCondvar<Slots<S>>,
    not_empty: AsyncCondvar<Slots<S>>,
    /// Fixed capacity; `usize::MAX` means unbounded
    max_count: usize,
    /// Advisory mirror of the store size, for lock-free diagnostics
    count: AtomicUsize,
    /// Advisory mirror of the completed latch
    completed: AtomicBool,
    id: InstanceId,
}

/// Bounded async producer/consumer collection
///
/// `S` chooses the element order (FIFO by default); no ordering is promised
/// beyond the store's own. Clones are handles to the same collection.
pub struct AsyncCollection<T, S: Store<T> = FifoStore<T>> {
    shared: Arc<Shared<S>>,
    _items: PhantomData<fn(T) -> T>,
}

impl<T, S: Store<T>> Clone for AsyncCollection<T, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            _items: PhantomData,
        }
    }
}

impl<T: Send> AsyncCollection<T> {
    /// Unbounded FIFO collection
    pub fn new() -> Self {
        Self::with_store(FifoStore::new())
    }

    /// Bounded FIFO collection holding at most `max_count` items
    ///
    /// # Panics
    ///
    /// Panics if `max_count` is zero.
    pub fn with_capacity(max_count: usize) -> Self {
        Self::with_store_and_capacity(FifoStore::new(), max_count)
    }
}

impl<T: Send> Default for AsyncCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send, S: Store<T>> AsyncCollection<T, S> {
    /// Unbounded collection over a caller-supplied store
    pub fn with_store(store: S) -> Self {
        Self::build(store, usize::MAX)
    }

    /// Bounded collection over a caller-supplied store
    ///
    /// # Panics
    ///
    /// Panics if `max_count` is zero.
    pub fn with_store_and_capacity(store: S, max_count: usize) -> Self {
        assert!(max_count >= 1, "collection capacity must be at least 1");
        Self::build(store, max_count)
    }

    fn build(store: S, max_count: usize) -> Self {
        let initial = store.len();
        let lock = AsyncMutex::new(Slots {
            store,
            completed: false,
        });
        let not_full = AsyncCondvar::new(&lock);
        let not_empty = AsyncCondvar::new(&lock);
        Self {
            shared: Arc::new(Shared {
                lock,
                not_full,
                not_empty,
                max_count,
                count: AtomicUsize::new(initial),
                completed: AtomicBool::new(false),
                id: InstanceId::next(),
            }),
            _items: PhantomData,
        }
    }

    /// Diagnostic instance id
    #[inline]
    pub fn id(&self) -> InstanceId {
        self.shared.id
    }

    /// Add an item, suspending while the collection is full
    ///
    /// Fails with [`AddError::Completed`] once `complete_adding` has run,
    /// with the item handed back inside the error.
    pub async fn add(&self, item: T, cancel: CancellationToken) -> Result<(), AddError<T>> {
        let shared = &self.shared;
        let mut slots = match shared.lock.lock(cancel.clone()).await {
            Ok(guard) => guard,
            Err(AcquireError::Cancelled) => return Err(AddError::Cancelled(item)),
        };
        loop {
            if slots.completed {
                return Err(AddError::Completed(item));
            }
            if slots.store.len() < shared.max_count {
                break;
            }
            trace!(collection = %shared.id, "producer waiting: collection full");
            slots = match shared.not_full.wait(slots, cancel.clone()).await {
                Ok(guard) => guard,
                Err(cancelled) => {
                    drop(cancelled.into_guard());
                    return Err(AddError::Cancelled(item));
                }
            };
        }
        // Capacity was verified above; a refusal here is a store defect.
        if let Err(item) = slots.store.try_add(item) {
            return Err(AddError::StoreInconsistency(item));
        }
        shared.count.store(slots.store.len(), Ordering::Relaxed);
        shared.not_empty.notify_one(&slots);
        Ok(())
    }

    /// Take an item, suspending while the collection is empty
    ///
    /// Fails with [`TakeError::Completed`] once adding has completed and the
    /// remaining items are drained.
    pub async fn take(&self, cancel: CancellationToken) -> Result<T, TakeError> {
        let shared = &self.shared;
        let mut slots = match shared.lock.lock(cancel.clone()).await {
            Ok(guard) => guard,
            Err(AcquireError::Cancelled) => return Err(TakeError::Cancelled),
        };
        loop {
            if !slots.store.is_empty() {
                break;
            }
            if slots.completed {
                return Err(TakeError::Completed);
            }
            trace!(collection = %shared.id, "consumer waiting: collection empty");
            slots = match shared.not_empty.wait(slots, cancel.clone()).await {
                Ok(guard) => guard,
                Err(cancelled) => {
                    drop(cancelled.into_guard());
                    return Err(TakeError::Cancelled);
                }
            };
        }
        // Non-emptiness was verified above; a refusal here is a store defect.
        let item = match slots.store.try_take() {
            Some(item) => item,
            None => return Err(TakeError::StoreInconsistency),
        };
        shared.count.store(slots.store.len(), Ordering::Relaxed);
        shared.not_full.notify_one(&slots);
        Ok(item)
    }

    /// Thread-blocking variant of [`add`](Self::add)
    ///
    /// Must not be called from within an async context.
    pub fn blocking_add(&self, item: T, cancel: CancellationToken) -> Result<(), AddError<T>> {
        futures::executor::block_on(self.add(item, cancel))
    }

    /// Thread-blocking variant of [`take`](Self::take)
    ///
    /// Must not be called from within an async context.
    pub fn blocking_take(&self, cancel: CancellationToken) -> Result<T, TakeError> {
        futures::executor::block_on(self.take(cancel))
    }

    /// Mark the collection as complete for adding
    ///
    /// One-shot and idempotent: the latch never reverts. Wakes every blocked
    /// producer (which then fail) and every blocked consumer (which drain the
    /// remainder or observe completed-and-empty).
    pub async fn complete_adding(&self) {
        let shared = &self.shared;
        let mut slots = shared.lock.acquire().await;
        if !slots.completed {
            slots.completed = true;
            shared.completed.store(true, Ordering::Release);
            trace!(collection = %shared.id, "adding completed");
        }
        shared.not_full.notify_all(&slots);
        shared.not_empty.notify_all(&slots);
    }

    /// Thread-blocking variant of [`complete_adding`](Self::complete_adding)
    pub fn blocking_complete_adding(&self) {
        futures::executor::block_on(self.complete_adding());
    }

    /// Whether a subsequent take can succeed without waiting forever
    ///
    /// Suspends until the collection is non-empty (`true`) or completed and
    /// empty (`false`).
    pub async fn output_available(&self, cancel: CancellationToken) -> Result<bool, AcquireError> {
        let shared = &self.shared;
        let mut slots = shared.lock.lock(cancel.clone()).await?;
        loop {
            if !slots.store.is_empty() {
                return Ok(true);
            }
            if slots.completed {
                return Ok(false);
            }
            slots = match shared.not_empty.wait(slots, cancel.clone()).await {
                Ok(guard) => guard,
                Err(cancelled) => {
                    drop(cancelled.into_guard());
                    return Err(AcquireError::Cancelled);
                }
            };
        }
    }

    /// Thread-blocking variant of [`output_available`](Self::output_available)
    pub fn blocking_output_available(
        &self,
        cancel: CancellationToken,
    ) -> Result<bool, AcquireError> {
        futures::executor::block_on(self.output_available(cancel))
    }

    /// Blocking iterator that consumes items until completed-and-empty
    ///
    /// Lazy and restartable per call; each `next` is one blocking take, and
    /// the completed failure ends the iteration without propagating.
    ///
    /// # Panics
    ///
    /// Panics if the backing store refuses a take despite a verified
    /// non-empty count (a [`TakeError::StoreInconsistency`] mid-iteration).
    pub fn consuming_iter(&self) -> ConsumingIter<'_, T, S> {
        ConsumingIter { collection: self }
    }

    /// Advisory item count (may be stale the moment it is read)
    pub fn len(&self) -> usize {
        self.shared.count.load(Ordering::Relaxed)
    }

    /// Advisory emptiness snapshot
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `complete_adding` has run (advisory snapshot)
    pub fn is_completed(&self) -> bool {
        self.shared.completed.load(Ordering::Acquire)
    }
}

impl<T, S: Store<T>> fmt::Debug for AsyncCollection<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCollection")
            .field("id", &self.shared.id)
            .field("count", &self.shared.count.load(Ordering::Relaxed))
            .field("completed", &self.shared.completed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Iterator over [`AsyncCollection::consuming_iter`]
pub struct ConsumingIter<'a, T, S: Store<T>> {
    collection: &'a AsyncCollection<T, S>,
}

impl<T: Send, S: Store<T>> Iterator for ConsumingIter<'_, T, S> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self.collection.blocking_take(CancellationToken::new()) {
            Ok(item) => Some(item),
            Err(TakeError::Completed) => None,
            // Cancellation is impossible with a fresh token; only a store
            // defect lands here, and that is a programmer error.
            Err(err) => panic!("consuming iteration failed: {err}"),
        }
    }
}
