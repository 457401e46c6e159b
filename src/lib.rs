/*!
 * fairsync
 *
 * FIFO-fair asynchronous coordination primitives: an exclusive lock, a
 * Mesa-style condition variable, a writer-priority reader/writer lock and a
 * bounded producer/consumer collection, all built over one shared FIFO
 * wait-queue foundation.
 *
 * Every waiting operation exists in a suspending and a thread-blocking
 * variant driving the same state machine, takes a `CancellationToken`, and
 * resolves each wait exactly once: first of {grant, cancel} wins. None of
 * the primitives are reentrant, and none own a scheduler.
 */

pub mod collection;
pub mod core;
pub mod sync;

// Re-exports
pub use crate::collection::{AsyncCollection, FifoStore, LifoStore, Store};
pub use crate::core::errors::{AcquireError, AddError, TakeError};
pub use crate::core::id::InstanceId;
pub use crate::sync::{
    AsyncCondvar, AsyncMutex, AsyncMutexGuard, AsyncRwLock, GuardFuture, RwLockReadGuard,
    RwLockWriteGuard, WaitCanceled,
};
