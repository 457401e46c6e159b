/*!
 * Coordination Primitives
 *
 * FIFO-fair async locks and wait/notify primitives, all built over one
 * shared wait-queue foundation:
 *
 * - `AsyncMutex` - exclusive lock, one wait queue
 * - `AsyncCondvar` - Mesa-style wait/notify bound to one `AsyncMutex`
 * - `AsyncRwLock` - writer-priority reader/writer lock, one queue per role
 *
 * Every primitive offers a suspending and a thread-blocking entry point
 * driving the same state machine, and every wait accepts a
 * `CancellationToken`. There is no owned scheduler: suspended operations
 * resume on whatever context completes their grant.
 */

mod acquire;
mod condvar;
mod mutex;
mod rwlock;
pub(crate) mod wait_queue;

pub use acquire::GuardFuture;
pub use condvar::{AsyncCondvar, WaitCanceled};
pub use mutex::{AsyncMutex, AsyncMutexGuard};
pub use rwlock::{AsyncRwLock, RwLockReadGuard, RwLockWriteGuard};
