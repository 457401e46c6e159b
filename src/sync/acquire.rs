/*!
 * Acquisition Future Wrapper
 *
 * Every lock-acquisition API in this crate returns a `GuardFuture` instead of
 * a bare `impl Future`. The wrapper exists to prevent one specific misuse:
 * treating the pending acquisition as if it were the guard itself. A
 * `GuardFuture` exposes no release capability and owns no lock; only the
 * guard it resolves to does. Dropping an unawaited `GuardFuture` acquires
 * nothing and releases nothing.
 */

use crate::core::errors::AcquireError;
use futures::future::BoxFuture;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Pending acquisition of a lock guard
///
/// Awaiting yields `Result<G, AcquireError>`; the only failure is
/// cancellation of the supplied token.
#[must_use = "a GuardFuture is not a guard: await it to acquire the lock"]
pub struct GuardFuture<'a, G> {
    inner: BoxFuture<'a, Result<G, AcquireError>>,
}

impl<'a, G> GuardFuture<'a, G> {
    pub(crate) fn new(inner: impl Future<Output = Result<G, AcquireError>> + Send + 'a) -> Self {
        Self {
            inner: Box::pin(inner),
        }
    }
}

impl<G> Future for GuardFuture<'_, G> {
    type Output = Result<G, AcquireError>;

    #[inline]
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl<G> std::fmt::Debug for GuardFuture<'_, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardFuture").finish_non_exhaustive()
    }
}
