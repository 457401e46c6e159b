/*!
 * Error Types
 * Centralized error handling with thiserror and miette support
 */

use miette::Diagnostic;
use std::fmt;
use thiserror::Error;

/// Lock acquisition errors
///
/// Cancellation is the only way an acquisition can fail: there is no
/// poisoning (releases run unconditionally on guard drop) and no timeout
/// baked into the primitives themselves.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Diagnostic)]
pub enum AcquireError {
    #[error("acquisition was cancelled while waiting")]
    #[diagnostic(
        code(fairsync::acquire::cancelled),
        help("The cancellation token fired before the lock was granted. The waiter was removed from the queue; no lock is held.")
    )]
    Cancelled,
}

/// Errors from `AsyncCollection::take`
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Diagnostic)]
pub enum TakeError {
    #[error("take failed: adding has completed and the collection is empty")]
    #[diagnostic(
        code(fairsync::collection::take_completed),
        help("complete_adding() was called and every remaining item has been drained.")
    )]
    Completed,

    #[error("take was cancelled while waiting")]
    #[diagnostic(code(fairsync::collection::take_cancelled))]
    Cancelled,

    #[error("backing store returned no item despite a non-empty count")]
    #[diagnostic(
        code(fairsync::collection::store_inconsistency),
        help("try_take() failed with items present. This is a defect in the supplied backing store, not a transient condition; it is never retried.")
    )]
    StoreInconsistency,
}

/// Errors from `AsyncCollection::add`, carrying the rejected item back
///
/// `Debug` is implemented by hand so `T` stays unconstrained (the same trick
/// std uses for `mpsc::SendError`).
#[derive(Error, Clone, Copy, PartialEq, Eq)]
pub enum AddError<T> {
    #[error("add failed: adding has completed")]
    Completed(T),

    #[error("add was cancelled while waiting")]
    Cancelled(T),

    #[error("backing store rejected an item below the verified capacity")]
    StoreInconsistency(T),
}

impl<T> AddError<T> {
    /// Recover the item that could not be added
    pub fn into_item(self) -> T {
        match self {
            Self::Completed(item) | Self::Cancelled(item) | Self::StoreInconsistency(item) => item,
        }
    }
}

impl<T> fmt::Debug for AddError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Completed(_) => "Completed",
            Self::Cancelled(_) => "Cancelled",
            Self::StoreInconsistency(_) => "StoreInconsistency",
        };
        f.debug_tuple(name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_error_returns_item() {
        let err: AddError<String> = AddError::Completed("payload".into());
        assert_eq!(err.into_item(), "payload");
    }

    #[test]
    fn test_add_error_debug_has_no_item_bound() {
        struct NotDebug;
        let err: AddError<NotDebug> = AddError::Cancelled(NotDebug);
        assert_eq!(format!("{:?}", err), "Cancelled");
    }

    #[test]
    fn test_take_error_display() {
        assert!(TakeError::Completed.to_string().contains("completed"));
        assert!(AcquireError::Cancelled.to_string().contains("cancelled"));
    }
}
