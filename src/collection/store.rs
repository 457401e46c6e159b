/*!
 * Backing Stores
 *
 * The pluggable container underlying `AsyncCollection`. FIFO, LIFO or
 * unordered semantics are all acceptable; the collection only requires the
 * three-method contract below and promises no ordering beyond the store's
 * own. All methods are invoked while the collection's internal lock is held,
 * so implementations need no synchronization of their own.
 */

use std::collections::VecDeque;

/// Storage contract for [`AsyncCollection`](crate::collection::AsyncCollection)
///
/// The collection verifies capacity before calling `try_add` and
/// non-emptiness before calling `try_take`; a refusal despite a satisfied
/// precondition is treated as a defect in the store and surfaced to the
/// caller, never retried.
pub trait Store<T>: Send {
    /// Current element count
    fn len(&self) -> usize;

    /// Add one item, or hand it back if the store refuses
    fn try_add(&mut self, item: T) -> Result<(), T>;

    /// Remove one item, if any
    fn try_take(&mut self) -> Option<T>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// First-in first-out store (the default)
#[derive(Debug, Clone)]
pub struct FifoStore<T> {
    items: VecDeque<T>,
}

impl<T> FifoStore<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<T> Default for FifoStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Store<T> for FifoStore<T> {
    #[inline]
    fn len(&self) -> usize {
        self.items.len()
    }

    fn try_add(&mut self, item: T) -> Result<(), T> {
        self.items.push_back(item);
        Ok(())
    }

    fn try_take(&mut self) -> Option<T> {
        self.items.pop_front()
    }
}

/// Last-in first-out store
#[derive(Debug, Clone)]
pub struct LifoStore<T> {
    items: Vec<T>,
}

impl<T> LifoStore<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> Default for LifoStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Store<T> for LifoStore<T> {
    #[inline]
    fn len(&self) -> usize {
        self.items.len()
    }

    fn try_add(&mut self, item: T) -> Result<(), T> {
        self.items.push(item);
        Ok(())
    }

    fn try_take(&mut self) -> Option<T> {
        self.items.pop()
    }
}
