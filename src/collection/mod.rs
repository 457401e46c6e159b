/*!
 * Producer/Consumer Collection
 *
 * Bounded producer/consumer buffering over pluggable backing stores,
 * composed entirely from the primitives in `crate::sync`.
 */

mod bounded;
mod store;

pub use bounded::{AsyncCollection, ConsumingIter};
pub use store::{FifoStore, LifoStore, Store};
