/*!
 * Core Utilities
 * Cross-cutting support: error taxonomy and diagnostic instance ids
 */

pub mod errors;
pub mod id;

pub use errors::{AcquireError, AddError, TakeError};
pub use id::InstanceId;
