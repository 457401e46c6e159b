/*!
 * Instance ID Generation
 * Process-wide counters for primitive instance identification
 *
 * Every primitive gets an `InstanceId` at construction. The ids appear in
 * `Debug` output and trace events only; they carry no functional meaning.
 */

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Diagnostic identity of a single primitive instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-wide allocator counter (never recycled)
static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

impl InstanceId {
    /// Allocate the next instance id
    #[inline]
    pub fn next() -> Self {
        Self(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}
