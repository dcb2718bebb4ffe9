//! The crate's error taxonomy.
//!
//! Per the design's error-handling section, only two conditions are ever *surfaced* to the
//! host as an `Err`/null: failure to reserve the initial heap at `create`, and a terminal
//! allocation failure (allocation failed, a recovery collection ran, and it is still out of
//! memory). Everything else ("Misuse" - mutating without a write barrier, dereferencing a
//! stale forwarded address, writing to a pinned-out object) is undefined behaviour by design
//! and is documented on the relevant `unsafe fn`s rather than typed here.

use std::fmt;

/// Errors the collector can report to its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcError {
    /// The OS refused to back the initial heap reservation (or a subsequent growth request)
    /// with enough memory.
    OutOfMemory,
}

impl fmt::Display for GcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcError::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for GcError {}

pub type GcResult<T> = Result<T, GcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_memory_displays_a_message() {
        assert_eq!(GcError::OutOfMemory.to_string(), "out of memory");
    }

    #[test]
    fn implements_std_error() {
        fn assert_error<E: std::error::Error>(_: E) {}
        assert_error(GcError::OutOfMemory);
    }
}
