//! Compile-time layout constants for the heap.
//!
//! Mirrors the role of `mmtk::util::constants`: a flat module of `pub const`s that
//! every other module imports rather than re-deriving.

/// Bytes in a pointer-sized word on this target.
pub const BYTES_IN_WORD: usize = std::mem::size_of::<usize>();
pub const LOG_BYTES_IN_WORD: usize = BYTES_IN_WORD.trailing_zeros() as usize;

/// A block is the unit of OS-backed reservation handed to the bump/overflow allocators.
///
/// 32 KiB, matching the block size used by the original Immix paper and by `librcimmixcons`.
pub const LOG_BYTES_IN_BLOCK: usize = 15;
pub const BYTES_IN_BLOCK: usize = 1 << LOG_BYTES_IN_BLOCK;

/// A line is the unit of conservative mark/hole accounting within a block.
pub const LOG_BYTES_IN_LINE: usize = 8;
pub const BYTES_IN_LINE: usize = 1 << LOG_BYTES_IN_LINE;

pub const LINES_PER_BLOCK: usize = BYTES_IN_BLOCK / BYTES_IN_LINE;

/// Objects at or above this size bypass blocks entirely and go to the large-object space.
/// Runtime-overridable via [`crate::options::Options::large_object_threshold_bytes`].
pub const DEFAULT_LARGE_OBJECT_THRESHOLD: usize = 8 * 1024;

/// Sticky reference counts saturate here and are thereafter treated as non-decrementing;
/// only the tracer can reclaim an object that has saturated.
pub const RC_MAX: usize = usize::MAX;

/// Default number of blocks reserved for the heap at `create`, and the default ceiling the
/// block allocator will grow to before `request_free_block` starts failing.
pub const DEFAULT_INITIAL_HEAP_BLOCKS: usize = 64;
pub const DEFAULT_MAX_HEAP_BLOCKS: usize = 4096;

/// Default fraction of the most-fragmented in-use blocks selected as evacuation candidates.
pub const DEFAULT_EVACUATION_CANDIDATE_FRACTION: f64 = 0.25;
