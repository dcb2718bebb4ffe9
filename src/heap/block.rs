//! Blocks: the unit the block allocator reserves and hands out, and the unit the tracer
//! sweeps. A [`Block`] is a lightweight, `Copy` handle (just its start address); the mutable
//! bookkeeping (line marks, object-start bitmap, evacuation flags) lives in [`BlockMeta`],
//! owned by the block allocator's side table and indexed by block index - the "side table
//! indexed by block base address" option from spec §3, rather than storing metadata in the
//! block's own header bytes.

use crate::address::Address;
use crate::constants::BYTES_IN_BLOCK;
use crate::heap::line::{LineIndex, LineMarks, ObjectStartBitmap};

/// A handle to one block-sized, block-aligned region of the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block(Address);

impl Block {
    #[inline(always)]
    pub fn from_aligned(address: Address) -> Self {
        debug_assert!(address.is_aligned_to(BYTES_IN_BLOCK));
        Block(address)
    }

    #[inline(always)]
    pub fn containing(addr: Address) -> Self {
        Block(addr.align_down(BYTES_IN_BLOCK))
    }

    #[inline(always)]
    pub fn start(self) -> Address {
        self.0
    }

    #[inline(always)]
    pub fn end(self) -> Address {
        self.0 + BYTES_IN_BLOCK
    }

    #[inline(always)]
    pub fn contains(self, addr: Address) -> bool {
        addr >= self.start() && addr < self.end()
    }
}

/// Lifecycle state of a block, recomputed by the tracer's sweep phase and updated
/// incrementally by the allocators and the sticky-RC free path in between collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// In the free list, zero-marked, not owned by any allocator.
    Free,
    /// Owned by an allocator and has no holes left to offer (all lines marked, or handed out
    /// as a fresh block that is still being bump-filled).
    Unavailable,
    /// Has at least one hole and is available to [`request_recyclable_block`].
    ///
    /// [`request_recyclable_block`]: crate::heap::block_allocator::BlockAllocator::request_recyclable_block
    Recyclable,
}

/// Mutable per-block metadata, kept in [`BlockAllocator`]'s side table.
///
/// [`BlockAllocator`]: crate::heap::block_allocator::BlockAllocator
#[derive(Debug, Clone)]
pub struct BlockMeta {
    pub state: BlockState,
    pub line_marks: LineMarks,
    pub object_starts: ObjectStartBitmap,
    /// Set by `declare_evacuation_candidates`; cleared at the end of the collection that set it.
    pub is_evacuation_candidate: bool,
    /// Set by `declare_evacuation_candidates`; cleared at the end of the collection that set it.
    pub is_evacuation_target: bool,
}

impl BlockMeta {
    pub fn new() -> Self {
        BlockMeta {
            state: BlockState::Free,
            line_marks: LineMarks::default(),
            object_starts: ObjectStartBitmap::new(BYTES_IN_BLOCK, std::mem::size_of::<usize>()),
            is_evacuation_candidate: false,
            is_evacuation_target: false,
        }
    }

    /// Reinitialise for reuse by an allocator: clear marks and flags, keep in `Unavailable`
    /// until the sweep after this block's first collection cycle classifies it properly.
    pub fn init(&mut self) {
        self.line_marks.clear();
        self.object_starts.clear();
        self.is_evacuation_candidate = false;
        self.is_evacuation_target = false;
        self.state = BlockState::Unavailable;
    }

    pub fn deinit(&mut self) {
        self.state = BlockState::Free;
        self.is_evacuation_candidate = false;
        self.is_evacuation_target = false;
    }

    pub fn holes(&self) -> usize {
        let mut holes = 0;
        let mut from = LineIndex(0);
        while let Some((start, len)) = self.line_marks.next_hole(from) {
            holes += 1;
            from = LineIndex(start.0 + len);
        }
        holes
    }
}

impl Default for BlockMeta {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::line::LineIndex;

    #[test]
    fn containing_aligns_down_to_block_start() {
        let block_start = Address::from_usize(4 * BYTES_IN_BLOCK);
        let interior = block_start + 123;
        assert_eq!(Block::containing(interior), Block::from_aligned(block_start));
    }

    #[test]
    fn contains_is_half_open() {
        let block = Block::from_aligned(Address::from_usize(BYTES_IN_BLOCK));
        assert!(block.contains(block.start()));
        assert!(block.contains(block.end() - 1));
        assert!(!block.contains(block.end()));
    }

    #[test]
    fn fresh_meta_has_one_full_hole() {
        let meta = BlockMeta::new();
        assert_eq!(meta.holes(), 1);
    }

    #[test]
    fn holes_counts_disjoint_unmarked_runs() {
        let mut meta = BlockMeta::new();
        // Mark a run in the middle, leaving a hole before it and a hole after it. Leave a gap
        // so the trailing neighbour-mark doesn't merge the second hole away.
        meta.line_marks.mark_range(LineIndex(10), 2);
        assert_eq!(meta.holes(), 2);
    }

    #[test]
    fn init_resets_marks_and_flags() {
        let mut meta = BlockMeta::new();
        meta.line_marks.mark_range(LineIndex(0), 5);
        meta.is_evacuation_candidate = true;
        meta.init();
        assert_eq!(meta.holes(), 1);
        assert!(!meta.is_evacuation_candidate);
        assert_eq!(meta.state, BlockState::Unavailable);
    }

    #[test]
    fn deinit_marks_free() {
        let mut meta = BlockMeta::new();
        meta.state = BlockState::Recyclable;
        meta.deinit();
        assert_eq!(meta.state, BlockState::Free);
    }
}
