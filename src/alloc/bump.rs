//! Bump-pointer allocation within a block's holes, shared by the small-object allocator and
//! (via [`crate::alloc::overflow`]) the medium-object overflow allocator - the two differ only
//! in which kind of block the orchestrator acquires for them, not in the bump/hole-skipping
//! mechanism itself (spec §4.3/§4.4).
//!
//! Grounded in `mmtk::util::alloc::immix_allocator`: a cursor/limit pair that bumps forward
//! within the current hole and reports the need for a new hole or block rather than looping
//! internally.

use crate::address::Address;
use crate::alloc::{align_up, AllocFailure};
use crate::constants::BYTES_IN_LINE;
use crate::heap::block::{Block, BlockMeta};
use crate::heap::line::LineIndex;

/// A bump pointer scoped to one hole of one block.
#[derive(Debug, Default)]
pub struct BumpCursor {
    block: Option<Block>,
    cursor: Address,
    limit: Address,
    /// Line to resume hole-searching from once the current hole has been exhausted.
    next_search_line: LineIndex,
}

impl BumpCursor {
    pub fn new() -> Self {
        BumpCursor {
            block: None,
            cursor: Address::ZERO,
            limit: Address::ZERO,
            next_search_line: LineIndex(0),
        }
    }

    pub fn current_block(&self) -> Option<Block> {
        self.block
    }

    /// Rebind the cursor to a fresh or recycled block, landing on its first hole.
    pub fn bind(&mut self, block: Block, meta: &BlockMeta) {
        self.block = Some(block);
        self.next_search_line = LineIndex(0);
        self.seek_hole(block, meta);
    }

    fn seek_hole(&mut self, block: Block, meta: &BlockMeta) -> bool {
        match meta.line_marks.next_hole(self.next_search_line) {
            Some((start, len)) => {
                self.cursor = start.start(block.start());
                self.limit = LineIndex(start.0 + len).start(block.start());
                self.next_search_line = LineIndex(start.0 + len);
                true
            }
            None => {
                self.cursor = Address::ZERO;
                self.limit = Address::ZERO;
                false
            }
        }
    }

    /// Attempt to satisfy `size` bytes from the current hole. Returns `Err(NeedsBlock)` if
    /// the current hole (or block) cannot fit it and no further hole is available either.
    pub fn alloc(&mut self, size: usize, meta: &mut BlockMeta) -> Result<Address, AllocFailure> {
        let size = align_up(size);
        loop {
            let Some(block) = self.block else {
                return Err(AllocFailure::NeedsBlock);
            };
            let new_cursor = self.cursor + size;
            if !self.cursor.is_zero() && new_cursor <= self.limit {
                let result = self.cursor;
                self.cursor = new_cursor;
                self.mark_occupied(block, meta, result, size);
                return Ok(result);
            }
            if !self.seek_hole(block, meta) {
                return Err(AllocFailure::NeedsBlock);
            }
        }
    }

    fn mark_occupied(&self, block: Block, meta: &mut BlockMeta, start: Address, size: usize) {
        let offset = start - block.start();
        let first_line = LineIndex(offset / BYTES_IN_LINE);
        let lines = LineIndex::lines_spanned(offset, size);
        meta.line_marks.mark_range(first_line, lines);
        meta.object_starts.set_start(block.start(), start);
    }
}

/// The small-object allocator: a [`BumpCursor`] fed recycled blocks in preference to fresh
/// ones by the orchestrator, since small objects are exactly what a recycled block's narrow
/// holes are good for.
#[derive(Debug, Default)]
pub struct SmallObjectAllocator {
    cursor: BumpCursor,
}

impl SmallObjectAllocator {
    pub fn new() -> Self {
        SmallObjectAllocator {
            cursor: BumpCursor::new(),
        }
    }

    pub fn current_block(&self) -> Option<Block> {
        self.cursor.current_block()
    }

    pub fn bind(&mut self, block: Block, meta: &BlockMeta) {
        self.cursor.bind(block, meta);
    }

    pub fn alloc(&mut self, size: usize, meta: &mut BlockMeta) -> Result<Address, AllocFailure> {
        self.cursor.alloc(size, meta)
    }
}
