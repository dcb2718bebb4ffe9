//! The overflow allocator for medium objects (objects that span two or more lines but still
//! fit in a block). Kept as a separate allocator from the small-object bump allocator so that
//! a medium object never fragments a hole a small object could have used, and vice versa
//! (spec §4.4).
//!
//! Mechanically identical to the small-object allocator - both are a [`BumpCursor`] - the
//! difference is entirely in which blocks the orchestrator feeds them: the overflow
//! allocator prefers brand-new blocks over recycled ones (spec §4.4), since a recycled
//! block's holes are usually too small to be worth reserving for a multi-line object.

use crate::address::Address;
use crate::alloc::bump::BumpCursor;
use crate::alloc::AllocFailure;
use crate::heap::block::{Block, BlockMeta};

#[derive(Debug, Default)]
pub struct OverflowAllocator {
    cursor: BumpCursor,
}

impl OverflowAllocator {
    pub fn new() -> Self {
        OverflowAllocator {
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
