//! Owns every block in the heap: reserves memory from the OS, hands out fresh and recycled
//! blocks to the bump/overflow allocators, and tracks free/recyclable pools (spec §4.2).
//!
//! Grounded in `mmtk`'s `util::heap::layout` mmap-reservation idiom, simplified to a single
//! side table (no multi-level side metadata) since a single-mutator, single-instance
//! collector does not need the concurrency that machinery exists for.

use std::collections::BTreeSet;
use std::collections::BTreeMap;

use crate::address::Address;
use crate::constants::BYTES_IN_BLOCK;
use crate::error::{GcError, GcResult};
use crate::heap::block::{Block, BlockMeta, BlockState};
use crate::options::Options;

/// One OS-backed memory reservation, unmapped wholesale at `destroy`.
struct Region {
    start: Address,
    bytes: usize,
}

pub struct BlockAllocator {
    regions: Vec<Region>,
    metas: BTreeMap<Address, BlockMeta>,
    free_list: BTreeSet<Address>,
    recyclable_list: BTreeSet<Address>,
    block_count: usize,
    max_blocks: usize,
}

impl BlockAllocator {
    pub fn create(options: &Options) -> GcResult<Self> {
        let mut allocator = BlockAllocator {
            regions: Vec::new(),
            metas: BTreeMap::new(),
            free_list: BTreeSet::new(),
            recyclable_list: BTreeSet::new(),
            block_count: 0,
            max_blocks: options.max_heap_blocks,
        };
        allocator.grow(options.initial_heap_blocks.min(options.max_heap_blocks))?;
        Ok(allocator)
    }

    fn grow(&mut self, extra_blocks: usize) -> GcResult<()> {
        if extra_blocks == 0 {
            return Ok(());
        }
        if self.block_count + extra_blocks > self.max_blocks {
            return Err(GcError::OutOfMemory);
        }
        let bytes = extra_blocks * BYTES_IN_BLOCK;
        let start = reserve_aligned(bytes, BYTES_IN_BLOCK).ok_or(GcError::OutOfMemory)?;
        for i in 0..extra_blocks {
            let block_start = start + i * BYTES_IN_BLOCK;
            self.metas.insert(block_start, BlockMeta::new());
            self.free_list.insert(block_start);
        }
        self.block_count += extra_blocks;
        self.regions.push(Region { start, bytes });
        log::debug!("block allocator grew by {extra_blocks} blocks ({bytes} bytes)");
        Ok(())
    }

    /// Returns a zero-marked block, growing the reservation if the free list is empty and
    /// there is headroom under `max_heap_blocks`.
    pub fn request_free_block(&mut self) -> Option<Block> {
        if self.free_list.is_empty() {
            // Grow by doubling, capped to whatever headroom remains.
            let growth = (self.block_count.max(1)).min(self.max_blocks - self.block_count);
            if growth == 0 || self.grow(growth).is_err() {
                return None;
            }
        }
        let addr = *self.free_list.iter().next()?;
        self.free_list.remove(&addr);
        let meta = self.metas.get_mut(&addr).expect("freed block has no meta");
        meta.init();
        Some(Block::from_aligned(addr))
    }

    /// Returns a block with at least one hole, or `None` if none qualify. Never grows the
    /// heap - a caller that needs a guaranteed block should fall back to
    /// [`request_free_block`](Self::request_free_block).
    pub fn request_recyclable_block(&mut self) -> Option<Block> {
        let addr = *self.recyclable_list.iter().next()?;
        self.recyclable_list.remove(&addr);
        let meta = self.metas.get_mut(&addr).expect("recyclable block has no meta");
        meta.state = BlockState::Unavailable;
        Some(Block::from_aligned(addr))
    }

    pub fn meta(&self, block: Block) -> &BlockMeta {
        self.metas.get(&block.start()).expect("unknown block")
    }

    pub fn meta_mut(&mut self, block: Block) -> &mut BlockMeta {
        self.metas.get_mut(&block.start()).expect("unknown block")
    }

    /// Return a block to the free pool, e.g. because the sticky-RC free path or the tracer's
    /// sweep found it has no remaining live lines.
    pub fn release_block(&mut self, block: Block) {
        self.recyclable_list.remove(&block.start());
        let meta = self.meta_mut(block);
        meta.deinit();
        self.free_list.insert(block.start());
    }

    /// Record that a block now has holes and should be offered to future recyclable
    /// requests (called from the tracer's sweep phase).
    pub fn mark_recyclable(&mut self, block: Block) {
        let meta = self.meta_mut(block);
        meta.state = BlockState::Recyclable;
        self.recyclable_list.insert(block.start());
    }

    pub fn mark_unavailable(&mut self, block: Block) {
        self.recyclable_list.remove(&block.start());
        self.meta_mut(block).state = BlockState::Unavailable;
    }

    /// All blocks currently owned by an allocator (i.e. not in the free list), in ascending
    /// address order - the tracer's sweep and the evacuation-candidate scan both want this.
    pub fn in_use_blocks(&self) -> Vec<Block> {
        self.metas
            .keys()
            .filter(|addr| !self.free_list.contains(addr))
            .map(|&addr| Block::from_aligned(addr))
            .collect()
    }

    /// Select evacuation candidates (the most fragmented in-use blocks, tie-broken by lower
    /// address, per spec §4.2) and reserve an equal number of free blocks as targets. If
    /// fewer free blocks are available than candidates, returns as many targets as it can;
    /// the tracer falls back to in-place marking for candidates that could not get a target.
    pub fn declare_evacuation_candidates(&mut self, fraction: f64) -> (Vec<Block>, Vec<Block>) {
        let mut in_use: Vec<(Block, usize)> = self
            .in_use_blocks()
            .into_iter()
            .map(|b| (b, self.meta(b).holes()))
            .collect();
        // Stable sort: descending hole count, ties keep the ascending-address order `in_use`
        // was already built in.
        in_use.sort_by(|a, b| b.1.cmp(&a.1));

        let candidate_count = ((in_use.len() as f64) * fraction).ceil() as usize;
        let candidates: Vec<Block> = in_use.into_iter().take(candidate_count).map(|(b, _)| b).collect();

        let mut targets = Vec::with_capacity(candidates.len());
        for _ in 0..candidates.len() {
            match self.free_list.iter().next().copied() {
                Some(addr) => {
                    self.free_list.remove(&addr);
                    targets.push(Block::from_aligned(addr));
                }
                None => break,
            }
        }

        for &c in &candidates {
            self.meta_mut(c).is_evacuation_candidate = true;
        }
        for &t in &targets {
            let meta = self.meta_mut(t);
            meta.init();
            meta.is_evacuation_target = true;
        }
        log::debug!(
            "evacuation: {} candidates, {} targets reserved",
            candidates.len(),
            targets.len()
        );
        (candidates, targets)
    }

    /// Clear leftover evacuation bookkeeping at the end of a collection. Target blocks that
    /// were reserved but never used (because nothing needed to be evacuated into them) are
    /// returned to the free list; used ones were already classified by the sweep.
    pub fn clear_evacuation_flags(&mut self) {
        let addrs: Vec<Address> = self.metas.keys().copied().collect();
        for addr in addrs {
            let block = Block::from_aligned(addr);
            let meta = self.meta_mut(block);
            let unused_target = meta.is_evacuation_target
                && meta.state == BlockState::Unavailable
                && meta.line_marks.marked_count() == 0;
            meta.is_evacuation_candidate = false;
            meta.is_evacuation_target = false;
            if unused_target {
                self.release_block(block);
            }
        }
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Whether `addr` falls inside any region this allocator has reserved from the OS - used
    /// by conservative root scanning to reject candidates that merely look like pointers
    /// (spec §4.6).
    pub fn owns(&self, addr: Address) -> bool {
        self.regions.iter().any(|region| {
            addr.as_usize() >= region.start.as_usize()
                && addr.as_usize() < region.start.as_usize() + region.bytes
        })
    }
}

impl Drop for BlockAllocator {
    fn drop(&mut self) {
        for region in &self.regions {
            unsafe {
                libc::munmap(region.start.to_mut_ptr(), region.bytes);
            }
        }
    }
}


/// Reserve `bytes` from the OS, aligned to `align`, by over-reserving and trimming the slack.
fn reserve_aligned(bytes: usize, align: usize) -> Option<Address> {
    unsafe {
        let padded = bytes + align;
        let raw = libc::mmap(
            std::ptr::null_mut(),
            padded,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if raw == libc::MAP_FAILED {
            return None;
        }
        let raw_addr = Address::from_mut_ptr(raw);
        let aligned = raw_addr.align_up(align);
        if aligned.as_usize() > raw_addr.as_usize() {
            libc::munmap(raw_addr.to_mut_ptr(), aligned.as_usize() - raw_addr.as_usize());
        }
        let tail_start = aligned + bytes;
        let region_end = raw_addr + padded;
        if region_end.as_usize() > tail_start.as_usize() {
            libc::munmap(tail_start.to_mut_ptr(), region_end.as_usize() - tail_start.as_usize());
        }
        Some(aligned)
    }
}
