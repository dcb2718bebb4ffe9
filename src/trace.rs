//! The Immix tracer (spec §4.8): mark-region tracing that reclaims cyclic garbage sticky RC
//! cannot touch, and opportunistically defragments the heap by evacuating objects out of the
//! most fragmented blocks.
//!
//! Grounded in `mmtk`'s Immix plan structure (mark stack, per-line marking, candidate/target
//! block selection via the block allocator), simplified to a single stop-the-world pass: no
//! worker-parallel mark stack stealing, no concurrent sweep.

use std::collections::HashMap;
use std::collections::HashSet;

use crate::address::ObjectReference;
use crate::alloc::large_object_space::LargeObjectSpace;
use crate::alloc::bump::BumpCursor;
use crate::alloc::AllocFailure;
use crate::constants::BYTES_IN_LINE;
use crate::forwarding;
use crate::heap::block::Block;
use crate::heap::block_allocator::BlockAllocator;
use crate::heap::line::LineIndex;

pub struct ImmixTracer {
    mark_stack: Vec<ObjectReference>,
}

impl ImmixTracer {
    pub fn new() -> Self {
        ImmixTracer {
            mark_stack: Vec::new(),
        }
    }

    /// Run one full tracing cycle: clear stale mark state, mark everything reachable from
    /// `roots` (evacuating out of fragmented blocks when `evacuate` is set), rewrite any
    /// references left pointing at forwarded objects, then sweep.
    pub fn collect(
        &mut self,
        roots: &[ObjectReference],
        block_allocator: &mut BlockAllocator,
        large_space: &mut LargeObjectSpace,
        evacuate: bool,
        evacuation_candidate_fraction: f64,
    ) {
        self.reset_mark_state(block_allocator, large_space);

        let (candidates, targets) = if evacuate {
            block_allocator.declare_evacuation_candidates(evacuation_candidate_fraction)
        } else {
            (Vec::new(), Vec::new())
        };
        let candidate_set: HashSet<Block> = candidates.iter().copied().collect();
        let mut fully_evacuated: HashMap<Block, bool> =
            candidates.iter().map(|&b| (b, true)).collect();
        let mut evac_cursor = EvacuationCursor::new(targets);

        let marked_objects = self.mark_phase(
            roots,
            block_allocator,
            large_space,
            &candidate_set,
            &mut fully_evacuated,
            &mut evac_cursor,
        );

        rewrite_references(&marked_objects);

        sweep(block_allocator, large_space, &candidate_set, &fully_evacuated);

        block_allocator.clear_evacuation_flags();
    }

    /// Clear every live object's `marked` flag and every in-use block's line marks and
    /// object-start bitmap; the mark phase below rebuilds all three from root-reachability
    /// alone, which is what reclaims cyclic garbage the RC phase could never see.
    fn reset_mark_state(&mut self, block_allocator: &mut BlockAllocator, large_space: &mut LargeObjectSpace) {
        for block in block_allocator.in_use_blocks() {
            let starts = block_allocator.meta(block).object_starts.object_addresses(block.start());
            for addr in starts {
                ObjectReference::from_address(addr).clear_marked();
            }
            let meta = block_allocator.meta_mut(block);
            meta.line_marks.clear();
            meta.object_starts.clear();
        }
        for obj in large_space.objects() {
            obj.clear_marked();
        }
    }

    fn mark_phase(
        &mut self,
        roots: &[ObjectReference],
        block_allocator: &mut BlockAllocator,
        large_space: &mut LargeObjectSpace,
        candidate_set: &HashSet<Block>,
        fully_evacuated: &mut HashMap<Block, bool>,
        evac_cursor: &mut EvacuationCursor,
    ) -> Vec<ObjectReference> {
        self.mark_stack.clear();
        self.mark_stack.extend(roots.iter().copied());

        let mut marked_objects = Vec::new();
        while let Some(candidate) = self.mark_stack.pop() {
            let mut obj = forwarding::resolve_forwarding(candidate);
            if obj.is_marked() {
                continue;
            }
            obj.set_marked();

            let in_large_space = large_space.contains(obj.to_address());
            let owning_block = (!in_large_space).then(|| Block::containing(obj.to_address()));

            let mut moved = false;
            if let Some(block) = owning_block {
                if candidate_set.contains(&block) {
                    if obj.is_pinned() {
                        fully_evacuated.insert(block, false);
                    } else if let Some(new_obj) = evac_cursor.try_copy(obj, block_allocator) {
                        obj = new_obj;
                        moved = true;
                    } else {
                        fully_evacuated.insert(block, false);
                    }
                }
            }

            if !moved {
                if let Some(block) = owning_block {
                    mark_lines_in_place(obj, block, block_allocator);
                }
            }

            marked_objects.push(obj);
            for member in obj.live_members() {
                self.mark_stack.push(member);
            }
        }
        marked_objects
    }
}

impl Default for ImmixTracer {
    fn default() -> Self {
        Self::new()
    }
}

/// Mark the lines (and record the object-start bit) of an object that was NOT evacuated this
/// cycle - either it stayed in its original block, or it has no owning block at all (large
/// objects skip this entirely via `owning_block == None`).
fn mark_lines_in_place(obj: ObjectReference, block: Block, block_allocator: &mut BlockAllocator) {
    let meta = block_allocator.meta_mut(block);
    let offset = obj.to_address() - block.start();
    let first_line = LineIndex(offset / BYTES_IN_LINE);
    let lines = if obj.spans_lines() {
        LineIndex::lines_spanned(offset, obj.object_size())
    } else {
        1
    };
    meta.line_marks.mark_range(first_line, lines);
    meta.object_starts.set_start(block.start(), obj.to_address());
}

/// Pass 3 (spec §4.8): every live object's member slots are checked against the forwarding
/// flag and rewritten to point at the final, post-evacuation location.
fn rewrite_references(marked_objects: &[ObjectReference]) {
    for &obj in marked_objects {
        for i in 0..obj.num_members() {
            if let Some(member) = obj.get_member(i) {
                if member.is_forwarded() {
                    let resolved = unsafe { forwarding::forwarding_address(member) };
                    obj.set_member(i, Some(resolved));
                }
            }
        }
    }
}

/// Pass 4 (spec §4.8): classify every in-use block by its (freshly rebuilt) line marks, and
/// free every unmarked large object.
///
/// A block that was an evacuation candidate and had every one of its objects successfully
/// evacuated is returned to the free pool outright, regardless of its line marks - those
/// marks reflect the now-dead originals, not anything still occupying the block. A candidate
/// block that had to fall back to in-place marking for at least one object (target space
/// exhausted, or the object was pinned) is swept like any ordinary block instead.
fn sweep(
    block_allocator: &mut BlockAllocator,
    large_space: &mut LargeObjectSpace,
    candidate_set: &HashSet<Block>,
    fully_evacuated: &HashMap<Block, bool>,
) {
    for block in block_allocator.in_use_blocks() {
        if candidate_set.contains(&block) && fully_evacuated.get(&block).copied().unwrap_or(false) {
            block_allocator.release_block(block);
            continue;
        }
        let meta = block_allocator.meta(block);
        if meta.line_marks.marked_count() == 0 {
            block_allocator.release_block(block);
        } else if meta.line_marks.free_count() > 0 {
            block_allocator.mark_recyclable(block);
        } else {
            block_allocator.mark_unavailable(block);
        }
    }

    let dead: Vec<ObjectReference> = large_space.objects().filter(|o| !o.is_marked()).collect();
    for obj in dead {
        large_space.free(obj);
    }
}

/// Bump-allocates evacuation copies across a fixed list of reserved target blocks, advancing
/// to the next target when the current one fills up. Returns `None` once every target block
/// is exhausted, signalling the caller to fall back to in-place marking (spec §4.8,
/// "Evacuation policy").
struct EvacuationCursor {
    targets: Vec<Block>,
    next_target: usize,
    bump: BumpCursor,
}

impl EvacuationCursor {
    fn new(targets: Vec<Block>) -> Self {
        EvacuationCursor {
            targets,
            next_target: 0,
            bump: BumpCursor::new(),
        }
    }

    fn try_copy(
        &mut self,
        obj: ObjectReference,
        block_allocator: &mut BlockAllocator,
    ) -> Option<ObjectReference> {
        let size = obj.object_size();
        loop {
            if self.bump.current_block().is_none() {
                let block = *self.targets.get(self.next_target)?;
                self.next_target += 1;
                let meta = block_allocator.meta(block);
                self.bump.bind(block, meta);
            }
            let block = self.bump.current_block().expect("just bound");
            let meta = block_allocator.meta_mut(block);
            match self.bump.alloc(size, meta) {
                Ok(addr) => {
                    return Some(unsafe { forwarding::forward_object(obj, addr) });
                }
                Err(AllocFailure::NeedsBlock) => {
                    self.bump = BumpCursor::new();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{ObjectHeader, Rtti, HEADER_SIZE};
    use crate::options::Options;

    fn test_options() -> Options {
        let mut options = Options::new_no_env_vars();
        options.initial_heap_blocks = 2;
        options.max_heap_blocks = 4;
        options
    }

    /// Zero-initialise an object of `num_members` reference slots directly at `addr`, which
    /// must fall inside a block this allocator owns. `rtti` must outlive every use of the
    /// returned reference.
    fn write_object_at(addr: crate::address::Address, rtti: &Rtti) -> ObjectReference {
        unsafe {
            std::ptr::write_bytes(addr.to_mut_ptr::<u8>(), 0, rtti.object_size);
            let header = addr.to_mut_ptr::<ObjectHeader>();
            (*header).rtti = rtti as *const Rtti;
        }
        ObjectReference::from_address(addr)
    }

    fn member_slot_size() -> usize {
        std::mem::size_of::<usize>()
    }

    #[test]
    fn root_reachable_large_object_survives_and_unmarked_ones_are_swept() {
        let mut allocator = BlockAllocator::create(&test_options()).unwrap();
        let mut large_space = LargeObjectSpace::new();
        let kept = large_space.alloc(64).unwrap();
        let garbage = large_space.alloc(64).unwrap();
        let kept = ObjectReference::from_address(kept);
        let garbage = ObjectReference::from_address(garbage);

        let mut tracer = ImmixTracer::new();
        tracer.collect(&[kept], &mut allocator, &mut large_space, false, 0.25);

        assert!(large_space.contains(kept.to_address()));
        assert!(!large_space.contains(garbage.to_address()));
    }

    #[test]
    fn cyclic_large_objects_with_no_root_are_both_collected() {
        let mut allocator = BlockAllocator::create(&test_options()).unwrap();
        let mut large_space = LargeObjectSpace::new();
        let a_addr = large_space.alloc(HEADER_SIZE + member_slot_size()).unwrap();
        let b_addr = large_space.alloc(HEADER_SIZE + member_slot_size()).unwrap();
        let a_rtti = Rtti { object_size: HEADER_SIZE + member_slot_size(), num_members: 1 };
        let b_rtti = Rtti { object_size: HEADER_SIZE + member_slot_size(), num_members: 1 };
        let a = write_object_at(a_addr, &a_rtti);
        let b = write_object_at(b_addr, &b_rtti);
        a.set_member(0, Some(b));
        b.set_member(0, Some(a));

        let mut tracer = ImmixTracer::new();
        // A cycle sticky RC can never see, reachable from no root at all: the tracer is the
        // only thing that can reclaim it.
        tracer.collect(&[], &mut allocator, &mut large_space, false, 0.25);

        assert!(large_space.is_empty());
    }

    #[test]
    fn in_place_marking_keeps_a_block_recyclable_when_only_some_lines_survive() {
        let mut allocator = BlockAllocator::create(&test_options()).unwrap();
        let mut large_space = LargeObjectSpace::new();
        let block = allocator.request_free_block().unwrap();

        let rtti = Rtti { object_size: HEADER_SIZE + member_slot_size(), num_members: 0 };
        let survivor = write_object_at(block.start(), &rtti);
        // An object far enough into the block to leave an untouched hole behind it once swept.
        let dead = write_object_at(block.start() + 4096, &rtti);
        let _ = dead;

        let mut tracer = ImmixTracer::new();
        tracer.collect(&[survivor], &mut allocator, &mut large_space, false, 0.25);

        assert!(survivor.is_marked());
        let in_use = allocator.in_use_blocks();
        assert!(in_use.contains(&block));
        // The block still has a marked line (the survivor's) and a free one (everything past
        // it, since only the survivor was ever reached from the mark stack) - recyclable, not
        // released, not unavailable.
        assert!(allocator.meta(block).line_marks.marked_count() > 0);
        assert!(allocator.meta(block).line_marks.free_count() > 0);
    }

    #[test]
    fn a_block_with_nothing_reachable_is_released_to_the_free_pool() {
        let mut allocator = BlockAllocator::create(&test_options()).unwrap();
        let mut large_space = LargeObjectSpace::new();
        let block = allocator.request_free_block().unwrap();
        let rtti = Rtti { object_size: HEADER_SIZE + member_slot_size(), num_members: 0 };
        let _unreachable = write_object_at(block.start(), &rtti);

        let mut tracer = ImmixTracer::new();
        tracer.collect(&[], &mut allocator, &mut large_space, false, 0.25);

        assert!(!allocator.in_use_blocks().contains(&block));
    }
}

