//! The orchestrator (spec §4.10): the safe API behind the C ABI in [`crate::ffi`], wiring
//! together every other module into the five public operations `create`, `allocate`,
//! `collect`, `set_static_root`, and `write_barrier`, plus `destroy` via `Drop`.

use crate::address::{Address, ObjectReference};
use crate::alloc::bump::SmallObjectAllocator;
use crate::alloc::large_object_space::LargeObjectSpace;
use crate::alloc::overflow::OverflowAllocator;
use crate::alloc::AllocFailure;
use crate::barrier;
use crate::constants::BYTES_IN_LINE;
use crate::error::GcResult;
use crate::header::{ObjectHeader, Rtti, HEADER_SIZE};
use crate::heap::block::Block;
use crate::heap::block_allocator::BlockAllocator;
use crate::heap::line::LineIndex;
use crate::logger;
use crate::options::Options;
use crate::rc::{Reclaimer, StickyRc};
use crate::roots::{self, RootSet};
use crate::trace::ImmixTracer;

/// A single collector instance. Per spec §9, a process may create several of these, but each
/// one is tied to the thread that created it: stack and register scanning only make sense
/// relative to that one call stack.
pub struct Collector {
    options: Options,
    block_allocator: BlockAllocator,
    small_alloc: SmallObjectAllocator,
    overflow_alloc: OverflowAllocator,
    large_space: LargeObjectSpace,
    roots: RootSet,
    rc: StickyRc,
    tracer: ImmixTracer,
    /// Bytes allocated since the last collection, tracked only when `options.stress_factor`
    /// is non-zero (spec §4.11) - grounded in the reference framework's
    /// `GlobalState::increase_allocation_bytes_by` / `GcTrigger`'s stress-factor check.
    bytes_since_collection: usize,
}

impl Collector {
    /// Reserve the initial heap budget and capture this thread's stack base. Fails only if
    /// the initial OS reservation itself fails (spec §4.10).
    pub fn create() -> GcResult<Box<Collector>> {
        Self::create_with_options(Options::new())
    }

    /// Like [`Self::create`], but with caller-supplied [`Options`] instead of the
    /// environment-derived defaults - used by tests that need a specific heap budget or
    /// large-object threshold without going through environment variables.
    pub fn create_with_options(options: Options) -> GcResult<Box<Collector>> {
        logger::try_init();
        let stack_base = roots::current_stack_pointer();
        let block_allocator = BlockAllocator::create(&options)?;
        log::debug!("collector created, stack base {stack_base:?}");
        Ok(Box::new(Collector {
            options,
            block_allocator,
            small_alloc: SmallObjectAllocator::new(),
            overflow_alloc: OverflowAllocator::new(),
            large_space: LargeObjectSpace::new(),
            roots: RootSet::new(stack_base),
            rc: StickyRc::new(),
            tracer: ImmixTracer::new(),
            bytes_since_collection: 0,
        }))
    }

    /// Number of blocks currently owned by an allocator (neither free nor unreserved). Purely
    /// informational, for tests and host-side heap introspection - grounded in the reference
    /// framework's own heap-inspector test support.
    pub fn live_block_count(&self) -> usize {
        self.block_allocator.in_use_blocks().len()
    }

    /// Number of objects currently resident in the large-object space.
    pub fn large_object_count(&self) -> usize {
        self.large_space.len()
    }

    /// Register a pointer-sized slot the host owns as a permanent root, re-read on every
    /// scan (spec §4.6). Idempotent for the same address (spec §9).
    pub fn set_static_root(&mut self, address: Address) {
        self.roots.add_static_root(address);
    }

    /// The mutator must call this before writing to any reference-bearing slot of `object`
    /// (spec §4.9).
    pub fn write_barrier(&mut self, object: ObjectReference) {
        barrier::write_barrier(&mut self.rc, object);
    }

    /// Allocate a new object described by `rtti`. Tries the pools once; on failure, runs an
    /// RC-only recovery collection and retries once more before giving up (spec §4.10).
    pub fn allocate(&mut self, rtti: &'static Rtti) -> Option<ObjectReference> {
        let size = allocation_size(rtti);
        if self.stress_gc_due(size) {
            log::debug!("stress factor reached, forcing a collection before this allocation");
            self.collect(false, true);
        }
        if let Some(addr) = self.try_allocate(size) {
            return Some(self.finish_allocation(addr, rtti, size));
        }
        self.collect(false, false);
        let addr = self.try_allocate(size)?;
        Some(self.finish_allocation(addr, rtti, size))
    }

    /// Track `size` against `options.stress_factor` (spec §4.11) and report whether enough
    /// bytes have now been allocated since the last collection to force one. A no-op tracker
    /// when stress mode is disabled (the default), so the common path pays nothing for it.
    fn stress_gc_due(&mut self, size: usize) -> bool {
        if self.options.stress_factor == 0 {
            return false;
        }
        self.bytes_since_collection += size;
        self.bytes_since_collection >= self.options.stress_factor
    }

    fn finish_allocation(&mut self, addr: Address, rtti: &'static Rtti, size: usize) -> ObjectReference {
        init_header(addr, rtti, size);
        let obj = ObjectReference::from_address(addr);
        self.rc.log_new(obj);
        obj
    }

    fn try_allocate(&mut self, size: usize) -> Option<Address> {
        if size > self.options.large_object_threshold_bytes {
            return self.large_space.alloc(size);
        }
        if size > BYTES_IN_LINE {
            self.alloc_overflow(size)
        } else {
            self.alloc_small(size)
        }
    }

    /// Small objects prefer recycled blocks - narrow holes are exactly what they need - and
    /// fall back to a fresh block only once recycled supply is exhausted (spec §4.3).
    fn alloc_small(&mut self, size: usize) -> Option<Address> {
        loop {
            if let Some(block) = self.small_alloc.current_block() {
                let meta = self.block_allocator.meta_mut(block);
                match self.small_alloc.alloc(size, meta) {
                    Ok(addr) => return Some(addr),
                    Err(AllocFailure::NeedsBlock) => {}
                }
            }
            let block = self
                .block_allocator
                .request_recyclable_block()
                .or_else(|| self.block_allocator.request_free_block())?;
            let meta = self.block_allocator.meta(block);
            self.small_alloc.bind(block, meta);
        }
    }

    /// Medium objects prefer brand-new blocks, so they never fragment a recycled block's
    /// narrow holes that a small object could have used instead (spec §4.4).
    fn alloc_overflow(&mut self, size: usize) -> Option<Address> {
        loop {
            if let Some(block) = self.overflow_alloc.current_block() {
                let meta = self.block_allocator.meta_mut(block);
                match self.overflow_alloc.alloc(size, meta) {
                    Ok(addr) => return Some(addr),
                    Err(AllocFailure::NeedsBlock) => {}
                }
            }
            let block = self.block_allocator.request_free_block()?;
            let meta = self.block_allocator.meta(block);
            self.overflow_alloc.bind(block, meta);
        }
    }

    /// Run a collection. The sticky-RC phase (spec §4.7) always runs; the Immix tracer (spec
    /// §4.8) runs only when `cycle_collect` is set, and only then does `evacuate` have any
    /// effect (spec §9: evacuation without tracing is a no-op, since nothing would rewrite
    /// the references it forwards).
    pub fn collect(&mut self, evacuate: bool, cycle_collect: bool) {
        self.bytes_since_collection = 0;
        let root_objects = self.resolve_roots();
        log::debug!(
            "collect start: {} candidate roots, cycle_collect={cycle_collect}, evacuate={evacuate}",
            root_objects.len()
        );
        let mut rc = std::mem::take(&mut self.rc);
        rc.collect(&root_objects, self);
        self.rc = rc;
        if cycle_collect {
            self.tracer.collect(
                &root_objects,
                &mut self.block_allocator,
                &mut self.large_space,
                evacuate,
                self.options.evacuation_candidate_fraction,
            );
        }
        // Bump cursors may reference blocks the RC free path or the tracer's sweep just
        // reclassified or released; rebinding from scratch on the next allocation is simpler
        // and cheaper than reconciling cursor state against a collection that just ran.
        self.small_alloc = SmallObjectAllocator::new();
        self.overflow_alloc = OverflowAllocator::new();
    }

    /// Conservatively scan every root source and resolve each candidate word to the heap
    /// object (if any) it falls inside, pinning every match (spec §4.6, §9).
    fn resolve_roots(&mut self) -> Vec<ObjectReference> {
        let mut resolved = Vec::new();
        for candidate in self.roots.candidates() {
            if let Some(obj) = self.resolve_candidate(candidate) {
                obj.set_pinned();
                resolved.push(obj);
            }
        }
        resolved.sort_by_key(|o| o.to_address().as_usize());
        resolved.dedup();
        resolved
    }

    /// Resolve an arbitrary address to the heap object whose range contains it, if any. Not
    /// part of the collection path itself (that goes through [`Self::set_static_root`] and the
    /// scan inside [`Self::collect`]); exposed for host-side heap introspection and tests that
    /// want to check a formerly-known address still dereferences to a live object.
    pub fn find_object(&self, candidate: Address) -> Option<ObjectReference> {
        self.resolve_candidate(candidate)
    }

    fn resolve_candidate(&self, candidate: Address) -> Option<ObjectReference> {
        if let Some(obj) = self.large_space.object_at(candidate) {
            return Some(obj);
        }
        if !self.block_allocator.owns(candidate) {
            return None;
        }
        let block = Block::containing(candidate);
        self.block_allocator
            .meta(block)
            .object_starts
            .resolve_interior(block.start(), candidate)
    }
}

impl Reclaimer for Collector {
    /// Free an object whose reference count has reached zero (spec §4.7, pass 4/5): for a
    /// large object, release its cell outright; for a block-resident object, unmark the
    /// lines it occupied and erase its object-start bit, returning the block to the free
    /// pool if that was its last occupant.
    fn free_object(&mut self, obj: ObjectReference) {
        if self.large_space.contains(obj.to_address()) {
            self.large_space.free(obj);
            return;
        }
        let block = Block::containing(obj.to_address());
        let offset = obj.to_address() - block.start();
        let first_line = LineIndex(offset / BYTES_IN_LINE);
        let lines = if obj.spans_lines() {
            LineIndex::lines_spanned(offset, obj.object_size())
        } else {
            1
        };
        let meta = self.block_allocator.meta_mut(block);
        meta.line_marks.unmark_range(first_line, lines);
        meta.object_starts.clear_start(block.start(), obj.to_address());
        if meta.line_marks.marked_count() == 0 {
            self.block_allocator.release_block(block);
        } else {
            self.block_allocator.mark_recyclable(block);
        }
    }
}

/// The number of bytes to reserve for a new object: at least the RTTI's declared size, and
/// never so small that a moved copy would have nowhere to write its forwarding pointer (spec
/// §9's resolution of the zero-payload open question).
fn allocation_size(rtti: &Rtti) -> usize {
    rtti.object_size.max(HEADER_SIZE + std::mem::size_of::<usize>())
}

fn init_header(addr: Address, rtti: &'static Rtti, size: usize) {
    unsafe {
        std::ptr::write_bytes(addr.to_mut_ptr::<u8>(), 0, size);
        let header = addr.to_mut_ptr::<ObjectHeader>();
        (*header).rtti = rtti as *const Rtti;
        (*header).new = 1;
    }
    if size > BYTES_IN_LINE {
        ObjectReference::from_address(addr).set_spans_lines(true);
    }
}
