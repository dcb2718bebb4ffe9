//! Sticky reference counting (spec §4.7): the collection strategy run on every `collect`
//! call, reclaiming every unreachable acyclic subgraph without ever walking the whole heap.
//!
//! Grounded in the Levanoni-Petrank deferred-increment scheme as adapted by the spec: rather
//! than updating counts the instant a pointer is overwritten, the collector defers to the
//! next RC phase and reconciles from two buffers - `new_buffer` for objects allocated since
//! the last phase, `modified_buffer` for objects the write barrier saw mutated - plus a
//! worklist, `decrement_buffer`, of decrements still owed.

use crate::address::ObjectReference;

/// A write-barrier log entry: the object and a snapshot of what its member slots pointed to
/// at the moment it was first logged this cycle (spec §4.9's "snapshot-at-log discipline").
struct ModifiedEntry {
    object: ObjectReference,
    old_members: Vec<Option<ObjectReference>>,
}

/// Something that knows how to reclaim an object once its reference count has reached zero:
/// implemented by the orchestrator, which alone knows whether `obj` lives in a block (and so
/// needs its lines unmarked and storage returned to the allocator) or in the large-object
/// space (and so needs its cell freed outright).
pub trait Reclaimer {
    fn free_object(&mut self, obj: ObjectReference);
}

/// The buffers the RC phase operates on, owned by the orchestrator and fed by `allocate` and
/// the write barrier between collections.
#[derive(Default)]
pub struct StickyRc {
    new_buffer: Vec<ObjectReference>,
    modified_buffer: Vec<ModifiedEntry>,
    decrement_buffer: Vec<ObjectReference>,
}

impl StickyRc {
    pub fn new() -> Self {
        StickyRc {
            new_buffer: Vec::new(),
            modified_buffer: Vec::new(),
            decrement_buffer: Vec::new(),
        }
    }

    /// Record a freshly allocated object so the next RC phase's new-object pass picks up its
    /// initial outgoing references. Called once, at the moment of allocation.
    pub fn log_new(&mut self, obj: ObjectReference) {
        self.new_buffer.push(obj);
    }

    /// Record that `obj` is about to be mutated, per the write barrier's contract (spec
    /// §4.9). A no-op if `obj` is already logged this cycle (dedup) or still `new` (the
    /// new-object pass will cover it from scratch, so no snapshot is needed).
    pub fn log_modified(&mut self, obj: ObjectReference) {
        if obj.is_logged() {
            return;
        }
        obj.set_logged();
        if obj.is_new() {
            return;
        }
        self.modified_buffer.push(ModifiedEntry {
            object: obj,
            old_members: obj.snapshot_members(),
        });
    }

    /// Run the full five-pass RC phase (spec §4.7) against the current root set, reclaiming
    /// anything whose count reaches zero through `reclaimer`.
    pub fn collect(&mut self, roots: &[ObjectReference], reclaimer: &mut dyn Reclaimer) {
        self.new_object_pass();
        self.modified_buffer_pass();
        self.root_pass(roots);
        self.drain_decrements(reclaimer);
        self.root_decrement_pass(roots);
    }

    /// Pass 1: every object allocated since the last phase has its `new` flag cleared and its
    /// outgoing references counted for the first time.
    fn new_object_pass(&mut self) {
        for obj in self.new_buffer.drain(..) {
            obj.clear_new();
            for member in obj.live_members() {
                member.increment_rc();
            }
        }
    }

    /// Pass 2: for every logged object, diff its snapshot against its current contents -
    /// queue a decrement for every referent it used to point to, and increment every referent
    /// it points to now.
    fn modified_buffer_pass(&mut self) {
        for entry in self.modified_buffer.drain(..) {
            entry.object.clear_logged();
            for old in entry.old_members.into_iter().flatten() {
                self.decrement_buffer.push(old);
            }
            for current in entry.object.live_members() {
                current.increment_rc();
            }
        }
    }

    /// Pass 3: every root contributes a transient increment for the duration of this phase.
    fn root_pass(&mut self, roots: &[ObjectReference]) {
        for &root in roots {
            root.increment_rc();
        }
    }

    /// Pass 4: drain the decrement buffer. An object whose count reaches zero is freed, and
    /// its own members are queued for decrement in turn - reclamation cascades through an
    /// acyclic subgraph without ever needing to trace it.
    fn drain_decrements(&mut self, reclaimer: &mut dyn Reclaimer) {
        while let Some(obj) = self.decrement_buffer.pop() {
            let rc_after = obj.decrement_rc();
            if rc_after == 0 {
                for member in obj.live_members() {
                    self.decrement_buffer.push(member);
                }
                reclaimer.free_object(obj);
            }
        }
    }

    /// Pass 5: undo the transient root increments from pass 3. A root is live by definition -
    /// it was just found by conservative scanning - so reaching zero here never frees it or
    /// cascades into its members; it only restores the header's count to what the object's
    /// real (non-root) referrers justify, so that the *next* collection's pass 4 decrements
    /// are evaluated against the correct baseline rather than one still inflated by this
    /// cycle's root protection.
    fn root_decrement_pass(&mut self, roots: &[ObjectReference]) {
        for &root in roots {
            root.decrement_rc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::header::{ObjectHeader, Rtti, HEADER_SIZE};
    use std::alloc::{alloc_zeroed, dealloc, Layout};
    use std::cell::RefCell;

    /// A small heap of raw, word-aligned objects, each with `num_members` reference slots and
    /// nothing else, for exercising the RC engine without a full `Collector`.
    struct TestHeap {
        objects: Vec<(*mut u8, Layout, Box<Rtti>)>,
    }

    impl TestHeap {
        fn new() -> Self {
            TestHeap { objects: Vec::new() }
        }

        fn alloc(&mut self, num_members: usize) -> ObjectReference {
            let size = HEADER_SIZE + num_members.max(1) * std::mem::size_of::<usize>();
            let layout = Layout::from_size_align(size, std::mem::size_of::<usize>()).unwrap();
            let ptr = unsafe { alloc_zeroed(layout) };
            let rtti = Box::new(Rtti {
                object_size: size,
                num_members,
            });
            unsafe { (*(ptr as *mut ObjectHeader)).rtti = rtti.as_ref() as *const Rtti };
            let obj = ObjectReference::from_address(Address::from_mut_ptr(ptr));
            unsafe { (*obj.header()).new = 1 };
            self.objects.push((ptr, layout, rtti));
            obj
        }
    }

    impl Drop for TestHeap {
        fn drop(&mut self) {
            for (ptr, layout, _) in &self.objects {
                unsafe { dealloc(*ptr, *layout) };
            }
        }
    }

    #[derive(Default)]
    struct RecordingReclaimer {
        freed: RefCell<Vec<ObjectReference>>,
    }

    impl Reclaimer for RecordingReclaimer {
        fn free_object(&mut self, obj: ObjectReference) {
            self.freed.borrow_mut().push(obj);
        }
    }

    #[test]
    fn new_object_pass_counts_initial_outgoing_references() {
        let mut heap = TestHeap::new();
        let mut rc = StickyRc::new();
        let child = heap.alloc(0);
        let parent = heap.alloc(1);
        parent.set_member(0, Some(child));
        rc.log_new(child);
        rc.log_new(parent);

        let mut reclaimer = RecordingReclaimer::default();
        rc.collect(&[], &mut reclaimer);

        // Allocating a structure never frees anything by itself: nothing has been queued for
        // decrement yet, so the new-object pass only records that `parent` points at `child`.
        assert!(reclaimer.freed.borrow().is_empty());
        assert_eq!(child.rc(), 1);
        assert_eq!(parent.rc(), 0);
    }

    #[test]
    fn root_reachable_object_survives_a_cycle() {
        let mut heap = TestHeap::new();
        let mut rc = StickyRc::new();
        let obj = heap.alloc(0);
        rc.log_new(obj);

        let mut reclaimer = RecordingReclaimer::default();
        rc.collect(&[obj], &mut reclaimer);

        assert!(reclaimer.freed.borrow().is_empty());
        assert_eq!(obj.rc(), 0, "the root's transient increment is undone by pass 5");
    }

    #[test]
    fn modified_buffer_pass_reconciles_old_and_new_referents() {
        let mut heap = TestHeap::new();
        let mut rc = StickyRc::new();
        let a = heap.alloc(0);
        let b = heap.alloc(0);
        let parent = heap.alloc(1);
        parent.set_member(0, Some(a));
        rc.log_new(a);
        rc.log_new(b);
        rc.log_new(parent);
        // First cycle: parent -> a, a has RC 1, keep parent reachable via an external root.
        let mut reclaimer = RecordingReclaimer::default();
        rc.collect(&[parent], &mut reclaimer);
        assert_eq!(a.rc(), 1);

        // Mutate under the write barrier: parent now points at b instead of a.
        rc.log_modified(parent);
        parent.set_member(0, Some(b));
        rc.collect(&[parent], &mut reclaimer);

        assert_eq!(a.rc(), 0, "old referent was decremented");
        assert_eq!(b.rc(), 1, "new referent was incremented");
    }

    #[test]
    fn write_barrier_is_idempotent_within_a_cycle() {
        let mut heap = TestHeap::new();
        let mut rc = StickyRc::new();
        let obj = heap.alloc(1);
        rc.log_new(obj);
        rc.collect(&[], &mut RecordingReclaimer::default());

        rc.log_modified(obj);
        rc.log_modified(obj);
        rc.log_modified(obj);
        assert_eq!(rc.modified_buffer.len(), 1);
    }

    #[test]
    fn logging_a_still_new_object_needs_no_snapshot() {
        let mut heap = TestHeap::new();
        let mut rc = StickyRc::new();
        let obj = heap.alloc(1);
        // Not yet drained through new_object_pass, so `new` is still set.
        rc.log_modified(obj);
        assert!(rc.modified_buffer.is_empty());
        assert!(obj.is_logged());
    }

    #[test]
    fn cascading_decrement_frees_a_whole_acyclic_chain() {
        let mut heap = TestHeap::new();
        let mut rc = StickyRc::new();
        let tail = heap.alloc(0);
        let mid = heap.alloc(1);
        mid.set_member(0, Some(tail));
        let head = heap.alloc(1);
        head.set_member(0, Some(mid));
        let holder = heap.alloc(1);
        holder.set_member(0, Some(head));
        rc.log_new(tail);
        rc.log_new(mid);
        rc.log_new(head);
        rc.log_new(holder);

        // Establish the chain as live, rooted via `holder`.
        let mut reclaimer = RecordingReclaimer::default();
        rc.collect(&[holder], &mut reclaimer);
        assert_eq!(head.rc(), 1);

        // Sever the only link into the chain under the write barrier; a root-driven decrement
        // cascade should now tear the whole acyclic chain down in one phase.
        rc.log_modified(holder);
        holder.set_member(0, None);
        rc.collect(&[holder], &mut reclaimer);

        let freed = reclaimer.freed.borrow();
        assert_eq!(freed.len(), 3);
        assert!(freed.contains(&tail));
        assert!(freed.contains(&mid));
        assert!(freed.contains(&head));
        assert!(!freed.contains(&holder), "a root is never freed by its own decrement pass");
    }
}
