//! The large-object space: a per-object `malloc`-backed space for objects too big to place
//! in a block (spec §4.5). Large cells carry the same header format as block-resident
//! objects and participate in RC and tracing identically, but are implicitly pinned (never
//! evacuated) and own their memory directly rather than living inside a block.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::HashMap;

use crate::address::{Address, ObjectReference};

struct LargeCell {
    layout: Layout,
}

/// Tracks every live large object by the address of its header.
#[derive(Default)]
pub struct LargeObjectSpace {
    cells: HashMap<Address, LargeCell>,
}

impl LargeObjectSpace {
    pub fn new() -> Self {
        LargeObjectSpace {
            cells: HashMap::new(),
        }
    }

    /// Allocate and zero `size` bytes, returning the address of the new cell, or `None` if
    /// the system allocator is exhausted.
    pub fn alloc(&mut self, size: usize) -> Option<Address> {
        // Pointer-size alignment is enough: the header's widest field is a pointer.
        let layout = Layout::from_size_align(size, std::mem::align_of::<usize>()).ok()?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return None;
        }
        let addr = Address::from_mut_ptr(ptr);
        self.cells.insert(addr, LargeCell { layout });
        Some(addr)
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.cells.contains_key(&addr)
    }

    /// Resolve a conservative candidate address to the large object that starts there, if
    /// any. Large cells have no interior-pointer support beyond their exact start address,
    /// since (unlike blocks) there is no side bitmap of intermediate granules to consult.
    pub fn object_at(&self, addr: Address) -> Option<ObjectReference> {
        self.cells
            .contains_key(&addr)
            .then(|| ObjectReference::from_address(addr))
    }

    pub fn free(&mut self, obj: ObjectReference) {
        if let Some(cell) = self.cells.remove(&obj.to_address()) {
            unsafe { dealloc(obj.to_address().to_mut_ptr(), cell.layout) };
        }
    }

    pub fn objects(&self) -> impl Iterator<Item = ObjectReference> + '_ {
        self.cells.keys().map(|&addr| ObjectReference::from_address(addr))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Drop for LargeObjectSpace {
    fn drop(&mut self) {
        for (&addr, cell) in self.cells.iter() {
            unsafe { dealloc(addr.to_mut_ptr(), cell.layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_zeroed_and_tracked() {
        let mut space = LargeObjectSpace::new();
        let addr = space.alloc(256).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(addr.to_ptr::<u8>(), 256) };
        assert!(bytes.iter().all(|&b| b == 0));
        assert!(space.contains(addr));
        assert_eq!(space.len(), 1);
    }

    #[test]
    fn object_at_only_matches_exact_cell_starts() {
        let mut space = LargeObjectSpace::new();
        let addr = space.alloc(64).unwrap();
        assert_eq!(space.object_at(addr), Some(ObjectReference::from_address(addr)));
        assert_eq!(space.object_at(addr + 8), None);
    }

    #[test]
    fn free_removes_from_tracking() {
        let mut space = LargeObjectSpace::new();
        let addr = space.alloc(64).unwrap();
        let obj = ObjectReference::from_address(addr);
        space.free(obj);
        assert!(!space.contains(addr));
        assert!(space.is_empty());
    }

    #[test]
    fn objects_iterates_every_live_cell() {
        let mut space = LargeObjectSpace::new();
        let a = space.alloc(32).unwrap();
        let b = space.alloc(32).unwrap();
        let mut seen: Vec<Address> = space.objects().map(|o| o.to_address()).collect();
        seen.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(seen, expected);
    }
}
