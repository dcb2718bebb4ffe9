//! Forwarding pointers for evacuation.
//!
//! Grounded in `mmtk::util::object_forwarding`, stripped of its atomic
//! compare-exchange/spin-wait machinery: single-mutator, stop-the-world collection never
//! has two collectors racing to forward the same object, so forwarding is a plain
//! read-flag/copy/write-flag sequence (spec §4.8).
//!
//! The forwarding pointer itself is stored in the first payload word of the *old* copy,
//! exactly as spec §6 describes: "the moved object's first payload word is repurposed to
//! hold the address of its new location." The `forwarded` flag is set only on that old,
//! now-dead copy - a live, reachable object retains `forwarded == false` even after a
//! collection that moved other objects (spec §6).

use crate::address::{Address, ObjectReference};

/// Copy `object`'s header and payload verbatim into the (already reserved, zeroed) memory
/// at `new_location`, then turn `object` into a forwarding stub pointing at the copy.
///
/// # Safety
/// `new_location` must point at `object.object_size()` bytes of writable memory that no
/// other live object occupies.
pub unsafe fn forward_object(object: ObjectReference, new_location: Address) -> ObjectReference {
    let size = object.object_size();
    std::ptr::copy_nonoverlapping(
        object.to_address().to_ptr::<u8>(),
        new_location.to_mut_ptr::<u8>(),
        size,
    );
    let new_object = ObjectReference::from_address(new_location);
    write_forwarding_pointer(object, new_object);
    set_forwarded(object);
    new_object
}

pub fn is_forwarded(object: ObjectReference) -> bool {
    object.is_forwarded()
}

fn set_forwarded(object: ObjectReference) {
    unsafe {
        (*object.header()).forwarded = 1;
    }
}

/// Write `new_object`'s address into `object`'s first payload word. Only valid to call on
/// an object about to be marked forwarded; the word is only ever repurposed this way on a
/// copy nothing further will mutate.
fn write_forwarding_pointer(object: ObjectReference, new_object: ObjectReference) {
    unsafe { object.payload_start().store_usize(new_object.to_address().as_usize()) };
}

/// Read the forwarding pointer out of an already-forwarded object's first payload word.
///
/// # Safety
/// `object` must have `is_forwarded() == true`.
pub unsafe fn forwarding_address(object: ObjectReference) -> ObjectReference {
    debug_assert!(object.is_forwarded());
    let raw = object.payload_start().load_usize();
    ObjectReference::from_address(Address::from_usize(raw))
}

/// Follow an object to its final location if it has been forwarded, otherwise return it
/// unchanged. Used by the tracer's reference-rewriting pass and by the RC engine when it
/// reads a member slot that may point at a just-evacuated object.
pub fn resolve_forwarding(object: ObjectReference) -> ObjectReference {
    if object.is_forwarded() {
        unsafe { forwarding_address(object) }
    } else {
        object
    }
}
