//! The seven-function C ABI (spec §6). This is the only boundary the host mutator links
//! against; everything else in the crate is an implementation detail reachable only through
//! these entry points (or, for embedders written in Rust, through [`crate::collector::Collector`]
//! directly).
//!
//! None of these functions may be called concurrently on the same handle from more than one
//! thread (spec §5) - the collector is built around a single mutator's stack and registers,
//! and sharing a handle across threads is undefined behaviour, not a detected error.

use std::os::raw::c_int;

use crate::address::{Address, ObjectReference};
use crate::collector::Collector;
use crate::header::{ObjectHeader, Rtti};

/// Create a new collector instance. Returns null if the initial heap reservation fails
/// (spec §7, "OutOfMemory at creation").
///
/// # Safety
/// The returned pointer, if non-null, must eventually be passed to exactly one call to
/// [`rcimmixcons_destroy`] and to no other function after that.
#[no_mangle]
pub unsafe extern "C" fn rcimmixcons_create() -> *mut Collector {
    match Collector::create() {
        Ok(collector) => Box::into_raw(collector),
        Err(e) => {
            log::error!("rcimmixcons_create failed: {e}");
            std::ptr::null_mut()
        }
    }
}

/// Allocate an object described by `rtti`. Returns a pointer to its zero-initialised header
/// (immediately followed by `object_size - sizeof(header)` payload bytes), or null if
/// allocation plus one recovery collection both fail (spec §7, "OutOfMemory at allocation").
///
/// # Safety
/// `collector` must be a live handle from [`rcimmixcons_create`]. `rtti` must point at a
/// valid, immutable [`Rtti`] that outlives `collector`.
#[no_mangle]
pub unsafe extern "C" fn rcimmixcons_allocate(
    collector: *mut Collector,
    rtti: *const Rtti,
) -> *mut ObjectHeader {
    let collector = &mut *collector;
    let rtti: &'static Rtti = &*rtti;
    match collector.allocate(rtti) {
        Some(obj) => obj.header(),
        None => std::ptr::null_mut(),
    }
}

/// Run a collection: the sticky-RC phase always, the Immix tracer additionally when
/// `cycle_collect` is nonzero, with evacuation enabled (only meaningful alongside tracing)
/// when `evacuate` is nonzero (spec §4.10).
///
/// # Safety
/// `collector` must be a live handle from [`rcimmixcons_create`].
#[no_mangle]
pub unsafe extern "C" fn rcimmixcons_collect(
    collector: *mut Collector,
    evacuate: c_int,
    cycle_collect: c_int,
) {
    let collector = &mut *collector;
    collector.collect(evacuate != 0, cycle_collect != 0);
}

/// Register `address` (a pointer-sized slot the host owns) as a permanent root. Idempotent
/// for a given address (spec §9).
///
/// # Safety
/// `collector` must be a live handle. `address` must remain valid and readable for the
/// lifetime of `collector` (or until the host stops treating it as a root, which this API has
/// no way to express - spec §4.10 notes roots are only ever removed wholesale at `destroy`).
#[no_mangle]
pub unsafe extern "C" fn rcimmixcons_set_static_root(collector: *mut Collector, address: *mut u8) {
    let collector = &mut *collector;
    collector.set_static_root(Address::from_mut_ptr(address));
}

/// Record that `object` is about to have a reference slot mutated (spec §4.9). The mutator
/// must call this before every such write.
///
/// # Safety
/// `collector` must be a live handle. `object` must point at a live header allocated by this
/// same `collector`.
#[no_mangle]
pub unsafe extern "C" fn rcimmixcons_write_barrier(collector: *mut Collector, object: *mut ObjectHeader) {
    let collector = &mut *collector;
    let object = ObjectReference::from_address(Address::from_mut_ptr(object));
    collector.write_barrier(object);
}

/// Release every OS-backed resource held by `collector`. `collector` must not be used again
/// after this call (spec §6).
///
/// # Safety
/// `collector` must be a live handle from [`rcimmixcons_create`], not previously destroyed.
#[no_mangle]
pub unsafe extern "C" fn rcimmixcons_destroy(collector: *mut Collector) {
    if !collector.is_null() {
        drop(Box::from_raw(collector));
    }
}
