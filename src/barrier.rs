//! The write barrier (spec §4.9): the mutator's half of the deal that lets sticky RC defer
//! reference-count maintenance to the next collection instead of updating it on every store.
//!
//! Grounded in `mmtk::plan::barriers`' `StickyImmixBarrierSemantics` (its `modbuf`), stripped
//! to the single-mutator case: no cross-thread queue draining, just a direct log into the
//! orchestrator's [`StickyRc`](crate::rc::StickyRc) buffer.

use crate::address::ObjectReference;
use crate::rc::StickyRc;

/// Record that `object` is about to have one of its reference slots mutated. Must be called
/// before the mutator writes to any member slot; idempotent within a collection cycle (spec
/// §8, "write-barrier idempotence").
pub fn write_barrier(rc: &mut StickyRc, object: ObjectReference) {
    rc.log_modified(object);
}
