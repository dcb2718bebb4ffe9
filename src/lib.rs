//! A conservative, reference-counting Immix garbage collector for embedding in a host
//! mutator.
//!
//! The collector combines two cooperating reclamation strategies: sticky reference counting
//! ([`rc`]) catches the common case of acyclic garbage cheaply on every collection, and an
//! Immix mark-region tracer ([`trace`]) reclaims reference cycles and opportunistically
//! defragments the heap via evacuation. Objects are placed by a bump-pointer allocator with
//! hole-skipping ([`alloc`]) backed by block/line bookkeeping ([`heap`]); anything too big for
//! a block goes to a dedicated large-object space. Roots are discovered conservatively -
//! host-registered static slots, plus the mutator's stack and saved registers ([`roots`]).
//!
//! [`collector::Collector`] is the safe entry point; [`ffi`] exposes the seven-function
//! C ABI a host mutator actually links against.

pub mod address;
pub mod alloc;
pub mod barrier;
pub mod collector;
pub mod constants;
pub mod error;
pub mod ffi;
pub mod forwarding;
pub mod header;
pub mod heap;
mod logger;
pub mod options;
pub mod rc;
pub mod roots;
pub mod trace;

pub use address::{Address, ObjectReference};
pub use collector::Collector;
pub use error::{GcError, GcResult};
pub use header::{ObjectHeader, Rtti};
pub use options::Options;
