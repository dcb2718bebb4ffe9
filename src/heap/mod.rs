//! Block/line bookkeeping and the block allocator (spec §4.1, §4.2).

pub mod block;
pub mod block_allocator;
pub mod line;
