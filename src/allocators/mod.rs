//! Memory allocation: heap blocks and range allocation over a block

pub mod heap;
pub mod range;

pub use heap::HeapBlock;
pub use range::{Extent, RangeAllocator, RangeLease};
