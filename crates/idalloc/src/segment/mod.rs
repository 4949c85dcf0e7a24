//! Per-service segment allocation.
//!
//! Each service gets one [`SegmentAllocator`] serving IDs from memory, paired
//! with a background refill task ([`refill`]) that keeps the next segment
//! ready.

mod allocator;
pub mod refill;

pub use allocator::SegmentAllocator;
