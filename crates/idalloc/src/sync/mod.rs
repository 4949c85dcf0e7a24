//! Background synchronization between the cache tier and the durable store.
//!
//! ## Structure
//!
//! - [`synchronizer`] - recovery and write-through logic.
//! - [`manager`] - the worker pool and its shutdown sequence.
//! - [`worker`] - the per-worker drain loop.

pub mod manager;
pub mod synchronizer;
pub mod worker;

pub use manager::SyncPool;
pub use synchronizer::Synchronizer;
