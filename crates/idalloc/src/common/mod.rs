pub mod context;
pub mod deadline;
pub mod error;
pub mod types;

pub use context::RequestContext;
pub use error::{Error, Result};
pub use types::{AllocationState, CacheCounter, Segment, SyncItem};
