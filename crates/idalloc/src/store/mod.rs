//! Durable store adapters.
//!
//! The durable store is the source of truth that survives cache-tier data
//! loss. It holds one [`AllocationState`] row per service and carries no
//! business logic: the synchronization pool decides when to read and write.
//!
//! ## Implementations
//!
//! - [`SqliteStore`] - relational store over `rusqlite`.
//! - [`MemoryStore`] - in-process store for single-node mode and tests.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::{AllocationState, Result};
use std::sync::Arc;

pub type DurableStoreRef = Arc<dyn DurableStore>;

#[async_trait::async_trait]
pub trait DurableStore: Send + Sync {
    /// Loads the rows for `services`. An empty slice loads every row.
    async fn fetch_state(&self, services: &[String]) -> Result<Vec<AllocationState>>;

    /// Inserts a new row. Returns the number of affected rows.
    async fn insert_state(&self, state: &AllocationState) -> Result<u64>;

    /// Updates an existing row only when its stored version is strictly lower
    /// than `state.data_version`. Returns the number of affected rows, which
    /// is zero when the stored row is already at or past that version.
    async fn update_state(&self, state: &AllocationState) -> Result<u64>;
}
