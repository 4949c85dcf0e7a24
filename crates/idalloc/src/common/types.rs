//! # Shared Allocation Types
//!
//! The records that flow between the allocator, the cache tier, and the
//! durable store.
//!
//! - [`AllocationState`] - the durable row persisted per service
//! - [`CacheCounter`] - the volatile counter pair mirrored in the cache tier
//! - [`Segment`] - an in-memory range of IDs owned by one allocator
//! - [`SyncItem`] - a unit of work for the synchronization pool

use serde::{Deserialize, Serialize};

/// Durable per-service allocation state.
///
/// `data_version` never decreases across successful writes, and
/// `last_alloc_value` only grows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationState {
    pub service_name: String,
    pub last_alloc_value: i64,
    pub data_version: i64,
}

impl AllocationState {
    pub fn new(service_name: impl Into<String>, last_alloc_value: i64, data_version: i64) -> Self {
        Self {
            service_name: service_name.into(),
            last_alloc_value,
            data_version,
        }
    }
}

/// Counter pair stored in the cache tier hash for one service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheCounter {
    pub last_alloc_value: i64,
    pub data_version: i64,
}

impl CacheCounter {
    pub const fn new(last_alloc_value: i64, data_version: i64) -> Self {
        Self {
            last_alloc_value,
            data_version,
        }
    }
}

/// A contiguous range of reserved IDs.
///
/// The interval `(last_alloc_value, max_value]` is still available to hand
/// out without contacting the cache tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub last_alloc_value: i64,
    pub max_value: i64,
}

impl Segment {
    pub const fn new(last_alloc_value: i64, max_value: i64) -> Self {
        debug_assert!(last_alloc_value <= max_value);
        Self {
            last_alloc_value,
            max_value,
        }
    }

    /// Number of IDs still available in this segment.
    pub const fn remaining(&self) -> i64 {
        self.max_value - self.last_alloc_value
    }

    pub const fn is_exhausted(&self) -> bool {
        self.last_alloc_value >= self.max_value
    }

    /// Takes up to `count` IDs from the front of the segment and appends them
    /// to `out`. Returns how many were taken.
    pub fn take_into(&mut self, count: i64, out: &mut Vec<i64>) -> i64 {
        let taken = count.min(self.remaining()).max(0);
        let start = self.last_alloc_value + 1;
        let end = self.last_alloc_value + taken;
        out.extend(start..=end);
        self.last_alloc_value = end;
        taken
    }
}

/// Work item enqueued by the batch issuer for the synchronization pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncItem {
    pub service_name: String,
    pub last_alloc_value: i64,
    pub data_version: i64,
}

impl From<SyncItem> for AllocationState {
    fn from(item: SyncItem) -> Self {
        Self {
            service_name: item.service_name,
            last_alloc_value: item.last_alloc_value,
            data_version: item.data_version,
        }
    }
}
