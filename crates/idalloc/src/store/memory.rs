use super::DurableStore;
use crate::{AllocationState, Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// In-process durable store keyed by service name.
///
/// Mirrors the relational semantics of [`SqliteStore`](super::SqliteStore):
/// inserts fail on an existing key and updates carry the same
/// strictly-less-than version predicate.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<String, AllocationState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored row for `service`, if any.
    pub fn get(&self, service: &str) -> Option<AllocationState> {
        self.rows.lock().get(service).cloned()
    }
}

#[async_trait::async_trait]
impl DurableStore for MemoryStore {
    async fn fetch_state(&self, services: &[String]) -> Result<Vec<AllocationState>> {
        let rows = self.rows.lock();
        if services.is_empty() {
            return Ok(rows.values().cloned().collect());
        }
        Ok(services
            .iter()
            .filter_map(|service| rows.get(service).cloned())
            .collect())
    }

    async fn insert_state(&self, state: &AllocationState) -> Result<u64> {
        let mut rows = self.rows.lock();
        if rows.contains_key(&state.service_name) {
            return Err(Error::transient(format!(
                "durable store: duplicate row for {}",
                state.service_name
            )));
        }
        rows.insert(state.service_name.clone(), state.clone());
        Ok(1)
    }

    async fn update_state(&self, state: &AllocationState) -> Result<u64> {
        let mut rows = self.rows.lock();
        match rows.get_mut(&state.service_name) {
            Some(row) if row.data_version < state.data_version => {
                row.last_alloc_value = state.last_alloc_value;
                row.data_version = state.data_version;
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mirrors_relational_semantics() {
        let store = MemoryStore::new();
        let state = AllocationState::new("orders", 100, 1);
        assert_eq!(store.insert_state(&state).await.unwrap(), 1);
        assert!(store.insert_state(&state).await.is_err());

        assert_eq!(
            store
                .update_state(&AllocationState::new("orders", 50, 1))
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            store
                .update_state(&AllocationState::new("orders", 200, 2))
                .await
                .unwrap(),
            1
        );
        assert_eq!(store.get("orders"), Some(AllocationState::new("orders", 200, 2)));

        let fetched = store
            .fetch_state(&["orders".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);
    }
}
