use super::DurableStore;
use crate::{AllocationState, Result};
use core::time::Duration;
use parking_lot::Mutex;
use rusqlite::{Connection, Row, params, params_from_iter};
use std::path::Path;
use std::sync::Arc;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tbl_alloc_info (
    service_name     TEXT    NOT NULL PRIMARY KEY,
    last_alloc_value INTEGER NOT NULL,
    data_version     INTEGER NOT NULL
);
";

const SELECT_ALL: &str = "SELECT service_name, last_alloc_value, data_version FROM tbl_alloc_info";

const INSERT: &str =
    "INSERT INTO tbl_alloc_info (service_name, last_alloc_value, data_version) VALUES (?1, ?2, ?3)";

const UPDATE_IF_NEWER: &str = "UPDATE tbl_alloc_info SET last_alloc_value = ?2, data_version = ?3 \
     WHERE service_name = ?1 AND data_version < ?3";

/// Durable store over a SQLite database.
///
/// The connection is shared behind a mutex and every statement runs on the
/// blocking thread pool, keeping the async workers free.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and ensures the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    pub fn with_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(3))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let res = tokio::task::spawn_blocking(move || f(&conn.lock())).await?;
        Ok(res?)
    }
}

fn row_to_state(row: &Row<'_>) -> rusqlite::Result<AllocationState> {
    Ok(AllocationState {
        service_name: row.get(0)?,
        last_alloc_value: row.get(1)?,
        data_version: row.get(2)?,
    })
}

#[async_trait::async_trait]
impl DurableStore for SqliteStore {
    async fn fetch_state(&self, services: &[String]) -> Result<Vec<AllocationState>> {
        let services = services.to_vec();
        self.run(move |conn| {
            if services.is_empty() {
                let mut stmt = conn.prepare(SELECT_ALL)?;
                let rows = stmt.query_map([], row_to_state)?;
                return rows.collect();
            }

            let placeholders = vec!["?"; services.len()].join(", ");
            let sql = format!("{SELECT_ALL} WHERE service_name IN ({placeholders})");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(services.iter()), row_to_state)?;
            rows.collect()
        })
        .await
    }

    async fn insert_state(&self, state: &AllocationState) -> Result<u64> {
        let state = state.clone();
        self.run(move |conn| {
            conn.execute(
                INSERT,
                params![state.service_name, state.last_alloc_value, state.data_version],
            )
            .map(|n| n as u64)
        })
        .await
    }

    async fn update_state(&self, state: &AllocationState) -> Result<u64> {
        let state = state.clone();
        self.run(move |conn| {
            conn.execute(
                UPDATE_IF_NEWER,
                params![state.service_name, state.last_alloc_value, state.data_version],
            )
            .map(|n| n as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_fetch() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.fetch_state(&[]).await.unwrap().is_empty());

        let orders = AllocationState::new("orders", 10_000, 1);
        let users = AllocationState::new("users", 20_000, 2);
        assert_eq!(store.insert_state(&orders).await.unwrap(), 1);
        assert_eq!(store.insert_state(&users).await.unwrap(), 1);

        let mut all = store.fetch_state(&[]).await.unwrap();
        all.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        assert_eq!(all, vec![orders.clone(), users]);

        let some = store.fetch_state(&["orders".to_string()]).await.unwrap();
        assert_eq!(some, vec![orders]);

        let none = store.fetch_state(&["missing".to_string()]).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn duplicate_insert_fails() {
        let store = SqliteStore::open_in_memory().unwrap();
        let state = AllocationState::new("orders", 100, 1);
        store.insert_state(&state).await.unwrap();
        let err = store.insert_state(&state).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn update_only_moves_forward() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_state(&AllocationState::new("orders", 500, 5))
            .await
            .unwrap();

        let stale = AllocationState::new("orders", 300, 3);
        assert_eq!(store.update_state(&stale).await.unwrap(), 0);
        let same = AllocationState::new("orders", 900, 5);
        assert_eq!(store.update_state(&same).await.unwrap(), 0);
        let newer = AllocationState::new("orders", 700, 7);
        assert_eq!(store.update_state(&newer).await.unwrap(), 1);

        let rows = store.fetch_state(&[]).await.unwrap();
        assert_eq!(rows, vec![newer]);
    }

    #[tokio::test]
    async fn update_of_missing_row_affects_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let state = AllocationState::new("ghost", 1, 1);
        assert_eq!(store.update_state(&state).await.unwrap(), 0);
    }
}
