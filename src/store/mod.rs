//! Transactional store over `sqlx::AnyPool` (SQLite by default, Postgres for
//! operators who want a separately managed database).
//!
//! Every lifecycle promotion in this module runs inside a single `sqlx`
//! transaction, and every terminal table's primary key is the system-wide
//! guard against double payout (§4.1). In-memory caching is deliberately
//! absent: there is exactly one backend, so this module exposes one
//! concrete `Store` type with inherent methods rather than a family of
//! swappable backend traits.

mod credits;
mod deposits;
mod fee_journal;
mod heartbeat;
pub mod reconcile;
mod reservations;
pub mod schema;
mod service_state;
pub mod types;

use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tracing::info;

use crate::error::StoreError;

#[derive(Clone)]
pub struct Store {
    pool: AnyPool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for stmt in schema::SCHEMA.split(';') {
            let stmt = stmt.trim();
            if stmt.is_empty() {
                continue;
            }
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        info!("store schema migration applied");
        Ok(())
    }
}

/// Current Unix timestamp in seconds. The only clock read in the store layer;
/// every other module receives timestamps as parameters so tests can control them.
pub fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
pub(crate) async fn test_store() -> Store {
    Store::connect("sqlite::memory:").await.expect("in-memory store")
}
