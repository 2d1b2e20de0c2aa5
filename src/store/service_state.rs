//! Persisted backing-pause flag (§4.8, §7 BackingDeficit). A row in the
//! transactional store rather than an in-process bool: the pause must
//! survive a restart exactly like every other lifecycle fact, since a
//! process that crashed while paused must come back up still paused until
//! the reconciler observes the deficit has cleared.

use super::Store;
use crate::error::StoreError;

impl Store {
    pub async fn set_paused(&self, paused: bool) -> Result<(), StoreError> {
        let flag: i64 = if paused { 1 } else { 0 };
        let updated = sqlx::query("UPDATE service_state SET paused = ? WHERE id = 1")
            .bind(flag)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if updated.rows_affected() == 0 {
            sqlx::query("INSERT INTO service_state (id, paused) VALUES (1, ?)")
                .bind(flag)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn is_paused(&self) -> Result<bool, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT paused FROM service_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(row.map(|(p,)| p != 0).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_store;

    #[tokio::test]
    async fn defaults_unpaused_then_persists_across_toggles() {
        let store = test_store().await;
        assert!(!store.is_paused().await.unwrap());

        store.set_paused(true).await.unwrap();
        assert!(store.is_paused().await.unwrap());

        store.set_paused(false).await.unwrap();
        assert!(!store.is_paused().await.unwrap());
    }
}
