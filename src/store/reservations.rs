//! Reservation locks, retry-attempt counters, and the monotone reference counter.

use super::{now_epoch, Store};
use crate::error::StoreError;

impl Store {
    /// Attempts to acquire an advisory lock `(kind, key)` valid for `ttl_sec`.
    /// Returns `true` if acquired (no live reservation existed), `false` otherwise.
    /// Expired rows are deleted in the same transaction that inserts the new one,
    /// per §4.1 — this is advisory only; the primary-key uniqueness on terminal
    /// tables is the authoritative guard against double payout.
    pub async fn reserve(&self, kind: &str, key: &str, ttl_sec: i64) -> Result<bool, StoreError> {
        let now = now_epoch();
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Backend(e.to_string()))?;

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT ts FROM reservations WHERE kind = ? AND key = ?",
        )
        .bind(kind)
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        if let Some(ts) = existing {
            if now - ts < ttl_sec {
                tx.rollback().await.ok();
                return Ok(false);
            }
            sqlx::query("DELETE FROM reservations WHERE kind = ? AND key = ?")
                .bind(kind)
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }

        sqlx::query("INSERT INTO reservations (kind, key, ts) VALUES (?, ?, ?)")
            .bind(kind)
            .bind(key)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        tx.commit().await.map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(true)
    }

    pub async fn release_reservation(&self, kind: &str, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM reservations WHERE kind = ? AND key = ?")
            .bind(kind)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    /// `should_attempt`: permitted if `count < max_attempts` and the cooldown since
    /// `last_ts` has elapsed. A missing row is always permitted.
    pub async fn should_attempt(
        &self,
        action_key: &str,
        max_attempts: u32,
        cooldown_sec: i64,
    ) -> Result<bool, StoreError> {
        let row: Option<(i64, i64)> = sqlx::query_as(
            "SELECT count, last_ts FROM attempts WHERE action_key = ?",
        )
        .bind(action_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        match row {
            None => Ok(true),
            Some((count, last_ts)) => {
                if count >= max_attempts as i64 {
                    return Ok(false);
                }
                Ok(now_epoch() - last_ts >= cooldown_sec)
            }
        }
    }

    pub async fn record_attempt(&self, action_key: &str) -> Result<u32, StoreError> {
        let now = now_epoch();
        // SQLite/Postgres-portable upsert: try update, insert on no rows affected.
        let updated = sqlx::query(
            "UPDATE attempts SET count = count + 1, last_ts = ? WHERE action_key = ?",
        )
        .bind(now)
        .bind(action_key)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        if updated.rows_affected() == 0 {
            sqlx::query(
                "INSERT INTO attempts (action_key, count, last_ts) VALUES (?, 1, ?)",
            )
            .bind(action_key)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
            return Ok(1);
        }

        let count: i64 = sqlx::query_scalar("SELECT count FROM attempts WHERE action_key = ?")
            .bind(action_key)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(count as u32)
    }

    pub async fn attempt_count(&self, action_key: &str) -> Result<u32, StoreError> {
        let count: Option<i64> =
            sqlx::query_scalar("SELECT count FROM attempts WHERE action_key = ?")
                .bind(action_key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(count.unwrap_or(0) as u32)
    }

    /// Atomic `UPDATE ... value = value + 1 RETURNING value`, seeding from
    /// `MAX(reference)` over `processed_sigs` on first use.
    pub async fn next_counter(&self, name: &str) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Backend(e.to_string()))?;

        let existing: Option<i64> = sqlx::query_scalar("SELECT value FROM counters WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let next = match existing {
            Some(v) => {
                let next = v + 1;
                sqlx::query("UPDATE counters SET value = ? WHERE name = ?")
                    .bind(next)
                    .bind(name)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                next
            }
            None => {
                let seed: Option<i64> =
                    sqlx::query_scalar("SELECT MAX(reference) FROM processed_sigs")
                        .fetch_optional(&mut *tx)
                        .await
                        .map_err(|e| StoreError::Backend(e.to_string()))?
                        .flatten();
                let next = seed.unwrap_or(0) + 1;
                sqlx::query("INSERT INTO counters (name, value) VALUES (?, ?)")
                    .bind(name)
                    .bind(next)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                next
            }
        };

        tx.commit().await.map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(next)
    }

    /// `MAX(reference)` over `processed_sigs`, read-only — used by startup recovery
    /// to compute the counter floor without consuming a reference via `next_counter`.
    pub async fn max_processed_reference(&self) -> Result<i64, StoreError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(reference) FROM processed_sigs")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .flatten();
        Ok(max.unwrap_or(0))
    }

    /// Seeds the reference counter to `max(stored_max, floor)` without advancing it,
    /// used by startup recovery (§4.9). No-op if a counter row already exists.
    pub async fn seed_counter_floor(&self, name: &str, floor: i64) -> Result<i64, StoreError> {
        let existing: Option<i64> = sqlx::query_scalar("SELECT value FROM counters WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        if let Some(v) = existing {
            return Ok(v);
        }
        sqlx::query("INSERT INTO counters (name, value) VALUES (?, ?)")
            .bind(name)
            .bind(floor)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(floor)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_store;

    #[tokio::test]
    async fn reservation_blocks_until_ttl_expires() {
        let store = test_store().await;
        assert!(store.reserve("debit", "sig1", 60).await.unwrap());
        assert!(!store.reserve("debit", "sig1", 60).await.unwrap());
        assert!(store.reserve("debit", "sig1", 0).await.unwrap());
    }

    #[tokio::test]
    async fn should_attempt_respects_cap_and_cooldown() {
        let store = test_store().await;
        assert!(store.should_attempt("send:tx1", 2, 30).await.unwrap());
        store.record_attempt("send:tx1").await.unwrap();
        assert!(!store.should_attempt("send:tx1", 2, 30).await.unwrap());
        assert!(store.should_attempt("send:tx1", 2, 0).await.unwrap());
        store.record_attempt("send:tx1").await.unwrap();
        assert!(!store.should_attempt("send:tx1", 2, 0).await.unwrap());
    }

    #[tokio::test]
    async fn max_processed_reference_defaults_to_zero() {
        let store = test_store().await;
        assert_eq!(store.max_processed_reference().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn counter_is_strictly_monotone() {
        let store = test_store().await;
        let a = store.next_counter("reference").await.unwrap();
        let b = store.next_counter("reference").await.unwrap();
        let c = store.next_counter("reference").await.unwrap();
        assert!(a < b);
        assert!(b < c);
    }
}
