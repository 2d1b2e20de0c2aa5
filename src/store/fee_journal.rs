//! Append-only fee journal plus a self-healing running total. The backing
//! reconciler reads the running total to decide how much surplus is
//! attributable to fees versus float drift.

use super::types::FeeEntry;
use super::Store;
use crate::error::StoreError;

impl Store {
    pub async fn record_deposit_fee(
        &self,
        sig: &str,
        usdc_units: i64,
        ts: i64,
    ) -> Result<(), StoreError> {
        self.record_fee_entry(Some(sig), None, "deposit", Some(usdc_units), None, ts)
            .await
    }

    pub async fn record_credit_fee(
        &self,
        txid: &str,
        usdd_units: i64,
        ts: i64,
    ) -> Result<(), StoreError> {
        self.record_fee_entry(None, Some(txid), "credit", None, Some(usdd_units), ts)
            .await
    }

    async fn record_fee_entry(
        &self,
        sig: Option<&str>,
        txid: Option<&str>,
        kind: &str,
        usdc_units: Option<i64>,
        usdd_units: Option<i64>,
        ts: i64,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query(
            "INSERT INTO fee_entries (sig, txid, kind, usdc_units, usdd_units, ts)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(sig)
        .bind(txid)
        .bind(kind)
        .bind(usdc_units)
        .bind(usdd_units)
        .bind(ts)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let updated = sqlx::query(
            "UPDATE fee_summary SET usdc_units = usdc_units + ?, usdd_units = usdd_units + ? WHERE id = 1",
        )
        .bind(usdc_units.unwrap_or(0))
        .bind(usdd_units.unwrap_or(0))
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        if updated.rows_affected() == 0 {
            sqlx::query("INSERT INTO fee_summary (id, usdc_units, usdd_units) VALUES (1, ?, ?)")
                .bind(usdc_units.unwrap_or(0))
                .bind(usdd_units.unwrap_or(0))
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }

        tx.commit().await.map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    /// The running total as currently recorded. Self-healing: `recompute_fee_summary`
    /// resyncs it against the journal should the two ever drift (e.g. after a
    /// restore from an older backup of only one of the two tables).
    pub async fn read_fee_summary(&self) -> Result<(i64, i64), StoreError> {
        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT usdc_units, usdd_units FROM fee_summary WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(row.unwrap_or((0, 0)))
    }

    pub async fn recompute_fee_summary(&self) -> Result<(i64, i64), StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Backend(e.to_string()))?;

        let totals: (Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT SUM(usdc_units), SUM(usdd_units) FROM fee_entries",
        )
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        let usdc = totals.0.unwrap_or(0);
        let usdd = totals.1.unwrap_or(0);

        sqlx::query("DELETE FROM fee_summary WHERE id = 1")
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        sqlx::query("INSERT INTO fee_summary (id, usdc_units, usdd_units) VALUES (1, ?, ?)")
            .bind(usdc)
            .bind(usdd)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        tx.commit().await.map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok((usdc, usdd))
    }

    pub async fn list_fee_entries(&self, limit: i64) -> Result<Vec<FeeEntry>, StoreError> {
        let rows: Vec<(i64, Option<String>, Option<String>, String, Option<i64>, Option<i64>, i64)> =
            sqlx::query_as(
                "SELECT id, sig, txid, kind, usdc_units, usdd_units, ts
                 FROM fee_entries ORDER BY ts DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(id, sig, txid, kind, usdc_units, usdd_units, ts)| FeeEntry {
                id,
                sig,
                txid,
                kind,
                usdc_units,
                usdd_units,
                ts,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_store;

    #[tokio::test]
    async fn fee_summary_accumulates_across_entries() {
        let store = test_store().await;
        store.record_deposit_fee("sig1", 509_500, 100).await.unwrap();
        store.record_deposit_fee("sig2", 1_500, 200).await.unwrap();
        store.record_credit_fee("tx1", 501_500, 300).await.unwrap();

        let (usdc, usdd) = store.read_fee_summary().await.unwrap();
        assert_eq!(usdc, 511_000);
        assert_eq!(usdd, 501_500);
    }

    #[tokio::test]
    async fn recompute_resyncs_from_journal() {
        let store = test_store().await;
        store.record_deposit_fee("sig1", 1_000, 100).await.unwrap();
        sqlx::query("UPDATE fee_summary SET usdc_units = 999999 WHERE id = 1")
            .execute(&store.pool)
            .await
            .unwrap();
        let (usdc, _) = store.read_fee_summary().await.unwrap();
        assert_eq!(usdc, 999_999);

        let (usdc, _) = store.recompute_fee_summary().await.unwrap();
        assert_eq!(usdc, 1_000);
    }
}
