//! Read-only query helpers feeding the balance reconciler (§2, supplemental).
//!
//! `refunded_sigs` carries no memo column (Open Question resolution, see
//! DESIGN.md), so the refund exclusion set here is global rather than
//! per-account — harmless, since a sig belongs to exactly one account's
//! deposit memo.

use std::collections::HashSet;

use super::Store;
use crate::error::StoreError;

/// One deposit signature's contribution to an account's expected T_D flow:
/// present in either `unprocessed_sigs` or `processed_sigs`, carrying its memo
/// so the caller can filter by `nexus:<account>`.
pub struct DepositFlowRow {
    pub sig: String,
    pub memo: Option<String>,
    pub amount_usdc_units: i64,
    /// `Some` only for rows already promoted to `processed_sigs`.
    pub amount_usdd: Option<i64>,
}

impl Store {
    /// All deposit signatures (unprocessed + processed) observed at or after `since_ts`.
    pub async fn list_deposit_flows_since(
        &self,
        since_ts: i64,
    ) -> Result<Vec<DepositFlowRow>, StoreError> {
        let unprocessed: Vec<(String, Option<String>, i64)> = sqlx::query_as(
            "SELECT sig, memo, amount_usdc_units FROM unprocessed_sigs WHERE ts >= ?",
        )
        .bind(since_ts)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let processed: Vec<(String, Option<String>, i64, Option<i64>)> = sqlx::query_as(
            "SELECT sig, memo, amount_usdc_units, amount_usdd FROM processed_sigs WHERE ts >= ?",
        )
        .bind(since_ts)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut rows: Vec<DepositFlowRow> = unprocessed
            .into_iter()
            .map(|(sig, memo, amount_usdc_units)| DepositFlowRow {
                sig,
                memo,
                amount_usdc_units,
                amount_usdd: None,
            })
            .collect();
        rows.extend(
            processed
                .into_iter()
                .map(|(sig, memo, amount_usdc_units, amount_usdd)| DepositFlowRow {
                    sig,
                    memo,
                    amount_usdc_units,
                    amount_usdd,
                }),
        );
        Ok(rows)
    }

    /// Signatures already refunded at or after `since_ts` — excluded from the
    /// expected-flow computation regardless of which account they memo'd.
    pub async fn refunded_sig_set_since(&self, since_ts: i64) -> Result<HashSet<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT sig FROM refunded_sigs WHERE ts >= ?")
                .bind(since_ts)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(rows.into_iter().map(|(sig,)| sig).collect())
    }

    /// Sum of `amount_usdd_units` across `processed_txids` whose Chain-N sender is
    /// `sender`, at or after `since_ts` — the T_D value this account has already
    /// had swapped out to Chain-S.
    pub async fn processed_credit_outflow_for_sender(
        &self,
        sender: &str,
        since_ts: i64,
    ) -> Result<i64, StoreError> {
        let sum: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(amount_usdd_units) FROM processed_txids WHERE sender = ? AND ts >= ?",
        )
        .bind(sender)
        .bind(since_ts)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
        .flatten();
        Ok(sum.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_store;

    #[tokio::test]
    async fn deposit_flows_include_both_unprocessed_and_processed() {
        let store = test_store().await;
        store
            .insert_unprocessed_deposit("sig1", 100, "alice", 1_000_000, Some("nexus:acct1"))
            .await
            .unwrap();
        store
            .insert_unprocessed_deposit("sig2", 100, "bob", 2_000_000, Some("nexus:acct1"))
            .await
            .unwrap();
        store.promote_to_processed("sig2", 1_490_500).await.unwrap();

        let rows = store.list_deposit_flows_since(0).await.unwrap();
        assert_eq!(rows.len(), 2);
        let processed = rows.iter().find(|r| r.sig == "sig2").unwrap();
        assert_eq!(processed.amount_usdd, Some(1_490_500));
    }

    #[tokio::test]
    async fn refunded_sig_set_excludes_resolved_deposits() {
        let store = test_store().await;
        store
            .insert_unprocessed_deposit("sig3", 100, "carol", 500_000, Some("nexus:acct1"))
            .await
            .unwrap();
        store.promote_to_refunded("sig3", 500_000, Some("refundsig")).await.unwrap();

        let refunded = store.refunded_sig_set_since(0).await.unwrap();
        assert!(refunded.contains("sig3"));
    }

    #[tokio::test]
    async fn processed_credit_outflow_sums_by_sender() {
        let store = test_store().await;
        store
            .insert_unprocessed_credit("tx1", "c1", 100, "acct1", None, 3_000_000, None)
            .await
            .unwrap();
        store.promote_to_send_confirmed("tx1").await.unwrap();

        let total = store.processed_credit_outflow_for_sender("acct1", 0).await.unwrap();
        assert_eq!(total, 3_000_000);
    }
}
