//! Chain-N → Chain-S credit lifecycle: `unprocessed_txids` → one of
//! `processed_txids` (status `send_confirmed`) / `refunded_txids` / `quarantined_txids`.
//!
//! Dedup against an already-known `(txid, contract_id)` pair is a direct
//! existence check against the store, not a parsed string key (Open Question
//! #2 resolution, see DESIGN.md).

use super::types::{
    CreditStatus, ProcessedCredit, ProcessedCreditStatus, QuarantinedCredit, RefundedCredit,
    UnprocessedCredit,
};
use super::Store;
use crate::error::StoreError;

impl Store {
    pub async fn insert_unprocessed_credit(
        &self,
        txid: &str,
        contract_id: &str,
        ts: i64,
        sender: &str,
        owner: Option<&str>,
        amount_usdd_units: i64,
        reference: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO unprocessed_txids
                (txid, contract_id, ts, sender, owner, amount_usdd_units, reference, confirmations, status, resolved_receival_account, payout_sig)
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, NULL, NULL)
             ON CONFLICT (txid) DO NOTHING",
        )
        .bind(txid)
        .bind(contract_id)
        .bind(ts)
        .bind(sender)
        .bind(owner)
        .bind(amount_usdd_units)
        .bind(reference)
        .bind(CreditStatus::New.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    pub async fn get_unprocessed_credit(
        &self,
        txid: &str,
    ) -> Result<Option<UnprocessedCredit>, StoreError> {
        let row = self.fetch_unprocessed_credit_row(txid).await?;
        Ok(row)
    }

    async fn fetch_unprocessed_credit_row(
        &self,
        txid: &str,
    ) -> Result<Option<UnprocessedCredit>, StoreError> {
        #[allow(clippy::type_complexity)]
        let row: Option<(
            String,
            String,
            i64,
            String,
            Option<String>,
            i64,
            Option<String>,
            i64,
            String,
            Option<String>,
            Option<String>,
        )> = sqlx::query_as(
            "SELECT txid, contract_id, ts, sender, owner, amount_usdd_units, reference,
                    confirmations, status, resolved_receival_account, payout_sig
             FROM unprocessed_txids WHERE txid = ?",
        )
        .bind(txid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(row.map(
            |(
                txid,
                contract_id,
                ts,
                sender,
                owner,
                amount_usdd_units,
                reference,
                confirmations,
                status,
                resolved_receival_account,
                payout_sig,
            )| UnprocessedCredit {
                txid,
                contract_id,
                ts,
                sender,
                owner,
                amount_usdd_units,
                reference,
                confirmations,
                status: CreditStatus::parse(&status).unwrap_or(CreditStatus::New),
                resolved_receival_account,
                payout_sig,
            },
        ))
    }

    pub async fn list_unprocessed_credits(
        &self,
        limit: i64,
    ) -> Result<Vec<UnprocessedCredit>, StoreError> {
        #[allow(clippy::type_complexity)]
        let rows: Vec<(
            String,
            String,
            i64,
            String,
            Option<String>,
            i64,
            Option<String>,
            i64,
            String,
            Option<String>,
            Option<String>,
        )> = sqlx::query_as(
            "SELECT txid, contract_id, ts, sender, owner, amount_usdd_units, reference,
                    confirmations, status, resolved_receival_account, payout_sig
             FROM unprocessed_txids ORDER BY ts ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    txid,
                    contract_id,
                    ts,
                    sender,
                    owner,
                    amount_usdd_units,
                    reference,
                    confirmations,
                    status,
                    resolved_receival_account,
                    payout_sig,
                )| UnprocessedCredit {
                    txid,
                    contract_id,
                    ts,
                    sender,
                    owner,
                    amount_usdd_units,
                    reference,
                    confirmations,
                    status: CreditStatus::parse(&status).unwrap_or(CreditStatus::New),
                    resolved_receival_account,
                    payout_sig,
                },
            )
            .collect())
    }

    /// Is `(txid, contract_id)` already known, in any table? Mirrors the original's
    /// `processed_key = f"{tx_id}:{cid}"` dedup, but checked against durable state
    /// instead of an in-process set.
    pub async fn is_credit_known(&self, txid: &str, contract_id: &str) -> Result<bool, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT txid FROM unprocessed_txids WHERE txid = ? AND contract_id = ?",
        )
        .bind(txid)
        .bind(contract_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        if row.is_some() {
            return Ok(true);
        }
        for table in ["processed_txids", "refunded_txids", "quarantined_txids"] {
            let query = format!("SELECT 1 FROM {table} WHERE txid = ?");
            let row: Option<(i64,)> = sqlx::query_as(&query)
                .bind(txid)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            if row.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn set_credit_status(&self, txid: &str, status: CreditStatus) -> Result<(), StoreError> {
        sqlx::query("UPDATE unprocessed_txids SET status = ? WHERE txid = ?")
            .bind(status.as_str())
            .bind(txid)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    pub async fn set_credit_resolved_account(
        &self,
        txid: &str,
        account: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE unprocessed_txids SET resolved_receival_account = ? WHERE txid = ?")
            .bind(account)
            .bind(txid)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    pub async fn set_credit_payout_sig(&self, txid: &str, payout_sig: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE unprocessed_txids SET payout_sig = ? WHERE txid = ?")
            .bind(payout_sig)
            .bind(txid)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    pub async fn promote_to_send_confirmed(&self, txid: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Backend(e.to_string()))?;

        let row: Option<(i64, String, i64, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT ts, sender, amount_usdd_units, resolved_receival_account, payout_sig
             FROM unprocessed_txids WHERE txid = ?",
        )
        .bind(txid)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let Some((ts, sender, amount_usdd_units, receival_account, payout_sig)) = row else {
            tx.rollback().await.ok();
            return Err(StoreError::NotFound(txid.to_string()));
        };

        sqlx::query(
            "INSERT INTO processed_txids (txid, ts, sender, amount_usdd_units, receival_account, payout_sig, status)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (txid) DO NOTHING",
        )
        .bind(txid)
        .bind(ts)
        .bind(&sender)
        .bind(amount_usdd_units)
        .bind(&receival_account)
        .bind(&payout_sig)
        .bind(ProcessedCreditStatus::SendConfirmed.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query("DELETE FROM unprocessed_txids WHERE txid = ?")
            .bind(txid)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        tx.commit().await.map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    pub async fn promote_to_refunded_credit(
        &self,
        txid: &str,
        refunded_amount_usdd_units: i64,
        refund_txid: Option<&str>,
        reason: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Backend(e.to_string()))?;

        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT ts, sender FROM unprocessed_txids WHERE txid = ?")
                .bind(txid)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

        let Some((ts, sender)) = row else {
            tx.rollback().await.ok();
            return Err(StoreError::NotFound(txid.to_string()));
        };

        sqlx::query(
            "INSERT INTO refunded_txids (txid, ts, sender, refunded_amount_usdd_units, refund_txid, reason)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (txid) DO NOTHING",
        )
        .bind(txid)
        .bind(ts)
        .bind(&sender)
        .bind(refunded_amount_usdd_units)
        .bind(refund_txid)
        .bind(reason)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query("DELETE FROM unprocessed_txids WHERE txid = ?")
            .bind(txid)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        tx.commit().await.map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    pub async fn promote_to_quarantined_credit(
        &self,
        txid: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Backend(e.to_string()))?;

        let row: Option<(i64, String, i64)> = sqlx::query_as(
            "SELECT ts, sender, amount_usdd_units FROM unprocessed_txids WHERE txid = ?",
        )
        .bind(txid)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let Some((ts, sender, amount_usdd_units)) = row else {
            tx.rollback().await.ok();
            return Err(StoreError::NotFound(txid.to_string()));
        };

        sqlx::query(
            "INSERT INTO quarantined_txids (txid, ts, sender, amount_usdd_units, reason)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (txid) DO NOTHING",
        )
        .bind(txid)
        .bind(ts)
        .bind(&sender)
        .bind(amount_usdd_units)
        .bind(reason)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query("DELETE FROM unprocessed_txids WHERE txid = ?")
            .bind(txid)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        tx.commit().await.map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Direct terminal-table check replacing the original's substring-parsed
    /// `"txid:" in reason` dedup (Open Question #2).
    pub async fn is_credit_refunded(&self, txid: &str) -> Result<bool, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT txid FROM refunded_txids WHERE txid = ?")
            .bind(txid)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(row.is_some())
    }

    pub async fn get_processed_credit(
        &self,
        txid: &str,
    ) -> Result<Option<ProcessedCredit>, StoreError> {
        let row: Option<(String, i64, String, i64, Option<String>, Option<String>, String)> =
            sqlx::query_as(
                "SELECT txid, ts, sender, amount_usdd_units, receival_account, payout_sig, status
                 FROM processed_txids WHERE txid = ?",
            )
            .bind(txid)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(row.map(
            |(txid, ts, sender, amount_usdd_units, receival_account, payout_sig, status)| {
                ProcessedCredit {
                    txid,
                    ts,
                    sender,
                    amount_usdd_units,
                    receival_account,
                    payout_sig,
                    status: match status.as_str() {
                        "refunded" => ProcessedCreditStatus::Refunded,
                        "quarantined" => ProcessedCreditStatus::Quarantined,
                        _ => ProcessedCreditStatus::SendConfirmed,
                    },
                }
            },
        ))
    }

    pub async fn list_refunded_credits(&self, limit: i64) -> Result<Vec<RefundedCredit>, StoreError> {
        let rows: Vec<(String, i64, String, i64, Option<String>, String)> = sqlx::query_as(
            "SELECT txid, ts, sender, refunded_amount_usdd_units, refund_txid, reason
             FROM refunded_txids ORDER BY ts DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(
                |(txid, ts, sender, refunded_amount_usdd_units, refund_txid, reason)| RefundedCredit {
                    txid,
                    ts,
                    sender,
                    refunded_amount_usdd_units,
                    refund_txid,
                    reason,
                },
            )
            .collect())
    }

    pub async fn list_quarantined_credits(
        &self,
        limit: i64,
    ) -> Result<Vec<QuarantinedCredit>, StoreError> {
        let rows: Vec<(String, i64, String, i64, String)> = sqlx::query_as(
            "SELECT txid, ts, sender, amount_usdd_units, reason
             FROM quarantined_txids ORDER BY ts DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(txid, ts, sender, amount_usdd_units, reason)| QuarantinedCredit {
                txid,
                ts,
                sender,
                amount_usdd_units,
                reason,
            })
            .collect())
    }

    /// Unlike `is_credit_known`, does not check `unprocessed_txids` — a row
    /// still sitting there hasn't been resolved by anyone yet, so it is not
    /// terminal from the recovery scan's point of view.
    async fn is_credit_terminal(&self, txid: &str) -> Result<bool, StoreError> {
        for table in ["processed_txids", "refunded_txids", "quarantined_txids"] {
            let query = format!("SELECT 1 FROM {table} WHERE txid = ?");
            let row: Option<(i64,)> = sqlx::query_as(&query)
                .bind(txid)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            if row.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Best-effort recovery marker for a payout observed only via a vault memo
    /// scan (§4.9): reuses `promote_to_send_confirmed` when the row is still
    /// ours to promote, otherwise inserts a minimal placeholder directly into
    /// `processed_txids`. Never rewrites an already-resolved row.
    pub async fn recover_processed_credit(
        &self,
        txid: &str,
        payout_sig: &str,
    ) -> Result<bool, StoreError> {
        if self.is_credit_terminal(txid).await? {
            return Ok(false);
        }
        if self.get_unprocessed_credit(txid).await?.is_some() {
            self.set_credit_payout_sig(txid, payout_sig).await?;
            self.promote_to_send_confirmed(txid).await?;
            return Ok(true);
        }
        sqlx::query(
            "INSERT INTO processed_txids (txid, ts, sender, amount_usdd_units, receival_account, payout_sig, status)
             VALUES (?, ?, '', 0, NULL, ?, ?)
             ON CONFLICT (txid) DO NOTHING",
        )
        .bind(txid)
        .bind(super::now_epoch())
        .bind(payout_sig)
        .bind(ProcessedCreditStatus::SendConfirmed.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_store;
    use super::super::types::CreditStatus;

    #[tokio::test]
    async fn dedup_by_txid_and_contract_id() {
        let store = test_store().await;
        store
            .insert_unprocessed_credit("tx1", "c1", 100, "sender", None, 5_000_000, Some("solana:bob"))
            .await
            .unwrap();
        assert!(store.is_credit_known("tx1", "c1").await.unwrap());
        assert!(!store.is_credit_known("tx1", "c2").await.unwrap());
    }

    #[tokio::test]
    async fn promote_to_send_confirmed_carries_payout_sig() {
        let store = test_store().await;
        store
            .insert_unprocessed_credit("tx2", "c1", 100, "sender", None, 5_000_000, None)
            .await
            .unwrap();
        store.set_credit_payout_sig("tx2", "outsig").await.unwrap();
        store.promote_to_send_confirmed("tx2").await.unwrap();
        let processed = store.get_processed_credit("tx2").await.unwrap().unwrap();
        assert_eq!(processed.payout_sig, Some("outsig".to_string()));
    }

    #[tokio::test]
    async fn refund_dedup_uses_terminal_table_not_reason_text() {
        let store = test_store().await;
        store
            .insert_unprocessed_credit("tx3", "c1", 100, "sender", None, 100, None)
            .await
            .unwrap();
        assert!(!store.is_credit_refunded("tx3").await.unwrap());
        store
            .promote_to_refunded_credit("tx3", 100, Some("refundtx"), "invalid reference")
            .await
            .unwrap();
        assert!(store.is_credit_refunded("tx3").await.unwrap());
    }

    #[tokio::test]
    async fn recover_processed_credit_is_additive_and_idempotent() {
        let store = test_store().await;
        assert!(store.recover_processed_credit("tx5", "outsig5").await.unwrap());
        let processed = store.get_processed_credit("tx5").await.unwrap().unwrap();
        assert_eq!(processed.payout_sig, Some("outsig5".to_string()));
        assert!(!store.recover_processed_credit("tx5", "outsig5").await.unwrap());
    }

    #[tokio::test]
    async fn recover_processed_credit_promotes_existing_unprocessed_row() {
        let store = test_store().await;
        store
            .insert_unprocessed_credit("tx6", "c1", 100, "sender", None, 5_000_000, None)
            .await
            .unwrap();
        assert!(store.recover_processed_credit("tx6", "outsig6").await.unwrap());
        assert!(store.get_unprocessed_credit("tx6").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_transitions_are_visible_before_promotion() {
        let store = test_store().await;
        store
            .insert_unprocessed_credit("tx4", "c1", 100, "sender", None, 100, None)
            .await
            .unwrap();
        store
            .set_credit_status("tx4", CreditStatus::RecipientUnresolved)
            .await
            .unwrap();
        let credit = store.get_unprocessed_credit("tx4").await.unwrap().unwrap();
        assert_eq!(credit.status, CreditStatus::RecipientUnresolved);
    }
}
