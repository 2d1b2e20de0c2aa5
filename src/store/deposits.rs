//! Chain-S → Chain-N deposit lifecycle: `unprocessed_sigs` → one of
//! `processed_sigs` (status `debit_confirmed`) / `refunded_sigs` / `quarantined_sigs`.
//!
//! Insert, promote-to-processed, promote-to-refunded, and promote-to-quarantined
//! are distinct typed operations (Open Question #3 resolution, see DESIGN.md) —
//! no single overloaded write path stands in for all of them.

use super::types::{
    DepositStatus, ProcessedDeposit, ProcessedDepositStatus, QuarantinedSig, RefundedSig,
    UnprocessedDeposit,
};
use super::Store;
use crate::error::StoreError;

impl Store {
    pub async fn insert_unprocessed_deposit(
        &self,
        sig: &str,
        ts: i64,
        sender: &str,
        amount_usdc_units: i64,
        memo: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO unprocessed_sigs (sig, ts, sender, amount_usdc_units, memo, status, reference, txid)
             VALUES (?, ?, ?, ?, ?, ?, NULL, NULL)
             ON CONFLICT (sig) DO NOTHING",
        )
        .bind(sig)
        .bind(ts)
        .bind(sender)
        .bind(amount_usdc_units)
        .bind(memo)
        .bind(DepositStatus::New.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    pub async fn get_unprocessed_deposit(
        &self,
        sig: &str,
    ) -> Result<Option<UnprocessedDeposit>, StoreError> {
        let row: Option<(String, i64, String, i64, Option<String>, String, Option<i64>, Option<String>)> =
            sqlx::query_as(
                "SELECT sig, ts, sender, amount_usdc_units, memo, status, reference, txid
                 FROM unprocessed_sigs WHERE sig = ?",
            )
            .bind(sig)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(row.map(|(sig, ts, sender, amount_usdc_units, memo, status, reference, txid)| {
            UnprocessedDeposit {
                sig,
                ts,
                sender,
                amount_usdc_units,
                memo,
                status: DepositStatus::parse(&status).unwrap_or(DepositStatus::New),
                reference,
                txid,
            }
        }))
    }

    /// Deposits not yet resolved to a terminal table, oldest-ts-first, capped at `limit`.
    /// Mirrors `poll_solana_deposits`'s loop-cap semantics (§4.4).
    pub async fn list_unprocessed_deposits(
        &self,
        limit: i64,
    ) -> Result<Vec<UnprocessedDeposit>, StoreError> {
        let rows: Vec<(String, i64, String, i64, Option<String>, String, Option<i64>, Option<String>)> =
            sqlx::query_as(
                "SELECT sig, ts, sender, amount_usdc_units, memo, status, reference, txid
                 FROM unprocessed_sigs ORDER BY ts ASC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(sig, ts, sender, amount_usdc_units, memo, status, reference, txid)| {
                UnprocessedDeposit {
                    sig,
                    ts,
                    sender,
                    amount_usdc_units,
                    memo,
                    status: DepositStatus::parse(&status).unwrap_or(DepositStatus::New),
                    reference,
                    txid,
                }
            })
            .collect())
    }

    pub async fn set_deposit_status(
        &self,
        sig: &str,
        status: DepositStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE unprocessed_sigs SET status = ? WHERE sig = ?")
            .bind(status.as_str())
            .bind(sig)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    pub async fn set_deposit_reference(&self, sig: &str, reference: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE unprocessed_sigs SET reference = ? WHERE sig = ?")
            .bind(reference)
            .bind(sig)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    pub async fn set_deposit_txid(&self, sig: &str, txid: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE unprocessed_sigs SET txid = ? WHERE sig = ?")
            .bind(txid)
            .bind(sig)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Atomically moves `sig` from `unprocessed_sigs` to `processed_sigs` with status
    /// `debit_confirmed`. The unique primary key on `processed_sigs.sig` is what makes
    /// a second call with the same `sig` a no-op rather than a double payout (§4.1).
    pub async fn promote_to_processed(
        &self,
        sig: &str,
        amount_usdd: i64,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Backend(e.to_string()))?;

        let row: Option<(i64, String, i64, Option<String>, Option<i64>, Option<String>)> = sqlx::query_as(
            "SELECT ts, sender, amount_usdc_units, memo, reference, txid FROM unprocessed_sigs WHERE sig = ?",
        )
        .bind(sig)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let Some((ts, sender, amount_usdc_units, memo, reference, txid)) = row else {
            tx.rollback().await.ok();
            return Err(StoreError::NotFound(sig.to_string()));
        };

        sqlx::query(
            "INSERT INTO processed_sigs (sig, ts, sender, amount_usdc_units, memo, reference, txid, amount_usdd, status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (sig) DO NOTHING",
        )
        .bind(sig)
        .bind(ts)
        .bind(&sender)
        .bind(amount_usdc_units)
        .bind(&memo)
        .bind(reference)
        .bind(&txid)
        .bind(amount_usdd)
        .bind(ProcessedDepositStatus::DebitConfirmed.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query("DELETE FROM unprocessed_sigs WHERE sig = ?")
            .bind(sig)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        tx.commit().await.map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    pub async fn promote_to_refunded(
        &self,
        sig: &str,
        refunded_amount_usdc_units: i64,
        refund_sig: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Backend(e.to_string()))?;

        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT ts, sender FROM unprocessed_sigs WHERE sig = ?")
                .bind(sig)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

        let Some((ts, sender)) = row else {
            tx.rollback().await.ok();
            return Err(StoreError::NotFound(sig.to_string()));
        };

        sqlx::query(
            "INSERT INTO refunded_sigs (sig, ts, sender, refunded_amount_usdc_units, refund_sig)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (sig) DO NOTHING",
        )
        .bind(sig)
        .bind(ts)
        .bind(&sender)
        .bind(refunded_amount_usdc_units)
        .bind(refund_sig)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query("DELETE FROM unprocessed_sigs WHERE sig = ?")
            .bind(sig)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        tx.commit().await.map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    pub async fn promote_to_quarantined(
        &self,
        sig: &str,
        reason: &str,
        quarantine_sig: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Backend(e.to_string()))?;

        let row: Option<(i64, String, i64, Option<String>)> = sqlx::query_as(
            "SELECT ts, sender, amount_usdc_units, memo FROM unprocessed_sigs WHERE sig = ?",
        )
        .bind(sig)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let Some((ts, sender, amount_usdc_units, memo)) = row else {
            tx.rollback().await.ok();
            return Err(StoreError::NotFound(sig.to_string()));
        };

        sqlx::query(
            "INSERT INTO quarantined_sigs (sig, ts, sender, amount_usdc_units, memo, quarantine_sig, reason)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (sig) DO NOTHING",
        )
        .bind(sig)
        .bind(ts)
        .bind(&sender)
        .bind(amount_usdc_units)
        .bind(&memo)
        .bind(quarantine_sig)
        .bind(reason)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query("DELETE FROM unprocessed_sigs WHERE sig = ?")
            .bind(sig)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        tx.commit().await.map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    pub async fn is_deposit_processed(&self, sig: &str) -> Result<bool, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT sig FROM processed_sigs WHERE sig = ?")
            .bind(sig)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(row.is_some())
    }

    pub async fn is_deposit_resolved(&self, sig: &str) -> Result<bool, StoreError> {
        for table in ["processed_sigs", "refunded_sigs", "quarantined_sigs"] {
            let query = format!("SELECT 1 FROM {table} WHERE sig = ?");
            let row: Option<(i64,)> = sqlx::query_as(&query)
                .bind(sig)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            if row.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Processed deposits awaiting confirmation-count promotion. Exact match on
    /// `debited_pending` status, resolving Open Question #1 in SPEC_FULL.md §9.
    pub async fn list_deposits_awaiting_confirmation(
        &self,
        limit: i64,
    ) -> Result<Vec<UnprocessedDeposit>, StoreError> {
        let rows: Vec<(String, i64, String, i64, Option<String>, String, Option<i64>, Option<String>)> =
            sqlx::query_as(
                "SELECT sig, ts, sender, amount_usdc_units, memo, status, reference, txid
                 FROM unprocessed_sigs WHERE status = ? ORDER BY ts ASC LIMIT ?",
            )
            .bind(DepositStatus::DebitedPending.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(sig, ts, sender, amount_usdc_units, memo, status, reference, txid)| {
                UnprocessedDeposit {
                    sig,
                    ts,
                    sender,
                    amount_usdc_units,
                    memo,
                    status: DepositStatus::parse(&status).unwrap_or(DepositStatus::New),
                    reference,
                    txid,
                }
            })
            .collect())
    }

    pub async fn get_processed_deposit(
        &self,
        sig: &str,
    ) -> Result<Option<ProcessedDeposit>, StoreError> {
        let row: Option<(
            String,
            i64,
            String,
            i64,
            Option<String>,
            Option<i64>,
            Option<String>,
            Option<i64>,
            String,
        )> = sqlx::query_as(
            "SELECT sig, ts, sender, amount_usdc_units, memo, reference, txid, amount_usdd, status
             FROM processed_sigs WHERE sig = ?",
        )
        .bind(sig)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(row.map(
            |(sig, ts, sender, amount_usdc_units, memo, reference, txid, amount_usdd, status)| {
                ProcessedDeposit {
                    sig,
                    ts,
                    sender,
                    amount_usdc_units,
                    memo,
                    reference,
                    txid,
                    amount_usdd,
                    status: match status.as_str() {
                        "refunded" => ProcessedDepositStatus::Refunded,
                        "quarantined" => ProcessedDepositStatus::Quarantined,
                        _ => ProcessedDepositStatus::DebitConfirmed,
                    },
                }
            },
        ))
    }

    pub async fn list_refunded_deposits(&self, limit: i64) -> Result<Vec<RefundedSig>, StoreError> {
        let rows: Vec<(String, i64, String, i64, Option<String>)> = sqlx::query_as(
            "SELECT sig, ts, sender, refunded_amount_usdc_units, refund_sig
             FROM refunded_sigs ORDER BY ts DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(sig, ts, sender, refunded_amount_usdc_units, refund_sig)| RefundedSig {
                sig,
                ts,
                sender,
                refunded_amount_usdc_units,
                refund_sig,
            })
            .collect())
    }

    pub async fn list_quarantined_deposits(
        &self,
        limit: i64,
    ) -> Result<Vec<QuarantinedSig>, StoreError> {
        let rows: Vec<(String, i64, String, i64, Option<String>, Option<String>, String)> =
            sqlx::query_as(
                "SELECT sig, ts, sender, amount_usdc_units, memo, quarantine_sig, reason
                 FROM quarantined_sigs ORDER BY ts DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(
                |(sig, ts, sender, amount_usdc_units, memo, quarantine_sig, reason)| QuarantinedSig {
                    sig,
                    ts,
                    sender,
                    amount_usdc_units,
                    memo,
                    quarantine_sig,
                    reason,
                },
            )
            .collect())
    }

    /// Best-effort recovery marker for a refund observed only via a vault memo
    /// scan (§4.9): reuses `promote_to_refunded` when the row is still ours to
    /// promote, otherwise inserts a minimal placeholder directly into
    /// `refunded_sigs` so a later poll never re-discovers `sig` as new. Never
    /// rewrites an already-resolved row. Returns whether a marker was added.
    pub async fn recover_refunded_sig(
        &self,
        sig: &str,
        refund_sig: &str,
    ) -> Result<bool, StoreError> {
        if self.is_deposit_resolved(sig).await? {
            return Ok(false);
        }
        if let Some(row) = self.get_unprocessed_deposit(sig).await? {
            self.promote_to_refunded(sig, row.amount_usdc_units, Some(refund_sig))
                .await?;
            return Ok(true);
        }
        sqlx::query(
            "INSERT INTO refunded_sigs (sig, ts, sender, refunded_amount_usdc_units, refund_sig)
             VALUES (?, ?, '', 0, ?)
             ON CONFLICT (sig) DO NOTHING",
        )
        .bind(sig)
        .bind(super::now_epoch())
        .bind(refund_sig)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(true)
    }
}
