//! Local heartbeat mirror, per-chain waterline proposals, and the vault balance
//! sample used to gate the backing reconciler's micro-batch skip.
//!
//! The publish ordering — on-chain write first, local persist only if
//! acknowledged — lives in the orchestration layer (`heartbeat.rs` at the
//! crate root); this module only stores whatever that layer decides was
//! actually acknowledged.

use super::types::{Heartbeat, WaterlineChain};
use super::Store;
use crate::error::StoreError;

impl Store {
    pub async fn read_heartbeat(&self, asset_name: &str) -> Result<Option<Heartbeat>, StoreError> {
        let row: Option<(String, i64, Option<i64>, Option<i64>)> = sqlx::query_as(
            "SELECT asset_name, last_beat, wline_sol, wline_nxs FROM heartbeat WHERE asset_name = ?",
        )
        .bind(asset_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(row.map(|(asset_name, last_beat, wline_sol, wline_nxs)| Heartbeat {
            asset_name,
            last_beat,
            wline_sol,
            wline_nxs,
        }))
    }

    /// Persists the heartbeat locally. Callers must only invoke this after the
    /// corresponding on-chain asset update has been acknowledged — persisting
    /// first would let a local waterline advance past a beat nobody else can see.
    pub async fn write_heartbeat(
        &self,
        asset_name: &str,
        last_beat: i64,
        wline_sol: Option<i64>,
        wline_nxs: Option<i64>,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE heartbeat SET last_beat = ?, wline_sol = ?, wline_nxs = ? WHERE asset_name = ?",
        )
        .bind(last_beat)
        .bind(wline_sol)
        .bind(wline_nxs)
        .bind(asset_name)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        if updated.rows_affected() == 0 {
            sqlx::query(
                "INSERT INTO heartbeat (asset_name, last_beat, wline_sol, wline_nxs) VALUES (?, ?, ?, ?)",
            )
            .bind(asset_name)
            .bind(last_beat)
            .bind(wline_sol)
            .bind(wline_nxs)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    /// Records this poll cycle's conservative waterline proposal for `chain`.
    /// The orchestration layer takes `MIN` across recent proposals before
    /// publishing, per §4.7's safety-window rule.
    pub async fn propose_waterline(&self, chain: WaterlineChain, ts: i64) -> Result<(), StoreError> {
        let updated = sqlx::query("UPDATE waterline_proposals SET ts = ? WHERE chain = ?")
            .bind(ts)
            .bind(chain.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if updated.rows_affected() == 0 {
            sqlx::query("INSERT INTO waterline_proposals (chain, ts) VALUES (?, ?)")
                .bind(chain.as_str())
                .bind(ts)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn read_waterline_proposal(
        &self,
        chain: WaterlineChain,
    ) -> Result<Option<i64>, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT ts FROM waterline_proposals WHERE chain = ?")
                .bind(chain.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(row.map(|(ts,)| ts))
    }

    /// Overwrites the single-row vault balance sample used by the backing
    /// reconciler to decide whether a reconciliation pass is worth running.
    pub async fn write_vault_balance_sample(
        &self,
        balance_usdc_units: i64,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query("UPDATE vault_balance_sample SET balance_usdc_units = ? WHERE id = 1")
            .bind(balance_usdc_units)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if updated.rows_affected() == 0 {
            sqlx::query("INSERT INTO vault_balance_sample (id, balance_usdc_units) VALUES (1, ?)")
                .bind(balance_usdc_units)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn read_vault_balance_sample(&self) -> Result<Option<i64>, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT balance_usdc_units FROM vault_balance_sample WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(row.map(|(v,)| v))
    }
}
