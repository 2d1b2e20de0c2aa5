//! Balance reconciler (§2, supplemental): read-only per-account trade
//! reconciliation between the Chain-N treasury and one Chain-N account.
//! Never mutates state — this is a diagnostic, not a processor.
//!
//! Recovers a deposit's owning Nexus address by matching the `nexus:<addr>`
//! memo on `processed_sigs`/`unprocessed_sigs` rows. Only confirmed Chain-S
//! payouts keyed by their Chain-N sender are tracked here; a generic
//! Nexus-native `treasury -> account` transfer with no corresponding payout
//! row has no analogous table and is left at zero (recorded as a
//! simplification in DESIGN.md).

use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::fees::compute_payout;
use crate::store::Store;

const NEXUS_MEMO_PREFIX: &str = "nexus:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountReconciliation {
    pub account: String,
    pub waterline_ts: i64,
    pub minted_usdd: i64,
    pub treasury_out_usdd: i64,
    pub treasury_in_usdd: i64,
    pub expected_net_from_deposits_usdd: i64,
    pub non_refunded_deposit_count: usize,
    pub trade_delta_usdd: i64,
}

fn extract_nexus_address(memo: &Option<String>) -> Option<&str> {
    memo.as_deref().and_then(|m| m.strip_prefix(NEXUS_MEMO_PREFIX))
}

fn fee_net_usdd(amount_usdc_units: i64, config: &BridgeConfig) -> i64 {
    compute_payout(amount_usdc_units, config.flat_fee_usdc_units, config.dynamic_fee_bps).payout
}

/// Recomputes expected T_D flow for `account` since `waterline_ts` and flags a
/// non-zero delta. Read-only: issues no store writes and no adapter calls.
pub async fn reconcile_account(
    store: &Store,
    config: &BridgeConfig,
    account: &str,
    waterline_ts: i64,
) -> Result<AccountReconciliation, BridgeError> {
    let deposit_rows = store.list_deposit_flows_since(waterline_ts).await?;
    let refunded = store.refunded_sig_set_since(waterline_ts).await?;

    let mut minted_usdd = 0i64;
    let mut expected_net_from_deposits = 0i64;
    let mut non_refunded_deposit_count = 0usize;

    for row in &deposit_rows {
        if extract_nexus_address(&row.memo) != Some(account) {
            continue;
        }
        if let Some(amount_usdd) = row.amount_usdd {
            minted_usdd += amount_usdd;
        }
        if refunded.contains(&row.sig) {
            continue;
        }
        non_refunded_deposit_count += 1;
        expected_net_from_deposits += fee_net_usdd(row.amount_usdc_units, config);
    }

    let treasury_in_usdd = store
        .processed_credit_outflow_for_sender(account, waterline_ts)
        .await?;
    let treasury_out_usdd = minted_usdd;
    let trade_delta_usdd = (treasury_out_usdd - treasury_in_usdd) - expected_net_from_deposits;

    Ok(AccountReconciliation {
        account: account.to_string(),
        waterline_ts,
        minted_usdd,
        treasury_out_usdd,
        treasury_in_usdd,
        expected_net_from_deposits_usdd: expected_net_from_deposits,
        non_refunded_deposit_count,
        trade_delta_usdd,
    })
}

pub fn log_reconciliation(summary: &AccountReconciliation) {
    info!(
        account = %summary.account,
        minted_usdd = summary.minted_usdd,
        treasury_out_usdd = summary.treasury_out_usdd,
        treasury_in_usdd = summary.treasury_in_usdd,
        expected_net_from_deposits_usdd = summary.expected_net_from_deposits_usdd,
        trade_delta_usdd = summary.trade_delta_usdd,
        "balance reconciliation"
    );
    if summary.trade_delta_usdd != 0 {
        warn!(
            account = %summary.account,
            trade_delta_usdd = summary.trade_delta_usdd,
            "non-zero trade delta: possible imbalance or in-flight operations"
        );
    }
}

/// Reconciles each of `accounts` in turn, logging as it goes. A failure on one
/// account is logged and does not stop the remaining accounts — mirrors
/// `reconcile_multiple`'s per-account try/except.
pub async fn run_balance_reconciliation(
    store: &Store,
    config: &BridgeConfig,
    accounts: &[String],
    waterline_ts: i64,
) -> Vec<AccountReconciliation> {
    let mut results = Vec::with_capacity(accounts.len());
    for account in accounts {
        match reconcile_account(store, config, account, waterline_ts).await {
            Ok(summary) => {
                log_reconciliation(&summary);
                results.push(summary);
            }
            Err(e) => warn!(account = %account, error = %e, "balance reconciliation failed for account"),
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::test_support::test_config;
    use crate::store::test_store;

    #[tokio::test]
    async fn balanced_account_has_zero_delta() {
        let store = test_store().await;
        let config = test_config();
        store
            .insert_unprocessed_deposit("sig1", 100, "alice", 10_000_000, Some("nexus:acct1"))
            .await
            .unwrap();
        store.promote_to_processed("sig1", 9_490_500).await.unwrap();
        store
            .insert_unprocessed_credit("tx1", "c1", 100, "acct1", None, 9_490_500, None)
            .await
            .unwrap();
        store.promote_to_send_confirmed("tx1").await.unwrap();

        let summary = reconcile_account(&store, &config, "acct1", 0).await.unwrap();
        assert_eq!(summary.trade_delta_usdd, 0);
    }

    #[tokio::test]
    async fn unminted_deposit_produces_nonzero_delta() {
        let store = test_store().await;
        let config = test_config();
        store
            .insert_unprocessed_deposit("sig2", 100, "alice", 10_000_000, Some("nexus:acct2"))
            .await
            .unwrap();

        let summary = reconcile_account(&store, &config, "acct2", 0).await.unwrap();
        assert_eq!(summary.minted_usdd, 0);
        assert_eq!(summary.expected_net_from_deposits_usdd, 9_490_500);
        assert_eq!(summary.trade_delta_usdd, -9_490_500);
    }

    #[tokio::test]
    async fn refunded_deposits_are_excluded_from_expected_flow() {
        let store = test_store().await;
        let config = test_config();
        store
            .insert_unprocessed_deposit("sig3", 100, "alice", 5_000_000, Some("nexus:acct3"))
            .await
            .unwrap();
        store.promote_to_refunded("sig3", 5_000_000, Some("refundsig")).await.unwrap();

        let summary = reconcile_account(&store, &config, "acct3", 0).await.unwrap();
        assert_eq!(summary.non_refunded_deposit_count, 0);
        assert_eq!(summary.expected_net_from_deposits_usdd, 0);
    }

    #[tokio::test]
    async fn run_balance_reconciliation_continues_past_errors() {
        let store = test_store().await;
        let config = test_config();
        let accounts = vec!["acct4".to_string(), "acct5".to_string()];
        let results = run_balance_reconciliation(&store, &config, &accounts, 0).await;
        assert_eq!(results.len(), 2);
    }
}
