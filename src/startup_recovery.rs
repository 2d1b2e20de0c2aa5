//! Startup recovery (§4.9): reconstructs terminal markers for payouts and
//! refunds that landed on-chain before this process's confirmation step ran,
//! by scanning the vault account's recent memos. Additive and idempotent —
//! never rewrites or removes an existing row.
//!
//! `ChainSAdapter::scan_recent_memos` returns one flat memo→signature map;
//! the `nexus_txid:`/`refundSig:` prefix split happens in this module.

use tracing::{info, warn};

use crate::chain_s::ChainSAdapter;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::reference::REFERENCE_COUNTER;
use crate::store::Store;

const NEXUS_TXID_PREFIX: &str = "nexus_txid:";
const REFUND_SIG_PREFIX: &str = "refundSig:";

#[derive(Debug, Default, Clone, Copy)]
pub struct RecoverySummary {
    pub found_nexus_memos: u32,
    pub found_refund_memos: u32,
    pub added_processed_credits: u32,
    pub added_refunded_sigs: u32,
    pub reference_seeded_to: i64,
}

/// Scans the last `STARTUP_SCAN_SIGNATURE_LIMIT` vault signatures for
/// `nexus_txid:<txid>` and `refundSig:<sig>` memos and records any terminal
/// marker not already present, then seeds the reference counter floor.
pub async fn perform_startup_recovery(
    store: &Store,
    chain_s: &dyn ChainSAdapter,
    config: &BridgeConfig,
) -> Result<RecoverySummary, BridgeError> {
    let memos = chain_s
        .scan_recent_memos(
            &config.vault_usdc_account,
            config.startup_scan_signature_limit as usize,
        )
        .await?;

    let mut summary = RecoverySummary::default();

    for (memo, sig) in &memos {
        if let Some(txid) = memo.strip_prefix(NEXUS_TXID_PREFIX) {
            summary.found_nexus_memos += 1;
            match store.recover_processed_credit(txid, sig).await {
                Ok(true) => {
                    summary.added_processed_credits += 1;
                    info!(txid, sig = %sig, "recovered processed credit from memo scan");
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(txid, error = %e, "startup recovery: failed to record processed credit")
                }
            }
        } else if let Some(dep_sig) = memo.strip_prefix(REFUND_SIG_PREFIX) {
            summary.found_refund_memos += 1;
            match store.recover_refunded_sig(dep_sig, sig).await {
                Ok(true) => {
                    summary.added_refunded_sigs += 1;
                    info!(sig = dep_sig, refund_sig = %sig, "recovered refunded deposit from memo scan");
                }
                Ok(false) => {}
                Err(e) => warn!(sig = dep_sig, error = %e, "startup recovery: failed to record refund"),
            }
        }
    }

    let floor = store.max_processed_reference().await?.max(1);
    summary.reference_seeded_to = store.seed_counter_floor(REFERENCE_COUNTER, floor).await?;

    info!(
        found_nexus_memos = summary.found_nexus_memos,
        found_refund_memos = summary.found_refund_memos,
        added_processed_credits = summary.added_processed_credits,
        added_refunded_sigs = summary.added_refunded_sigs,
        reference_seeded_to = summary.reference_seeded_to,
        "startup recovery complete"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_s::mock::MockChainSAdapter;
    use crate::reference::test_support::test_config;
    use crate::store::test_store;

    #[tokio::test]
    async fn recovers_both_memo_kinds_and_seeds_counter() {
        let store = test_store().await;
        let config = test_config();
        let chain_s = MockChainSAdapter::default();

        chain_s
            .memos
            .lock()
            .unwrap()
            .insert("nexus_txid:tx1".to_string(), "outsig1".to_string());
        chain_s
            .memos
            .lock()
            .unwrap()
            .insert("refundSig:sig1".to_string(), "refundsig1".to_string());
        chain_s
            .memos
            .lock()
            .unwrap()
            .insert("unrelated".to_string(), "sigX".to_string());

        let summary = perform_startup_recovery(&store, &chain_s, &config).await.unwrap();
        assert_eq!(summary.found_nexus_memos, 1);
        assert_eq!(summary.found_refund_memos, 1);
        assert_eq!(summary.added_processed_credits, 1);
        assert_eq!(summary.added_refunded_sigs, 1);
        assert_eq!(summary.reference_seeded_to, 1);

        assert!(store.get_processed_credit("tx1").await.unwrap().is_some());
        assert!(store.is_deposit_resolved("sig1").await.unwrap());
    }

    #[tokio::test]
    async fn recovery_is_idempotent_across_two_runs() {
        let store = test_store().await;
        let config = test_config();
        let chain_s = MockChainSAdapter::default();
        chain_s
            .memos
            .lock()
            .unwrap()
            .insert("nexus_txid:tx2".to_string(), "outsig2".to_string());

        let first = perform_startup_recovery(&store, &chain_s, &config).await.unwrap();
        let second = perform_startup_recovery(&store, &chain_s, &config).await.unwrap();
        assert_eq!(first.added_processed_credits, 1);
        assert_eq!(second.added_processed_credits, 0);
    }

    #[tokio::test]
    async fn leaves_already_resolved_rows_untouched() {
        let store = test_store().await;
        let config = test_config();
        let chain_s = MockChainSAdapter::default();

        store
            .insert_unprocessed_deposit("sig3", 100, "alice", 1_000_000, None)
            .await
            .unwrap();
        store.promote_to_refunded("sig3", 900_000, Some("realrefund")).await.unwrap();

        chain_s
            .memos
            .lock()
            .unwrap()
            .insert("refundSig:sig3".to_string(), "bogusrefund".to_string());

        perform_startup_recovery(&store, &chain_s, &config).await.unwrap();
        let refunded = store.list_refunded_deposits(10).await.unwrap();
        assert_eq!(refunded[0].refund_sig, Some("realrefund".to_string()));
    }
}
