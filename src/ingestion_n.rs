//! Chain-N poll cycle: discover new treasury-bound transactions and persist
//! them as `UnprocessedCredit_D`. Discovery only — dedup by `(txid,
//! contract_id)`, advancing the waterline once a page comes back short.
//! Routing decisions (tiny-credit fast path, reference validation, recipient
//! resolution, refund-vs-send) belong to `processor_n`, mirroring the
//! ingestion/processor split already used on the Chain-S side.

use tracing::info;

use crate::chain_n::ChainNAdapter;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::store::types::WaterlineChain;
use crate::store::Store;

pub async fn poll_credits(
    store: &Store,
    chain_n: &dyn ChainNAdapter,
    config: &BridgeConfig,
) -> Result<u32, BridgeError> {
    let since_ts = store
        .read_waterline_proposal(WaterlineChain::Nexus)
        .await?
        .unwrap_or(0);

    let limit = config.max_deposits_per_loop as usize;
    let txs = chain_n
        .list_transactions_for_account(&config.nexus_usdd_treasury_account, limit)
        .await?;

    let mut page_oldest = i64::MAX;
    let mut inserted = 0u32;

    for tx in &txs {
        if tx.ts > 0 {
            page_oldest = page_oldest.min(tx.ts);
        }
        if tx.to != config.nexus_usdd_treasury_account {
            continue;
        }
        if tx.ts < since_ts {
            continue;
        }
        if store.is_credit_known(&tx.txid, &tx.contract_id).await? {
            continue;
        }

        store
            .insert_unprocessed_credit(
                &tx.txid,
                &tx.contract_id,
                tx.ts,
                &tx.from,
                None,
                tx.amount_base_units,
                tx.reference.as_deref(),
            )
            .await?;
        inserted += 1;
        info!(
            txid = %tx.txid,
            contract = %tx.contract_id,
            amount = tx.amount_base_units,
            "new chain-n credit observed"
        );
    }

    // The adapter's own page size is the CLI's default; a short page means
    // we've drained the backlog for this cycle, so it's safe to advance.
    if txs.len() < limit && page_oldest != i64::MAX {
        store
            .propose_waterline(WaterlineChain::Nexus, page_oldest.max(since_ts))
            .await?;
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_n::mock::MockChainNAdapter;
    use crate::chain_n::NexusTransaction;
    use crate::reference::test_support::test_config;
    use crate::store::test_store;

    #[tokio::test]
    async fn poll_inserts_new_credits_to_treasury_only() {
        let store = test_store().await;
        let config = test_config();
        let chain_n = MockChainNAdapter::default();

        chain_n.transactions.lock().unwrap().push(NexusTransaction {
            txid: "tx1".into(),
            contract_id: "0".into(),
            ts: 100,
            from: "sender1".into(),
            to: config.nexus_usdd_treasury_account.clone(),
            amount_base_units: 5_000_000,
            reference: Some("solana:bob".into()),
        });
        chain_n.transactions.lock().unwrap().push(NexusTransaction {
            txid: "tx2".into(),
            contract_id: "0".into(),
            ts: 101,
            from: "sender2".into(),
            to: "someone-else".into(),
            amount_base_units: 1_000_000,
            reference: None,
        });

        let inserted = poll_credits(&store, &chain_n, &config).await.unwrap();
        assert_eq!(inserted, 1);
        assert!(store.is_credit_known("tx1", "0").await.unwrap());
        assert!(!store.is_credit_known("tx2", "0").await.unwrap());
    }

    #[tokio::test]
    async fn poll_does_not_reinsert_known_credits() {
        let store = test_store().await;
        let config = test_config();
        let chain_n = MockChainNAdapter::default();

        store
            .insert_unprocessed_credit(
                "tx3",
                "0",
                100,
                "sender",
                None,
                1_000_000,
                None,
            )
            .await
            .unwrap();

        chain_n.transactions.lock().unwrap().push(NexusTransaction {
            txid: "tx3".into(),
            contract_id: "0".into(),
            ts: 100,
            from: "sender".into(),
            to: config.nexus_usdd_treasury_account.clone(),
            amount_base_units: 1_000_000,
            reference: None,
        });

        let inserted = poll_credits(&store, &chain_n, &config).await.unwrap();
        assert_eq!(inserted, 0);
    }
}
