//! Chain-S poll cycle: discover new inbound transfers to the vault token
//! account and persist them as `UnprocessedDeposit_S` (§4.4). Waterline-gated
//! fetch: this module only decides *what to fetch*, not whether a given
//! cycle is worth skipping — the store's own idempotent insert makes an
//! extra fetch harmless.

use tracing::{info, warn};

use crate::chain_s::ChainSAdapter;
use crate::config::BridgeConfig;
use crate::error::{AdapterError, BridgeError};
use crate::store::types::WaterlineChain;
use crate::store::Store;

/// Fetches signatures on the vault account since the last proposed waterline,
/// decodes each into a transfer, and inserts any not already known. Proposes
/// the next waterline as the oldest block time seen on a non-full page, per
/// §4.7's safety-window rule (the orchestration layer applies the safety
/// margin before publishing).
pub async fn poll_deposits(
    store: &Store,
    chain_s: &dyn ChainSAdapter,
    config: &BridgeConfig,
) -> Result<u32, BridgeError> {
    let since_ts = store
        .read_waterline_proposal(WaterlineChain::Solana)
        .await?
        .unwrap_or(0);

    let limit = config.max_deposits_per_loop as usize;
    let signatures = match chain_s
        .get_signatures_for_address(&config.vault_usdc_account, since_ts, limit)
        .await
    {
        Ok(sigs) => sigs,
        Err(AdapterError::Timeout(_)) | Err(AdapterError::Unavailable(_)) => {
            warn!("chain-s signature fetch indeterminate, deferring poll to next cycle");
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };

    let mut inserted = 0u32;
    let mut oldest_seen = since_ts;

    for sig_info in &signatures {
        if store.is_deposit_resolved(&sig_info.signature).await? {
            continue;
        }
        if store.get_unprocessed_deposit(&sig_info.signature).await?.is_some() {
            continue;
        }

        let transfer = match chain_s.get_decoded_transfer(&sig_info.signature).await {
            Ok(Some(t)) => t,
            Ok(None) => continue,
            Err(AdapterError::Timeout(_)) | Err(AdapterError::Unavailable(_)) => {
                warn!(sig = %sig_info.signature, "decode indeterminate, will retry next poll");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        store
            .insert_unprocessed_deposit(
                &transfer.signature,
                transfer.block_time,
                &transfer.sender,
                transfer.amount_base_units,
                transfer.memo.as_deref(),
            )
            .await?;
        inserted += 1;
        info!(
            sig = %transfer.signature,
            amount = transfer.amount_base_units,
            "new chain-s deposit observed"
        );
    }

    // A page shorter than the requested limit means we've caught up to the
    // chain tip this cycle; the oldest entry on it is safe to advance past.
    if signatures.len() < limit {
        if let Some(oldest) = signatures.iter().map(|s| s.block_time).min() {
            oldest_seen = oldest.max(since_ts);
        } else {
            oldest_seen = crate::store::now_epoch();
        }
        store
            .propose_waterline(WaterlineChain::Solana, oldest_seen)
            .await?;
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_s::mock::MockChainSAdapter;
    use crate::chain_s::{DecodedTransfer, SignatureInfo};
    use crate::reference::test_support::test_config;
    use crate::store::test_store;

    #[tokio::test]
    async fn poll_inserts_new_deposits_and_advances_waterline() {
        let store = test_store().await;
        let config = test_config();
        let chain_s = MockChainSAdapter::default();

        chain_s.signatures.lock().unwrap().push(SignatureInfo {
            signature: "sig1".into(),
            block_time: 500,
        });
        chain_s.transfers.lock().unwrap().insert(
            "sig1".into(),
            DecodedTransfer {
                signature: "sig1".into(),
                block_time: 500,
                sender: "alice".into(),
                amount_base_units: 1_000_000,
                memo: Some("nexus:NX1".into()),
            },
        );

        let inserted = poll_deposits(&store, &chain_s, &config).await.unwrap();
        assert_eq!(inserted, 1);
        assert!(store.get_unprocessed_deposit("sig1").await.unwrap().is_some());
        assert_eq!(
            store
                .read_waterline_proposal(WaterlineChain::Solana)
                .await
                .unwrap(),
            Some(500)
        );
    }

    #[tokio::test]
    async fn poll_skips_already_resolved_signatures() {
        let store = test_store().await;
        let config = test_config();
        let chain_s = MockChainSAdapter::default();

        store
            .insert_unprocessed_deposit("sig2", 100, "bob", 1_000, None)
            .await
            .unwrap();
        store.promote_to_refunded("sig2", 1_000, None).await.unwrap();

        chain_s.signatures.lock().unwrap().push(SignatureInfo {
            signature: "sig2".into(),
            block_time: 100,
        });

        let inserted = poll_deposits(&store, &chain_s, &config).await.unwrap();
        assert_eq!(inserted, 0);
    }
}
