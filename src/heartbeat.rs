//! Heartbeat publish orchestration (§4.7). Owns the ordering rule that
//! `store::heartbeat` itself only documents: the on-chain asset write happens
//! first, and the local row is only persisted once that write is acknowledged,
//! so the store and the publicly-readable asset never disagree about the last
//! checkpoint any outside observer can audit.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::chain_n::ChainNAdapter;
use crate::config::BridgeConfig;
use crate::error::{AdapterError, BridgeError};
use crate::store::types::WaterlineChain;
use crate::store::Store;

pub const LAST_POLL_FIELD: &str = "last_poll_timestamp";
pub const WLINE_SOL_FIELD: &str = "last_safe_timestamp_solana";
pub const WLINE_NXS_FIELD: &str = "last_safe_timestamp_nexus";

/// Publishes the current waterline proposals as the on-chain heartbeat asset,
/// applying `HEARTBEAT_WATERLINE_SAFETY_SEC` behind the newest proposal on each
/// chain before anything is written. Returns whether the publish landed.
pub async fn publish_heartbeat(
    store: &Store,
    chain_n: &dyn ChainNAdapter,
    config: &BridgeConfig,
    now: i64,
) -> Result<bool, BridgeError> {
    let wline_sol = safe_waterline(store, WaterlineChain::Solana, config).await?;
    let wline_nxs = safe_waterline(store, WaterlineChain::Nexus, config).await?;

    let mut fields = HashMap::new();
    fields.insert(LAST_POLL_FIELD.to_string(), now.to_string());
    if let Some(w) = wline_sol {
        fields.insert(WLINE_SOL_FIELD.to_string(), w.to_string());
    }
    if let Some(w) = wline_nxs {
        fields.insert(WLINE_NXS_FIELD.to_string(), w.to_string());
    }

    match chain_n.update_asset(&config.nexus_heartbeat_asset_name, &fields).await {
        Ok(true) => {
            store
                .write_heartbeat(&config.nexus_heartbeat_asset_name, now, wline_sol, wline_nxs)
                .await?;
            info!(asset = %config.nexus_heartbeat_asset_name, wline_sol, wline_nxs, "heartbeat published");
            Ok(true)
        }
        Ok(false) => {
            warn!(asset = %config.nexus_heartbeat_asset_name, "heartbeat asset update not acknowledged");
            Ok(false)
        }
        Err(AdapterError::Timeout(_)) | Err(AdapterError::Unavailable(_)) => {
            warn!("heartbeat publish indeterminate, retrying next cycle");
            Ok(false)
        }
        Err(AdapterError::Rejected(msg)) => {
            warn!(reason = %msg, "heartbeat asset update rejected");
            Ok(false)
        }
    }
}

async fn safe_waterline(
    store: &Store,
    chain: WaterlineChain,
    config: &BridgeConfig,
) -> Result<Option<i64>, BridgeError> {
    if !config.heartbeat_waterline_enabled {
        return Ok(None);
    }
    let proposal = store.read_waterline_proposal(chain).await?;
    Ok(proposal.map(|ts| (ts - config.heartbeat_waterline_safety_sec).max(0)))
}

/// Read-once startup waterlines. A missing or stale heartbeat falls back to `0`,
/// a full historical scan bounded only by the adapter's own `limit` (§4.7).
pub async fn read_startup_waterlines(
    store: &Store,
    config: &BridgeConfig,
) -> Result<(i64, i64), BridgeError> {
    match store.read_heartbeat(&config.nexus_heartbeat_asset_name).await? {
        Some(hb) => Ok((hb.wline_sol.unwrap_or(0), hb.wline_nxs.unwrap_or(0))),
        None => Ok((0, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_n::mock::MockChainNAdapter;
    use crate::reference::test_support::test_config;
    use crate::store::test_store;

    #[tokio::test]
    async fn publish_applies_safety_window_and_persists_only_on_ack() {
        let store = test_store().await;
        let config = test_config();
        let chain_n = MockChainNAdapter::default();
        *chain_n.asset_update_acked.lock().unwrap() = true;

        store.propose_waterline(WaterlineChain::Solana, 1_000).await.unwrap();
        store.propose_waterline(WaterlineChain::Nexus, 900).await.unwrap();

        let ok = publish_heartbeat(&store, &chain_n, &config, 2_000).await.unwrap();
        assert!(ok);

        let hb = store
            .read_heartbeat(&config.nexus_heartbeat_asset_name)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hb.last_beat, 2_000);
        assert_eq!(hb.wline_sol, Some(1_000 - config.heartbeat_waterline_safety_sec));
        assert_eq!(hb.wline_nxs, Some(900 - config.heartbeat_waterline_safety_sec));
    }

    #[tokio::test]
    async fn publish_does_not_persist_when_not_acknowledged() {
        let store = test_store().await;
        let config = test_config();
        let chain_n = MockChainNAdapter::default();
        *chain_n.asset_update_acked.lock().unwrap() = false;

        let ok = publish_heartbeat(&store, &chain_n, &config, 2_000).await.unwrap();
        assert!(!ok);
        assert!(store
            .read_heartbeat(&config.nexus_heartbeat_asset_name)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn startup_waterlines_fall_back_to_zero() {
        let store = test_store().await;
        let config = test_config();
        assert_eq!(read_startup_waterlines(&store, &config).await.unwrap(), (0, 0));
    }
}
