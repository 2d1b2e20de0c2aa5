//! Backing & fees reconciler (§4.8). Pauses outbound transfers on deficit,
//! and past a configured margin and threshold mints the recognized surplus
//! to the fees account — the only sanctioned surplus route. Converting
//! accumulated fees into native gas tokens via a DEX is an
//! automated-market-maker policy explicitly out of scope (§1); that seam is
//! `FeeConversionPolicy`, left a no-op here.

use tracing::{info, warn};

use crate::chain_n::{format_decimal_amount, ChainNAdapter};
use crate::chain_s::ChainSAdapter;
use crate::config::BridgeConfig;
use crate::error::{AdapterError, BridgeError};
use crate::fees::{scale_amount, FeeConversionPolicy};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Whether the vault is undercollateralized enough that outbound payouts,
    /// refunds, and quarantine transfers must be suppressed this cycle.
    pub paused: bool,
    /// Surplus actually moved to the fees account this cycle, in T_D base units.
    pub minted_surplus_units: i64,
    /// True if this pass was skipped outright because an S→D row is mid-flight.
    pub skipped_pending_deposits: bool,
}

const NO_ACTION: ReconcileOutcome = ReconcileOutcome {
    paused: false,
    minted_surplus_units: 0,
    skipped_pending_deposits: false,
};

/// Runs one reconciliation pass. Skipped entirely while any S→D row is still
/// pending: minting surplus while deposits are mid-flight could recognize
/// value not yet actually backed.
pub async fn reconcile(
    store: &Store,
    chain_s: &dyn ChainSAdapter,
    chain_n: &dyn ChainNAdapter,
    fee_policy: &dyn FeeConversionPolicy,
    config: &BridgeConfig,
) -> Result<ReconcileOutcome, BridgeError> {
    if !store.list_unprocessed_deposits(1).await?.is_empty() {
        return Ok(ReconcileOutcome {
            skipped_pending_deposits: true,
            ..NO_ACTION
        });
    }

    store.recompute_fee_summary().await?;

    let vault_usdc = chain_s.get_token_balance(&config.vault_usdc_account).await?;
    let circ_usdd = chain_n.get_token_supply(config.nexus_token_name.as_str()).await?;
    let vault_in_usdd = scale_amount(vault_usdc, config.usdc_decimals, config.usdd_decimals);

    if circ_usdd > 0 && vault_in_usdd * 100 < config.backing_deficit_pause_pct * circ_usdd {
        warn!(
            vault_in_usdd,
            circ_usdd, "vault undercollateralized, pausing outbound transfers"
        );
        store.set_paused(true).await?;
        return Ok(ReconcileOutcome {
            paused: true,
            ..NO_ACTION
        });
    }
    store.set_paused(false).await?;

    let margin_multiple = 100 + config.backing_surplus_margin_pct;
    if vault_in_usdd * 100 < circ_usdd * margin_multiple {
        let (usdc_fees, _) = store.read_fee_summary().await?;
        fee_policy.maybe_convert(usdc_fees);
        return Ok(NO_ACTION);
    }

    let surplus_usdd = vault_in_usdd - circ_usdd;
    let surplus_usdc_equiv = scale_amount(surplus_usdd, config.usdd_decimals, config.usdc_decimals);
    if surplus_usdc_equiv < config.backing_surplus_mint_threshold_usdc_units {
        let (usdc_fees, _) = store.read_fee_summary().await?;
        fee_policy.maybe_convert(usdc_fees);
        return Ok(NO_ACTION);
    }

    let amount_decimal = format_decimal_amount(surplus_usdd, config.usdd_decimals);
    match chain_n
        .transfer_between_accounts(
            &config.nexus_usdd_treasury_account,
            &config.fees_account,
            &amount_decimal,
            "surplus_mint",
        )
        .await
    {
        Ok((true, txid)) => {
            info!(txid = %txid, surplus_usdd, "surplus recognized to fees account");
            Ok(ReconcileOutcome {
                minted_surplus_units: surplus_usdd,
                ..NO_ACTION
            })
        }
        Ok((false, _)) => {
            warn!("surplus mint not acknowledged, retrying next cycle");
            Ok(NO_ACTION)
        }
        Err(AdapterError::Rejected(msg)) => {
            warn!(reason = %msg, "surplus mint rejected");
            Ok(NO_ACTION)
        }
        Err(AdapterError::Timeout(_)) | Err(AdapterError::Unavailable(_)) => {
            warn!("surplus mint indeterminate, deferring to next cycle");
            Ok(NO_ACTION)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_n::mock::MockChainNAdapter;
    use crate::chain_s::mock::MockChainSAdapter;
    use crate::fees::NoopFeeConversionPolicy;
    use crate::reference::test_support::test_config;
    use crate::store::test_store;

    #[tokio::test]
    async fn pauses_when_vault_severely_undercollateralized() {
        let store = test_store().await;
        let config = test_config();
        let chain_s = MockChainSAdapter::default();
        let chain_n = MockChainNAdapter::default();
        *chain_s.token_balance.lock().unwrap() = 10_000_000;
        *chain_n.supply.lock().unwrap() = 100_000_000;

        let outcome = reconcile(&store, &chain_s, &chain_n, &NoopFeeConversionPolicy, &config)
            .await
            .unwrap();
        assert!(outcome.paused);
        assert_eq!(outcome.minted_surplus_units, 0);
        assert!(store.is_paused().await.unwrap());
    }

    #[tokio::test]
    async fn clears_persisted_pause_once_backing_recovers() {
        let store = test_store().await;
        let config = test_config();
        let chain_s = MockChainSAdapter::default();
        let chain_n = MockChainNAdapter::default();
        store.set_paused(true).await.unwrap();
        *chain_s.token_balance.lock().unwrap() = 100_000_000;
        *chain_n.supply.lock().unwrap() = 100_000_000;

        reconcile(&store, &chain_s, &chain_n, &NoopFeeConversionPolicy, &config)
            .await
            .unwrap();
        assert!(!store.is_paused().await.unwrap());
    }

    #[tokio::test]
    async fn mints_surplus_past_margin_and_threshold() {
        let store = test_store().await;
        let config = test_config();
        let chain_s = MockChainSAdapter::default();
        let chain_n = MockChainNAdapter::default();
        *chain_s.token_balance.lock().unwrap() = 200_000_000;
        *chain_n.supply.lock().unwrap() = 100_000_000;
        *chain_n.debit_result.lock().unwrap() = Some(Ok((true, "mint-tx".to_string())));

        let outcome = reconcile(&store, &chain_s, &chain_n, &NoopFeeConversionPolicy, &config)
            .await
            .unwrap();
        assert!(!outcome.paused);
        assert_eq!(outcome.minted_surplus_units, 100_000_000);
    }

    #[tokio::test]
    async fn no_action_within_margin() {
        let store = test_store().await;
        let config = test_config();
        let chain_s = MockChainSAdapter::default();
        let chain_n = MockChainNAdapter::default();
        *chain_s.token_balance.lock().unwrap() = 100_000_000;
        *chain_n.supply.lock().unwrap() = 100_000_000;

        let outcome = reconcile(&store, &chain_s, &chain_n, &NoopFeeConversionPolicy, &config)
            .await
            .unwrap();
        assert!(!outcome.paused);
        assert_eq!(outcome.minted_surplus_units, 0);
    }

    #[tokio::test]
    async fn skips_entirely_while_deposits_pending() {
        let store = test_store().await;
        let config = test_config();
        let chain_s = MockChainSAdapter::default();
        let chain_n = MockChainNAdapter::default();
        store
            .insert_unprocessed_deposit("S1", 100, "alice", 10_000_000, None)
            .await
            .unwrap();

        let outcome = reconcile(&store, &chain_s, &chain_n, &NoopFeeConversionPolicy, &config)
            .await
            .unwrap();
        assert!(outcome.skipped_pending_deposits);
    }
}
