//! Processor: D→S (T_D → T_S). State machine of §4.6 over `UnprocessedCredit_D`,
//! split into classify/send/refund/quarantine passes the same way
//! `processor_s` splits the S→D direction. Recipient resolution follows two
//! ordered sources: the Chain-N asset registry first, the contract's own
//! `solana:<addr>` reference second.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::chain_n::{format_decimal_amount, ChainNAdapter};
use crate::chain_s::ChainSAdapter;
use crate::config::BridgeConfig;
use crate::error::{AdapterError, BridgeError};
use crate::fees::{compute_payout, scale_amount};
use crate::reference;
use crate::store::types::{CreditStatus, UnprocessedCredit};
use crate::store::Store;

const MICRO_REASON: &str = "micro_fee";
const STALE_REASON: &str = "stale_exhausted";

enum Recipient {
    Resolved(String),
    Unresolved,
    Deferred,
}

fn parse_solana_ref(reference: Option<&str>) -> Option<&str> {
    reference
        .filter(|r| r.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("solana:")))
        .map(|r| &r[7..])
        .filter(|addr| !addr.is_empty())
}

/// Two resolution sources, in order: the asset registry keyed by `(txid, owner)`,
/// then the contract's own `solana:<addr>` reference. Either candidate must still
/// pass the token-account/mint check before being trusted (§4.6 step 2).
async fn resolve_recipient(
    chain_n: &dyn ChainNAdapter,
    chain_s: &dyn ChainSAdapter,
    row: &UnprocessedCredit,
    config: &BridgeConfig,
) -> Result<Recipient, BridgeError> {
    let owner = row.owner.clone().unwrap_or_else(|| row.sender.clone());
    let mut predicate = HashMap::new();
    predicate.insert("txid_toService".to_string(), row.txid.clone());
    predicate.insert("owner".to_string(), owner);

    let registry_candidate = match chain_n.find_asset_by_fields(&predicate).await {
        Ok(assets) => assets
            .first()
            .and_then(|a| a.fields.get("receival_account").cloned()),
        Err(AdapterError::Timeout(_)) | Err(AdapterError::Unavailable(_)) => {
            return Ok(Recipient::Deferred)
        }
        Err(AdapterError::Rejected(_)) => None,
    };

    let candidate = registry_candidate.or_else(|| parse_solana_ref(row.reference.as_deref()).map(str::to_string));

    let Some(addr) = candidate else {
        return Ok(Recipient::Unresolved);
    };

    match chain_s.is_token_account_for_mint(&addr, &config.usdc_mint).await {
        Ok(true) => Ok(Recipient::Resolved(addr)),
        Ok(false) => Ok(Recipient::Unresolved),
        Err(AdapterError::Timeout(_)) | Err(AdapterError::Unavailable(_)) => Ok(Recipient::Deferred),
        Err(AdapterError::Rejected(_)) => Ok(Recipient::Unresolved),
    }
}

/// Why a credit ended up in the refund path, recomputed at both submit and
/// confirm time from the row itself rather than persisted — the same way
/// `processor_s` recomputes its fee breakdown at both ends of a debit.
fn refund_reason(row: &UnprocessedCredit) -> &'static str {
    match row.reference.as_deref() {
        None => "missing_reference",
        Some(_) if parse_solana_ref(row.reference.as_deref()).is_none() => {
            "reference_not_solana_prefixed"
        }
        Some(_) if row.resolved_receival_account.is_none() => "invalid_solana_address",
        _ => "zero_net_after_fee",
    }
}

/// `new` → `ready` | `recipient_unresolved`. Micro-credits are retained as fees
/// outright; tiny credits (at or below the flat fee) are left `ready` for the
/// local-sink fast path in `process_ready_credits` rather than resolved here.
pub async fn classify_new_credits(
    store: &Store,
    chain_n: &dyn ChainNAdapter,
    chain_s: &dyn ChainSAdapter,
    config: &BridgeConfig,
) -> Result<u32, BridgeError> {
    let limit = if config.micro_credit_count_against_limit {
        config.max_deposits_per_loop as i64
    } else {
        config.max_deposits_per_loop as i64 * 4
    };
    let rows = store.list_unprocessed_credits(limit).await?;
    let mut classified = 0u32;

    for row in rows.into_iter().filter(|r| r.status == CreditStatus::New) {
        if row.amount_usdd_units < config.min_credit_usdd_units {
            store.promote_to_quarantined_credit(&row.txid, MICRO_REASON).await?;
            store.record_credit_fee(&row.txid, row.amount_usdd_units, row.ts).await?;
            info!(txid = %row.txid, amount = row.amount_usdd_units, "credit below minimum, retained as fee");
            classified += 1;
            continue;
        }

        if row.amount_usdd_units <= config.flat_fee_usdd_units {
            store.set_credit_status(&row.txid, CreditStatus::Ready).await?;
            classified += 1;
            continue;
        }

        match resolve_recipient(chain_n, chain_s, &row, config).await? {
            Recipient::Resolved(account) => {
                store.set_credit_resolved_account(&row.txid, &account).await?;
                store.set_credit_status(&row.txid, CreditStatus::Ready).await?;
            }
            Recipient::Unresolved => {
                store
                    .set_credit_status(&row.txid, CreditStatus::RecipientUnresolved)
                    .await?;
            }
            Recipient::Deferred => {
                continue;
            }
        }
        classified += 1;
    }
    Ok(classified)
}

/// `ready` → `send_pending`. Tiny credits take the local Chain-N sink; everything
/// else crosses to Chain-S. Both paths are reservation-gated and idempotent-resend
/// guarded before any non-idempotent adapter call.
pub async fn process_ready_credits(
    store: &Store,
    chain_n: &dyn ChainNAdapter,
    chain_s: &dyn ChainSAdapter,
    config: &BridgeConfig,
) -> Result<u32, BridgeError> {
    let rows = store
        .list_unprocessed_credits(config.max_deposits_per_loop as i64)
        .await?
        .into_iter()
        .filter(|r| r.status == CreditStatus::Ready)
        .collect::<Vec<_>>();

    let mut sent = 0u32;
    for row in rows {
        let action_key = reference::send_reservation_key(&row.txid);
        if !store.reserve("send", &row.txid, config.reservation_ttl_sec as i64).await? {
            continue;
        }
        if !reference::should_attempt(store, &action_key, config).await? {
            store.release_reservation("send", &row.txid).await?;
            continue;
        }
        reference::record_attempt(store, &action_key).await?;

        if row.amount_usdd_units <= config.flat_fee_usdd_units {
            let amount_decimal = format_decimal_amount(row.amount_usdd_units, config.usdd_decimals);
            match chain_n
                .transfer_between_accounts(
                    &config.nexus_usdd_treasury_account,
                    &config.nexus_usdd_local_account,
                    &amount_decimal,
                    &row.txid,
                )
                .await
            {
                Ok((true, txid_onchain)) => {
                    store.set_credit_payout_sig(&row.txid, &txid_onchain).await?;
                    store.promote_to_send_confirmed(&row.txid).await?;
                    store.release_reservation("send", &row.txid).await?;
                    info!(txid = %row.txid, "tiny credit routed to local sink");
                    sent += 1;
                }
                Ok((false, _)) => {
                    warn!(txid = %row.txid, "tiny-credit route not acknowledged, deferring");
                    store.release_reservation("send", &row.txid).await?;
                }
                Err(AdapterError::Rejected(msg)) => {
                    warn!(txid = %row.txid, reason = %msg, "tiny-credit route rejected");
                    store.release_reservation("send", &row.txid).await?;
                }
                Err(AdapterError::Timeout(_)) | Err(AdapterError::Unavailable(_)) => {
                    warn!(txid = %row.txid, "tiny-credit route indeterminate, deferring to next cycle");
                }
            }
            continue;
        }

        let Some(account) = row.resolved_receival_account.clone() else {
            store
                .set_credit_status(&row.txid, CreditStatus::RecipientUnresolved)
                .await?;
            store.release_reservation("send", &row.txid).await?;
            continue;
        };

        let memo = format!("nexus_txid:{}", row.txid);
        if let Ok(memos) = chain_s
            .scan_recent_memos(&config.vault_usdc_account, config.startup_scan_signature_limit as usize)
            .await
        {
            if let Some(sig) = memos.get(&memo) {
                store.set_credit_payout_sig(&row.txid, sig).await?;
                store.set_credit_status(&row.txid, CreditStatus::SendPending).await?;
                info!(txid = %row.txid, sig = %sig, "prior send already landed, resuming from memo scan");
                continue;
            }
        }

        let usdc_gross = scale_amount(row.amount_usdd_units, config.usdd_decimals, config.usdc_decimals);
        let fee = compute_payout(usdc_gross, config.flat_fee_usdc_units, config.dynamic_fee_bps);

        if fee.payout == 0 {
            warn!(txid = %row.txid, "net payout after fee is zero, routing to refund");
            store
                .set_credit_status(&row.txid, CreditStatus::RecipientUnresolved)
                .await?;
            store.release_reservation("send", &row.txid).await?;
            continue;
        }

        match chain_s
            .send_token(&config.vault_usdc_account, &account, fee.payout, config.usdc_decimals, Some(&memo))
            .await
        {
            Ok(sig) => {
                store.set_credit_payout_sig(&row.txid, &sig).await?;
                store.set_credit_status(&row.txid, CreditStatus::SendPending).await?;
                store.record_credit_fee(&row.txid, fee.dynamic, row.ts).await?;
                info!(txid = %row.txid, sig = %sig, payout = fee.payout, "credit payout submitted");
                sent += 1;
            }
            Err(AdapterError::Rejected(msg)) => {
                warn!(txid = %row.txid, reason = %msg, "credit payout rejected, routing to refund");
                store
                    .set_credit_status(&row.txid, CreditStatus::RecipientUnresolved)
                    .await?;
                store.release_reservation("send", &row.txid).await?;
            }
            Err(AdapterError::Timeout(_)) | Err(AdapterError::Unavailable(_)) => {
                warn!(txid = %row.txid, "credit payout indeterminate, deferring to next cycle");
            }
        }
    }
    Ok(sent)
}

/// `send_pending` → `ProcessedCredit_D(send_confirmed)` once confirmations clear.
pub async fn confirm_sends(
    store: &Store,
    chain_s: &dyn ChainSAdapter,
    config: &BridgeConfig,
) -> Result<u32, BridgeError> {
    let rows = store
        .list_unprocessed_credits(config.max_deposits_per_loop as i64)
        .await?
        .into_iter()
        .filter(|r| r.status == CreditStatus::SendPending)
        .collect::<Vec<_>>();

    let mut confirmed = 0u32;
    for row in rows {
        let Some(sig) = row.payout_sig.as_deref() else { continue };
        let confirmations = chain_s.get_signature_confirmations(sig).await?;
        if confirmations < config.min_confirmations {
            continue;
        }
        store.promote_to_send_confirmed(&row.txid).await?;
        store.release_reservation("send", &row.txid).await?;
        info!(txid = %row.txid, "credit payout confirmed");
        confirmed += 1;
    }
    Ok(confirmed)
}

/// `recipient_unresolved` → `refund_pending` (on successful submit).
pub async fn process_refund_credits(
    store: &Store,
    chain_n: &dyn ChainNAdapter,
    config: &BridgeConfig,
) -> Result<u32, BridgeError> {
    let rows = store
        .list_unprocessed_credits(config.max_deposits_per_loop as i64)
        .await?
        .into_iter()
        .filter(|r| r.status == CreditStatus::RecipientUnresolved)
        .collect::<Vec<_>>();

    let mut queued = 0u32;
    for row in rows {
        let action_key = reference::refund_credit_reservation_key(&row.txid);
        if !store
            .reserve("refund_credit", &row.txid, config.reservation_ttl_sec as i64)
            .await?
        {
            continue;
        }
        if !reference::should_attempt(store, &action_key, config).await? {
            store.release_reservation("refund_credit", &row.txid).await?;
            continue;
        }
        reference::record_attempt(store, &action_key).await?;

        let refund_amount = (row.amount_usdd_units - config.refund_usdd_fee_base_units).max(0);
        if refund_amount == 0 {
            store
                .promote_to_refunded_credit(&row.txid, 0, None, refund_reason(&row))
                .await?;
            store.release_reservation("refund_credit", &row.txid).await?;
            continue;
        }

        let amount_decimal = format_decimal_amount(refund_amount, config.usdd_decimals);
        match chain_n
            .transfer_between_accounts(
                &config.nexus_usdd_treasury_account,
                &row.sender,
                &amount_decimal,
                "refund",
            )
            .await
        {
            Ok((true, txid_onchain)) => {
                store.set_credit_payout_sig(&row.txid, &txid_onchain).await?;
                store.set_credit_status(&row.txid, CreditStatus::RefundPending).await?;
                info!(txid = %row.txid, refund_txid = %txid_onchain, amount = refund_amount, "credit refund submitted");
                queued += 1;
            }
            Ok((false, _)) => {
                warn!(txid = %row.txid, "credit refund not acknowledged, deferring");
                store.release_reservation("refund_credit", &row.txid).await?;
            }
            Err(AdapterError::Rejected(msg)) => {
                warn!(txid = %row.txid, reason = %msg, "credit refund rejected");
                store.release_reservation("refund_credit", &row.txid).await?;
            }
            Err(AdapterError::Timeout(_)) | Err(AdapterError::Unavailable(_)) => {
                warn!(txid = %row.txid, "credit refund indeterminate, deferring to next cycle");
            }
        }
    }
    Ok(queued)
}

pub async fn confirm_refund_credits(
    store: &Store,
    chain_n: &dyn ChainNAdapter,
    config: &BridgeConfig,
) -> Result<u32, BridgeError> {
    let rows = store
        .list_unprocessed_credits(config.max_deposits_per_loop as i64)
        .await?
        .into_iter()
        .filter(|r| r.status == CreditStatus::RefundPending)
        .collect::<Vec<_>>();

    let mut confirmed = 0u32;
    for row in rows {
        let Some(sig) = row.payout_sig.as_deref() else { continue };
        let confirmations = chain_n.get_transaction_confirmations(sig).await?;
        if confirmations < config.min_confirmations {
            continue;
        }
        let refund_amount = (row.amount_usdd_units - config.refund_usdd_fee_base_units).max(0);
        store
            .promote_to_refunded_credit(&row.txid, refund_amount, Some(sig), refund_reason(&row))
            .await?;
        store.release_reservation("refund_credit", &row.txid).await?;
        info!(txid = %row.txid, "credit refund confirmed");
        confirmed += 1;
    }
    Ok(confirmed)
}

/// Bookkeeping-only quarantine: unlike a deposit, a stuck credit's T_D value
/// already rests in the treasury account, so there is no on-chain transfer to
/// submit — only the terminal-table move (§7 IrrecoverableFail).
pub async fn process_quarantine_credits(
    store: &Store,
    config: &BridgeConfig,
    now: i64,
) -> Result<u32, BridgeError> {
    let rows = store
        .list_unprocessed_credits(config.max_deposits_per_loop as i64)
        .await?;

    let mut quarantined = 0u32;
    for row in rows {
        if matches!(
            row.status,
            CreditStatus::RefundPending | CreditStatus::SendPending | CreditStatus::QuarantinePending
        ) {
            continue;
        }
        let action_key = match row.status {
            CreditStatus::Ready => reference::send_reservation_key(&row.txid),
            CreditStatus::RecipientUnresolved => reference::refund_credit_reservation_key(&row.txid),
            CreditStatus::New => continue,
        };
        let attempts = store.attempt_count(&action_key).await?;
        if !reference::is_stale_and_exhausted(attempts, row.ts, now, config) {
            continue;
        }
        store.promote_to_quarantined_credit(&row.txid, STALE_REASON).await?;
        store.release_reservation("send", &row.txid).await?;
        store.release_reservation("refund_credit", &row.txid).await?;
        info!(txid = %row.txid, "stale credit quarantined");
        quarantined += 1;
    }
    Ok(quarantined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_n::mock::MockChainNAdapter;
    use crate::chain_n::NexusAsset;
    use crate::chain_s::mock::MockChainSAdapter;
    use crate::reference::test_support::test_config;
    use crate::store::test_store;

    #[tokio::test]
    async fn scenario_resolves_via_reference_and_sends() {
        let store = test_store().await;
        let config = test_config();
        let chain_n = MockChainNAdapter::default();
        let chain_s = MockChainSAdapter::default();
        chain_s
            .valid_token_accounts
            .lock()
            .unwrap()
            .insert("bob_ata".into(), config.usdc_mint.clone());

        store
            .insert_unprocessed_credit(
                "tx1",
                "0",
                100,
                "sender1",
                None,
                10_000_000,
                Some("solana:bob_ata"),
            )
            .await
            .unwrap();

        classify_new_credits(&store, &chain_n, &chain_s, &config).await.unwrap();
        let row = store.get_unprocessed_credit("tx1").await.unwrap().unwrap();
        assert_eq!(row.status, CreditStatus::Ready);
        assert_eq!(row.resolved_receival_account.as_deref(), Some("bob_ata"));

        process_ready_credits(&store, &chain_n, &chain_s, &config).await.unwrap();
        let row = store.get_unprocessed_credit("tx1").await.unwrap().unwrap();
        assert_eq!(row.status, CreditStatus::SendPending);

        let sent = chain_s.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "bob_ata");
        drop(sent);

        let sig = row.payout_sig.clone().unwrap();
        chain_s.confirmations.lock().unwrap().insert(sig, 5);
        confirm_sends(&store, &chain_s, &config).await.unwrap();
        assert!(store.get_processed_credit("tx1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn scenario_4_credit_payout_applies_flat_and_dynamic_fee() {
        let store = test_store().await;
        let config = test_config();
        let chain_n = MockChainNAdapter::default();
        let chain_s = MockChainSAdapter::default();
        chain_s
            .valid_token_accounts
            .lock()
            .unwrap()
            .insert("SOLADDR1".into(), config.usdc_mint.clone());

        store
            .insert_unprocessed_credit(
                "T1",
                "0",
                100,
                "sender1",
                None,
                2_000_000,
                Some("solana:SOLADDR1"),
            )
            .await
            .unwrap();

        classify_new_credits(&store, &chain_n, &chain_s, &config).await.unwrap();
        process_ready_credits(&store, &chain_n, &chain_s, &config).await.unwrap();

        let sent = chain_s.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "SOLADDR1");
        assert_eq!(sent[0].2, 1_498_500);
        assert_eq!(sent[0].3.as_deref(), Some("nexus_txid:T1"));
    }

    #[tokio::test]
    async fn scenario_registry_match_takes_priority_over_reference() {
        let store = test_store().await;
        let config = test_config();
        let chain_n = MockChainNAdapter::default();
        let chain_s = MockChainSAdapter::default();
        chain_s
            .valid_token_accounts
            .lock()
            .unwrap()
            .insert("registry_ata".into(), config.usdc_mint.clone());

        let mut fields = HashMap::new();
        fields.insert("receival_account".to_string(), "registry_ata".to_string());
        fields.insert("created".to_string(), "1".to_string());
        chain_n
            .assets
            .lock()
            .unwrap()
            .insert("a1".to_string(), NexusAsset { name: "a1".into(), fields });

        store
            .insert_unprocessed_credit("tx2", "0", 100, "sender2", None, 10_000_000, Some("solana:other"))
            .await
            .unwrap();

        classify_new_credits(&store, &chain_n, &chain_s, &config).await.unwrap();
        let row = store.get_unprocessed_credit("tx2").await.unwrap().unwrap();
        assert_eq!(row.resolved_receival_account.as_deref(), Some("registry_ata"));
    }

    #[tokio::test]
    async fn scenario_micro_credit_is_quarantined_as_fee() {
        let store = test_store().await;
        let config = test_config();
        let chain_n = MockChainNAdapter::default();
        let chain_s = MockChainSAdapter::default();

        store
            .insert_unprocessed_credit("tx3", "0", 100, "sender3", None, 100_000, None)
            .await
            .unwrap();
        classify_new_credits(&store, &chain_n, &chain_s, &config).await.unwrap();

        assert!(store.get_unprocessed_credit("tx3").await.unwrap().is_none());
        let quarantined = store.list_quarantined_credits(10).await.unwrap();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(quarantined[0].reason, MICRO_REASON);
    }

    #[tokio::test]
    async fn scenario_tiny_credit_routes_to_local_sink() {
        let store = test_store().await;
        let config = test_config();
        let chain_n = MockChainNAdapter::default();
        let chain_s = MockChainSAdapter::default();

        store
            .insert_unprocessed_credit("tx4", "0", 100, "sender4", None, 300_000, None)
            .await
            .unwrap();
        classify_new_credits(&store, &chain_n, &chain_s, &config).await.unwrap();
        process_ready_credits(&store, &chain_n, &chain_s, &config).await.unwrap();

        assert!(store.get_processed_credit("tx4").await.unwrap().is_some());
        let debits = chain_n.debits.lock().unwrap();
        assert_eq!(debits.len(), 1);
        assert_eq!(debits[0].1, config.nexus_usdd_local_account);
    }

    #[tokio::test]
    async fn scenario_invalid_reference_is_refunded() {
        let store = test_store().await;
        let config = test_config();
        let chain_n = MockChainNAdapter::default();
        let chain_s = MockChainSAdapter::default();

        store
            .insert_unprocessed_credit("tx5", "0", 100, "sender5", None, 10_000_000, None)
            .await
            .unwrap();
        classify_new_credits(&store, &chain_n, &chain_s, &config).await.unwrap();
        assert_eq!(
            store.get_unprocessed_credit("tx5").await.unwrap().unwrap().status,
            CreditStatus::RecipientUnresolved
        );

        process_refund_credits(&store, &chain_n, &config).await.unwrap();
        let row = store.get_unprocessed_credit("tx5").await.unwrap().unwrap();
        assert_eq!(row.status, CreditStatus::RefundPending);

        let sig = row.payout_sig.clone().unwrap();
        chain_n.confirmations.lock().unwrap().insert(sig, 5);
        confirm_refund_credits(&store, &chain_n, &config).await.unwrap();
        let refunded = store.list_refunded_credits(10).await.unwrap();
        assert_eq!(refunded.len(), 1);
        assert_eq!(refunded[0].reason, "missing_reference");
        assert_eq!(refunded[0].refunded_amount_usdd_units, 10_000_000 - config.refund_usdd_fee_base_units);
    }
}
