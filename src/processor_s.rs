//! Processor: S→D (T_S → T_D). State machine of §4.5 over `UnprocessedDeposit_S`,
//! split into classify/debit/confirm/refund/quarantine passes, each its own
//! bounded sweep rather than one monolithic pass.

use tracing::{info, warn};

use crate::chain_n::ChainNAdapter;
use crate::chain_s::ChainSAdapter;
use crate::config::BridgeConfig;
use crate::error::{AdapterError, BridgeError};
use crate::fees::{compute_payout, scale_amount};
use crate::reference;
use crate::store::types::DepositStatus;
use crate::store::Store;

const MICRO_REASON: &str = "micro_fee";
const STALE_REASON: &str = "stale_exhausted";

fn parse_nexus_memo(memo: &str) -> Option<&str> {
    memo.strip_prefix("nexus:").filter(|addr| !addr.is_empty())
}

/// `new` → `ready` | `memo_unresolved` (including the micro-deposit fast path to quarantine).
pub async fn classify_new_deposits(
    store: &Store,
    chain_n: &dyn ChainNAdapter,
    config: &BridgeConfig,
) -> Result<u32, BridgeError> {
    let limit = if config.micro_deposit_count_against_limit {
        config.max_deposits_per_loop as i64
    } else {
        config.max_deposits_per_loop as i64 * 4
    };
    let rows = store.list_unprocessed_deposits(limit).await?;
    let mut classified = 0u32;

    for row in rows.into_iter().filter(|r| r.status == DepositStatus::New) {
        if row.amount_usdc_units < config.min_deposit_usdc_units {
            store
                .promote_to_quarantined(&row.sig, MICRO_REASON, None)
                .await?;
            store
                .record_deposit_fee(&row.sig, row.amount_usdc_units, row.ts)
                .await?;
            info!(sig = %row.sig, amount = row.amount_usdc_units, "deposit below minimum, retained as fee");
            classified += 1;
            continue;
        }

        let valid = match row.memo.as_deref().and_then(parse_nexus_memo) {
            Some(addr) => chain_n.get_account(addr).await.unwrap_or(None).is_some(),
            None => false,
        };

        if valid {
            store.set_deposit_status(&row.sig, DepositStatus::Ready).await?;
        } else {
            store
                .set_deposit_status(&row.sig, DepositStatus::MemoUnresolved)
                .await?;
        }
        classified += 1;
    }
    Ok(classified)
}

/// `ready` → `debited_pending`. Fee computation, reservation, and the
/// zero-payout-triggers-refund rule of §4.5 all live here.
pub async fn process_ready_deposits(
    store: &Store,
    chain_n: &dyn ChainNAdapter,
    config: &BridgeConfig,
) -> Result<u32, BridgeError> {
    let mut rows = store
        .list_unprocessed_deposits(config.max_deposits_per_loop as i64)
        .await?
        .into_iter()
        .filter(|r| r.status == DepositStatus::Ready)
        .collect::<Vec<_>>();
    // Tie-break identical (ts, sender) by signature, per §4.5.
    rows.sort_by(|a, b| (a.ts, &a.sender, &a.sig).cmp(&(b.ts, &b.sender, &b.sig)));

    let mut debited = 0u32;
    for row in rows {
        let action_key = reference::debit_reservation_key(&row.sig);
        if !store
            .reserve("debit", &row.sig, config.reservation_ttl_sec as i64)
            .await?
        {
            continue;
        }
        if !reference::should_attempt(store, &action_key, config).await? {
            store.release_reservation("debit", &row.sig).await?;
            continue;
        }
        reference::record_attempt(store, &action_key).await?;

        let Some(addr) = row.memo.as_deref().and_then(parse_nexus_memo) else {
            // Should not happen — classify_new_deposits already validated the memo.
            store
                .set_deposit_status(&row.sig, DepositStatus::MemoUnresolved)
                .await?;
            store.release_reservation("debit", &row.sig).await?;
            continue;
        };

        let gross_usdd = scale_amount(row.amount_usdc_units, config.usdc_decimals, config.usdd_decimals);
        let fee = compute_payout(gross_usdd, config.flat_fee_usdd_units, config.dynamic_fee_bps);

        if fee.payout == 0 {
            warn!(sig = %row.sig, "zero net payout after fees, routing to refund");
            store
                .set_deposit_status(&row.sig, DepositStatus::MemoUnresolved)
                .await?;
            store.release_reservation("debit", &row.sig).await?;
            continue;
        }

        let reference_id = reference::next_reference(store).await?;
        let amount_decimal = crate::chain_n::format_decimal_amount(fee.payout, config.usdd_decimals);

        match chain_n
            .debit_account(&config.nexus_usdd_treasury_account, addr, &amount_decimal, reference_id)
            .await
        {
            Ok((true, txid)) => {
                store.set_deposit_reference(&row.sig, reference_id).await?;
                store.set_deposit_txid(&row.sig, &txid).await?;
                store
                    .set_deposit_status(&row.sig, DepositStatus::DebitedPending)
                    .await?;
                store
                    .record_deposit_fee(&row.sig, fee.flat + fee.dynamic, row.ts)
                    .await?;
                info!(sig = %row.sig, reference = reference_id, txid = %txid, payout = fee.payout, "debit submitted");
                debited += 1;
            }
            Ok((false, _)) => {
                warn!(sig = %row.sig, "debit not acknowledged, routing to refund");
                store
                    .set_deposit_status(&row.sig, DepositStatus::MemoUnresolved)
                    .await?;
                store.release_reservation("debit", &row.sig).await?;
            }
            Err(AdapterError::Rejected(msg)) => {
                warn!(sig = %row.sig, reason = %msg, "debit rejected, routing to refund");
                store
                    .set_deposit_status(&row.sig, DepositStatus::MemoUnresolved)
                    .await?;
                store.release_reservation("debit", &row.sig).await?;
            }
            Err(AdapterError::Timeout(_)) | Err(AdapterError::Unavailable(_)) => {
                // Indeterminate: leave the reservation in place until its TTL lapses;
                // the confirmation sweep's memo-scan resolves any send that did land.
                warn!(sig = %row.sig, "debit call indeterminate, deferring to next cycle");
            }
        }
    }
    Ok(debited)
}

/// `debited_pending` → `ProcessedDeposit_S(debit_confirmed)` once confirmations clear.
pub async fn confirm_debited(
    store: &Store,
    chain_n: &dyn ChainNAdapter,
    config: &BridgeConfig,
) -> Result<u32, BridgeError> {
    let rows = store
        .list_deposits_awaiting_confirmation(config.max_deposits_per_loop as i64)
        .await?;
    let mut confirmed = 0u32;
    for row in rows {
        let Some(txid) = row.txid.as_deref() else { continue };
        let confirmations = chain_n.get_transaction_confirmations(txid).await?;
        if confirmations < config.min_confirmations {
            continue;
        }
        let gross_usdd = scale_amount(row.amount_usdc_units, config.usdc_decimals, config.usdd_decimals);
        let fee = compute_payout(gross_usdd, config.flat_fee_usdd_units, config.dynamic_fee_bps);
        store.promote_to_processed(&row.sig, fee.payout).await?;
        store.release_reservation("debit", &row.sig).await?;
        info!(sig = %row.sig, reference = ?row.reference, "debit confirmed");
        confirmed += 1;
    }
    Ok(confirmed)
}

/// `memo_unresolved` → `refund_pending` (on successful submit).
pub async fn process_refunds(
    store: &Store,
    chain_s: &dyn ChainSAdapter,
    config: &BridgeConfig,
) -> Result<u32, BridgeError> {
    let rows = store
        .list_unprocessed_deposits(config.max_deposits_per_loop as i64)
        .await?
        .into_iter()
        .filter(|r| r.status == DepositStatus::MemoUnresolved)
        .collect::<Vec<_>>();

    let mut queued = 0u32;
    for row in rows {
        let action_key = reference::refund_deposit_action_key(&row.sig);
        if !store
            .reserve("refund_deposit", &row.sig, config.reservation_ttl_sec as i64)
            .await?
        {
            continue;
        }
        if !reference::should_attempt(store, &action_key, config).await? {
            store.release_reservation("refund_deposit", &row.sig).await?;
            continue;
        }
        reference::record_attempt(store, &action_key).await?;

        let refund_amount = (row.amount_usdc_units - config.flat_fee_usdc_units_refund).max(0);
        if refund_amount == 0 {
            store.promote_to_refunded(&row.sig, 0, None).await?;
            store.release_reservation("refund_deposit", &row.sig).await?;
            continue;
        }

        let memo = format!("refundSig:{}", row.sig);
        match chain_s
            .send_token(
                &config.vault_usdc_account,
                &row.sender,
                refund_amount,
                config.usdc_decimals,
                Some(&memo),
            )
            .await
        {
            Ok(sig) => {
                store.set_deposit_txid(&row.sig, &sig).await?;
                store
                    .set_deposit_status(&row.sig, DepositStatus::RefundPending)
                    .await?;
                info!(sig = %row.sig, refund_sig = %sig, amount = refund_amount, "refund submitted");
                queued += 1;
            }
            Err(AdapterError::Timeout(_)) | Err(AdapterError::Unavailable(_)) => {
                warn!(sig = %row.sig, "refund call indeterminate, deferring to next cycle");
            }
            Err(AdapterError::Rejected(msg)) => {
                warn!(sig = %row.sig, reason = %msg, "refund rejected");
                store.release_reservation("refund_deposit", &row.sig).await?;
            }
        }
    }
    Ok(queued)
}

pub async fn confirm_refunds(
    store: &Store,
    chain_s: &dyn ChainSAdapter,
    config: &BridgeConfig,
) -> Result<u32, BridgeError> {
    let rows = store
        .list_unprocessed_deposits(config.max_deposits_per_loop as i64)
        .await?
        .into_iter()
        .filter(|r| r.status == DepositStatus::RefundPending)
        .collect::<Vec<_>>();

    let mut confirmed = 0u32;
    for row in rows {
        let Some(sig) = row.txid.as_deref() else { continue };
        let confirmations = chain_s.get_signature_confirmations(sig).await?;
        if confirmations < config.min_confirmations {
            continue;
        }
        let refund_amount = (row.amount_usdc_units - config.flat_fee_usdc_units_refund).max(0);
        store
            .promote_to_refunded(&row.sig, refund_amount, Some(sig))
            .await?;
        store.release_reservation("refund_deposit", &row.sig).await?;
        info!(sig = %row.sig, "refund confirmed");
        confirmed += 1;
    }
    Ok(confirmed)
}

/// Any non-terminal row that has exhausted `MAX_ACTION_ATTEMPTS` and aged past
/// `STALE_DEPOSIT_QUARANTINE_SEC` is moved bodily into the quarantine vault (§7
/// IrrecoverableFail).
pub async fn process_quarantine(
    store: &Store,
    chain_s: &dyn ChainSAdapter,
    config: &BridgeConfig,
    now: i64,
) -> Result<u32, BridgeError> {
    let rows = store
        .list_unprocessed_deposits(config.max_deposits_per_loop as i64)
        .await?;

    let mut queued = 0u32;
    for row in rows {
        if matches!(
            row.status,
            DepositStatus::RefundPending | DepositStatus::QuarantinePending
        ) {
            continue;
        }
        let action_key = match row.status {
            DepositStatus::Ready | DepositStatus::DebitedPending => {
                reference::debit_reservation_key(&row.sig)
            }
            _ => reference::refund_deposit_action_key(&row.sig),
        };
        let attempts = store.attempt_count(&action_key).await?;
        if !reference::is_stale_and_exhausted(attempts, row.ts, now, config) {
            continue;
        }

        if !store
            .reserve("quarantine_deposit", &row.sig, config.reservation_ttl_sec as i64)
            .await?
        {
            continue;
        }

        let memo = format!("quarantinedSig:{}", row.sig);
        match chain_s
            .send_token(
                &config.vault_usdc_account,
                &config.quarantine_usdc_account,
                row.amount_usdc_units,
                config.usdc_decimals,
                Some(&memo),
            )
            .await
        {
            Ok(sig) => {
                store.set_deposit_txid(&row.sig, &sig).await?;
                store
                    .set_deposit_status(&row.sig, DepositStatus::QuarantinePending)
                    .await?;
                info!(sig = %row.sig, quarantine_sig = %sig, "quarantine transfer submitted");
                queued += 1;
            }
            Err(AdapterError::Timeout(_)) | Err(AdapterError::Unavailable(_)) => {
                warn!(sig = %row.sig, "quarantine transfer indeterminate, deferring");
            }
            Err(AdapterError::Rejected(msg)) => {
                warn!(sig = %row.sig, reason = %msg, "quarantine transfer rejected");
                store.release_reservation("quarantine_deposit", &row.sig).await?;
            }
        }
    }
    Ok(queued)
}

pub async fn confirm_quarantines(
    store: &Store,
    chain_s: &dyn ChainSAdapter,
    config: &BridgeConfig,
) -> Result<u32, BridgeError> {
    let rows = store
        .list_unprocessed_deposits(config.max_deposits_per_loop as i64)
        .await?
        .into_iter()
        .filter(|r| r.status == DepositStatus::QuarantinePending)
        .collect::<Vec<_>>();

    let mut confirmed = 0u32;
    for row in rows {
        let Some(sig) = row.txid.as_deref() else { continue };
        let confirmations = chain_s.get_signature_confirmations(sig).await?;
        if confirmations < config.min_confirmations {
            continue;
        }
        store
            .promote_to_quarantined(&row.sig, STALE_REASON, Some(sig))
            .await?;
        store.release_reservation("quarantine_deposit", &row.sig).await?;
        info!(sig = %row.sig, "quarantine transfer confirmed");
        confirmed += 1;
    }
    Ok(confirmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_n::mock::MockChainNAdapter;
    use crate::chain_s::mock::MockChainSAdapter;
    use crate::store::test_store;

    use crate::reference::test_support::test_config;

    #[tokio::test]
    async fn scenario_1_deposit_debits_after_fee() {
        let store = test_store().await;
        let config = test_config();
        let chain_n = MockChainNAdapter::default();
        chain_n.accounts.lock().unwrap().insert(
            "NX1".to_string(),
            crate::chain_n::NexusAccount {
                address: "NX1".into(),
                token_name: "USDD".into(),
                balance_base_units: 0,
                owner: None,
            },
        );

        store
            .insert_unprocessed_deposit("S1", 100, "alice", 10_000_000, Some("nexus:NX1"))
            .await
            .unwrap();

        classify_new_deposits(&store, &chain_n, &config).await.unwrap();
        let row = store.get_unprocessed_deposit("S1").await.unwrap().unwrap();
        assert_eq!(row.status, DepositStatus::Ready);

        process_ready_deposits(&store, &chain_n, &config).await.unwrap();
        let row = store.get_unprocessed_deposit("S1").await.unwrap().unwrap();
        assert_eq!(row.status, DepositStatus::DebitedPending);
        assert_eq!(row.reference, Some(1));

        let debits = chain_n.debits.lock().unwrap();
        assert_eq!(debits.len(), 1);
        assert_eq!(debits[0].2, "9.4905");

        chain_n
            .confirmations
            .lock()
            .unwrap()
            .insert(debits[0].clone().1, 0);
        drop(debits);
        let txid = store.get_unprocessed_deposit("S1").await.unwrap().unwrap().txid.unwrap();
        chain_n.confirmations.lock().unwrap().insert(txid, 5);

        confirm_debited(&store, &chain_n, &config).await.unwrap();
        assert!(store.is_deposit_processed("S1").await.unwrap());
        let processed = store.get_processed_deposit("S1").await.unwrap().unwrap();
        assert_eq!(processed.amount_usdd, Some(9_490_500));
    }

    #[tokio::test]
    async fn scenario_2_micro_deposit_is_quarantined_as_fee() {
        let store = test_store().await;
        let config = test_config();
        let chain_n = MockChainNAdapter::default();

        store
            .insert_unprocessed_deposit("S2", 100, "alice", 100_000, Some("nexus:NX2"))
            .await
            .unwrap();
        classify_new_deposits(&store, &chain_n, &config).await.unwrap();

        assert!(store.get_unprocessed_deposit("S2").await.unwrap().is_none());
        let quarantined = store.list_quarantined_deposits(10).await.unwrap();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(quarantined[0].reason, MICRO_REASON);
        let (usdc, _) = store.read_fee_summary().await.unwrap();
        assert_eq!(usdc, 100_000);
    }

    #[tokio::test]
    async fn scenario_3_unresolved_memo_is_refunded() {
        let store = test_store().await;
        let config = test_config();
        let chain_n = MockChainNAdapter::default();
        let chain_s = MockChainSAdapter::default();

        store
            .insert_unprocessed_deposit("S3", 100, "alice", 1_000_000, None)
            .await
            .unwrap();
        classify_new_deposits(&store, &chain_n, &config).await.unwrap();
        assert_eq!(
            store.get_unprocessed_deposit("S3").await.unwrap().unwrap().status,
            DepositStatus::MemoUnresolved
        );

        process_refunds(&store, &chain_s, &config).await.unwrap();
        let sent = chain_s.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].2, 500_000);
        let sig = sent[0].clone();
        drop(sent);

        chain_s.confirmations.lock().unwrap().insert(
            store.get_unprocessed_deposit("S3").await.unwrap().unwrap().txid.unwrap(),
            5,
        );
        confirm_refunds(&store, &chain_s, &config).await.unwrap();
        let refunded = store.list_refunded_deposits(10).await.unwrap();
        assert_eq!(refunded.len(), 1);
        assert_eq!(refunded[0].refunded_amount_usdc_units, 500_000);
        let _ = sig;
    }
}
