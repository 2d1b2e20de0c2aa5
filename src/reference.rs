//! Thin helpers tying the reservation/attempt primitives in `store::reservations`
//! to the specific action keys the processors use. Centralizing the key shapes
//! here means a typo in one processor can't silently miss another's lock.

use crate::config::BridgeConfig;
use crate::error::StoreError;
use crate::store::Store;

pub const REFERENCE_COUNTER: &str = "reference";

pub fn debit_reservation_key(sig: &str) -> String {
    format!("debit:{sig}")
}

pub fn send_reservation_key(txid: &str) -> String {
    format!("send:{txid}")
}

pub fn refund_credit_reservation_key(txid: &str) -> String {
    format!("refund_credit:{txid}")
}

pub fn refund_deposit_action_key(sig: &str) -> String {
    format!("refund_deposit:{sig}")
}

pub fn quarantine_action_key(kind: &str, key: &str) -> String {
    format!("quarantine:{kind}:{key}")
}

/// Issues the next strictly-monotone debit reference. Seeded from
/// `MAX(reference)` over `ProcessedDeposit_S` on first use (§4.1, §4.3).
pub async fn next_reference(store: &Store) -> Result<i64, StoreError> {
    store.next_counter(REFERENCE_COUNTER).await
}

/// Whether `action_key` may be attempted again right now, per the
/// `should_attempt`/`record_attempt` retry-cooldown pattern of §4.3.
pub async fn should_attempt(
    store: &Store,
    action_key: &str,
    config: &BridgeConfig,
) -> Result<bool, StoreError> {
    store
        .should_attempt(
            action_key,
            config.max_action_attempts,
            config.action_retry_cooldown_sec as i64,
        )
        .await
}

pub async fn record_attempt(store: &Store, action_key: &str) -> Result<u32, StoreError> {
    store.record_attempt(action_key).await
}

/// A row is eligible for quarantine once it has exhausted its attempt budget
/// *and* aged past `STALE_DEPOSIT_QUARANTINE_SEC` (§4.3, §7 IrrecoverableFail).
pub fn is_stale_and_exhausted(
    attempts: u32,
    first_seen_ts: i64,
    now: i64,
    config: &BridgeConfig,
) -> bool {
    attempts >= config.max_action_attempts
        && now.saturating_sub(first_seen_ts) >= config.stale_deposit_quarantine_sec as i64
}

/// Shared by other modules' unit tests so every `BridgeConfig` literal in the
/// test suite doesn't have to restate all 35 fields.
#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::BridgeConfig;

    pub fn test_config() -> BridgeConfig {
        BridgeConfig {
            database_url: "sqlite::memory:".into(),
            solana_rpc_url: "https://example.invalid".into(),
            vault_keypair_path: "/tmp/key".into(),
            vault_usdc_account: "vault".into(),
            usdc_mint: "mint".into(),
            quarantine_usdc_account: "quarantine".into(),
            nexus_cli: "nexus".into(),
            nexus_pin: "pin".into(),
            nexus_usdd_treasury_account: "treasury".into(),
            nexus_usdd_local_account: "local".into(),
            nexus_token_name: "USDD".into(),
            nexus_heartbeat_asset_name: "beat".into(),
            fees_account: "fees".into(),
            usdc_decimals: 6,
            usdd_decimals: 6,
            solana_poll_interval_sec: 10,
            nexus_poll_interval_sec: 10,
            solana_poll_time_budget_sec: 15,
            nexus_poll_time_budget_sec: 15,
            nexus_process_budget_sec: 15,
            adapter_call_timeout_sec: 8,
            max_action_attempts: 3,
            action_retry_cooldown_sec: 30,
            stale_deposit_quarantine_sec: 86_400,
            reservation_ttl_sec: 60,
            min_deposit_usdc_units: 200_000,
            min_credit_usdd_units: 200_000,
            flat_fee_usdc_units: 500_000,
            flat_fee_usdc_units_refund: 500_000,
            flat_fee_usdd_units: 500_000,
            refund_usdd_fee_base_units: 500_000,
            dynamic_fee_bps: 10,
            min_confirmations: 1,
            max_deposits_per_loop: 1000,
            micro_credit_count_against_limit: false,
            micro_deposit_count_against_limit: true,
            backing_deficit_pause_pct: 98,
            backing_surplus_mint_threshold_usdc_units: 20_000_000,
            backing_reconcile_interval_sec: 300,
            backing_surplus_margin_pct: 1,
            heartbeat_waterline_enabled: true,
            heartbeat_waterline_safety_sec: 120,
            startup_scan_signature_limit: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_config;
    use super::*;
    use crate::store::test_store;

    #[tokio::test]
    async fn reference_counter_is_shared_sequence() {
        let store = test_store().await;
        let a = next_reference(&store).await.unwrap();
        let b = next_reference(&store).await.unwrap();
        assert_eq!(b, a + 1);
    }

    #[tokio::test]
    async fn attempt_cooldown_gates_retries() {
        let store = test_store().await;
        let config = test_config();
        let key = debit_reservation_key("sig1");
        assert!(should_attempt(&store, &key, &config).await.unwrap());
        record_attempt(&store, &key).await.unwrap();
        assert!(!should_attempt(&store, &key, &config).await.unwrap());
    }

    #[test]
    fn stale_and_exhausted_requires_both_conditions() {
        let config = test_config();
        assert!(!is_stale_and_exhausted(1, 0, 1000, &config));
        assert!(!is_stale_and_exhausted(5, 999_000, 999_100, &config));
        assert!(is_stale_and_exhausted(5, 0, 90_000, &config));
    }
}
