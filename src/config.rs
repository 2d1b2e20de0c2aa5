use std::env;

use crate::error::ConfigError;

/// All bridge configuration, loaded once at startup and never mutated.
///
/// Every field that touches money, security, or liveness is either a required
/// env var (fails fast if absent) or a validated numeric default.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    // Durable store
    pub database_url: String,

    // Chain-S (vault side)
    pub solana_rpc_url: String,
    pub vault_keypair_path: String,
    pub vault_usdc_account: String,
    pub usdc_mint: String,
    pub quarantine_usdc_account: String,

    // Chain-N (treasury side)
    pub nexus_cli: String,
    pub nexus_pin: String,
    pub nexus_usdd_treasury_account: String,
    pub nexus_usdd_local_account: String,
    pub nexus_token_name: String,
    pub nexus_heartbeat_asset_name: String,
    pub fees_account: String,

    // Decimals
    pub usdc_decimals: u32,
    pub usdd_decimals: u32,

    // Polling cadence
    pub solana_poll_interval_sec: u64,
    pub nexus_poll_interval_sec: u64,

    // Phase wall-clock budgets
    pub solana_poll_time_budget_sec: u64,
    pub nexus_poll_time_budget_sec: u64,
    pub nexus_process_budget_sec: u64,
    pub adapter_call_timeout_sec: u64,

    // Retry policy
    pub max_action_attempts: u32,
    pub action_retry_cooldown_sec: u64,
    pub stale_deposit_quarantine_sec: u64,
    pub reservation_ttl_sec: u64,

    // Minima / fee schedule (base units)
    pub min_deposit_usdc_units: i64,
    pub min_credit_usdd_units: i64,
    pub flat_fee_usdc_units: i64,
    pub flat_fee_usdc_units_refund: i64,
    pub flat_fee_usdd_units: i64,
    pub refund_usdd_fee_base_units: i64,
    pub dynamic_fee_bps: i64,
    pub min_confirmations: u32,
    pub max_deposits_per_loop: u32,
    pub micro_credit_count_against_limit: bool,
    pub micro_deposit_count_against_limit: bool,

    // Backing reconciler
    pub backing_deficit_pause_pct: i64,
    pub backing_surplus_mint_threshold_usdc_units: i64,
    pub backing_reconcile_interval_sec: u64,
    pub backing_surplus_margin_pct: i64,

    // Heartbeat
    pub heartbeat_waterline_enabled: bool,
    pub heartbeat_waterline_safety_sec: i64,

    // Startup recovery
    pub startup_scan_signature_limit: u32,
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://bridge.db".to_string());

        let solana_rpc_url = require_env("SOLANA_RPC_URL")?;
        validate_rpc_url(&solana_rpc_url, "SOLANA_RPC_URL")?;
        let vault_keypair_path = require_env("VAULT_KEYPAIR")?;
        let vault_usdc_account = require_env("VAULT_USDC_ACCOUNT")?;
        let usdc_mint = require_env("USDC_MINT")?;
        let quarantine_usdc_account = require_env("QUARANTINE_USDC_ACCOUNT")?;

        let nexus_cli = env::var("NEXUS_CLI").unwrap_or_else(|_| "nexus".to_string());
        let nexus_pin = require_env("NEXUS_PIN")?;
        let nexus_usdd_treasury_account = require_env("NEXUS_USDD_TREASURY_ACCOUNT")?;
        let nexus_usdd_local_account =
            env::var("NEXUS_USDD_LOCAL_ACCOUNT").unwrap_or_else(|_| "default".to_string());
        let nexus_token_name = env::var("NEXUS_TOKEN_NAME").unwrap_or_else(|_| "USDD".to_string());
        let nexus_heartbeat_asset_name = env::var("NEXUS_HEARTBEAT_ASSET_NAME")
            .unwrap_or_else(|_| "bridge_heartbeat".to_string());
        let fees_account = require_env("FEES_ACCOUNT")?;

        let usdc_decimals: u32 = parse_env_or("USDC_DECIMALS", 6)?;
        let usdd_decimals: u32 = parse_env_or("USDD_DECIMALS", 6)?;

        let solana_poll_interval_sec: u64 = parse_env_or("SOLANA_POLL_INTERVAL", 10)?;
        let nexus_poll_interval_sec: u64 = parse_env_or("NEXUS_POLL_INTERVAL", 10)?;
        positive(solana_poll_interval_sec, "SOLANA_POLL_INTERVAL")?;
        positive(nexus_poll_interval_sec, "NEXUS_POLL_INTERVAL")?;

        let solana_poll_time_budget_sec: u64 = parse_env_or("SOLANA_POLL_TIME_BUDGET_SEC", 15)?;
        let nexus_poll_time_budget_sec: u64 = parse_env_or("NEXUS_POLL_TIME_BUDGET_SEC", 15)?;
        let nexus_process_budget_sec: u64 = parse_env_or("NEXUS_PROCESS_BUDGET_SEC", 15)?;
        let adapter_call_timeout_sec: u64 = parse_env_or("ADAPTER_CALL_TIMEOUT_SEC", 8)?;

        let max_action_attempts: u32 = parse_env_or("MAX_ACTION_ATTEMPTS", 5)?;
        positive(max_action_attempts as u64, "MAX_ACTION_ATTEMPTS")?;
        let action_retry_cooldown_sec: u64 = parse_env_or("ACTION_RETRY_COOLDOWN_SEC", 30)?;
        let stale_deposit_quarantine_sec: u64 =
            parse_env_or("STALE_DEPOSIT_QUARANTINE_SEC", 86_400)?;
        let reservation_ttl_sec: u64 = parse_env_or("RESERVATION_TTL_SEC", 60)?;
        positive(reservation_ttl_sec, "RESERVATION_TTL_SEC")?;

        let min_deposit_usdc_units: i64 = parse_env_or("MIN_DEPOSIT_USDC_UNITS", 200_000)?;
        let min_credit_usdd_units: i64 = parse_env_or("MIN_CREDIT_USDD_UNITS", 200_000)?;
        let flat_fee_usdc_units: i64 = parse_env_or("FLAT_FEE_USDC_UNITS", 500_000)?;
        let flat_fee_usdd_units: i64 = parse_env_or("FLAT_FEE_USDD_UNITS", 500_000)?;
        // Refund-side flat fee reuses the USDD-side flat fee value by default.
        let flat_fee_usdc_units_refund: i64 =
            parse_env_or("FLAT_FEE_USDC_UNITS_REFUND", flat_fee_usdd_units)?;
        let refund_usdd_fee_base_units: i64 =
            parse_env_or("REFUND_USDD_FEE_BASE_UNITS", flat_fee_usdd_units)?;
        let dynamic_fee_bps: i64 = parse_env_or("DYNAMIC_FEE_BPS", 10)?;
        let min_confirmations: u32 = parse_env_or("MIN_CONFIRMATIONS", 1)?;
        let max_deposits_per_loop: u32 = parse_env_or("MAX_DEPOSITS_PER_LOOP", 1000)?;
        positive(max_deposits_per_loop as u64, "MAX_DEPOSITS_PER_LOOP")?;
        let micro_credit_count_against_limit: bool =
            parse_env_or("MICRO_CREDIT_COUNT_AGAINST_LIMIT", false)?;
        let micro_deposit_count_against_limit: bool =
            parse_env_or("MICRO_DEPOSIT_COUNT_AGAINST_LIMIT", true)?;

        let backing_deficit_pause_pct: i64 = parse_env_or("BACKING_DEFICIT_PAUSE_PCT", 98)?;
        let backing_surplus_mint_threshold_usdc_units: i64 =
            parse_env_or("BACKING_SURPLUS_MINT_THRESHOLD_USDC_UNITS", 20_000_000)?;
        let backing_reconcile_interval_sec: u64 =
            parse_env_or("BACKING_RECONCILE_INTERVAL_SEC", 300)?;
        let backing_surplus_margin_pct: i64 = parse_env_or("BACKING_SURPLUS_MARGIN_PCT", 1)?;

        let heartbeat_waterline_enabled: bool =
            parse_env_or("HEARTBEAT_WATERLINE_ENABLED", true)?;
        let heartbeat_waterline_safety_sec: i64 =
            parse_env_or("HEARTBEAT_WATERLINE_SAFETY_SEC", 120)?;

        let startup_scan_signature_limit: u32 =
            parse_env_or("STARTUP_SCAN_SIGNATURE_LIMIT", 300)?;

        Ok(Self {
            database_url,
            solana_rpc_url,
            vault_keypair_path,
            vault_usdc_account,
            usdc_mint,
            quarantine_usdc_account,
            nexus_cli,
            nexus_pin,
            nexus_usdd_treasury_account,
            nexus_usdd_local_account,
            nexus_token_name,
            nexus_heartbeat_asset_name,
            fees_account,
            usdc_decimals,
            usdd_decimals,
            solana_poll_interval_sec,
            nexus_poll_interval_sec,
            solana_poll_time_budget_sec,
            nexus_poll_time_budget_sec,
            nexus_process_budget_sec,
            adapter_call_timeout_sec,
            max_action_attempts,
            action_retry_cooldown_sec,
            stale_deposit_quarantine_sec,
            reservation_ttl_sec,
            min_deposit_usdc_units,
            min_credit_usdd_units,
            flat_fee_usdc_units,
            flat_fee_usdc_units_refund,
            flat_fee_usdd_units,
            refund_usdd_fee_base_units,
            dynamic_fee_bps,
            min_confirmations,
            max_deposits_per_loop,
            micro_credit_count_against_limit,
            micro_deposit_count_against_limit,
            backing_deficit_pause_pct,
            backing_surplus_mint_threshold_usdc_units,
            backing_reconcile_interval_sec,
            backing_surplus_margin_pct,
            heartbeat_waterline_enabled,
            heartbeat_waterline_safety_sec,
            startup_scan_signature_limit,
        })
    }
}

fn require_env(name: &str) -> Result<String, ConfigError> {
    env::var(name)
        .map_err(|_| ConfigError::Missing(name.into()))
        .and_then(|v| {
            if v.is_empty() {
                Err(ConfigError::Missing(name.into()))
            } else {
                Ok(v)
            }
        })
}

fn parse_env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.is_empty() => v
            .parse()
            .map_err(|_| ConfigError::Invalid(name.into(), format!("could not parse '{v}'"))),
        _ => Ok(default),
    }
}

fn positive(value: u64, name: &str) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid(name.into(), "must be > 0".into()));
    }
    Ok(())
}

fn validate_rpc_url(url: &str, name: &str) -> Result<(), ConfigError> {
    let lower = url.to_lowercase();
    if lower.starts_with("https://") {
        return Ok(());
    }
    if lower.starts_with("http://") {
        let host_part = lower.trim_start_matches("http://");
        if host_part.starts_with("localhost")
            || host_part.starts_with("127.0.0.1")
            || host_part.starts_with("[::1]")
        {
            return Ok(());
        }
        return Err(ConfigError::Invalid(
            name.into(),
            "must use HTTPS for non-localhost URLs".into(),
        ));
    }
    Err(ConfigError::Invalid(
        name.into(),
        "must start with https:// (or http:// for localhost)".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_plaintext_remote_rpc() {
        let err = validate_rpc_url("http://example.com", "SOLANA_RPC_URL").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_, _)));
    }

    #[test]
    fn allows_localhost_plaintext_rpc() {
        validate_rpc_url("http://127.0.0.1:8899", "SOLANA_RPC_URL").unwrap();
    }

    #[test]
    fn parse_env_or_falls_back_on_absence() {
        std::env::remove_var("BRIDGE_CORE_TEST_VAR_UNSET");
        let v: u64 = parse_env_or("BRIDGE_CORE_TEST_VAR_UNSET", 42).unwrap();
        assert_eq!(v, 42);
    }
}
