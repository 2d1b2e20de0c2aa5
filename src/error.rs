//! Error taxonomy for the bridge core.
//!
//! `BridgeError` is the single type every processor, adapter, and store
//! operation ultimately reports through. It mirrors the seven-category
//! taxonomy of the bridge design: transient I/O, bad input, recipient
//! defects, policy rejections, irrecoverable failures, backing deficits,
//! and fatal startup conditions. No exception is allowed to bypass the
//! state machine — every fallible function in this crate returns
//! `Result<_, BridgeError>`.

use std::fmt;

#[derive(Debug)]
pub enum BridgeError {
    /// Adapter timeout, RPC 5xx, socket error. Never mutate state on this; retry next cycle.
    TransientIo(String),
    /// Malformed memo, non-token account, zero net payout. Row still owned by us; route to refund.
    InvalidInput(String),
    /// Missing destination token account, unknown Chain-N account.
    RecipientDefect(String),
    /// Below minimum, duplicate deposit.
    PolicyReject(String),
    /// MAX_ACTION_ATTEMPTS exhausted and stale beyond STALE_DEPOSIT_QUARANTINE_SEC.
    IrrecoverableFail(String),
    /// vault*100 < PAUSE_PCT*supply.
    BackingDeficit { vault: i128, supply: i128 },
    /// Store unavailable, key material missing. Log and shut down cleanly.
    Fatal(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::TransientIo(msg) => write!(f, "transient I/O error: {msg}"),
            BridgeError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            BridgeError::RecipientDefect(msg) => write!(f, "recipient defect: {msg}"),
            BridgeError::PolicyReject(msg) => write!(f, "policy reject: {msg}"),
            BridgeError::IrrecoverableFail(msg) => write!(f, "irrecoverable failure: {msg}"),
            BridgeError::BackingDeficit { vault, supply } => {
                write!(f, "backing deficit: vault={vault} supply={supply}")
            }
            BridgeError::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<StoreError> for BridgeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => BridgeError::InvalidInput(format!("not found: {what}")),
            StoreError::Backend(msg) => BridgeError::Fatal(msg),
        }
    }
}

impl From<AdapterError> for BridgeError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::Timeout(msg) => BridgeError::TransientIo(msg),
            AdapterError::Rejected(msg) => BridgeError::InvalidInput(msg),
            AdapterError::Unavailable(msg) => BridgeError::TransientIo(msg),
        }
    }
}

/// Outcome of a non-idempotent external call. Indeterminate is neither success nor
/// failure — callers MUST leave the row in its `*_pending` state and let the next
/// cycle's confirmation/recovery scan resolve it.
#[derive(Debug)]
pub enum AdapterOutcome<T> {
    Ok(T),
    Indeterminate,
    Err(AdapterError),
}

#[derive(Debug)]
pub enum AdapterError {
    /// Call exceeded its per-call or per-poll budget.
    Timeout(String),
    /// The remote side explicitly rejected the call (bad params, invalid account).
    Rejected(String),
    /// Transport-level failure (connection refused, subprocess spawn failure).
    Unavailable(String),
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::Timeout(msg) => write!(f, "adapter timeout: {msg}"),
            AdapterError::Rejected(msg) => write!(f, "adapter rejected call: {msg}"),
            AdapterError::Unavailable(msg) => write!(f, "adapter unavailable: {msg}"),
        }
    }
}

impl std::error::Error for AdapterError {}

#[derive(Debug)]
pub enum StoreError {
    NotFound(String),
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(what) => write!(f, "not found: {what}"),
            StoreError::Backend(msg) => write!(f, "store backend error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".into()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(String),
    Invalid(String, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(name) => write!(f, "missing required env var: {name}"),
            ConfigError::Invalid(name, reason) => write!(f, "invalid env var {name}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}
