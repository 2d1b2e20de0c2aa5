//! Row types shared by every store submodule.
//!
//! Lifecycle rows are variants discriminated by *table*, not by an enum
//! wrapping a single Rust type — `UnprocessedDeposit`, `ProcessedDeposit`,
//! `RefundedSig`, `QuarantinedSig` are distinct structs backed by distinct
//! tables, matching the data model's "polymorphism by table" note.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    New,
    Ready,
    MemoUnresolved,
    DebitedPending,
    RefundPending,
    QuarantinePending,
    Micro,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::New => "new",
            DepositStatus::Ready => "ready",
            DepositStatus::MemoUnresolved => "memo_unresolved",
            DepositStatus::DebitedPending => "debited_pending",
            DepositStatus::RefundPending => "refund_pending",
            DepositStatus::QuarantinePending => "quarantine_pending",
            DepositStatus::Micro => "micro",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "new" => DepositStatus::New,
            "ready" => DepositStatus::Ready,
            "memo_unresolved" => DepositStatus::MemoUnresolved,
            "debited_pending" => DepositStatus::DebitedPending,
            "refund_pending" => DepositStatus::RefundPending,
            "quarantine_pending" => DepositStatus::QuarantinePending,
            "micro" => DepositStatus::Micro,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnprocessedDeposit {
    pub sig: String,
    pub ts: i64,
    pub sender: String,
    pub amount_usdc_units: i64,
    pub memo: Option<String>,
    pub status: DepositStatus,
    pub reference: Option<i64>,
    pub txid: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessedDepositStatus {
    DebitConfirmed,
    Refunded,
    Quarantined,
}

impl ProcessedDepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessedDepositStatus::DebitConfirmed => "debit_confirmed",
            ProcessedDepositStatus::Refunded => "refunded",
            ProcessedDepositStatus::Quarantined => "quarantined",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedDeposit {
    pub sig: String,
    pub ts: i64,
    pub sender: String,
    pub amount_usdc_units: i64,
    pub memo: Option<String>,
    pub reference: Option<i64>,
    pub txid: Option<String>,
    pub amount_usdd: Option<i64>,
    pub status: ProcessedDepositStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundedSig {
    pub sig: String,
    pub ts: i64,
    pub sender: String,
    pub refunded_amount_usdc_units: i64,
    pub refund_sig: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantinedSig {
    pub sig: String,
    pub ts: i64,
    pub sender: String,
    pub amount_usdc_units: i64,
    pub memo: Option<String>,
    pub quarantine_sig: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CreditStatus {
    New,
    Ready,
    RecipientUnresolved,
    SendPending,
    RefundPending,
    QuarantinePending,
}

impl CreditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditStatus::New => "new",
            CreditStatus::Ready => "ready",
            CreditStatus::RecipientUnresolved => "recipient_unresolved",
            CreditStatus::SendPending => "send_pending",
            CreditStatus::RefundPending => "refund_pending",
            CreditStatus::QuarantinePending => "quarantine_pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "new" => CreditStatus::New,
            "ready" => CreditStatus::Ready,
            "recipient_unresolved" => CreditStatus::RecipientUnresolved,
            "send_pending" => CreditStatus::SendPending,
            "refund_pending" => CreditStatus::RefundPending,
            "quarantine_pending" => CreditStatus::QuarantinePending,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnprocessedCredit {
    pub txid: String,
    pub contract_id: String,
    pub ts: i64,
    pub sender: String,
    pub owner: Option<String>,
    pub amount_usdd_units: i64,
    pub reference: Option<String>,
    pub confirmations: i64,
    pub status: CreditStatus,
    pub resolved_receival_account: Option<String>,
    pub payout_sig: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessedCreditStatus {
    SendConfirmed,
    Refunded,
    Quarantined,
}

impl ProcessedCreditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessedCreditStatus::SendConfirmed => "send_confirmed",
            ProcessedCreditStatus::Refunded => "refunded",
            ProcessedCreditStatus::Quarantined => "quarantined",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedCredit {
    pub txid: String,
    pub ts: i64,
    pub sender: String,
    pub amount_usdd_units: i64,
    pub receival_account: Option<String>,
    pub payout_sig: Option<String>,
    pub status: ProcessedCreditStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundedCredit {
    pub txid: String,
    pub ts: i64,
    pub sender: String,
    pub refunded_amount_usdd_units: i64,
    pub refund_txid: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantinedCredit {
    pub txid: String,
    pub ts: i64,
    pub sender: String,
    pub amount_usdd_units: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub asset_name: String,
    pub last_beat: i64,
    pub wline_sol: Option<i64>,
    pub wline_nxs: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum WaterlineChain {
    Solana,
    Nexus,
}

impl WaterlineChain {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaterlineChain::Solana => "solana",
            WaterlineChain::Nexus => "nexus",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeEntry {
    pub id: i64,
    pub sig: Option<String>,
    pub txid: Option<String>,
    pub kind: String,
    pub usdc_units: Option<i64>,
    pub usdd_units: Option<i64>,
    pub ts: i64,
}
