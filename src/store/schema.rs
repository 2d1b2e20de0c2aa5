//! Embedded schema, applied idempotently at startup.
//!
//! Written against SQLite (the default `sqlite://` deployment target); a
//! Postgres deployment runs the dialect-equivalent of this same DDL ahead of
//! time (the `sqlx::Any` pool speaks both, but `CREATE TABLE` text is not
//! portable between the two, so Postgres operators are expected to apply the
//! Postgres-flavored equivalent once via their own migration tooling).

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS unprocessed_sigs (
    sig TEXT PRIMARY KEY,
    ts INTEGER NOT NULL,
    sender TEXT NOT NULL,
    amount_usdc_units INTEGER NOT NULL,
    memo TEXT,
    status TEXT NOT NULL,
    reference INTEGER,
    txid TEXT
);

CREATE TABLE IF NOT EXISTS processed_sigs (
    sig TEXT PRIMARY KEY,
    ts INTEGER NOT NULL,
    sender TEXT NOT NULL,
    amount_usdc_units INTEGER NOT NULL,
    memo TEXT,
    reference INTEGER,
    txid TEXT,
    amount_usdd INTEGER,
    status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS refunded_sigs (
    sig TEXT PRIMARY KEY,
    ts INTEGER NOT NULL,
    sender TEXT NOT NULL,
    refunded_amount_usdc_units INTEGER NOT NULL,
    refund_sig TEXT
);

CREATE TABLE IF NOT EXISTS quarantined_sigs (
    sig TEXT PRIMARY KEY,
    ts INTEGER NOT NULL,
    sender TEXT NOT NULL,
    amount_usdc_units INTEGER NOT NULL,
    memo TEXT,
    quarantine_sig TEXT,
    reason TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS unprocessed_txids (
    txid TEXT PRIMARY KEY,
    contract_id TEXT NOT NULL,
    ts INTEGER NOT NULL,
    sender TEXT NOT NULL,
    owner TEXT,
    amount_usdd_units INTEGER NOT NULL,
    reference TEXT,
    confirmations INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    resolved_receival_account TEXT,
    payout_sig TEXT
);

CREATE TABLE IF NOT EXISTS processed_txids (
    txid TEXT PRIMARY KEY,
    ts INTEGER NOT NULL,
    sender TEXT NOT NULL,
    amount_usdd_units INTEGER NOT NULL,
    receival_account TEXT,
    payout_sig TEXT,
    status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS refunded_txids (
    txid TEXT PRIMARY KEY,
    ts INTEGER NOT NULL,
    sender TEXT NOT NULL,
    refunded_amount_usdd_units INTEGER NOT NULL,
    refund_txid TEXT,
    reason TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS quarantined_txids (
    txid TEXT PRIMARY KEY,
    ts INTEGER NOT NULL,
    sender TEXT NOT NULL,
    amount_usdd_units INTEGER NOT NULL,
    reason TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS reservations (
    kind TEXT NOT NULL,
    key TEXT NOT NULL,
    ts INTEGER NOT NULL,
    PRIMARY KEY (kind, key)
);

CREATE TABLE IF NOT EXISTS attempts (
    action_key TEXT PRIMARY KEY,
    count INTEGER NOT NULL DEFAULT 0,
    last_ts INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS counters (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS waterline_proposals (
    chain TEXT PRIMARY KEY,
    ts INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS heartbeat (
    asset_name TEXT PRIMARY KEY,
    last_beat INTEGER NOT NULL,
    wline_sol INTEGER,
    wline_nxs INTEGER
);

CREATE TABLE IF NOT EXISTS fee_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sig TEXT,
    txid TEXT,
    kind TEXT NOT NULL,
    usdc_units INTEGER,
    usdd_units INTEGER,
    ts INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS fee_summary (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    usdc_units INTEGER NOT NULL DEFAULT 0,
    usdd_units INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS vault_balance_sample (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    balance_usdc_units INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS service_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    paused INTEGER NOT NULL DEFAULT 0
);
"#;
