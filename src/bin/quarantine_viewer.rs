//! Read-only CLI: lists quarantined deposits and credits from the store.
//! Never writes — the only supported remediation path is an operator acting
//! on-chain directly and letting startup recovery reconcile the result.

use bridge_core::config::BridgeConfig;
use bridge_core::store::Store;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quarantine_viewer=info".into()),
        )
        .init();

    let limit: i64 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(100);

    let config = match BridgeConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[quarantine-viewer] configuration error: {e}");
            std::process::exit(1);
        }
    };

    let store = match Store::connect(&config.database_url).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[quarantine-viewer] store connection failed: {e}");
            std::process::exit(1);
        }
    };

    let deposits = store
        .list_quarantined_deposits(limit)
        .await
        .unwrap_or_else(|e| {
            eprintln!("[quarantine-viewer] failed to list quarantined deposits: {e}");
            std::process::exit(1);
        });

    println!("== quarantined Chain-S deposits ({}) ==", deposits.len());
    for row in &deposits {
        println!(
            "sig={} ts={} sender={} amount_usdc_units={} memo={:?} quarantine_sig={:?} reason={}",
            row.sig, row.ts, row.sender, row.amount_usdc_units, row.memo, row.quarantine_sig, row.reason
        );
    }

    let credits = store
        .list_quarantined_credits(limit)
        .await
        .unwrap_or_else(|e| {
            eprintln!("[quarantine-viewer] failed to list quarantined credits: {e}");
            std::process::exit(1);
        });

    println!("== quarantined Chain-N credits ({}) ==", credits.len());
    for row in &credits {
        println!(
            "txid={} ts={} sender={} amount_usdd_units={} reason={}",
            row.txid, row.ts, row.sender, row.amount_usdd_units, row.reason
        );
    }
}
