//! One-shot CLI: create or update the Chain-N heartbeat asset with the
//! transparency fields of §6 (`supported_chains`, `supported_tokens`,
//! vault/treasury addresses, mint). Out-of-core per §1; reads the same
//! `BridgeConfig` the main process uses so the asset name always matches
//! what `heartbeat::publish_heartbeat` writes to.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{error, info};

use bridge_core::chain_n::{ChainNAdapter, CliChainNAdapter};
use bridge_core::config::BridgeConfig;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "heartbeat_asset_creator=info".into()),
        )
        .init();

    let config = match BridgeConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[heartbeat-asset-creator] configuration error: {e}");
            std::process::exit(1);
        }
    };

    let chain_n = CliChainNAdapter::new(
        config.nexus_cli.clone(),
        config.nexus_pin.clone(),
        Duration::from_secs(config.adapter_call_timeout_sec),
    );

    if let Ok(Some(_)) = chain_n.get_asset(&config.nexus_heartbeat_asset_name).await {
        info!(asset = %config.nexus_heartbeat_asset_name, "heartbeat asset already exists, updating transparency fields");
    }

    let mut fields = HashMap::new();
    fields.insert("supported_chains".to_string(), "solana,nexus".to_string());
    fields.insert(
        "supported_tokens".to_string(),
        format!("{}/{}", config.usdc_mint, config.nexus_token_name),
    );
    fields.insert("vault_usdc_account".to_string(), config.vault_usdc_account.clone());
    fields.insert(
        "treasury_usdd_account".to_string(),
        config.nexus_usdd_treasury_account.clone(),
    );
    fields.insert("usdc_mint".to_string(), config.usdc_mint.clone());
    fields.insert("last_poll_timestamp".to_string(), "0".to_string());

    match chain_n.update_asset(&config.nexus_heartbeat_asset_name, &fields).await {
        Ok(true) => {
            info!(asset = %config.nexus_heartbeat_asset_name, "heartbeat asset created/updated");
        }
        Ok(false) => {
            error!(asset = %config.nexus_heartbeat_asset_name, "asset update not acknowledged");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "failed to create heartbeat asset");
            std::process::exit(1);
        }
    }
}
