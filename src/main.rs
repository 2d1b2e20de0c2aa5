use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use bridge_core::chain_n::{ChainNAdapter, CliChainNAdapter};
use bridge_core::chain_s::{ChainSAdapter, JsonRpcChainSAdapter};
use bridge_core::config::BridgeConfig;
use bridge_core::fees::NoopFeeConversionPolicy;
use bridge_core::startup_recovery;
use bridge_core::store::Store;
use bridge_core::supervisor::Supervisor;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bridge_core=info".into()),
        )
        .init();

    let config = match BridgeConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[bridge-core] configuration error: {e}");
            std::process::exit(1);
        }
    };
    let config = Arc::new(config);

    info!(
        solana_poll_interval = config.solana_poll_interval_sec,
        nexus_poll_interval = config.nexus_poll_interval_sec,
        database = %config.database_url,
        "starting bridge-core"
    );

    let store = match Store::connect(&config.database_url).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[bridge-core] store connection failed: {e}");
            std::process::exit(1);
        }
    };

    let call_timeout = Duration::from_secs(config.adapter_call_timeout_sec);
    let chain_s: Arc<dyn ChainSAdapter> = Arc::new(JsonRpcChainSAdapter::new(
        config.solana_rpc_url.clone(),
        config.vault_keypair_path.clone(),
        call_timeout,
    ));
    let chain_n: Arc<dyn ChainNAdapter> = Arc::new(CliChainNAdapter::new(
        config.nexus_cli.clone(),
        config.nexus_pin.clone(),
        call_timeout,
    ));
    let fee_policy = Arc::new(NoopFeeConversionPolicy);

    match startup_recovery::perform_startup_recovery(&store, chain_s.as_ref(), &config).await {
        Ok(summary) => info!(?summary, "startup recovery complete"),
        Err(e) => {
            error!(error = %e, "startup recovery failed");
            std::process::exit(1);
        }
    }

    let stop = Arc::new(AtomicBool::new(false));
    let supervisor = Arc::new(Supervisor::new(store, chain_s, chain_n, fee_policy, config));

    let loop_handle = {
        let supervisor = supervisor.clone();
        let stop = stop.clone();
        tokio::spawn(async move { supervisor.run(stop).await })
    };

    shutdown_signal().await;
    info!("stop signal received, finishing in-flight cycle");
    stop.store(true, Ordering::SeqCst);

    if tokio::time::timeout(Duration::from_secs(30), loop_handle)
        .await
        .is_err()
    {
        warn!("supervisor did not stop within shutdown grace period, exiting anyway");
    }

    info!("bridge-core shut down");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
