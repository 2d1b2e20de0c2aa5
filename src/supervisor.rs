//! Cooperative poll loop sequencing ingestion, processing, and maintenance
//! under per-phase watchdog budgets (§5).
//!
//! Each phase is spawned as its own task and bounded with
//! `tokio::time::timeout` on the join handle rather than cancelling the task
//! directly, so an overrun phase's eventual store writes still land instead
//! of being torn down mid-flight (§5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::chain_n::ChainNAdapter;
use crate::chain_s::ChainSAdapter;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::fees::FeeConversionPolicy;
use crate::store::Store;
use crate::{heartbeat, ingestion_n, ingestion_s, processor_n, processor_s, reconciler};

pub struct Supervisor {
    store: Store,
    chain_s: Arc<dyn ChainSAdapter>,
    chain_n: Arc<dyn ChainNAdapter>,
    fee_policy: Arc<dyn FeeConversionPolicy>,
    config: Arc<BridgeConfig>,
}

impl Supervisor {
    pub fn new(
        store: Store,
        chain_s: Arc<dyn ChainSAdapter>,
        chain_n: Arc<dyn ChainNAdapter>,
        fee_policy: Arc<dyn FeeConversionPolicy>,
        config: Arc<BridgeConfig>,
    ) -> Self {
        Self {
            store,
            chain_s,
            chain_n,
            fee_policy,
            config,
        }
    }

    /// Runs cycles until `stop` is set, checking it at every phase boundary.
    /// The tick cadence is the faster of the two poll intervals; each phase
    /// inside a cycle still runs under its own wall-clock budget.
    pub async fn run(&self, stop: Arc<AtomicBool>) {
        let cadence = self
            .config
            .solana_poll_interval_sec
            .min(self.config.nexus_poll_interval_sec)
            .max(1);
        let mut ticker = tokio::time::interval(Duration::from_secs(cadence));
        let mut last_backing_reconcile = tokio::time::Instant::now()
            - Duration::from_secs(self.config.backing_reconcile_interval_sec.max(1));

        info!("supervisor loop starting");
        loop {
            ticker.tick().await;
            if stop.load(Ordering::SeqCst) {
                break;
            }

            let due_for_backing_reconcile = last_backing_reconcile.elapsed()
                >= Duration::from_secs(self.config.backing_reconcile_interval_sec.max(60));
            if due_for_backing_reconcile {
                last_backing_reconcile = tokio::time::Instant::now();
            }

            self.run_cycle(&stop, due_for_backing_reconcile).await;
        }
        info!("supervisor loop stopped");
    }

    async fn run_cycle(&self, stop: &Arc<AtomicBool>, run_backing_reconcile: bool) {
        self.maintenance_phase(run_backing_reconcile).await;
        if stop.load(Ordering::SeqCst) {
            return;
        }

        self.solana_phase().await;
        if stop.load(Ordering::SeqCst) {
            return;
        }

        self.nexus_phase().await;
    }

    async fn maintenance_phase(&self, run_backing_reconcile: bool) {
        if run_backing_reconcile {
            let store = self.store.clone();
            let chain_s = self.chain_s.clone();
            let chain_n = self.chain_n.clone();
            let fee_policy = self.fee_policy.clone();
            let config = self.config.clone();
            self.run_with_watchdog("backing_reconcile", self.config.adapter_call_timeout_sec * 2, async move {
                let outcome = reconciler::reconcile(&store, chain_s.as_ref(), chain_n.as_ref(), fee_policy.as_ref(), &config).await?;
                info!(?outcome, "backing reconciliation cycle complete");
                Ok(())
            })
            .await;
        }

        let store = self.store.clone();
        let chain_n = self.chain_n.clone();
        let config = self.config.clone();
        self.run_with_watchdog("heartbeat", self.config.adapter_call_timeout_sec, async move {
            let now = crate::store::now_epoch();
            heartbeat::publish_heartbeat(&store, chain_n.as_ref(), &config, now).await?;
            Ok(())
        })
        .await;
    }

    async fn solana_phase(&self) {
        let store = self.store.clone();
        let chain_s = self.chain_s.clone();
        let chain_n = self.chain_n.clone();
        let config = self.config.clone();
        self.run_with_watchdog("solana", self.config.solana_poll_time_budget_sec, async move {
            // Ingestion and classification always advance — only the
            // outbound-value-emitting passes are gated on the backing pause
            // (§4.8: waterlines still move while paused).
            ingestion_s::poll_deposits(&store, chain_s.as_ref(), &config).await?;
            processor_s::classify_new_deposits(&store, chain_n.as_ref(), &config).await?;
            processor_s::confirm_debited(&store, chain_n.as_ref(), &config).await?;
            processor_s::confirm_refunds(&store, chain_s.as_ref(), &config).await?;
            processor_s::confirm_quarantines(&store, chain_s.as_ref(), &config).await?;

            if store.is_paused().await? {
                warn!("backing pause active, suppressing outbound S→D debits/refunds/quarantine this cycle");
                return Ok(());
            }

            processor_s::process_ready_deposits(&store, chain_n.as_ref(), &config).await?;
            processor_s::process_refunds(&store, chain_s.as_ref(), &config).await?;
            let now = crate::store::now_epoch();
            processor_s::process_quarantine(&store, chain_s.as_ref(), &config, now).await?;
            Ok(())
        })
        .await;
    }

    async fn nexus_phase(&self) {
        {
            let store = self.store.clone();
            let chain_n = self.chain_n.clone();
            let config = self.config.clone();
            self.run_with_watchdog("nexus_poll", self.config.nexus_poll_time_budget_sec, async move {
                ingestion_n::poll_credits(&store, chain_n.as_ref(), &config).await?;
                Ok(())
            })
            .await;
        }

        let store = self.store.clone();
        let chain_s = self.chain_s.clone();
        let chain_n = self.chain_n.clone();
        let config = self.config.clone();
        self.run_with_watchdog("nexus_process", self.config.nexus_process_budget_sec, async move {
            processor_n::classify_new_credits(&store, chain_n.as_ref(), chain_s.as_ref(), &config).await?;
            processor_n::confirm_sends(&store, chain_s.as_ref(), &config).await?;
            processor_n::confirm_refund_credits(&store, chain_n.as_ref(), &config).await?;

            if store.is_paused().await? {
                warn!("backing pause active, suppressing outbound D→S sends/refunds/quarantine this cycle");
                return Ok(());
            }

            processor_n::process_ready_credits(&store, chain_n.as_ref(), chain_s.as_ref(), &config).await?;
            processor_n::process_refund_credits(&store, chain_n.as_ref(), &config).await?;
            let now = crate::store::now_epoch();
            processor_n::process_quarantine_credits(&store, &config, now).await?;
            Ok(())
        })
        .await;
    }

    /// Spawns `fut` as its own task and bounds how long this cycle waits on it.
    /// A timed-out phase is abandoned for this cycle, not cancelled — it keeps
    /// running in the background and its store writes are still idempotent.
    async fn run_with_watchdog<Fut>(&self, label: &'static str, budget_sec: u64, fut: Fut)
    where
        Fut: std::future::Future<Output = Result<(), BridgeError>> + Send + 'static,
    {
        let handle = tokio::task::spawn(fut);
        match tokio::time::timeout(Duration::from_secs(budget_sec.max(1)), handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(phase = label, error = %e, "phase returned an error"),
            Ok(Err(join_err)) => warn!(phase = label, error = %join_err, "phase task panicked"),
            Err(_) => warn!(phase = label, budget_sec, "exceeded budget; skipping remainder this cycle"),
        }
    }
}
