//! Credit Ledger
//!
//! ```text
//! ┌──────────┐    ┌──────────────┐    ┌───────────────┐    ┌──────────┐
//! │ Gateway  │───▶│ Purchase Svc │───▶│  Coordinator  │───▶│  Ledger  │
//! │ (axum)   │    │  (create)    │    │ (settle/CAS)  │    │  Store   │
//! └──────────┘    └──────────────┘    └───────┬───────┘    └──────────┘
//!                                             │
//!                      ┌──────────────┐       ▼
//!                      │ Sweep Worker │─▶ QRIS / Base-chain rails
//!                      └──────────────┘
//! ```

use std::sync::Arc;

use anyhow::Context;

use credit_ledger::catalog::StaticCatalog;
use credit_ledger::config::AppConfig;
use credit_ledger::db::{Database, init_schema};
use credit_ledger::gateway::{self, state::AppState};
use credit_ledger::ledger::{LedgerStore, MemoryLedgerStore, PgLedgerStore};
use credit_ledger::purchase::{
    PurchaseService, ReconciliationCoordinator, SweepWorker, WorkerConfig,
};
use credit_ledger::rails::{BaseChainAdapter, QrisAdapter, RailAdapters};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn LedgerStore>> {
    match &config.postgres_url {
        Some(url) => {
            let db = Database::connect(url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            init_schema(db.pool())
                .await
                .context("Failed to initialize schema")?;
            Ok(Arc::new(PgLedgerStore::new(db.pool().clone())))
        }
        None => {
            tracing::warn!("No postgres_url configured: using in-memory ledger (single process, not durable)");
            Ok(Arc::new(MemoryLedgerStore::new()))
        }
    }
}

fn build_rails(config: &AppConfig) -> anyhow::Result<RailAdapters> {
    let mut rails = RailAdapters::new();
    if let Some(qris) = &config.qris {
        let adapter = QrisAdapter::new(qris).context("Failed to build QRIS adapter")?;
        rails = rails.with_qris(Arc::new(adapter));
    }
    if let Some(crypto) = &config.crypto {
        let adapter = BaseChainAdapter::new(crypto).context("Failed to build Base-chain adapter")?;
        rails = rails.with_crypto(Arc::new(adapter));
    }
    Ok(rails)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut app_config = AppConfig::load(&env)?;
    if let Some(port) = get_port_override() {
        app_config.gateway.port = port;
    }
    let _log_guard = credit_ledger::logging::init_logging(&app_config);

    tracing::info!(env = %env, version = env!("GIT_HASH"), "Starting credit ledger");

    let store = open_store(&app_config).await?;
    let catalog = Arc::new(StaticCatalog::from_config(&app_config.catalog)?);
    let rails = build_rails(&app_config)?;
    tracing::info!(
        store = store.name(),
        rails = ?rails.enabled(),
        "Ledger store and rails ready"
    );

    let coordinator = Arc::new(ReconciliationCoordinator::new(
        store.clone(),
        rails,
        app_config.purchase.check_timeout(),
    ));
    let service = Arc::new(PurchaseService::new(
        store,
        catalog,
        coordinator.clone(),
        app_config.purchase.ttl(),
        app_config.purchase.check_timeout(),
    ));

    if app_config.sweep.enabled {
        let worker = SweepWorker::new(coordinator, WorkerConfig::from(&app_config.sweep));
        tokio::spawn(async move {
            worker.run().await;
        });
    } else {
        tracing::warn!("Sweep worker disabled: overdue transactions expire only on read");
    }

    let state = Arc::new(AppState::new(service, &app_config.internal_secret));
    gateway::run_server(&app_config.gateway, state).await
}
