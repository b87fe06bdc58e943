//! Sweep Worker
//!
//! Background hygiene: expires overdue pending transactions, retries
//! `pending_apply` grants, and polls rails for transactions whose client
//! stopped polling. Every step goes through the coordinator, so the worker
//! races client polls and webhooks safely.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::coordinator::{ReconciliationCoordinator, SettleOutcome};
use super::error::PurchaseError;
use crate::config::SweepConfig;
use crate::rails::CheckOutcome;

/// Concurrent rail polls per sweep
const POLL_CONCURRENCY: usize = 8;

/// Configuration for the sweep worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to sweep
    pub scan_interval: Duration,
    /// Maximum transactions per category per sweep
    pub batch_size: usize,
    pub poll_pending: bool,
    /// Pending transactions younger than this are left to the client's own polling
    pub poll_min_age: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            batch_size: 100,
            poll_pending: true,
            poll_min_age: Duration::from_secs(60),
        }
    }
}

impl From<&SweepConfig> for WorkerConfig {
    fn from(config: &SweepConfig) -> Self {
        Self {
            scan_interval: Duration::from_secs(config.scan_interval_secs.max(1)),
            batch_size: config.batch_size.max(1),
            poll_pending: config.poll_pending,
            poll_min_age: Duration::from_secs(config.poll_min_age_secs),
        }
    }
}

/// What one sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub grants_applied: usize,
    pub polled: usize,
    pub finalized: usize,
}

pub struct SweepWorker {
    coordinator: Arc<ReconciliationCoordinator>,
    config: WorkerConfig,
}

impl SweepWorker {
    pub fn new(coordinator: Arc<ReconciliationCoordinator>, config: WorkerConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// Run the sweep loop forever
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            batch_size = self.config.batch_size,
            poll_pending = self.config.poll_pending,
            "Starting sweep worker"
        );

        let mut interval = tokio::time::interval(self.config.scan_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match self.sweep_once().await {
                Ok(report) if report != SweepReport::default() => {
                    info!(
                        expired = report.expired,
                        grants_applied = report.grants_applied,
                        polled = report.polled,
                        finalized = report.finalized,
                        "Sweep completed"
                    );
                }
                Ok(_) => debug!("Sweep found nothing to do"),
                Err(e) => error!(error = %e, "Sweep failed"),
            }
        }
    }

    /// Run a single sweep
    pub async fn sweep_once(&self) -> Result<SweepReport, PurchaseError> {
        let mut report = SweepReport::default();
        let store = self.coordinator.store();

        let overdue = store
            .find_overdue_pending(Utc::now(), self.config.batch_size)
            .await?;
        for tx in overdue {
            match self
                .coordinator
                .settle(tx.transaction_id, CheckOutcome::Unconfirmed)
                .await
            {
                Ok(SettleOutcome::Finalized(_)) => report.expired += 1,
                Ok(_) => {}
                Err(e) => warn!(transaction_id = %tx.transaction_id, error = %e, "Expiry failed"),
            }
        }

        let grant_pending = store.find_grant_pending(self.config.batch_size).await?;
        for tx in grant_pending {
            match self.coordinator.retry_grant(tx.transaction_id).await {
                Ok(updated) if !updated.needs_grant() => report.grants_applied += 1,
                Ok(_) => {}
                Err(e) => warn!(transaction_id = %tx.transaction_id, error = %e, "Grant retry failed"),
            }
        }

        if self.config.poll_pending {
            let min_age = chrono::Duration::from_std(self.config.poll_min_age)
                .map_err(|e| PurchaseError::SystemError(format!("invalid poll_min_age: {}", e)))?;
            let pending = store
                .find_pending(Utc::now() - min_age, self.config.batch_size)
                .await?;
            report.polled = pending.len();

            let coordinator = &self.coordinator;
            let results: Vec<_> = stream::iter(pending)
                .map(|tx| async move {
                    let id = tx.transaction_id;
                    (id, coordinator.poll(id).await)
                })
                .buffer_unordered(POLL_CONCURRENCY)
                .collect()
                .await;

            for (id, result) in results {
                match result {
                    Ok(SettleOutcome::Finalized(_)) => report.finalized += 1,
                    Ok(_) => {}
                    Err(e) => warn!(transaction_id = %id, error = %e, "Sweep poll failed"),
                }
            }
        }

        Ok(report)
    }
}
