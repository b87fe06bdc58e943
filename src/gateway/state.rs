use std::sync::Arc;

use crate::ledger::LedgerStore;
use crate::purchase::{PurchaseService, ReconciliationCoordinator};

/// Gateway application state (shared)
#[derive(Clone)]
pub struct AppState {
    /// Creation path and owner queries
    pub purchases: Arc<PurchaseService>,
    /// Confirmation path (client poll + webhook glue)
    pub coordinator: Arc<ReconciliationCoordinator>,
    /// Health checks
    pub store: Arc<dyn LedgerStore>,
    /// Expected `X-Internal-Secret`
    internal_secret: Arc<str>,
}

impl AppState {
    pub fn new(purchases: Arc<PurchaseService>, internal_secret: &str) -> Self {
        let coordinator = purchases.coordinator().clone();
        let store = coordinator.store().clone();
        Self {
            purchases,
            coordinator,
            store,
            internal_secret: Arc::from(internal_secret),
        }
    }

    /// Constant-time comparison against the configured secret
    pub fn internal_secret_matches(&self, candidate: &str) -> bool {
        let expected = self.internal_secret.as_bytes();
        let candidate = candidate.as_bytes();
        if expected.len() != candidate.len() {
            return false;
        }
        expected
            .iter()
            .zip(candidate)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}
