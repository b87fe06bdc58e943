//! Grant Service
//!
//! Applies the real-world effect of a settled purchase. Never re-evaluates
//! settlement: it only runs on transactions already observed `settled`, and
//! the store makes application idempotent on the transaction id.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::error::PurchaseError;
use super::state::TransactionStatus;
use super::types::{PurchaseKind, Rail, Transaction};
use crate::ledger::{GrantApplied, GrantPlan, LedgerStore};

#[derive(Clone)]
pub struct GrantService {
    store: Arc<dyn LedgerStore>,
}

impl GrantService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Compute what a settled transaction grants
    pub fn plan(tx: &Transaction) -> Result<GrantPlan, PurchaseError> {
        if tx.status != TransactionStatus::Settled {
            return Err(PurchaseError::InvalidStateTransition(format!(
                "cannot grant {} transaction {}",
                tx.status, tx.transaction_id
            )));
        }

        let (ledger_delta, item_ref, held_credits) = match (tx.kind, tx.rail) {
            (PurchaseKind::CreditPurchase, _) => (tx.credit_delta, None, 0),
            (PurchaseKind::ItemPurchase, rail) => {
                let item_ref = tx.item_ref.clone().ok_or_else(|| {
                    PurchaseError::SystemError(format!(
                        "item purchase {} has no item_ref",
                        tx.transaction_id
                    ))
                })?;
                if rail == Rail::Balance {
                    let price =
                        i64::try_from(tx.amount).map_err(|_| PurchaseError::InvalidAmount)?;
                    (-price, Some(item_ref), price)
                } else {
                    (0, Some(item_ref), 0)
                }
            }
        };

        Ok(GrantPlan {
            transaction_id: tx.transaction_id,
            owner: tx.owner.clone(),
            ledger_delta,
            item_ref,
            held_credits,
        })
    }

    /// Apply the grant; safe to call any number of times
    pub async fn apply(&self, tx: &Transaction) -> Result<GrantApplied, PurchaseError> {
        let plan = Self::plan(tx)?;

        match self.store.apply_grant(&plan, Utc::now()).await {
            Ok(GrantApplied::Applied {
                item_granted,
                ledger_delta,
            }) => {
                if plan.item_ref.is_some() && !item_granted {
                    warn!(
                        transaction_id = %tx.transaction_id,
                        owner = %tx.owner,
                        item_ref = ?plan.item_ref,
                        "Item already owned; nothing granted"
                    );
                }
                info!(
                    transaction_id = %tx.transaction_id,
                    owner = %tx.owner,
                    ledger_delta,
                    item_granted,
                    "Grant applied"
                );
                Ok(GrantApplied::Applied {
                    item_granted,
                    ledger_delta,
                })
            }
            Ok(GrantApplied::AlreadyApplied) => Ok(GrantApplied::AlreadyApplied),
            Err(e) => {
                error!(
                    transaction_id = %tx.transaction_id,
                    error = %e,
                    "Grant apply failed; transaction stays settled with grant pending"
                );
                Err(PurchaseError::GrantApplyFailure(e.to_string()))
            }
        }
    }
}
