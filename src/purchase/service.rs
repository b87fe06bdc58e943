//! Purchase Service
//!
//! Creation path of the transaction state machine plus the owner-facing
//! queries. Everything after creation goes through the coordinator.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::coordinator::ReconciliationCoordinator;
use super::error::PurchaseError;
use super::types::{OwnerId, PurchaseDraft, PurchaseKind, PurchaseRequest, Rail, Transaction};
use crate::catalog::Catalog;
use crate::ledger::{InventoryGrant, LedgerStore};
use crate::rails::crypto::normalize_address;
use crate::rails::{CheckOutcome, RailInstructions};

/// Persisted transaction plus what the client needs to pay
#[derive(Debug, Clone)]
pub struct PurchaseReceipt {
    pub transaction: Transaction,
    pub instructions: RailInstructions,
}

/// Credit balance as seen by the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceView {
    pub balance: i64,
    pub held: i64,
    pub available: i64,
    /// Sum of ledger entries; equals `balance` unless the cache drifted
    pub derived_balance: i64,
}

pub struct PurchaseService {
    store: Arc<dyn LedgerStore>,
    catalog: Arc<dyn Catalog>,
    coordinator: Arc<ReconciliationCoordinator>,
    ttl: Duration,
    provider_timeout: Duration,
}

struct Priced {
    amount: u128,
    credit_delta: i64,
    item_ref: Option<String>,
}

impl PurchaseService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        catalog: Arc<dyn Catalog>,
        coordinator: Arc<ReconciliationCoordinator>,
        ttl: Duration,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            coordinator,
            ttl,
            provider_timeout,
        }
    }

    pub fn coordinator(&self) -> &Arc<ReconciliationCoordinator> {
        &self.coordinator
    }

    async fn price(&self, req: &PurchaseRequest) -> Result<Priced, PurchaseError> {
        match req.kind {
            PurchaseKind::CreditPurchase => {
                if req.rail == Rail::Balance {
                    return Err(PurchaseError::UnsupportedRail(
                        "credit packages cannot be paid with credits".into(),
                    ));
                }
                let package = self
                    .catalog
                    .credit_package(&req.product_id)
                    .await
                    .ok_or_else(|| PurchaseError::UnknownPackage(req.product_id.clone()))?;
                let amount = package.price_for(req.rail).ok_or_else(|| {
                    PurchaseError::UnsupportedRail(format!(
                        "{} is not sold via {}",
                        package.package_id, req.rail
                    ))
                })?;
                Ok(Priced {
                    amount,
                    credit_delta: package.credits,
                    item_ref: None,
                })
            }
            PurchaseKind::ItemPurchase => {
                let item = self
                    .catalog
                    .item(&req.product_id)
                    .await
                    .ok_or_else(|| PurchaseError::UnknownItem(req.product_id.clone()))?;
                let amount = item.price_for(req.rail).ok_or_else(|| {
                    PurchaseError::UnsupportedRail(format!(
                        "{} is not sold via {}",
                        item.item_ref, req.rail
                    ))
                })?;
                Ok(Priced {
                    amount,
                    credit_delta: 0,
                    item_ref: Some(item.item_ref),
                })
            }
        }
    }

    /// Validate, persist `pending`, then obtain rail instructions.
    ///
    /// Validation failures persist nothing. If the rail cannot issue
    /// instructions the transaction is finalized `failed`.
    pub async fn initiate_purchase(
        &self,
        req: PurchaseRequest,
    ) -> Result<PurchaseReceipt, PurchaseError> {
        if req.quoted_amount == 0 {
            return Err(PurchaseError::InvalidAmount);
        }

        let payer_address = match req.payer_address.as_deref() {
            // The sender is what ties an on-chain transfer to this purchase
            None if req.rail == Rail::Crypto => {
                return Err(PurchaseError::InvalidRequest(
                    "payer_address is required for crypto purchases".into(),
                ));
            }
            None => None,
            Some(_) if req.rail != Rail::Crypto => {
                return Err(PurchaseError::InvalidRequest(
                    "payer_address only applies to crypto purchases".into(),
                ));
            }
            Some(raw) => Some(normalize_address(raw).ok_or_else(|| {
                PurchaseError::InvalidRequest(format!("invalid payer_address: {}", raw))
            })?),
        };

        let priced = self.price(&req).await?;

        if let Some(item_ref) = &priced.item_ref
            && self.store.owns_item(&req.owner, item_ref).await?
        {
            return Err(PurchaseError::ItemAlreadyOwned(item_ref.clone()));
        }

        if priced.amount != req.quoted_amount {
            return Err(PurchaseError::PriceMismatch {
                expected: priced.amount,
                quoted: req.quoted_amount,
            });
        }

        let adapter = if req.rail.is_external() {
            Some(self.coordinator.rails().get(req.rail)?)
        } else {
            let required = i64::try_from(priced.amount).map_err(|_| PurchaseError::InvalidAmount)?;
            let account = self.store.account(&req.owner).await?;
            if account.available() < required {
                return Err(PurchaseError::InsufficientCredits {
                    available: account.available(),
                    required,
                });
            }
            None
        };

        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| PurchaseError::SystemError(format!("invalid ttl: {}", e)))?;
        let tx = Transaction::new_pending(
            PurchaseDraft {
                owner: req.owner,
                kind: req.kind,
                rail: req.rail,
                amount: priced.amount,
                credit_delta: priced.credit_delta,
                item_ref: priced.item_ref,
                payer_address,
            },
            Utc::now(),
            ttl,
        );
        // Balance rail: reserves the credits atomically, may still fail here
        self.store.insert_transaction(&tx).await?;

        let id = tx.transaction_id;
        info!(
            transaction_id = %id,
            owner = %tx.owner,
            kind = %tx.kind,
            rail = %tx.rail,
            amount = %tx.amount,
            "Purchase created"
        );

        let Some(adapter) = adapter else {
            let debited = i64::try_from(tx.amount).map_err(|_| PurchaseError::InvalidAmount)?;
            let outcome = self
                .coordinator
                .settle(
                    id,
                    CheckOutcome::Confirmed {
                        settled_amount: tx.amount,
                    },
                )
                .await?;
            return Ok(PurchaseReceipt {
                transaction: outcome.into_transaction(),
                instructions: RailInstructions::Balance {
                    debited_credits: debited,
                },
            });
        };

        let initiated = tokio::time::timeout(self.provider_timeout, adapter.initiate(&tx)).await;
        let failure = match initiated {
            Ok(Ok(initiation)) => {
                self.store
                    .attach_rail_reference(id, &initiation.rail_reference)
                    .await?;
                let mut transaction = tx;
                transaction.rail_reference = Some(initiation.rail_reference);
                return Ok(PurchaseReceipt {
                    transaction,
                    instructions: initiation.instructions,
                });
            }
            Ok(Err(e)) => e.into_purchase_error(),
            Err(_) => PurchaseError::ProviderTimeout("initiate timed out".into()),
        };

        warn!(transaction_id = %id, rail = %tx.rail, error = %failure, "Rail initiate failed");
        // Unlike a timed-out check, no payment instructions exist yet, so nothing can settle later
        if let Err(e) = self
            .coordinator
            .settle(id, CheckOutcome::Rejected(failure.to_string()))
            .await
        {
            warn!(transaction_id = %id, error = %e, "Could not finalize failed purchase");
        }
        Err(failure)
    }

    /// Owner's transactions, newest first
    pub async fn history(
        &self,
        owner: &OwnerId,
        limit: usize,
    ) -> Result<Vec<Transaction>, PurchaseError> {
        self.store.list_transactions(owner, limit).await
    }

    pub async fn balance(&self, owner: &OwnerId) -> Result<BalanceView, PurchaseError> {
        let account = self.store.account(owner).await?;
        let derived_balance = self.store.recompute_balance(owner).await?;
        if derived_balance != account.balance {
            warn!(
                owner = %owner,
                cached = account.balance,
                derived = derived_balance,
                "Cached balance differs from ledger"
            );
        }
        Ok(BalanceView {
            balance: account.balance,
            held: account.held,
            available: account.available(),
            derived_balance,
        })
    }

    pub async fn inventory(&self, owner: &OwnerId) -> Result<Vec<InventoryGrant>, PurchaseError> {
        self.store.inventory(owner).await
    }
}
