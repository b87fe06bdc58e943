//! Ledger Store abstraction
//!
//! Every mutation a purchase can cause goes through this trait, and every
//! method that touches more than one record does so atomically. The store,
//! not process memory, decides settlement races.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::types::{AccountBalance, GrantApplied, GrantPlan, InventoryGrant, LedgerEntry};
use crate::purchase::error::PurchaseError;
use crate::purchase::state::TransactionStatus;
use crate::purchase::types::{OwnerId, Rail, Transaction, TransactionId};

/// Target of a conditional `pending -> terminal` update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub to: TransactionStatus,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
    /// Also require `expires_at > at` inside the same update
    pub require_unexpired: bool,
}

impl Transition {
    pub fn settle(at: DateTime<Utc>) -> Self {
        Self {
            to: TransactionStatus::Settled,
            reason: None,
            at,
            require_unexpired: true,
        }
    }

    pub fn fail(reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            to: TransactionStatus::Failed,
            reason: Some(reason.into()),
            at,
            require_unexpired: false,
        }
    }

    pub fn expire(at: DateTime<Utc>) -> Self {
        Self {
            to: TransactionStatus::Expired,
            reason: Some("confirmation not received before expiry".to_string()),
            at,
            require_unexpired: false,
        }
    }
}

/// Credits reserved by a transaction while it is pending (balance rail only)
pub fn hold_of(tx: &Transaction) -> Result<i64, PurchaseError> {
    match tx.rail {
        Rail::Balance => i64::try_from(tx.amount).map_err(|_| PurchaseError::InvalidAmount),
        Rail::Qris | Rail::Crypto => Ok(0),
    }
}

/// Durable, transactional store for transactions, balances and inventory
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Persist a new `pending` transaction.
    ///
    /// Balance-rail transactions reserve `amount` credits in the same atomic
    /// step; if `available < amount` nothing is written and
    /// `InsufficientCredits` is returned. An item purchase is refused with
    /// `ItemPurchaseInProgress` while another purchase of the same item by
    /// the same owner is in flight.
    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), PurchaseError>;

    async fn get_transaction(&self, id: TransactionId)
    -> Result<Option<Transaction>, PurchaseError>;

    /// Newest first
    async fn list_transactions(
        &self,
        owner: &OwnerId,
        limit: usize,
    ) -> Result<Vec<Transaction>, PurchaseError>;

    /// Record the provider correlator; only while `pending`
    async fn attach_rail_reference(
        &self,
        id: TransactionId,
        reference: &str,
    ) -> Result<bool, PurchaseError>;

    /// Record the on-chain tx hash; only while `pending`.
    ///
    /// Returns `true` when `hash` is the attached hash afterwards, `false` when
    /// the transaction is no longer pending or carries a different hash.
    /// `TxHashInUse` if another pending or settled transaction claimed `hash`;
    /// failed and expired transactions give their hash up.
    async fn attach_chain_tx_hash(
        &self,
        id: TransactionId,
        hash: &str,
    ) -> Result<bool, PurchaseError>;

    /// Pending or settled transaction currently holding `hash`
    async fn chain_tx_hash_holder(&self, hash: &str)
    -> Result<Option<TransactionId>, PurchaseError>;

    /// Atomic CAS `pending -> transition.to`.
    ///
    /// Returns `true` if this caller won. Settling sets `grant_state =
    /// pending_apply` in the same step; failing or expiring a balance-rail
    /// transaction releases its hold in the same step, and failing or
    /// expiring a crypto transaction releases its tx hash.
    async fn transition_if_pending(
        &self,
        id: TransactionId,
        transition: Transition,
    ) -> Result<bool, PurchaseError>;

    /// Apply the grant of a settled transaction exactly once.
    async fn apply_grant(
        &self,
        plan: &GrantPlan,
        at: DateTime<Utc>,
    ) -> Result<GrantApplied, PurchaseError>;

    async fn account(&self, owner: &OwnerId) -> Result<AccountBalance, PurchaseError>;

    /// Balance re-derived from ledger entries (audit)
    async fn recompute_balance(&self, owner: &OwnerId) -> Result<i64, PurchaseError>;

    async fn ledger_entries(&self, owner: &OwnerId) -> Result<Vec<LedgerEntry>, PurchaseError>;

    async fn inventory(&self, owner: &OwnerId) -> Result<Vec<InventoryGrant>, PurchaseError>;

    async fn owns_item(&self, owner: &OwnerId, item_ref: &str) -> Result<bool, PurchaseError>;

    /// Pending transactions with `expires_at <= now`
    async fn find_overdue_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transaction>, PurchaseError>;

    /// Pending transactions created before `created_before`, oldest first
    async fn find_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transaction>, PurchaseError>;

    /// Settled transactions whose grant is still `pending_apply`
    async fn find_grant_pending(&self, limit: usize) -> Result<Vec<Transaction>, PurchaseError>;

    async fn ping(&self) -> Result<(), PurchaseError>;
}
