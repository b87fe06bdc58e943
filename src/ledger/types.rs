//! Ledger records

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::purchase::types::{OwnerId, TransactionId};

/// Append-only balance mutation, one per settled transaction at most
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub transaction_id: TransactionId,
    pub owner: OwnerId,
    /// Positive for credit purchases, negative for balance-paid items
    pub delta: i64,
    pub created_at: DateTime<Utc>,
}

/// Owner possesses `item_ref`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryGrant {
    pub owner: OwnerId,
    pub item_ref: String,
    pub acquired_via: TransactionId,
    pub acquired_at: DateTime<Utc>,
}

/// Cached credit counters for one owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AccountBalance {
    pub balance: i64,
    /// Reserved by pending balance-paid purchases
    pub held: i64,
}

impl AccountBalance {
    #[inline]
    pub fn available(&self) -> i64 {
        self.balance - self.held
    }
}

/// Effect of one settled transaction, computed by the grant service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantPlan {
    pub transaction_id: TransactionId,
    pub owner: OwnerId,
    /// Ledger entry to append; `0` appends nothing
    pub ledger_delta: i64,
    pub item_ref: Option<String>,
    /// Hold consumed (or released if the item is already owned)
    pub held_credits: i64,
}

/// Result of `LedgerStore::apply_grant`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantApplied {
    Applied {
        item_granted: bool,
        ledger_delta: i64,
    },
    /// Grant state was already `applied`; nothing written
    AlreadyApplied,
}
