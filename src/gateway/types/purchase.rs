//! Purchase request/response DTOs
//!
//! Amounts cross the API as decimal strings: wei values exceed what JSON
//! numbers carry exactly. Timestamps are epoch milliseconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::ledger::InventoryGrant;
use crate::purchase::{
    BalanceView, OwnerId, PurchaseError, PurchaseKind, PurchaseReceipt, PurchaseRequest, Rail,
    Transaction,
};
use crate::rails::RailInstructions;

/// Default page size for purchase history
pub const DEFAULT_HISTORY_LIMIT: usize = 20;
pub const MAX_HISTORY_LIMIT: usize = 100;

/// Quoted amount: JSON string (preferred) or integer
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(u64),
}

impl AmountInput {
    /// Parse a non-negative integer in the smallest currency unit
    pub fn parse(&self) -> Result<u128, PurchaseError> {
        match self {
            AmountInput::Number(n) => Ok(*n as u128),
            AmountInput::Text(s) => {
                let s = s.trim();
                if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(PurchaseError::InvalidRequest(format!(
                        "quoted_amount must be an unsigned integer string, got {:?}",
                        s
                    )));
                }
                s.parse::<u128>().map_err(|_| {
                    PurchaseError::InvalidRequest(format!("quoted_amount out of range: {}", s))
                })
            }
        }
    }
}

/// POST /api/v1/purchases body
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreatePurchaseRequest {
    /// `credit_purchase` or `item_purchase`
    #[schema(example = "credit_purchase")]
    pub kind: String,
    /// `qris`, `crypto` or `balance`
    #[schema(example = "qris")]
    pub rail: String,
    /// Credit package id or shop item ref
    #[schema(example = "credits_100")]
    pub product_id: String,
    /// Price the client displayed, in IDR / wei / credits
    #[schema(value_type = String, example = "15000")]
    pub quoted_amount: AmountInput,
    /// Crypto only, and required there: wallet expected to send the payment
    #[serde(default)]
    pub payer_address: Option<String>,
}

impl CreatePurchaseRequest {
    pub fn into_domain(self, owner: OwnerId) -> Result<PurchaseRequest, PurchaseError> {
        Ok(PurchaseRequest {
            owner,
            kind: self.kind.parse::<PurchaseKind>()?,
            rail: self.rail.parse::<Rail>()?,
            quoted_amount: self.quoted_amount.parse()?,
            product_id: self.product_id,
            payer_address: self.payer_address.filter(|a| !a.trim().is_empty()),
        })
    }
}

/// POST /api/v1/purchases/{id}/confirm body
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ConfirmRequest {
    /// Crypto only: hash of the payment transaction
    #[serde(default)]
    pub tx_hash: Option<String>,
}

/// POST /internal/purchases/confirm body
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct InternalConfirmRequest {
    pub transaction_id: String,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct StatusQuery {
    /// Transaction id (ULID)
    pub id: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct HistoryQuery {
    /// Page size (default 20, max 100)
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT)
    }
}

fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Transaction as shown to its owner
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PurchaseView {
    #[schema(example = "01JAZ3C5V8W6N1Q2R3S4T5V6W7")]
    pub transaction_id: String,
    #[schema(example = "credit_purchase")]
    pub kind: String,
    #[schema(example = "qris")]
    pub rail: String,
    #[schema(example = "15000")]
    pub amount: String,
    #[schema(example = "IDR")]
    pub currency: String,
    /// Credits granted on settlement (credit purchases)
    pub credit_delta: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_ref: Option<String>,
    /// `pending`, `settled`, `failed` or `expired`
    #[schema(example = "pending")]
    pub status: String,
    #[schema(example = "none")]
    pub grant_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<i64>,
}

impl From<&Transaction> for PurchaseView {
    fn from(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.transaction_id.to_string(),
            kind: tx.kind.as_str().to_string(),
            rail: tx.rail.as_str().to_string(),
            amount: tx.amount.to_string(),
            currency: tx.currency.as_str().to_string(),
            credit_delta: tx.credit_delta,
            item_ref: tx.item_ref.clone(),
            status: tx.status.as_str().to_string(),
            grant_state: tx.grant_state.as_str().to_string(),
            chain_tx_hash: tx.chain_tx_hash.clone(),
            failure_reason: tx.failure_reason.clone(),
            created_at: to_ms(tx.created_at),
            expires_at: to_ms(tx.expires_at),
            finalized_at: tx.finalized_at.map(to_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreatePurchaseResponse {
    #[serde(flatten)]
    pub transaction: PurchaseView,
    /// Tagged by `rail`: QR payload, wallet transfer, or balance debit
    #[schema(value_type = Object)]
    pub instructions: RailInstructions,
}

impl From<PurchaseReceipt> for CreatePurchaseResponse {
    fn from(receipt: PurchaseReceipt) -> Self {
        Self {
            transaction: PurchaseView::from(&receipt.transaction),
            instructions: receipt.instructions,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConfirmResponse {
    #[serde(flatten)]
    pub transaction: PurchaseView,
    /// Another caller finalized the transaction first; not an error
    pub already_finalized: bool,
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct BalanceResponse {
    pub balance: i64,
    /// Reserved by pending balance purchases
    pub held: i64,
    pub available: i64,
    /// Balance re-derived from ledger entries
    pub derived_balance: i64,
}

impl From<BalanceView> for BalanceResponse {
    fn from(view: BalanceView) -> Self {
        Self {
            balance: view.balance,
            held: view.held,
            available: view.available,
            derived_balance: view.derived_balance,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InventoryItemView {
    #[schema(example = "frame_sakura")]
    pub item_ref: String,
    pub acquired_via: String,
    pub acquired_at: i64,
}

impl From<&InventoryGrant> for InventoryItemView {
    fn from(grant: &InventoryGrant) -> Self {
        Self {
            item_ref: grant.item_ref.clone(),
            acquired_via: grant.acquired_via.to_string(),
            acquired_at: to_ms(grant.acquired_at),
        }
    }
}
