//! Purchase Core Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::PurchaseError;
use super::state::{GrantState, TransactionStatus};

/// Transaction ID - ULID based
///
/// 80 random bits per id, so ids cannot be guessed by other callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(ulid::Ulid);

impl TransactionId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

impl Serialize for TransactionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TransactionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Opaque account identifier supplied by the session layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the purchase buys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum PurchaseKind {
    /// Credits added to the owner's balance
    CreditPurchase = 1,
    /// A shop item (decoration / badge) added to the owner's inventory
    ItemPurchase = 2,
}

impl PurchaseKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(PurchaseKind::CreditPurchase),
            2 => Some(PurchaseKind::ItemPurchase),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseKind::CreditPurchase => "credit_purchase",
            PurchaseKind::ItemPurchase => "item_purchase",
        }
    }
}

impl fmt::Display for PurchaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PurchaseKind {
    type Err = PurchaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "credit_purchase" | "credits" => Ok(PurchaseKind::CreditPurchase),
            "item_purchase" | "item" => Ok(PurchaseKind::ItemPurchase),
            _ => Err(PurchaseError::InvalidRequest(format!(
                "Invalid purchase kind: {}. Use 'credit_purchase' or 'item_purchase'",
                s
            ))),
        }
    }
}

/// Payment rail
///
/// `Qris` and `Crypto` are external, provider-confirmed rails. `Balance` pays an
/// item purchase from credits the owner already holds and settles without a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum Rail {
    Qris = 1,
    Crypto = 2,
    Balance = 3,
}

impl Rail {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Rail::Qris),
            2 => Some(Rail::Crypto),
            3 => Some(Rail::Balance),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rail::Qris => "qris",
            Rail::Crypto => "crypto",
            Rail::Balance => "balance",
        }
    }

    pub fn currency(&self) -> Currency {
        match self {
            Rail::Qris => Currency::Idr,
            Rail::Crypto => Currency::Wei,
            Rail::Balance => Currency::Credit,
        }
    }

    #[inline]
    pub fn is_external(&self) -> bool {
        !matches!(self, Rail::Balance)
    }
}

impl fmt::Display for Rail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Rail {
    type Err = PurchaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qris" => Ok(Rail::Qris),
            "crypto" | "base" => Ok(Rail::Crypto),
            "balance" | "credits" => Ok(Rail::Balance),
            _ => Err(PurchaseError::UnsupportedRail(s.to_string())),
        }
    }
}

/// Unit of `Transaction::amount`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Currency {
    #[serde(rename = "IDR")]
    Idr,
    #[serde(rename = "WEI")]
    Wei,
    #[serde(rename = "CREDIT")]
    Credit,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Idr => "IDR",
            Currency::Wei => "WEI",
            Currency::Credit => "CREDIT",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "IDR" => Some(Currency::Idr),
            "WEI" => Some(Currency::Wei),
            "CREDIT" => Some(Currency::Credit),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Purchase request as received from the session-authenticated caller
#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub owner: OwnerId,
    pub kind: PurchaseKind,
    pub rail: Rail,
    /// Credit package id or item ref, depending on `kind`
    pub product_id: String,
    /// Price the client saw; must equal the current catalog price
    pub quoted_amount: u128,
    /// Expected sender for crypto payments
    pub payer_address: Option<String>,
}

/// Validated, priced purchase ready to persist
#[derive(Debug, Clone)]
pub struct PurchaseDraft {
    pub owner: OwnerId,
    pub kind: PurchaseKind,
    pub rail: Rail,
    pub amount: u128,
    pub credit_delta: i64,
    pub item_ref: Option<String>,
    pub payer_address: Option<String>,
}

/// One purchase attempt
///
/// `amount`, `credit_delta` and `item_ref` never change after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub transaction_id: TransactionId,
    pub owner: OwnerId,
    pub kind: PurchaseKind,
    pub rail: Rail,
    pub amount: u128,
    pub currency: Currency,
    pub credit_delta: i64,
    pub item_ref: Option<String>,
    pub status: TransactionStatus,
    pub grant_state: GrantState,
    /// Gateway txn id (qris) or `receiver:wei` descriptor (crypto)
    pub rail_reference: Option<String>,
    pub payer_address: Option<String>,
    pub chain_tx_hash: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Settlement (or failure / expiry) time
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Build a new `Pending` transaction expiring `ttl` after `now`
    pub fn new_pending(draft: PurchaseDraft, now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            transaction_id: TransactionId::new(),
            owner: draft.owner,
            kind: draft.kind,
            rail: draft.rail,
            amount: draft.amount,
            currency: draft.rail.currency(),
            credit_delta: draft.credit_delta,
            item_ref: draft.item_ref,
            status: TransactionStatus::Pending,
            grant_state: GrantState::None,
            rail_reference: None,
            payer_address: draft.payer_address,
            chain_tx_hash: None,
            failure_reason: None,
            created_at: now,
            expires_at: now + ttl,
            finalized_at: None,
        }
    }

    /// Still pending but past its TTL
    #[inline]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == TransactionStatus::Pending && now >= self.expires_at
    }

    #[inline]
    pub fn needs_grant(&self) -> bool {
        self.status == TransactionStatus::Settled && self.grant_state == GrantState::PendingApply
    }

    /// Pending, or settled with the grant outstanding
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        self.status == TransactionStatus::Pending || self.needs_grant()
    }
}
