//! Payment Adapters
//!
//! One adapter per external rail. Adapters never touch the ledger store:
//! they translate a transaction into provider instructions and report what
//! the provider says about it. Settlement decisions belong to the
//! reconciliation coordinator.

pub mod crypto;
#[cfg(test)]
pub mod mock;
pub mod qris;

pub use crypto::BaseChainAdapter;
pub use qris::QrisAdapter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::purchase::error::PurchaseError;
use crate::purchase::types::{Rail, Transaction};

/// Provider-side failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RailError {
    #[error("provider timed out")]
    Timeout,

    #[error("provider unreachable: {0}")]
    Network(String),

    #[error("unexpected provider response: {0}")]
    Protocol(String),

    /// Provider refused the request outright
    #[error("provider rejected request: {0}")]
    Rejected(String),

    #[error("rail not configured: {0}")]
    NotConfigured(String),
}

impl RailError {
    /// Map to the caller-facing error for a failed `initiate`
    pub fn into_purchase_error(self) -> PurchaseError {
        match self {
            RailError::Timeout => PurchaseError::ProviderTimeout("initiate timed out".into()),
            RailError::Rejected(reason) => PurchaseError::ProviderRejected(reason),
            other => PurchaseError::ProviderUnavailable(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for RailError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RailError::Timeout
        } else if e.is_decode() {
            RailError::Protocol(e.to_string())
        } else {
            RailError::Network(e.to_string())
        }
    }
}

/// What the provider currently says about a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Unconfirmed,
    /// Amount actually received, in the transaction's currency
    Confirmed { settled_amount: u128 },
    Rejected(String),
}

/// Payment instructions returned to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rail", rename_all = "snake_case")]
pub enum RailInstructions {
    Qris {
        qr_string: String,
        qr_url: Option<String>,
        gateway_txn_id: String,
        expires_at: DateTime<Utc>,
    },
    Crypto {
        chain_id: u64,
        to_address: String,
        /// Decimal string; exceeds JSON number precision
        amount_wei: String,
        expires_at: DateTime<Utc>,
    },
    Balance {
        debited_credits: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RailInitiation {
    pub instructions: RailInstructions,
    /// Persisted as `Transaction::rail_reference`
    pub rail_reference: String,
}

/// External payment rail
#[async_trait]
pub trait PaymentAdapter: Send + Sync {
    fn rail(&self) -> Rail;

    /// Ask the provider for payment instructions
    async fn initiate(&self, tx: &Transaction) -> Result<RailInitiation, RailError>;

    /// Ask the provider whether the payment arrived
    async fn check(&self, tx: &Transaction) -> Result<CheckOutcome, RailError>;
}

/// Configured adapters, keyed by rail
#[derive(Clone, Default)]
pub struct RailAdapters {
    qris: Option<Arc<dyn PaymentAdapter>>,
    crypto: Option<Arc<dyn PaymentAdapter>>,
}

impl RailAdapters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_qris(mut self, adapter: Arc<dyn PaymentAdapter>) -> Self {
        self.qris = Some(adapter);
        self
    }

    pub fn with_crypto(mut self, adapter: Arc<dyn PaymentAdapter>) -> Self {
        self.crypto = Some(adapter);
        self
    }

    /// Adapter for an external rail
    pub fn get(&self, rail: Rail) -> Result<Arc<dyn PaymentAdapter>, PurchaseError> {
        let adapter = match rail {
            Rail::Qris => self.qris.as_ref(),
            Rail::Crypto => self.crypto.as_ref(),
            Rail::Balance => None,
        };
        adapter
            .cloned()
            .ok_or_else(|| PurchaseError::UnsupportedRail(format!("{} is not enabled", rail)))
    }

    pub fn enabled(&self) -> Vec<Rail> {
        let mut rails = vec![Rail::Balance];
        if self.qris.is_some() {
            rails.push(Rail::Qris);
        }
        if self.crypto.is_some() {
            rails.push(Rail::Crypto);
        }
        rails
    }
}
