//! Purchase Error Types

use thiserror::Error;

/// Purchase error types
///
/// `code()` values are part of the HTTP contract.
#[derive(Error, Debug, Clone)]
pub enum PurchaseError {
    // === Identity Errors ===
    #[error("User not authenticated")]
    Unauthorized,

    #[error("Transaction belongs to another owner")]
    Forbidden,

    // === Validation Errors ===
    #[error("Quoted amount does not match current price (expected {expected}, got {quoted})")]
    PriceMismatch { expected: u128, quoted: u128 },

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Unknown credit package: {0}")]
    UnknownPackage(String),

    #[error("Unknown item: {0}")]
    UnknownItem(String),

    #[error("Unsupported rail: {0}")]
    UnsupportedRail(String),

    #[error("Insufficient credits (available {available}, required {required})")]
    InsufficientCredits { available: i64, required: i64 },

    #[error("Item already owned: {0}")]
    ItemAlreadyOwned(String),

    #[error("Another purchase of this item is still in progress: {0}")]
    ItemPurchaseInProgress(String),

    #[error("Invalid transaction hash: {0}")]
    InvalidTxHash(String),

    #[error("Transaction hash already used by another purchase")]
    TxHashInUse,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // === Provider Errors ===
    #[error("Payment provider timed out: {0}")]
    ProviderTimeout(String),

    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Payment provider rejected the payment: {0}")]
    ProviderRejected(String),

    // === Lifecycle Errors ===
    #[error("Transaction expired")]
    Expired,

    #[error("Grant could not be applied: {0}")]
    GrantApplyFailure(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    // === System Errors ===
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal system error: {0}")]
    SystemError(String),
}

impl PurchaseError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            PurchaseError::Unauthorized => "UNAUTHORIZED",
            PurchaseError::Forbidden => "FORBIDDEN",
            PurchaseError::PriceMismatch { .. } => "PRICE_MISMATCH",
            PurchaseError::InvalidAmount => "INVALID_AMOUNT",
            PurchaseError::UnknownPackage(_) => "UNKNOWN_PACKAGE",
            PurchaseError::UnknownItem(_) => "UNKNOWN_ITEM",
            PurchaseError::UnsupportedRail(_) => "UNSUPPORTED_RAIL",
            PurchaseError::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            PurchaseError::ItemAlreadyOwned(_) => "ITEM_ALREADY_OWNED",
            PurchaseError::ItemPurchaseInProgress(_) => "ITEM_PURCHASE_IN_PROGRESS",
            PurchaseError::InvalidTxHash(_) => "INVALID_TX_HASH",
            PurchaseError::TxHashInUse => "TX_HASH_IN_USE",
            PurchaseError::InvalidRequest(_) => "INVALID_REQUEST",
            PurchaseError::ProviderTimeout(_) => "PROVIDER_TIMEOUT",
            PurchaseError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            PurchaseError::ProviderRejected(_) => "PROVIDER_REJECTED",
            PurchaseError::Expired => "EXPIRED",
            PurchaseError::GrantApplyFailure(_) => "GRANT_APPLY_FAILURE",
            PurchaseError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            PurchaseError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            PurchaseError::DatabaseError(_) => "DATABASE_ERROR",
            PurchaseError::SystemError(_) => "SYSTEM_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            PurchaseError::Unauthorized => 401,
            PurchaseError::Forbidden => 403,
            PurchaseError::PriceMismatch { .. }
            | PurchaseError::InvalidAmount
            | PurchaseError::UnknownPackage(_)
            | PurchaseError::UnknownItem(_)
            | PurchaseError::UnsupportedRail(_)
            | PurchaseError::InvalidTxHash(_)
            | PurchaseError::InvalidRequest(_) => 400,
            PurchaseError::InsufficientCredits { .. }
            | PurchaseError::ItemAlreadyOwned(_)
            | PurchaseError::TxHashInUse
            | PurchaseError::ProviderRejected(_) => 422,
            PurchaseError::TransactionNotFound(_) => 404,
            PurchaseError::InvalidStateTransition(_) | PurchaseError::ItemPurchaseInProgress(_) => {
                409
            }
            PurchaseError::Expired => 410,
            PurchaseError::ProviderTimeout(_) | PurchaseError::ProviderUnavailable(_) => 503,
            PurchaseError::GrantApplyFailure(_)
            | PurchaseError::DatabaseError(_)
            | PurchaseError::SystemError(_) => 500,
        }
    }

    /// Worth retrying with the same request later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PurchaseError::ProviderTimeout(_)
                | PurchaseError::ProviderUnavailable(_)
                | PurchaseError::DatabaseError(_)
        )
    }
}

impl From<sqlx::Error> for PurchaseError {
    fn from(e: sqlx::Error) -> Self {
        PurchaseError::DatabaseError(e.to_string())
    }
}

impl From<anyhow::Error> for PurchaseError {
    fn from(e: anyhow::Error) -> Self {
        PurchaseError::SystemError(e.to_string())
    }
}
