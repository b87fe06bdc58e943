//! Gateway types module
//!
//! ## Submodules
//! - [`purchase`]: purchase, balance and inventory DTOs
//! - [`response`]: response envelope and error mapping

pub mod purchase;
pub mod response;

pub use purchase::{
    AmountInput, BalanceResponse, ConfirmRequest, ConfirmResponse, CreatePurchaseRequest,
    CreatePurchaseResponse, HistoryQuery, InternalConfirmRequest, InventoryItemView, PurchaseView,
    StatusQuery,
};
pub use response::{ApiError, ApiResponse, ApiResult, ok};
