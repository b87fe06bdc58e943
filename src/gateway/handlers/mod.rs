//! HTTP handlers
//!
//! - [`purchase`]: create, status, confirm, history
//! - [`account`]: balance, inventory
//! - [`health`]: liveness + store ping

pub mod account;
pub mod health;
pub mod purchase;

pub use account::{get_balance, get_inventory};
pub use health::{HealthResponse, health_check};
pub use purchase::{
    confirm_purchase, create_purchase, get_purchase_status, internal_confirm, list_purchases,
};

