//! Ledger Store
//!
//! Durable balances, append-only ledger entries and inventory grants.
//!
//! - Balance = sum of ledger entries; the cached counter in the account row is
//!   written in the same store transaction as the entry.
//! - At most one ledger entry per transaction id.
//! - At most one inventory grant per `(owner, item_ref)`.

pub mod memory;
pub mod pg;
pub mod store;
pub mod types;

pub use memory::MemoryLedgerStore;
pub use pg::PgLedgerStore;
pub use store::{LedgerStore, Transition};
pub use types::{AccountBalance, GrantApplied, GrantPlan, InventoryGrant, LedgerEntry};
