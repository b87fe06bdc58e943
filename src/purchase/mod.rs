//! Purchase Confirmation & Reconciliation
//!
//! A purchase is one [`Transaction`] that moves through a persistent FSM:
//!
//! ```text
//! PENDING ──┬──▶ SETTLED ──▶ grant (ledger entry / inventory)
//!           ├──▶ FAILED
//!           └──▶ EXPIRED
//! ```
//!
//! Confirmation signals arrive from several callers at once: the client
//! polling `confirm`, the provider webhook glue, and the sweep worker. All of
//! them end in [`ReconciliationCoordinator::settle`].
//!
//! # Safety Invariants
//!
//! 1. **One winner**: the terminal transition is a conditional update in the
//!    store; concurrent callers observe `AlreadyFinalized`.
//! 2. **Sticky terminal states**: nothing leaves `settled`, `failed` or `expired`.
//! 3. **TTL wins**: a confirmation arriving after `expires_at` expires the
//!    transaction instead of settling it.
//! 4. **Snapshot price**: the amount is fixed at creation; a provider-reported
//!    amount that differs finalizes `failed`.
//! 5. **Exactly-once grant**: at most one ledger entry per transaction id;
//!    a failed grant stays `pending_apply` and is retried, never re-settled.

pub mod coordinator;
pub mod error;
pub mod grant;
pub mod service;
pub mod state;
pub mod types;
pub mod worker;

#[cfg(test)]
mod integration_tests;

pub use coordinator::{ReconciliationCoordinator, SettleOutcome};
pub use error::PurchaseError;
pub use grant::GrantService;
pub use service::{BalanceView, PurchaseReceipt, PurchaseService};
pub use state::{GrantState, TransactionStatus};
pub use types::{Currency, OwnerId, PurchaseKind, PurchaseRequest, Rail, Transaction, TransactionId};
pub use worker::{SweepReport, SweepWorker, WorkerConfig};
