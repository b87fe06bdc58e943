//! Credit Ledger - Purchase Confirmation & Reconciliation
//!
//! Confirms reader purchases paid over QRIS, Base-chain transfers or the
//! reader's own credit balance, and reconciles them into an append-only
//! credit ledger with exactly-once grants.
//!
//! # Modules
//!
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup
//! - [`db`] - PostgreSQL pool and schema
//! - [`catalog`] - Credit packages and shop items with per-rail prices
//! - [`ledger`] - Ledger store (transactions, balances, entries, inventory)
//! - [`purchase`] - Transaction FSM, reconciliation coordinator, grants, sweep
//! - [`rails`] - Payment adapters (QRIS, Base chain)
//! - [`gateway`] - HTTP API

pub mod catalog;
pub mod config;
pub mod db;
pub mod gateway;
pub mod ledger;
pub mod logging;
pub mod purchase;
pub mod rails;

// Convenient re-exports at crate root
pub use ledger::{LedgerStore, MemoryLedgerStore, PgLedgerStore};
pub use purchase::{
    PurchaseError, PurchaseService, ReconciliationCoordinator, SettleOutcome, SweepWorker,
    Transaction, TransactionId, TransactionStatus,
};
