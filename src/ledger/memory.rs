//! In-process ledger store
//!
//! One mutex guards all state, so every trait method is atomic within the
//! process. Used for development without PostgreSQL and by the test suites.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use super::store::{LedgerStore, Transition, hold_of};
use super::types::{AccountBalance, GrantApplied, GrantPlan, InventoryGrant, LedgerEntry};
use crate::purchase::error::PurchaseError;
use crate::purchase::state::{GrantState, TransactionStatus};
use crate::purchase::types::{OwnerId, Transaction, TransactionId};

#[derive(Default)]
struct MemoryState {
    /// ULIDs sort by creation time
    transactions: BTreeMap<TransactionId, Transaction>,
    tx_hashes: HashMap<String, TransactionId>,
    accounts: HashMap<OwnerId, AccountBalance>,
    entries: Vec<LedgerEntry>,
    inventory: HashMap<(OwnerId, String), InventoryGrant>,
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<MemoryState>,
    #[cfg(test)]
    fail_grants: AtomicBool,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, PurchaseError> {
        self.state
            .lock()
            .map_err(|_| PurchaseError::SystemError("ledger state lock poisoned".into()))
    }

    /// Make `apply_grant` fail until reset
    #[cfg(test)]
    pub fn set_fail_grants(&self, fail: bool) {
        self.fail_grants.store(fail, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn injected_grant_failure(&self) -> Result<(), PurchaseError> {
        if self.fail_grants.load(Ordering::SeqCst) {
            return Err(PurchaseError::DatabaseError("injected grant failure".into()));
        }
        Ok(())
    }

    #[cfg(not(test))]
    #[inline]
    fn injected_grant_failure(&self) -> Result<(), PurchaseError> {
        Ok(())
    }

    /// Credit an owner directly (test setup)
    #[cfg(test)]
    pub fn seed_balance(&self, owner: &OwnerId, credits: i64) {
        let mut state = self.state.lock().unwrap();
        let id = TransactionId::new();
        state.entries.push(LedgerEntry {
            transaction_id: id,
            owner: owner.clone(),
            delta: credits,
            created_at: Utc::now(),
        });
        state.accounts.entry(owner.clone()).or_default().balance += credits;
    }

    /// Number of ledger entries referencing `id`
    #[cfg(test)]
    pub fn entries_for(&self, id: TransactionId) -> usize {
        let state = self.state.lock().unwrap();
        state
            .entries
            .iter()
            .filter(|e| e.transaction_id == id)
            .count()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), PurchaseError> {
        let hold = hold_of(tx)?;
        let mut state = self.lock()?;

        if state.transactions.contains_key(&tx.transaction_id) {
            return Err(PurchaseError::SystemError(format!(
                "duplicate transaction id {}",
                tx.transaction_id
            )));
        }

        if let Some(item_ref) = &tx.item_ref
            && state.transactions.values().any(|other| {
                other.owner == tx.owner
                    && other.item_ref.as_ref() == Some(item_ref)
                    && other.is_in_flight()
            })
        {
            return Err(PurchaseError::ItemPurchaseInProgress(item_ref.clone()));
        }

        if hold > 0 {
            let account = state.accounts.entry(tx.owner.clone()).or_default();
            if account.available() < hold {
                return Err(PurchaseError::InsufficientCredits {
                    available: account.available(),
                    required: hold,
                });
            }
            account.held += hold;
        }

        state.transactions.insert(tx.transaction_id, tx.clone());
        Ok(())
    }

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<Transaction>, PurchaseError> {
        Ok(self.lock()?.transactions.get(&id).cloned())
    }

    async fn list_transactions(
        &self,
        owner: &OwnerId,
        limit: usize,
    ) -> Result<Vec<Transaction>, PurchaseError> {
        let state = self.lock()?;
        Ok(state
            .transactions
            .values()
            .rev()
            .filter(|tx| &tx.owner == owner)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn attach_rail_reference(
        &self,
        id: TransactionId,
        reference: &str,
    ) -> Result<bool, PurchaseError> {
        let mut state = self.lock()?;
        match state.transactions.get_mut(&id) {
            Some(tx) if tx.status == TransactionStatus::Pending => {
                tx.rail_reference = Some(reference.to_string());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(PurchaseError::TransactionNotFound(id.to_string())),
        }
    }

    async fn attach_chain_tx_hash(
        &self,
        id: TransactionId,
        hash: &str,
    ) -> Result<bool, PurchaseError> {
        let mut state = self.lock()?;

        if let Some(holder) = state.tx_hashes.get(hash) {
            return if *holder == id {
                Ok(true)
            } else {
                Err(PurchaseError::TxHashInUse)
            };
        }

        let tx = state
            .transactions
            .get_mut(&id)
            .ok_or_else(|| PurchaseError::TransactionNotFound(id.to_string()))?;
        if tx.status != TransactionStatus::Pending || tx.chain_tx_hash.is_some() {
            return Ok(false);
        }
        tx.chain_tx_hash = Some(hash.to_string());
        state.tx_hashes.insert(hash.to_string(), id);
        Ok(true)
    }

    async fn chain_tx_hash_holder(
        &self,
        hash: &str,
    ) -> Result<Option<TransactionId>, PurchaseError> {
        Ok(self.lock()?.tx_hashes.get(hash).copied())
    }

    async fn transition_if_pending(
        &self,
        id: TransactionId,
        transition: Transition,
    ) -> Result<bool, PurchaseError> {
        let mut state = self.lock()?;

        let tx = state
            .transactions
            .get_mut(&id)
            .ok_or_else(|| PurchaseError::TransactionNotFound(id.to_string()))?;
        if !tx.status.can_transition_to(transition.to) {
            return Ok(false);
        }
        if transition.require_unexpired && tx.expires_at <= transition.at {
            return Ok(false);
        }
        let release = if transition.to == TransactionStatus::Settled {
            0
        } else {
            hold_of(tx)?
        };

        tx.status = transition.to;
        tx.failure_reason = transition.reason;
        tx.finalized_at = Some(transition.at);
        if transition.to == TransactionStatus::Settled {
            tx.grant_state = GrantState::PendingApply;
        }

        let released_hash = match transition.to {
            TransactionStatus::Settled => None,
            _ => tx.chain_tx_hash.clone(),
        };
        let owner = tx.owner.clone();

        if release > 0 {
            let account = state.accounts.entry(owner).or_default();
            account.held -= release;
        }
        if let Some(hash) = released_hash
            && state.tx_hashes.get(&hash) == Some(&id)
        {
            state.tx_hashes.remove(&hash);
        }
        Ok(true)
    }

    async fn apply_grant(
        &self,
        plan: &GrantPlan,
        at: DateTime<Utc>,
    ) -> Result<GrantApplied, PurchaseError> {
        self.injected_grant_failure()?;

        let mut state = self.lock()?;

        let tx = state
            .transactions
            .get(&plan.transaction_id)
            .ok_or_else(|| PurchaseError::TransactionNotFound(plan.transaction_id.to_string()))?;
        match (tx.status, tx.grant_state) {
            (TransactionStatus::Settled, GrantState::Applied) => {
                return Ok(GrantApplied::AlreadyApplied);
            }
            (TransactionStatus::Settled, GrantState::PendingApply) => {}
            (status, grant) => {
                return Err(PurchaseError::InvalidStateTransition(format!(
                    "grant on {} transaction with grant state {}",
                    status, grant
                )));
            }
        }

        let mut item_granted = false;
        if let Some(item_ref) = &plan.item_ref {
            let key = (plan.owner.clone(), item_ref.clone());
            if !state.inventory.contains_key(&key) {
                state.inventory.insert(
                    key,
                    InventoryGrant {
                        owner: plan.owner.clone(),
                        item_ref: item_ref.clone(),
                        acquired_via: plan.transaction_id,
                        acquired_at: at,
                    },
                );
                item_granted = true;
            }
        }

        // Already-owned item bought from balance: release the hold, no debit
        let ledger_delta = if plan.item_ref.is_some() && !item_granted && plan.held_credits > 0 {
            0
        } else {
            plan.ledger_delta
        };

        let account = state.accounts.entry(plan.owner.clone()).or_default();
        let next = AccountBalance {
            balance: account.balance + ledger_delta,
            held: account.held - plan.held_credits,
        };
        if next.balance < 0 || next.held < 0 || next.held > next.balance {
            return Err(PurchaseError::SystemError(format!(
                "grant would leave account inconsistent: balance={}, held={}",
                next.balance, next.held
            )));
        }
        *account = next;

        if ledger_delta != 0 {
            state.entries.push(LedgerEntry {
                transaction_id: plan.transaction_id,
                owner: plan.owner.clone(),
                delta: ledger_delta,
                created_at: at,
            });
        }

        if let Some(tx) = state.transactions.get_mut(&plan.transaction_id) {
            tx.grant_state = GrantState::Applied;
        }

        Ok(GrantApplied::Applied {
            item_granted,
            ledger_delta,
        })
    }

    async fn account(&self, owner: &OwnerId) -> Result<AccountBalance, PurchaseError> {
        Ok(self
            .lock()?
            .accounts
            .get(owner)
            .copied()
            .unwrap_or_default())
    }

    async fn recompute_balance(&self, owner: &OwnerId) -> Result<i64, PurchaseError> {
        let state = self.lock()?;
        Ok(state
            .entries
            .iter()
            .filter(|e| &e.owner == owner)
            .map(|e| e.delta)
            .sum())
    }

    async fn ledger_entries(&self, owner: &OwnerId) -> Result<Vec<LedgerEntry>, PurchaseError> {
        let state = self.lock()?;
        Ok(state
            .entries
            .iter()
            .filter(|e| &e.owner == owner)
            .cloned()
            .collect())
    }

    async fn inventory(&self, owner: &OwnerId) -> Result<Vec<InventoryGrant>, PurchaseError> {
        let state = self.lock()?;
        let mut items: Vec<InventoryGrant> = state
            .inventory
            .values()
            .filter(|g| &g.owner == owner)
            .cloned()
            .collect();
        items.sort_by_key(|g| g.acquired_at);
        Ok(items)
    }

    async fn owns_item(&self, owner: &OwnerId, item_ref: &str) -> Result<bool, PurchaseError> {
        let state = self.lock()?;
        Ok(state
            .inventory
            .contains_key(&(owner.clone(), item_ref.to_string())))
    }

    async fn find_overdue_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transaction>, PurchaseError> {
        let state = self.lock()?;
        Ok(state
            .transactions
            .values()
            .filter(|tx| tx.is_overdue(now))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transaction>, PurchaseError> {
        let state = self.lock()?;
        Ok(state
            .transactions
            .values()
            .filter(|tx| tx.status == TransactionStatus::Pending && tx.created_at < created_before)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_grant_pending(&self, limit: usize) -> Result<Vec<Transaction>, PurchaseError> {
        let state = self.lock()?;
        Ok(state
            .transactions
            .values()
            .filter(|tx| tx.needs_grant())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), PurchaseError> {
        self.lock().map(|_| ())
    }
}
