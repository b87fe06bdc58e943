//! Reconciliation Coordinator
//!
//! Single entry point for every confirmation signal (client poll, provider
//! webhook, sweep worker). Each signal becomes one call to [`settle`], which
//! performs one conditional transition in the store. Races between signals
//! are decided there; losers get [`SettleOutcome::AlreadyFinalized`].
//!
//! [`settle`]: ReconciliationCoordinator::settle

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::PurchaseError;
use super::grant::GrantService;
use super::state::TransactionStatus;
use super::types::{OwnerId, Rail, Transaction, TransactionId};
use crate::ledger::{LedgerStore, Transition};
use crate::rails::crypto::normalize_tx_hash;
use crate::rails::{CheckOutcome, RailAdapters, RailError};

/// Result of a settlement attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// This call moved the transaction to a terminal state
    Finalized(Transaction),
    /// Another caller (or an earlier call) already did
    AlreadyFinalized(Transaction),
    /// No confirmation yet; keep polling
    Pending(Transaction),
}

impl SettleOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            SettleOutcome::Finalized(tx)
            | SettleOutcome::AlreadyFinalized(tx)
            | SettleOutcome::Pending(tx) => tx,
        }
    }

    pub fn into_transaction(self) -> Transaction {
        match self {
            SettleOutcome::Finalized(tx)
            | SettleOutcome::AlreadyFinalized(tx)
            | SettleOutcome::Pending(tx) => tx,
        }
    }

    pub fn is_already_finalized(&self) -> bool {
        matches!(self, SettleOutcome::AlreadyFinalized(_))
    }
}

pub struct ReconciliationCoordinator {
    store: Arc<dyn LedgerStore>,
    rails: RailAdapters,
    grants: GrantService,
    check_timeout: Duration,
}

impl ReconciliationCoordinator {
    pub fn new(store: Arc<dyn LedgerStore>, rails: RailAdapters, check_timeout: Duration) -> Self {
        Self {
            grants: GrantService::new(store.clone()),
            store,
            rails,
            check_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn rails(&self) -> &RailAdapters {
        &self.rails
    }

    async fn load(&self, id: TransactionId) -> Result<Transaction, PurchaseError> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or_else(|| PurchaseError::TransactionNotFound(id.to_string()))
    }

    /// Apply one observed provider outcome.
    ///
    /// Order: terminal, then expiry (TTL wins over a late confirmation), then
    /// the outcome itself.
    pub async fn settle(
        &self,
        id: TransactionId,
        observed: CheckOutcome,
    ) -> Result<SettleOutcome, PurchaseError> {
        let tx = self.load(id).await?;
        if tx.status.is_terminal() {
            return Ok(SettleOutcome::AlreadyFinalized(tx));
        }

        let now = Utc::now();
        if tx.is_overdue(now) {
            return self.finalize(tx, Transition::expire(now)).await;
        }

        match observed {
            CheckOutcome::Unconfirmed => Ok(SettleOutcome::Pending(tx)),
            CheckOutcome::Rejected(reason) => self.finalize(tx, Transition::fail(reason, now)).await,
            CheckOutcome::Confirmed { settled_amount } if settled_amount != tx.amount => {
                let reason = format!(
                    "settled amount {} {} does not match {}",
                    settled_amount, tx.currency, tx.amount
                );
                self.finalize(tx, Transition::fail(reason, now)).await
            }
            CheckOutcome::Confirmed { .. } => self.finalize(tx, Transition::settle(now)).await,
        }
    }

    async fn finalize(
        &self,
        tx: Transaction,
        transition: Transition,
    ) -> Result<SettleOutcome, PurchaseError> {
        let id = tx.transaction_id;
        let target = transition.to;
        let at = transition.at;

        if self.store.transition_if_pending(id, transition).await? {
            return self.after_win(id).await.map(SettleOutcome::Finalized);
        }

        let current = self.load(id).await?;
        if current.status.is_terminal() {
            debug!(transaction_id = %id, status = %current.status, "Lost settlement race");
            return Ok(SettleOutcome::AlreadyFinalized(current));
        }

        // Settle refused inside the CAS: expired between read and write
        if target == TransactionStatus::Settled {
            if self
                .store
                .transition_if_pending(id, Transition::expire(at))
                .await?
            {
                return self.after_win(id).await.map(SettleOutcome::Finalized);
            }
            let current = self.load(id).await?;
            if current.status.is_terminal() {
                return Ok(SettleOutcome::AlreadyFinalized(current));
            }
        }

        Err(PurchaseError::InvalidStateTransition(format!(
            "{} still pending after {} transition",
            id, target
        )))
    }

    async fn after_win(&self, id: TransactionId) -> Result<Transaction, PurchaseError> {
        let tx = self.load(id).await?;
        info!(
            transaction_id = %id,
            owner = %tx.owner,
            rail = %tx.rail,
            status = %tx.status,
            reason = tx.failure_reason.as_deref().unwrap_or(""),
            "Transaction finalized"
        );

        if tx.needs_grant() {
            self.grants.apply(&tx).await?;
            return self.load(id).await;
        }
        Ok(tx)
    }

    /// Read with lazy expiry; retries a pending grant once
    pub async fn read(
        &self,
        id: TransactionId,
        owner: Option<&OwnerId>,
    ) -> Result<Transaction, PurchaseError> {
        let tx = self.load(id).await?;
        if let Some(owner) = owner
            && &tx.owner != owner
        {
            return Err(PurchaseError::Forbidden);
        }

        if tx.is_overdue(Utc::now()) {
            return self
                .settle(id, CheckOutcome::Unconfirmed)
                .await
                .map(SettleOutcome::into_transaction);
        }
        Ok(self.grant_on_read(tx).await)
    }

    async fn grant_on_read(&self, tx: Transaction) -> Transaction {
        if !tx.needs_grant() {
            return tx;
        }
        match self.retry_grant(tx.transaction_id).await {
            Ok(updated) => updated,
            Err(e) => {
                warn!(transaction_id = %tx.transaction_id, error = %e, "Grant retry on read failed");
                tx
            }
        }
    }

    /// Ask the rail once (bounded by the check timeout) and settle
    pub async fn poll(&self, id: TransactionId) -> Result<SettleOutcome, PurchaseError> {
        let tx = self.load(id).await?;
        if tx.status.is_terminal() {
            return Ok(SettleOutcome::AlreadyFinalized(self.grant_on_read(tx).await));
        }
        if tx.is_overdue(Utc::now()) {
            return self.settle(id, CheckOutcome::Unconfirmed).await;
        }

        if tx.rail == Rail::Balance {
            // Balance purchases confirm themselves; only reached after an interrupted initiate
            let amount = tx.amount;
            return self
                .settle(id, CheckOutcome::Confirmed { settled_amount: amount })
                .await;
        }

        let adapter = self.rails.get(tx.rail)?;
        let observed = match tokio::time::timeout(self.check_timeout, adapter.check(&tx)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(RailError::Rejected(reason))) => CheckOutcome::Rejected(reason),
            Ok(Err(e)) => {
                warn!(transaction_id = %id, rail = %tx.rail, error = %e, "Rail check failed");
                CheckOutcome::Unconfirmed
            }
            Err(_) => {
                warn!(
                    transaction_id = %id,
                    rail = %tx.rail,
                    timeout_ms = self.check_timeout.as_millis() as u64,
                    "Rail check timed out"
                );
                CheckOutcome::Unconfirmed
            }
        };

        self.settle(id, observed).await
    }

    /// Client or webhook confirmation: attach a crypto tx hash if given, then poll.
    ///
    /// `owner` is `None` for the internal webhook path.
    pub async fn confirm(
        &self,
        id: TransactionId,
        owner: Option<&OwnerId>,
        tx_hash: Option<&str>,
    ) -> Result<SettleOutcome, PurchaseError> {
        let tx = self.load(id).await?;
        if let Some(owner) = owner
            && &tx.owner != owner
        {
            return Err(PurchaseError::Forbidden);
        }

        if let Some(raw) = tx_hash {
            if tx.rail != Rail::Crypto {
                return Err(PurchaseError::InvalidRequest(
                    "tx_hash only applies to crypto purchases".into(),
                ));
            }
            let hash =
                normalize_tx_hash(raw).ok_or_else(|| PurchaseError::InvalidTxHash(raw.to_string()))?;

            if tx.status == TransactionStatus::Pending && !self.attach_tx_hash(id, &hash).await? {
                let current = self.load(id).await?;
                if current.status == TransactionStatus::Pending
                    && current.chain_tx_hash.as_deref() != Some(hash.as_str())
                {
                    return Err(PurchaseError::InvalidRequest(
                        "a different tx_hash is already attached".into(),
                    ));
                }
            }
            debug!(transaction_id = %id, tx_hash = %hash, "Chain tx hash attached");
        }

        self.poll(id).await
    }

    /// Attach `hash`; if another pending transaction holds it, poll that one
    /// first so a holder whose sender does not match is failed and lets go.
    async fn attach_tx_hash(&self, id: TransactionId, hash: &str) -> Result<bool, PurchaseError> {
        match self.store.attach_chain_tx_hash(id, hash).await {
            Err(PurchaseError::TxHashInUse) => {}
            other => return other,
        }

        let Some(holder) = self.store.chain_tx_hash_holder(hash).await? else {
            return self.store.attach_chain_tx_hash(id, hash).await;
        };
        if holder == id {
            return Ok(true);
        }
        match self.poll(holder).await {
            Ok(outcome) => debug!(
                transaction_id = %id,
                holder = %holder,
                holder_status = %outcome.transaction().status,
                "Polled current tx hash holder"
            ),
            Err(e) => warn!(transaction_id = %id, holder = %holder, error = %e, "Tx hash holder poll failed"),
        }
        self.store.attach_chain_tx_hash(id, hash).await
    }

    /// Re-apply a `pending_apply` grant
    pub async fn retry_grant(&self, id: TransactionId) -> Result<Transaction, PurchaseError> {
        let tx = self.load(id).await?;
        if !tx.needs_grant() {
            return Ok(tx);
        }
        self.grants.apply(&tx).await?;
        self.load(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedgerStore;
    use crate::purchase::state::GrantState;
    use crate::purchase::types::{PurchaseDraft, PurchaseKind};
    use crate::rails::mock::MockRail;

    struct Fixture {
        store: Arc<MemoryLedgerStore>,
        rail: Arc<MockRail>,
        coordinator: ReconciliationCoordinator,
    }

    fn fixture(rail: Rail) -> Fixture {
        let store = Arc::new(MemoryLedgerStore::new());
        let mock = Arc::new(MockRail::new(rail));
        let rails = match rail {
            Rail::Crypto => RailAdapters::new().with_crypto(mock.clone()),
            _ => RailAdapters::new().with_qris(mock.clone()),
        };
        let coordinator =
            ReconciliationCoordinator::new(store.clone(), rails, Duration::from_millis(200));
        Fixture {
            store,
            rail: mock,
            coordinator,
        }
    }

    async fn insert(fx: &Fixture, rail: Rail, ttl: chrono::Duration) -> Transaction {
        let tx = Transaction::new_pending(
            PurchaseDraft {
                owner: OwnerId::new("reader-1"),
                kind: PurchaseKind::CreditPurchase,
                rail,
                amount: 15_000,
                credit_delta: 100,
                item_ref: None,
                payer_address: None,
            },
            Utc::now(),
            ttl,
        );
        fx.store.insert_transaction(&tx).await.unwrap();
        tx
    }

    #[tokio::test]
    async fn test_settle_confirmed_applies_grant() {
        let fx = fixture(Rail::Qris);
        let tx = insert(&fx, Rail::Qris, chrono::Duration::minutes(15)).await;

        let outcome = fx
            .coordinator
            .settle(tx.transaction_id, CheckOutcome::Confirmed { settled_amount: 15_000 })
            .await
            .unwrap();

        let settled = outcome.transaction();
        assert!(matches!(outcome, SettleOutcome::Finalized(_)));
        assert_eq!(settled.status, TransactionStatus::Settled);
        assert_eq!(settled.grant_state, GrantState::Applied);
        assert_eq!(
            fx.store.account(&settled.owner).await.unwrap().balance,
            100
        );
    }

    #[tokio::test]
    async fn test_settle_unconfirmed_stays_pending() {
        let fx = fixture(Rail::Qris);
        let tx = insert(&fx, Rail::Qris, chrono::Duration::minutes(15)).await;

        let outcome = fx
            .coordinator
            .settle(tx.transaction_id, CheckOutcome::Unconfirmed)
            .await
            .unwrap();
        assert!(matches!(outcome, SettleOutcome::Pending(_)));
    }

    #[tokio::test]
    async fn test_settle_mismatch_fails() {
        let fx = fixture(Rail::Qris);
        let tx = insert(&fx, Rail::Qris, chrono::Duration::minutes(15)).await;

        let outcome = fx
            .coordinator
            .settle(tx.transaction_id, CheckOutcome::Confirmed { settled_amount: 10_000 })
            .await
            .unwrap();
        assert_eq!(outcome.transaction().status, TransactionStatus::Failed);
        assert!(outcome.transaction().failure_reason.is_some());
        assert_eq!(fx.store.entries_for(tx.transaction_id), 0);
    }

    #[tokio::test]
    async fn test_second_settle_is_already_finalized() {
        let fx = fixture(Rail::Qris);
        let tx = insert(&fx, Rail::Qris, chrono::Duration::minutes(15)).await;
        let confirmed = CheckOutcome::Confirmed { settled_amount: 15_000 };

        fx.coordinator
            .settle(tx.transaction_id, confirmed.clone())
            .await
            .unwrap();
        let again = fx
            .coordinator
            .settle(tx.transaction_id, confirmed)
            .await
            .unwrap();

        assert!(again.is_already_finalized());
        assert_eq!(fx.store.entries_for(tx.transaction_id), 1);
    }

    #[tokio::test]
    async fn test_poll_timeout_is_unconfirmed() {
        let fx = fixture(Rail::Qris);
        let tx = insert(&fx, Rail::Qris, chrono::Duration::minutes(15)).await;
        fx.rail.hang_checks();

        let outcome = fx.coordinator.poll(tx.transaction_id).await.unwrap();
        assert!(matches!(outcome, SettleOutcome::Pending(_)));
        assert_eq!(fx.rail.checks(), 1);
    }

    #[tokio::test]
    async fn test_poll_network_error_is_unconfirmed() {
        let fx = fixture(Rail::Qris);
        let tx = insert(&fx, Rail::Qris, chrono::Duration::minutes(15)).await;
        fx.rail
            .set_outcome(Err(RailError::Network("connection reset".into())));

        let outcome = fx.coordinator.poll(tx.transaction_id).await.unwrap();
        assert!(matches!(outcome, SettleOutcome::Pending(_)));
    }

    #[tokio::test]
    async fn test_read_expires_lazily() {
        let fx = fixture(Rail::Qris);
        let tx = insert(&fx, Rail::Qris, chrono::Duration::milliseconds(-1)).await;

        let read = fx.coordinator.read(tx.transaction_id, None).await.unwrap();
        assert_eq!(read.status, TransactionStatus::Expired);
        assert!(read.finalized_at.is_some());
    }

    #[tokio::test]
    async fn test_read_other_owner_forbidden() {
        let fx = fixture(Rail::Qris);
        let tx = insert(&fx, Rail::Qris, chrono::Duration::minutes(15)).await;

        let err = fx
            .coordinator
            .read(tx.transaction_id, Some(&OwnerId::new("intruder")))
            .await
            .unwrap_err();
        assert!(matches!(err, PurchaseError::Forbidden));
    }

    #[tokio::test]
    async fn test_confirm_rejects_bad_hash() {
        let fx = fixture(Rail::Crypto);
        let tx = insert(&fx, Rail::Crypto, chrono::Duration::minutes(15)).await;

        let err = fx
            .coordinator
            .confirm(tx.transaction_id, None, Some("0x1234"))
            .await
            .unwrap_err();
        assert!(matches!(err, PurchaseError::InvalidTxHash(_)));
    }

    #[tokio::test]
    async fn test_confirm_hash_on_qris_rejected() {
        let fx = fixture(Rail::Qris);
        let tx = insert(&fx, Rail::Qris, chrono::Duration::minutes(15)).await;
        let hash = format!("0x{}", "ab".repeat(32));

        let err = fx
            .coordinator
            .confirm(tx.transaction_id, None, Some(&hash))
            .await
            .unwrap_err();
        assert!(matches!(err, PurchaseError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let fx = fixture(Rail::Qris);
        let err = fx.coordinator.poll(TransactionId::new()).await.unwrap_err();
        assert!(matches!(err, PurchaseError::TransactionNotFound(_)));
    }
}
