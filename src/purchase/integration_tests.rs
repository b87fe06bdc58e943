//! End-to-end purchase flows against the in-memory store and scripted rails.

use std::sync::Arc;
use std::time::Duration;

use crate::catalog::StaticCatalog;
use crate::config::{CatalogConfig, CatalogItemConfig, CreditPackageConfig};
use crate::ledger::{LedgerStore, MemoryLedgerStore};
use crate::purchase::coordinator::{ReconciliationCoordinator, SettleOutcome};
use crate::purchase::error::PurchaseError;
use crate::purchase::service::PurchaseService;
use crate::purchase::state::{GrantState, TransactionStatus};
use crate::purchase::types::{OwnerId, PurchaseKind, PurchaseRequest, Rail};
use crate::rails::mock::MockRail;
use crate::rails::{CheckOutcome, RailAdapters, RailError, RailInstructions};

const WEI_PRICE: u128 = 300_000_000_000_000;
const PAYER: &str = "0x1111111111111111111111111111111111111111";

struct TestHarness {
    store: Arc<MemoryLedgerStore>,
    qris: Arc<MockRail>,
    crypto: Arc<MockRail>,
    coordinator: Arc<ReconciliationCoordinator>,
    service: PurchaseService,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_ttl(Duration::from_secs(15 * 60))
    }

    fn with_ttl(ttl: Duration) -> Self {
        let store = Arc::new(MemoryLedgerStore::new());
        let qris = Arc::new(MockRail::new(Rail::Qris));
        let crypto = Arc::new(MockRail::new(Rail::Crypto));
        let rails = RailAdapters::new()
            .with_qris(qris.clone())
            .with_crypto(crypto.clone());

        let coordinator = Arc::new(ReconciliationCoordinator::new(
            store.clone(),
            rails,
            Duration::from_millis(500),
        ));
        let catalog = StaticCatalog::from_config(&catalog_config()).unwrap();
        let service = PurchaseService::new(
            store.clone(),
            Arc::new(catalog),
            coordinator.clone(),
            ttl,
            Duration::from_millis(500),
        );

        Self {
            store,
            qris,
            crypto,
            coordinator,
            service,
        }
    }

    fn credits_via(&self, rail: Rail, quoted: u128) -> PurchaseRequest {
        PurchaseRequest {
            owner: reader(),
            kind: PurchaseKind::CreditPurchase,
            rail,
            product_id: "credits_100".into(),
            quoted_amount: quoted,
            payer_address: (rail == Rail::Crypto).then(|| PAYER.to_string()),
        }
    }

    fn item_via(&self, rail: Rail, item_ref: &str, quoted: u128) -> PurchaseRequest {
        PurchaseRequest {
            owner: reader(),
            kind: PurchaseKind::ItemPurchase,
            rail,
            product_id: item_ref.into(),
            quoted_amount: quoted,
            payer_address: None,
        }
    }

    async fn balance(&self) -> i64 {
        self.store.account(&reader()).await.unwrap().balance
    }
}

fn reader() -> OwnerId {
    OwnerId::new("reader-1")
}

fn catalog_config() -> CatalogConfig {
    CatalogConfig {
        credit_packages: vec![CreditPackageConfig {
            package_id: "credits_100".into(),
            credits: 100,
            price_idr: Some(15_000),
            price_wei: Some(WEI_PRICE.to_string()),
        }],
        items: vec![
            CatalogItemConfig {
                item_ref: "frame_sakura".into(),
                name: "Sakura Avatar Frame".into(),
                price_credits: Some(60),
                price_idr: Some(9_000),
                price_wei: None,
            },
            CatalogItemConfig {
                item_ref: "badge_gold".into(),
                name: "Gold Reader Badge".into(),
                price_credits: Some(60),
                price_idr: None,
                price_wei: None,
            },
        ],
    }
}

fn tx_hash(byte: &str) -> String {
    format!("0x{}", byte.repeat(32))
}

// ========================================================================
// Happy Path Tests
// ========================================================================

#[tokio::test]
async fn test_qris_credit_purchase_settles() {
    let h = TestHarness::new();

    let receipt = h
        .service
        .initiate_purchase(h.credits_via(Rail::Qris, 15_000))
        .await
        .unwrap();
    let id = receipt.transaction.transaction_id;
    assert_eq!(receipt.transaction.status, TransactionStatus::Pending);
    assert!(matches!(receipt.instructions, RailInstructions::Qris { .. }));
    assert_eq!(
        receipt.transaction.rail_reference.as_deref(),
        Some(format!("mock-{}", id).as_str())
    );

    // gateway has not seen the payment yet
    let outcome = h.coordinator.confirm(id, Some(&reader()), None).await.unwrap();
    assert!(matches!(outcome, SettleOutcome::Pending(_)));

    h.qris.confirm(15_000);
    let outcome = h.coordinator.confirm(id, Some(&reader()), None).await.unwrap();
    assert!(matches!(outcome, SettleOutcome::Finalized(_)));

    let tx = outcome.into_transaction();
    assert_eq!(tx.status, TransactionStatus::Settled);
    assert_eq!(tx.grant_state, GrantState::Applied);
    assert!(tx.finalized_at.is_some());
    assert_eq!(h.balance().await, 100);
    assert_eq!(h.store.entries_for(id), 1);
}

#[tokio::test]
async fn test_crypto_purchase_settles_via_webhook() {
    let h = TestHarness::new();

    let receipt = h
        .service
        .initiate_purchase(h.credits_via(Rail::Crypto, WEI_PRICE))
        .await
        .unwrap();
    let id = receipt.transaction.transaction_id;
    match &receipt.instructions {
        RailInstructions::Crypto { amount_wei, .. } => {
            assert_eq!(amount_wei, &WEI_PRICE.to_string())
        }
        other => panic!("unexpected instructions: {:?}", other),
    }

    // client submits the hash, chain not yet confirmed
    let outcome = h
        .coordinator
        .confirm(id, Some(&reader()), Some(&tx_hash("ab")))
        .await
        .unwrap();
    assert!(matches!(outcome, SettleOutcome::Pending(_)));

    // webhook glue: no owner, no hash
    h.crypto.confirm(WEI_PRICE);
    let outcome = h.coordinator.confirm(id, None, None).await.unwrap();
    assert_eq!(outcome.transaction().status, TransactionStatus::Settled);
    assert_eq!(
        outcome.transaction().chain_tx_hash.as_deref(),
        Some(tx_hash("ab").as_str())
    );
    assert_eq!(h.balance().await, 100);
}

#[tokio::test]
async fn test_balance_item_purchase() {
    let h = TestHarness::new();
    h.store.seed_balance(&reader(), 100);

    let receipt = h
        .service
        .initiate_purchase(h.item_via(Rail::Balance, "frame_sakura", 60))
        .await
        .unwrap();

    assert_eq!(receipt.transaction.status, TransactionStatus::Settled);
    assert_eq!(receipt.transaction.grant_state, GrantState::Applied);
    assert_eq!(
        receipt.instructions,
        RailInstructions::Balance {
            debited_credits: 60
        }
    );

    let view = h.service.balance(&reader()).await.unwrap();
    assert_eq!(view.balance, 40);
    assert_eq!(view.held, 0);
    assert_eq!(view.available, 40);
    assert_eq!(view.derived_balance, 40);

    let inventory = h.service.inventory(&reader()).await.unwrap();
    assert_eq!(inventory.len(), 1);
    assert_eq!(inventory[0].item_ref, "frame_sakura");
    assert_eq!(inventory[0].acquired_via, receipt.transaction.transaction_id);
}

#[tokio::test]
async fn test_qris_item_purchase_grants_without_ledger_entry() {
    let h = TestHarness::new();

    let receipt = h
        .service
        .initiate_purchase(h.item_via(Rail::Qris, "frame_sakura", 9_000))
        .await
        .unwrap();
    h.qris.confirm(9_000);
    let outcome = h
        .coordinator
        .confirm(receipt.transaction.transaction_id, Some(&reader()), None)
        .await
        .unwrap();

    assert_eq!(outcome.transaction().status, TransactionStatus::Settled);
    assert!(h.store.owns_item(&reader(), "frame_sakura").await.unwrap());
    assert_eq!(h.store.entries_for(receipt.transaction.transaction_id), 0);
    assert_eq!(h.balance().await, 0);
}

// ========================================================================
// Validation Tests (nothing persisted)
// ========================================================================

#[tokio::test]
async fn test_insufficient_credits_persists_nothing() {
    let h = TestHarness::new();
    h.store.seed_balance(&reader(), 10);

    let err = h
        .service
        .initiate_purchase(h.item_via(Rail::Balance, "frame_sakura", 60))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PurchaseError::InsufficientCredits {
            available: 10,
            required: 60
        }
    ));
    assert!(h.service.history(&reader(), 10).await.unwrap().is_empty());
    assert_eq!(h.balance().await, 10);
}

#[tokio::test]
async fn test_stale_price_rejected() {
    let h = TestHarness::new();

    let err = h
        .service
        .initiate_purchase(h.credits_via(Rail::Qris, 14_000))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PurchaseError::PriceMismatch {
            expected: 15_000,
            quoted: 14_000
        }
    ));
    assert!(h.service.history(&reader(), 10).await.unwrap().is_empty());
    assert_eq!(h.qris.initiate_count.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_products_and_rails() {
    let h = TestHarness::new();

    let mut req = h.credits_via(Rail::Qris, 15_000);
    req.product_id = "credits_9000".into();
    assert!(matches!(
        h.service.initiate_purchase(req).await,
        Err(PurchaseError::UnknownPackage(_))
    ));

    assert!(matches!(
        h.service
            .initiate_purchase(h.item_via(Rail::Qris, "no_such_item", 1))
            .await,
        Err(PurchaseError::UnknownItem(_))
    ));

    // credits cannot buy credits
    assert!(matches!(
        h.service
            .initiate_purchase(h.credits_via(Rail::Balance, 100))
            .await,
        Err(PurchaseError::UnsupportedRail(_))
    ));

    // badge_gold has no fiat price
    assert!(matches!(
        h.service
            .initiate_purchase(h.item_via(Rail::Qris, "badge_gold", 9_000))
            .await,
        Err(PurchaseError::UnsupportedRail(_))
    ));

    assert!(matches!(
        h.service
            .initiate_purchase(h.credits_via(Rail::Qris, 0))
            .await,
        Err(PurchaseError::InvalidAmount)
    ));
}

#[tokio::test]
async fn test_duplicate_item_rejected() {
    let h = TestHarness::new();
    h.store.seed_balance(&reader(), 200);

    h.service
        .initiate_purchase(h.item_via(Rail::Balance, "badge_gold", 60))
        .await
        .unwrap();
    let err = h
        .service
        .initiate_purchase(h.item_via(Rail::Balance, "badge_gold", 60))
        .await
        .unwrap_err();

    assert!(matches!(err, PurchaseError::ItemAlreadyOwned(_)));
    assert_eq!(h.balance().await, 140);
}

// ========================================================================
// Failure Path Tests
// ========================================================================

#[tokio::test]
async fn test_underpaid_qris_fails() {
    let h = TestHarness::new();

    let receipt = h
        .service
        .initiate_purchase(h.credits_via(Rail::Qris, 15_000))
        .await
        .unwrap();
    h.qris.confirm(10_000);

    let outcome = h
        .coordinator
        .poll(receipt.transaction.transaction_id)
        .await
        .unwrap();
    let tx = outcome.transaction();
    assert_eq!(tx.status, TransactionStatus::Failed);
    assert_eq!(tx.grant_state, GrantState::None);
    assert_eq!(h.balance().await, 0);
    assert_eq!(h.store.entries_for(tx.transaction_id), 0);
}

#[tokio::test]
async fn test_provider_rejection_fails() {
    let h = TestHarness::new();

    let receipt = h
        .service
        .initiate_purchase(h.credits_via(Rail::Qris, 15_000))
        .await
        .unwrap();
    h.qris
        .set_outcome(Ok(CheckOutcome::Rejected("DENY".into())));

    let outcome = h
        .coordinator
        .poll(receipt.transaction.transaction_id)
        .await
        .unwrap();
    assert_eq!(outcome.transaction().status, TransactionStatus::Failed);
    assert_eq!(
        outcome.transaction().failure_reason.as_deref(),
        Some("DENY")
    );
}

#[tokio::test]
async fn test_initiate_failure_finalizes_failed() {
    let h = TestHarness::new();
    h.qris.fail_initiate(RailError::Timeout);

    let err = h
        .service
        .initiate_purchase(h.credits_via(Rail::Qris, 15_000))
        .await
        .unwrap_err();
    assert!(matches!(err, PurchaseError::ProviderTimeout(_)));

    let history = h.service.history(&reader(), 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, TransactionStatus::Failed);
}

#[tokio::test]
async fn test_initiate_network_error_is_unavailable() {
    let h = TestHarness::new();
    h.crypto
        .fail_initiate(RailError::Network("connection refused".into()));

    let err = h
        .service
        .initiate_purchase(h.credits_via(Rail::Crypto, WEI_PRICE))
        .await
        .unwrap_err();
    assert!(matches!(err, PurchaseError::ProviderUnavailable(_)));
}

#[tokio::test]
async fn test_grant_failure_retried_on_read() {
    let h = TestHarness::new();

    let receipt = h
        .service
        .initiate_purchase(h.credits_via(Rail::Qris, 15_000))
        .await
        .unwrap();
    let id = receipt.transaction.transaction_id;

    h.store.set_fail_grants(true);
    h.qris.confirm(15_000);
    let err = h.coordinator.poll(id).await.unwrap_err();
    assert!(matches!(err, PurchaseError::GrantApplyFailure(_)));

    // settled is recorded even though the grant failed
    let tx = h.coordinator.read(id, Some(&reader())).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Settled);
    assert_eq!(tx.grant_state, GrantState::PendingApply);
    assert_eq!(h.balance().await, 0);

    h.store.set_fail_grants(false);
    let tx = h.coordinator.read(id, Some(&reader())).await.unwrap();
    assert_eq!(tx.grant_state, GrantState::Applied);
    assert_eq!(h.balance().await, 100);

    // later polls do not re-settle or re-grant
    let again = h.coordinator.poll(id).await.unwrap();
    assert!(again.is_already_finalized());
    assert_eq!(h.store.entries_for(id), 1);
}

// ========================================================================
// Race & Expiry Tests
// ========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_settle() {
    let h = TestHarness::new();
    let receipt = h
        .service
        .initiate_purchase(h.credits_via(Rail::Qris, 15_000))
        .await
        .unwrap();
    let id = receipt.transaction.transaction_id;

    let confirmed = CheckOutcome::Confirmed {
        settled_amount: 15_000,
    };
    let a = {
        let coordinator = h.coordinator.clone();
        let outcome = confirmed.clone();
        tokio::spawn(async move { coordinator.settle(id, outcome).await })
    };
    let b = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.settle(id, confirmed).await })
    };

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    let finalized = [&a, &b]
        .iter()
        .filter(|o| matches!(o, SettleOutcome::Finalized(_)))
        .count();
    let already = [&a, &b]
        .iter()
        .filter(|o| o.is_already_finalized())
        .count();
    assert_eq!(finalized, 1);
    assert_eq!(already, 1);
    assert_eq!(h.store.entries_for(id), 1);
    assert_eq!(h.balance().await, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_polls_credit_once() {
    let h = TestHarness::new();
    let receipt = h
        .service
        .initiate_purchase(h.credits_via(Rail::Qris, 15_000))
        .await
        .unwrap();
    let id = receipt.transaction.transaction_id;
    h.qris.set_check_delay(Duration::from_millis(20));
    h.qris.confirm(15_000);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.poll(id).await })
        })
        .collect();

    let mut finalized = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.transaction().status, TransactionStatus::Settled);
        if matches!(outcome, SettleOutcome::Finalized(_)) {
            finalized += 1;
        }
    }

    assert_eq!(finalized, 1);
    assert_eq!(h.store.entries_for(id), 1);
    assert_eq!(h.balance().await, 100);
}

#[tokio::test]
async fn test_ttl_wins_over_late_confirmation() {
    let h = TestHarness::with_ttl(Duration::from_millis(150));
    let receipt = h
        .service
        .initiate_purchase(h.credits_via(Rail::Qris, 15_000))
        .await
        .unwrap();
    let id = receipt.transaction.transaction_id;

    // unconfirmed while the TTL runs
    for _ in 0..2 {
        let outcome = h.coordinator.poll(id).await.unwrap();
        assert!(matches!(outcome, SettleOutcome::Pending(_)));
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    h.qris.confirm(15_000);

    let outcome = h.coordinator.poll(id).await.unwrap();
    assert_eq!(outcome.transaction().status, TransactionStatus::Expired);
    assert_eq!(h.balance().await, 0);
    assert_eq!(h.store.entries_for(id), 0);
}

#[tokio::test]
async fn test_terminal_status_is_sticky() {
    let h = TestHarness::new();
    let receipt = h
        .service
        .initiate_purchase(h.credits_via(Rail::Qris, 15_000))
        .await
        .unwrap();
    let id = receipt.transaction.transaction_id;

    h.coordinator
        .settle(
            id,
            CheckOutcome::Confirmed {
                settled_amount: 15_000,
            },
        )
        .await
        .unwrap();

    for late in [
        CheckOutcome::Rejected("CANCELLED".into()),
        CheckOutcome::Confirmed {
            settled_amount: 10_000,
        },
        CheckOutcome::Unconfirmed,
    ] {
        let outcome = h.coordinator.settle(id, late).await.unwrap();
        assert!(outcome.is_already_finalized());
        assert_eq!(outcome.transaction().status, TransactionStatus::Settled);
    }

    let read = h.coordinator.read(id, None).await.unwrap();
    assert_eq!(read.status, TransactionStatus::Settled);
    assert_eq!(h.store.entries_for(id), 1);
}

#[tokio::test]
async fn test_tx_hash_cannot_pay_twice() {
    let h = TestHarness::new();
    let first = h
        .service
        .initiate_purchase(h.credits_via(Rail::Crypto, WEI_PRICE))
        .await
        .unwrap();
    let second = h
        .service
        .initiate_purchase(h.credits_via(Rail::Crypto, WEI_PRICE))
        .await
        .unwrap();

    h.coordinator
        .confirm(
            first.transaction.transaction_id,
            Some(&reader()),
            Some(&tx_hash("cd")),
        )
        .await
        .unwrap();
    let err = h
        .coordinator
        .confirm(
            second.transaction.transaction_id,
            Some(&reader()),
            Some(&tx_hash("cd")),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PurchaseError::TxHashInUse));
}

#[tokio::test]
async fn test_crypto_purchase_requires_payer_address() {
    let h = TestHarness::new();
    let mut req = h.credits_via(Rail::Crypto, WEI_PRICE);
    req.payer_address = None;

    let err = h.service.initiate_purchase(req).await.unwrap_err();
    assert!(matches!(err, PurchaseError::InvalidRequest(_)));
    assert!(h.service.history(&reader(), 10).await.unwrap().is_empty());
}

fn stranger_credits_request(h: &TestHarness) -> PurchaseRequest {
    let mut req = h.credits_via(Rail::Crypto, WEI_PRICE);
    req.owner = OwnerId::new("reader-2");
    req.payer_address = Some("0x3333333333333333333333333333333333333333".into());
    req
}

#[tokio::test]
async fn test_failed_claim_releases_tx_hash_to_real_payer() {
    let h = TestHarness::new();
    let stranger = h
        .service
        .initiate_purchase(stranger_credits_request(&h))
        .await
        .unwrap();
    let payer = h
        .service
        .initiate_purchase(h.credits_via(Rail::Crypto, WEI_PRICE))
        .await
        .unwrap();

    // the stranger submits the payer's public hash; the chain shows another sender
    h.crypto.push_outcome(Ok(CheckOutcome::Rejected(
        "sender is not the expected payer".into(),
    )));
    let outcome = h
        .coordinator
        .confirm(
            stranger.transaction.transaction_id,
            Some(&OwnerId::new("reader-2")),
            Some(&tx_hash("ee")),
        )
        .await
        .unwrap();
    assert_eq!(outcome.transaction().status, TransactionStatus::Failed);

    h.crypto.confirm(WEI_PRICE);
    let outcome = h
        .coordinator
        .confirm(
            payer.transaction.transaction_id,
            Some(&reader()),
            Some(&tx_hash("ee")),
        )
        .await
        .unwrap();
    assert_eq!(outcome.transaction().status, TransactionStatus::Settled);
    assert_eq!(h.balance().await, 100);
    assert_eq!(
        h.store
            .account(&OwnerId::new("reader-2"))
            .await
            .unwrap()
            .balance,
        0
    );
}

#[tokio::test]
async fn test_pending_hash_holder_is_checked_before_claim() {
    let h = TestHarness::new();
    let stranger = h
        .service
        .initiate_purchase(stranger_credits_request(&h))
        .await
        .unwrap();
    let payer = h
        .service
        .initiate_purchase(h.credits_via(Rail::Crypto, WEI_PRICE))
        .await
        .unwrap();

    // stranger grabs the hash while the chain still reports nothing
    let outcome = h
        .coordinator
        .confirm(
            stranger.transaction.transaction_id,
            Some(&OwnerId::new("reader-2")),
            Some(&tx_hash("ee")),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, SettleOutcome::Pending(_)));

    // the holder is re-checked first and fails on the sender, then the payer settles
    h.crypto.push_outcome(Ok(CheckOutcome::Rejected(
        "sender is not the expected payer".into(),
    )));
    h.crypto.confirm(WEI_PRICE);
    let outcome = h
        .coordinator
        .confirm(
            payer.transaction.transaction_id,
            Some(&reader()),
            Some(&tx_hash("ee")),
        )
        .await
        .unwrap();
    assert_eq!(outcome.transaction().status, TransactionStatus::Settled);
    assert_eq!(h.balance().await, 100);

    let stranger_tx = h
        .coordinator
        .read(stranger.transaction.transaction_id, None)
        .await
        .unwrap();
    assert_eq!(stranger_tx.status, TransactionStatus::Failed);
}

#[tokio::test]
async fn test_item_cannot_be_bought_twice_while_pending() {
    let h = TestHarness::new();
    let first = h
        .service
        .initiate_purchase(h.item_via(Rail::Qris, "frame_sakura", 9_000))
        .await
        .unwrap();

    let err = h
        .service
        .initiate_purchase(h.item_via(Rail::Qris, "frame_sakura", 9_000))
        .await
        .unwrap_err();
    assert!(matches!(err, PurchaseError::ItemPurchaseInProgress(_)));
    assert_eq!(h.service.history(&reader(), 10).await.unwrap().len(), 1);
    assert_eq!(h.qris.initiate_count.load(std::sync::atomic::Ordering::SeqCst), 1);

    h.qris.confirm(9_000);
    let outcome = h
        .coordinator
        .confirm(first.transaction.transaction_id, Some(&reader()), None)
        .await
        .unwrap();
    assert_eq!(outcome.transaction().status, TransactionStatus::Settled);

    let err = h
        .service
        .initiate_purchase(h.item_via(Rail::Qris, "frame_sakura", 9_000))
        .await
        .unwrap_err();
    assert!(matches!(err, PurchaseError::ItemAlreadyOwned(_)));
    assert_eq!(h.service.inventory(&reader()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_item_purchase_allowed_again_after_failure() {
    let h = TestHarness::new();
    let first = h
        .service
        .initiate_purchase(h.item_via(Rail::Qris, "frame_sakura", 9_000))
        .await
        .unwrap();

    h.qris.push_outcome(Ok(CheckOutcome::Rejected("DENY".into())));
    h.coordinator
        .poll(first.transaction.transaction_id)
        .await
        .unwrap();

    let retry = h
        .service
        .initiate_purchase(h.item_via(Rail::Qris, "frame_sakura", 9_000))
        .await
        .unwrap();
    assert_eq!(retry.transaction.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn test_confirm_by_other_owner_forbidden() {
    let h = TestHarness::new();
    let receipt = h
        .service
        .initiate_purchase(h.credits_via(Rail::Qris, 15_000))
        .await
        .unwrap();

    let err = h
        .coordinator
        .confirm(
            receipt.transaction.transaction_id,
            Some(&OwnerId::new("someone-else")),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PurchaseError::Forbidden));
    assert_eq!(h.qris.checks(), 0);
}
