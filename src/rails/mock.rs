//! Scripted rail for tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::{CheckOutcome, PaymentAdapter, RailError, RailInitiation, RailInstructions};
use crate::purchase::types::{Rail, Transaction};

pub struct MockRail {
    rail: Rail,
    /// Consumed front to back; `default_outcome` once empty
    script: Mutex<VecDeque<Result<CheckOutcome, RailError>>>,
    default_outcome: Mutex<Result<CheckOutcome, RailError>>,
    fail_initiate: Mutex<Option<RailError>>,
    check_delay: Mutex<Option<Duration>>,
    pub initiate_count: AtomicUsize,
    pub check_count: AtomicUsize,
    hang_checks: AtomicBool,
}

impl MockRail {
    pub fn new(rail: Rail) -> Self {
        Self {
            rail,
            script: Mutex::new(VecDeque::new()),
            default_outcome: Mutex::new(Ok(CheckOutcome::Unconfirmed)),
            fail_initiate: Mutex::new(None),
            check_delay: Mutex::new(None),
            initiate_count: AtomicUsize::new(0),
            check_count: AtomicUsize::new(0),
            hang_checks: AtomicBool::new(false),
        }
    }

    /// Outcome returned by every check once the script is exhausted
    pub fn set_outcome(&self, outcome: Result<CheckOutcome, RailError>) {
        *self.default_outcome.lock().unwrap() = outcome;
    }

    pub fn confirm(&self, settled_amount: u128) {
        self.set_outcome(Ok(CheckOutcome::Confirmed { settled_amount }));
    }

    pub fn push_outcome(&self, outcome: Result<CheckOutcome, RailError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn fail_initiate(&self, error: RailError) {
        *self.fail_initiate.lock().unwrap() = Some(error);
    }

    pub fn set_check_delay(&self, delay: Duration) {
        *self.check_delay.lock().unwrap() = Some(delay);
    }

    /// Checks never return (timeout path)
    pub fn hang_checks(&self) {
        self.hang_checks.store(true, Ordering::SeqCst);
    }

    pub fn checks(&self) -> usize {
        self.check_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentAdapter for MockRail {
    fn rail(&self) -> Rail {
        self.rail
    }

    async fn initiate(&self, tx: &Transaction) -> Result<RailInitiation, RailError> {
        self.initiate_count.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail_initiate.lock().unwrap().clone() {
            return Err(err);
        }

        let reference = format!("mock-{}", tx.transaction_id);
        let instructions = match self.rail {
            Rail::Crypto => RailInstructions::Crypto {
                chain_id: 8453,
                to_address: "0x000000000000000000000000000000000000dead".into(),
                amount_wei: tx.amount.to_string(),
                expires_at: tx.expires_at,
            },
            _ => RailInstructions::Qris {
                qr_string: format!("00020101021226{}", tx.amount),
                qr_url: None,
                gateway_txn_id: reference.clone(),
                expires_at: tx.expires_at,
            },
        };
        Ok(RailInitiation {
            instructions,
            rail_reference: reference,
        })
    }

    async fn check(&self, _tx: &Transaction) -> Result<CheckOutcome, RailError> {
        self.check_count.fetch_add(1, Ordering::SeqCst);

        if self.hang_checks.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let delay = *self.check_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => self.default_outcome.lock().unwrap().clone(),
        }
    }
}
