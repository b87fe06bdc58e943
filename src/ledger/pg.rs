//! PostgreSQL ledger store
//!
//! Status transitions are single conditional `UPDATE`s (CAS); grant
//! application locks the transaction row with `FOR UPDATE` and relies on the
//! unique constraints of `ledger_entries_tb` and `inventory_grants_tb`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::store::{LedgerStore, Transition, hold_of};
use super::types::{AccountBalance, GrantApplied, GrantPlan, InventoryGrant, LedgerEntry};
use crate::purchase::error::PurchaseError;
use crate::purchase::state::{GrantState, TransactionStatus};
use crate::purchase::types::{Currency, OwnerId, PurchaseKind, Rail, Transaction, TransactionId};

const TX_COLUMNS: &str = r#"
    transaction_id, owner_id, kind, rail, amount, currency, credit_delta, item_ref,
    status, grant_state, rail_reference, payer_address, chain_tx_hash, failure_reason,
    created_at, expires_at, finalized_at
"#;

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_transaction(row: &PgRow) -> Result<Transaction, PurchaseError> {
        let id_str: String = row.try_get("transaction_id")?;
        let transaction_id = id_str
            .parse::<TransactionId>()
            .map_err(|e| PurchaseError::DatabaseError(format!("bad transaction_id: {}", e)))?;

        let kind_id: i16 = row.try_get("kind")?;
        let rail_id: i16 = row.try_get("rail")?;
        let status_id: i16 = row.try_get("status")?;
        let grant_id: i16 = row.try_get("grant_state")?;
        let currency: String = row.try_get("currency")?;
        let amount: Decimal = row.try_get("amount")?;

        Ok(Transaction {
            transaction_id,
            owner: OwnerId::new(row.try_get::<String, _>("owner_id")?),
            kind: PurchaseKind::from_id(kind_id)
                .ok_or_else(|| PurchaseError::DatabaseError(format!("bad kind: {}", kind_id)))?,
            rail: Rail::from_id(rail_id)
                .ok_or_else(|| PurchaseError::DatabaseError(format!("bad rail: {}", rail_id)))?,
            amount: decimal_to_amount(amount)?,
            currency: Currency::from_code(&currency).ok_or_else(|| {
                PurchaseError::DatabaseError(format!("bad currency: {}", currency))
            })?,
            credit_delta: row.try_get("credit_delta")?,
            item_ref: row.try_get("item_ref")?,
            status: TransactionStatus::from_id(status_id).ok_or_else(|| {
                PurchaseError::DatabaseError(format!("bad status: {}", status_id))
            })?,
            grant_state: GrantState::from_id(grant_id).ok_or_else(|| {
                PurchaseError::DatabaseError(format!("bad grant_state: {}", grant_id))
            })?,
            rail_reference: row.try_get("rail_reference")?,
            payer_address: row.try_get("payer_address")?,
            chain_tx_hash: row.try_get("chain_tx_hash")?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            finalized_at: row.try_get("finalized_at")?,
        })
    }

    async fn select_transactions(
        &self,
        where_clause: &str,
        bind_owner: Option<&OwnerId>,
        bind_at: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Transaction>, PurchaseError> {
        let sql = format!(
            "SELECT {} FROM purchase_transactions_tb WHERE {} LIMIT {}",
            TX_COLUMNS,
            where_clause,
            limit.min(i64::MAX as usize)
        );
        let mut query = sqlx::query(&sql);
        if let Some(owner) = bind_owner {
            query = query.bind(owner.as_str());
        }
        if let Some(at) = bind_at {
            query = query.bind(at);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_transaction).collect()
    }
}

/// `u128` -> `NUMERIC`
pub fn amount_to_decimal(amount: u128) -> Result<Decimal, PurchaseError> {
    let value = i128::try_from(amount).map_err(|_| PurchaseError::InvalidAmount)?;
    Decimal::try_from_i128_with_scale(value, 0).map_err(|_| PurchaseError::InvalidAmount)
}

/// `NUMERIC` -> `u128`
pub fn decimal_to_amount(value: Decimal) -> Result<u128, PurchaseError> {
    if !value.fract().is_zero() {
        return Err(PurchaseError::DatabaseError(format!(
            "fractional amount: {}",
            value
        )));
    }
    value
        .to_i128()
        .and_then(|v| u128::try_from(v).ok())
        .ok_or_else(|| PurchaseError::DatabaseError(format!("amount out of range: {}", value)))
}

const ITEM_IN_FLIGHT_INDEX: &str = "uq_purchase_item_in_flight";

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

fn violates(e: &sqlx::Error, constraint: &str) -> bool {
    match e {
        sqlx::Error::Database(db) => db.is_unique_violation() && db.constraint() == Some(constraint),
        _ => false,
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), PurchaseError> {
        let hold = hold_of(tx)?;
        let mut db_tx = self.pool.begin().await?;

        if hold > 0 {
            sqlx::query(
                "INSERT INTO credit_accounts_tb (owner_id) VALUES ($1) ON CONFLICT (owner_id) DO NOTHING",
            )
            .bind(tx.owner.as_str())
            .execute(&mut *db_tx)
            .await?;

            let reserved = sqlx::query(
                r#"
                UPDATE credit_accounts_tb
                SET held = held + $2, updated_at = NOW()
                WHERE owner_id = $1 AND balance - held >= $2
                "#,
            )
            .bind(tx.owner.as_str())
            .bind(hold)
            .execute(&mut *db_tx)
            .await?;

            if reserved.rows_affected() == 0 {
                let available: i64 = sqlx::query_scalar(
                    "SELECT balance - held FROM credit_accounts_tb WHERE owner_id = $1",
                )
                .bind(tx.owner.as_str())
                .fetch_one(&mut *db_tx)
                .await?;
                db_tx.rollback().await?;
                return Err(PurchaseError::InsufficientCredits {
                    available,
                    required: hold,
                });
            }
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO purchase_transactions_tb
                (transaction_id, owner_id, kind, rail, amount, currency, credit_delta, item_ref,
                 status, grant_state, rail_reference, payer_address, chain_tx_hash, failure_reason,
                 created_at, expires_at, finalized_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(tx.transaction_id.to_string())
        .bind(tx.owner.as_str())
        .bind(tx.kind.id())
        .bind(tx.rail.id())
        .bind(amount_to_decimal(tx.amount)?)
        .bind(tx.currency.as_str())
        .bind(tx.credit_delta)
        .bind(&tx.item_ref)
        .bind(tx.status.id())
        .bind(tx.grant_state.id())
        .bind(&tx.rail_reference)
        .bind(&tx.payer_address)
        .bind(&tx.chain_tx_hash)
        .bind(&tx.failure_reason)
        .bind(tx.created_at)
        .bind(tx.expires_at)
        .bind(tx.finalized_at)
        .execute(&mut *db_tx)
        .await;

        match inserted {
            Ok(_) => {}
            // Dropping db_tx rolls back the hold as well
            Err(e) if violates(&e, ITEM_IN_FLIGHT_INDEX) => {
                return Err(PurchaseError::ItemPurchaseInProgress(
                    tx.item_ref.clone().unwrap_or_default(),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        db_tx.commit().await?;
        Ok(())
    }

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<Transaction>, PurchaseError> {
        let sql = format!(
            "SELECT {} FROM purchase_transactions_tb WHERE transaction_id = $1",
            TX_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_transaction(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_transactions(
        &self,
        owner: &OwnerId,
        limit: usize,
    ) -> Result<Vec<Transaction>, PurchaseError> {
        self.select_transactions(
            "owner_id = $1 ORDER BY created_at DESC, transaction_id DESC",
            Some(owner),
            None,
            limit,
        )
        .await
    }

    async fn attach_rail_reference(
        &self,
        id: TransactionId,
        reference: &str,
    ) -> Result<bool, PurchaseError> {
        let result = sqlx::query(
            "UPDATE purchase_transactions_tb SET rail_reference = $1 WHERE transaction_id = $2 AND status = $3",
        )
        .bind(reference)
        .bind(id.to_string())
        .bind(TransactionStatus::Pending.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn attach_chain_tx_hash(
        &self,
        id: TransactionId,
        hash: &str,
    ) -> Result<bool, PurchaseError> {
        match self.chain_tx_hash_holder(hash).await? {
            Some(holder) if holder == id => return Ok(true),
            Some(_) => return Err(PurchaseError::TxHashInUse),
            None => {}
        }

        let result = sqlx::query(
            r#"
            UPDATE purchase_transactions_tb
            SET chain_tx_hash = $1
            WHERE transaction_id = $2 AND status = $3 AND chain_tx_hash IS NULL
            "#,
        )
        .bind(hash)
        .bind(id.to_string())
        .bind(TransactionStatus::Pending.id())
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) => Ok(r.rows_affected() == 1),
            // Lost a race with another transaction claiming the same hash
            Err(e) if is_unique_violation(&e) => Err(PurchaseError::TxHashInUse),
            Err(e) => Err(e.into()),
        }
    }

    async fn chain_tx_hash_holder(
        &self,
        hash: &str,
    ) -> Result<Option<TransactionId>, PurchaseError> {
        let holder: Option<String> = sqlx::query_scalar(
            "SELECT transaction_id FROM purchase_transactions_tb WHERE chain_tx_hash = $1 AND status IN (0, 10)",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        holder
            .map(|id| {
                id.parse::<TransactionId>().map_err(|e| {
                    PurchaseError::DatabaseError(format!("bad transaction_id: {}", e))
                })
            })
            .transpose()
    }

    async fn transition_if_pending(
        &self,
        id: TransactionId,
        transition: Transition,
    ) -> Result<bool, PurchaseError> {
        let mut db_tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE purchase_transactions_tb
            SET status = $1,
                grant_state = CASE WHEN $1 = $6 THEN $7 ELSE grant_state END,
                failure_reason = $2,
                finalized_at = $3
            WHERE transaction_id = $4
              AND status = $5
              AND ($8 = FALSE OR expires_at > $3)
            RETURNING owner_id, rail, amount
            "#,
        )
        .bind(transition.to.id())
        .bind(&transition.reason)
        .bind(transition.at)
        .bind(id.to_string())
        .bind(TransactionStatus::Pending.id())
        .bind(TransactionStatus::Settled.id())
        .bind(GrantState::PendingApply.id())
        .bind(transition.require_unexpired)
        .fetch_optional(&mut *db_tx)
        .await?;

        let Some(row) = row else {
            db_tx.rollback().await?;
            return Ok(false);
        };

        let rail_id: i16 = row.try_get("rail")?;
        if transition.to != TransactionStatus::Settled && rail_id == Rail::Balance.id() {
            let owner: String = row.try_get("owner_id")?;
            let amount = decimal_to_amount(row.try_get("amount")?)?;
            let release = i64::try_from(amount).map_err(|_| PurchaseError::InvalidAmount)?;
            sqlx::query(
                "UPDATE credit_accounts_tb SET held = held - $2, updated_at = NOW() WHERE owner_id = $1",
            )
            .bind(owner)
            .bind(release)
            .execute(&mut *db_tx)
            .await?;
        }

        db_tx.commit().await?;
        Ok(true)
    }

    async fn apply_grant(
        &self,
        plan: &GrantPlan,
        at: DateTime<Utc>,
    ) -> Result<GrantApplied, PurchaseError> {
        let mut db_tx = self.pool.begin().await?;
        let id = plan.transaction_id.to_string();

        let row = sqlx::query(
            "SELECT status, grant_state FROM purchase_transactions_tb WHERE transaction_id = $1 FOR UPDATE",
        )
        .bind(&id)
        .fetch_optional(&mut *db_tx)
        .await?
        .ok_or_else(|| PurchaseError::TransactionNotFound(id.clone()))?;

        let status = TransactionStatus::from_id(row.try_get("status")?);
        let grant = GrantState::from_id(row.try_get("grant_state")?);
        match (status, grant) {
            (Some(TransactionStatus::Settled), Some(GrantState::Applied)) => {
                db_tx.rollback().await?;
                return Ok(GrantApplied::AlreadyApplied);
            }
            (Some(TransactionStatus::Settled), Some(GrantState::PendingApply)) => {}
            (status, grant) => {
                db_tx.rollback().await?;
                return Err(PurchaseError::InvalidStateTransition(format!(
                    "grant on {:?} transaction with grant state {:?}",
                    status, grant
                )));
            }
        }

        let mut item_granted = false;
        if let Some(item_ref) = &plan.item_ref {
            let inserted = sqlx::query(
                r#"
                INSERT INTO inventory_grants_tb (owner_id, item_ref, acquired_via, acquired_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (owner_id, item_ref) DO NOTHING
                "#,
            )
            .bind(plan.owner.as_str())
            .bind(item_ref)
            .bind(&id)
            .bind(at)
            .execute(&mut *db_tx)
            .await?;
            item_granted = inserted.rows_affected() == 1;
        }

        // Already-owned item bought from balance: release the hold, no debit
        let ledger_delta = if plan.item_ref.is_some() && !item_granted && plan.held_credits > 0 {
            0
        } else {
            plan.ledger_delta
        };

        if ledger_delta != 0 {
            sqlx::query(
                r#"
                INSERT INTO ledger_entries_tb (transaction_id, owner_id, delta, created_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&id)
            .bind(plan.owner.as_str())
            .bind(ledger_delta)
            .bind(at)
            .execute(&mut *db_tx)
            .await?;
        }

        if ledger_delta != 0 || plan.held_credits != 0 {
            // Row first, then a plain UPDATE: CHECKs would reject a negative insert row
            sqlx::query(
                "INSERT INTO credit_accounts_tb (owner_id) VALUES ($1) ON CONFLICT (owner_id) DO NOTHING",
            )
            .bind(plan.owner.as_str())
            .execute(&mut *db_tx)
            .await?;

            let updated = sqlx::query(
                r#"
                UPDATE credit_accounts_tb
                SET balance = balance + $2, held = held - $3, updated_at = NOW()
                WHERE owner_id = $1
                "#,
            )
            .bind(plan.owner.as_str())
            .bind(ledger_delta)
            .bind(plan.held_credits)
            .execute(&mut *db_tx)
            .await?;
            if updated.rows_affected() != 1 {
                return Err(PurchaseError::DatabaseError(format!(
                    "credit account {} not updated",
                    plan.owner
                )));
            }
        }

        sqlx::query("UPDATE purchase_transactions_tb SET grant_state = $1 WHERE transaction_id = $2")
            .bind(GrantState::Applied.id())
            .bind(&id)
            .execute(&mut *db_tx)
            .await?;

        db_tx.commit().await?;
        Ok(GrantApplied::Applied {
            item_granted,
            ledger_delta,
        })
    }

    async fn account(&self, owner: &OwnerId) -> Result<AccountBalance, PurchaseError> {
        let row = sqlx::query("SELECT balance, held FROM credit_accounts_tb WHERE owner_id = $1")
            .bind(owner.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(AccountBalance {
                balance: row.try_get("balance")?,
                held: row.try_get("held")?,
            }),
            None => Ok(AccountBalance::default()),
        }
    }

    async fn recompute_balance(&self, owner: &OwnerId) -> Result<i64, PurchaseError> {
        let sum: Option<Decimal> =
            sqlx::query_scalar("SELECT SUM(delta) FROM ledger_entries_tb WHERE owner_id = $1")
                .bind(owner.as_str())
                .fetch_one(&self.pool)
                .await?;

        match sum {
            Some(sum) => sum.to_i64().ok_or_else(|| {
                PurchaseError::DatabaseError(format!("ledger sum out of range: {}", sum))
            }),
            None => Ok(0),
        }
    }

    async fn ledger_entries(&self, owner: &OwnerId) -> Result<Vec<LedgerEntry>, PurchaseError> {
        let rows = sqlx::query(
            r#"
            SELECT transaction_id, owner_id, delta, created_at
            FROM ledger_entries_tb
            WHERE owner_id = $1
            ORDER BY entry_id
            "#,
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("transaction_id")?;
                Ok(LedgerEntry {
                    transaction_id: id.parse().map_err(|e| {
                        PurchaseError::DatabaseError(format!("bad transaction_id: {}", e))
                    })?,
                    owner: OwnerId::new(row.try_get::<String, _>("owner_id")?),
                    delta: row.try_get("delta")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn inventory(&self, owner: &OwnerId) -> Result<Vec<InventoryGrant>, PurchaseError> {
        let rows = sqlx::query(
            r#"
            SELECT owner_id, item_ref, acquired_via, acquired_at
            FROM inventory_grants_tb
            WHERE owner_id = $1
            ORDER BY acquired_at
            "#,
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let via: String = row.try_get("acquired_via")?;
                Ok(InventoryGrant {
                    owner: OwnerId::new(row.try_get::<String, _>("owner_id")?),
                    item_ref: row.try_get("item_ref")?,
                    acquired_via: via.parse().map_err(|e| {
                        PurchaseError::DatabaseError(format!("bad acquired_via: {}", e))
                    })?,
                    acquired_at: row.try_get("acquired_at")?,
                })
            })
            .collect()
    }

    async fn owns_item(&self, owner: &OwnerId, item_ref: &str) -> Result<bool, PurchaseError> {
        let owned: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM inventory_grants_tb WHERE owner_id = $1 AND item_ref = $2)",
        )
        .bind(owner.as_str())
        .bind(item_ref)
        .fetch_one(&self.pool)
        .await?;
        Ok(owned)
    }

    async fn find_overdue_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transaction>, PurchaseError> {
        self.select_transactions(
            "status = 0 AND expires_at <= $1 ORDER BY expires_at",
            None,
            Some(now),
            limit,
        )
        .await
    }

    async fn find_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transaction>, PurchaseError> {
        self.select_transactions(
            "status = 0 AND created_at < $1 ORDER BY created_at",
            None,
            Some(created_before),
            limit,
        )
        .await
    }

    async fn find_grant_pending(&self, limit: usize) -> Result<Vec<Transaction>, PurchaseError> {
        self.select_transactions(
            "status = 10 AND grant_state = 1 ORDER BY finalized_at",
            None,
            None,
            limit,
        )
        .await
    }

    async fn ping(&self) -> Result<(), PurchaseError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
