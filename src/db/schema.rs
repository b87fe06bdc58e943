//! Table definitions
//!
//! Unique constraints carry the idempotency guarantees:
//! - one ledger entry per transaction (`ledger_entries_tb.transaction_id`)
//! - one grant per `(owner_id, item_ref)`
//! - one pending or settled purchase per on-chain tx hash
//! - one in-flight purchase per `(owner_id, item_ref)`
//!
//! The partial index predicates use the numeric status ids
//! (0 pending, 10 settled) and grant state ids (1 pending_apply).

use sqlx::PgPool;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS purchase_transactions_tb (
        transaction_id  VARCHAR(26) PRIMARY KEY,
        owner_id        VARCHAR(128) NOT NULL,
        kind            SMALLINT NOT NULL,
        rail            SMALLINT NOT NULL,
        amount          NUMERIC(39, 0) NOT NULL CHECK (amount > 0),
        currency        VARCHAR(8) NOT NULL,
        credit_delta    BIGINT NOT NULL DEFAULT 0,
        item_ref        VARCHAR(128),
        status          SMALLINT NOT NULL,
        grant_state     SMALLINT NOT NULL DEFAULT 0,
        rail_reference  VARCHAR(256),
        payer_address   VARCHAR(42),
        chain_tx_hash   VARCHAR(66),
        failure_reason  TEXT,
        created_at      TIMESTAMPTZ NOT NULL,
        expires_at      TIMESTAMPTZ NOT NULL,
        finalized_at    TIMESTAMPTZ
    )
    "#,
    // Tables created before hash release kept a plain UNIQUE on the column
    "ALTER TABLE purchase_transactions_tb DROP CONSTRAINT IF EXISTS purchase_transactions_tb_chain_tx_hash_key",
    "CREATE INDEX IF NOT EXISTS idx_purchase_owner ON purchase_transactions_tb (owner_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_purchase_pending ON purchase_transactions_tb (expires_at) WHERE status = 0",
    "CREATE INDEX IF NOT EXISTS idx_purchase_grant ON purchase_transactions_tb (grant_state) WHERE grant_state = 1",
    // Failed and expired purchases give their tx hash up
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_purchase_chain_tx_hash ON purchase_transactions_tb (chain_tx_hash) WHERE status IN (0, 10)",
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS uq_purchase_item_in_flight
    ON purchase_transactions_tb (owner_id, item_ref)
    WHERE item_ref IS NOT NULL AND (status = 0 OR (status = 10 AND grant_state = 1))
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS credit_accounts_tb (
        owner_id    VARCHAR(128) PRIMARY KEY,
        balance     BIGINT NOT NULL DEFAULT 0 CHECK (balance >= 0),
        held        BIGINT NOT NULL DEFAULT 0 CHECK (held >= 0),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CHECK (held <= balance)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ledger_entries_tb (
        entry_id        BIGSERIAL PRIMARY KEY,
        transaction_id  VARCHAR(26) NOT NULL UNIQUE REFERENCES purchase_transactions_tb (transaction_id),
        owner_id        VARCHAR(128) NOT NULL,
        delta           BIGINT NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_ledger_owner ON ledger_entries_tb (owner_id)",
    r#"
    CREATE TABLE IF NOT EXISTS inventory_grants_tb (
        owner_id        VARCHAR(128) NOT NULL,
        item_ref        VARCHAR(128) NOT NULL,
        acquired_via    VARCHAR(26) NOT NULL REFERENCES purchase_transactions_tb (transaction_id),
        acquired_at     TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (owner_id, item_ref)
    )
    "#,
];

/// Create tables and indexes if they do not exist
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!(tables = 4, "Ledger schema ready");
    Ok(())
}
