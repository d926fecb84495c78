//! PostgreSQL schema bootstrap
//!
//! Every statement is idempotent so `init_schema` runs on each start.

use sqlx::PgPool;

const CREATE_CLIENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS clients_tb (
    client_id    UUID PRIMARY KEY,
    callback_url TEXT NOT NULL,
    secret       TEXT NOT NULL,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

const CREATE_OWNERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS owners_tb (
    owner_id   UUID PRIMARY KEY,
    client_id  UUID NOT NULL REFERENCES clients_tb (client_id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

const CREATE_HOT_WALLETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS hot_wallets_tb (
    blockchain   TEXT NOT NULL,
    address      TEXT NOT NULL,
    owner_id     UUID NOT NULL,
    external_id  TEXT NOT NULL,
    sequence     INTEGER NOT NULL,
    is_dirty     BOOLEAN NOT NULL DEFAULT FALSE,
    is_activated BOOLEAN NOT NULL DEFAULT FALSE,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (blockchain, address),
    UNIQUE (owner_id, blockchain, sequence),
    UNIQUE (owner_id, blockchain, external_id)
)"#;

const CREATE_PROCESSING_WALLETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS processing_wallets_tb (
    blockchain TEXT NOT NULL,
    address    TEXT NOT NULL,
    owner_id   UUID NOT NULL,
    sequence   INTEGER NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (blockchain, address),
    UNIQUE (owner_id, blockchain)
)"#;

const CREATE_COLD_WALLETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS cold_wallets_tb (
    blockchain TEXT NOT NULL,
    address    TEXT NOT NULL,
    owner_id   UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (blockchain, address)
)"#;

// scope is a blockchain name, or "evm" for the shared EVM derivation path
const CREATE_WALLET_SEQUENCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS wallet_sequences_tb (
    owner_id    UUID NOT NULL,
    scope       TEXT NOT NULL,
    wallet_type TEXT NOT NULL,
    next_seq    INTEGER NOT NULL,
    PRIMARY KEY (owner_id, scope, wallet_type)
)"#;

const CREATE_PROCESSED_BLOCKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS processed_blocks_tb (
    blockchain TEXT PRIMARY KEY,
    height     BIGINT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

const CREATE_SKIPPED_BLOCKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS skipped_blocks_tb (
    blockchain TEXT NOT NULL,
    height     BIGINT NOT NULL,
    reason     TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (blockchain, height)
)"#;

const CREATE_TRANSFERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transfers_tb (
    transfer_id       UUID PRIMARY KEY,
    owner_id          UUID NOT NULL,
    blockchain        TEXT NOT NULL,
    kind              TEXT NOT NULL,
    status            TEXT NOT NULL,
    from_addresses    TEXT[] NOT NULL,
    to_address        TEXT NOT NULL,
    asset             TEXT,
    amount            NUMERIC(40, 18),
    fee               NUMERIC(40, 18),
    max_fee           NUMERIC(40, 18),
    whole_amount      BOOLEAN NOT NULL DEFAULT FALSE,
    tx_hash           TEXT,
    workflow_snapshot JSONB,
    state_data        JSONB NOT NULL DEFAULT '{}'::jsonb,
    request_id        TEXT,
    error_message     TEXT,
    version           BIGINT NOT NULL DEFAULT 0,
    created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (owner_id, request_id)
)"#;

const CREATE_TRANSFER_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transfer_transactions_tb (
    id            UUID PRIMARY KEY,
    transfer_id   UUID NOT NULL REFERENCES transfers_tb (transfer_id),
    kind          TEXT NOT NULL,
    tx_hash       TEXT NOT NULL,
    status        TEXT NOT NULL,
    confirmations BIGINT NOT NULL DEFAULT 0,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

const CREATE_WEBHOOKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS webhooks_tb (
    webhook_id      UUID PRIMARY KEY,
    owner_id        UUID NOT NULL,
    kind            TEXT NOT NULL,
    status          TEXT NOT NULL,
    payload         JSONB NOT NULL,
    request_id      TEXT,
    dedupe_key      TEXT UNIQUE,
    attempts        INTEGER NOT NULL DEFAULT 0,
    last_response   TEXT,
    next_attempt_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    sent_at         TIMESTAMPTZ
)"#;

const CREATE_WEBHOOKS_PENDING_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS webhooks_pending_idx
    ON webhooks_tb (next_attempt_at, created_at) WHERE status = 'new'"#;

const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs_tb (
    job_id       UUID PRIMARY KEY,
    kind         TEXT NOT NULL,
    args         JSONB NOT NULL,
    unique_key   TEXT UNIQUE,
    state        TEXT NOT NULL,
    attempt      INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL,
    scheduled_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    locked_until TIMESTAMPTZ,
    locked_by    UUID,
    last_error   TEXT,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    finalized_at TIMESTAMPTZ
)"#;

const CREATE_JOBS_DUE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS jobs_due_idx
    ON jobs_tb (scheduled_at) WHERE state IN ('available', 'running')"#;

// Columns added after the first release; no-ops on fresh tables
const ADD_TRANSFERS_VERSION: &str = "ALTER TABLE transfers_tb ADD COLUMN IF NOT EXISTS version BIGINT NOT NULL DEFAULT 0";
const ADD_JOBS_LOCKED_BY: &str = "ALTER TABLE jobs_tb ADD COLUMN IF NOT EXISTS locked_by UUID";

const STATEMENTS: &[(&str, &str)] = &[
    ("clients_tb", CREATE_CLIENTS_TABLE),
    ("owners_tb", CREATE_OWNERS_TABLE),
    ("hot_wallets_tb", CREATE_HOT_WALLETS_TABLE),
    ("processing_wallets_tb", CREATE_PROCESSING_WALLETS_TABLE),
    ("cold_wallets_tb", CREATE_COLD_WALLETS_TABLE),
    ("wallet_sequences_tb", CREATE_WALLET_SEQUENCES_TABLE),
    ("processed_blocks_tb", CREATE_PROCESSED_BLOCKS_TABLE),
    ("skipped_blocks_tb", CREATE_SKIPPED_BLOCKS_TABLE),
    ("transfers_tb", CREATE_TRANSFERS_TABLE),
    ("transfers_tb.version", ADD_TRANSFERS_VERSION),
    ("transfer_transactions_tb", CREATE_TRANSFER_TRANSACTIONS_TABLE),
    ("webhooks_tb", CREATE_WEBHOOKS_TABLE),
    ("webhooks_pending_idx", CREATE_WEBHOOKS_PENDING_INDEX),
    ("jobs_tb", CREATE_JOBS_TABLE),
    ("jobs_tb.locked_by", ADD_JOBS_LOCKED_BY),
    ("jobs_due_idx", CREATE_JOBS_DUE_INDEX),
];

/// Create all tables and indexes if missing
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Initializing PostgreSQL schema...");

    for (name, sql) in STATEMENTS {
        sqlx::query(sql).execute(pool).await.map_err(|e| {
            tracing::error!(object = name, "Failed to create schema object: {}", e);
            e
        })?;
    }

    tracing::info!(objects = STATEMENTS.len(), "PostgreSQL schema ready");
    Ok(())
}
