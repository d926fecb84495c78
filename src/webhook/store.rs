use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use super::error::WebhookError;
use super::types::{ClientEndpoint, NewWebhook, WebhookRecord};
use crate::core_types::OwnerId;
use crate::db::RowExt;

#[async_trait]
pub trait WebhookStore: Send + Sync {
    /// Insert a record; with a dedupe key already present, returns that row's id
    async fn create(&self, webhook: &NewWebhook) -> Result<Uuid, WebhookError>;

    async fn get(&self, webhook_id: Uuid) -> Result<Option<WebhookRecord>, WebhookError>;

    /// Due `new` records in creation order. A record is held back while an
    /// older record of the same correlation group is waiting for its retry.
    async fn pending(&self, limit: i64) -> Result<Vec<WebhookRecord>, WebhookError>;

    async fn endpoint_for_owner(&self, owner_id: OwnerId) -> Result<Option<ClientEndpoint>, WebhookError>;

    async fn mark_sent(&self, webhook_id: Uuid, response: &str) -> Result<(), WebhookError>;

    /// attempts += 1 and push the next attempt out
    async fn record_failure(
        &self,
        webhook_id: Uuid,
        response: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), WebhookError>;

    async fn purge_sent(&self, before: DateTime<Utc>) -> Result<u64, WebhookError>;
}

pub struct PgWebhookStore {
    pool: PgPool,
}

const COLUMNS: &str =
    "webhook_id, owner_id, kind, status, payload, request_id, attempts, last_response, next_attempt_at, created_at";

impl PgWebhookStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &PgRow) -> Result<WebhookRecord, sqlx::Error> {
        Ok(WebhookRecord {
            webhook_id: row.try_get("webhook_id")?,
            owner_id: row.try_get("owner_id")?,
            kind: row.get_parsed("kind")?,
            status: row.get_parsed("status")?,
            payload: row.try_get("payload")?,
            request_id: row.try_get("request_id")?,
            attempts: row.try_get("attempts")?,
            last_response: row.try_get("last_response")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Insert inside a caller-owned transaction
pub(crate) async fn insert_webhook_on(
    conn: &mut PgConnection,
    webhook: &NewWebhook,
) -> Result<(Uuid, bool), sqlx::Error> {
    // xmax is 0 only on a freshly inserted row version
    sqlx::query_as::<_, (Uuid, bool)>(
        r#"
        INSERT INTO webhooks_tb (webhook_id, owner_id, kind, status, payload, request_id, dedupe_key)
        VALUES ($1, $2, $3, 'new', $4, $5, $6)
        ON CONFLICT (dedupe_key) DO UPDATE SET dedupe_key = EXCLUDED.dedupe_key
        RETURNING webhook_id, (xmax = 0) AS inserted
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(webhook.owner_id)
    .bind(webhook.kind.as_str())
    .bind(&webhook.payload)
    .bind(&webhook.request_id)
    .bind(&webhook.dedupe_key)
    .fetch_one(conn)
    .await
}

#[async_trait]
impl WebhookStore for PgWebhookStore {
    async fn create(&self, webhook: &NewWebhook) -> Result<Uuid, WebhookError> {
        let mut conn = self.pool.acquire().await?;
        let (webhook_id, _) = insert_webhook_on(&mut *conn, webhook).await?;
        Ok(webhook_id)
    }

    async fn get(&self, webhook_id: Uuid) -> Result<Option<WebhookRecord>, WebhookError> {
        let row = sqlx::query(&format!("SELECT {} FROM webhooks_tb WHERE webhook_id = $1", COLUMNS))
            .bind(webhook_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::row_to_record).transpose()?)
    }

    async fn pending(&self, limit: i64) -> Result<Vec<WebhookRecord>, WebhookError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM webhooks_tb w
            WHERE w.status = 'new'
              AND w.next_attempt_at <= NOW()
              AND (w.request_id IS NULL OR NOT EXISTS (
                    SELECT 1 FROM webhooks_tb e
                    WHERE e.owner_id = w.owner_id
                      AND e.request_id = w.request_id
                      AND e.status = 'new'
                      AND e.created_at < w.created_at
                      AND e.next_attempt_at > NOW()))
            ORDER BY w.created_at
            LIMIT $1
            "#,
            COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::row_to_record).collect::<Result<_, _>>()?)
    }

    async fn endpoint_for_owner(&self, owner_id: OwnerId) -> Result<Option<ClientEndpoint>, WebhookError> {
        let row = sqlx::query(
            r#"
            SELECT c.client_id, c.callback_url, c.secret
            FROM owners_tb o JOIN clients_tb c ON c.client_id = o.client_id
            WHERE o.owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(ClientEndpoint {
                client_id: row.try_get("client_id")?,
                callback_url: row.try_get("callback_url")?,
                secret: row.try_get("secret")?,
            })),
            None => Ok(None),
        }
    }

    async fn mark_sent(&self, webhook_id: Uuid, response: &str) -> Result<(), WebhookError> {
        sqlx::query(
            "UPDATE webhooks_tb SET status = 'sent', last_response = $2, sent_at = NOW()
             WHERE webhook_id = $1 AND status = 'new'",
        )
        .bind(webhook_id)
        .bind(response)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failure(
        &self,
        webhook_id: Uuid,
        response: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        sqlx::query(
            "UPDATE webhooks_tb SET attempts = attempts + 1, last_response = $2, next_attempt_at = $3
             WHERE webhook_id = $1 AND status = 'new'",
        )
        .bind(webhook_id)
        .bind(response)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_sent(&self, before: DateTime<Utc>) -> Result<u64, WebhookError> {
        let result = sqlx::query("DELETE FROM webhooks_tb WHERE status = 'sent' AND sent_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
