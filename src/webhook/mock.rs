//! In-memory webhook store for tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::error::WebhookError;
use super::store::WebhookStore;
use super::types::{ClientEndpoint, NewWebhook, WebhookKind, WebhookRecord, WebhookStatus};
use crate::core_types::OwnerId;

#[derive(Default)]
pub struct MockWebhookStore {
    records: Mutex<Vec<(WebhookRecord, Option<String>)>>,
    endpoints: Mutex<HashMap<OwnerId, ClientEndpoint>>,
}

impl MockWebhookStore {
    pub fn set_endpoint(&self, owner_id: OwnerId, endpoint: ClientEndpoint) {
        self.endpoints.lock().unwrap().insert(owner_id, endpoint);
    }

    pub fn all(&self) -> Vec<WebhookRecord> {
        self.records.lock().unwrap().iter().map(|(r, _)| r.clone()).collect()
    }

    pub fn of_kind(&self, kind: WebhookKind) -> Vec<WebhookRecord> {
        self.all().into_iter().filter(|r| r.kind == kind).collect()
    }

    /// Push a failed record's retry time into the past
    pub fn make_due(&self, webhook_id: Uuid) {
        for (r, _) in self.records.lock().unwrap().iter_mut() {
            if r.webhook_id == webhook_id {
                r.next_attempt_at = Utc::now() - chrono::Duration::seconds(1);
            }
        }
    }
}

#[async_trait]
impl WebhookStore for MockWebhookStore {
    async fn create(&self, webhook: &NewWebhook) -> Result<Uuid, WebhookError> {
        let mut records = self.records.lock().unwrap();
        if let Some(key) = &webhook.dedupe_key
            && let Some((existing, _)) = records.iter().find(|(_, k)| k.as_ref() == Some(key))
        {
            return Ok(existing.webhook_id);
        }
        let now = Utc::now();
        let record = WebhookRecord {
            webhook_id: Uuid::new_v4(),
            owner_id: webhook.owner_id,
            kind: webhook.kind,
            status: WebhookStatus::New,
            payload: webhook.payload.clone(),
            request_id: webhook.request_id.clone(),
            attempts: 0,
            last_response: None,
            next_attempt_at: now,
            // strictly increasing so ordering is stable
            created_at: now + chrono::Duration::microseconds(records.len() as i64),
        };
        let id = record.webhook_id;
        records.push((record, webhook.dedupe_key.clone()));
        Ok(id)
    }

    async fn get(&self, webhook_id: Uuid) -> Result<Option<WebhookRecord>, WebhookError> {
        Ok(self.all().into_iter().find(|r| r.webhook_id == webhook_id))
    }

    async fn pending(&self, limit: i64) -> Result<Vec<WebhookRecord>, WebhookError> {
        let now = Utc::now() + chrono::Duration::seconds(1);
        let all = self.all();
        let held_back = |r: &WebhookRecord| {
            r.request_id.is_some()
                && all.iter().any(|e| {
                    e.owner_id == r.owner_id
                        && e.request_id == r.request_id
                        && e.status == WebhookStatus::New
                        && e.created_at < r.created_at
                        && e.next_attempt_at > now
                })
        };
        let mut due: Vec<WebhookRecord> = all
            .iter()
            .filter(|r| r.status == WebhookStatus::New && r.next_attempt_at <= now && !held_back(r))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.created_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn endpoint_for_owner(&self, owner_id: OwnerId) -> Result<Option<ClientEndpoint>, WebhookError> {
        Ok(self.endpoints.lock().unwrap().get(&owner_id).cloned())
    }

    async fn mark_sent(&self, webhook_id: Uuid, response: &str) -> Result<(), WebhookError> {
        for (r, _) in self.records.lock().unwrap().iter_mut() {
            if r.webhook_id == webhook_id && r.status == WebhookStatus::New {
                r.status = WebhookStatus::Sent;
                r.last_response = Some(response.to_string());
            }
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        webhook_id: Uuid,
        response: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        for (r, _) in self.records.lock().unwrap().iter_mut() {
            if r.webhook_id == webhook_id && r.status == WebhookStatus::New {
                r.attempts += 1;
                r.last_response = Some(response.to_string());
                r.next_attempt_at = next_attempt_at;
            }
        }
        Ok(())
    }

    async fn purge_sent(&self, _before: DateTime<Utc>) -> Result<u64, WebhookError> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|(r, _)| r.status != WebhookStatus::Sent);
        Ok((before - records.len()) as u64)
    }
}
