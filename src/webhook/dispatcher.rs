//! Interval-driven delivery of pending webhook records
//!
//! Records sharing an owner and request id form a correlation group and are
//! delivered one after another; a failure stops the rest of its group until
//! the next pass. Distinct groups are delivered concurrently.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::client::WebhookSender;
use super::error::WebhookError;
use super::signer::{compact_body, sign_payload};
use super::store::WebhookStore;
use super::types::WebhookRecord;
use crate::config::WebhookConfig;
use crate::core_types::OwnerId;
use crate::jobs::retry_backoff::BackoffRetryPolicy;
use crate::shutdown::{ShutdownRx, is_shutdown, sleep_or_shutdown};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: usize,
    pub failed: usize,
    /// Held back behind an earlier failure in the same group
    pub deferred: usize,
}

impl DispatchStats {
    fn merge(&mut self, other: DispatchStats) {
        self.delivered += other.delivered;
        self.failed += other.failed;
        self.deferred += other.deferred;
    }
}

pub struct WebhookDispatcher {
    store: Arc<dyn WebhookStore>,
    sender: Arc<dyn WebhookSender>,
    config: WebhookConfig,
    policy: BackoffRetryPolicy,
}

enum Attempt {
    Delivered,
    Failed,
}

impl WebhookDispatcher {
    pub fn new(store: Arc<dyn WebhookStore>, sender: Arc<dyn WebhookSender>, config: WebhookConfig) -> Self {
        // Webhooks retry until delivered; the attempt cap only applies to jobs
        let policy = BackoffRetryPolicy::from_config(&config.backoff);
        Self {
            store,
            sender,
            config,
            policy,
        }
    }

    pub async fn run(&self, mut shutdown: ShutdownRx) {
        let interval = Duration::from_millis(self.config.interval_ms);
        info!(
            interval_ms = self.config.interval_ms,
            concurrency = self.config.concurrency,
            "Webhook dispatcher started"
        );

        while !is_shutdown(&shutdown) {
            match self.dispatch_once().await {
                Ok(stats) if stats.delivered + stats.failed > 0 => {
                    info!(
                        delivered = stats.delivered,
                        failed = stats.failed,
                        deferred = stats.deferred,
                        "Webhook pass finished"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Webhook pass failed"),
            }
            if sleep_or_shutdown(&mut shutdown, interval).await {
                break;
            }
        }
        info!("Webhook dispatcher stopped");
    }

    /// One pass over the due records
    pub async fn dispatch_once(&self) -> Result<DispatchStats, WebhookError> {
        let pending = self.store.pending(self.config.batch_size).await?;
        if pending.is_empty() {
            return Ok(DispatchStats::default());
        }

        let groups = group_by_correlation(pending);
        let results: Vec<Result<DispatchStats, WebhookError>> = stream::iter(groups)
            .map(|group| self.deliver_group(group))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut stats = DispatchStats::default();
        for result in results {
            stats.merge(result?);
        }
        Ok(stats)
    }

    async fn deliver_group(&self, group: Vec<WebhookRecord>) -> Result<DispatchStats, WebhookError> {
        let mut stats = DispatchStats::default();
        let total = group.len();
        for (i, record) in group.into_iter().enumerate() {
            match self.deliver(&record).await? {
                Attempt::Delivered => stats.delivered += 1,
                Attempt::Failed => {
                    stats.failed += 1;
                    stats.deferred += total - i - 1;
                    break;
                }
            }
        }
        Ok(stats)
    }

    async fn deliver(&self, record: &WebhookRecord) -> Result<Attempt, WebhookError> {
        let Some(endpoint) = self.store.endpoint_for_owner(record.owner_id).await? else {
            warn!(webhook_id = %record.webhook_id, owner_id = %record.owner_id, "No client endpoint for owner");
            self.fail(record, "no client endpoint").await?;
            return Ok(Attempt::Failed);
        };

        let body = compact_body(&record.payload)?;
        let signature = sign_payload(&endpoint.secret, &body)?;

        match self.sender.send(&endpoint.callback_url, body, &signature).await {
            Ok(response) if response.is_delivered() => {
                self.store.mark_sent(record.webhook_id, &response.summary()).await?;
                debug!(webhook_id = %record.webhook_id, kind = %record.kind, "Webhook delivered");
                Ok(Attempt::Delivered)
            }
            Ok(response) => {
                warn!(
                    webhook_id = %record.webhook_id,
                    status = response.status,
                    attempts = record.attempts + 1,
                    "Webhook rejected by client"
                );
                self.fail(record, &response.summary()).await?;
                Ok(Attempt::Failed)
            }
            Err(e) => {
                warn!(webhook_id = %record.webhook_id, error = %e, "Webhook request failed");
                self.fail(record, &e.to_string()).await?;
                Ok(Attempt::Failed)
            }
        }
    }

    async fn fail(&self, record: &WebhookRecord, response: &str) -> Result<(), WebhookError> {
        let delay = self.policy.backoff_duration(record.attempts.max(0) as usize);
        let next = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
        self.store.record_failure(record.webhook_id, response, next).await
    }
}

/// Split into correlation groups, preserving creation order inside each group
/// and the order of first appearance across groups
fn group_by_correlation(records: Vec<WebhookRecord>) -> Vec<Vec<WebhookRecord>> {
    let mut index: FxHashMap<(OwnerId, String), usize> = FxHashMap::default();
    let mut groups: Vec<Vec<WebhookRecord>> = Vec::new();
    for record in records {
        match &record.request_id {
            Some(request_id) => {
                let key = (record.owner_id, request_id.clone());
                match index.get(&key) {
                    Some(&i) => groups[i].push(record),
                    None => {
                        index.insert(key, groups.len());
                        groups.push(vec![record]);
                    }
                }
            }
            None => groups.push(vec![record]),
        }
    }
    groups
}
