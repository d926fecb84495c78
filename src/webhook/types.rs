use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::WebhookError;
use crate::core_types::{Blockchain, OwnerId, TransferId, WalletType};
use crate::transfer::TransferStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookKind {
    Deposit,
    Transfer,
    TransferStatus,
}

impl WebhookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookKind::Deposit => "deposit",
            WebhookKind::Transfer => "transfer",
            WebhookKind::TransferStatus => "transfer_status",
        }
    }
}

impl fmt::Display for WebhookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(WebhookKind::Deposit),
            "transfer" => Ok(WebhookKind::Transfer),
            "transfer_status" => Ok(WebhookKind::TransferStatus),
            _ => Err(format!("Invalid webhook kind: {}", s)),
        }
    }
}

/// Delivery status of a webhook record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    New,
    Sent,
    Skipped,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::New => "new",
            WebhookStatus::Sent => "sent",
            WebhookStatus::Skipped => "skipped",
        }
    }
}

impl FromStr for WebhookStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(WebhookStatus::New),
            "sent" => Ok(WebhookStatus::Sent),
            "skipped" => Ok(WebhookStatus::Skipped),
            _ => Err(format!("Invalid webhook status: {}", s)),
        }
    }
}

/// Chain-side status of the transaction a payload describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    InMempool,
    WaitingConfirmations,
    Completed,
    /// Mined but reverted
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::InMempool => "in_mempool",
            EventStatus::WaitingConfirmations => "waiting_confirmations",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEventPayload {
    pub kind: WebhookKind,
    pub is_system: bool,
    pub blockchain: Blockchain,
    pub hash: String,
    pub from_addresses: Vec<String>,
    pub to_address: String,
    pub amount: Decimal,
    pub asset: String,
    pub status: EventStatus,
    pub confirmations: u64,
    pub wallet_type: WalletType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemTransactionPayload {
    pub kind: String,
    pub hash: String,
    pub status: String,
    pub confirmations: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStatusPayload {
    pub kind: WebhookKind,
    pub transfer_id: TransferId,
    pub status: TransferStatus,
    pub step: String,
    pub system_transactions: Vec<SystemTransactionPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Webhook row to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewWebhook {
    pub owner_id: OwnerId,
    pub kind: WebhookKind,
    pub payload: serde_json::Value,
    pub request_id: Option<String>,
    /// Unique per logical event; a second insert returns the first row
    pub dedupe_key: Option<String>,
}

impl NewWebhook {
    pub fn transaction_event(
        owner_id: OwnerId,
        payload: &TransactionEventPayload,
        dedupe_key: String,
    ) -> Result<Self, WebhookError> {
        Ok(Self {
            owner_id,
            kind: payload.kind,
            payload: serde_json::to_value(payload)?,
            request_id: payload.request_id.clone(),
            dedupe_key: Some(dedupe_key),
        })
    }

    pub fn transfer_status(owner_id: OwnerId, payload: &TransferStatusPayload) -> Result<Self, WebhookError> {
        Ok(Self {
            owner_id,
            kind: WebhookKind::TransferStatus,
            payload: serde_json::to_value(payload)?,
            request_id: payload.request_id.clone(),
            dedupe_key: None,
        })
    }
}

/// Key deduplicating transaction-event webhooks
pub fn event_dedupe_key(chain: Blockchain, event_key: &str, address: &str, status: EventStatus) -> String {
    format!("{}:{}:{}:{}", chain.as_str(), event_key, address, status.as_str())
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookRecord {
    pub webhook_id: Uuid,
    pub owner_id: OwnerId,
    pub kind: WebhookKind,
    pub status: WebhookStatus,
    pub payload: serde_json::Value,
    pub request_id: Option<String>,
    pub attempts: i32,
    pub last_response: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Merchant callback target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEndpoint {
    pub client_id: Uuid,
    pub callback_url: String,
    pub secret: String,
}
