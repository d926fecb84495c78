//! Signed merchant callbacks
//!
//! Webhook records are written in the same transaction as the state change
//! they describe and delivered later by [`WebhookDispatcher`].

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod signer;
pub mod store;
pub mod types;

#[cfg(test)]
pub mod mock;

pub use client::{DeliveryResponse, HttpWebhookSender, WebhookSender};
pub use dispatcher::{DispatchStats, WebhookDispatcher};
pub use error::WebhookError;
pub use signer::{SIGNATURE_HEADER, sign_payload, verify_signature};
pub use store::{PgWebhookStore, WebhookStore};
pub use types::{
    ClientEndpoint, EventStatus, NewWebhook, SystemTransactionPayload, TransactionEventPayload,
    TransferStatusPayload, WebhookKind, WebhookRecord, WebhookStatus, event_dedupe_key,
};
