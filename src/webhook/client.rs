use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;

use super::error::WebhookError;
use super::signer::SIGNATURE_HEADER;

/// Merchant reply; only 202 counts as delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResponse {
    pub status: u16,
    pub body: String,
}

impl DeliveryResponse {
    pub fn is_delivered(&self) -> bool {
        self.status == 202
    }

    /// Stored as `last_response`
    pub fn summary(&self) -> String {
        let mut body = self.body.clone();
        if body.len() > 1024 {
            let mut cut = 1024;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        format!("{} {}", self.status, body)
    }
}

#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, url: &str, body: Vec<u8>, signature: &str) -> Result<DeliveryResponse, WebhookError>;
}

pub struct HttpWebhookSender {
    client: reqwest::Client,
}

impl HttpWebhookSender {
    pub fn new(timeout: Duration) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, url: &str, body: Vec<u8>, signature: &str) -> Result<DeliveryResponse, WebhookError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(DeliveryResponse { status, body })
    }
}
