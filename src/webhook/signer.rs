//! `X-Sign` header: hex(HMAC-SHA256(client secret, body))

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::error::WebhookError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Sign";

/// Compact JSON; the exact bytes that are signed and sent
pub fn compact_body(payload: &serde_json::Value) -> Result<Vec<u8>, WebhookError> {
    Ok(serde_json::to_vec(payload)?)
}

pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| WebhookError::Signing(e.to_string()))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a received signature
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
