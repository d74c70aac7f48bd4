//! HMAC-SHA256 signing shared by payment requests and webhooks.
//!
//! The signed message is the `key=value` pairs of the payload, sorted by key
//! and joined with `&`. The signature is hex encoded.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;

use crate::domain::value_objects::GatewayOrderCode;
use crate::GatewayError;

type HmacSha256 = Hmac<Sha256>;

pub fn sign_fields<'a>(checksum_key: &str, fields: impl IntoIterator<Item = (&'a str, String)>) -> Result<String, GatewayError> {
    let mut fields: Vec<_> = fields.into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));
    let message = fields.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
    let mut mac = HmacSha256::new_from_slice(checksum_key.as_bytes())
        .map_err(|e| GatewayError::Rejected { code: "SIGNING".into(), message: e.to_string() })?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn verify(checksum_key: &str, message: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else { return false };
    let Ok(mut mac) = HmacSha256::new_from_slice(checksum_key.as_bytes()) else { return false };
    mac.update(message.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

fn field_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Body the gateway posts when a payment link changes state.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub code: String,
    #[serde(default)]
    pub desc: String,
    pub data: Value,
    pub signature: String,
}

impl WebhookPayload {
    /// Checks the signature over `data` and returns the order code it names.
    pub fn verify(&self, checksum_key: &str) -> Result<GatewayOrderCode, GatewayError> {
        let object = self.data.as_object().ok_or_else(|| rejected("webhook data is not an object"))?;
        let mut pairs: Vec<_> = object.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        let message = pairs.iter().map(|(k, v)| format!("{k}={}", field_value(v))).collect::<Vec<_>>().join("&");
        if !verify(checksum_key, &message, &self.signature) {
            return Err(rejected("webhook signature mismatch"));
        }
        object.get("orderCode").and_then(Value::as_i64).map(GatewayOrderCode::new)
            .ok_or_else(|| rejected("webhook data has no orderCode"))
    }
}

fn rejected(message: &str) -> GatewayError {
    GatewayError::Rejected { code: "INVALID_WEBHOOK".into(), message: message.into() }
}
