//! Session payload encoding and change fingerprints.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Maps between the in-memory session payload and its cookie representation.
///
/// `decode` fails closed: any malformed input yields `None`, which the
/// lifecycle treats as "no session".
pub trait SessionCodec: Send + Sync {
    /// Serialize a session payload into a cookie value.
    fn encode(&self, value: &Value) -> Result<String>;

    /// Parse a cookie value back into a session payload.
    fn decode(&self, raw: &str) -> Option<Value>;
}

/// Default codec: base64 of the compact JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBase64Codec;

impl SessionCodec for JsonBase64Codec {
    fn encode(&self, value: &Value) -> Result<String> {
        encode(value)
    }

    fn decode(&self, raw: &str) -> Option<Value> {
        decode(raw)
    }
}

/// Encode a payload as base64 JSON
pub fn encode(value: &Value) -> Result<String> {
    let json = serde_json::to_string(value)?;
    Ok(STANDARD.encode(json.as_bytes()))
}

/// Decode a base64 JSON payload, returning `None` on any malformed input
pub fn decode(raw: &str) -> Option<Value> {
    let bytes = STANDARD.decode(raw.trim()).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    serde_json::from_str(&text).ok()
}

/// Compute a stable content fingerprint of a payload.
///
/// Object keys are hashed in sorted order, so equal content always hashes
/// equally regardless of insertion order.
pub fn fingerprint(value: &Value) -> String {
    let canonical = canonicalize(value).to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Rebuild objects with sorted keys (serde_json may be built with `preserve_order`).
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
