//! HMAC-SHA256 signing and verification over canonical payloads.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use super::canonical::canonicalize;

type HmacSha256 = Hmac<Sha256>;

/// Keys stripped from the pre-image before signing.
const EXCLUDED_KEYS: &[&str] = &["hmac_signature"];

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("canonical serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid hmac key")]
    Key,
}

/// Compare two byte strings in constant time.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Raw HMAC-SHA256 over arbitrary bytes, hex-encoded. Used for webhook
/// signature checks where the pre-image is the raw request body.
pub fn hmac_sha256_hex(secret: &str, message: &[u8]) -> Result<String, SigningError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SigningError::Key)?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Sign a payload with HMAC-SHA256 and return the hex digest.
pub fn sign_payload(payload: &Value, secret: &str) -> Result<String, SigningError> {
    let canonical = canonicalize(payload, EXCLUDED_KEYS)?;
    hmac_sha256_hex(secret, canonical.as_bytes())
}

/// Verify that a payload's `hmac_signature` matches the recomputed digest.
///
/// An absent or empty signature always fails.
pub fn verify_signature(payload: &Value, secret: &str) -> Result<bool, SigningError> {
    let expected = payload
        .get("hmac_signature")
        .and_then(Value::as_str)
        .unwrap_or("");
    if expected.is_empty() {
        return Ok(false);
    }
    let computed = sign_payload(payload, secret)?;
    Ok(constant_time_eq(computed.as_bytes(), expected.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sign_and_verify_round_trip() {
        let mut payload = json!({"action": "send_sms", "patient": "P1"});
        let sig = sign_payload(&payload, "test-secret").unwrap();
        assert_eq!(sig.len(), 64);
        payload["hmac_signature"] = Value::String(sig);
        assert!(verify_signature(&payload, "test-secret").unwrap());
    }

    #[test]
    fn wrong_secret_fails() {
        let mut payload = json!({"action": "send_sms"});
        let sig = sign_payload(&payload, "secret-a").unwrap();
        payload["hmac_signature"] = Value::String(sig);
        assert!(!verify_signature(&payload, "secret-b").unwrap());
    }

    #[test]
    fn tampered_payload_fails() {
        let mut payload = json!({"action": "send_sms"});
        let sig = sign_payload(&payload, "secret").unwrap();
        payload["hmac_signature"] = Value::String(sig);
        payload["action"] = Value::String("send_whatsapp".to_string());
        assert!(!verify_signature(&payload, "secret").unwrap());
    }

    #[test]
    fn empty_signature_fails() {
        let payload = json!({"action": "send_sms", "hmac_signature": ""});
        assert!(!verify_signature(&payload, "secret").unwrap());
    }

    #[test]
    fn signature_is_lowercase_hex() {
        let sig = sign_payload(&json!({"a": 1}), "s").unwrap();
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn signature_ignores_existing_signature_field() {
        let bare = json!({"a": 1});
        let with_sig = json!({"a": 1, "hmac_signature": "deadbeef"});
        assert_eq!(
            sign_payload(&bare, "s").unwrap(),
            sign_payload(&with_sig, "s").unwrap()
        );
    }
}
