//! Twilio delivery-status webhook - normalizes provider callbacks into
//! audit events. Phone numbers never reach storage, only a short hash.

use std::collections::HashMap;

use actix_web::{web, HttpRequest, HttpResponse};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha1::Sha1;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use super::error::ApiError;
use super::ApiContext;
use crate::consent::hash_pii;
use crate::signing::constant_time_eq;
use crate::storage::NewEvent;

type HmacSha1 = Hmac<Sha1>;

/// Statuses worth recording; everything else is acknowledged and dropped.
const TRACKABLE_STATUSES: &[&str] = &["queued", "sent", "delivered", "undelivered", "failed"];

/// Validate the `X-Twilio-Signature` header: the provider signs the URL
/// followed by the sorted key/value concatenation, HMAC-SHA1, base64.
fn verify_twilio_signature(
    url: &str,
    params: &HashMap<String, String>,
    signature: &str,
    auth_token: &str,
) -> bool {
    if auth_token.is_empty() || signature.is_empty() {
        return false;
    }
    let mut data = url.to_string();
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();
    for key in keys {
        data.push_str(key);
        data.push_str(&params[key]);
    }

    let Ok(mut mac) = HmacSha1::new_from_slice(auth_token.as_bytes()) else {
        return false;
    };
    mac.update(data.as_bytes());
    let expected = BASE64.encode(mac.finalize().into_bytes());
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

/// Receive Twilio message status updates.
///
/// Expected POST params: MessageSid, MessageStatus, To, ErrorCode (optional).
pub async fn twilio_status_callback(
    req: HttpRequest,
    form: web::Form<HashMap<String, String>>,
    ctx: web::Data<ApiContext>,
) -> Result<HttpResponse, ApiError> {
    let correlation_id = Uuid::new_v4();
    let span = platform::correlation_span(correlation_id, "twilio_status_callback");

    async move {
        let params = form.into_inner();

        if !ctx.settings.twilio_auth_token.is_empty() {
            let signature = req
                .headers()
                .get("X-Twilio-Signature")
                .and_then(|h| h.to_str().ok())
                .unwrap_or("");
            let connection = req.connection_info().clone();
            let url = format!(
                "{}://{}{}",
                connection.scheme(),
                connection.host(),
                req.uri()
            );
            if !verify_twilio_signature(&url, &params, signature, &ctx.settings.twilio_auth_token)
            {
                warn!("twilio signature verification failed");
                return Err(ApiError::signature_invalid("Invalid signature"));
            }
        }

        let message_sid = params.get("MessageSid").cloned().unwrap_or_default();
        let status = params.get("MessageStatus").cloned().unwrap_or_default();
        let to_number = params.get("To").cloned().unwrap_or_default();
        let error_code = params.get("ErrorCode").cloned();

        if message_sid.is_empty() || !TRACKABLE_STATUSES.contains(&status.as_str()) {
            return Ok(HttpResponse::Ok().json(json!({
                "ignored": true,
                "reason": "untracked_status",
            })));
        }

        let event_type = format!("sms_{}", status);
        let mut payload = json!({
            "message_sid": message_sid,
            "status": status,
            "to_hash": hash_pii(&to_number),
        });
        if let Some(code) = error_code {
            payload["error_code"] = json!(code);
        }

        if let Some(events) = &ctx.events {
            let event = NewEvent::new(&message_sid, &event_type, payload);
            if let Err(err) = events.append(event).await {
                warn!(error = %err, event_type = %event_type, "event store append failed");
            }
        }

        info!(
            message_sid = %message_sid.chars().take(10).collect::<String>(),
            status = %status,
            "twilio status recorded"
        );

        Ok(HttpResponse::Ok().json(json!({ "accepted": true, "status": status })))
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> HashMap<String, String> {
        HashMap::from([
            ("MessageSid".to_string(), "SM_TEST_123".to_string()),
            ("MessageStatus".to_string(), "delivered".to_string()),
            ("To".to_string(), "+34600111222".to_string()),
        ])
    }

    fn sign(url: &str, params: &HashMap<String, String>, token: &str) -> String {
        let mut data = url.to_string();
        let mut keys: Vec<&String> = params.keys().collect();
        keys.sort();
        for key in keys {
            data.push_str(key);
            data.push_str(&params[key]);
        }
        let mut mac = HmacSha1::new_from_slice(token.as_bytes()).unwrap();
        mac.update(data.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_passes() {
        let url = "https://example.test/webhook/twilio-status";
        let token = "twilio-token";
        let signature = sign(url, &params(), token);
        assert!(verify_twilio_signature(url, &params(), &signature, token));
    }

    #[test]
    fn wrong_signature_fails() {
        let url = "https://example.test/webhook/twilio-status";
        assert!(!verify_twilio_signature(url, &params(), "invalid", "twilio-token"));
    }

    #[test]
    fn missing_token_fails_closed() {
        let url = "https://example.test/webhook/twilio-status";
        let signature = sign(url, &params(), "twilio-token");
        assert!(!verify_twilio_signature(url, &params(), &signature, ""));
    }
}
