//! Twilio SMS adapter - sends real messages via the provider REST API.

use async_trait::async_trait;
use serde_json::Value;
use shared_types::{ActionEnvelope, AdapterResult};
use tracing::{error, info};

use super::{ActionAdapter, AdapterError};

/// SMS adapter over the Twilio Messages endpoint.
///
/// Only wired in when account credentials are configured; the worker falls
/// back to [`super::NoopAdapter`] otherwise.
pub struct TwilioSmsAdapter {
    account_sid: String,
    auth_token: String,
    from_number: String,
    api_base: String,
    http: reqwest::Client,
}

impl TwilioSmsAdapter {
    pub fn new(account_sid: &str, auth_token: &str, from_number: &str) -> Self {
        Self {
            account_sid: account_sid.to_string(),
            auth_token: auth_token.to_string(),
            from_number: from_number.to_string(),
            api_base: "https://api.twilio.com".to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Point at a different API host. Test seam.
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn field<'a>(action: &'a ActionEnvelope, key: &str) -> &'a str {
        action
            .extra
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    fn missing_params(action_type: &str) -> AdapterResult {
        AdapterResult {
            adapter: "twilio".to_string(),
            action_type: action_type.to_string(),
            status: "failed".to_string(),
            provider: Some("twilio".to_string()),
            provider_message_id: None,
            error_code: Some("MISSING_PARAMS".to_string()),
            error_message: Some("to_number and message are required".to_string()),
        }
    }
}

#[async_trait]
impl ActionAdapter for TwilioSmsAdapter {
    async fn execute(&self, action: &ActionEnvelope) -> Result<AdapterResult, AdapterError> {
        let to_number = Self::field(action, "to_number");
        let message = Self::field(action, "message");

        // Structured failure, not an error: nothing transient about a
        // malformed envelope, so it must not enter the retry loop.
        if to_number.is_empty() || message.is_empty() {
            return Ok(Self::missing_params(&action.action_type));
        }

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.account_sid
        );
        let response = self
            .http
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("To", to_number),
                ("From", self.from_number.as_str()),
                ("Body", message),
            ])
            .send()
            .await
            .map_err(|e| AdapterError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "twilio send failed");
            return Err(AdapterError::Provider(format!(
                "status {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AdapterError::Provider(e.to_string()))?;
        let sid = body.get("sid").and_then(Value::as_str).unwrap_or_default();
        info!(provider_message_id = %sid, "SMS sent");

        Ok(AdapterResult {
            adapter: "twilio".to_string(),
            action_type: action.action_type.clone(),
            status: "executed".to_string(),
            provider: Some("twilio".to_string()),
            provider_message_id: Some(sid.to_string()),
            error_code: None,
            error_message: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(value: Value) -> ActionEnvelope {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn missing_params_is_structured_failure() {
        let adapter = TwilioSmsAdapter::new("AC_TEST", "token", "+10000000000");
        let action = envelope(json!({
            "action_type": "send_reminder",
            "appointment_id": "APT-1"
        }));
        let result = adapter.execute(&action).await.unwrap();
        assert_eq!(result.status, "failed");
        assert_eq!(result.error_code.as_deref(), Some("MISSING_PARAMS"));
    }

    #[tokio::test]
    async fn unreachable_provider_is_retryable_error() {
        let adapter = TwilioSmsAdapter::new("AC_TEST", "token", "+10000000000")
            .with_api_base("http://127.0.0.1:9");
        let action = envelope(json!({
            "action_type": "send_reminder",
            "to_number": "+34600111222",
            "message": "reminder"
        }));
        let err = adapter.execute(&action).await.unwrap_err();
        assert!(matches!(err, AdapterError::Provider(_)));
    }
}
