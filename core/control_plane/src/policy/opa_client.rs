//! Open Policy Agent client - the remote decision oracle.

use std::time::Duration;

use serde_json::{json, Map, Value};
use thiserror::Error;

const DECISION_PATH: &str = "/v1/data/clinic/policy";
const OPA_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum OpaError {
    #[error("opa unreachable: {0}")]
    Unreachable(String),

    #[error("opa returned status {0}")]
    Status(u16),
}

/// Decision returned by the policy evaluation.
#[derive(Debug, Clone)]
pub struct OpaResult {
    /// "ALLOW" or "DENY".
    pub decision: String,
    pub violations: Vec<String>,
}

/// Construct the OPA input document for one action.
pub fn build_opa_input(
    action: &str,
    role: &str,
    mode: &str,
    patient_id: &str,
    clinic_id: &str,
    extra: Option<&Map<String, Value>>,
) -> Value {
    let mut input = Map::new();
    input.insert("action".to_string(), Value::String(action.to_string()));
    input.insert("role".to_string(), Value::String(role.to_string()));
    input.insert("mode".to_string(), Value::String(mode.to_string()));
    input.insert("patient_id".to_string(), Value::String(patient_id.to_string()));
    input.insert("clinic_id".to_string(), Value::String(clinic_id.to_string()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            input.insert(key.clone(), value.clone());
        }
    }
    Value::Object(input)
}

/// HTTP client for OPA policy evaluation.
pub struct OpaClient {
    base_url: String,
    http: reqwest::Client,
}

impl OpaClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Evaluate an input document against the clinic policy package.
    ///
    /// Any transport failure or non-2xx status surfaces as an error; callers
    /// decide what fail-closed means for them.
    pub async fn evaluate(&self, input: &Value) -> Result<OpaResult, OpaError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, DECISION_PATH))
            .timeout(OPA_TIMEOUT)
            .json(&json!({ "input": input }))
            .send()
            .await
            .map_err(|e| OpaError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OpaError::Status(response.status().as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| OpaError::Unreachable(e.to_string()))?;
        let result = body.get("result").cloned().unwrap_or(Value::Null);

        let decision = result
            .get("decision")
            .and_then(Value::as_str)
            .unwrap_or("DENY")
            .to_string();
        let violations = result
            .get("violations")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(OpaResult {
            decision,
            violations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_document_carries_context() {
        let mut extra = Map::new();
        extra.insert("channel".to_string(), Value::String("sms".to_string()));
        let input = build_opa_input("send_reminder", "agent", "automated", "PAT-1", "CL-1", Some(&extra));
        assert_eq!(input["action"], "send_reminder");
        assert_eq!(input["role"], "agent");
        assert_eq!(input["mode"], "automated");
        assert_eq!(input["channel"], "sms");
        assert_eq!(input["clinic_id"], "CL-1");
    }
}
