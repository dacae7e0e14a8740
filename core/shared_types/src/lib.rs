use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Correlation identifier used to join logs/traces across the API, the
/// orchestrator, and the worker.
pub type CorrelationId = Uuid;

/// Main work queue - FIFO list, push right / pop left.
pub const QUEUE_KEY: &str = "cacp:actions";
/// Retry sorted set, scored by the epoch second at which the entry is due.
pub const RETRY_KEY: &str = "cacp:retry";
/// Dead-letter list for actions that exhausted their retries.
pub const DLQ_KEY: &str = "cacp:dlq";

/// Dedup marker for an executed `(appointment, channel)` pair.
pub fn dedup_key(appointment_id: &str, channel: &str) -> String {
    format!("cacp:sent:{}:{}", appointment_id, channel)
}

/// Sliding rate-limit window for a `(patient, channel)` pair.
pub fn rate_key(patient_id: &str, channel: &str) -> String {
    format!("cacp:rate:{}:{}", patient_id, channel)
}

/// Idempotency marker for a webhook delivery id.
pub fn delivery_key(delivery_id: &str) -> String {
    format!("cacp:webhook:delivery:{}", delivery_id)
}

fn default_sms() -> String {
    "sms".to_string()
}

fn default_whatsapp() -> String {
    "whatsapp".to_string()
}

fn default_max_messages() -> usize {
    3
}

/// Incoming appointment from Clinic Cloud or CSV import.
///
/// The four identifiers are required; everything else defaults to
/// empty/false/zero so partial feeds still score.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Appointment {
    pub appointment_id: String,
    pub patient_id: String,
    pub clinic_id: String,
    /// ISO-8601 instant. Kept as a string: unparseable values degrade to
    /// neutral scoring signals instead of rejecting the appointment.
    pub scheduled_at: String,
    #[serde(default)]
    pub treatment_type: String,
    #[serde(default)]
    pub is_first_visit: bool,
    #[serde(default)]
    pub previous_no_shows: u32,
    #[serde(default)]
    pub patient_phone: String,
    #[serde(default)]
    pub patient_whatsapp: bool,
    #[serde(default)]
    pub consent_given: bool,
}

/// Risk band derived from the weighted score.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// Immutable result of a risk assessment.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RiskResult {
    /// Weighted sum, rounded to 4 decimals, clamped to [0, 1].
    pub score: f64,
    pub level: RiskLevel,
    /// Per-factor contribution in [0, 1], keyed by factor name.
    pub factors: BTreeMap<String, f64>,
}

/// A channel-bound patient-contact template before scheduling resolution.
///
/// `hours_before` is relative to the appointment time; the orchestrator
/// resolves it into the absolute `scheduled_at` of an [`Action`].
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ActionTemplate {
    pub action_type: String,
    pub channel: String,
    pub template: String,
    pub hours_before: i64,
}

/// A fully resolved patient-contact action, immutable once built.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Action {
    pub action_type: String,
    pub channel: String,
    pub template: String,
    /// Absolute ISO-8601 send time.
    pub scheduled_at: String,
    pub patient_id: String,
    pub appointment_id: String,
}

/// Signed bundle of actions awaiting human approval via PR merge.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExecutionPlan {
    /// UUIDv4; equals the proposal id.
    pub plan_id: String,
    pub version: String,
    pub environment: String,
    pub clinic_id: String,
    pub actions: Vec<Action>,
    pub risk_level: RiskLevel,
    /// Hex SHA-256 HMAC digest; empty string means unsigned.
    pub hmac_signature: String,
    pub created_at: String,
}

/// Append-only audit record.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Event {
    pub event_id: String,
    /// Appointment id, PR number, or provider message sid.
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: Value,
    pub actor: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Queue entry: an opaque JSON envelope with a small set of promoted keys.
///
/// Unknown keys round-trip through `extra` so the worker never drops fields
/// it does not understand.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ActionEnvelope {
    #[serde(default)]
    pub action_type: String,
    #[serde(default)]
    pub appointment_id: String,
    #[serde(default)]
    pub patient_id: String,
    #[serde(default = "default_sms")]
    pub channel: String,
    /// Worker-internal retry counter.
    #[serde(rename = "_retry_count", default, skip_serializing_if = "is_zero")]
    pub retry_count: u32,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl ActionEnvelope {
    /// Identity used to group audit events for this envelope.
    pub fn aggregate_id(&self) -> String {
        if !self.appointment_id.is_empty() {
            return self.appointment_id.clone();
        }
        match self.extra.get("pr_number") {
            Some(Value::Number(n)) => format!("pr-{}", n),
            Some(Value::String(s)) if !s.is_empty() => format!("pr-{}", s),
            _ => "unknown".to_string(),
        }
    }
}

/// Normalized adapter outcome merged into the `action_executed` payload.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AdapterResult {
    pub adapter: String,
    pub action_type: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AdapterResult {
    pub fn executed(adapter: &str, action_type: &str) -> Self {
        Self {
            adapter: adapter.to_string(),
            action_type: action_type.to_string(),
            status: "executed".to_string(),
            provider: None,
            provider_message_id: None,
            error_code: None,
            error_message: None,
        }
    }
}

/// Per-clinic messaging policy, loaded from the clinic profile.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessagingPolicy {
    #[serde(default = "default_whatsapp")]
    pub preferred_channel: String,
    #[serde(default = "default_max_messages")]
    pub max_messages_per_patient_per_day: usize,
}

impl Default for MessagingPolicy {
    fn default() -> Self {
        Self {
            preferred_channel: default_whatsapp(),
            max_messages_per_patient_per_day: default_max_messages(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ClinicProfile {
    #[serde(default)]
    pub clinic_id: String,
    #[serde(default)]
    pub messaging: MessagingPolicy,
}

/// Machine-readable error category carried by every non-2xx response.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    SignatureInvalid,
    PolicyViolation,
    RateLimitExceeded,
    InternalError,
}

/// The error envelope contract for the HTTP surface.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorBody {
    pub error_code: ErrorCode,
    pub message: String,
    pub request_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorBody {
    pub fn new(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
            request_id: Uuid::new_v4(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn appointment_optional_fields_default() {
        let appt: Appointment = serde_json::from_value(json!({
            "appointment_id": "APT-1",
            "patient_id": "PAT-1",
            "clinic_id": "CL-1",
            "scheduled_at": "2026-03-02T10:00:00+00:00"
        }))
        .unwrap();
        assert_eq!(appt.previous_no_shows, 0);
        assert!(!appt.is_first_visit);
        assert!(appt.patient_phone.is_empty());
    }

    #[test]
    fn envelope_round_trips_unknown_keys() {
        let env: ActionEnvelope = serde_json::from_value(json!({
            "action_type": "execute_plan",
            "appointment_id": "APT-9",
            "merge_commit_sha": "abc123"
        }))
        .unwrap();
        assert_eq!(env.channel, "sms");
        let back = serde_json::to_value(&env).unwrap();
        assert_eq!(back["merge_commit_sha"], "abc123");
        assert!(back.get("_retry_count").is_none());
    }

    #[test]
    fn envelope_aggregate_falls_back_to_pr_number() {
        let env: ActionEnvelope =
            serde_json::from_value(json!({ "pr_number": 42 })).unwrap();
        assert_eq!(env.aggregate_id(), "pr-42");
    }

    #[test]
    fn error_code_serializes_screaming_snake() {
        let body = ErrorBody::new(ErrorCode::SignatureInvalid, "bad signature");
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["error_code"], "SIGNATURE_INVALID");
    }
}
