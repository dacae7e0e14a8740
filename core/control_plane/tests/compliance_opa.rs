//! Compliance agent against a mocked OPA decision oracle.

use control_plane::orchestration::agents::ComplianceAgent;
use control_plane::policy::OpaClient;
use serde_json::json;
use shared_types::{Action, ClinicProfile};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn actions() -> Vec<Action> {
    vec![Action {
        action_type: "send_reminder".to_string(),
        channel: "whatsapp".to_string(),
        template: "confirm_reminder_v2".to_string(),
        scheduled_at: "2026-03-17T10:00:00+00:00".to_string(),
        patient_id: "PAT-001".to_string(),
        appointment_id: "APT-100".to_string(),
    }]
}

fn profile() -> ClinicProfile {
    ClinicProfile {
        clinic_id: "CLINIC-A".to_string(),
        ..ClinicProfile::default()
    }
}

#[tokio::test]
async fn allow_decision_passes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/data/clinic/policy"))
        .and(body_partial_json(json!({
            "input": {
                "action": "send_reminder",
                "role": "agent",
                "mode": "automated",
                "clinic_id": "CLINIC-A",
                "channel": "whatsapp",
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": { "decision": "ALLOW", "violations": [] }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let agent = ComplianceAgent::new(Some(OpaClient::new(&server.uri())));
    let result = agent
        .validate(&actions(), "agent", "automated", &profile())
        .await;
    assert!(result.compliant);
    assert!(result.violations.is_empty());
}

#[tokio::test]
async fn deny_decision_collects_violations() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/data/clinic/policy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {
                "decision": "DENY",
                "violations": ["Messaging_Outside_Allowed_Hours"],
            }
        })))
        .mount(&server)
        .await;

    let agent = ComplianceAgent::new(Some(OpaClient::new(&server.uri())));
    let result = agent
        .validate(&actions(), "agent", "automated", &profile())
        .await;
    assert!(!result.compliant);
    assert_eq!(result.violations, vec!["Messaging_Outside_Allowed_Hours"]);
}

#[tokio::test]
async fn deny_without_reasons_reports_opa_deny() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/data/clinic/policy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": { "decision": "DENY" }
        })))
        .mount(&server)
        .await;

    let agent = ComplianceAgent::new(Some(OpaClient::new(&server.uri())));
    let result = agent
        .validate(&actions(), "agent", "automated", &profile())
        .await;
    assert!(!result.compliant);
    assert_eq!(result.violations, vec!["OPA_Deny"]);
}

#[tokio::test]
async fn oracle_error_fails_closed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/data/clinic/policy"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let agent = ComplianceAgent::new(Some(OpaClient::new(&server.uri())));
    let result = agent
        .validate(&actions(), "agent", "automated", &profile())
        .await;
    assert!(!result.compliant);
    assert_eq!(result.violations, vec!["OPA_Unavailable"]);
}

#[tokio::test]
async fn unreachable_oracle_fails_closed() {
    let agent = ComplianceAgent::new(Some(OpaClient::new("http://127.0.0.1:9")));
    let result = agent
        .validate(&actions(), "agent", "automated", &profile())
        .await;
    assert!(!result.compliant);
    assert_eq!(result.violations, vec!["OPA_Unavailable"]);
}

#[tokio::test]
async fn empty_result_defaults_to_deny() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/data/clinic/policy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let agent = ComplianceAgent::new(Some(OpaClient::new(&server.uri())));
    let result = agent
        .validate(&actions(), "agent", "automated", &profile())
        .await;
    assert!(!result.compliant);
    assert_eq!(result.violations, vec!["OPA_Deny"]);
}
