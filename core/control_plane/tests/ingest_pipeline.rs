//! End-to-end ingest: appointment → scored proposal → signed plan.

use std::sync::Arc;

use actix_web::{test, App};
use control_plane::api::validation::ValidationSchemas;
use control_plane::api::{configure_http, ApiContext};
use control_plane::orchestration::agents::ComplianceAgent;
use control_plane::orchestration::Orchestrator;
use control_plane::queue::InMemoryQueue;
use control_plane::settings::Settings;
use control_plane::storage::{EventStore, InMemoryEventStore};
use serde_json::{json, Value};

fn context(settings: Settings) -> (ApiContext, Arc<InMemoryEventStore>) {
    let settings = Arc::new(settings);
    let events = Arc::new(InMemoryEventStore::new());
    let orchestrator = Arc::new(Orchestrator::new(
        settings.clone(),
        ComplianceAgent::new(None),
        None,
        Some(events.clone() as Arc<dyn EventStore>),
    ));
    let ctx = ApiContext {
        settings,
        orchestrator,
        events: Some(events.clone()),
        queue: Some(Arc::new(InMemoryQueue::new())),
        metrics: None,
        schemas: Arc::new(ValidationSchemas::new()),
    };
    (ctx, events)
}

fn signed_settings() -> Settings {
    Settings {
        hmac_secret: "test-secret".to_string(),
        ..Settings::default()
    }
}

/// Heavy history, first visit, unreachable, awkward slot: must land high.
fn high_risk_appointment() -> Value {
    json!({
        "appointment_id": "APT-E2E-001",
        "patient_id": "PAT-001",
        "clinic_id": "CLINIC-A",
        "scheduled_at": "2026-03-16T08:00:00+00:00",
        "previous_no_shows": 3,
        "is_first_visit": true,
        "patient_phone": "",
        "patient_whatsapp": false,
    })
}

/// Clean history, reachable on both channels, mid-week mid-morning,
/// far in the future: must land low.
fn low_risk_appointment() -> Value {
    json!({
        "appointment_id": "APT-E2E-002",
        "patient_id": "PAT-002",
        "clinic_id": "CLINIC-A",
        "scheduled_at": "2030-06-12T10:00:00+00:00",
        "previous_no_shows": 0,
        "is_first_visit": false,
        "patient_phone": "+34600000000",
        "patient_whatsapp": true,
    })
}

#[actix_web::test]
async fn high_risk_ingest_produces_three_signed_actions() {
    let (ctx, _) = context(signed_settings());
    let app = test::init_service(
        App::new().configure(|cfg| configure_http(cfg, ctx.clone())),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/ingest")
        .set_json(high_risk_appointment())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 202);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["risk_level"], "high");
    assert_eq!(body["actions_count"], 3);
    assert_eq!(body["compliant"], true);
    assert_eq!(body["pr_url"], Value::Null);
    assert!(!body["proposal_id"].as_str().unwrap().is_empty());
}

#[actix_web::test]
async fn signed_plan_carries_verifiable_digest() {
    let (ctx, _) = context(signed_settings());
    let appointment: shared_types::Appointment =
        serde_json::from_value(high_risk_appointment()).unwrap();

    let result = ctx.orchestrator.process_appointment(&appointment).await;

    // 64-hex-char HMAC digest when a secret is configured.
    assert_eq!(result.hmac_signature.len(), 64);
    assert!(result
        .hmac_signature
        .chars()
        .all(|c| c.is_ascii_hexdigit()));
    assert!(result.pr_url.is_none());
    assert!(result.compliant);
}

#[actix_web::test]
async fn low_risk_ingest_produces_single_action() {
    let (ctx, _) = context(signed_settings());
    let app = test::init_service(
        App::new().configure(|cfg| configure_http(cfg, ctx.clone())),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/ingest")
        .set_json(low_risk_appointment())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 202);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["risk_level"], "low");
    assert_eq!(body["actions_count"], 1);
}

#[actix_web::test]
async fn lifecycle_events_emitted_in_order() {
    let (ctx, events) = context(signed_settings());
    let app = test::init_service(
        App::new().configure(|cfg| configure_http(cfg, ctx.clone())),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/ingest")
        .set_json(high_risk_appointment())
        .to_request();
    test::call_service(&app, req).await;

    let emitted = events
        .list_events(Some("APT-E2E-001"), None, 100)
        .await
        .unwrap();
    let types: Vec<&str> = emitted
        .iter()
        .rev()
        .map(|e| e.event_type.as_str())
        .collect();
    assert_eq!(
        types,
        vec![
            "appointment_received",
            "risk_scored",
            "proposal_created",
            "proposal_signed",
        ]
    );
}

#[actix_web::test]
async fn missing_required_fields_rejected_with_envelope() {
    let (ctx, _) = context(signed_settings());
    let app = test::init_service(
        App::new().configure(|cfg| configure_http(cfg, ctx.clone())),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/ingest")
        .set_json(json!({"appointment_id": "X"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 422);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_code"], "INVALID_REQUEST");
    assert!(body["request_id"].as_str().is_some());
    assert!(body["details"].as_str().unwrap().contains("patient_id"));
}

#[actix_web::test]
async fn unsigned_when_no_secret_configured() {
    let (ctx, events) = context(Settings::default());
    let app = test::init_service(
        App::new().configure(|cfg| configure_http(cfg, ctx.clone())),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/ingest")
        .set_json(high_risk_appointment())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 202);

    let emitted = events
        .list_events(Some("APT-E2E-001"), Some("proposal_signed"), 10)
        .await
        .unwrap();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].payload["signed"], false);
}

#[actix_web::test]
async fn unknown_route_returns_envelope_404() {
    let (ctx, _) = context(signed_settings());
    let app = test::init_service(
        App::new().configure(|cfg| configure_http(cfg, ctx.clone())),
    )
    .await;

    let req = test::TestRequest::get().uri("/does-not-exist").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 404);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_code"], "INVALID_REQUEST");
    assert!(body["request_id"].as_str().is_some());
}

#[actix_web::test]
async fn health_endpoint_is_alive() {
    let (ctx, _) = context(signed_settings());
    let app = test::init_service(
        App::new().configure(|cfg| configure_http(cfg, ctx.clone())),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
}
