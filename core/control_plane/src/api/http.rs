//! Ingest and operational endpoints.

use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::Value;
use shared_types::Appointment;
use tracing::{info, Instrument};
use uuid::Uuid;

use super::error::ApiError;
use super::ApiContext;
use crate::healthchecks::{check_opa, check_postgres, check_redis};

/// Response after ingesting an appointment.
#[derive(Serialize)]
pub struct IngestResponse {
    pub proposal_id: String,
    pub risk_level: String,
    pub risk_score: f64,
    pub actions_count: usize,
    pub pr_url: Option<String>,
    pub compliant: bool,
    pub violations: Vec<String>,
    pub message: String,
}

/// Simple liveness response used by `/health`.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Receive an appointment → score risk → generate proposal → open PR.
pub async fn ingest_appointment(
    body: web::Bytes,
    ctx: web::Data<ApiContext>,
) -> Result<HttpResponse, ApiError> {
    let correlation_id = Uuid::new_v4();
    let span = platform::correlation_span(correlation_id, "ingest_appointment");

    async move {
        let payload: Value = serde_json::from_slice(&body)
            .map_err(|e| ApiError::invalid_request(format!("Invalid JSON body: {}", e)))?;

        ctx.schemas.validate_appointment(&payload).map_err(|details| {
            ApiError::invalid_request("Appointment failed validation")
                .with_details(Value::String(details))
        })?;

        let appointment: Appointment = serde_json::from_value(payload)
            .map_err(|e| ApiError::invalid_request(format!("Malformed appointment: {}", e)))?;

        info!(
            appointment_id = %appointment.appointment_id,
            clinic_id = %appointment.clinic_id,
            "appointment received"
        );

        let result = ctx.orchestrator.process_appointment(&appointment).await;

        let message = format!(
            "Proposal {} created (risk: {}, score: {:.2}){}",
            &result.proposal_id[..8],
            result.risk_level,
            result.risk_score,
            result
                .pr_url
                .as_deref()
                .map(|url| format!(" - PR: {}", url))
                .unwrap_or_default(),
        );

        Ok(HttpResponse::Accepted().json(IngestResponse {
            proposal_id: result.proposal_id,
            risk_level: result.risk_level.to_string(),
            risk_score: result.risk_score,
            actions_count: result.actions.len(),
            pr_url: result.pr_url,
            compliant: result.compliant,
            violations: result.violations,
            message,
        }))
    }
    .instrument(span)
    .await
}

/// Liveness: the process is up.
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse { status: "ok" })
}

/// Readiness: downstream dependencies reachable. 503 when any check fails.
pub async fn ready(ctx: web::Data<ApiContext>) -> HttpResponse {
    let settings = &ctx.settings;
    let pg = check_postgres(&settings.pg_dsn).await;
    let rd = check_redis(&settings.redis_url).await;
    let opa = check_opa(&settings.opa_url).await;

    let all_ok = pg && rd && opa;
    let body = serde_json::json!({
        "ready": all_ok,
        "checks": { "postgres": pg, "redis": rd, "opa": opa },
    });

    if all_ok {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

/// Prometheus text exposition.
pub async fn metrics(ctx: web::Data<ApiContext>) -> HttpResponse {
    match &ctx.metrics {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; charset=utf-8")
            .body(handle.render()),
        None => HttpResponse::Ok()
            .content_type("text/plain; charset=utf-8")
            .body(String::new()),
    }
}
