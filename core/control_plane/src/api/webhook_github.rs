//! GitHub webhook endpoint - turns PR merge events into queued work.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;
use serde_json::{json, Value};
use shared_types::delivery_key;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use super::error::ApiError;
use super::ApiContext;
use crate::queue::enqueue_action;
use crate::signing::{constant_time_eq, hmac_sha256_hex};
use crate::storage::NewEvent;

/// Delivery-id idempotency marker lifetime.
const IDEMPOTENCY_TTL_SECS: u64 = 86_400;

#[derive(Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    pub message: String,
}

fn header<'a>(req: &'a HttpRequest, name: &str) -> &'a str {
    req.headers()
        .get(name)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
}

/// Verify the `sha256=<hex>` signature over the raw body.
fn verify_signature(body: &[u8], secret: &str, signature_header: &str) -> bool {
    let Some(received) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    match hmac_sha256_hex(secret, body) {
        Ok(expected) => constant_time_eq(expected.as_bytes(), received.as_bytes()),
        Err(_) => false,
    }
}

/// Best-effort extraction of the appointment id from PR title/body.
///
/// Convention: the body carries an `appointment_id: APT-XXX` line; failing
/// that, the title ends with a ` - ` separated segment. The spaced delimiter
/// keeps hyphenated ids like `APT-200` intact.
fn extract_appointment_id(title: &str, body: &str) -> String {
    for line in body.lines() {
        let stripped = line.trim();
        if stripped.to_lowercase().starts_with("appointment_id:") {
            if let Some((_, value)) = stripped.split_once(':') {
                return value.trim().to_string();
            }
        }
    }

    if title.contains(" - ") {
        if let Some(segment) = title.rsplit(" - ").next() {
            return segment.trim().to_string();
        }
    }

    String::new()
}

/// Handle GitHub webhook deliveries for PR merge events.
///
/// Flow: verify signature → parse → idempotency gate → filter → emit
/// `pr_merged` → enqueue `execute_plan`.
pub async fn github_webhook(
    req: HttpRequest,
    body: web::Bytes,
    ctx: web::Data<ApiContext>,
) -> Result<HttpResponse, ApiError> {
    let correlation_id = Uuid::new_v4();
    let span = platform::correlation_span(correlation_id, "github_webhook");

    async move {
        let settings = &ctx.settings;

        // 1. Signature verification (fail-closed)
        if settings.github_webhook_secret.is_empty() {
            warn!("webhook secret not set, rejecting delivery (fail-closed)");
            return Err(ApiError::unavailable(
                "Webhook signature verification not configured",
            ));
        }
        let signature = header(&req, "X-Hub-Signature-256");
        if !verify_signature(&body, &settings.github_webhook_secret, signature) {
            return Err(ApiError::signature_invalid("Invalid signature"));
        }

        // 2. Parse payload
        let payload: Value = serde_json::from_slice(&body)
            .map_err(|_| ApiError::bad_request("Invalid JSON"))?;

        // 3. Idempotency gate
        let delivery_id = header(&req, "X-GitHub-Delivery").to_string();
        if let (Some(queue), false) = (&ctx.queue, delivery_id.is_empty()) {
            let key = delivery_key(&delivery_id);
            match queue.try_acquire(&key, IDEMPOTENCY_TTL_SECS).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(delivery_id = %delivery_id, "duplicate delivery, skipping");
                    return Ok(HttpResponse::Ok().json(WebhookResponse {
                        status: "duplicate",
                        message: "Already processed".to_string(),
                    }));
                }
                Err(err) => {
                    // A broken marker store must not drop deliveries.
                    warn!(error = %err, "idempotency marker unavailable");
                }
            }
        }

        // 4. Filter: only merged PRs from the tracked repo
        let event = header(&req, "X-GitHub-Event");
        if event != "pull_request" {
            return Ok(HttpResponse::Accepted().json(WebhookResponse {
                status: "ignored",
                message: format!("Event type '{}' ignored", event),
            }));
        }

        let action = payload.get("action").and_then(Value::as_str).unwrap_or("");
        let pr = payload.get("pull_request").cloned().unwrap_or(Value::Null);
        let merged = pr.get("merged").and_then(Value::as_bool).unwrap_or(false);
        if action != "closed" || !merged {
            return Ok(HttpResponse::Accepted().json(WebhookResponse {
                status: "ignored",
                message: "PR not merged".to_string(),
            }));
        }

        let repo_name = payload
            .get("repository")
            .and_then(|r| r.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("");
        if repo_name != settings.github_repo {
            warn!(repo = %repo_name, "webhook from unexpected repo");
            return Ok(HttpResponse::Accepted().json(WebhookResponse {
                status: "ignored",
                message: format!("Repo '{}' not tracked", repo_name),
            }));
        }

        // 5. Extract data and emit the merge event
        let pr_number = pr.get("number").and_then(Value::as_i64).unwrap_or(0);
        let merge_sha = pr
            .get("merge_commit_sha")
            .and_then(Value::as_str)
            .unwrap_or("");
        let pr_title = pr.get("title").and_then(Value::as_str).unwrap_or("");
        let pr_body = pr.get("body").and_then(Value::as_str).unwrap_or("");
        let appointment_id = extract_appointment_id(pr_title, pr_body);

        let aggregate_id = if appointment_id.is_empty() {
            format!("pr-{}", pr_number)
        } else {
            appointment_id.clone()
        };
        if let Some(events) = &ctx.events {
            let event = NewEvent::new(
                &aggregate_id,
                "pr_merged",
                json!({
                    "pr_number": pr_number,
                    "merge_commit_sha": merge_sha,
                    "appointment_id": appointment_id,
                    "repo": repo_name,
                }),
            );
            if let Err(err) = events.append(event).await {
                warn!(error = %err, "event store append failed for pr_merged");
            }
        }

        // 6. Enqueue execution for the worker
        if let Some(queue) = &ctx.queue {
            let envelope = json!({
                "action_type": "execute_plan",
                "pr_number": pr_number,
                "merge_commit_sha": merge_sha,
                "appointment_id": appointment_id,
                "environment": settings.environment,
            });
            match enqueue_action(queue.as_ref(), &envelope).await {
                Ok(_) => info!(
                    pr_number,
                    appointment_id = %appointment_id,
                    "enqueued execution for merged PR"
                ),
                Err(err) => warn!(error = %err, "enqueue failed for merged PR"),
            }
        }

        Ok(HttpResponse::Accepted().json(WebhookResponse {
            status: "accepted",
            message: format!("PR #{} merged; execution enqueued", pr_number),
        }))
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appointment_id_from_body_line() {
        let id = extract_appointment_id(
            "proposal/abcd1234",
            "appointment_id: APT-100\nenvironment: dev",
        );
        assert_eq!(id, "APT-100");
    }

    #[test]
    fn appointment_id_from_title_dash_segment() {
        let id = extract_appointment_id("proposal/abcd1234 - APT-200", "");
        assert_eq!(id, "APT-200");
    }

    #[test]
    fn body_line_wins_over_title() {
        let id = extract_appointment_id(
            "proposal/abcd1234 - APT-200",
            "appointment_id: APT-100",
        );
        assert_eq!(id, "APT-100");
    }

    #[test]
    fn hyphenated_ids_survive_title_parsing() {
        let id = extract_appointment_id("proposal/ab-cd-12 - APT-300", "");
        assert_eq!(id, "APT-300");
    }

    #[test]
    fn missing_markers_yield_empty() {
        assert_eq!(extract_appointment_id("plain title", "plain body"), "");
    }

    #[test]
    fn signature_round_trip() {
        let secret = "test-webhook-secret";
        let body = br#"{"action":"closed"}"#;
        let sig = format!("sha256={}", hmac_sha256_hex(secret, body).unwrap());
        assert!(verify_signature(body, secret, &sig));
        assert!(!verify_signature(body, secret, "sha256=invalid"));
        assert!(!verify_signature(body, secret, "sha1=whatever"));
    }
}
