//! Orchestrator - the real pipeline: score → sequence → validate → sign → PR.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use shared_types::{Action, Appointment, ClinicProfile, RiskLevel};
use tracing::{info, warn};
use uuid::Uuid;

use crate::gitops::{build_execution_plan, GitHubPrCreator};
use crate::orchestration::agents::{ComplianceAgent, RevenueAgent};
use crate::scoring::risk_scorer::parse_instant;
use crate::scoring::RiskScorer;
use crate::settings::Settings;
use crate::signing::sign_payload;
use crate::storage::{EventStore, NewEvent};

/// Outcome of one trip through the pipeline.
#[derive(Debug, Clone)]
pub struct OrchestratorResult {
    pub proposal_id: String,
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    pub actions: Vec<Action>,
    pub hmac_signature: String,
    pub pr_url: Option<String>,
    pub compliant: bool,
    pub violations: Vec<String>,
}

/// Coordinates the full pipeline for one appointment.
///
/// States: received → scored → sequenced → validated → built → signed →
/// submitted (or skipped-pr). Compliance failure short-circuits to rejected.
pub struct Orchestrator {
    settings: Arc<Settings>,
    scorer: RiskScorer,
    revenue: RevenueAgent,
    compliance: ComplianceAgent,
    github_pr: Option<GitHubPrCreator>,
    events: Option<Arc<dyn EventStore>>,
}

impl Orchestrator {
    pub fn new(
        settings: Arc<Settings>,
        compliance: ComplianceAgent,
        github_pr: Option<GitHubPrCreator>,
        events: Option<Arc<dyn EventStore>>,
    ) -> Self {
        Self {
            settings,
            scorer: RiskScorer::new(),
            revenue: RevenueAgent::new(),
            compliance,
            github_pr,
            events,
        }
    }

    /// Fire-and-forget event append. Store failures degrade to a warning,
    /// never the pipeline outcome.
    async fn emit(&self, aggregate_id: &str, event_type: &str, payload: Value) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(err) = events
            .append(NewEvent::new(aggregate_id, event_type, payload))
            .await
        {
            warn!(event_type, error = %err, "event store append failed");
        }
    }

    pub async fn process_appointment(&self, appointment: &Appointment) -> OrchestratorResult {
        let proposal_id = Uuid::new_v4().to_string();
        let appt_id = if appointment.appointment_id.is_empty() {
            proposal_id.clone()
        } else {
            appointment.appointment_id.clone()
        };

        self.emit(
            &appt_id,
            "appointment_received",
            serde_json::to_value(appointment).unwrap_or(Value::Null),
        )
        .await;

        // 1. Risk scoring
        let risk = self.scorer.score(appointment);
        info!(
            level = %risk.level,
            score = risk.score,
            appointment_id = %appt_id,
            "risk scored"
        );
        self.emit(
            &appt_id,
            "risk_scored",
            json!({ "score": risk.score, "level": risk.level }),
        )
        .await;

        // 2. Action sequence
        let mut clinic_profile = self
            .settings
            .clinic_profile()
            .unwrap_or_else(|err| {
                warn!(error = %err, "clinic profile unavailable, using defaults");
                ClinicProfile::default()
            });
        if clinic_profile.clinic_id.is_empty() {
            clinic_profile.clinic_id = appointment.clinic_id.clone();
        }

        let sequence =
            self.revenue
                .generate_sequence(risk.level, risk.score, appointment, &clinic_profile);
        let resolved_actions = resolve_scheduled_times(
            sequence.actions,
            &appointment.scheduled_at,
            &appointment.patient_id,
            &appointment.appointment_id,
        );

        // 3. Compliance check
        let compliance = self
            .compliance
            .validate(&resolved_actions, "agent", "automated", &clinic_profile)
            .await;
        if !compliance.compliant {
            warn!(
                proposal_id = %proposal_id,
                violations = ?compliance.violations,
                "compliance rejected proposal"
            );
            return OrchestratorResult {
                proposal_id,
                risk_level: risk.level,
                risk_score: risk.score,
                actions: resolved_actions,
                hmac_signature: String::new(),
                pr_url: None,
                compliant: false,
                violations: compliance.violations,
            };
        }

        // 4. Build execution plan
        let mut plan = build_execution_plan(
            &proposal_id,
            &appointment.clinic_id,
            &appointment.patient_id,
            &appointment.appointment_id,
            resolved_actions,
            risk.level,
            &self.settings.environment,
        );
        self.emit(
            &appt_id,
            "proposal_created",
            json!({ "proposal_id": proposal_id, "actions": plan.actions.len() }),
        )
        .await;

        // 5. HMAC sign
        let signature = if self.settings.hmac_secret.is_empty() {
            warn!("HMAC secret not set, plan will be unsigned");
            String::new()
        } else {
            match serde_json::to_value(&plan)
                .map_err(crate::signing::SigningError::from)
                .and_then(|value| sign_payload(&value, &self.settings.hmac_secret))
            {
                Ok(signature) => signature,
                Err(err) => {
                    warn!(error = %err, "plan signing failed, plan will be unsigned");
                    String::new()
                }
            }
        };
        plan.hmac_signature = signature.clone();
        self.emit(
            &appt_id,
            "proposal_signed",
            json!({ "proposal_id": proposal_id, "signed": !signature.is_empty() }),
        )
        .await;

        // 6. Open PR
        let mut pr_url: Option<String> = None;
        if let Some(github) = &self.github_pr {
            let branch_name = format!("proposal/{}", &proposal_id[..8]);
            match github
                .create_plan_pr(&plan, &self.settings.environment, &branch_name)
                .await
            {
                Ok(pr) => {
                    info!(pr_url = %pr.pr_url, "PR created");
                    self.emit(
                        &appt_id,
                        "pr_opened",
                        json!({ "proposal_id": proposal_id, "pr_url": pr.pr_url }),
                    )
                    .await;
                    pr_url = Some(pr.pr_url);
                }
                Err(err) => {
                    warn!(proposal_id = %proposal_id, error = %err, "failed to create PR");
                }
            }
        } else {
            info!("GitHub PR creation skipped (no token configured)");
        }

        OrchestratorResult {
            proposal_id,
            risk_level: risk.level,
            risk_score: risk.score,
            actions: plan.actions,
            hmac_signature: signature,
            pr_url,
            compliant: true,
            violations: Vec::new(),
        }
    }
}

/// Convert `hours_before` offsets into absolute send instants. An
/// unparseable appointment time anchors to now + 24h so reminders still go
/// out in a sane window.
fn resolve_scheduled_times(
    templates: Vec<shared_types::ActionTemplate>,
    appointment_iso: &str,
    patient_id: &str,
    appointment_id: &str,
) -> Vec<Action> {
    let anchor = parse_instant(appointment_iso)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc::now() + Duration::hours(24));

    templates
        .into_iter()
        .map(|template| Action {
            scheduled_at: (anchor - Duration::hours(template.hours_before)).to_rfc3339(),
            action_type: template.action_type,
            channel: template.channel,
            template: template.template,
            patient_id: patient_id.to_string(),
            appointment_id: appointment_id.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::ActionTemplate;

    #[test]
    fn offsets_resolve_against_appointment_time() {
        let templates = vec![ActionTemplate {
            action_type: "send_reminder".to_string(),
            channel: "whatsapp".to_string(),
            template: "confirm_reminder_v2".to_string(),
            hours_before: 24,
        }];
        let actions = resolve_scheduled_times(
            templates,
            "2026-03-18T10:00:00+00:00",
            "PAT-1",
            "APT-1",
        );
        assert_eq!(actions[0].scheduled_at, "2026-03-17T10:00:00+00:00");
        assert_eq!(actions[0].patient_id, "PAT-1");
        assert_eq!(actions[0].appointment_id, "APT-1");
    }

    #[test]
    fn unparseable_time_anchors_to_tomorrow() {
        let templates = vec![ActionTemplate {
            action_type: "send_reminder".to_string(),
            channel: "whatsapp".to_string(),
            template: "confirm_reminder_v2".to_string(),
            hours_before: 24,
        }];
        let before = Utc::now();
        let actions = resolve_scheduled_times(templates, "garbage", "PAT-1", "APT-1");
        let resolved = chrono::DateTime::parse_from_rfc3339(&actions[0].scheduled_at).unwrap();
        // now + 24h - 24h ≈ now
        let delta = resolved.with_timezone(&Utc) - before;
        assert!(delta.num_seconds().abs() < 5);
    }
}
