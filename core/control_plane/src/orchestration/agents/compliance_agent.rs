//! Compliance agent - validates proposals before signing.

use metrics::counter;
use serde_json::{Map, Value};
use shared_types::{Action, ClinicProfile};
use tracing::{error, warn};

use crate::policy::{build_opa_input, OpaClient};

#[derive(Debug, Clone)]
pub struct ComplianceResult {
    pub compliant: bool,
    pub violations: Vec<String>,
}

/// Validates action proposals against local limits and OPA policies.
///
/// The oracle is injected; absence means the remote check is skipped while
/// local checks still apply. An unreachable oracle is a denial, never a pass.
pub struct ComplianceAgent {
    opa: Option<OpaClient>,
}

impl ComplianceAgent {
    pub fn new(opa: Option<OpaClient>) -> Self {
        Self { opa }
    }

    pub async fn validate(
        &self,
        actions: &[Action],
        role: &str,
        mode: &str,
        clinic_profile: &ClinicProfile,
    ) -> ComplianceResult {
        let mut violations: Vec<String> = Vec::new();

        let max_messages = clinic_profile.messaging.max_messages_per_patient_per_day;
        if actions.len() > max_messages {
            violations.push(format!(
                "Action count ({}) exceeds daily limit ({})",
                actions.len(),
                max_messages
            ));
        }

        match &self.opa {
            Some(opa) => {
                for action in actions {
                    let mut extra = Map::new();
                    extra.insert(
                        "channel".to_string(),
                        Value::String(action.channel.clone()),
                    );
                    let input = build_opa_input(
                        &action.action_type,
                        role,
                        mode,
                        &action.patient_id,
                        &clinic_profile.clinic_id,
                        Some(&extra),
                    );
                    match opa.evaluate(&input).await {
                        Ok(result) if result.decision == "ALLOW" => {
                            counter!("cacp_opa_decisions_total", "result" => "allow").increment(1);
                        }
                        Ok(result) => {
                            counter!("cacp_opa_decisions_total", "result" => "deny").increment(1);
                            if result.violations.is_empty() {
                                violations.push("OPA_Deny".to_string());
                            } else {
                                violations.extend(result.violations);
                            }
                        }
                        Err(err) => {
                            counter!("cacp_opa_errors_total").increment(1);
                            error!(error = %err, "OPA evaluation failed (fail-closed)");
                            violations.push("OPA_Unavailable".to_string());
                        }
                    }
                }
            }
            None => {
                warn!("OPA client not configured, skipping policy evaluation");
            }
        }

        ComplianceResult {
            compliant: violations.is_empty(),
            violations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::MessagingPolicy;

    fn action(action_type: &str) -> Action {
        Action {
            action_type: action_type.to_string(),
            channel: "whatsapp".to_string(),
            template: "confirm_reminder_v2".to_string(),
            scheduled_at: "2026-03-17T10:00:00+00:00".to_string(),
            patient_id: "PAT-1".to_string(),
            appointment_id: "APT-1".to_string(),
        }
    }

    #[tokio::test]
    async fn within_limits_without_opa_is_compliant() {
        let agent = ComplianceAgent::new(None);
        let result = agent
            .validate(
                &[action("send_reminder")],
                "agent",
                "automated",
                &ClinicProfile::default(),
            )
            .await;
        assert!(result.compliant);
        assert!(result.violations.is_empty());
    }

    #[tokio::test]
    async fn too_many_actions_violates_daily_limit() {
        let agent = ComplianceAgent::new(None);
        let profile = ClinicProfile {
            clinic_id: "CL-1".to_string(),
            messaging: MessagingPolicy {
                preferred_channel: "whatsapp".to_string(),
                max_messages_per_patient_per_day: 2,
            },
        };
        let actions = vec![
            action("send_reminder"),
            action("send_confirmation"),
            action("reschedule"),
        ];
        let result = agent.validate(&actions, "agent", "automated", &profile).await;
        assert!(!result.compliant);
        assert_eq!(result.violations.len(), 1);
        assert!(result.violations[0].contains("exceeds daily limit"));
    }
}
