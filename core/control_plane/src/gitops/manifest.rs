//! Execution-plan assembly for the gitops config repository.

use chrono::Utc;
use shared_types::{Action, ExecutionPlan, RiskLevel};

/// Assemble a signable execution plan from the pipeline outputs.
///
/// Every action is enriched to carry the patient and appointment identity so
/// queue entries are self-contained after the PR merges. The signature slot
/// stays empty until the signing step fills it.
#[allow(clippy::too_many_arguments)]
pub fn build_execution_plan(
    proposal_id: &str,
    clinic_id: &str,
    patient_id: &str,
    appointment_id: &str,
    actions: Vec<Action>,
    risk_level: RiskLevel,
    environment: &str,
) -> ExecutionPlan {
    let actions = actions
        .into_iter()
        .map(|mut action| {
            if action.patient_id.is_empty() {
                action.patient_id = patient_id.to_string();
            }
            if action.appointment_id.is_empty() {
                action.appointment_id = appointment_id.to_string();
            }
            action
        })
        .collect();

    ExecutionPlan {
        plan_id: proposal_id.to_string(),
        version: "1.0.0".to_string(),
        environment: environment.to_string(),
        clinic_id: clinic_id.to_string(),
        actions,
        risk_level,
        hmac_signature: String::new(),
        created_at: Utc::now().to_rfc3339(),
    }
}
