//! Revenue agent - generates action sequences based on risk level.

use shared_types::{ActionTemplate, Appointment, ClinicProfile, RiskLevel};

/// An ordered action sequence with its estimated confirmation-rate lift.
#[derive(Debug, Clone)]
pub struct ActionSequence {
    pub actions: Vec<ActionTemplate>,
    pub expected_lift: f64,
}

/// Generates action sequences optimised for confirmation rates.
///
/// Low risk:    1 reminder (24h before)
/// Medium risk: reminder (48h) + confirmation request (24h)
/// High risk:   reminder + confirmation + reschedule offer (2h)
#[derive(Debug, Default, Clone)]
pub struct RevenueAgent;

impl RevenueAgent {
    pub fn new() -> Self {
        Self
    }

    pub fn generate_sequence(
        &self,
        risk_level: RiskLevel,
        _risk_score: f64,
        _appointment: &Appointment,
        clinic_profile: &ClinicProfile,
    ) -> ActionSequence {
        let channel = clinic_profile.messaging.preferred_channel.as_str();

        let reminder = |hours_before: i64| ActionTemplate {
            action_type: "send_reminder".to_string(),
            channel: channel.to_string(),
            template: "confirm_reminder_v2".to_string(),
            hours_before,
        };
        let confirmation = ActionTemplate {
            action_type: "send_confirmation".to_string(),
            channel: channel.to_string(),
            template: "urgency_short".to_string(),
            hours_before: 24,
        };
        let reschedule = ActionTemplate {
            action_type: "reschedule".to_string(),
            channel: channel.to_string(),
            template: "reschedule_offer".to_string(),
            hours_before: 2,
        };

        match risk_level {
            RiskLevel::Low => ActionSequence {
                actions: vec![reminder(24)],
                expected_lift: 0.05,
            },
            RiskLevel::Medium => ActionSequence {
                actions: vec![reminder(48), confirmation],
                expected_lift: 0.15,
            },
            RiskLevel::High => ActionSequence {
                actions: vec![reminder(48), confirmation, reschedule],
                expected_lift: 0.25,
            },
        }
    }
}
