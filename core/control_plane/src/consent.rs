//! Patient consent records - in-memory store for dev/test.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared_types::Appointment;

/// One-way hash for PII (phone, email) - never store in clear.
pub fn hash_pii(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Immutable consent snapshot for a `(patient, channel)` pair.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConsentRecord {
    pub patient_id: String,
    pub channel: String,
    pub granted_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<String>,
}

impl ConsentRecord {
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// Minimal contract for consent lookups.
pub trait ConsentStore: Send + Sync {
    /// True iff the patient has active consent for the channel.
    fn has_consent(&self, patient_id: &str, channel: &str) -> bool;

    /// Record a consent grant. Re-granting after a revoke replaces the record.
    fn grant(&self, patient_id: &str, channel: &str);

    /// Record a consent revocation. No-op when nothing is active.
    fn revoke(&self, patient_id: &str, channel: &str);

    fn get(&self, patient_id: &str, channel: &str) -> Option<ConsentRecord>;
}

/// Concurrent in-memory consent store. Single-process only; a real
/// deployment would back this with the clinic's consent service.
#[derive(Default)]
pub struct InMemoryConsentStore {
    records: DashMap<String, ConsentRecord>,
}

impl InMemoryConsentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(patient_id: &str, channel: &str) -> String {
        format!("{}:{}", patient_id, channel)
    }

    /// Bootstrap consent from an appointment payload (dev convenience).
    ///
    /// When the appointment carries `consent_given`, a phone number grants
    /// `sms` and a WhatsApp opt-in grants `whatsapp`.
    pub fn load_from_appointment(&self, appointment: &Appointment) {
        if appointment.patient_id.is_empty() || !appointment.consent_given {
            return;
        }
        if !appointment.patient_phone.is_empty() {
            self.grant(&appointment.patient_id, "sms");
        }
        if appointment.patient_whatsapp {
            self.grant(&appointment.patient_id, "whatsapp");
        }
    }
}

impl ConsentStore for InMemoryConsentStore {
    fn has_consent(&self, patient_id: &str, channel: &str) -> bool {
        self.records
            .get(&Self::key(patient_id, channel))
            .map(|record| record.is_active())
            .unwrap_or(false)
    }

    fn grant(&self, patient_id: &str, channel: &str) {
        self.records.insert(
            Self::key(patient_id, channel),
            ConsentRecord {
                patient_id: patient_id.to_string(),
                channel: channel.to_string(),
                granted_at: Utc::now().to_rfc3339(),
                revoked_at: None,
            },
        );
    }

    fn revoke(&self, patient_id: &str, channel: &str) {
        if let Some(mut entry) = self.records.get_mut(&Self::key(patient_id, channel)) {
            if entry.is_active() {
                entry.revoked_at = Some(Utc::now().to_rfc3339());
            }
        }
    }

    fn get(&self, patient_id: &str, channel: &str) -> Option<ConsentRecord> {
        self.records
            .get(&Self::key(patient_id, channel))
            .map(|record| record.clone())
    }
}
