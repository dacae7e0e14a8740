//! JSON-schema validation for inbound payloads.

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

/// Validation schemas compiled once at startup.
pub struct ValidationSchemas {
    appointment_schema: JSONSchema,
}

impl ValidationSchemas {
    pub fn new() -> Self {
        let schema_value = serde_json::json!({
            "type": "object",
            "required": ["appointment_id", "patient_id", "clinic_id", "scheduled_at"],
            "properties": {
                "appointment_id": { "type": "string", "minLength": 1 },
                "patient_id": { "type": "string", "minLength": 1 },
                "clinic_id": { "type": "string", "minLength": 1 },
                "scheduled_at": { "type": "string", "minLength": 1 },
                "treatment_type": { "type": "string" },
                "is_first_visit": { "type": "boolean" },
                "previous_no_shows": { "type": "integer", "minimum": 0 },
                "patient_phone": { "type": "string" },
                "patient_whatsapp": { "type": "boolean" },
                "consent_given": { "type": "boolean" }
            }
        });
        let appointment_schema = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema_value)
            .expect("appointment schema is valid");

        Self { appointment_schema }
    }

    pub fn validate_appointment(&self, value: &Value) -> Result<(), String> {
        self.appointment_schema.validate(value).map_err(|errors| {
            errors
                .map(|e| format!("{} at {}", e, e.instance_path))
                .collect::<Vec<_>>()
                .join(", ")
        })
    }
}

impl Default for ValidationSchemas {
    fn default() -> Self {
        Self::new()
    }
}
