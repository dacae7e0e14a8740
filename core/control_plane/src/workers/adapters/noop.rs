//! No-op adapter - logs execution without side effects.

use async_trait::async_trait;
use shared_types::{ActionEnvelope, AdapterResult};
use tracing::info;

use super::{ActionAdapter, AdapterError};

#[derive(Debug, Default, Clone)]
pub struct NoopAdapter;

impl NoopAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ActionAdapter for NoopAdapter {
    async fn execute(&self, action: &ActionEnvelope) -> Result<AdapterResult, AdapterError> {
        info!(
            action_type = %action.action_type,
            appointment_id = %action.appointment_id,
            "NOOP executing"
        );
        Ok(AdapterResult::executed("noop", &action.action_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn returns_executed() {
        let action: ActionEnvelope = serde_json::from_value(json!({
            "action_type": "execute_plan",
            "appointment_id": "APT-1"
        }))
        .unwrap();
        let result = NoopAdapter::new().execute(&action).await.unwrap();
        assert_eq!(result.adapter, "noop");
        assert_eq!(result.status, "executed");
        assert_eq!(result.action_type, "execute_plan");
    }
}
