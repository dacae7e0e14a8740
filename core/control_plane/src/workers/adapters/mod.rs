pub mod noop;
pub mod twilio_sms;

use async_trait::async_trait;
use shared_types::{ActionEnvelope, AdapterResult};
use thiserror::Error;

pub use noop::NoopAdapter;
pub use twilio_sms::TwilioSmsAdapter;

/// A transient execution failure - the worker reacts with retry/DLQ, never
/// by propagating to the queue layer.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("provider request failed: {0}")]
    Provider(String),

    #[error("adapter execution failed: {0}")]
    Execution(String),
}

/// Channel-specific execution capability.
///
/// Returning `Err` marks the action eligible for retry. Permanent,
/// non-retryable conditions (like missing parameters) come back as an `Ok`
/// result with an error code instead.
#[async_trait]
pub trait ActionAdapter: Send + Sync {
    async fn execute(&self, action: &ActionEnvelope) -> Result<AdapterResult, AdapterError>;
}
