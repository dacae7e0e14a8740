use std::env;

use tracing::{info, info_span, Span};
use uuid::Uuid;

use crate::errors::PlatformError;
use crate::logging;

/// Initialize structured tracing for the application.
pub fn init_tracing(service_name: &str) -> Result<(), PlatformError> {
    logging::init_logging(service_name);

    let environment = env::var("CACP_ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());

    info!(
        service = %service_name,
        environment = %environment,
        event = "startup",
        "application tracing initialized"
    );

    Ok(())
}

/// Create a span carrying the correlation ID for request tracing.
pub fn correlation_span(correlation_id: Uuid, operation: &str) -> Span {
    info_span!(
        "operation",
        %operation,
        correlation_id = %correlation_id,
        event_type = "request",
    )
}

/// Extract a correlation ID from a request or generate a new one.
pub fn extract_correlation_id(existing_id: Option<Uuid>) -> Uuid {
    logging::ensure_correlation_id(existing_id)
}
