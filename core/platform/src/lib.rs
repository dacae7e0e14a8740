pub mod errors;
pub mod logging;
pub mod metrics;
pub mod tracing;

pub use crate::errors::PlatformError;
pub use crate::logging::init_logging;
pub use crate::metrics::{
    init_metrics, record_counter, record_gauge, record_histogram, MetricsHandle,
};
pub use crate::tracing::{correlation_span, extract_correlation_id, init_tracing};
