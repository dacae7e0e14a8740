use std::sync::{Mutex, Once};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::errors::PlatformError;

/// Ensure we only install a single global recorder even if `init_metrics`
/// is called multiple times (e.g. from tests).
static INIT: Once = Once::new();
static HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Cloneable handle used by the `/metrics` route to render the current
/// Prometheus text exposition.
#[derive(Clone)]
pub struct MetricsHandle(PrometheusHandle);

impl MetricsHandle {
    pub fn render(&self) -> String {
        self.0.render()
    }
}

/// Install the global Prometheus recorder and return a render handle.
///
/// Unlike an exporter with its own listener, the recorder is scrape-passive:
/// the service exposes the rendered text itself. Subsequent calls return the
/// handle from the first successful installation.
pub fn init_metrics() -> Result<MetricsHandle, PlatformError> {
    let mut init_error: Option<String> = None;

    INIT.call_once(|| match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if let Ok(mut slot) = HANDLE.lock() {
                *slot = Some(handle);
            }
        }
        Err(err) => init_error = Some(err.to_string()),
    });

    if let Some(err) = init_error {
        return Err(PlatformError::Metrics(err));
    }

    HANDLE
        .lock()
        .ok()
        .and_then(|slot| slot.clone())
        .map(MetricsHandle)
        .ok_or_else(|| PlatformError::Metrics("recorder not installed".to_string()))
}

/// Record a counter metric by name.
///
/// The `name` parameter must be a string literal or other `'static` string.
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Record a histogram metric (seconds or other appropriate units).
pub fn record_histogram(name: &'static str, value: f64) {
    histogram!(name).record(value);
}

/// Record a gauge metric by name.
pub fn record_gauge(name: &'static str, value: f64) {
    gauge!(name).set(value);
}
