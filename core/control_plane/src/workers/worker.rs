//! Worker - drains the action queue subject to compliance rails.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{Timelike, Utc};
use chrono_tz::Tz;
use metrics::{counter, gauge};
use serde_json::{Map, Value};
use shared_types::{dedup_key, rate_key, ActionEnvelope, AdapterResult};
use tracing::{info, warn};

use crate::consent::ConsentStore;
use crate::queue::ActionQueue;
use crate::settings::Settings;
use crate::storage::{EventStore, NewEvent};
use crate::workers::adapters::ActionAdapter;

/// Rail and retry knobs for a worker instance.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub quiet_hours_start: u32,
    pub quiet_hours_end: u32,
    /// IANA timezone the quiet-hours window is evaluated in.
    pub timezone: String,
    pub rate_limit: u64,
    pub rate_window_secs: u64,
    pub dedup_ttl_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_secs: Vec<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            quiet_hours_start: 22,
            quiet_hours_end: 8,
            timezone: "Europe/Madrid".to_string(),
            rate_limit: 3,
            rate_window_secs: 86_400,
            dedup_ttl_secs: 86_400,
            max_retries: 3,
            retry_backoff_secs: vec![60, 300, 900],
        }
    }
}

impl From<&Settings> for WorkerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            quiet_hours_start: settings.quiet_hours_start,
            quiet_hours_end: settings.quiet_hours_end,
            timezone: settings.timezone.clone(),
            rate_limit: settings.sms_rate_limit,
            rate_window_secs: settings.sms_rate_window_secs,
            dedup_ttl_secs: settings.dedup_ttl_secs,
            max_retries: settings.max_retries,
            retry_backoff_secs: settings.retry_backoff_secs.clone(),
        }
    }
}

/// True when `hour` falls inside the `[start, end)` window, which wraps
/// across midnight when `start > end`. `start == end` is an empty window.
pub(crate) fn in_quiet_window(hour: u32, start: u32, end: u32) -> bool {
    if start == end {
        return false;
    }
    if start < end {
        start <= hour && hour < end
    } else {
        hour >= start || hour < end
    }
}

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Queue drain loop with consent, quiet-hours, rate-limit, and dedup rails.
///
/// Every decision produces exactly one audit event; adapter errors feed the
/// bounded retry loop and finally the DLQ.
pub struct Worker {
    queue: Arc<dyn ActionQueue>,
    adapters: HashMap<String, Arc<dyn ActionAdapter>>,
    events: Option<Arc<dyn EventStore>>,
    consent: Option<Arc<dyn ConsentStore>>,
    timezone: Tz,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn ActionQueue>,
        adapters: HashMap<String, Arc<dyn ActionAdapter>>,
        events: Option<Arc<dyn EventStore>>,
        consent: Option<Arc<dyn ConsentStore>>,
        config: WorkerConfig,
    ) -> Self {
        let timezone: Tz = config.timezone.parse().unwrap_or_else(|_| {
            warn!(timezone = %config.timezone, "unknown timezone, falling back to UTC");
            Tz::UTC
        });
        Self {
            queue,
            adapters,
            events,
            consent,
            timezone,
            config,
        }
    }

    async fn emit(&self, aggregate_id: &str, event_type: &str, payload: Value) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(err) = events
            .append(NewEvent::new(aggregate_id, event_type, payload))
            .await
        {
            warn!(event_type, error = %err, "event store append failed");
        }
    }

    fn envelope_payload(action: &ActionEnvelope, extra: &[(&str, Value)]) -> Value {
        let mut map = match serde_json::to_value(action) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (key, value) in extra {
            map.insert((*key).to_string(), value.clone());
        }
        Value::Object(map)
    }

    // -- rails ------------------------------------------------------------

    fn check_consent(&self, action: &ActionEnvelope) -> Option<&'static str> {
        let consent = self.consent.as_ref()?;
        if action.patient_id.is_empty() {
            return Some("no_patient_id");
        }
        if !consent.has_consent(&action.patient_id, &action.channel) {
            return Some("no_consent");
        }
        None
    }

    fn check_quiet_hours(&self) -> Option<&'static str> {
        let hour = Utc::now().with_timezone(&self.timezone).hour();
        if in_quiet_window(hour, self.config.quiet_hours_start, self.config.quiet_hours_end) {
            return Some("quiet_hours");
        }
        None
    }

    async fn check_rate_limit(&self, action: &ActionEnvelope) -> Option<&'static str> {
        if action.patient_id.is_empty() || self.config.rate_limit == 0 {
            return None;
        }
        let key = rate_key(&action.patient_id, &action.channel);
        match self
            .queue
            .record_rate_event(&key, now_epoch(), self.config.rate_window_secs)
            .await
        {
            Ok(count) if count >= self.config.rate_limit => Some("rate_limited"),
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "rate-limit window update failed");
                None
            }
        }
    }

    async fn check_dedup(&self, action: &ActionEnvelope) -> Option<&'static str> {
        // No appointment identity, no dedup key to hold.
        if action.appointment_id.is_empty() {
            return None;
        }
        let key = dedup_key(&action.appointment_id, &action.channel);
        match self.queue.try_acquire(&key, self.config.dedup_ttl_secs).await {
            Ok(true) => None,
            Ok(false) => Some("duplicate_action"),
            Err(err) => {
                warn!(error = %err, "dedup marker acquisition failed");
                None
            }
        }
    }

    // -- execute ----------------------------------------------------------

    async fn blocked(&self, action: &ActionEnvelope, reason: &'static str) {
        info!(
            reason,
            action_type = %action.action_type,
            patient_id = %action.patient_id,
            "action blocked"
        );
        counter!("cacp_actions_blocked_total", "reason" => reason).increment(1);
        self.emit(
            &action.aggregate_id(),
            "action_blocked",
            Self::envelope_payload(action, &[("reason", Value::String(reason.to_string()))]),
        )
        .await;
    }

    /// Run one envelope through the rail pipeline and the adapter.
    async fn process(&self, action: &ActionEnvelope) {
        let aggregate_id = action.aggregate_id();

        // 1. Adapter resolution
        let Some(adapter) = self.adapters.get(&action.action_type) else {
            warn!(action_type = %action.action_type, "no adapter for action type");
            self.emit(
                &aggregate_id,
                "action_failed",
                Self::envelope_payload(
                    action,
                    &[("reason", Value::String("no_adapter".to_string()))],
                ),
            )
            .await;
            return;
        };
        let adapter = adapter.clone();

        // 2-4. Consent, quiet hours, rate limit
        if let Some(reason) = self.check_consent(action) {
            return self.blocked(action, reason).await;
        }
        if let Some(reason) = self.check_quiet_hours() {
            return self.blocked(action, reason).await;
        }
        if let Some(reason) = self.check_rate_limit(action).await {
            return self.blocked(action, reason).await;
        }

        // 5. Dedup
        if let Some(reason) = self.check_dedup(action).await {
            return self.blocked(action, reason).await;
        }

        // 6. Execute
        match adapter.execute(action).await {
            Ok(result) => {
                counter!("cacp_actions_executed_total").increment(1);
                info!(action_type = %action.action_type, "action executed");
                self.emit(&aggregate_id, "action_executed", merged_result(action, &result))
                    .await;
            }
            Err(err) => {
                warn!(action_type = %action.action_type, error = %err, "adapter failed");
                // Nothing executed: give the dedup slot back so the retry
                // can reach the adapter again.
                if !action.appointment_id.is_empty() {
                    let key = dedup_key(&action.appointment_id, &action.channel);
                    if let Err(err) = self.queue.release(&key).await {
                        warn!(error = %err, "dedup marker release failed");
                    }
                }
                self.emit(
                    &aggregate_id,
                    "action_failed",
                    Self::envelope_payload(
                        action,
                        &[("reason", Value::String("adapter_error".to_string()))],
                    ),
                )
                .await;
                self.schedule_retry(action.clone()).await;
            }
        }
    }

    // -- retry / DLQ ------------------------------------------------------

    async fn schedule_retry(&self, mut action: ActionEnvelope) {
        action.retry_count += 1;
        let aggregate_id = action.aggregate_id();
        let raw = match serde_json::to_string(&action) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "failed to serialize retry envelope");
                return;
            }
        };

        if action.retry_count > self.config.max_retries {
            if let Err(err) = self.queue.push_dlq(&raw).await {
                warn!(error = %err, "DLQ push failed");
                return;
            }
            counter!("cacp_actions_dead_lettered_total").increment(1);
            info!(
                retry_count = action.retry_count,
                aggregate_id = %aggregate_id,
                "action dead-lettered"
            );
            self.emit(
                &aggregate_id,
                "action_dead_lettered",
                Self::envelope_payload(&action, &[]),
            )
            .await;
            return;
        }

        let backoff = &self.config.retry_backoff_secs;
        let index = ((action.retry_count - 1) as usize).min(backoff.len().saturating_sub(1));
        let delay_secs = backoff.get(index).copied().unwrap_or(60);
        let due_at = now_epoch() + delay_secs as f64;

        if let Err(err) = self.queue.schedule_retry(&raw, due_at).await {
            warn!(error = %err, "retry scheduling failed");
            return;
        }
        info!(
            retry_count = action.retry_count,
            delay_secs,
            aggregate_id = %aggregate_id,
            "action retry scheduled"
        );
        self.emit(
            &aggregate_id,
            "action_retry_scheduled",
            Self::envelope_payload(
                &action,
                &[("delay_secs", Value::from(delay_secs))],
            ),
        )
        .await;
    }

    /// Promote every due retry entry back onto the main queue. Returns the
    /// number of entries moved. The zrem guards against two workers moving
    /// the same entry.
    pub async fn process_retries(&self) -> u64 {
        let due = match self.queue.due_retries(now_epoch()).await {
            Ok(due) => due,
            Err(err) => {
                warn!(error = %err, "retry scan failed");
                return 0;
            }
        };

        let mut moved = 0;
        for raw in due {
            match self.queue.remove_retry(&raw).await {
                Ok(true) => {
                    if let Err(err) = self.queue.push(&raw).await {
                        warn!(error = %err, "retry promotion push failed");
                        continue;
                    }
                    moved += 1;
                }
                Ok(false) => {}
                Err(err) => warn!(error = %err, "retry removal failed"),
            }
        }
        moved
    }

    /// Operator routine: pop up to `max_items` dead letters, reset their
    /// retry counters, and feed them back through the main queue.
    pub async fn replay_dlq(&self, max_items: usize) -> u64 {
        let mut replayed = 0;
        for _ in 0..max_items {
            let raw = match self.queue.pop_dlq().await {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "DLQ pop failed");
                    break;
                }
            };
            let envelope: ActionEnvelope = match serde_json::from_str::<ActionEnvelope>(&raw) {
                Ok(mut envelope) => {
                    envelope.retry_count = 0;
                    envelope
                }
                Err(err) => {
                    warn!(error = %err, "unparseable DLQ entry dropped");
                    continue;
                }
            };
            match serde_json::to_string(&envelope) {
                Ok(fresh) => {
                    if let Err(err) = self.queue.push(&fresh).await {
                        warn!(error = %err, "DLQ replay push failed");
                        break;
                    }
                    replayed += 1;
                }
                Err(err) => warn!(error = %err, "DLQ replay serialization failed"),
            }
        }
        replayed
    }

    // -- public loop ------------------------------------------------------

    /// Dequeue and process one action without blocking. Returns the envelope
    /// that was processed, if any.
    pub async fn run_once(&self) -> Option<ActionEnvelope> {
        let raw = match self.queue.pop().await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "queue pop failed");
                return None;
            }
        };
        let action: ActionEnvelope = match serde_json::from_str(&raw) {
            Ok(action) => action,
            Err(err) => {
                warn!(error = %err, "unparseable queue entry dropped");
                return None;
            }
        };
        self.process(&action).await;
        Some(action)
    }

    /// Blocking loop: promote due retries, long-poll the main queue, process.
    /// Runs until the surrounding task is stopped between jobs.
    pub async fn run_loop(&self, timeout: Duration) {
        info!(queue = shared_types::QUEUE_KEY, "worker started");
        loop {
            self.process_retries().await;

            if let Ok(depth) = self.queue.queue_depth().await {
                gauge!("cacp_queue_depth").set(depth as f64);
            }

            let raw = match self.queue.blocking_pop(timeout).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(err) => {
                    warn!(error = %err, "blocking dequeue failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            match serde_json::from_str::<ActionEnvelope>(&raw) {
                Ok(action) => self.process(&action).await,
                Err(err) => warn!(error = %err, "unparseable queue entry dropped"),
            }
        }
    }
}

fn merged_result(action: &ActionEnvelope, result: &AdapterResult) -> Value {
    let mut map = match serde_json::to_value(action) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    if let Ok(Value::Object(result_map)) = serde_json::to_value(result) {
        for (key, value) in result_map {
            map.insert(key, value);
        }
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_window_plain_range() {
        // 02:00-06:00
        assert!(!in_quiet_window(1, 2, 6));
        assert!(in_quiet_window(2, 2, 6));
        assert!(in_quiet_window(5, 2, 6));
        assert!(!in_quiet_window(6, 2, 6));
    }

    #[test]
    fn quiet_window_wraps_midnight() {
        // 22:00-08:00
        assert!(in_quiet_window(23, 22, 8));
        assert!(in_quiet_window(0, 22, 8));
        assert!(in_quiet_window(7, 22, 8));
        assert!(!in_quiet_window(8, 22, 8));
        assert!(!in_quiet_window(14, 22, 8));
    }

    #[test]
    fn equal_bounds_disable_the_window() {
        for hour in 0..24 {
            assert!(!in_quiet_window(hour, 0, 0));
        }
    }
}
