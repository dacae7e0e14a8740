use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use control_plane::queue::{ActionQueue, RedisQueue};
use control_plane::settings::Settings;
use control_plane::storage::{EventStore, InMemoryEventStore, PostgresEventStore};
use control_plane::workers::adapters::{ActionAdapter, NoopAdapter, TwilioSmsAdapter};
use control_plane::workers::{Worker, WorkerConfig};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Action types routed to the SMS provider when credentials are configured.
const MESSAGING_ACTIONS: &[&str] = &["send_reminder", "send_confirmation", "reschedule"];

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    platform::init_tracing("worker").expect("failed to init tracing");
    if let Err(err) = platform::init_metrics() {
        warn!(error = %err, "metrics recorder unavailable");
    }

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return Ok(());
        }
    };

    let queue: Arc<dyn ActionQueue> = match RedisQueue::new(&settings.redis_url) {
        Ok(queue) => Arc::new(queue),
        Err(err) => {
            error!(error = %err, "cannot reach redis, worker cannot start");
            return Ok(());
        }
    };

    let events: Option<Arc<dyn EventStore>> = if settings.pg_dsn.is_empty() {
        warn!("no PG DSN configured, audit events stay in-process");
        Some(Arc::new(InMemoryEventStore::new()))
    } else {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(&settings.pg_dsn)
        {
            Ok(pool) => Some(Arc::new(PostgresEventStore::new(pool))),
            Err(err) => {
                warn!(error = %err, "postgres unavailable, audit events stay in-process");
                Some(Arc::new(InMemoryEventStore::new()))
            }
        }
    };

    let mut adapters: HashMap<String, Arc<dyn ActionAdapter>> = HashMap::new();
    adapters.insert("execute_plan".to_string(), Arc::new(NoopAdapter::new()));

    let twilio_configured = !settings.twilio_account_sid.is_empty()
        && !settings.twilio_auth_token.is_empty()
        && !settings.twilio_from_number.is_empty();
    if twilio_configured {
        info!("Twilio credentials found, routing messaging actions to SMS");
        let twilio: Arc<dyn ActionAdapter> = Arc::new(TwilioSmsAdapter::new(
            &settings.twilio_account_sid,
            &settings.twilio_auth_token,
            &settings.twilio_from_number,
        ));
        for action_type in MESSAGING_ACTIONS {
            adapters.insert((*action_type).to_string(), twilio.clone());
        }
    } else {
        info!("Twilio not configured, messaging actions fall back to no-op");
        for action_type in MESSAGING_ACTIONS {
            adapters.insert((*action_type).to_string(), Arc::new(NoopAdapter::new()));
        }
    }

    let worker = Worker::new(
        queue,
        adapters,
        events,
        None,
        WorkerConfig::from(&settings),
    );

    tokio::select! {
        _ = worker.run_loop(DEQUEUE_TIMEOUT) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!(error = %err, "failed to install CTRL+C handler");
            }
            info!("received CTRL+C, worker stopping between jobs");
        }
    }

    Ok(())
}
