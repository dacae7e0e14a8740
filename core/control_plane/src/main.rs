use std::env;
use std::sync::Arc;

use actix_web::{App, HttpServer};
use control_plane::api::observability::ObservabilityMiddleware;
use control_plane::api::rate_limit::{RateLimitConfig, RateLimitMiddleware};
use control_plane::api::validation::ValidationSchemas;
use control_plane::api::{configure_http, ApiContext};
use control_plane::gitops::GitHubPrCreator;
use control_plane::orchestration::agents::ComplianceAgent;
use control_plane::orchestration::Orchestrator;
use control_plane::policy::OpaClient;
use control_plane::queue::{ActionQueue, RedisQueue};
use control_plane::settings::Settings;
use control_plane::storage::{EventStore, InMemoryEventStore, PostgresEventStore};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    platform::init_tracing("control_plane").expect("failed to init tracing");

    let metrics_handle = match platform::init_metrics() {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(error = %err, "metrics recorder unavailable, /metrics will be empty");
            None
        }
    };

    let settings = match Settings::from_env() {
        Ok(settings) => Arc::new(settings),
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return Ok(());
        }
    };
    info!(environment = %settings.environment, "control plane starting");

    // Event store: Postgres when a DSN is configured, in-memory otherwise.
    let events: Arc<dyn EventStore> = if settings.pg_dsn.is_empty() {
        info!("no PG DSN configured, using in-memory event store");
        Arc::new(InMemoryEventStore::new())
    } else {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(&settings.pg_dsn)
        {
            Ok(pool) => {
                info!("postgres event store configured");
                Arc::new(PostgresEventStore::new(pool))
            }
            Err(err) => {
                warn!(error = %err, "postgres unavailable, using in-memory event store");
                Arc::new(InMemoryEventStore::new())
            }
        }
    };

    // Queue for webhook idempotency markers and enqueueing merged plans.
    let queue: Option<Arc<dyn ActionQueue>> = match RedisQueue::new(&settings.redis_url) {
        Ok(queue) => Some(Arc::new(queue)),
        Err(err) => {
            warn!(error = %err, "redis unavailable, webhook enqueueing disabled");
            None
        }
    };

    // The OPA oracle is only wired when explicitly configured; absence means
    // local checks only.
    let opa = env::var("CACP_OPA_URL")
        .ok()
        .filter(|url| !url.is_empty())
        .map(|url| OpaClient::new(&url));
    let compliance = ComplianceAgent::new(opa);

    let github_pr = if !settings.github_token.is_empty() && !settings.github_owner.is_empty() {
        info!(
            owner = %settings.github_owner,
            repo = %settings.github_repo,
            "GitHub PR submission enabled"
        );
        Some(GitHubPrCreator::new(
            &settings.github_token,
            &settings.github_owner,
            &settings.github_repo,
        ))
    } else {
        info!("GitHub PR submission disabled (token or owner not configured)");
        None
    };

    let orchestrator = Arc::new(Orchestrator::new(
        settings.clone(),
        compliance,
        github_pr,
        Some(events.clone()),
    ));

    let ctx = ApiContext {
        settings: settings.clone(),
        orchestrator,
        events: Some(events),
        queue,
        metrics: metrics_handle,
        schemas: Arc::new(ValidationSchemas::new()),
    };

    let rate_limit = RateLimitConfig::default();
    let bind_addr = settings.bind_addr.clone();
    info!(bind_addr = %bind_addr, "starting API server");

    let server = HttpServer::new(move || {
        App::new()
            .wrap(ObservabilityMiddleware::new())
            .wrap(RateLimitMiddleware::new(rate_limit.clone()))
            .configure(|cfg| configure_http(cfg, ctx.clone()))
    })
    .bind(&bind_addr)?
    .run();

    let handle = server.handle();
    let shutdown = async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install CTRL+C handler");
            return;
        }
        info!("received CTRL+C, initiating graceful shutdown");
        handle.stop(true).await;
    };

    tokio::select! {
        result = server => {
            if let Err(err) = result {
                error!(error = %err, "HTTP server error");
            }
        }
        _ = shutdown => {
            info!("shutdown signal handled");
        }
    }

    Ok(())
}
