use std::sync::Arc;

use actix_web::web;
use platform::MetricsHandle;

use crate::orchestration::Orchestrator;
use crate::queue::ActionQueue;
use crate::settings::Settings;
use crate::storage::EventStore;

pub mod error;
pub mod http;
pub mod observability;
pub mod rate_limit;
pub mod validation;
pub mod webhook_github;
pub mod webhook_twilio;

use validation::ValidationSchemas;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiContext {
    pub settings: Arc<Settings>,
    pub orchestrator: Arc<Orchestrator>,
    pub events: Option<Arc<dyn EventStore>>,
    pub queue: Option<Arc<dyn ActionQueue>>,
    pub metrics: Option<MetricsHandle>,
    pub schemas: Arc<ValidationSchemas>,
}

pub fn configure_http(cfg: &mut web::ServiceConfig, ctx: ApiContext) {
    let ctx_data = web::Data::new(ctx);

    cfg.app_data(ctx_data)
        .route("/ingest", web::post().to(http::ingest_appointment))
        .route("/webhook/github", web::post().to(webhook_github::github_webhook))
        .route(
            "/webhook/twilio-status",
            web::post().to(webhook_twilio::twilio_status_callback),
        )
        .route("/health", web::get().to(http::health))
        .route("/ready", web::get().to(http::ready))
        .route("/metrics", web::get().to(http::metrics))
        .default_service(web::route().to(error::not_found));
}
