//! Per-client rate limiting for the inbound HTTP surface.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::Error;
use dashmap::DashMap;
use futures_util::future::{ready, LocalBoxFuture, Ready};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use shared_types::ErrorCode;

use super::error::ApiError;

type ClientLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiting configuration.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Number of requests allowed per time window.
    pub requests: NonZeroU32,
    /// Time window in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            // 100 requests per minute; the fallback can never be hit but
            // keeps the constructor panic-free.
            requests: NonZeroU32::new(100).unwrap_or(NonZeroU32::MIN),
            window_secs: 60,
        }
    }
}

/// Global limiter state shared across requests, one bucket per client IP.
pub struct RateLimiterState {
    limiters: DashMap<String, Arc<ClientLimiter>>,
    config: RateLimitConfig,
}

impl RateLimiterState {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            limiters: DashMap::new(),
            config,
        }
    }

    fn get_limiter(&self, client: &str) -> Arc<ClientLimiter> {
        if let Some(limiter) = self.limiters.get(client) {
            return limiter.clone();
        }
        let quota = match Quota::with_period(Duration::from_secs(self.config.window_secs)) {
            Some(q) => q.allow_burst(self.config.requests),
            None => {
                tracing::warn!(
                    window_secs = self.config.window_secs,
                    "invalid rate limit period, using per-minute default"
                );
                Quota::per_minute(self.config.requests)
            }
        };
        let limiter = Arc::new(RateLimiter::direct(quota));
        self.limiters.insert(client.to_string(), limiter.clone());
        limiter
    }
}

#[derive(Clone)]
pub struct RateLimitMiddleware {
    state: Arc<RateLimiterState>,
}

impl RateLimitMiddleware {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            state: Arc::new(RateLimiterState::new(config)),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RateLimitMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddlewareService {
            service,
            state: self.state.clone(),
        }))
    }
}

pub struct RateLimitMiddlewareService<S> {
    service: S,
    state: Arc<RateLimiterState>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &self,
        ctx: &mut core::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let client = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("anonymous")
            .to_string();

        let limiter = self.state.get_limiter(&client);

        match limiter.check() {
            Ok(_) => {
                let fut = self.service.call(req);
                Box::pin(async move { fut.await })
            }
            Err(_) => Box::pin(async move {
                Err(ApiError::new(
                    actix_web::http::StatusCode::TOO_MANY_REQUESTS,
                    ErrorCode::RateLimitExceeded,
                    "Rate limit exceeded, please retry later",
                )
                .into())
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App, HttpResponse};

    async fn ok_handler() -> HttpResponse {
        HttpResponse::Ok().finish()
    }

    #[actix_web::test]
    async fn allows_within_quota_then_blocks() {
        let config = RateLimitConfig {
            requests: NonZeroU32::new(2).unwrap(),
            window_secs: 60,
        };
        let app = test::init_service(
            App::new()
                .wrap(RateLimitMiddleware::new(config))
                .route("/test", web::get().to(ok_handler)),
        )
        .await;

        for _ in 0..2 {
            let req = test::TestRequest::get().uri("/test").to_request();
            let resp = test::call_service(&app, req).await;
            assert!(resp.status().is_success());
        }

        let req = test::TestRequest::get().uri("/test").to_request();
        let resp = test::try_call_service(&app, req).await;
        let err = resp.expect_err("third request should be limited");
        let resp = err.error_response();
        assert_eq!(resp.status().as_u16(), 429);
    }
}
