//! Correlation and request-metrics middleware.
//!
//! Every response carries `X-Correlation-Id` and `X-Request-Duration-Ms`,
//! and every request lands in `cacp_requests_total{status}`.

use std::time::Instant;

use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::Error;
use futures_util::future::{ready, LocalBoxFuture, Ready};
use metrics::{counter, histogram};
use uuid::Uuid;

const CORRELATION_HEADER: &str = "x-correlation-id";
const DURATION_HEADER: &str = "x-request-duration-ms";

#[derive(Clone, Default)]
pub struct ObservabilityMiddleware;

impl ObservabilityMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl<S, B> Transform<S, ServiceRequest> for ObservabilityMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = ObservabilityMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ObservabilityMiddlewareService { service }))
    }
}

pub struct ObservabilityMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for ObservabilityMiddlewareService<S>
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
        // Reuse the caller's correlation id when it is a well-formed UUID.
        let correlation_id = req
            .headers()
            .get(CORRELATION_HEADER)
            .and_then(|h| h.to_str().ok())
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .unwrap_or_else(Uuid::new_v4);

        let start = Instant::now();
        let fut = self.service.call(req);

        Box::pin(async move {
            let mut response = fut.await?;
            let elapsed = start.elapsed();

            let status = response.status().as_u16().to_string();
            counter!("cacp_requests_total", "status" => status).increment(1);
            histogram!("cacp_request_duration_seconds").record(elapsed.as_secs_f64());

            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
                headers.insert(HeaderName::from_static(CORRELATION_HEADER), value);
            }
            if let Ok(value) =
                HeaderValue::from_str(&format!("{:.1}", elapsed.as_secs_f64() * 1000.0))
            {
                headers.insert(HeaderName::from_static(DURATION_HEADER), value);
            }

            Ok(response)
        })
    }
}
