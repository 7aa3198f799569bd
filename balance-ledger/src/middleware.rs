//! Per-request access log with a slow-request flag

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Logs method, route, status and latency of every request.
///
/// Requests slower than `slow_threshold` are logged at warn with `slow = true`.
#[derive(Debug, Clone, Copy)]
pub struct RequestLog {
    slow_threshold: Duration,
}

impl RequestLog {
    pub fn new(slow_threshold: Duration) -> Self {
        Self { slow_threshold }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestLog
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLogMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLogMiddleware {
            service: Rc::new(service),
            slow_threshold: self.slow_threshold,
        }))
    }
}

pub struct RequestLogMiddleware<S> {
    service: Rc<S>,
    slow_threshold: Duration,
}

impl<S, B> Service<ServiceRequest> for RequestLogMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let started = Instant::now();
        let method = req.method().to_string();
        // Route template when one matched, raw path for unknown routes
        let path = req
            .match_pattern()
            .unwrap_or_else(|| req.path().to_string());

        let service = self.service.clone();
        let slow_threshold = self.slow_threshold;

        Box::pin(async move {
            let res = service.call(req).await;

            let elapsed = started.elapsed();
            let duration_ms = elapsed.as_secs_f64() * 1_000.0;
            let slow = elapsed > slow_threshold;
            let status = match &res {
                Ok(response) => response.status().as_u16(),
                Err(e) => e.as_response_error().status_code().as_u16(),
            };

            if slow {
                warn!(method = %method, path = %path, status, duration_ms, slow, "Slow request");
            } else {
                info!(method = %method, path = %path, status, duration_ms, slow, "Request");
            }

            res
        })
    }
}
