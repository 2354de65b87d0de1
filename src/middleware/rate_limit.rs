//! Per-client request budgets.
//!
//! Each [`RateLimit`] owns one keyed `governor` limiter counting requests per
//! remote IP. Routes that need different budgets (uploads, reads, deletes)
//! get different `RateLimit` values; clones share the same counters.

use std::future::{ready, Ready};
use std::num::NonZeroU32;
use std::sync::Arc;

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, ResponseError,
};
use futures_util::future::LocalBoxFuture;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::error::AppError;

pub const RATE_LIMIT_MESSAGE: &str = "Rate limit exceeded. Try again in a minute.";

/// Tracked clients above which idle entries are pruned.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Clone)]
pub struct RateLimit {
    name: &'static str,
    limiter: Arc<DefaultKeyedRateLimiter<String>>,
}

impl RateLimit {
    /// A budget of `per_minute` requests per client, replenished evenly.
    /// A zero budget is treated as one request per minute.
    pub fn per_minute(name: &'static str, per_minute: u32) -> Self {
        let burst = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            name,
            limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(burst))),
        }
    }

    fn check(&self, req: &ServiceRequest) -> Result<(), AppError> {
        let client = req
            .peer_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        if self.limiter.len() > PRUNE_THRESHOLD {
            self.limiter.retain_recent();
        }

        self.limiter.check_key(&client).map_err(|_| {
            tracing::warn!(bucket = self.name, client = %client, "Rate limit exceeded");
            AppError::RateLimited(RATE_LIMIT_MESSAGE.to_string())
        })
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddleware {
            service,
            limit: self.clone(),
        }))
    }
}

pub struct RateLimitMiddleware<S> {
    service: S,
    limit: RateLimit,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if let Err(err) = self.limit.check(&req) {
            let response = req.into_response(err.error_response()).map_into_right_body();
            return Box::pin(async move { Ok(response) });
        }

        let fut = self.service.call(req);
        Box::pin(async move { Ok(fut.await?.map_into_left_body()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::{call_service, init_service, read_body_json, TestRequest};
    use actix_web::{http::StatusCode, web, App, HttpResponse};

    async fn ok() -> HttpResponse {
        HttpResponse::Ok().finish()
    }

    fn from_client(ip: &str) -> TestRequest {
        TestRequest::get()
            .uri("/")
            .peer_addr(format!("{}:4000", ip).parse().unwrap())
    }

    #[actix_web::test]
    async fn test_budget_is_enforced_per_client() {
        let app = init_service(
            App::new()
                .wrap(RateLimit::per_minute("test", 2))
                .route("/", web::get().to(ok)),
        )
        .await;

        for _ in 0..2 {
            let resp = call_service(&app, from_client("10.0.0.1").to_request()).await;
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let resp = call_service(&app, from_client("10.0.0.1").to_request()).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        let body: serde_json::Value = read_body_json(resp).await;
        assert_eq!(body["detail"], RATE_LIMIT_MESSAGE);

        // Another client still has its full budget.
        let resp = call_service(&app, from_client("10.0.0.2").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_clones_share_counters() {
        let limit = RateLimit::per_minute("shared", 1);
        let app = init_service(
            App::new()
                .service(web::resource("/a").wrap(limit.clone()).route(web::get().to(ok)))
                .service(web::resource("/b").wrap(limit).route(web::get().to(ok))),
        )
        .await;

        let first = from_client("10.0.0.3").uri("/a").to_request();
        assert_eq!(call_service(&app, first).await.status(), StatusCode::OK);

        let second = from_client("10.0.0.3").uri("/b").to_request();
        assert_eq!(
            call_service(&app, second).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
