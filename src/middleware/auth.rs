//! Bearer-token authentication.
//!
//! When a token is configured, every wrapped request must carry
//! `Authorization: Bearer <token>`. Without a configured token the middleware
//! lets everything through (the server logs a warning at startup).

use std::future::{ready, Ready};
use std::sync::Arc;

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::AUTHORIZATION,
    Error, ResponseError,
};
use futures_util::future::LocalBoxFuture;

use crate::error::AppError;

#[derive(Clone)]
pub struct BearerAuth {
    token: Option<Arc<str>>,
}

impl BearerAuth {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()).map(Arc::from),
        }
    }

    fn check(&self, req: &ServiceRequest) -> Result<(), AppError> {
        let Some(expected) = &self.token else {
            return Ok(());
        };

        let header = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Not authenticated".to_string()))?;

        let presented = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("Not authenticated".to_string()))?;

        if constant_time_eq(presented.trim().as_bytes(), expected.as_bytes()) {
            Ok(())
        } else {
            tracing::warn!(path = %req.path(), "Rejected request with invalid token");
            Err(AppError::Unauthorized("Invalid token".to_string()))
        }
    }
}

/// Compares without an early exit on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl<S, B> Transform<S, ServiceRequest> for BearerAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = BearerAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(BearerAuthMiddleware {
            service,
            auth: self.clone(),
        }))
    }
}

pub struct BearerAuthMiddleware<S> {
    service: S,
    auth: BearerAuth,
}

impl<S, B> Service<ServiceRequest> for BearerAuthMiddleware<S>
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
        if let Err(err) = self.auth.check(&req) {
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
    use actix_web::test::{call_service, init_service, TestRequest};
    use actix_web::{http::StatusCode, web, App, HttpResponse};

    async fn ok() -> HttpResponse {
        HttpResponse::Ok().finish()
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret-longer"));
    }

    #[actix_web::test]
    async fn test_token_required_when_configured() {
        let app = init_service(
            App::new()
                .wrap(BearerAuth::new(Some("s3cret")))
                .route("/", web::get().to(ok)),
        )
        .await;

        let resp = call_service(&app, TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = TestRequest::get()
            .uri("/")
            .insert_header(("Authorization", "Bearer wrong"))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = TestRequest::get()
            .uri("/")
            .insert_header(("Authorization", "Bearer s3cret"))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_no_token_configured_allows_all() {
        let app = init_service(
            App::new()
                .wrap(BearerAuth::new(None))
                .route("/", web::get().to(ok)),
        )
        .await;

        let resp = call_service(&app, TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
