//! # HTTP Handlers
//!
//! Route table for the API. Each job route gets the bearer-token check and
//! its own per-client budget:
//!
//! | Route | Auth | Budget |
//! |-------|------|--------|
//! | `GET /` | no | none |
//! | `GET /api/health` | no | none |
//! | `GET /api/metrics` | yes | reads |
//! | `POST /api/upload` | yes | uploads |
//! | `GET /api/jobs`, `GET /api/jobs/{job_id}` | yes | reads |
//! | `DELETE /api/jobs/{job_id}` | yes | deletes |

pub mod jobs;

use actix_web::{guard, web};

use crate::config::AppConfig;
use crate::health;
use crate::middleware::{BearerAuth, RateLimit};

/// Middleware instances shared by every worker.
///
/// Build this once, outside the `HttpServer::new` factory, so all workers
/// count against the same rate-limit buckets.
#[derive(Clone)]
pub struct RouteGuards {
    pub auth: BearerAuth,
    pub uploads: RateLimit,
    pub reads: RateLimit,
    pub deletes: RateLimit,
}

impl RouteGuards {
    pub fn from_config(config: &AppConfig) -> Self {
        let limits = &config.rate_limit;
        Self {
            auth: BearerAuth::new(config.security.api_token.as_deref()),
            uploads: RateLimit::per_minute("uploads", limits.uploads_per_minute),
            reads: RateLimit::per_minute("reads", limits.reads_per_minute),
            deletes: RateLimit::per_minute("deletes", limits.deletes_per_minute),
        }
    }
}

/// Registers every route. The limiter is wrapped last so it runs first:
/// rejected clients never reach the token check.
pub fn configure(cfg: &mut web::ServiceConfig, guards: &RouteGuards) {
    cfg.route("/", web::get().to(jobs::root)).service(
        web::scope("/api")
            .route("/health", web::get().to(health::health_check))
            .service(
                web::resource("/metrics")
                    .wrap(guards.auth.clone())
                    .wrap(guards.reads.clone())
                    .route(web::get().to(health::detailed_metrics)),
            )
            .service(
                web::resource("/upload")
                    .wrap(guards.auth.clone())
                    .wrap(guards.uploads.clone())
                    .route(web::post().to(jobs::upload_file)),
            )
            .service(
                web::resource("/jobs")
                    .wrap(guards.auth.clone())
                    .wrap(guards.reads.clone())
                    .route(web::get().to(jobs::list_jobs)),
            )
            .service(
                web::resource("/jobs/{job_id}")
                    .guard(guard::Get())
                    .wrap(guards.auth.clone())
                    .wrap(guards.reads.clone())
                    .route(web::get().to(jobs::get_job)),
            )
            .service(
                web::resource("/jobs/{job_id}")
                    .guard(guard::Delete())
                    .wrap(guards.auth.clone())
                    .wrap(guards.deletes.clone())
                    .route(web::delete().to(jobs::delete_job)),
            ),
    );
}
