//! Request guards applied in front of the job routes.
//!
//! HTTP access logging is handled by `tracing_actix_web::TracingLogger`,
//! installed in `main`.

pub mod auth;
pub mod rate_limit;

pub use auth::BearerAuth;
pub use rate_limit::RateLimit;
