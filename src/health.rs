//! Liveness and metrics endpoints.
//!
//! `/api/health` is unauthenticated and cheap: it reports aggregate job
//! counts from the durable store. `/api/metrics` adds runner counters,
//! durability state and process memory for operators.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    match state.jobs.counts().await {
        Ok(counts) => HttpResponse::Ok().json(json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "uptime_seconds": state.uptime_seconds(),
            "total_jobs": counts.total,
            "active_jobs": counts.active()
        })),
        Err(e) => {
            tracing::error!(error = %e, "Health check could not read job counts");
            HttpResponse::ServiceUnavailable().json(json!({
                "status": "unhealthy",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "uptime_seconds": state.uptime_seconds(),
                "error": e.to_string()
            }))
        }
    }
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> crate::error::AppResult<HttpResponse> {
    let counts = state.jobs.counts().await?;
    let runner = state.runner.stats().snapshot();
    let unflushed = state.jobs.unflushed_count().await;
    let config = &state.config;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "jobs": counts,
        "runner": {
            "stats": runner,
            "max_concurrent_jobs": config.transcription.max_concurrent_jobs,
            "timeout_secs": config.transcription.timeout_secs,
            "engine": config.transcription.program
        },
        "durability": {
            "unflushed_jobs": unflushed,
            "status": if unflushed == 0 { "in_sync" } else { "diverged" }
        },
        "memory": get_memory_info()
    })))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                let kb = || {
                    line.split_whitespace()
                        .nth(1)
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(0)
                        * 1024
                };
                if line.starts_with("VmRSS:") {
                    vm_rss = kb();
                } else if line.starts_with("VmSize:") {
                    vm_size = kb();
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": format!("Memory info not available for pid {}", process::id())
    })
}
