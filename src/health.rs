//! # Health and Metrics Endpoints
//!
//! - `GET /health` and `GET /api/v1/health`: liveness plus a short engine summary
//! - `GET /api/v1/metrics`: request metrics, session statistics and rate-limiter headroom

use crate::session::SessionStatus;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;
use tracing::warn;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    // Storage trouble degrades health instead of failing the check.
    let (status, engine) = match state.orchestrator.stats().await {
        Ok(stats) => (
            "healthy",
            json!({
                "active_sessions": stats.sessions.stored.count_status(SessionStatus::Active),
                "voice_profiles": stats.voice_profiles,
                "tts_provider": stats.tts_provider,
                "stt_provider": stats.stt_provider,
                "rate_limit_available": stats.rate_limiter.available
            }),
        ),
        Err(err) => {
            warn!(error = %err, "Health check could not read engine stats");
            ("degraded", json!({ "error": err.to_string() }))
        }
    };

    HttpResponse::Ok().json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "in_flight": metrics.in_flight
        },
        "engine": engine,
        "storage": config.storage.backend,
        "memory": get_memory_info()
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    let engine = match state.orchestrator.stats().await {
        Ok(stats) => json!(stats),
        Err(err) => {
            warn!(error = %err, "Metrics could not read engine stats");
            json!({ "error": err.to_string() })
        }
    };

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "in_flight": metrics.in_flight,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "engine": engine,
        "memory": get_memory_info()
    }))
}

/// Resident and virtual memory from `/proc/<pid>/status` (Linux only).
fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", process::id())) {
            let read_kb = |prefix: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(prefix))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };

            return json!({
                "resident_memory_bytes": read_kb("VmRSS:"),
                "virtual_memory_bytes": read_kb("VmSize:"),
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
