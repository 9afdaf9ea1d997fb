//! # Health and Metrics Endpoints
//!
//! - `GET /`: service banner listing the endpoints
//! - `GET /health`, `GET /api/v1/health`: liveness plus component status
//! - `GET /api/v1/metrics`: conversation counters and load

use crate::config::AppConfig;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn root_info() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "service": "duplex-voice-backend",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "websocket": "/ws",
            "health": "/health",
            "metrics": "/api/v1/metrics",
            "config": "/api/v1/config"
        }
    }))
}

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let metrics = state.get_metrics_snapshot();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": "duplex-voice-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "components": {
            "vad": {
                "status": "ready",
                "sample_rate": config.audio.sample_rate,
                "frame_duration_ms": config.audio.frame_duration_ms
            },
            "stt": {
                "status": "ready",
                "engine": state.services.transcription.name()
            },
            "tts": {
                "status": "ready",
                "engine": state.services.synthesis.name()
            }
        },
        "active_sessions": metrics.active_sessions,
        "system": get_system_status(config, &metrics)
    }))
}

pub async fn conversation_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "sessions": {
            "active": metrics.active_sessions,
            "total": metrics.total_sessions,
            "rejected": metrics.rejected_sessions
        },
        "conversation": {
            "audio_bytes_received": metrics.audio_bytes_received,
            "utterances": metrics.utterances,
            "responses": metrics.responses,
            "interruptions_buffered": metrics.interruptions_buffered,
            "service_failures": metrics.service_failures
        },
        "memory": get_memory_info(),
        "system": get_system_status(state.get_config(), &metrics)
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let field = |name: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map(|kb| kb * 1024)
                    .unwrap_or(0)
            };

            return json!({
                "resident_memory_bytes": field("VmRSS:"),
                "virtual_memory_bytes": field("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false
    })
}

fn get_system_status(config: &AppConfig, metrics: &AppMetrics) -> serde_json::Value {
    let max_sessions = config.performance.max_concurrent_sessions;
    let session_usage = if max_sessions > 0 {
        metrics.active_sessions as f64 / max_sessions as f64
    } else {
        0.0
    };

    let status = if session_usage >= 1.0 {
        "full"
    } else if session_usage > 0.7 {
        "high_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (session_usage * 100.0).round(),
        "max_sessions": max_sessions,
        "current_sessions": metrics.active_sessions
    })
}
