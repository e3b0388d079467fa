//! Health and metrics endpoints.

use crate::device::DeviceManager;
use crate::live::SessionState;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::warn;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let session = state.live.status();

    // Device enumeration can block on some hosts
    let devices = match web::block(DeviceManager::get_device_summary).await {
        Ok(summary) => json!(summary),
        Err(e) => {
            warn!("Audio device enumeration failed: {}", e);
            json!({ "available": false })
        }
    };

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
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
            "sessions_started": metrics.sessions_started
        },
        "live_session": session,
        "remote": {
            "model": config.live.model,
            "api_key_configured": config.live.resolved_api_key().is_some()
        },
        "audio_devices": devices,
        "memory": get_memory_info()
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let session = state.live.status();

    let endpoint_stats: Vec<serde_json::Value> = metrics
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

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "live": {
            "state": session.state,
            "active": session.state == SessionState::Active,
            "sessions_started": metrics.sessions_started,
            "sessions_rejected": metrics.sessions_rejected,
            "frames_sent": session.frames_sent,
            "frames_played": session.frames_played,
            "frames_dropped": session.frames_dropped
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info()
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", std::process::id())) {
            return parse_proc_status(&status);
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

/// Pull VmRSS / VmSize (reported in kB) out of `/proc/<pid>/status`.
fn parse_proc_status(status: &str) -> serde_json::Value {
    let field_bytes = |name: &str| -> u64 {
        status
            .lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .map_or(0, |kb| kb * 1024)
    };

    json!({
        "resident_memory_bytes": field_bytes("VmRSS:"),
        "virtual_memory_bytes": field_bytes("VmSize:"),
        "available": true
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proc_status() {
        let status = "Name:\tlive\nVmSize:\t  2048 kB\nVmRSS:\t   512 kB\n";
        let info = parse_proc_status(status);
        assert_eq!(info["resident_memory_bytes"], 512 * 1024);
        assert_eq!(info["virtual_memory_bytes"], 2048 * 1024);
    }
}
