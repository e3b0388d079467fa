//! HTTP control of the live session.
//!
//! - `POST /api/v1/live/start` → 202 with the current status, 409 if a session is running
//! - `POST /api/v1/live/stop`  → 200 once every resource is released
//! - `GET  /api/v1/live/status`

use crate::error::{AppError, AppResult, LiveError};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

pub async fn start_session(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    match state.live.start(state.session_config()).await {
        Ok(()) => {
            state.record_session_start(true);
            info!("Live session start accepted");
            Ok(HttpResponse::Accepted().json(json!({
                "status": "accepted",
                "session": state.live.status(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            })))
        }
        Err(LiveError::SessionAlreadyActive) => {
            state.record_session_start(false);
            Err(AppError::from(LiveError::SessionAlreadyActive))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn stop_session(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    state.live.stop().await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "stopped",
        "session": state.live.status(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub async fn session_status(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.live.status())
}
