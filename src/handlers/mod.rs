pub mod config;
pub mod live;

pub use config::*;
pub use live::*;

use crate::error::{AppError, AppResult};
use crate::{health, websocket};
use actix_web::{web, HttpRequest, HttpResponse};

/// Route table shared by the server and the handler tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health::health_check))
        .route("/ws/live", web::get().to(websocket::live_status_socket))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(health::health_check))
                .route("/metrics", web::get().to(health::detailed_metrics))
                .route("/config", web::get().to(get_config))
                .route("/config", web::put().to(update_config))
                .route("/live/start", web::post().to(start_session))
                .route("/live/stop", web::post().to(stop_session))
                .route("/live/status", web::get().to(session_status)),
        )
        .default_service(web::route().to(not_found));
}

/// JSON 404 for anything the route table doesn't know.
pub async fn not_found(req: HttpRequest) -> AppResult<HttpResponse> {
    Err(AppError::NotFound(format!("no route for {} {}", req.method(), req.path())))
}
