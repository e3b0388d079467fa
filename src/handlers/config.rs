use crate::config::AppConfig;
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Public view of the configuration. The API key itself is never echoed.
fn config_view(config: &AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "live": {
            "endpoint_url": config.live.endpoint_url,
            "model": config.live.model,
            "voice_name": config.live.voice_name,
            "system_instruction": config.live.system_instruction,
            "handshake_timeout_ms": config.live.handshake_timeout_ms,
            "api_key_configured": config.live.resolved_api_key().is_some()
        },
        "audio": {
            "input_sample_rate": config.audio.input_sample_rate,
            "output_sample_rate": config.audio.output_sample_rate,
            "channels": config.audio.channels,
            "capture_window": config.audio.capture_window,
            "input_device": config.audio.input_device,
            "output_device": config.audio.output_device
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_view(&config)
    })))
}

/// Partial update; takes effect at the next session start.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config.update_from_json(&json_str)?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated; applies to the next live session",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_view(&current_config)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_view_hides_api_key() {
        let mut config = AppConfig::default();
        config.live.api_key = "secret-key".to_string();

        let view = config_view(&config);
        assert_eq!(view["live"]["api_key_configured"], true);
        assert!(!view.to_string().contains("secret-key"));
    }
}
