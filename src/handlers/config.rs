use crate::{error::{AppError, AppResult}, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Render the configuration for the API, omitting credentials.
fn config_body(config: &crate::config::AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "audio": {
            "capture_sample_rate": config.audio.capture_sample_rate,
            "frame_size": config.audio.frame_size,
            "playback_sample_rate": config.audio.playback_sample_rate,
            "channels": config.audio.channels,
            "outbound_queue_frames": config.audio.outbound_queue_frames
        },
        "channel": {
            "url": config.channel.url,
            "api_key_configured": !config.channel.api_key.is_empty()
        },
        "remote": {
            "base_url": config.remote.base_url,
            "analysis_model": config.remote.analysis_model,
            "synthesis_model": config.remote.synthesis_model
        },
        "performance": {
            "max_concurrent_sessions": config.performance.max_concurrent_sessions,
            "session_max_age_seconds": config.performance.session_max_age_seconds
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_body(&config)
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> AppResult<HttpResponse> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_body(&current_config)
    })))
}
