use crate::{error::AppResult, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/config`. API keys are masked.
pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": redacted(&config)?
    })))
}

/// `PUT /api/v1/config` with a partial JSON document, e.g.
/// `{"voice_auth": {"similarity_threshold": 0.9}}`. Invalid updates are rejected whole.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> AppResult<HttpResponse> {
    let json_str = serde_json::to_string(&body.into_inner())?;
    let updated = state
        .patch_config(&json_str)
        .map_err(|e| crate::error::AppError::ValidationError(e.to_string()))?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": redacted(&updated)?
    })))
}

fn redacted(config: &crate::config::AppConfig) -> AppResult<serde_json::Value> {
    let mut value = serde_json::to_value(config)?;
    for backend in ["tts", "stt"] {
        if let Some(key) = value.pointer_mut(&format!("/providers/{}/api_key", backend)) {
            if key.as_str().is_some_and(|k| !k.is_empty()) {
                *key = json!("********");
            }
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_api_keys_are_masked() {
        let mut config = AppConfig::default();
        config.providers.tts.api_key = "secret".to_string();

        let value = redacted(&config).unwrap();
        assert_eq!(value["providers"]["tts"]["api_key"], "********");
        assert_eq!(value["providers"]["stt"]["api_key"], "");
        assert_eq!(value["server"]["port"], 8080);
    }
}
