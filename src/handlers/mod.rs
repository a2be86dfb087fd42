//! # HTTP Handlers
//!
//! - **config**: read and partially update the stored configuration
//! - **sessions**: session lifecycle plus session-bound voice queries and responses
//! - **speech**: sessionless transcription, synthesis, validation and capability listing
//! - **voice_auth**: voice enrollment, authentication and profile management
//! - **multipart**: size-capped multipart form reading shared by the upload endpoints

pub mod config;
pub mod multipart;
pub mod sessions;
pub mod speech;
pub mod voice_auth;

pub use config::*;

use crate::health;
use actix_web::web;

/// Register every route. Shared by the server and the handler tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/config", web::get().to(config::get_config))
            .route("/config", web::put().to(config::update_config))
            .service(
                web::scope("/speech")
                    .route("/sessions", web::post().to(sessions::create_session))
                    .route("/sessions", web::get().to(sessions::list_sessions))
                    .route("/sessions/{id}", web::get().to(sessions::get_session))
                    .route("/sessions/{id}", web::patch().to(sessions::update_session))
                    .route("/sessions/{id}", web::delete().to(sessions::end_session))
                    .route(
                        "/sessions/{id}/interactions",
                        web::get().to(sessions::list_interactions),
                    )
                    .route("/sessions/{id}/query", web::post().to(sessions::voice_query))
                    .route("/sessions/{id}/response", web::post().to(sessions::voice_response))
                    .route("/transcribe", web::post().to(speech::transcribe))
                    .route("/synthesize", web::post().to(speech::synthesize))
                    .route("/validate", web::post().to(speech::validate_audio))
                    .route("/validate-text", web::post().to(speech::validate_text))
                    .route("/voices", web::get().to(speech::list_voices))
                    .route("/languages", web::get().to(speech::list_languages))
                    .route("/auth/enroll", web::post().to(voice_auth::enroll))
                    .route("/auth/authenticate", web::post().to(voice_auth::authenticate))
                    .route("/auth/profiles/{user_id}", web::get().to(voice_auth::get_profile))
                    .route(
                        "/auth/profiles/{user_id}",
                        web::delete().to(voice_auth::delete_profile),
                    ),
            ),
    )
    .route("/health", web::get().to(health::health_check));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::middleware::MetricsMiddleware;
    use crate::state::AppState;
    use crate::testing::{
        multipart_body, multipart_content_type, scripted_orchestrator, synthetic_voice, VoiceSpec,
    };
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn app_state() -> AppState {
        let (orchestrator, _tts, _stt) = scripted_orchestrator();
        AppState::new(AppConfig::default(), Arc::new(orchestrator))
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state.clone()))
                    .wrap(MetricsMiddleware)
                    .configure(configure),
            )
            .await
        };
    }

    macro_rules! create_session {
        ($app:expr, $session_type:expr) => {{
            let req = test::TestRequest::post()
                .uri("/api/v1/speech/sessions")
                .set_json(json!({ "user_id": "u1", "session_type": $session_type }))
                .to_request();
            let body: Value = test::call_and_read_body_json(&$app, req).await;
            body["id"].as_str().unwrap().to_string()
        }};
    }

    #[actix_web::test]
    async fn test_health_endpoints() {
        let state = app_state();
        let app = app!(state);

        for uri in ["/health", "/api/v1/health"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let body: Value = test::call_and_read_body_json(&app, req).await;
            assert_eq!(body["status"], "healthy");
            assert_eq!(body["engine"]["tts_provider"], "scripted-tts");
        }
    }

    #[actix_web::test]
    async fn test_session_lifecycle() {
        let state = app_state();
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/api/v1/speech/sessions")
            .set_json(json!({ "user_id": "u1", "session_type": "consultation" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(resp).await;
        assert_eq!(created["status"], "active");
        let id = created["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/speech/sessions/{}", id))
            .to_request();
        let fetched: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(fetched["session_type"], "consultation");

        let req = test::TestRequest::delete()
            .uri(&format!("/api/v1/speech/sessions/{}", id))
            .to_request();
        let ended: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(ended["status"], "ended");

        let req = test::TestRequest::delete()
            .uri(&format!("/api/v1/speech/sessions/{}", id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::get()
            .uri("/api/v1/speech/sessions?user_id=u1&limit=5")
            .to_request();
        let listed: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listed["count"], 1);
    }

    #[actix_web::test]
    async fn test_unknown_session_type_and_session_id() {
        let state = app_state();
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/api/v1/speech/sessions")
            .set_json(json!({ "user_id": "u1", "session_type": "karaoke" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "validation_error");

        let req = test::TestRequest::get()
            .uri("/api/v1/speech/sessions/missing")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_voice_query_and_response_in_session() {
        let state = app_state();
        let app = app!(state);
        let id = create_session!(app, "general");

        let audio = synthetic_voice(&VoiceSpec::default(), 1.0, 9);
        let body = multipart_body(&[("audio", Some("q.wav"), &audio[..]), ("language", None, &b"fr"[..])]);
        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/speech/sessions/{}/query", id))
            .insert_header((header::CONTENT_TYPE, multipart_content_type()))
            .set_payload(body)
            .to_request();
        let query: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(query["transcription"]["text"], "hello world");
        assert_eq!(query["transcription"]["language"], "fr");

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/speech/sessions/{}/response", id))
            .set_json(json!({ "text": "Bonjour", "format": "wav" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "audio/wav");
        assert!(resp.headers().contains_key("x-interaction-id"));
        let bytes = test::read_body(resp).await;
        assert_eq!(&bytes[..], b"AUDIO:Bonjour");

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/speech/sessions/{}/interactions", id))
            .to_request();
        let history: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(history["count"], 2);
        assert_eq!(history["interactions"][0]["kind"], "speech_to_text");
        assert_eq!(history["interactions"][1]["kind"], "text_to_speech");
    }

    #[actix_web::test]
    async fn test_transcribe_rejects_short_audio() {
        let state = app_state();
        let app = app!(state);

        let audio = synthetic_voice(&VoiceSpec::default(), 0.3, 1);
        let body = multipart_body(&[("audio", Some("short.wav"), &audio[..])]);
        let req = test::TestRequest::post()
            .uri("/api/v1/speech/transcribe")
            .insert_header((header::CONTENT_TYPE, multipart_content_type()))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"]["message"].as_str().unwrap().contains("too short"));
    }

    #[actix_web::test]
    async fn test_upload_size_cap() {
        let state = app_state();
        state
            .patch_config(r#"{"audio": {"max_upload_bytes": 1024}}"#)
            .unwrap();
        let app = app!(state);

        let audio = synthetic_voice(&VoiceSpec::default(), 1.0, 1);
        let body = multipart_body(&[("audio", Some("big.wav"), &audio[..])]);
        let req = test::TestRequest::post()
            .uri("/api/v1/speech/validate")
            .insert_header((header::CONTENT_TYPE, multipart_content_type()))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"]["message"].as_str().unwrap().contains("File too large"));
    }

    #[actix_web::test]
    async fn test_validate_audio_for_voice_auth() {
        let state = app_state();
        let app = app!(state);

        let audio = synthetic_voice(&VoiceSpec::default(), 1.0, 1);
        let body = multipart_body(&[("audio", Some("a.wav"), &audio[..]), ("purpose", None, &b"voice_auth"[..])]);
        let req = test::TestRequest::post()
            .uri("/api/v1/speech/validate")
            .insert_header((header::CONTENT_TYPE, multipart_content_type()))
            .set_payload(body)
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["purpose"], "voice_auth");
        assert_eq!(body["validation"]["is_valid"], false);
    }

    #[actix_web::test]
    async fn test_enroll_authenticate_and_delete_profile() {
        let state = app_state();
        let app = app!(state);
        let clips: Vec<Vec<u8>> = (1..=3)
            .map(|seed| synthetic_voice(&VoiceSpec::default(), 2.5, seed))
            .collect();

        let body = multipart_body(&[
            ("user_id", None, &b"u1"[..]),
            ("audio_1", Some("1.wav"), &clips[0][..]),
            ("audio_2", Some("2.wav"), &clips[1][..]),
            ("audio_3", Some("3.wav"), &clips[2][..]),
        ]);
        let req = test::TestRequest::post()
            .uri("/api/v1/speech/auth/enroll")
            .insert_header((header::CONTENT_TYPE, multipart_content_type()))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let enrolled: Value = test::read_body_json(resp).await;
        assert_eq!(enrolled["profile"]["sample_count"], 3);

        let sample = synthetic_voice(&VoiceSpec::default(), 2.5, 99);
        let body = multipart_body(&[("user_id", None, &b"u1"[..]), ("audio", Some("p.wav"), &sample[..])]);
        let req = test::TestRequest::post()
            .uri("/api/v1/speech/auth/authenticate")
            .insert_header((header::CONTENT_TYPE, multipart_content_type()))
            .set_payload(body)
            .to_request();
        let result: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(result["is_authenticated"], true);

        let req = test::TestRequest::delete()
            .uri("/api/v1/speech/auth/profiles/u1")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri("/api/v1/speech/auth/profiles/u1")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_config_update_and_metrics() {
        let state = app_state();
        let app = app!(state);

        let req = test::TestRequest::put()
            .uri("/api/v1/config")
            .set_json(json!({ "voice_auth": { "similarity_threshold": 0.9 } }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["updated_config"]["voice_auth"]["similarity_threshold"], 0.9);

        let req = test::TestRequest::put()
            .uri("/api/v1/config")
            .set_json(json!({ "server": { "port": 0 } }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get().uri("/api/v1/metrics").to_request();
        let metrics: Value = test::call_and_read_body_json(&app, req).await;
        assert!(metrics["overall"]["total_requests"].as_u64().unwrap() >= 2);
        let endpoints = metrics["endpoints"].as_array().unwrap();
        assert!(endpoints.iter().any(|e| e["endpoint"] == "PUT /api/v1/config"));
        assert_eq!(metrics["engine"]["rate_limiter"]["capacity"], 100);
    }

    #[actix_web::test]
    async fn test_capability_listing() {
        let state = app_state();
        let app = app!(state);

        let req = test::TestRequest::get().uri("/api/v1/speech/voices").to_request();
        let voices: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(voices["voices"][0]["id"], "default");

        let req = test::TestRequest::get().uri("/api/v1/speech/languages").to_request();
        let languages: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(languages["languages"][0]["code"], "en");
    }
}
