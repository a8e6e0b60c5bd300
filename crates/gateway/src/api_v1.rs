//! HTTP API v1 — the VoxChat REST surface.
//!
//! Endpoints:
//!
//! - `POST /v1/chat`                   — Text turn with a character
//! - `POST /v1/voice/chat`             — Spoken turn: ASR, reply, optional TTS
//! - `GET  /v1/history/{character_id}` — Turns of the caller's conversation
//! - `GET  /v1/characters`             — Paged character listing with name search
//! - `GET  /v1/characters/{id}`        — One character
//! - `POST /v1/transcribe`             — Standalone speech-to-text
//! - `POST /v1/tts`                    — Standalone text-to-speech (raw audio)
//!
//! Anonymous conversations are keyed by a session token, read from the
//! `scope_token` body field or the `X-Session-ID` header and echoed back in
//! both places.

use axum::{
    Extension, Router,
    extract::{FromRequest, Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use voxchat_core::character::{Character, CharacterId, CharacterPage, CharacterQuery};
use voxchat_core::error::{PipelineError, Stage, StoreError};
use voxchat_core::identity::RequestIdentity;
use voxchat_core::provider::AudioRef;
use voxchat_pipeline::{ChatResponse, HistoryResponse, TranscriptionResponse};

use crate::SharedState;
use crate::auth::identity_middleware;

/// Header carrying the anonymous session token.
pub const SESSION_HEADER: &str = "x-session-id";

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/voice/chat", post(voice_chat_handler))
        .route("/history/{character_id}", get(history_handler))
        .route("/characters", get(list_characters_handler))
        .route("/characters/{id}", get(get_character_handler))
        .route("/transcribe", post(transcribe_handler))
        .route("/tts", post(tts_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            identity_middleware,
        ))
        .with_state(state)
}

// ── Errors ────────────────────────────────────────────────────────────────

/// Everything a v1 handler can fail with.
#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    Unauthorized(&'static str),
    RateLimited,
    /// The body could not be read at all (too large, broken stream).
    Body { status: StatusCode, message: String },
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::Pipeline(e)
    }
}

/// Undecodable JSON is a validation failure; unreadable bodies keep axum's status.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if matches!(rejection, JsonRejection::BytesRejection(_)) {
            return ApiError::Body {
                status: rejection.status(),
                message: rejection.body_text(),
            };
        }
        ApiError::Pipeline(PipelineError::Validation(rejection.body_text()))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Pipeline(e) => match e {
                PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
                PipelineError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
                PipelineError::NotFound { .. } => StatusCode::NOT_FOUND,
                PipelineError::Upstream { .. } => StatusCode::BAD_GATEWAY,
                PipelineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                PipelineError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Body { status, .. } => *status,
        }
    }

    fn body(&self) -> ErrorResponse {
        match self {
            ApiError::Pipeline(e) => ErrorResponse {
                error: e.to_string(),
                stage: e.stage(),
            },
            ApiError::Unauthorized(reason) => ErrorResponse {
                error: format!("Unauthorized: {reason}"),
                stage: None,
            },
            ApiError::RateLimited => ErrorResponse {
                error: "Rate limit exceeded".into(),
                stage: None,
            },
            ApiError::Body { message, .. } => ErrorResponse {
                error: message.clone(),
                stage: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = self.body();
        if status.is_server_error() {
            error!(status = status.as_u16(), stage = ?body.stage, error = %body.error, "Request failed");
        }
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
}

fn storage_error(source: StoreError) -> ApiError {
    ApiError::Pipeline(PipelineError::Storage {
        stage: Stage::LoadCharacter,
        source,
    })
}

// ── Request types ─────────────────────────────────────────────────────────

/// `Json` whose rejections answer with [`ErrorResponse`].
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
struct ApiJson<T>(T);

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    character_id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    scope_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VoiceChatRequest {
    #[serde(default)]
    character_id: String,
    #[serde(default)]
    audio_url: String,
    #[serde(default)]
    audio_format: String,
    #[serde(default)]
    voice_id: Option<String>,
    #[serde(default)]
    scope_token: Option<String>,
    #[serde(default = "default_want_audio")]
    want_audio: bool,
}

fn default_want_audio() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    #[serde(default)]
    scope_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CharacterListParams {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default, alias = "pageSize")]
    page_size: Option<u32>,
    #[serde(default)]
    query: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscribeRequest {
    #[serde(default)]
    audio_url: String,
    #[serde(default)]
    audio_format: String,
}

#[derive(Debug, Deserialize)]
struct TtsRequest {
    #[serde(default)]
    text: String,
    #[serde(default)]
    voice_id: Option<String>,
}

/// The body field wins over the header; blank values count as absent.
fn session_token(body: Option<&str>, headers: &HeaderMap) -> Option<String> {
    body.filter(|t| !t.trim().is_empty())
        .map(str::to_string)
        .or_else(|| {
            headers
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|t| !t.trim().is_empty())
                .map(str::to_string)
        })
}

fn chat_response(body: ChatResponse) -> Response {
    let token = body.scope_token.clone();
    let mut response = Json(body).into_response();
    if let Some(value) = token.and_then(|t| HeaderValue::from_str(&t).ok()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn chat_handler(
    State(state): State<SharedState>,
    Extension(identity): Extension<RequestIdentity>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<ChatRequest>,
) -> Result<Response, ApiError> {
    let pipeline = &state.pipeline;
    let token = session_token(req.scope_token.as_deref(), &headers);
    let character_id = CharacterId::from(req.character_id);
    let resolved = pipeline
        .resolver()
        .resolve(&identity, token.as_deref(), character_id.clone())?;

    let outcome = pipeline
        .chat(
            character_id,
            req.message,
            &resolved.scope,
            state.shutdown.child_token(),
        )
        .await?;

    Ok(chat_response(ChatResponse::assemble(
        &outcome,
        resolved.response_token.as_ref(),
    )))
}

async fn voice_chat_handler(
    State(state): State<SharedState>,
    Extension(identity): Extension<RequestIdentity>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<VoiceChatRequest>,
) -> Result<Response, ApiError> {
    let pipeline = &state.pipeline;
    let token = session_token(req.scope_token.as_deref(), &headers);
    let character_id = CharacterId::from(req.character_id);
    let resolved = pipeline
        .resolver()
        .resolve(&identity, token.as_deref(), character_id.clone())?;

    info!(
        character_id = %character_id,
        format = %req.audio_format,
        want_audio = req.want_audio,
        "Voice chat request"
    );

    let outcome = pipeline
        .voice_chat(
            character_id,
            AudioRef::new(req.audio_url, req.audio_format),
            req.voice_id,
            req.want_audio,
            &resolved.scope,
            state.shutdown.child_token(),
        )
        .await?;

    Ok(chat_response(ChatResponse::assemble(
        &outcome,
        resolved.response_token.as_ref(),
    )))
}

async fn history_handler(
    State(state): State<SharedState>,
    Extension(identity): Extension<RequestIdentity>,
    Path(character_id): Path<String>,
    Query(params): Query<HistoryParams>,
    headers: HeaderMap,
) -> Result<Json<HistoryResponse>, ApiError> {
    let token = session_token(params.scope_token.as_deref(), &headers);
    let scope = state.pipeline.resolver().resolve_existing(
        &identity,
        token.as_deref(),
        CharacterId::from(character_id),
    )?;

    let turns = state
        .pipeline
        .history(&scope, state.shutdown.child_token())
        .await?;
    Ok(Json(HistoryResponse::from_turns(&turns)))
}

async fn list_characters_handler(
    State(state): State<SharedState>,
    Query(params): Query<CharacterListParams>,
) -> Result<Json<CharacterPage>, ApiError> {
    let defaults = CharacterQuery::default();
    let query = CharacterQuery {
        page: params.page.unwrap_or(defaults.page),
        page_size: params.page_size.unwrap_or(defaults.page_size),
        search: params.query,
    };

    let page = state
        .pipeline
        .characters()
        .list(query)
        .await
        .map_err(storage_error)?;
    Ok(Json(page))
}

async fn get_character_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Character>, ApiError> {
    let id = CharacterId::from(id);
    state
        .pipeline
        .characters()
        .get(&id)
        .await
        .map_err(storage_error)?
        .map(Json)
        .ok_or_else(|| {
            ApiError::Pipeline(PipelineError::NotFound {
                what: "character",
                id: id.to_string(),
            })
        })
}

async fn transcribe_handler(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<TranscribeRequest>,
) -> Result<Json<TranscriptionResponse>, ApiError> {
    let transcribed_text = state
        .pipeline
        .transcribe(
            AudioRef::new(req.audio_url, req.audio_format),
            state.shutdown.child_token(),
        )
        .await?;
    Ok(Json(TranscriptionResponse { transcribed_text }))
}

async fn tts_handler(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<TtsRequest>,
) -> Result<Response, ApiError> {
    let audio = state
        .pipeline
        .synthesize(
            &req.text,
            req.voice_id.as_deref(),
            state.shutdown.child_token(),
        )
        .await?;
    Ok(([(header::CONTENT_TYPE, audio.mime_type)], audio.bytes).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;
    use voxchat_core::error::ProviderError;
    use voxchat_core::scope::SessionToken;
    use voxchat_pipeline::testing::*;

    use crate::test_support::{app, app_with_config, bearer_config};

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, HeaderMap, serde_json::Value) {
        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
        };
        (status, headers, json)
    }

    fn token_of(json: &serde_json::Value) -> SessionToken {
        SessionToken::from_supplied(json["scope_token"].as_str().unwrap_or_default())
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn anonymous_chat_mints_and_reuses_session() {
        let harness = Harness::new().generator(ScriptedGenerator::replying([
            "What is courage?",
            "And what is wisdom?",
        ]));
        let app = app(&harness);

        let (status, headers, json) = send(
            app.clone(),
            post_json(
                "/v1/chat",
                serde_json::json!({"character_id": SOCRATES_ID, "message": "Hi"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["reply"], "What is courage?");
        assert!(json["audio"].is_null());
        assert!(json["transcribed_text"].is_null());
        let token = token_of(&json);
        assert!(!token.as_str().is_empty());
        assert_eq!(
            headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()),
            Some(token.as_str())
        );

        // Same session via the header: the second prompt replays the first turn.
        let mut second = post_json(
            "/v1/chat",
            serde_json::json!({"character_id": SOCRATES_ID, "message": "Tell me more"}),
        );
        second
            .headers_mut()
            .insert(SESSION_HEADER, HeaderValue::from_str(token.as_str()).unwrap());
        let (status, _, json) = send(app.clone(), second).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["scope_token"], token.as_str());
        assert_eq!(harness.generator.requests()[1].messages.len(), 4);

        let history = Request::builder()
            .uri(format!("/v1/history/{SOCRATES_ID}?scope_token={}", token.as_str()))
            .body(Body::empty())
            .unwrap();
        let (status, _, json) = send(app, history).await;
        assert_eq!(status, StatusCode::OK);
        let items = json["history"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["user_message"], "Hi");
        assert_eq!(items[1]["ai_message"], "And what is wisdom?");
        assert!(items[0]["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn verified_user_gets_no_scope_token() {
        let harness = Harness::new().generator(ScriptedGenerator::replying(["Know thyself."]));
        let app = app_with_config(&harness, bearer_config());

        let mut req = post_json(
            "/v1/chat",
            serde_json::json!({"character_id": SOCRATES_ID, "message": "Hi", "scope_token": "ignored"}),
        );
        req.headers_mut()
            .insert("authorization", HeaderValue::from_static("Bearer tok-alice"));
        let (status, headers, json) = send(app.clone(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["scope_token"].is_null());
        assert!(headers.get(SESSION_HEADER).is_none());

        let history = Request::builder()
            .uri(format!("/v1/history/{SOCRATES_ID}"))
            .header("authorization", "Bearer tok-alice")
            .body(Body::empty())
            .unwrap();
        let (status, _, json) = send(app, history).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["history"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_bearer_is_401() {
        let harness = Harness::new();
        let app = app_with_config(&harness, bearer_config());

        let mut req = post_json(
            "/v1/chat",
            serde_json::json!({"character_id": SOCRATES_ID, "message": "Hi"}),
        );
        req.headers_mut()
            .insert("authorization", HeaderValue::from_static("Bearer wrong"));
        let (status, _, json) = send(app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(json["error"].as_str().unwrap().contains("invalid bearer token"));
        assert_eq!(harness.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn error_statuses_carry_stage() {
        let harness = Harness::new().generator(ScriptedGenerator::new(vec![Err(
            ProviderError::ApiError {
                status_code: 500,
                message: "boom".into(),
            },
        )]));
        let app = app(&harness);

        let (status, _, json) = send(
            app.clone(),
            post_json(
                "/v1/chat",
                serde_json::json!({"character_id": SOCRATES_ID, "message": "Hi"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["stage"], "generate");

        let (status, _, json) = send(
            app.clone(),
            post_json(
                "/v1/chat",
                serde_json::json!({"character_id": "404", "message": "Hi"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json.get("stage").is_none());

        let (status, _, _) = send(
            app,
            post_json(
                "/v1/chat",
                serde_json::json!({"character_id": SOCRATES_ID, "message": "   "}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_504() {
        let harness = Harness::new()
            .generator(
                ScriptedGenerator::replying(["late"]).with_delay(Duration::from_secs(120)),
            )
            .settings(|s| s.deadline = Duration::from_secs(5));
        let app = app(&harness);

        let (status, _, json) = send(
            app,
            post_json(
                "/v1/chat",
                serde_json::json!({"character_id": SOCRATES_ID, "message": "Hi"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(json["stage"], "generate");
    }

    #[tokio::test]
    async fn voice_chat_returns_transcript_and_audio() {
        let harness = Harness::new()
            .generator(ScriptedGenerator::replying(["Why do you ask?"]))
            .transcriber(ScriptedTranscriber::ok("What is justice?"));
        let app = app(&harness);

        let (status, _, json) = send(
            app,
            post_json(
                "/v1/voice/chat",
                serde_json::json!({
                    "character_id": SOCRATES_ID,
                    "audio_url": "https://cdn.example.com/q.mp3",
                    "audio_format": "mp3",
                    "voice_id": "qiniu_en_male_ljfdxz",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["transcribed_text"], "What is justice?");
        assert_eq!(json["reply"], "Why do you ask?");
        assert_eq!(json["audio"]["mime_type"], "audio/mpeg");
        assert!(!json["audio"]["base64"].as_str().unwrap().is_empty());
        assert_eq!(harness.synthesizer.voices(), vec!["qiniu_en_male_ljfdxz"]);
    }

    #[tokio::test]
    async fn voice_chat_asr_failure_is_502() {
        let harness = Harness::new().transcriber(ScriptedTranscriber::failing(
            ProviderError::Network("reset".into()),
        ));
        let app = app(&harness);

        let (status, _, json) = send(
            app,
            post_json(
                "/v1/voice/chat",
                serde_json::json!({
                    "character_id": SOCRATES_ID,
                    "audio_url": "https://cdn.example.com/q.mp3",
                    "audio_format": "mp3",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["stage"], "asr");
        assert_eq!(harness.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn anonymous_history_without_token_is_401() {
        let harness = Harness::new();
        let req = Request::builder()
            .uri(format!("/v1/history/{SOCRATES_ID}"))
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(app(&harness), req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn characters_list_and_get() {
        let harness = Harness::new();
        let app = app(&harness);

        let req = Request::builder()
            .uri("/v1/characters?page=1&pageSize=5&query=SOC")
            .body(Body::empty())
            .unwrap();
        let (status, _, json) = send(app.clone(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total"], 1);
        assert_eq!(json["page_size"], 5);
        assert_eq!(json["data"][0]["name"], "Socrates");

        let req = Request::builder()
            .uri(format!("/v1/characters/{SOCRATES_ID}"))
            .body(Body::empty())
            .unwrap();
        let (status, _, json) = send(app.clone(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["system_prompt"], SOCRATES_PROMPT);

        let req = Request::builder()
            .uri("/v1/characters/nobody")
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn transcribe_and_tts() {
        let harness = Harness::new();
        let app = app(&harness);

        let (status, _, json) = send(
            app.clone(),
            post_json(
                "/v1/transcribe",
                serde_json::json!({"audio_url": "https://cdn.example.com/q.mp3", "audio_format": "mp3"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["transcribed_text"], "Hello");

        let response = app
            .oneshot(post_json("/v1/tts", serde_json::json!({"text": "Hello"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), SAMPLE_AUDIO);

        let (status, _, _) = send(
            crate::test_support::app(&harness),
            post_json("/v1/tts", serde_json::json!({"text": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    fn post_raw(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn wrongly_typed_body_is_400_json() {
        let harness = Harness::new();
        let (status, _, json) = send(
            app(&harness),
            post_json(
                "/v1/chat",
                serde_json::json!({"character_id": 2, "message": "hi"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("character_id"));
        assert!(json.get("stage").is_none());
        assert_eq!(harness.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn unparseable_body_is_400_json() {
        let harness = Harness::new();
        for uri in ["/v1/chat", "/v1/voice/chat", "/v1/transcribe", "/v1/tts"] {
            let (status, _, json) = send(app(&harness), post_raw(uri, "{not json")).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert!(json["error"].is_string(), "{uri}");
        }
    }

    #[tokio::test]
    async fn missing_content_type_is_400_json() {
        let harness = Harness::new();
        let req = Request::builder()
            .method("POST")
            .uri("/v1/chat")
            .body(Body::from(r#"{"character_id":"2","message":"hi"}"#))
            .unwrap();
        let (status, _, json) = send(app(&harness), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());
    }
}
