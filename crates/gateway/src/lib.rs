//! HTTP API gateway for VoxChat.
//!
//! Exposes a health check and the v1 conversation API over the pipeline.
//! Pipeline domain events are forwarded to the `voxchat::events` log target.
//!
//! Built on Axum for high performance async HTTP.

pub mod api_v1;
pub mod auth;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{
    Router,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, info, warn};
use voxchat_config::{AppConfig, GatewayConfig};
use voxchat_core::error::StoreError;
use voxchat_core::event::{DomainEvent, EventBus};
use voxchat_core::identity::AuthProvider;
use voxchat_pipeline::{Pipeline, PipelineDeps, PipelineSettings};

use crate::api_v1::{ApiError, SESSION_HEADER};
use crate::auth::StaticTokenAuth;

/// Shared application state for the gateway.
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub auth: Arc<dyn AuthProvider>,
    pub gateway: GatewayConfig,
    /// Cancelled on shutdown; every request runs under a child token.
    pub shutdown: CancellationToken,
}

pub type SharedState = Arc<AppState>;

/// Build the full router.
///
/// Layers applied:
/// - Bearer identity on all /v1 routes (invalid token ⇒ 401)
/// - CORS restricted to the configured origins
/// - Request body size limit (1 MB)
/// - In-memory sliding-window rate limiting
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.gateway.allowed_origins);
    let limit = state.gateway.rate_limit_per_minute as usize;
    let rate_limiter = Arc::new(RateLimiter::new(limit, Duration::from_secs(60)));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(middleware::from_fn(move |req, next| {
            let limiter = rate_limiter.clone();
            rate_limit_middleware(limiter, req, next)
        }))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// An empty origin list allows any origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() || origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "Ignoring malformed CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static(SESSION_HEADER),
        ])
        .expose_headers([header::HeaderName::from_static(SESSION_HEADER)])
        .max_age(Duration::from_secs(3600))
}

/// Wire storage, AI backends and settings into a pipeline.
///
/// Seeds the configured characters that are not stored yet.
pub async fn build_pipeline(
    config: &AppConfig,
    events: Arc<EventBus>,
) -> Result<Pipeline, StoreError> {
    let storage = voxchat_store::open(&config.storage).await?;
    let seeded = voxchat_store::seed_characters(storage.characters.as_ref(), &config.characters)
        .await?;
    if seeded > 0 {
        info!(seeded, "Seeded characters");
    }

    let services = voxchat_providers::build_from_config(config);
    info!(services = ?services, "AI services ready");

    let settings = PipelineSettings::from_config(config).with_model(services.model.clone());
    let deps = PipelineDeps {
        characters: storage.characters,
        history: storage.history,
        generator: services.generator,
        transcriber: services.transcriber,
        synthesizer: services.synthesizer,
    };
    Ok(Pipeline::new(deps, settings, events))
}

/// Start the gateway HTTP server and serve until Ctrl-C.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let shutdown = CancellationToken::new();
    let events = Arc::new(EventBus::default());
    let event_log = spawn_event_log(&events, shutdown.clone());
    let pipeline = build_pipeline(&config, events).await?;

    let auth = StaticTokenAuth::from_config(&config.auth);
    if auth.is_empty() {
        info!("No bearer tokens configured; all callers are anonymous");
    }

    let state = Arc::new(AppState {
        pipeline: Arc::new(pipeline),
        auth: Arc::new(auth),
        gateway: config.gateway.clone(),
        shutdown: shutdown.clone(),
    });
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested; cancelling in-flight requests");
            }
            shutdown.cancel();
        })
        .await?;

    let _ = event_log.await;
    Ok(())
}

/// Log every domain event until `shutdown` fires or the bus is dropped.
fn spawn_event_log(events: &EventBus, shutdown: CancellationToken) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = rx.recv() => match received {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(target: "voxchat::events", skipped, "Event log fell behind");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}

fn log_event(event: &DomainEvent) {
    match event {
        DomainEvent::StageCompleted { stage, elapsed_ms, .. } => {
            debug!(target: "voxchat::events", stage = %stage, elapsed_ms, "Stage completed");
        }
        DomainEvent::StageFailed { stage, error, .. } => {
            info!(target: "voxchat::events", stage = %stage, error = %error, "Stage failed");
        }
        DomainEvent::TurnPersisted { scope, .. } => {
            debug!(target: "voxchat::events", scope = %scope, "Turn persisted");
        }
        DomainEvent::PersistenceFailed { scope, error, .. } => {
            info!(target: "voxchat::events", scope = %scope, error = %error, "Turn not persisted");
        }
        DomainEvent::SynthesisDegraded { error, .. } => {
            info!(target: "voxchat::events", error = %error, "Reply sent without audio");
        }
    }
}

// --- Rate Limiter ---

/// Simple in-memory sliding-window rate limiter.
///
/// Tracks request timestamps per client key.
/// Thread-safe via `std::sync::Mutex` (non-async, held briefly).
struct RateLimiter {
    max_requests: usize,
    window: Duration,
    clients: std::sync::Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if the client is within limits. A zero limit disables
    /// limiting.
    fn check(&self, client_key: &str) -> bool {
        if self.max_requests == 0 {
            return true;
        }

        let now = Instant::now();
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());

        if clients.len() > 10_000 {
            clients.retain(|_, timestamps| {
                timestamps
                    .last()
                    .is_some_and(|t| now.duration_since(*t) < self.window)
            });
        }

        let timestamps = clients.entry(client_key.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.max_requests {
            return false;
        }

        timestamps.push(now);
        true
    }
}

/// Keyed by bearer token, then session header, then "anonymous".
/// `/health` is exempt.
async fn rate_limit_middleware(
    limiter: Arc<RateLimiter>,
    req: axum::extract::Request,
    next: Next,
) -> Response {
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }

    let headers = req.headers();
    let client_key = headers
        .get(header::AUTHORIZATION)
        .or_else(|| headers.get(SESSION_HEADER))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| "anonymous".to_string());

    if !limiter.check(&client_key) {
        warn!(client = %client_key.chars().take(12).collect::<String>(), "Rate limit exceeded");
        return ApiError::RateLimited.into_response();
    }

    next.run(req).await
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use voxchat_pipeline::testing::Harness;

    pub fn bearer_config() -> AppConfig {
        let mut config = AppConfig::default();
        config
            .auth
            .tokens
            .insert("tok-alice".into(), "alice".into());
        config
    }

    pub fn app_with_config(harness: &Harness, config: AppConfig) -> Router {
        build_router(Arc::new(AppState {
            pipeline: Arc::new(harness.pipeline()),
            auth: Arc::new(StaticTokenAuth::from_config(&config.auth)),
            gateway: config.gateway,
            shutdown: CancellationToken::new(),
        }))
    }

    pub fn app(harness: &Harness) -> Router {
        app_with_config(harness, AppConfig::default())
    }
}
