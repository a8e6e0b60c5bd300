//! Bearer authentication for the HTTP surface.
//!
//! A request without an `Authorization` header is anonymous. A request that
//! presents one must present a valid bearer token, otherwise it is rejected
//! with 401 before reaching a handler.

use std::collections::HashMap;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};
use voxchat_config::AuthConfig;
use voxchat_core::identity::{AuthProvider, RequestIdentity, UserId};

use crate::SharedState;
use crate::api_v1::ApiError;

/// Tokens from the `[auth]` config table, mapped to user ids.
pub struct StaticTokenAuth {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenAuth {
    pub fn new(tokens: HashMap<String, UserId>) -> Self {
        Self { tokens }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config
                .tokens
                .iter()
                .map(|(token, user)| (token.clone(), UserId::from(user.as_str())))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl AuthProvider for StaticTokenAuth {
    fn name(&self) -> &str {
        "static_tokens"
    }

    fn identify(&self, bearer: &str) -> Option<UserId> {
        self.tokens.get(bearer).cloned()
    }
}

/// Resolve the caller's identity and attach it to the request extensions.
pub(crate) async fn identity_middleware(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> Response {
    match identify(state.auth.as_ref(), &req) {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

fn identify(auth: &dyn AuthProvider, req: &Request) -> Result<RequestIdentity, ApiError> {
    let Some(header) = req.headers().get(AUTHORIZATION) else {
        return Ok(RequestIdentity::Anonymous);
    };

    let token = header
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Unauthorized("malformed Authorization header"))?;

    match auth.identify(token) {
        Some(user_id) => {
            debug!(user_id = %user_id, provider = auth.name(), "Request authenticated");
            Ok(RequestIdentity::Verified(user_id))
        }
        None => {
            warn!(path = %req.uri().path(), "Rejected invalid bearer token");
            Err(ApiError::Unauthorized("invalid bearer token"))
        }
    }
}
