//! Identity resolution — which conversation a request belongs to.

use tracing::debug;
use voxchat_config::ScopeMode;
use voxchat_core::character::CharacterId;
use voxchat_core::error::PipelineError;
use voxchat_core::identity::RequestIdentity;
use voxchat_core::scope::{ConversationScope, SessionToken};

/// Longest session token accepted from a caller.
pub const MAX_TOKEN_LEN: usize = 128;

/// A resolved scope plus the token to hand back to an anonymous caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedScope {
    pub scope: ConversationScope,
    /// `Some` for anonymous scopes (echoed or freshly minted), `None` for
    /// authenticated ones.
    pub response_token: Option<SessionToken>,
}

/// Maps a request's identity and optional session token onto a scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver {
    mode: ScopeMode,
}

impl IdentityResolver {
    pub fn new(mode: ScopeMode) -> Self {
        Self { mode }
    }

    /// Resolve the scope for a request that may start a conversation.
    ///
    /// A verified identity wins over any supplied token. Without one, a
    /// supplied token is reused, otherwise a fresh token is minted.
    pub fn resolve(
        &self,
        identity: &RequestIdentity,
        supplied_token: Option<&str>,
        character_id: CharacterId,
    ) -> Result<ResolvedScope, PipelineError> {
        if let RequestIdentity::Verified(user_id) = identity {
            return Ok(ResolvedScope {
                scope: ConversationScope::authenticated(user_id.clone(), character_id),
                response_token: None,
            });
        }

        if self.mode == ScopeMode::AuthenticatedOnly {
            return Err(PipelineError::AuthenticationRequired);
        }

        let token = match supplied_token.map(parse_token).transpose()?.flatten() {
            Some(token) => token,
            None => {
                let token = SessionToken::mint();
                debug!(character_id = %character_id, "Minted session token");
                token
            }
        };

        Ok(ResolvedScope {
            scope: ConversationScope::anonymous(token.clone(), character_id),
            response_token: Some(token),
        })
    }

    /// Resolve the scope of an existing conversation. Never mints a token:
    /// an anonymous caller without one has no history to read.
    pub fn resolve_existing(
        &self,
        identity: &RequestIdentity,
        supplied_token: Option<&str>,
        character_id: CharacterId,
    ) -> Result<ConversationScope, PipelineError> {
        if let RequestIdentity::Verified(user_id) = identity {
            return Ok(ConversationScope::authenticated(user_id.clone(), character_id));
        }

        if self.mode == ScopeMode::AuthenticatedOnly {
            return Err(PipelineError::AuthenticationRequired);
        }

        match supplied_token.map(parse_token).transpose()?.flatten() {
            Some(token) => Ok(ConversationScope::anonymous(token, character_id)),
            None => Err(PipelineError::AuthenticationRequired),
        }
    }
}

/// `Ok(None)` for a blank token, an error for a malformed one.
fn parse_token(raw: &str) -> Result<Option<SessionToken>, PipelineError> {
    let token = raw.trim();
    if token.is_empty() {
        return Ok(None);
    }
    if token.chars().count() > MAX_TOKEN_LEN {
        return Err(PipelineError::Validation(format!(
            "session token longer than {MAX_TOKEN_LEN} characters"
        )));
    }
    if token.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(PipelineError::Validation(
            "session token contains whitespace or control characters".into(),
        ));
    }
    Ok(Some(SessionToken::from_supplied(token)))
}
