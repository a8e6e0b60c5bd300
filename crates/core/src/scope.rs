//! Conversation scopes — which thread a turn belongs to.
//!
//! A conversation is keyed either by an authenticated user or by an opaque
//! session token handed to anonymous callers, always together with the
//! character being talked to. [`ConversationScope::key`] is the only place
//! that looks inside the variant to decide how a scope is stored.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::character::CharacterId;
use crate::identity::UserId;

/// Opaque, unguessable token identifying an anonymous conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Mint a fresh token (UUIDv4, 122 random bits).
    pub fn mint() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wrap a token supplied by a caller. Validation happens in the resolver.
    pub fn from_supplied(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The identity of one conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationScope {
    /// A verified user talking to a character.
    Authenticated {
        user_id: UserId,
        character_id: CharacterId,
    },
    /// An anonymous caller identified by a session token.
    Anonymous {
        session_token: SessionToken,
        character_id: CharacterId,
    },
}

/// Which subject a scope is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    User,
    Session,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::User => "user",
            ScopeKind::Session => "session",
        }
    }
}

/// Flattened storage key of a scope: `(kind, subject, character)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    pub kind: ScopeKind,
    pub subject: String,
    pub character_id: String,
}

impl ConversationScope {
    pub fn authenticated(user_id: UserId, character_id: CharacterId) -> Self {
        ConversationScope::Authenticated {
            user_id,
            character_id,
        }
    }

    pub fn anonymous(session_token: SessionToken, character_id: CharacterId) -> Self {
        ConversationScope::Anonymous {
            session_token,
            character_id,
        }
    }

    /// The character this conversation is held with.
    pub fn character_id(&self) -> &CharacterId {
        match self {
            ConversationScope::Authenticated { character_id, .. }
            | ConversationScope::Anonymous { character_id, .. } => character_id,
        }
    }

    /// The storage key for this scope.
    pub fn key(&self) -> ScopeKey {
        match self {
            ConversationScope::Authenticated {
                user_id,
                character_id,
            } => ScopeKey {
                kind: ScopeKind::User,
                subject: user_id.as_str().to_string(),
                character_id: character_id.as_str().to_string(),
            },
            ConversationScope::Anonymous {
                session_token,
                character_id,
            } => ScopeKey {
                kind: ScopeKind::Session,
                subject: session_token.as_str().to_string(),
                character_id: character_id.as_str().to_string(),
            },
        }
    }

    pub fn kind(&self) -> ScopeKind {
        self.key().kind
    }
}

impl fmt::Display for ConversationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = self.key();
        // Session tokens are bearer secrets; only a prefix goes into logs.
        let subject: String = match key.kind {
            ScopeKind::User => key.subject,
            ScopeKind::Session => key.subject.chars().take(8).collect(),
        };
        write!(f, "{}:{}/{}", key.kind.as_str(), subject, key.character_id)
    }
}
