//! Turns — one user utterance paired with the character's reply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scope::ConversationScope;

/// A completed exchange within one conversation scope.
///
/// Turns are append-only. Within a scope, `created_at` never goes
/// backwards; stores clamp it on append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub scope: ConversationScope,
    pub user_message: String,
    pub ai_message: String,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// A turn stamped with the current time.
    pub fn new(
        scope: ConversationScope,
        user_message: impl Into<String>,
        ai_message: impl Into<String>,
    ) -> Self {
        Self {
            scope,
            user_message: user_message.into(),
            ai_message: ai_message.into(),
            created_at: Utc::now(),
        }
    }
}
