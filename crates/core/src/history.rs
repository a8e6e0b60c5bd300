//! Conversation history persistence.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::scope::ConversationScope;
use crate::turn::Turn;

/// Append-only log of turns, partitioned by [`ConversationScope`].
///
/// Implementations must never return turns from a scope other than the one
/// asked for, and must return turns oldest first with insertion order
/// breaking timestamp ties.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// A human-readable name for this backend (e.g., "sqlite").
    fn name(&self) -> &str;

    /// All turns of a scope, oldest first. Empty when the scope has none.
    async fn list(&self, scope: &ConversationScope) -> std::result::Result<Vec<Turn>, StoreError>;

    /// Append a turn. Concurrent appends to one scope are serialized.
    async fn append(&self, turn: Turn) -> std::result::Result<(), StoreError>;
}
