//! In-memory backend — useful for testing and ephemeral deployments.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use voxchat_core::character::{Character, CharacterId, CharacterPage, CharacterQuery, CharacterRepository};
use voxchat_core::error::StoreError;
use voxchat_core::history::HistoryStore;
use voxchat_core::scope::{ConversationScope, ScopeKey};
use voxchat_core::turn::Turn;

/// Turns and characters held in process memory. Lost on restart.
pub struct InMemoryStore {
    turns: RwLock<HashMap<ScopeKey, Vec<Turn>>>,
    characters: RwLock<BTreeMap<CharacterId, Character>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            turns: RwLock::new(HashMap::new()),
            characters: RwLock::new(BTreeMap::new()),
        }
    }

    /// Build a store pre-populated with characters.
    pub fn with_characters(characters: impl IntoIterator<Item = Character>) -> Self {
        let map = characters.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self {
            turns: RwLock::new(HashMap::new()),
            characters: RwLock::new(map),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn list(&self, scope: &ConversationScope) -> Result<Vec<Turn>, StoreError> {
        let turns = self.turns.read().await;
        Ok(turns.get(&scope.key()).cloned().unwrap_or_default())
    }

    async fn append(&self, mut turn: Turn) -> Result<(), StoreError> {
        let mut turns = self.turns.write().await;
        let log = turns.entry(turn.scope.key()).or_default();
        if let Some(last) = log.last() {
            if turn.created_at < last.created_at {
                turn.created_at = last.created_at;
            }
        }
        log.push(turn);
        Ok(())
    }
}

#[async_trait]
impl CharacterRepository for InMemoryStore {
    async fn get(&self, id: &CharacterId) -> Result<Option<Character>, StoreError> {
        Ok(self.characters.read().await.get(id).cloned())
    }

    async fn list(&self, query: CharacterQuery) -> Result<CharacterPage, StoreError> {
        let query = query.normalized();
        let characters = self.characters.read().await;

        let mut matching: Vec<&Character> = characters
            .values()
            .filter(|c| query.matches(&c.name))
            .collect();
        matching.sort_by(|a, b| a.id.listing_key().cmp(&b.id.listing_key()));

        let data = matching
            .iter()
            .skip(query.offset())
            .take(query.page_size as usize)
            .map(|c| (*c).clone())
            .collect();

        Ok(CharacterPage {
            total: matching.len(),
            page: query.page,
            page_size: query.page_size,
            data,
        })
    }

    async fn upsert(&self, character: Character) -> Result<(), StoreError> {
        self.characters
            .write()
            .await
            .insert(character.id.clone(), character);
        Ok(())
    }
}
