//! Characters — the personas a user can talk to.
//!
//! The pipeline only reads characters. Creating and editing them is an
//! administrative concern of whoever owns the repository.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Identifier of a character.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(String);

impl CharacterId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sort key for listings: byte length, then text. Numeric ids come out
    /// in numeric order ("2" before "10").
    pub fn listing_key(&self) -> (usize, &str) {
        (self.0.len(), &self.0)
    }
}

impl From<&str> for CharacterId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CharacterId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A persona with its generation prompt and default voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,

    /// Display name, unique across characters
    pub name: String,

    /// Short blurb shown to users
    #[serde(default)]
    pub description: String,

    /// Persona instructions sent as the system message of every prompt
    pub system_prompt: String,

    /// TTS voice used when the caller does not pick one; may be empty
    #[serde(default)]
    pub default_voice: String,

    pub created_at: DateTime<Utc>,
}

impl Character {
    pub fn new(
        id: impl Into<CharacterId>,
        name: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            system_prompt: system_prompt.into(),
            default_voice: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_default_voice(mut self, voice: impl Into<String>) -> Self {
        self.default_voice = voice.into();
        self
    }

    /// The default voice, if one is set.
    pub fn default_voice(&self) -> Option<&str> {
        let voice = self.default_voice.trim();
        if voice.is_empty() { None } else { Some(voice) }
    }
}

/// Paging and name filter for character listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterQuery {
    /// 1-based page number
    #[serde(default = "default_page")]
    pub page: u32,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Case-insensitive substring match on the name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    10
}

impl Default for CharacterQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
            search: None,
        }
    }
}

impl CharacterQuery {
    /// Clamp invalid paging values to the defaults.
    pub fn normalized(mut self) -> Self {
        if self.page == 0 {
            self.page = default_page();
        }
        if self.page_size == 0 {
            self.page_size = default_page_size();
        }
        self.page_size = self.page_size.min(100);
        self.search = self
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self
    }

    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize) * self.page_size as usize
    }

    /// Substring match on a name. Case folding is ASCII-only, the same as
    /// SQLite's `lower()`.
    pub fn matches(&self, name: &str) -> bool {
        match &self.search {
            Some(needle) => name
                .to_ascii_lowercase()
                .contains(&needle.to_ascii_lowercase()),
            None => true,
        }
    }
}

/// One page of characters plus the total match count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterPage {
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
    pub data: Vec<Character>,
}

/// Read access to characters, plus the seeding hook used by administration.
///
/// Implementations: SQLite, in-memory.
#[async_trait]
pub trait CharacterRepository: Send + Sync {
    /// Fetch a character by ID. `Ok(None)` when it does not exist.
    async fn get(&self, id: &CharacterId) -> std::result::Result<Option<Character>, StoreError>;

    /// List characters ordered by ID.
    async fn list(&self, query: CharacterQuery) -> std::result::Result<CharacterPage, StoreError>;

    /// Insert or replace a character.
    async fn upsert(&self, character: Character) -> std::result::Result<(), StoreError>;
}
