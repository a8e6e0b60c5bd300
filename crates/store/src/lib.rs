//! Storage backends for VoxChat history and characters.
//!
//! Both backends implement [`HistoryStore`] and [`CharacterRepository`];
//! [`open`] picks one from configuration.

pub mod in_memory;
pub mod seed;

#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::sync::Arc;

use voxchat_config::{StorageBackend, StorageConfig};
use voxchat_core::character::CharacterRepository;
use voxchat_core::error::StoreError;
use voxchat_core::history::HistoryStore;

pub use in_memory::InMemoryStore;
pub use seed::seed_characters;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// One storage backend seen through both repository traits.
#[derive(Clone)]
pub struct Storage {
    pub history: Arc<dyn HistoryStore>,
    pub characters: Arc<dyn CharacterRepository>,
}

impl Storage {
    fn from_backend<S>(backend: S) -> Self
    where
        S: HistoryStore + CharacterRepository + 'static,
    {
        let backend = Arc::new(backend);
        Self {
            history: backend.clone(),
            characters: backend,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_backend(InMemoryStore::new())
    }
}

/// Open the configured backend.
pub async fn open(config: &StorageConfig) -> Result<Storage, StoreError> {
    match config.backend {
        StorageBackend::Memory => Ok(Storage::in_memory()),
        #[cfg(feature = "sqlite")]
        StorageBackend::Sqlite => {
            let store = SqliteStore::open(&config.database_path()).await?;
            Ok(Storage::from_backend(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageBackend::Sqlite => Err(StoreError::Storage(
            "built without the `sqlite` feature".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxchat_core::character::{Character, CharacterId};

    #[tokio::test]
    async fn memory_backend_shares_one_store() {
        let storage = open(&StorageConfig {
            backend: StorageBackend::Memory,
            path: None,
        })
        .await
        .unwrap();
        assert_eq!(storage.history.name(), "in_memory");

        storage
            .characters
            .upsert(Character::new("1", "Socrates", "You are Socrates."))
            .await
            .unwrap();
        assert!(
            storage
                .characters
                .get(&CharacterId::from("1"))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn sqlite_backend_opens_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("voxchat.db");
        let storage = open(&StorageConfig {
            backend: StorageBackend::Sqlite,
            path: Some(path.to_string_lossy().into_owned()),
        })
        .await
        .unwrap();
        assert_eq!(storage.history.name(), "sqlite");
        assert!(path.exists());
    }
}
