//! Character seeding from configuration.

use tracing::info;
use voxchat_config::CharacterSeed;
use voxchat_core::character::{Character, CharacterId, CharacterRepository};
use voxchat_core::error::StoreError;

/// Insert every seed whose id is not stored yet. Existing characters are
/// left untouched. Returns how many were inserted.
pub async fn seed_characters(
    repo: &dyn CharacterRepository,
    seeds: &[CharacterSeed],
) -> Result<usize, StoreError> {
    let mut inserted = 0;
    for seed in seeds {
        let id = CharacterId::from(seed.id.as_str());
        if repo.get(&id).await?.is_some() {
            continue;
        }
        let character = Character::new(id, &seed.name, &seed.system_prompt)
            .with_description(&seed.description)
            .with_default_voice(&seed.default_voice);
        repo.upsert(character).await?;
        info!(character_id = %seed.id, name = %seed.name, "Seeded character");
        inserted += 1;
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;
    use voxchat_config::AppConfig;

    #[tokio::test]
    async fn seeds_only_missing_characters() {
        let store = InMemoryStore::new();
        store
            .upsert(Character::new("1", "Edited", "Custom prompt"))
            .await
            .unwrap();

        let seeds = AppConfig::default().characters;
        let inserted = seed_characters(&store, &seeds).await.unwrap();
        assert_eq!(inserted, 1);

        let kept = store.get(&CharacterId::from("1")).await.unwrap().unwrap();
        assert_eq!(kept.system_prompt, "Custom prompt");
        assert!(store.get(&CharacterId::from("2")).await.unwrap().is_some());

        assert_eq!(seed_characters(&store, &seeds).await.unwrap(), 0);
    }
}
