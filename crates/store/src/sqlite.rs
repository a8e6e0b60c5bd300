//! SQLite backend for turns and characters.
//!
//! Two tables:
//! - `turns` — append-only log keyed by `(scope_kind, scope_id, character_id)`,
//!   read back ordered by `(created_at_us, seq)`
//! - `characters` — personas, upserted by id
//!
//! Timestamps of turns are stored as Unix microseconds. The append clamps a
//! turn's timestamp up to the latest one in its scope inside the same
//! statement, so the stored order never disagrees with insertion order.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use voxchat_core::character::{Character, CharacterId, CharacterPage, CharacterQuery, CharacterRepository};
use voxchat_core::error::StoreError;
use voxchat_core::history::HistoryStore;
use voxchat_core::scope::ConversationScope;
use voxchat_core::turn::Turn;

/// A SQLite store for history and characters.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database file. Parent directories are created.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Storage(format!("Cannot create {}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self::from_pool(pool).await?;
        info!("SQLite store initialized at {}", path.display());
        Ok(store)
    }

    /// An ephemeral in-process database.
    ///
    /// Limited to one connection: every `:memory:` connection is its own
    /// database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite URL: {e}")))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        Self::from_pool(pool).await
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                seq           INTEGER PRIMARY KEY AUTOINCREMENT,
                scope_kind    TEXT NOT NULL,
                scope_id      TEXT NOT NULL,
                character_id  TEXT NOT NULL,
                user_message  TEXT NOT NULL,
                ai_message    TEXT NOT NULL,
                created_at_us INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("turns table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_turns_scope \
             ON turns(scope_kind, scope_id, character_id, created_at_us, seq)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("turns index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS characters (
                id            TEXT PRIMARY KEY,
                name          TEXT NOT NULL UNIQUE,
                description   TEXT NOT NULL DEFAULT '',
                system_prompt TEXT NOT NULL,
                default_voice TEXT NOT NULL DEFAULT '',
                created_at    TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("characters table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_character(row: &sqlx::sqlite::SqliteRow) -> Result<Character, StoreError> {
        let column = |name: &str, e: sqlx::Error| StoreError::QueryFailed(format!("{name} column: {e}"));

        let id: String = row.try_get("id").map_err(|e| column("id", e))?;
        let name: String = row.try_get("name").map_err(|e| column("name", e))?;
        let description: String = row
            .try_get("description")
            .map_err(|e| column("description", e))?;
        let system_prompt: String = row
            .try_get("system_prompt")
            .map_err(|e| column("system_prompt", e))?;
        let default_voice: String = row
            .try_get("default_voice")
            .map_err(|e| column("default_voice", e))?;
        let created_at_str: String = row
            .try_get("created_at")
            .map_err(|e| column("created_at", e))?;

        let created_at = DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Character {
            id: CharacterId::from(id),
            name,
            description,
            system_prompt,
            default_voice,
            created_at,
        })
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn list(&self, scope: &ConversationScope) -> Result<Vec<Turn>, StoreError> {
        let key = scope.key();
        let rows = sqlx::query(
            r#"
            SELECT user_message, ai_message, created_at_us
            FROM turns
            WHERE scope_kind = ?1 AND scope_id = ?2 AND character_id = ?3
            ORDER BY created_at_us ASC, seq ASC
            "#,
        )
        .bind(key.kind.as_str())
        .bind(&key.subject)
        .bind(&key.character_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("list turns: {e}")))?;

        rows.iter()
            .map(|row| {
                let user_message: String = row
                    .try_get("user_message")
                    .map_err(|e| StoreError::QueryFailed(format!("user_message column: {e}")))?;
                let ai_message: String = row
                    .try_get("ai_message")
                    .map_err(|e| StoreError::QueryFailed(format!("ai_message column: {e}")))?;
                let micros: i64 = row
                    .try_get("created_at_us")
                    .map_err(|e| StoreError::QueryFailed(format!("created_at_us column: {e}")))?;
                let created_at = DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(|| {
                    StoreError::QueryFailed(format!("created_at_us out of range: {micros}"))
                })?;

                Ok(Turn {
                    scope: scope.clone(),
                    user_message,
                    ai_message,
                    created_at,
                })
            })
            .collect()
    }

    async fn append(&self, turn: Turn) -> Result<(), StoreError> {
        let key = turn.scope.key();
        sqlx::query(
            r#"
            INSERT INTO turns
                (scope_kind, scope_id, character_id, user_message, ai_message, created_at_us)
            SELECT ?1, ?2, ?3, ?4, ?5, MAX(?6, COALESCE(
                (SELECT MAX(created_at_us) FROM turns
                 WHERE scope_kind = ?1 AND scope_id = ?2 AND character_id = ?3),
                ?6))
            "#,
        )
        .bind(key.kind.as_str())
        .bind(&key.subject)
        .bind(&key.character_id)
        .bind(&turn.user_message)
        .bind(&turn.ai_message)
        .bind(turn.created_at.timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("append turn: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl CharacterRepository for SqliteStore {
    async fn get(&self, id: &CharacterId) -> Result<Option<Character>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, description, system_prompt, default_voice, created_at \
             FROM characters WHERE id = ?1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("get character: {e}")))?;

        row.as_ref().map(Self::row_to_character).transpose()
    }

    async fn list(&self, query: CharacterQuery) -> Result<CharacterPage, StoreError> {
        let query = query.normalized();
        let search = query.search.clone();

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM characters \
             WHERE ?1 IS NULL OR instr(lower(name), lower(?1)) > 0",
        )
        .bind(&search)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("count characters: {e}")))?;

        let rows = sqlx::query(
            r#"
            SELECT id, name, description, system_prompt, default_voice, created_at
            FROM characters
            WHERE ?1 IS NULL OR instr(lower(name), lower(?1)) > 0
            ORDER BY length(CAST(id AS BLOB)) ASC, id ASC
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(&search)
        .bind(i64::from(query.page_size))
        .bind(query.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("list characters: {e}")))?;

        let data = rows
            .iter()
            .map(Self::row_to_character)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CharacterPage {
            total: usize::try_from(total).unwrap_or_default(),
            page: query.page,
            page_size: query.page_size,
            data,
        })
    }

    async fn upsert(&self, character: Character) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO characters (id, name, description, system_prompt, default_voice, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                system_prompt = excluded.system_prompt,
                default_voice = excluded.default_voice
            "#,
        )
        .bind(character.id.as_str())
        .bind(&character.name)
        .bind(&character.description)
        .bind(&character.system_prompt)
        .bind(&character.default_voice)
        .bind(character.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("upsert character {}: {e}", character.id)))?;

        Ok(())
    }
}
