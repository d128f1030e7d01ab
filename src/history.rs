use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::errors::ApiError;

const SCHEMA_VERSION: i64 = 1;
const DEFAULT_CONVERSATION_ID: &str = "default";
const DEFAULT_CONVERSATION_TITLE: &str = "New Trip";
const MAX_HISTORY_LIMIT: i64 = 1000;
const MAX_TITLE_LEN: usize = 160;

#[derive(Debug, Clone, Serialize)]
pub struct ConversationInfo {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub message_count: i64,
    pub preview: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetail {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A single turn of a stored conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ConversationStore {
    db_path: PathBuf,
    pool: SqlitePool,
}

impl ConversationStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, ApiError> {
        let connect_options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(connect_options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self { db_path, pool };
        store.init_db().await?;
        Ok(store)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    async fn init_db(&self) -> Result<(), ApiError> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        if version != SCHEMA_VERSION {
            self.rebuild_schema().await?;
        }

        Ok(())
    }

    async fn rebuild_schema(&self) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        sqlx::query("DROP TABLE IF EXISTS interactions")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        sqlx::query("DROP TABLE IF EXISTS messages")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        sqlx::query("DROP TABLE IF EXISTS conversations")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query(
            "\
            CREATE TABLE conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL CHECK(length(trim(title)) > 0),
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "\
            CREATE TABLE messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL CHECK(role IN ('user', 'assistant', 'system')),
                content TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            )",
        )
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "\
            CREATE TABLE interactions (
                id TEXT PRIMARY KEY,
                conversation_id TEXT,
                query TEXT NOT NULL,
                response TEXT NOT NULL,
                source_count INTEGER NOT NULL,
                confidence REAL NOT NULL,
                semantic INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX idx_conversations_updated_at ON conversations(updated_at DESC)")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        sqlx::query(
            "CREATE INDEX idx_messages_conversation_id_id ON messages(conversation_id, id)",
        )
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("INSERT INTO conversations (id, title) VALUES (?1, ?2)")
            .bind(DEFAULT_CONVERSATION_ID)
            .bind(DEFAULT_CONVERSATION_TITLE)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        let pragma = format!("PRAGMA user_version = {}", SCHEMA_VERSION);
        sqlx::query(&pragma)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationInfo>, ApiError> {
        let rows = sqlx::query(
            "\
            SELECT c.id, c.title, c.created_at, c.updated_at,
                   (SELECT COUNT(*) FROM messages WHERE conversation_id = c.id) as message_count,
                   (SELECT content FROM messages WHERE conversation_id = c.id ORDER BY id DESC LIMIT 1) as last_message
            FROM conversations c
            ORDER BY c.updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.into_iter()
            .map(conversation_info_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ApiError::internal)
    }

    pub async fn create_conversation(&self, title: Option<String>) -> Result<String, ApiError> {
        let conversation_id = Uuid::new_v4().to_string();
        let title = normalize_title(title);

        sqlx::query("INSERT INTO conversations (id, title) VALUES (?1, ?2)")
            .bind(&conversation_id)
            .bind(title)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(conversation_id)
    }

    pub async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationDetail>, ApiError> {
        let row = sqlx::query(
            "SELECT id, title, created_at, updated_at FROM conversations WHERE id = ?1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        row.map(conversation_detail_from_row)
            .transpose()
            .map_err(ApiError::internal)
    }

    /// Fetch the most recent `limit` turns of a conversation, re-ordered to
    /// chronological (oldest first).
    pub async fn recent_turns(
        &self,
        conversation_id: &str,
        limit: i64,
    ) -> Result<Vec<ConversationTurn>, ApiError> {
        let limit = sanitize_limit(limit);

        let rows = sqlx::query(
            "\
            SELECT role, content, created_at
            FROM (
                SELECT id, role, content, created_at
                FROM messages
                WHERE conversation_id = ?1
                ORDER BY id DESC
                LIMIT ?2
            )
            ORDER BY id ASC",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.into_iter()
            .map(turn_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ApiError::internal)
    }

    pub async fn message_count(&self, conversation_id: &str) -> Result<i64, ApiError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages WHERE conversation_id = ?1")
            .bind(conversation_id)
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)
    }

    pub async fn append_turn(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
    ) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;
        ensure_conversation(&mut tx, conversation_id).await?;

        let role = normalize_role(role);

        sqlx::query(
            "\
            INSERT INTO messages (conversation_id, role, content)
            VALUES (?1, ?2, ?3)",
        )
        .bind(conversation_id)
        .bind(role)
        .bind(content)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        touch_conversation_tx(&mut tx, conversation_id).await?;

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    /// Best-effort analytics record of an answered query. Callers invoke
    /// this after the response has already been returned; failures are
    /// theirs to log, never to surface.
    pub async fn record_interaction(
        &self,
        conversation_id: Option<&str>,
        query: &str,
        response: &str,
        source_count: i64,
        confidence: f64,
        semantic: bool,
    ) -> Result<(), ApiError> {
        sqlx::query(
            "\
            INSERT INTO interactions (id, conversation_id, query, response, source_count, confidence, semantic)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(conversation_id)
        .bind(query)
        .bind(response)
        .bind(source_count)
        .bind(confidence)
        .bind(semantic)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;
        Ok(())
    }

    pub async fn interaction_count(&self) -> Result<i64, ApiError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM interactions")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)
    }
}

fn conversation_info_from_row(
    row: sqlx::sqlite::SqliteRow,
) -> Result<ConversationInfo, sqlx::Error> {
    let last_message: Option<String> = row.try_get("last_message")?;
    let preview = last_message.unwrap_or_default().chars().take(100).collect();

    Ok(ConversationInfo {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        message_count: row.try_get("message_count")?,
        preview,
    })
}

fn conversation_detail_from_row(
    row: sqlx::sqlite::SqliteRow,
) -> Result<ConversationDetail, sqlx::Error> {
    Ok(ConversationDetail {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn turn_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ConversationTurn, sqlx::Error> {
    Ok(ConversationTurn {
        role: row.try_get("role")?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn ensure_conversation(
    tx: &mut Transaction<'_, Sqlite>,
    conversation_id: &str,
) -> Result<(), ApiError> {
    sqlx::query("INSERT OR IGNORE INTO conversations (id, title) VALUES (?1, ?2)")
        .bind(conversation_id)
        .bind(DEFAULT_CONVERSATION_TITLE)
        .execute(&mut **tx)
        .await
        .map_err(ApiError::internal)?;
    Ok(())
}

async fn touch_conversation_tx(
    tx: &mut Transaction<'_, Sqlite>,
    conversation_id: &str,
) -> Result<(), ApiError> {
    sqlx::query(
        "UPDATE conversations SET updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?1",
    )
    .bind(conversation_id)
    .execute(&mut **tx)
    .await
    .map_err(ApiError::internal)?;
    Ok(())
}

fn sanitize_limit(limit: i64) -> i64 {
    if limit <= 0 {
        return 1;
    }
    limit.min(MAX_HISTORY_LIMIT)
}

fn normalize_role(role: &str) -> &'static str {
    match role {
        "user" => "user",
        "assistant" => "assistant",
        "system" => "system",
        _ => "user",
    }
}

fn normalize_title(title: Option<String>) -> String {
    let fallback = || format!("Trip {}", Utc::now().format("%Y-%m-%d %H:%M"));

    let Some(raw) = title else {
        return fallback();
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return fallback();
    }

    trimmed.chars().take(MAX_TITLE_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, ConversationStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path().join("test.db"))
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn schema_seeds_default_conversation() {
        let (_dir, store) = temp_store().await;
        let detail = store.get_conversation("default").await.unwrap();
        assert!(detail.is_some());
    }

    #[tokio::test]
    async fn recent_turns_returns_newest_in_chronological_order() {
        let (_dir, store) = temp_store().await;
        let id = store.create_conversation(None).await.unwrap();

        for n in 1..=10 {
            let role = if n % 2 == 1 { "user" } else { "assistant" };
            store
                .append_turn(&id, role, &format!("turn {}", n))
                .await
                .unwrap();
        }

        let turns = store.recent_turns(&id, 8).await.unwrap();
        assert_eq!(turns.len(), 8);
        assert_eq!(turns[0].content, "turn 3");
        assert_eq!(turns[7].content, "turn 10");
        assert_eq!(turns[0].role, "user");
        assert_eq!(turns[7].role, "assistant");
    }

    #[tokio::test]
    async fn recent_turns_for_unknown_conversation_is_empty() {
        let (_dir, store) = temp_store().await;
        let turns = store.recent_turns("missing", 8).await.unwrap();
        assert!(turns.is_empty());
    }

    #[tokio::test]
    async fn append_turn_normalizes_unknown_roles() {
        let (_dir, store) = temp_store().await;
        store.append_turn("default", "robot", "hi").await.unwrap();
        let turns = store.recent_turns("default", 10).await.unwrap();
        assert_eq!(turns[0].role, "user");
    }

    #[tokio::test]
    async fn record_interaction_is_counted() {
        let (_dir, store) = temp_store().await;
        store
            .record_interaction(Some("default"), "q", "a", 3, 0.82, true)
            .await
            .unwrap();
        store
            .record_interaction(None, "q2", "a2", 0, 0.3, false)
            .await
            .unwrap();
        assert_eq!(store.interaction_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn list_conversations_includes_preview() {
        let (_dir, store) = temp_store().await;
        let id = store.create_conversation(Some("Kyoto".to_string())).await.unwrap();
        store.append_turn(&id, "user", "best temples?").await.unwrap();

        let conversations = store.list_conversations().await.unwrap();
        let kyoto = conversations.iter().find(|c| c.id == id).unwrap();
        assert_eq!(kyoto.title, "Kyoto");
        assert_eq!(kyoto.message_count, 1);
        assert_eq!(kyoto.preview, "best temples?");
    }
}
