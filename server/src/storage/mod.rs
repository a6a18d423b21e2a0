//! Database storage layer for EventHub Server
//!
//! Users, sessions and events are external collaborators of the messaging
//! core; they live here only as far as the core needs to look them up.
//! The Message Store itself is in [`messages`].

mod conversations;
mod messages;
mod moderation;

pub use conversations::{DirectHead, EventHead};
pub use messages::{MessageQuery, MessageScope};

use chrono::Duration;
use sqlx::{sqlite::SqlitePoolOptions, Pool, QueryBuilder, Sqlite};
use std::path::Path;
use uuid::Uuid;

use crate::crypto;
use crate::error::Result;
use crate::models::*;

pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_path: &str) -> anyhow::Result<Self> {
        // Ensure directory exists
        if let Some(parent) = Path::new(database_path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let database_url = format!("sqlite:{}?mode=rwc", database_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(&database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                avatar_url TEXT,
                is_admin INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                token_hash TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                is_valid INTEGER NOT NULL DEFAULT 1,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_by TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS event_participants (
                event_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                joined_at INTEGER NOT NULL,
                PRIMARY KEY (event_id, user_id),
                FOREIGN KEY (event_id) REFERENCES events(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                sender_id TEXT NOT NULL,
                recipient_id TEXT,
                event_id TEXT,
                body TEXT NOT NULL DEFAULT '',
                kind TEXT NOT NULL,
                reply_to_id TEXT,
                reply_snippet TEXT,
                reply_sender_name TEXT,
                forwarded_from_id TEXT,
                forwarded_from_sender TEXT,
                forwarded_at INTEGER,
                forward_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'sent',
                sent_at INTEGER NOT NULL,
                delivered_at INTEGER,
                read_at INTEGER,
                is_read INTEGER NOT NULL DEFAULT 0,
                call_summary TEXT,
                created_at INTEGER NOT NULL,
                CHECK (
                    (kind = 'system' AND NOT (recipient_id IS NOT NULL AND event_id IS NOT NULL))
                    OR ((recipient_id IS NULL) <> (event_id IS NULL))
                )
            );

            CREATE TABLE IF NOT EXISTS message_attachments (
                message_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                kind TEXT NOT NULL,
                url TEXT NOT NULL,
                filename TEXT NOT NULL,
                size INTEGER NOT NULL,
                mime_type TEXT NOT NULL,
                duration REAL,
                waveform TEXT,
                thumbnail TEXT,
                PRIMARY KEY (message_id, position),
                FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS message_reactions (
                message_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                emoji TEXT NOT NULL,
                reacted_at INTEGER NOT NULL,
                PRIMARY KEY (message_id, user_id),
                FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS message_stars (
                message_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                starred_at INTEGER NOT NULL,
                PRIMARY KEY (message_id, user_id),
                FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS message_deletions (
                message_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                deleted_at INTEGER NOT NULL,
                PRIMARY KEY (message_id, user_id),
                FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS message_receipts (
                message_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                at INTEGER NOT NULL,
                PRIMARY KEY (message_id, user_id, kind),
                FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS message_labels (
                message_id TEXT NOT NULL,
                label TEXT NOT NULL,
                category TEXT,
                added_by TEXT NOT NULL,
                added_at INTEGER NOT NULL,
                PRIMARY KEY (message_id, label),
                FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS message_notes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL,
                author_id TEXT NOT NULL,
                note TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS message_reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL,
                reporter_id TEXT NOT NULL,
                reason TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (message_id, reporter_id),
                FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_participants_user ON event_participants(user_id);
            CREATE INDEX IF NOT EXISTS idx_messages_direct ON messages(sender_id, recipient_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient_id, is_read);
            CREATE INDEX IF NOT EXISTS idx_messages_event ON messages(event_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_messages_lineage ON messages(forwarded_from_id);
            CREATE INDEX IF NOT EXISTS idx_stars_user ON message_stars(user_id);
            CREATE INDEX IF NOT EXISTS idx_labels_label ON message_labels(label);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========================================================================
    // User Operations
    // ========================================================================

    pub async fn create_user(&self, name: &str, email: &str, is_admin: bool) -> Result<User> {
        let user = User {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            email: email.to_string(),
            avatar_url: None,
            is_admin,
            is_active: true,
            created_at: now_millis(),
        };

        sqlx::query(
            "INSERT INTO users (id, name, email, avatar_url, is_admin, is_active, created_at)
             VALUES (?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.avatar_url)
        .bind(user.is_admin)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, email, avatar_url, is_admin, is_active, created_at
             FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Active user lookup; inactive accounts are treated as absent.
    pub async fn get_active_user(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.get_user(user_id).await?.filter(|u| u.is_active))
    }

    pub async fn get_users(&self, user_ids: &[String]) -> Result<Vec<User>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, name, email, avatar_url, is_admin, is_active, created_at FROM users WHERE id IN (",
        );
        let mut ids = qb.separated(", ");
        for id in user_ids {
            ids.push_bind(id.as_str());
        }
        ids.push_unseparated(")");

        let users = qb.build_query_as::<User>().fetch_all(&self.pool).await?;
        Ok(users)
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT id, name, email, avatar_url, is_admin, is_active, created_at
             FROM users ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    pub async fn deactivate_user(&self, user_id: &str) -> Result<()> {
        sqlx::query("UPDATE users SET is_active = 0 WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        // Invalidate all sessions
        sqlx::query("UPDATE sessions SET is_valid = 0 WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ========================================================================
    // Session Operations
    // ========================================================================

    /// Store the hash of a freshly issued bearer token
    pub async fn create_session(&self, user_id: &str, token: &str, ttl_hours: i64) -> Result<i64> {
        let token_hash = crypto::hash_token(token);
        let now = now_millis();
        let expires_at = now + Duration::hours(ttl_hours).num_milliseconds();

        sqlx::query(
            "INSERT INTO sessions (token_hash, user_id, created_at, expires_at, is_valid)
             VALUES (?, ?, ?, ?, 1)",
        )
        .bind(&token_hash)
        .bind(user_id)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(expires_at)
    }

    pub async fn validate_session(&self, token: &str) -> Result<Option<Session>> {
        let token_hash = crypto::hash_token(token);

        let session = sqlx::query_as::<_, Session>(
            "SELECT token_hash, user_id, created_at, expires_at, is_valid
             FROM sessions
             WHERE token_hash = ? AND is_valid = 1 AND expires_at > ?",
        )
        .bind(&token_hash)
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    /// Resolve a bearer token to its active user. Shared by HTTP and socket auth.
    pub async fn authenticate_token(&self, token: &str) -> Result<Option<User>> {
        match self.validate_session(token).await? {
            Some(session) => self.get_active_user(&session.user_id).await,
            None => Ok(None),
        }
    }

    pub async fn invalidate_session(&self, token: &str) -> Result<()> {
        let token_hash = crypto::hash_token(token);

        sqlx::query("UPDATE sessions SET is_valid = 0 WHERE token_hash = ?")
            .bind(&token_hash)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ========================================================================
    // Event Operations
    // ========================================================================

    pub async fn create_event(&self, name: &str, created_by: &str) -> Result<Event> {
        let event = Event {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_by: created_by.to_string(),
            created_at: now_millis(),
        };

        sqlx::query("INSERT INTO events (id, name, created_by, created_at) VALUES (?, ?, ?, ?)")
            .bind(&event.id)
            .bind(&event.name)
            .bind(&event.created_by)
            .bind(event.created_at)
            .execute(&self.pool)
            .await?;

        Ok(event)
    }

    pub async fn get_event(&self, event_id: &str) -> Result<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(
            "SELECT id, name, created_by, created_at FROM events WHERE id = ?",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(event)
    }

    /// Add (or re-activate) a participant
    pub async fn add_participant(&self, event_id: &str, user_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO event_participants (event_id, user_id, status, joined_at)
             VALUES (?, ?, 'active', ?)
             ON CONFLICT(event_id, user_id) DO UPDATE SET status = 'active'",
        )
        .bind(event_id)
        .bind(user_id)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_participant_status(&self, event_id: &str, user_id: &str, status: &str) -> Result<()> {
        sqlx::query("UPDATE event_participants SET status = ? WHERE event_id = ? AND user_id = ?")
            .bind(status)
            .bind(event_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn is_active_participant(&self, event_id: &str, user_id: &str) -> Result<bool> {
        let found: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM event_participants WHERE event_id = ? AND user_id = ? AND status = 'active'",
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(found.is_some())
    }

    pub async fn participant_ids(&self, event_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT user_id FROM event_participants
             WHERE event_id = ? AND status = 'active'
             ORDER BY joined_at ASC",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn memberships(&self, user_id: &str) -> Result<Vec<Membership>> {
        let rows = sqlx::query_as::<_, Membership>(
            "SELECT e.id, e.name, e.created_by, e.created_at, p.joined_at
             FROM events e
             JOIN event_participants p ON p.event_id = e.id
             WHERE p.user_id = ? AND p.status = 'active'
             ORDER BY e.created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn active_event_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT event_id FROM event_participants WHERE user_id = ? AND status = 'active'",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    // ========================================================================
    // Cleanup Operations
    // ========================================================================

    pub async fn cleanup_expired_sessions(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ? OR is_valid = 0")
            .bind(now_millis())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
