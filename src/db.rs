//! Local cache — SQLite tables for chats, users and messages.
//!
//! The paged mediators and the reconciliation path call the helpers here.
//! Write helpers take `&mut SqliteConnection` so they compose into a single
//! transaction with the remote-key writes (an entity row and its key row must
//! never be committed separately); read helpers take the pool directly.

use sqlx::{Row, SqliteConnection, SqlitePool};
use thiserror::Error;

// ─── Error ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

// ─── Schema ──────────────────────────────────────────────────────────────────

/// Create all cache tables if they don't already exist.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
    sqlx::raw_sql(
        r#"
        PRAGMA journal_mode=WAL;

        CREATE TABLE IF NOT EXISTS chats (
            chat_id           TEXT PRIMARY KEY,
            peer_id           TEXT NOT NULL,
            peer_name         TEXT NOT NULL,
            peer_avatar_url   TEXT,
            last_message      TEXT,
            last_message_type TEXT NOT NULL DEFAULT 'text',
            last_message_at   INTEGER NOT NULL DEFAULT 0,
            unread_count      INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS users (
            user_id       TEXT PRIMARY KEY,
            name          TEXT NOT NULL,
            email         TEXT NOT NULL,
            avatar_url    TEXT,
            status        TEXT,
            last_seen_at  INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS messages (
            message_id  TEXT PRIMARY KEY,
            chat_id     TEXT NOT NULL,
            sender_id   TEXT NOT NULL,
            body        TEXT,
            image_url   TEXT,
            sent_at     INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat_sent
            ON messages (chat_id, sent_at);

        -- Remote page cursors, one row per cached entity. Message cursors are
        -- additionally scoped by chat because the remote orders them per chat.
        CREATE TABLE IF NOT EXISTS chat_keys (
            id              TEXT PRIMARY KEY,
            previous_cursor TEXT,
            next_cursor     TEXT,
            created_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS friend_keys (
            id              TEXT PRIMARY KEY,
            previous_cursor TEXT,
            next_cursor     TEXT,
            created_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS message_keys (
            id              TEXT NOT NULL,
            chat_id         TEXT NOT NULL,
            previous_cursor TEXT,
            next_cursor     TEXT,
            created_at      INTEGER NOT NULL,
            PRIMARY KEY (id, chat_id)
        );
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

// ─── Row types ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ChatRow {
    pub chat_id: String,
    pub peer_id: String,
    pub peer_name: String,
    pub peer_avatar_url: Option<String>,
    pub last_message: Option<String>,
    pub last_message_type: String,
    pub last_message_at: i64,
    /// Local-only derived counter; never written by page merges.
    pub unread_count: i64,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub status: Option<String>,
    pub last_seen_at: i64,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct MessageRow {
    pub message_id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub body: Option<String>,
    pub image_url: Option<String>,
    pub sent_at: i64,
}

// ─── Chats ───────────────────────────────────────────────────────────────────

/// Upsert a chat. `unread_count` is deliberately left alone on conflict — it
/// is local state owned by the reconcile path, not by the remote document.
pub async fn upsert_chat(conn: &mut SqliteConnection, row: &ChatRow) -> Result<(), DbError> {
    sqlx::query(
        r#"INSERT INTO chats
               (chat_id, peer_id, peer_name, peer_avatar_url,
                last_message, last_message_type, last_message_at, unread_count)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(chat_id) DO UPDATE SET
               peer_id           = excluded.peer_id,
               peer_name         = excluded.peer_name,
               peer_avatar_url   = excluded.peer_avatar_url,
               last_message      = excluded.last_message,
               last_message_type = excluded.last_message_type,
               last_message_at   = excluded.last_message_at"#,
    )
    .bind(&row.chat_id)
    .bind(&row.peer_id)
    .bind(&row.peer_name)
    .bind(&row.peer_avatar_url)
    .bind(&row.last_message)
    .bind(&row.last_message_type)
    .bind(row.last_message_at)
    .bind(row.unread_count)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_chat(pool: &SqlitePool, chat_id: &str) -> Result<Option<ChatRow>, DbError> {
    let row = sqlx::query_as::<_, ChatRow>("SELECT * FROM chats WHERE chat_id = ?")
        .bind(chat_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn list_chats(pool: &SqlitePool) -> Result<Vec<ChatRow>, DbError> {
    let rows = sqlx::query_as::<_, ChatRow>(
        "SELECT * FROM chats ORDER BY last_message_at DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn increment_unread(conn: &mut SqliteConnection, chat_id: &str) -> Result<(), DbError> {
    sqlx::query("UPDATE chats SET unread_count = unread_count + 1 WHERE chat_id = ?")
        .bind(chat_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Called when a chat screen opens.
pub async fn reset_unread(pool: &SqlitePool, chat_id: &str) -> Result<(), DbError> {
    sqlx::query("UPDATE chats SET unread_count = 0 WHERE chat_id = ?")
        .bind(chat_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_chat(conn: &mut SqliteConnection, chat_id: &str) -> Result<(), DbError> {
    sqlx::query("DELETE FROM chats WHERE chat_id = ?")
        .bind(chat_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn clear_chats(conn: &mut SqliteConnection) -> Result<(), DbError> {
    sqlx::query("DELETE FROM chats").execute(conn).await?;
    Ok(())
}

// ─── Users ───────────────────────────────────────────────────────────────────

pub async fn upsert_user(conn: &mut SqliteConnection, row: &UserRow) -> Result<(), DbError> {
    sqlx::query(
        r#"INSERT INTO users (user_id, name, email, avatar_url, status, last_seen_at)
           VALUES (?, ?, ?, ?, ?, ?)
           ON CONFLICT(user_id) DO UPDATE SET
               name         = excluded.name,
               email        = excluded.email,
               avatar_url   = excluded.avatar_url,
               status       = excluded.status,
               last_seen_at = excluded.last_seen_at"#,
    )
    .bind(&row.user_id)
    .bind(&row.name)
    .bind(&row.email)
    .bind(&row.avatar_url)
    .bind(&row.status)
    .bind(row.last_seen_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_user(pool: &SqlitePool, user_id: &str) -> Result<Option<UserRow>, DbError> {
    let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn list_users(pool: &SqlitePool) -> Result<Vec<UserRow>, DbError> {
    let rows = sqlx::query_as::<_, UserRow>("SELECT * FROM users ORDER BY name ASC")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Case-insensitive substring search over name and email.
pub async fn search_users(pool: &SqlitePool, query: &str) -> Result<Vec<UserRow>, DbError> {
    // Escape LIKE metacharacters so a literal '%' in the query stays literal.
    let escaped = query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    let pattern = format!("%{escaped}%");
    let rows = sqlx::query_as::<_, UserRow>(
        r#"SELECT * FROM users
           WHERE name LIKE ? ESCAPE '\' OR email LIKE ? ESCAPE '\'
           ORDER BY name ASC"#,
    )
    .bind(&pattern)
    .bind(&pattern)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn delete_user(conn: &mut SqliteConnection, user_id: &str) -> Result<(), DbError> {
    sqlx::query("DELETE FROM users WHERE user_id = ?")
        .bind(user_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn clear_users(conn: &mut SqliteConnection) -> Result<(), DbError> {
    sqlx::query("DELETE FROM users").execute(conn).await?;
    Ok(())
}

// ─── Messages ────────────────────────────────────────────────────────────────

pub async fn upsert_message(conn: &mut SqliteConnection, row: &MessageRow) -> Result<(), DbError> {
    sqlx::query(
        r#"INSERT INTO messages (message_id, chat_id, sender_id, body, image_url, sent_at)
           VALUES (?, ?, ?, ?, ?, ?)
           ON CONFLICT(message_id) DO UPDATE SET
               body      = excluded.body,
               image_url = excluded.image_url,
               sent_at   = excluded.sent_at"#,
    )
    .bind(&row.message_id)
    .bind(&row.chat_id)
    .bind(&row.sender_id)
    .bind(&row.body)
    .bind(&row.image_url)
    .bind(row.sent_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_message(
    pool: &SqlitePool,
    message_id: &str,
) -> Result<Option<MessageRow>, DbError> {
    let row = sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE message_id = ?")
        .bind(message_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn list_messages(
    pool: &SqlitePool,
    chat_id: &str,
    limit: u32,
    before_sent_at: Option<i64>,
) -> Result<Vec<MessageRow>, DbError> {
    let rows = match before_sent_at {
        Some(before) => {
            sqlx::query_as::<_, MessageRow>(
                "SELECT * FROM messages WHERE chat_id = ? AND sent_at < ?
                 ORDER BY sent_at DESC LIMIT ?",
            )
            .bind(chat_id)
            .bind(before)
            .bind(limit as i64)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, MessageRow>(
                "SELECT * FROM messages WHERE chat_id = ?
                 ORDER BY sent_at DESC LIMIT ?",
            )
            .bind(chat_id)
            .bind(limit as i64)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows)
}

pub async fn delete_message(conn: &mut SqliteConnection, message_id: &str) -> Result<(), DbError> {
    sqlx::query("DELETE FROM messages WHERE message_id = ?")
        .bind(message_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn delete_messages_for_chat(
    conn: &mut SqliteConnection,
    chat_id: &str,
) -> Result<(), DbError> {
    sqlx::query("DELETE FROM messages WHERE chat_id = ?")
        .bind(chat_id)
        .execute(conn)
        .await?;
    Ok(())
}

// ─── Purge (sign-out / account deletion) ─────────────────────────────────────

/// Drop every cached row and every cursor in one transaction.
pub async fn purge_all(pool: &SqlitePool) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;
    for table in [
        "messages",
        "chats",
        "users",
        "message_keys",
        "chat_keys",
        "friend_keys",
    ] {
        sqlx::query(&format!("DELETE FROM {table}")).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Count helper shared by tests and the reconcile cascade.
pub async fn count_rows(pool: &SqlitePool, table: &str) -> Result<i64, DbError> {
    let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {table}"))
        .fetch_one(pool)
        .await?;
    Ok(row.get::<i64, _>("n"))
}
