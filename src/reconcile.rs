//! Reconciliation — out-of-band updates merged into the same cache the paged
//! mediators write, without going through the page-fetch path.
//!
//! Push notifications, realtime child events and local-origin writes (create
//! chat, send message) all funnel through one prepend/merge shape:
//!
//! 1. Key exists → bump its freshness clock, merge the entity fields.
//! 2. Key absent → chain a new key behind the most recently created one
//!    (`previous_cursor` = its marker, `next_cursor` = the new entity's own
//!    marker) and insert the entity row. The very first entity of a
//!    collection gets `previous_cursor = ""`.
//!
//! Each event is one transaction; a failure aborts the whole merge so no
//! entity-without-key or key-without-entity state can persist. Malformed
//! payloads are logged and dropped on the subscription pumps.

use std::sync::Arc;

use sqlx::{SqliteConnection, SqlitePool};

use crate::db::{self, DbError};
use crate::error::SyncError;
use crate::remote::{ChildEvent, Snapshot};
use crate::remote_keys::{self, KeySpace, RemoteKey};
use crate::store::{now_millis, SkiffCore};
use crate::{chats, friends, messages};

// ─── Shared prepend algorithm ────────────────────────────────────────────────

/// Chain (or re-touch) the key for `id` whose ordering marker is `marker`.
/// Returns whether the key already existed.
async fn prepend_key(
    conn: &mut SqliteConnection,
    space: KeySpace<'_>,
    id: &str,
    marker: &str,
    now: i64,
) -> Result<bool, DbError> {
    if remote_keys::get(conn, space, id).await?.is_some() {
        // Re-touching keeps the entity logically most-recent without
        // disturbing its position in the cursor chain.
        remote_keys::touch(conn, space, id, now).await?;
        return Ok(true);
    }
    let previous_cursor = match remote_keys::newest(conn, space).await? {
        // The newest key's own marker doubles as its id for chats/friends
        // and as its timestamp for messages.
        Some(newest) => Some(newest.next_cursor.unwrap_or(newest.id)),
        None => Some(String::new()),
    };
    remote_keys::insert(
        conn,
        space,
        &RemoteKey {
            id: id.to_string(),
            previous_cursor,
            next_cursor: Some(marker.to_string()),
            created_at: now,
        },
    )
    .await?;
    Ok(false)
}

// ─── Chats ───────────────────────────────────────────────────────────────────

/// Merge a chat document arriving out-of-band. `open_chat` is the chat the
/// user is currently looking at; an update to any *other* already-cached chat
/// bumps its unread counter.
pub async fn apply_chat_upsert(
    pool: &SqlitePool,
    snapshot: &Snapshot,
    open_chat: Option<&str>,
) -> Result<(), SyncError> {
    let row = chats::parse_chat(snapshot)?;
    let now = now_millis();

    let mut tx = pool.begin().await?;
    let existed = prepend_key(&mut tx, KeySpace::chats(), &row.chat_id, &row.chat_id, now).await?;
    db::upsert_chat(&mut tx, &row).await?;
    if existed && open_chat != Some(row.chat_id.as_str()) {
        db::increment_unread(&mut tx, &row.chat_id).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Update an already-cached chat's preview fields (last message, type,
/// timestamp) without touching peer identity. No-op if the chat isn't cached.
pub async fn apply_chat_preview(
    pool: &SqlitePool,
    chat_id: &str,
    last_message: &str,
    last_message_type: &str,
    timestamp: i64,
    open_chat: Option<&str>,
) -> Result<(), SyncError> {
    let now = now_millis();
    let mut tx = pool.begin().await?;
    let cached = remote_keys::get(&mut tx, KeySpace::chats(), chat_id).await?.is_some();
    if !cached {
        tx.commit().await?;
        return Ok(());
    }
    sqlx::query(
        "UPDATE chats SET last_message = ?, last_message_type = ?, last_message_at = ?
         WHERE chat_id = ?",
    )
    .bind(last_message)
    .bind(last_message_type)
    .bind(timestamp)
    .bind(chat_id)
    .execute(&mut *tx)
    .await?;
    remote_keys::touch(&mut tx, KeySpace::chats(), chat_id, now).await?;
    if open_chat != Some(chat_id) {
        db::increment_unread(&mut tx, chat_id).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Delete a chat and everything hanging off it: the message thread, the
/// message keys, the chat row and its key — one transaction.
pub async fn remove_chat(pool: &SqlitePool, chat_id: &str) -> Result<(), SyncError> {
    let mut tx = pool.begin().await?;
    db::delete_messages_for_chat(&mut tx, chat_id).await?;
    remote_keys::clear(&mut tx, KeySpace::messages(chat_id)).await?;
    db::delete_chat(&mut tx, chat_id).await?;
    remote_keys::delete(&mut tx, KeySpace::chats(), chat_id).await?;
    tx.commit().await?;
    Ok(())
}

// ─── Friends ─────────────────────────────────────────────────────────────────

pub async fn apply_friend_upsert(pool: &SqlitePool, snapshot: &Snapshot) -> Result<(), SyncError> {
    let row = friends::parse_user(snapshot)?;
    let now = now_millis();
    let mut tx = pool.begin().await?;
    prepend_key(&mut tx, KeySpace::friends(), &row.user_id, &row.user_id, now).await?;
    db::upsert_user(&mut tx, &row).await?;
    tx.commit().await?;
    Ok(())
}

pub async fn remove_friend(pool: &SqlitePool, user_id: &str) -> Result<(), SyncError> {
    let mut tx = pool.begin().await?;
    db::delete_user(&mut tx, user_id).await?;
    remote_keys::delete(&mut tx, KeySpace::friends(), user_id).await?;
    tx.commit().await?;
    Ok(())
}

// ─── Messages ────────────────────────────────────────────────────────────────

pub async fn apply_message_upsert(
    pool: &SqlitePool,
    chat_id: &str,
    snapshot: &Snapshot,
) -> Result<(), SyncError> {
    let row = messages::parse_message(chat_id, snapshot)?;
    let now = now_millis();
    let marker = row.sent_at.to_string();
    let mut tx = pool.begin().await?;
    prepend_key(&mut tx, KeySpace::messages(chat_id), &row.message_id, &marker, now).await?;
    db::upsert_message(&mut tx, &row).await?;
    tx.commit().await?;
    Ok(())
}

pub async fn remove_message(
    pool: &SqlitePool,
    chat_id: &str,
    message_id: &str,
) -> Result<(), SyncError> {
    let mut tx = pool.begin().await?;
    db::delete_message(&mut tx, message_id).await?;
    remote_keys::delete(&mut tx, KeySpace::messages(chat_id), message_id).await?;
    tx.commit().await?;
    Ok(())
}

// ─── Subscription pumps ──────────────────────────────────────────────────────

async fn apply_chat_event(core: &Arc<SkiffCore>, event: &ChildEvent) -> Result<(), SyncError> {
    match event {
        ChildEvent::Added(s) => {
            let mut conn = core.pool.acquire().await?;
            let cached = remote_keys::get(&mut conn, KeySpace::chats(), &s.key).await?.is_some();
            drop(conn);
            if !cached {
                apply_chat_upsert(&core.pool, s, core.open_chat().as_deref()).await?;
            }
            Ok(())
        }
        ChildEvent::Changed(s) => {
            apply_chat_upsert(&core.pool, s, core.open_chat().as_deref()).await
        }
        ChildEvent::Removed(s) => remove_chat(&core.pool, &s.key).await,
        ChildEvent::Moved(s) => {
            // Acknowledged but not applied; the flat chat list is re-ordered
            // by `last_message_at` alone.
            log::debug!("[reconcile] ignoring moved event for chat {}", s.key);
            Ok(())
        }
    }
}

async fn apply_friend_event(core: &Arc<SkiffCore>, event: &ChildEvent) -> Result<(), SyncError> {
    match event {
        ChildEvent::Added(s) => {
            let mut conn = core.pool.acquire().await?;
            let cached = remote_keys::get(&mut conn, KeySpace::friends(), &s.key).await?.is_some();
            drop(conn);
            if !cached {
                apply_friend_upsert(&core.pool, s).await?;
            }
            Ok(())
        }
        ChildEvent::Changed(s) => apply_friend_upsert(&core.pool, s).await,
        ChildEvent::Removed(s) => remove_friend(&core.pool, &s.key).await,
        ChildEvent::Moved(s) => {
            log::debug!("[reconcile] ignoring moved event for user {}", s.key);
            Ok(())
        }
    }
}

async fn apply_message_event(
    core: &Arc<SkiffCore>,
    chat_id: &str,
    event: &ChildEvent,
) -> Result<(), SyncError> {
    match event {
        ChildEvent::Added(s) | ChildEvent::Changed(s) => {
            apply_message_upsert(&core.pool, chat_id, s).await
        }
        ChildEvent::Removed(s) => remove_message(&core.pool, chat_id, &s.key).await,
        ChildEvent::Moved(s) => {
            log::debug!("[reconcile] ignoring moved event for message {}", s.key);
            Ok(())
        }
    }
}

/// Consume the chat-list feed for `uid` until the subscription closes or the
/// task is cancelled. Per-event failures are logged and dropped; the pump
/// never dies on a bad payload.
pub async fn run_chat_subscription(core: Arc<SkiffCore>, uid: String) -> Result<(), SyncError> {
    let mut sub = core.remote.subscribe(&format!("user_chats/{uid}")).await?;
    while let Some(event) = sub.next_event().await {
        if let Err(e) = apply_chat_event(&core, &event).await {
            log::warn!("[reconcile] chat event {} dropped: {e}", event.snapshot().key);
        }
    }
    Ok(())
}

pub async fn run_friend_subscription(core: Arc<SkiffCore>) -> Result<(), SyncError> {
    let mut sub = core.remote.subscribe("users").await?;
    while let Some(event) = sub.next_event().await {
        if let Err(e) = apply_friend_event(&core, &event).await {
            log::warn!("[reconcile] friend event {} dropped: {e}", event.snapshot().key);
        }
    }
    Ok(())
}

pub async fn run_message_subscription(
    core: Arc<SkiffCore>,
    chat_id: String,
) -> Result<(), SyncError> {
    let mut sub = core.remote.subscribe(&format!("messages/{chat_id}")).await?;
    while let Some(event) = sub.next_event().await {
        if let Err(e) = apply_message_event(&core, &chat_id, &event).await {
            log::warn!("[reconcile] message event {} dropped: {e}", event.snapshot().key);
        }
    }
    Ok(())
}
