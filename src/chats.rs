//! Chats collection — page size 55, TTL 10 minutes, keyed by opaque chat id.
//!
//! The remote keeps one chat document per user under `user_chats/{uid}`,
//! ordered by key. A Refresh fetches from the start of the key order, so the
//! first element of a refreshed page is a true chain head.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqliteConnection;

use crate::db::{self, ChatRow, DbError};
use crate::error::SyncError;
use crate::paging::{LoadDirection, Mediator, PagedCollection};
use crate::remote::{next_push_id, Query, RemoteSource, Snapshot};
use crate::remote_keys::KeySpace;
use crate::store::{now_millis, SkiffCore};
use crate::{reconcile, remote_keys};

pub const CHATS_PAGE_SIZE: u32 = 55;
pub const CHATS_TTL_MS: i64 = 10 * 60 * 1000;

// ─── Remote document ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatDoc {
    pub peer_id: String,
    pub peer_name: String,
    #[serde(default)]
    pub peer_avatar_url: Option<String>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default = "default_message_type")]
    pub last_message_type: String,
    #[serde(default)]
    pub timestamp: i64,
}

fn default_message_type() -> String {
    "text".to_string()
}

impl ChatDoc {
    pub fn into_row(self, chat_id: &str) -> ChatRow {
        ChatRow {
            chat_id: chat_id.to_string(),
            peer_id: self.peer_id,
            peer_name: self.peer_name,
            peer_avatar_url: self.peer_avatar_url,
            last_message: self.last_message,
            last_message_type: self.last_message_type,
            last_message_at: self.timestamp,
            unread_count: 0,
        }
    }
}

pub(crate) fn parse_chat(snapshot: &Snapshot) -> Result<ChatRow, SyncError> {
    let doc: ChatDoc = serde_json::from_value(snapshot.value.clone())
        .map_err(|e| SyncError::malformed(format!("chat {}: {e}", snapshot.key)))?;
    Ok(doc.into_row(&snapshot.key))
}

// ─── Paged collection ────────────────────────────────────────────────────────

pub struct ChatsCollection {
    uid: String,
}

impl ChatsCollection {
    pub fn new(uid: impl Into<String>) -> Self {
        ChatsCollection { uid: uid.into() }
    }

    pub fn path(&self) -> String {
        format!("user_chats/{}", self.uid)
    }
}

#[async_trait]
impl PagedCollection for ChatsCollection {
    const PAGE_SIZE: u32 = CHATS_PAGE_SIZE;
    const TTL_MS: i64 = CHATS_TTL_MS;

    fn key_space(&self) -> KeySpace<'_> {
        KeySpace::chats()
    }

    fn refresh_from_start(&self) -> bool {
        true
    }

    async fn fetch_page(
        &self,
        remote: &dyn RemoteSource,
        direction: LoadDirection,
        cursor: Option<&str>,
    ) -> Result<Vec<Snapshot>, SyncError> {
        let query = match (direction, cursor) {
            (LoadDirection::Refresh, _) => Query::order_by_key().limit_to_first(Self::PAGE_SIZE),
            (LoadDirection::Append, Some(c)) => {
                Query::order_by_key().start_after(c).limit_to_first(Self::PAGE_SIZE)
            }
            (LoadDirection::Prepend, Some(c)) => {
                Query::order_by_key().end_before(c).limit_to_last(Self::PAGE_SIZE)
            }
            // The mediator resolves cursors before fetching.
            (_, None) => return Ok(Vec::new()),
        };
        remote.query(&self.path(), query).await
    }

    async fn clear_local(&self, conn: &mut SqliteConnection) -> Result<(), DbError> {
        db::clear_chats(conn).await
    }

    async fn store_entity(
        &self,
        conn: &mut SqliteConnection,
        snapshot: &Snapshot,
    ) -> Result<String, SyncError> {
        let row = parse_chat(snapshot)?;
        db::upsert_chat(conn, &row).await?;
        Ok(snapshot.key.clone())
    }
}

pub fn chats_mediator(core: &Arc<SkiffCore>, uid: &str) -> Mediator<ChatsCollection> {
    Mediator::new(
        ChatsCollection::new(uid),
        core.pool.clone(),
        core.remote.clone(),
        core.connectivity.clone(),
    )
}

// ─── Local-origin operations ─────────────────────────────────────────────────

/// Create a chat with `peer`: one atomic fan-out to both participants'
/// chat lists, then the local prepend so the new chat shows up immediately.
pub async fn create_chat(
    core: &Arc<SkiffCore>,
    uid: &str,
    my_name: &str,
    peer: &db::UserRow,
) -> Result<String, SyncError> {
    let chat_id = next_push_id(now_millis() as u64);
    let now = now_millis();

    let mine = json!({
        "peer_id": peer.user_id,
        "peer_name": peer.name,
        "peer_avatar_url": peer.avatar_url,
        "last_message": null,
        "last_message_type": "text",
        "timestamp": now,
    });
    let theirs = json!({
        "peer_id": uid,
        "peer_name": my_name,
        "last_message": null,
        "last_message_type": "text",
        "timestamp": now,
    });

    let mut updates = HashMap::new();
    updates.insert(format!("user_chats/{uid}/{chat_id}"), mine.clone());
    updates.insert(format!("user_chats/{}/{chat_id}", peer.user_id), theirs);
    core.remote.update(updates).await?;

    let snapshot = Snapshot { key: chat_id.clone(), value: mine };
    reconcile::apply_chat_upsert(&core.pool, &snapshot, core.open_chat().as_deref()).await?;
    Ok(chat_id)
}

/// Delete a chat: remove both remote copies and the message thread, then
/// cascade locally (chat row, messages, message keys, chat key) in one
/// transaction.
pub async fn delete_chat(core: &Arc<SkiffCore>, uid: &str, chat_id: &str) -> Result<(), SyncError> {
    let peer_id = db::get_chat(&core.pool, chat_id).await?.map(|c| c.peer_id);

    let mut updates = HashMap::new();
    updates.insert(format!("user_chats/{uid}/{chat_id}"), serde_json::Value::Null);
    if let Some(peer) = peer_id {
        updates.insert(format!("user_chats/{peer}/{chat_id}"), serde_json::Value::Null);
    }
    updates.insert(format!("messages/{chat_id}"), serde_json::Value::Null);
    core.remote.update(updates).await?;

    reconcile::remove_chat(&core.pool, chat_id).await
}

/// Mark a conversation screen as open: reset its unread counter and stop
/// incoming events from bumping it.
pub async fn open_chat(core: &Arc<SkiffCore>, chat_id: &str) -> Result<(), SyncError> {
    core.set_open_chat(Some(chat_id.to_string()));
    db::reset_unread(&core.pool, chat_id).await?;
    Ok(())
}

pub fn close_chat(core: &Arc<SkiffCore>) {
    core.set_open_chat(None);
}
