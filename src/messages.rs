//! Messages collection — page size 40, TTL 5 minutes, cursors are timestamps
//! scoped per chat.
//!
//! Unlike chats and friends, a Refresh here fetches the *most recent* end of
//! the thread (`limit_to_last` over the timestamp index); older history is
//! reached by Prepend with `end_before` bounds.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqliteConnection;

use crate::db::{self, DbError, MessageRow};
use crate::error::SyncError;
use crate::media::{chat_image_path, ProgressCallback};
use crate::paging::{LoadDirection, Mediator, PagedCollection};
use crate::remote::{next_push_id, Query, RemoteSource, Snapshot};
use crate::remote_keys::KeySpace;
use crate::store::{now_millis, SkiffCore};
use crate::reconcile;

pub const MESSAGES_PAGE_SIZE: u32 = 40;
pub const MESSAGES_TTL_MS: i64 = 5 * 60 * 1000;

// ─── Remote document ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDoc {
    pub sender_id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub timestamp: i64,
}

impl MessageDoc {
    pub fn into_row(self, chat_id: &str, message_id: &str) -> MessageRow {
        MessageRow {
            message_id: message_id.to_string(),
            chat_id: chat_id.to_string(),
            sender_id: self.sender_id,
            body: self.text,
            image_url: self.image_url,
            sent_at: self.timestamp,
        }
    }
}

pub(crate) fn parse_message(chat_id: &str, snapshot: &Snapshot) -> Result<MessageRow, SyncError> {
    let doc: MessageDoc = serde_json::from_value(snapshot.value.clone())
        .map_err(|e| SyncError::malformed(format!("message {}: {e}", snapshot.key)))?;
    Ok(doc.into_row(chat_id, &snapshot.key))
}

// ─── Paged collection ────────────────────────────────────────────────────────

pub struct MessagesCollection {
    chat_id: String,
}

impl MessagesCollection {
    pub fn new(chat_id: impl Into<String>) -> Self {
        MessagesCollection { chat_id: chat_id.into() }
    }

    pub fn path(&self) -> String {
        format!("messages/{}", self.chat_id)
    }

    fn parse_cursor(cursor: &str) -> Result<i64, SyncError> {
        cursor
            .parse::<i64>()
            .map_err(|_| SyncError::malformed(format!("message cursor `{cursor}`")))
    }
}

#[async_trait]
impl PagedCollection for MessagesCollection {
    const PAGE_SIZE: u32 = MESSAGES_PAGE_SIZE;
    const TTL_MS: i64 = MESSAGES_TTL_MS;

    fn key_space(&self) -> KeySpace<'_> {
        KeySpace::messages(&self.chat_id)
    }

    fn refresh_from_start(&self) -> bool {
        false
    }

    async fn fetch_page(
        &self,
        remote: &dyn RemoteSource,
        direction: LoadDirection,
        cursor: Option<&str>,
    ) -> Result<Vec<Snapshot>, SyncError> {
        let query = match (direction, cursor) {
            (LoadDirection::Refresh, _) => {
                Query::order_by_child("timestamp").limit_to_last(Self::PAGE_SIZE)
            }
            (LoadDirection::Prepend, Some(c)) => Query::order_by_child("timestamp")
                .end_before(Self::parse_cursor(c)?)
                .limit_to_last(Self::PAGE_SIZE),
            (LoadDirection::Append, Some(c)) => Query::order_by_child("timestamp")
                .start_after(Self::parse_cursor(c)?)
                .limit_to_first(Self::PAGE_SIZE),
            (_, None) => return Ok(Vec::new()),
        };
        remote.query(&self.path(), query).await
    }

    async fn clear_local(&self, conn: &mut SqliteConnection) -> Result<(), DbError> {
        db::delete_messages_for_chat(conn, &self.chat_id).await
    }

    async fn store_entity(
        &self,
        conn: &mut SqliteConnection,
        snapshot: &Snapshot,
    ) -> Result<String, SyncError> {
        let row = parse_message(&self.chat_id, snapshot)?;
        db::upsert_message(conn, &row).await?;
        Ok(row.sent_at.to_string())
    }
}

pub fn messages_mediator(core: &Arc<SkiffCore>, chat_id: &str) -> Mediator<MessagesCollection> {
    Mediator::new(
        MessagesCollection::new(chat_id),
        core.pool.clone(),
        core.remote.clone(),
        core.connectivity.clone(),
    )
}

// ─── Sending ─────────────────────────────────────────────────────────────────

async fn send(
    core: &Arc<SkiffCore>,
    uid: &str,
    chat_id: &str,
    text: Option<String>,
    image_url: Option<String>,
) -> Result<String, SyncError> {
    let now = now_millis();
    let message_id = next_push_id(now as u64);
    let message_type = if image_url.is_some() { "image" } else { "text" };

    let doc = json!({
        "sender_id": uid,
        "text": text,
        "image_url": image_url,
        "timestamp": now,
    });

    // One atomic fan-out: the message plus both participants' chat previews.
    let mut updates = HashMap::new();
    updates.insert(format!("messages/{chat_id}/{message_id}"), doc.clone());
    // Image messages have no body; the chat list still needs a preview.
    let preview = text.clone().unwrap_or_else(|| "Photo".to_string());
    let peer_id = db::get_chat(&core.pool, chat_id).await?.map(|c| c.peer_id);
    for owner in [Some(uid.to_string()), peer_id.clone()].into_iter().flatten() {
        let base = format!("user_chats/{owner}/{chat_id}");
        updates.insert(format!("{base}/last_message"), json!(preview));
        updates.insert(format!("{base}/last_message_type"), json!(message_type));
        updates.insert(format!("{base}/timestamp"), json!(now));
    }
    core.remote.update(updates).await?;

    // Local-origin writes reuse the same merge the realtime path uses; the
    // sender's own chat counts as open so the unread counter stays put.
    let snapshot = Snapshot { key: message_id.clone(), value: doc };
    reconcile::apply_message_upsert(&core.pool, chat_id, &snapshot).await?;
    reconcile::apply_chat_preview(&core.pool, chat_id, &preview, message_type, now, Some(chat_id))
        .await?;
    Ok(message_id)
}

pub async fn send_text_message(
    core: &Arc<SkiffCore>,
    uid: &str,
    chat_id: &str,
    body: &str,
) -> Result<String, SyncError> {
    send(core, uid, chat_id, Some(body.to_string()), None).await
}

/// Upload the image first, then fan the message out with its download URL.
pub async fn send_image_message(
    core: &Arc<SkiffCore>,
    uid: &str,
    chat_id: &str,
    bytes: Vec<u8>,
    progress: Option<ProgressCallback>,
) -> Result<String, SyncError> {
    let staging_id = next_push_id(now_millis() as u64);
    let url = core
        .media
        .upload(&chat_image_path(chat_id, &staging_id), bytes, progress)
        .await
        .map_err(|e| SyncError::remote(e.to_string()))?;
    send(core, uid, chat_id, None, Some(url)).await
}
