//! Push-notification ingestion.
//!
//! The platform deliverer hands over string extras `{chat_id, sender_id,
//! message_text, message_timestamp}`. Ingestion is best-effort: anything
//! that fails to parse is logged and dropped, and a duplicate delivery of
//! the same notification merges instead of duplicating (the derived message
//! id is deterministic).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use crate::db;
use crate::error::SyncError;
use crate::reconcile;
use crate::remote::Snapshot;
use crate::store::SkiffCore;

#[derive(Debug, Clone, PartialEq)]
pub struct PushPayload {
    pub chat_id: String,
    pub sender_id: String,
    pub message_text: String,
    pub message_timestamp: i64,
}

impl PushPayload {
    pub fn from_extras(extras: &HashMap<String, String>) -> Result<Self, SyncError> {
        let field = |name: &str| {
            extras
                .get(name)
                .cloned()
                .ok_or_else(|| SyncError::malformed(format!("push missing `{name}`")))
        };
        let raw_ts = field("message_timestamp")?;
        let message_timestamp = raw_ts
            .parse::<i64>()
            .map_err(|_| SyncError::malformed(format!("push timestamp `{raw_ts}`")))?;
        Ok(PushPayload {
            chat_id: field("chat_id")?,
            sender_id: field("sender_id")?,
            message_text: field("message_text")?,
            message_timestamp,
        })
    }
}

/// Ingest one notification. Malformed extras are dropped silently (logged);
/// a merge failure still surfaces, since the cache stayed consistent and the
/// caller may retry.
pub async fn handle_push(
    core: &Arc<SkiffCore>,
    extras: &HashMap<String, String>,
) -> Result<(), SyncError> {
    let payload = match PushPayload::from_extras(extras) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("[push] dropping notification: {e}");
            return Ok(());
        }
    };
    let open_chat = core.open_chat();

    if db::get_chat(&core.pool, &payload.chat_id).await?.is_some() {
        reconcile::apply_chat_preview(
            &core.pool,
            &payload.chat_id,
            &payload.message_text,
            "text",
            payload.message_timestamp,
            open_chat.as_deref(),
        )
        .await?;
    } else {
        // Brand-new chat arriving out-of-band. The sender is the peer; use
        // their cached profile if the contacts list already knows them.
        let peer = db::get_user(&core.pool, &payload.sender_id).await?;
        let chat = Snapshot {
            key: payload.chat_id.clone(),
            value: json!({
                "peer_id": payload.sender_id,
                "peer_name": peer.as_ref().map(|u| u.name.clone())
                    .unwrap_or_else(|| payload.sender_id.clone()),
                "peer_avatar_url": peer.and_then(|u| u.avatar_url),
                "last_message": payload.message_text,
                "last_message_type": "text",
                "timestamp": payload.message_timestamp,
            }),
        };
        reconcile::apply_chat_upsert(&core.pool, &chat, open_chat.as_deref()).await?;
    }

    // Deterministic id: a redelivered notification updates the same row.
    let message_id = format!("push-{}-{}", payload.sender_id, payload.message_timestamp);
    let message = Snapshot {
        key: message_id,
        value: json!({
            "sender_id": payload.sender_id,
            "text": payload.message_text,
            "timestamp": payload.message_timestamp,
        }),
    };
    reconcile::apply_message_upsert(&core.pool, &payload.chat_id, &message).await?;
    Ok(())
}
